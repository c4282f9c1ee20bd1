//! The elementwise invertible transform a coupling applies to one half of its input.
//!
//! A transform is described by:
//! - its declared parameters ([`ParameterSpec`]s, in the order the subnetwork must emit them),
//! - a forward and an inverse map over a `(batch, width)` value block,
//! - optionally, the per-row log-determinant of the forward Jacobian.
//!
//! Contract: `inverse(forward(x, p), p) == x` (within float tolerance) for every valid `p`.
//!
//! Adding a variant means declaring its specs and overriding the bodies. Bodies that are not
//! overridden fail at call time with [`Error::Unimplemented`]; they never fall back to a default
//! mapping.

use crate::constraint::{ConstrainedParameters, ParameterSpec};
use crate::{Error, Result};
use ndarray::{Array1, Array2, ArrayView2};

pub trait Transform {
    /// Stable identifier (used in logs and in [`Error::Unimplemented`]).
    fn name(&self) -> &'static str;

    /// Declared parameters, in subnetwork output order.
    fn parameter_specs(&self) -> Vec<ParameterSpec>;

    fn forward(&self, _x: &ArrayView2<f32>, _params: &ConstrainedParameters) -> Result<Array2<f32>> {
        Err(Error::Unimplemented(self.name()))
    }

    fn inverse(&self, _y: &ArrayView2<f32>, _params: &ConstrainedParameters) -> Result<Array2<f32>> {
        Err(Error::Unimplemented(self.name()))
    }

    /// `log |det ∂forward/∂x|` for each batch row, evaluated at `x`.
    fn log_abs_det_jacobian(
        &self,
        _x: &ArrayView2<f32>,
        _params: &ConstrainedParameters,
    ) -> Result<Array1<f32>> {
        Err(Error::Unimplemented(self.name()))
    }
}

impl<T: Transform + ?Sized> Transform for Box<T> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn parameter_specs(&self) -> Vec<ParameterSpec> {
        (**self).parameter_specs()
    }

    fn forward(&self, x: &ArrayView2<f32>, params: &ConstrainedParameters) -> Result<Array2<f32>> {
        (**self).forward(x, params)
    }

    fn inverse(&self, y: &ArrayView2<f32>, params: &ConstrainedParameters) -> Result<Array2<f32>> {
        (**self).inverse(y, params)
    }

    fn log_abs_det_jacobian(
        &self,
        x: &ArrayView2<f32>,
        params: &ConstrainedParameters,
    ) -> Result<Array1<f32>> {
        (**self).log_abs_det_jacobian(x, params)
    }
}

/// Broadcast a parameter block against a `(batch, width)` value block.
///
/// A block of width 1 is shared by every channel; a block of width `width` applies per channel.
/// The batch sizes must match.
pub fn broadcast_param<'a>(
    param: &'a ArrayView2<'a, f32>,
    batch: usize,
    width: usize,
) -> Result<ArrayView2<'a, f32>> {
    if param.nrows() != batch {
        return Err(Error::Shape("parameter batch must match value batch"));
    }
    if param.ncols() != 1 && param.ncols() != width {
        return Err(Error::Shape(
            "parameter width must be 1 or equal to the value width",
        ));
    }
    param
        .broadcast((batch, width))
        .ok_or(Error::Shape("parameter block cannot be broadcast to the value"))
}
