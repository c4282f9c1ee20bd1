//! Two-stage coupling layer.
//!
//! Given `x` of shape `(batch, channels)` and a split into `(x1, x2)`:
//!
//! ```text
//! forward:  z1 = T(x1; θ(x2))        inverse:  x2 = T⁻¹(z2; θ(z1))
//!           z2 = T(x2; θ(z1))                  x1 = T⁻¹(z1; θ(x2))
//!           z  = merge(z1, z2)                 x  = merge(x1, x2)
//! ```
//!
//! where `θ(c)` runs the subnetwork on `c`, slices its output by the transform's declared
//! parameter widths, and constrains each slice.
//!
//! Both halves are transformed, each conditioned on the *other, already updated* half. This is
//! not the single-stage layout (which leaves one half untouched); the inverse undoes the stages
//! in reverse order, so the layer is an exact bijection in real arithmetic. In `f32` the round
//! trip is only as good as the conditioning: a subnetwork that drives a scale towards 0 or
//! overflow makes the inverse lose precision or go non-finite. One subnetwork serves both
//! stages, so its input width must fit both halves.

use crate::constraint::{total_width, validate_specs, ConstrainedParameters, ParameterSpec};
use crate::split::Split;
use crate::subnet::Subnet;
use crate::transform::Transform;
use crate::{Error, Result};
use ndarray::{s, Array1, Array2, ArrayView2};

/// Every layer entry point rejects a `(0, channels)` input with [`Error::Domain`].
pub(crate) fn check_batch(x: &ArrayView2<f32>) -> Result<()> {
    if x.nrows() == 0 {
        return Err(Error::Domain("batch must be non-empty"));
    }
    Ok(())
}

#[derive(Debug, Clone)]
pub struct Coupling<S, T, N> {
    split: S,
    transform: T,
    subnet: N,
    parameters: Vec<ParameterSpec>,
}

impl<S: Split, T: Transform, N: Subnet> Coupling<S, T, N> {
    /// Assemble a coupling from its parts.
    ///
    /// The transform's parameter specs are copied here; the subnetwork must emit exactly their
    /// total width.
    pub fn new(split: S, transform: T, subnet: N) -> Result<Self> {
        let parameters = transform.parameter_specs();
        validate_specs(&parameters)?;
        let expected = total_width(&parameters);
        if subnet.dims_out() != expected {
            return Err(Error::ParameterWidth {
                expected,
                got: subnet.dims_out(),
            });
        }
        log::debug!(
            "coupling: transform={} params={:?} subnet {}->{}",
            transform.name(),
            parameters.iter().map(|p| (p.name, p.count)).collect::<Vec<_>>(),
            subnet.dims_in(),
            subnet.dims_out(),
        );
        Ok(Self {
            split,
            transform,
            subnet,
            parameters,
        })
    }

    pub fn split(&self) -> &S {
        &self.split
    }

    pub fn transform(&self) -> &T {
        &self.transform
    }

    pub fn subnet(&self) -> &N {
        &self.subnet
    }

    /// Mutable access to the subnetwork weights (for an external optimizer).
    pub fn subnet_mut(&mut self) -> &mut N {
        &mut self.subnet
    }

    pub fn parameter_specs(&self) -> &[ParameterSpec] {
        &self.parameters
    }

    pub fn parameter_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.parameters.iter().map(|p| p.name)
    }

    pub fn parameter_counts(&self) -> Vec<usize> {
        self.parameters.iter().map(|p| p.count).collect()
    }

    /// Width the subnetwork output must have.
    pub fn raw_width(&self) -> usize {
        total_width(&self.parameters)
    }

    /// Run the subnetwork on `condition` and turn its output into constrained parameters.
    ///
    /// Fails with [`Error::ParameterWidth`] when the subnetwork output width differs from the
    /// sum of declared counts.
    pub fn get_parameters(&self, condition: &ArrayView2<f32>) -> Result<ConstrainedParameters> {
        check_batch(condition)?;
        let raw = self.subnet.forward(condition)?;
        if raw.nrows() != condition.nrows() {
            return Err(Error::Shape("subnet output batch must match its input batch"));
        }
        let expected = self.raw_width();
        if raw.ncols() != expected {
            return Err(Error::ParameterWidth {
                expected,
                got: raw.ncols(),
            });
        }

        let mut out = ConstrainedParameters::with_capacity(self.parameters.len());
        let mut start = 0usize;
        for spec in &self.parameters {
            let end = start + spec.count;
            let block = spec.constrain(&raw.slice(s![.., start..end]))?;
            out.push(spec.name, block);
            start = end;
        }
        Ok(out)
    }

    pub fn forward(&self, x: &ArrayView2<f32>) -> Result<Array2<f32>> {
        self.forward_stages(x, |_, _| Ok(()))
    }

    pub fn inverse(&self, z: &ArrayView2<f32>) -> Result<Array2<f32>> {
        self.inverse_stages(z, |_, _| Ok(()))
    }

    /// Forward pass plus the per-row `log |det J|` of the whole layer.
    pub fn forward_with_log_det(&self, x: &ArrayView2<f32>) -> Result<(Array2<f32>, Array1<f32>)> {
        let mut log_det = Array1::<f32>::zeros(x.nrows());
        let z = self.forward_stages(x, |value, params| {
            log_det += &self.transform.log_abs_det_jacobian(value, params)?;
            Ok(())
        })?;
        Ok((z, log_det))
    }

    /// Inverse pass plus the per-row `log |det J|` of the inverse (the negated forward log-det).
    pub fn inverse_with_log_det(&self, z: &ArrayView2<f32>) -> Result<(Array2<f32>, Array1<f32>)> {
        let mut log_det = Array1::<f32>::zeros(z.nrows());
        let x = self.inverse_stages(z, |value, params| {
            log_det -= &self.transform.log_abs_det_jacobian(value, params)?;
            Ok(())
        })?;
        Ok((x, log_det))
    }

    /// `stage` sees each transformed input together with the parameters applied to it.
    fn forward_stages(
        &self,
        x: &ArrayView2<f32>,
        mut stage: impl FnMut(&ArrayView2<f32>, &ConstrainedParameters) -> Result<()>,
    ) -> Result<Array2<f32>> {
        check_batch(x)?;
        let (x1, x2) = self.split.forward(x)?;

        let params = self.get_parameters(&x2.view())?;
        let z1 = self.transform.forward(&x1.view(), &params)?;
        stage(&x1.view(), &params)?;

        let params = self.get_parameters(&z1.view())?;
        let z2 = self.transform.forward(&x2.view(), &params)?;
        stage(&x2.view(), &params)?;

        log::trace!("coupling forward: batch={} channels={}", x.nrows(), x.ncols());
        self.split.inverse(&z1.view(), &z2.view())
    }

    /// `stage` sees each recovered input together with the parameters that were inverted.
    fn inverse_stages(
        &self,
        z: &ArrayView2<f32>,
        mut stage: impl FnMut(&ArrayView2<f32>, &ConstrainedParameters) -> Result<()>,
    ) -> Result<Array2<f32>> {
        check_batch(z)?;
        let (z1, z2) = self.split.forward(z)?;

        let params = self.get_parameters(&z1.view())?;
        let x2 = self.transform.inverse(&z2.view(), &params)?;
        stage(&x2.view(), &params)?;

        let params = self.get_parameters(&x2.view())?;
        let x1 = self.transform.inverse(&z1.view(), &params)?;
        stage(&x1.view(), &params)?;

        log::trace!("coupling inverse: batch={} channels={}", z.nrows(), z.ncols());
        self.split.inverse(&x1.view(), &x2.view())
    }
}
