//! Affine transform: `y = scale * x + shift`.

use crate::constraint::{ConstrainedParameters, ParameterSpec};
use crate::transform::{broadcast_param, Transform};
use crate::Result;
use ndarray::{Array1, Array2, ArrayView2, Axis, Zip};

/// Elementwise affine map with a positive scale.
///
/// Declared parameters (in order): `scale` (positive, width 1), `shift` (real, width 1).
/// Width-1 parameters are shared across every channel of the transformed half.
#[derive(Debug, Clone, Copy, Default)]
pub struct AffineTransform;

impl AffineTransform {
    const SCALE: usize = 0;
    const SHIFT: usize = 1;

    fn scale_shift<'p>(
        params: &'p ConstrainedParameters,
    ) -> Result<(ArrayView2<'p, f32>, ArrayView2<'p, f32>)> {
        Ok((params.at(Self::SCALE)?, params.at(Self::SHIFT)?))
    }
}

impl Transform for AffineTransform {
    fn name(&self) -> &'static str {
        "affine"
    }

    fn parameter_specs(&self) -> Vec<ParameterSpec> {
        vec![
            ParameterSpec::positive("scale", 1),
            ParameterSpec::real("shift", 1),
        ]
    }

    fn forward(&self, x: &ArrayView2<f32>, params: &ConstrainedParameters) -> Result<Array2<f32>> {
        let (scale, shift) = Self::scale_shift(params)?;
        let (n, d) = x.dim();
        let scale = broadcast_param(&scale, n, d)?;
        let shift = broadcast_param(&shift, n, d)?;

        let mut y = Array2::<f32>::zeros((n, d));
        Zip::from(&mut y)
            .and(x)
            .and(&scale)
            .and(&shift)
            .for_each(|y, &x, &s, &t| *y = s * x + t);
        Ok(y)
    }

    fn inverse(&self, y: &ArrayView2<f32>, params: &ConstrainedParameters) -> Result<Array2<f32>> {
        let (scale, shift) = Self::scale_shift(params)?;
        let (n, d) = y.dim();
        let scale = broadcast_param(&scale, n, d)?;
        let shift = broadcast_param(&shift, n, d)?;

        let mut x = Array2::<f32>::zeros((n, d));
        Zip::from(&mut x)
            .and(y)
            .and(&scale)
            .and(&shift)
            .for_each(|x, &y, &s, &t| *x = (y - t) / s);
        Ok(x)
    }

    fn log_abs_det_jacobian(
        &self,
        x: &ArrayView2<f32>,
        params: &ConstrainedParameters,
    ) -> Result<Array1<f32>> {
        let (scale, _shift) = Self::scale_shift(params)?;
        let (n, d) = x.dim();
        let scale = broadcast_param(&scale, n, d)?;
        // Diagonal Jacobian: sum of ln(scale) over the transformed channels.
        Ok(scale.mapv(f32::ln).sum_axis(Axis(1)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;
    use proptest::prelude::*;

    fn params(scale: Array2<f32>, shift: Array2<f32>) -> ConstrainedParameters {
        let mut p = ConstrainedParameters::with_capacity(2);
        p.push("scale", scale);
        p.push("shift", shift);
        p
    }

    #[test]
    fn forward_and_inverse_match_worked_example() {
        let x = array![[1.0f32, -2.0, 0.5]];
        let p = params(array![[2.0]], array![[1.0]]);

        let y = AffineTransform.forward(&x.view(), &p).unwrap();
        assert_eq!(y, array![[3.0f32, -3.0, 2.0]]);

        let back = AffineTransform.inverse(&y.view(), &p).unwrap();
        for (a, b) in back.iter().zip(x.iter()) {
            assert_abs_diff_eq!(*a, *b, epsilon = 1e-6);
        }
    }

    #[test]
    fn per_channel_parameters_are_accepted() {
        let x = array![[1.0f32, 1.0]];
        let p = params(array![[2.0, 3.0]], array![[0.0, -1.0]]);
        let y = AffineTransform.forward(&x.view(), &p).unwrap();
        assert_eq!(y, array![[2.0f32, 2.0]]);
    }

    #[test]
    fn log_det_is_width_times_log_scale() {
        let x = array![[1.0f32, -2.0, 0.5], [0.0, 0.0, 0.0]];
        let p = params(array![[2.0], [0.5]], array![[1.0], [1.0]]);
        let ld = AffineTransform.log_abs_det_jacobian(&x.view(), &p).unwrap();
        assert_abs_diff_eq!(ld[0], 3.0 * 2.0f32.ln(), epsilon = 1e-6);
        assert_abs_diff_eq!(ld[1], 3.0 * 0.5f32.ln(), epsilon = 1e-6);
    }

    #[test]
    fn batch_mismatch_is_a_shape_error() {
        let x = array![[1.0f32], [2.0]];
        let p = params(array![[2.0]], array![[1.0]]);
        assert!(matches!(
            AffineTransform.forward(&x.view(), &p),
            Err(crate::Error::Shape(_))
        ));
    }

    #[test]
    fn missing_parameters_are_reported() {
        let x = array![[1.0f32]];
        let mut p = ConstrainedParameters::new();
        p.push("scale", array![[2.0]]);
        assert!(AffineTransform.forward(&x.view(), &p).is_err());
    }

    proptest! {
        #[test]
        fn prop_roundtrip(
            xs in prop::collection::vec(-50.0f32..50.0f32, 1..24),
            log_scale in -3.0f32..3.0f32,
            shift in -10.0f32..10.0f32,
        ) {
            let d = xs.len();
            let x = Array2::from_shape_vec((1, d), xs).unwrap();
            let p = params(array![[log_scale.exp()]], array![[shift]]);
            let y = AffineTransform.forward(&x.view(), &p).unwrap();
            let back = AffineTransform.inverse(&y.view(), &p).unwrap();
            for k in 0..d {
                let tol = 1e-4 * (1.0 + x[[0, k]].abs());
                prop_assert!((back[[0, k]] - x[[0, k]]).abs() <= tol, "channel {}", k);
            }
        }
    }
}
