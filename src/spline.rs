//! Rational-quadratic spline transform (parameter layout only).
//!
//! The declared layout follows the usual neural-spline convention with identity tails:
//! `K + 1 = 10` knots give `K = 9` bins, and the `K - 1 = 8` interior knot derivatives are free
//! (the two boundary derivatives are pinned to 1 so the spline joins the identity outside the
//! knot range).
//!
//! The forward/inverse bodies are not provided; calling them returns
//! [`crate::Error::Unimplemented`]. Couplings can still be built around this transform (so the
//! subnetwork width and parameter slicing are exercised), they just fail when applied.

use crate::constraint::ParameterSpec;
use crate::transform::Transform;

/// Number of knots on each axis.
pub const RQ_SPLINE_KNOTS: usize = 10;

#[derive(Debug, Clone, Copy, Default)]
pub struct RqSpline;

impl RqSpline {
    pub fn num_bins(&self) -> usize {
        RQ_SPLINE_KNOTS - 1
    }

    pub fn interior_derivatives(&self) -> usize {
        RQ_SPLINE_KNOTS - 2
    }
}

impl Transform for RqSpline {
    fn name(&self) -> &'static str {
        "rq_spline"
    }

    fn parameter_specs(&self) -> Vec<ParameterSpec> {
        vec![
            ParameterSpec::increasing("x_edges", RQ_SPLINE_KNOTS),
            ParameterSpec::increasing("y_edges", RQ_SPLINE_KNOTS),
            ParameterSpec::positive("deltas", self.interior_derivatives()),
        ]
    }
}
