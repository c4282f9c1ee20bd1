//! # flowcouple
//!
//! Invertible coupling transforms for normalizing-flow models.
//!
//! A coupling layer splits its input into two halves, lets a learned subnetwork read one half and
//! emit raw parameters, maps those raw parameters through per-parameter constraints, and applies
//! an elementwise invertible transform to the other half. Here each call runs two stages:
//!
//! - `z1 = T(x1; θ(x2))`,
//! - `z2 = T(x2; θ(z1))` (conditioned on the *updated* first half).
//!
//! The inverse undoes the stages in reverse order.
//!
//! ## Public invariants (must not change)
//!
//! - **Exact splits**: every [`split::Split`] recombines to the bit-identical input.
//! - **Declared parameters**: a transform's parameter specs fix the raw width its subnet must
//!   emit; a mismatch is an error, never a silent truncation.
//! - **Determinism knobs are explicit**: seeded constructors take a `seed`.
//! - **Backend-agnostic by default**: `ndarray` only; the `burn` subnet is feature-gated.
//!
//! ## Module map
//!
//! - `constraint`: `Real` / `Positive` / `Increasing` maps and the named parameter container
//! - `transform`: the `Transform` trait (forward, inverse, log-det)
//! - `affine`: `y = scale * x + shift`
//! - `spline`: rational-quadratic spline parameter layout (body not provided)
//! - `split`: channel partitions (`EvenSplit`, `SplitAt`, `Interleaved`)
//! - `subnet`: conditioning networks (`ConstantSubnet`, `LinearSubnet`, `MlpSubnet`)
//! - `coupling`: the two-stage coupling layer
//! - `builder`: factories that size the subnet from the transform
//! - `flow`: `Invertible`, `Permutation`, `Sequential` composition
//!
//! ## References
//!
//! - Dinh et al., *Density estimation using Real NVP* (arXiv:1605.08803): affine coupling.
//! - Durkan et al., *Neural Spline Flows* (arXiv:1906.04032): rational-quadratic splines.

pub mod affine;
pub mod builder;
pub mod constraint;
pub mod coupling;
pub mod flow;
pub mod spline;
pub mod split;
pub mod subnet;
pub mod transform;

#[cfg(feature = "burn")]
pub mod burn_subnet;

pub use affine::AffineTransform;
pub use builder::{affine_coupling, build_coupling, CouplingConfig};
pub use constraint::{ConstrainedParameters, Constraint, ParameterSpec};
pub use coupling::Coupling;
pub use flow::{Invertible, Permutation, Sequential};
pub use spline::RqSpline;
pub use split::{EvenSplit, Interleaved, Split, SplitAt};
pub use subnet::{ConstantSubnet, LinearSubnet, MlpSubnet, Subnet, SubnetConstructor};
pub use transform::Transform;

/// flowcouple error variants.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("shape mismatch: {0}")]
    Shape(&'static str),
    #[error("domain error: {0}")]
    Domain(&'static str),
    #[error("parameter width mismatch: expected {expected}, got {got}")]
    ParameterWidth { expected: usize, got: usize },
    #[error("unknown parameter: {0}")]
    UnknownParameter(String),
    #[error("transform not implemented: {0}")]
    Unimplemented(&'static str),
}

pub type Result<T> = std::result::Result<T, Error>;
