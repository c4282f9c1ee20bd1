//! Subnetworks: learned maps from a conditioning block to raw (unconstrained) parameters.
//!
//! A coupling treats its subnetwork as opaque. It only relies on:
//! - `dims_in`: width of the conditioning block,
//! - `dims_out`: width of the raw parameter block (sum of the transform's parameter counts),
//! - `forward`: a pure function of the input and the current weights.
//!
//! Weights are owned here and never mutated by a coupling. Baselines in this module are plain
//! `ndarray` layers with seeded initialization; a `burn`-backed subnet lives behind the `burn`
//! feature.

use crate::{Error, Result};
use ndarray::{Array1, Array2, ArrayView2, Axis};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Normal};

pub trait Subnet {
    fn dims_in(&self) -> usize;
    fn dims_out(&self) -> usize;

    /// `(batch, dims_in) -> (batch, dims_out)`.
    fn forward(&self, condition: &ArrayView2<f32>) -> Result<Array2<f32>>;
}

impl<S: Subnet + ?Sized> Subnet for Box<S> {
    fn dims_in(&self) -> usize {
        (**self).dims_in()
    }

    fn dims_out(&self) -> usize {
        (**self).dims_out()
    }

    fn forward(&self, condition: &ArrayView2<f32>) -> Result<Array2<f32>> {
        (**self).forward(condition)
    }
}

/// Builds a subnetwork for a given `(dims_in, dims_out)`.
///
/// Implemented for any `FnOnce(usize, usize) -> Result<S>`, so a closure is the usual way to
/// pass one.
pub trait SubnetConstructor {
    type Output: Subnet;

    fn construct(self, dims_in: usize, dims_out: usize) -> Result<Self::Output>;
}

impl<F, S> SubnetConstructor for F
where
    F: FnOnce(usize, usize) -> Result<S>,
    S: Subnet,
{
    type Output = S;

    fn construct(self, dims_in: usize, dims_out: usize) -> Result<S> {
        self(dims_in, dims_out)
    }
}

fn check_input(condition: &ArrayView2<f32>, dims_in: usize) -> Result<()> {
    if condition.ncols() != dims_in {
        return Err(Error::Shape("subnet input width must equal dims_in"));
    }
    Ok(())
}

/// Ignores its input (beyond the batch size) and emits the same raw row for every sample.
#[derive(Debug, Clone)]
pub struct ConstantSubnet {
    dims_in: usize,
    row: Array1<f32>,
}

impl ConstantSubnet {
    pub fn new(dims_in: usize, row: Array1<f32>) -> Self {
        Self { dims_in, row }
    }

    pub fn zeros(dims_in: usize, dims_out: usize) -> Self {
        Self::new(dims_in, Array1::zeros(dims_out))
    }
}

impl Subnet for ConstantSubnet {
    fn dims_in(&self) -> usize {
        self.dims_in
    }

    fn dims_out(&self) -> usize {
        self.row.len()
    }

    fn forward(&self, condition: &ArrayView2<f32>) -> Result<Array2<f32>> {
        check_input(condition, self.dims_in)?;
        let n = condition.nrows();
        let row = self.row.view().insert_axis(Axis(0));
        row.broadcast((n, self.row.len()))
            .map(|v| v.to_owned())
            .ok_or(Error::Shape("cannot broadcast constant subnet output"))
    }
}

/// Wraps an arbitrary closure as a subnet with declared dimensions.
pub struct FnSubnet<F> {
    dims_in: usize,
    dims_out: usize,
    f: F,
}

impl<F> FnSubnet<F>
where
    F: Fn(&ArrayView2<f32>) -> Array2<f32>,
{
    pub fn new(dims_in: usize, dims_out: usize, f: F) -> Self {
        Self {
            dims_in,
            dims_out,
            f,
        }
    }
}

impl<F> Subnet for FnSubnet<F>
where
    F: Fn(&ArrayView2<f32>) -> Array2<f32>,
{
    fn dims_in(&self) -> usize {
        self.dims_in
    }

    fn dims_out(&self) -> usize {
        self.dims_out
    }

    fn forward(&self, condition: &ArrayView2<f32>) -> Result<Array2<f32>> {
        check_input(condition, self.dims_in)?;
        Ok((self.f)(condition))
    }
}

impl<F> std::fmt::Debug for FnSubnet<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnSubnet")
            .field("dims_in", &self.dims_in)
            .field("dims_out", &self.dims_out)
            .finish_non_exhaustive()
    }
}

/// A dense layer `y = x Wᵀ + b` with `W` of shape `(out, in)`.
#[derive(Debug, Clone)]
pub struct LinearSubnet {
    pub w: Array2<f32>,
    pub b: Array1<f32>,
}

impl LinearSubnet {
    pub fn new_zeros(dims_in: usize, dims_out: usize) -> Self {
        Self {
            w: Array2::zeros((dims_out, dims_in)),
            b: Array1::zeros(dims_out),
        }
    }

    /// Xavier-normal weights, zero bias, deterministic in `rng`.
    pub fn new_xavier(dims_in: usize, dims_out: usize, rng: &mut impl rand::Rng) -> Result<Self> {
        if dims_in == 0 || dims_out == 0 {
            return Err(Error::Domain("linear layer dimensions must be >= 1"));
        }
        let std = (2.0 / (dims_in + dims_out) as f32).sqrt();
        let normal =
            Normal::new(0.0f32, std).map_err(|_| Error::Domain("invalid init std"))?;
        let w = Array2::from_shape_fn((dims_out, dims_in), |_| normal.sample(&mut *rng));
        Ok(Self {
            w,
            b: Array1::zeros(dims_out),
        })
    }

    pub fn seeded(dims_in: usize, dims_out: usize, seed: u64) -> Result<Self> {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        Self::new_xavier(dims_in, dims_out, &mut rng)
    }

    fn apply(&self, x: &ArrayView2<f32>) -> Result<Array2<f32>> {
        if self.w.nrows() != self.b.len() {
            return Err(Error::Shape("linear layer bias length must equal weight rows"));
        }
        if x.ncols() != self.w.ncols() {
            return Err(Error::Shape("linear layer input width must equal weight columns"));
        }
        Ok(x.dot(&self.w.t()) + &self.b)
    }
}

impl Subnet for LinearSubnet {
    fn dims_in(&self) -> usize {
        self.w.ncols()
    }

    fn dims_out(&self) -> usize {
        self.w.nrows()
    }

    fn forward(&self, condition: &ArrayView2<f32>) -> Result<Array2<f32>> {
        check_input(condition, self.dims_in())?;
        self.apply(condition)
    }
}

/// Tanh-approximation GELU.
fn gelu(x: f32) -> f32 {
    0.5 * x * (1.0 + (x * 0.797_884_6 * (1.0 + 0.044_715 * x * x)).tanh())
}

/// Multi-layer perceptron: `depth` hidden layers of width `hidden` with GELU, then a linear head.
#[derive(Debug, Clone)]
pub struct MlpSubnet {
    layers: Vec<LinearSubnet>,
}

impl MlpSubnet {
    /// `depth` is the number of hidden layers (`>= 1`).
    ///
    /// With `zero_output`, the head starts at zero so the raw parameters are all zero until the
    /// weights are changed.
    pub fn new(
        dims_in: usize,
        dims_out: usize,
        hidden: usize,
        depth: usize,
        seed: u64,
        zero_output: bool,
    ) -> Result<Self> {
        if depth == 0 {
            return Err(Error::Domain("mlp depth must be >= 1"));
        }
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let mut layers = Vec::with_capacity(depth + 1);
        layers.push(LinearSubnet::new_xavier(dims_in, hidden, &mut rng)?);
        for _ in 1..depth {
            layers.push(LinearSubnet::new_xavier(hidden, hidden, &mut rng)?);
        }
        let head = if zero_output {
            LinearSubnet::new_zeros(hidden, dims_out)
        } else {
            LinearSubnet::new_xavier(hidden, dims_out, &mut rng)?
        };
        layers.push(head);
        Ok(Self { layers })
    }

    pub fn layers(&self) -> &[LinearSubnet] {
        &self.layers
    }

    /// Mutable access for an external optimizer.
    pub fn layers_mut(&mut self) -> &mut [LinearSubnet] {
        &mut self.layers
    }

    /// Multiply the output layer by `gain`.
    ///
    /// Combined with a random head, a small gain gives a coupling close to the identity whose
    /// scales stay near 1 through deep stacks.
    pub fn scale_head(&mut self, gain: f32) {
        if let Some(head) = self.layers.last_mut() {
            head.w.mapv_inplace(|v| gain * v);
            head.b.mapv_inplace(|v| gain * v);
        }
    }

    /// Number of trainable scalars.
    pub fn num_parameters(&self) -> usize {
        self.layers.iter().map(|l| l.w.len() + l.b.len()).sum()
    }
}

impl Subnet for MlpSubnet {
    fn dims_in(&self) -> usize {
        self.layers[0].dims_in()
    }

    fn dims_out(&self) -> usize {
        self.layers[self.layers.len() - 1].dims_out()
    }

    fn forward(&self, condition: &ArrayView2<f32>) -> Result<Array2<f32>> {
        check_input(condition, self.dims_in())?;
        let last = self.layers.len() - 1;
        let mut h = self.layers[0].apply(condition)?;
        if last > 0 {
            h.mapv_inplace(gelu);
        }
        for (i, layer) in self.layers.iter().enumerate().skip(1) {
            h = layer.apply(&h.view())?;
            if i < last {
                h.mapv_inplace(gelu);
            }
        }
        Ok(h)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn constant_subnet_repeats_row() {
        let net = ConstantSubnet::new(2, array![0.5f32, -1.0]);
        let x = Array2::<f32>::zeros((3, 2));
        let y = net.forward(&x.view()).unwrap();
        assert_eq!(y.dim(), (3, 2));
        for i in 0..3 {
            assert_eq!(y.row(i), array![0.5f32, -1.0]);
        }
    }

    #[test]
    fn wrong_input_width_is_rejected() {
        let net = ConstantSubnet::zeros(2, 2);
        let x = Array2::<f32>::zeros((1, 3));
        assert!(matches!(net.forward(&x.view()), Err(Error::Shape(_))));

        let lin = LinearSubnet::new_zeros(2, 4);
        assert!(lin.forward(&x.view()).is_err());
    }

    #[test]
    fn linear_subnet_applies_affine_map() {
        let lin = LinearSubnet {
            w: array![[1.0f32, 2.0], [0.0, -1.0]],
            b: array![0.5f32, 0.0],
        };
        let x = array![[1.0f32, 1.0], [2.0, 0.0]];
        let y = lin.forward(&x.view()).unwrap();
        assert_eq!(y, array![[3.5f32, -1.0], [2.5, 0.0]]);
    }

    #[test]
    fn mlp_is_deterministic_in_seed() {
        let a = MlpSubnet::new(3, 2, 8, 2, 7, false).unwrap();
        let b = MlpSubnet::new(3, 2, 8, 2, 7, false).unwrap();
        let c = MlpSubnet::new(3, 2, 8, 2, 8, false).unwrap();
        let x = array![[0.1f32, -0.2, 0.3]];
        let ya = a.forward(&x.view()).unwrap();
        assert_eq!(ya, b.forward(&x.view()).unwrap());
        assert_ne!(ya, c.forward(&x.view()).unwrap());
        assert_eq!(a.dims_in(), 3);
        assert_eq!(a.dims_out(), 2);
        assert_eq!(a.num_parameters(), 3 * 8 + 8 + 8 * 8 + 8 + 8 * 2 + 2);
    }

    #[test]
    fn zero_output_mlp_emits_zeros() {
        let net = MlpSubnet::new(2, 4, 16, 1, 1, true).unwrap();
        let x = array![[3.0f32, -7.0], [0.5, 0.25]];
        let y = net.forward(&x.view()).unwrap();
        assert!(y.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn inconsistent_layers_are_shape_errors() {
        let lin = LinearSubnet {
            w: Array2::zeros((2, 2)),
            b: Array1::zeros(3),
        };
        let x = Array2::<f32>::zeros((1, 2));
        assert!(matches!(lin.forward(&x.view()), Err(Error::Shape(_))));

        let mut net = MlpSubnet::new(2, 4, 4, 2, 0, false).unwrap();
        net.layers_mut()[1] = LinearSubnet::new_zeros(5, 4);
        assert!(matches!(net.forward(&x.view()), Err(Error::Shape(_))));
    }

    #[test]
    fn scaled_head_shrinks_output() {
        let mut net = MlpSubnet::new(2, 3, 8, 1, 5, false).unwrap();
        let x = array![[0.4f32, -0.9]];
        let y = net.forward(&x.view()).unwrap();
        net.scale_head(0.5);
        let y_half = net.forward(&x.view()).unwrap();
        for (a, b) in y.iter().zip(y_half.iter()) {
            assert!((0.5 * a - b).abs() < 1e-6);
        }
    }

    #[test]
    fn closures_construct_subnets() {
        let ctor = |i: usize, o: usize| -> Result<ConstantSubnet> { Ok(ConstantSubnet::zeros(i, o)) };
        let net = ctor.construct(3, 5).unwrap();
        assert_eq!((net.dims_in(), net.dims_out()), (3, 5));
    }
}
