//! Burn-backed (opt-in) subnetwork.
//!
//! Couplings stay `ndarray`-facing: this module wraps a small burn MLP behind the [`Subnet`]
//! trait and converts at the boundary, so burn tensor types never leak into the coupling API.
//! Training the weights (autodiff + optimizer) is left to the caller through [`BurnMlpSubnet::model`].

use burn_core as burn;

use burn::module::Module;
use burn::tensor::activation::gelu;
use burn::tensor::backend::Backend;
use burn::tensor::{Tensor, TensorData};
use burn_autodiff::Autodiff;
use burn_ndarray::NdArray;
use burn_nn::{Linear, LinearConfig};
use ndarray::{Array2, ArrayView2};

use crate::subnet::Subnet;
use crate::{Error, Result};

/// Default burn backend for this module: ndarray + autodiff.
pub type BurnBackend = Autodiff<NdArray<f32>>;

/// `Linear -> GELU -> ... -> Linear`.
#[derive(Module, Debug)]
pub struct BurnMlp<B: Backend> {
    hidden: Vec<Linear<B>>,
    head: Linear<B>,
}

impl<B: Backend> BurnMlp<B> {
    pub fn new(device: &B::Device, dims_in: usize, dims_out: usize, hidden: usize, depth: usize) -> Self {
        let mut layers = Vec::with_capacity(depth);
        let mut width = dims_in;
        for _ in 0..depth {
            layers.push(LinearConfig::new(width, hidden).init(device));
            width = hidden;
        }
        let head = LinearConfig::new(width, dims_out).init(device);
        Self {
            hidden: layers,
            head,
        }
    }

    /// `[batch, dims_in] -> [batch, dims_out]`.
    pub fn forward(&self, x: Tensor<B, 2>) -> Tensor<B, 2> {
        let mut h = x;
        for layer in &self.hidden {
            h = gelu(layer.forward(h));
        }
        self.head.forward(h)
    }
}

/// [`Subnet`] adapter over a [`BurnMlp`].
#[derive(Debug)]
pub struct BurnMlpSubnet<B: Backend> {
    model: BurnMlp<B>,
    device: B::Device,
    dims_in: usize,
    dims_out: usize,
}

impl<B: Backend> BurnMlpSubnet<B> {
    pub fn new(
        device: &B::Device,
        dims_in: usize,
        dims_out: usize,
        hidden: usize,
        depth: usize,
    ) -> Result<Self> {
        if dims_in == 0 || dims_out == 0 || hidden == 0 || depth == 0 {
            return Err(Error::Domain("burn mlp dimensions must be >= 1"));
        }
        Ok(Self {
            model: BurnMlp::new(device, dims_in, dims_out, hidden, depth),
            device: device.clone(),
            dims_in,
            dims_out,
        })
    }

    pub fn model(&self) -> &BurnMlp<B> {
        &self.model
    }

    /// Swap in updated weights (e.g. after an optimizer step).
    pub fn set_model(&mut self, model: BurnMlp<B>) {
        self.model = model;
    }
}

impl<B: Backend> Subnet for BurnMlpSubnet<B> {
    fn dims_in(&self) -> usize {
        self.dims_in
    }

    fn dims_out(&self) -> usize {
        self.dims_out
    }

    fn forward(&self, condition: &ArrayView2<f32>) -> Result<Array2<f32>> {
        if condition.ncols() != self.dims_in {
            return Err(Error::Shape("subnet input width must equal dims_in"));
        }
        let n = condition.nrows();
        let data = TensorData::new(condition.iter().copied().collect::<Vec<f32>>(), [n, self.dims_in]);
        let x = Tensor::<B, 2>::from_data(data, &self.device);
        let y = self.model.forward(x);
        let flat = y
            .into_data()
            .convert::<f32>()
            .to_vec::<f32>()
            .map_err(|_| Error::Shape("failed to read burn tensor data"))?;
        Array2::from_shape_vec((n, self.dims_out), flat)
            .map_err(|_| Error::Shape("burn output has unexpected size"))
    }
}
