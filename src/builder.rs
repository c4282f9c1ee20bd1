//! Explicit factories for couplings.
//!
//! [`build_coupling`] takes a split, a transform and a subnetwork constructor, works out the
//! subnetwork's `(dims_in, dims_out)` from the channel count and the transform's declared
//! parameters, and returns a ready [`Coupling`].

use crate::affine::AffineTransform;
use crate::constraint::{total_width, validate_specs};
use crate::coupling::Coupling;
use crate::split::{EvenSplit, Split};
use crate::subnet::{MlpSubnet, Subnet, SubnetConstructor};
use crate::transform::Transform;
use crate::{Error, Result};

/// Configuration for the stock couplings built by this module.
#[derive(Debug, Clone)]
pub struct CouplingConfig {
    /// Total channel count of the input (`>= 2`, even for [`EvenSplit`]).
    pub channels: usize,
    /// Hidden width of the MLP subnetwork.
    pub hidden: usize,
    /// Number of hidden layers in the MLP subnetwork.
    pub depth: usize,
    /// RNG seed for subnetwork initialization.
    pub seed: u64,
    /// Start the subnetwork head at zero (the affine coupling is then the identity).
    pub zero_init: bool,
}

impl Default for CouplingConfig {
    fn default() -> Self {
        Self {
            channels: 2,
            hidden: 32,
            depth: 2,
            seed: 123,
            zero_init: true,
        }
    }
}

impl CouplingConfig {
    pub fn new(channels: usize) -> Self {
        Self {
            channels,
            ..Default::default()
        }
    }

    pub fn with_hidden(mut self, hidden: usize) -> Self {
        self.hidden = hidden;
        self
    }

    pub fn with_depth(mut self, depth: usize) -> Self {
        self.depth = depth;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_zero_init(mut self, zero_init: bool) -> Self {
        self.zero_init = zero_init;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.channels < 2 {
            return Err(Error::Domain("channels must be >= 2"));
        }
        if self.hidden == 0 {
            return Err(Error::Domain("hidden must be >= 1"));
        }
        if self.depth == 0 {
            return Err(Error::Domain("depth must be >= 1"));
        }
        Ok(())
    }
}

/// Build a coupling for inputs with `channels` channels.
///
/// The single subnetwork conditions each half on the other, so the split must produce two halves
/// of equal width; the subnetwork is constructed with `dims_in = half width` and
/// `dims_out = sum of the transform's parameter counts`.
pub fn build_coupling<S, T, C>(
    split: S,
    transform: T,
    channels: usize,
    constructor: C,
) -> Result<Coupling<S, T, C::Output>>
where
    S: Split,
    T: Transform,
    C: SubnetConstructor,
{
    let (wa, wb) = split.widths(channels)?;
    if wa != wb {
        return Err(Error::Shape(
            "shared-subnet coupling needs two halves of equal width",
        ));
    }
    let specs = transform.parameter_specs();
    validate_specs(&specs)?;
    let dims_in = wa;
    let dims_out = total_width(&specs);

    let subnet = constructor.construct(dims_in, dims_out)?;
    if subnet.dims_in() != dims_in {
        return Err(Error::Shape("constructed subnet has the wrong input width"));
    }
    Coupling::new(split, transform, subnet)
}

/// Affine coupling over an even channel split with an MLP subnetwork.
pub fn affine_coupling(cfg: &CouplingConfig) -> Result<Coupling<EvenSplit, AffineTransform, MlpSubnet>> {
    cfg.validate()?;
    build_coupling(EvenSplit, AffineTransform, cfg.channels, |dims_in: usize, dims_out: usize| {
        MlpSubnet::new(
            dims_in,
            dims_out,
            cfg.hidden,
            cfg.depth,
            cfg.seed,
            cfg.zero_init,
        )
    })
}
