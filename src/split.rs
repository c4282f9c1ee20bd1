//! Split strategies: bijective partitions of the channel axis into two parts.
//!
//! Contract for every [`Split`]: `inverse(forward(x)) == x` **exactly** (no arithmetic, only
//! copies), and both parts are non-empty.

use crate::{Error, Result};
use ndarray::{concatenate, s, Array2, ArrayView2, Axis};

pub trait Split {
    /// Widths `(a, b)` of the two parts for an input with `channels` channels.
    fn widths(&self, channels: usize) -> Result<(usize, usize)>;

    /// Partition `x` (`(batch, channels)`) into two parts.
    fn forward(&self, x: &ArrayView2<f32>) -> Result<(Array2<f32>, Array2<f32>)>;

    /// Recombine two parts into the original layout.
    fn inverse(&self, a: &ArrayView2<f32>, b: &ArrayView2<f32>) -> Result<Array2<f32>>;
}

fn check_parts(a: &ArrayView2<f32>, b: &ArrayView2<f32>) -> Result<()> {
    if a.nrows() != b.nrows() {
        return Err(Error::Shape("split parts must have the same batch size"));
    }
    if a.ncols() == 0 || b.ncols() == 0 {
        return Err(Error::Shape("split parts must be non-empty"));
    }
    Ok(())
}

/// Contiguous split at a fixed channel index: `[0, index)` and `[index, channels)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SplitAt {
    pub index: usize,
}

impl SplitAt {
    pub fn new(index: usize) -> Self {
        Self { index }
    }
}

impl Split for SplitAt {
    fn widths(&self, channels: usize) -> Result<(usize, usize)> {
        if self.index == 0 || self.index >= channels {
            return Err(Error::Domain("split index must satisfy 0 < index < channels"));
        }
        Ok((self.index, channels - self.index))
    }

    fn forward(&self, x: &ArrayView2<f32>) -> Result<(Array2<f32>, Array2<f32>)> {
        let (wa, _wb) = self.widths(x.ncols())?;
        Ok((
            x.slice(s![.., ..wa]).to_owned(),
            x.slice(s![.., wa..]).to_owned(),
        ))
    }

    fn inverse(&self, a: &ArrayView2<f32>, b: &ArrayView2<f32>) -> Result<Array2<f32>> {
        check_parts(a, b)?;
        if a.ncols() != self.index {
            return Err(Error::Shape("first part width must equal the split index"));
        }
        concatenate(Axis(1), &[a.view(), b.view()])
            .map_err(|_| Error::Shape("failed to concatenate split parts"))
    }
}

/// Halves the channel axis: the first part gets `channels / 2`, the second the rest.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EvenSplit;

impl Split for EvenSplit {
    fn widths(&self, channels: usize) -> Result<(usize, usize)> {
        if channels < 2 {
            return Err(Error::Domain("even split needs at least 2 channels"));
        }
        Ok((channels / 2, channels - channels / 2))
    }

    fn forward(&self, x: &ArrayView2<f32>) -> Result<(Array2<f32>, Array2<f32>)> {
        let (wa, _) = self.widths(x.ncols())?;
        SplitAt::new(wa).forward(x)
    }

    fn inverse(&self, a: &ArrayView2<f32>, b: &ArrayView2<f32>) -> Result<Array2<f32>> {
        check_parts(a, b)?;
        let channels = a.ncols() + b.ncols();
        let (wa, _) = self.widths(channels)?;
        SplitAt::new(wa).inverse(a, b)
    }
}

/// Checkerboard split on the channel axis: even channels go to the first part, odd channels to
/// the second.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Interleaved;

impl Split for Interleaved {
    fn widths(&self, channels: usize) -> Result<(usize, usize)> {
        if channels < 2 {
            return Err(Error::Domain("interleaved split needs at least 2 channels"));
        }
        Ok((channels.div_ceil(2), channels / 2))
    }

    fn forward(&self, x: &ArrayView2<f32>) -> Result<(Array2<f32>, Array2<f32>)> {
        self.widths(x.ncols())?;
        Ok((
            x.slice(s![.., 0..;2]).to_owned(),
            x.slice(s![.., 1..;2]).to_owned(),
        ))
    }

    fn inverse(&self, a: &ArrayView2<f32>, b: &ArrayView2<f32>) -> Result<Array2<f32>> {
        check_parts(a, b)?;
        let channels = a.ncols() + b.ncols();
        let (wa, wb) = self.widths(channels)?;
        if a.ncols() != wa || b.ncols() != wb {
            return Err(Error::Shape("interleaved parts have inconsistent widths"));
        }
        let mut x = Array2::<f32>::zeros((a.nrows(), channels));
        x.slice_mut(s![.., 0..;2]).assign(a);
        x.slice_mut(s![.., 1..;2]).assign(b);
        Ok(x)
    }
}
