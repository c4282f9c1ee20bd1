//! Parameter constraints.
//!
//! A subnetwork emits an unconstrained block of raw numbers; a [`Constraint`] maps that block to a
//! domain the transform can use:
//!
//! - [`Constraint::Real`]: identity.
//! - [`Constraint::Positive`]: elementwise `exp`, so every entry is `> 0`.
//! - [`Constraint::Increasing`]: a strictly increasing sequence along the channel axis.
//!
//! Public invariant: constraints do **not** clamp or mask. A non-finite input (or an `exp`
//! overflow) comes out non-finite; guarding against that is the caller's job.

use crate::{Error, Result};
use ndarray::{Array2, ArrayView2, Axis};

/// How an unconstrained parameter block is mapped into its domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Constraint {
    /// Unconstrained; the block is returned unchanged.
    Real,
    /// Strictly positive via `exp`.
    Positive,
    /// Strictly increasing along the channel axis.
    ///
    /// Column 0 is an unconstrained base `b`. For `k >= 1`:
    /// \[
    /// \mathrm{out}_k = b + \sum_{i=1}^{k} \exp(u_i).
    /// \]
    /// The output has the same width as the input, so a [`ParameterSpec`] with `count = n` yields `n`
    /// ordered values (e.g. `n` knot positions).
    ///
    /// The running sum is accumulated in `f64` and rounded to `f32` per element. Rounding is
    /// monotone, so the output is always non-decreasing; it is *strictly* increasing only while
    /// each increment `exp(u_k)` exceeds the `f32` spacing at the running value (about
    /// `|out| * 6e-8`). Past that, adjacent knots tie, e.g. a base of `1e8` absorbs increments
    /// below `8`.
    Increasing,
}

impl Constraint {
    /// Apply the constraint to a `(batch, width)` block.
    pub fn constrain(self, unconstrained: &ArrayView2<f32>) -> Result<Array2<f32>> {
        match self {
            Constraint::Real => Ok(unconstrained.to_owned()),
            Constraint::Positive => Ok(unconstrained.mapv(f32::exp)),
            Constraint::Increasing => increasing(unconstrained),
        }
    }

    /// Short lowercase name, used in logs and error messages.
    pub fn as_str(self) -> &'static str {
        match self {
            Constraint::Real => "real",
            Constraint::Positive => "positive",
            Constraint::Increasing => "increasing",
        }
    }
}

fn increasing(u: &ArrayView2<f32>) -> Result<Array2<f32>> {
    if u.ncols() == 0 {
        return Err(Error::Shape("increasing constraint needs at least one column"));
    }
    let mut out = Array2::<f32>::zeros(u.raw_dim());
    for (row_in, mut row_out) in u.axis_iter(Axis(0)).zip(out.axis_iter_mut(Axis(0))) {
        let mut acc = f64::from(row_in[0]);
        row_out[0] = row_in[0];
        for k in 1..row_in.len() {
            acc += f64::from(row_in[k]).exp();
            row_out[k] = acc as f32;
        }
    }
    Ok(out)
}

/// A named parameter a transform consumes from the raw subnetwork output.
///
/// `count` is the number of raw channels this parameter occupies. The constrained block has the
/// same width.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParameterSpec {
    pub name: &'static str,
    pub count: usize,
    pub constraint: Constraint,
}

impl ParameterSpec {
    pub fn new(name: &'static str, count: usize, constraint: Constraint) -> Self {
        Self {
            name,
            count,
            constraint,
        }
    }

    pub fn real(name: &'static str, count: usize) -> Self {
        Self::new(name, count, Constraint::Real)
    }

    pub fn positive(name: &'static str, count: usize) -> Self {
        Self::new(name, count, Constraint::Positive)
    }

    pub fn increasing(name: &'static str, count: usize) -> Self {
        Self::new(name, count, Constraint::Increasing)
    }

    /// Constrain a raw block belonging to this parameter.
    ///
    /// The block width must equal `self.count`.
    pub fn constrain(&self, unconstrained: &ArrayView2<f32>) -> Result<Array2<f32>> {
        if unconstrained.ncols() != self.count {
            return Err(Error::ParameterWidth {
                expected: self.count,
                got: unconstrained.ncols(),
            });
        }
        self.constraint.constrain(unconstrained)
    }
}

/// Check a declared parameter list: non-empty, unique names, every count `>= 1`.
pub fn validate_specs(specs: &[ParameterSpec]) -> Result<()> {
    if specs.is_empty() {
        return Err(Error::Domain("a transform must declare at least one parameter"));
    }
    for (i, spec) in specs.iter().enumerate() {
        if spec.name.is_empty() {
            return Err(Error::Domain("parameter names must be non-empty"));
        }
        if spec.count == 0 {
            return Err(Error::Domain("parameter counts must be >= 1"));
        }
        if specs[..i].iter().any(|other| other.name == spec.name) {
            return Err(Error::Domain("parameter names must be unique"));
        }
    }
    Ok(())
}

/// Total raw width a subnetwork must produce for `specs`.
pub fn total_width(specs: &[ParameterSpec]) -> usize {
    specs.iter().map(|s| s.count).sum()
}

/// Constrained parameter blocks in declared order, addressable by name or position.
#[derive(Debug, Clone, PartialEq)]
pub struct ConstrainedParameters {
    blocks: Vec<(&'static str, Array2<f32>)>,
}

impl ConstrainedParameters {
    pub fn new() -> Self {
        Self { blocks: Vec::new() }
    }

    pub fn with_capacity(n: usize) -> Self {
        Self {
            blocks: Vec::with_capacity(n),
        }
    }

    pub fn push(&mut self, name: &'static str, block: Array2<f32>) {
        self.blocks.push((name, block));
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Look up a block by its declared name.
    pub fn get(&self, name: &str) -> Result<ArrayView2<'_, f32>> {
        self.blocks
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, b)| b.view())
            .ok_or_else(|| Error::UnknownParameter(name.to_string()))
    }

    /// Block at declared position `index`.
    pub fn at(&self, index: usize) -> Result<ArrayView2<'_, f32>> {
        self.blocks
            .get(index)
            .map(|(_, b)| b.view())
            .ok_or(Error::Domain("parameter index out of range"))
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.blocks.iter().map(|(n, _)| *n)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'static str, ArrayView2<'_, f32>)> {
        self.blocks.iter().map(|(n, b)| (*n, b.view()))
    }
}

impl Default for ConstrainedParameters {
    fn default() -> Self {
        Self::new()
    }
}
