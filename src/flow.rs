//! Composing invertible layers into a flow.
//!
//! A single coupling only mixes information across its split; real flows interleave couplings
//! with channel permutations so every channel is eventually conditioned on every other one.
//! [`Sequential`] runs stages in order on the way forward and in reverse order on the way back,
//! summing per-row log-determinants.

use crate::coupling::{check_batch, Coupling};
use crate::split::Split;
use crate::subnet::Subnet;
use crate::transform::Transform;
use crate::{Error, Result};
use ndarray::{Array1, Array2, ArrayView2, Axis};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

/// A bijection on `(batch, channels)` arrays with a tractable log-determinant.
pub trait Invertible {
    fn forward(&self, x: &ArrayView2<f32>) -> Result<Array2<f32>>;

    fn inverse(&self, z: &ArrayView2<f32>) -> Result<Array2<f32>>;

    /// Forward pass plus per-row `log |det J|`.
    fn forward_with_log_det(&self, x: &ArrayView2<f32>) -> Result<(Array2<f32>, Array1<f32>)>;

    /// Inverse pass plus per-row `log |det J⁻¹|`.
    fn inverse_with_log_det(&self, z: &ArrayView2<f32>) -> Result<(Array2<f32>, Array1<f32>)>;
}

impl<S: Split, T: Transform, N: Subnet> Invertible for Coupling<S, T, N> {
    fn forward(&self, x: &ArrayView2<f32>) -> Result<Array2<f32>> {
        Coupling::forward(self, x)
    }

    fn inverse(&self, z: &ArrayView2<f32>) -> Result<Array2<f32>> {
        Coupling::inverse(self, z)
    }

    fn forward_with_log_det(&self, x: &ArrayView2<f32>) -> Result<(Array2<f32>, Array1<f32>)> {
        Coupling::forward_with_log_det(self, x)
    }

    fn inverse_with_log_det(&self, z: &ArrayView2<f32>) -> Result<(Array2<f32>, Array1<f32>)> {
        Coupling::inverse_with_log_det(self, z)
    }
}

/// Fixed channel permutation: `out[:, k] = x[:, perm[k]]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Permutation {
    perm: Vec<usize>,
    inv_perm: Vec<usize>,
}

impl Permutation {
    /// Build from explicit indices; `perm` must be a permutation of `0..perm.len()`.
    pub fn new(perm: Vec<usize>) -> Result<Self> {
        if perm.is_empty() {
            return Err(Error::Domain("permutation must be non-empty"));
        }
        let mut inv_perm = vec![usize::MAX; perm.len()];
        for (i, &p) in perm.iter().enumerate() {
            if p >= perm.len() || inv_perm[p] != usize::MAX {
                return Err(Error::Domain("indices are not a permutation"));
            }
            inv_perm[p] = i;
        }
        Ok(Self { perm, inv_perm })
    }

    /// Seeded uniform shuffle of `0..channels`.
    pub fn random(channels: usize, seed: u64) -> Result<Self> {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let mut perm: Vec<usize> = (0..channels).collect();
        perm.shuffle(&mut rng);
        Self::new(perm)
    }

    pub fn identity(channels: usize) -> Result<Self> {
        Self::new((0..channels).collect())
    }

    /// Reverses the channel order (the usual choice between two couplings).
    pub fn reverse(channels: usize) -> Result<Self> {
        Self::new((0..channels).rev().collect())
    }

    pub fn channels(&self) -> usize {
        self.perm.len()
    }

    pub fn indices(&self) -> &[usize] {
        &self.perm
    }

    fn apply(&self, x: &ArrayView2<f32>, idx: &[usize]) -> Result<Array2<f32>> {
        check_batch(x)?;
        if x.ncols() != idx.len() {
            return Err(Error::Shape("input width must equal permutation length"));
        }
        Ok(x.select(Axis(1), idx))
    }
}

impl Invertible for Permutation {
    fn forward(&self, x: &ArrayView2<f32>) -> Result<Array2<f32>> {
        self.apply(x, &self.perm)
    }

    fn inverse(&self, z: &ArrayView2<f32>) -> Result<Array2<f32>> {
        self.apply(z, &self.inv_perm)
    }

    fn forward_with_log_det(&self, x: &ArrayView2<f32>) -> Result<(Array2<f32>, Array1<f32>)> {
        Ok((self.forward(x)?, Array1::zeros(x.nrows())))
    }

    fn inverse_with_log_det(&self, z: &ArrayView2<f32>) -> Result<(Array2<f32>, Array1<f32>)> {
        Ok((self.inverse(z)?, Array1::zeros(z.nrows())))
    }
}

/// An ordered stack of invertible stages.
#[derive(Default)]
pub struct Sequential {
    stages: Vec<Box<dyn Invertible + Send + Sync>>,
}

impl Sequential {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push<L: Invertible + Send + Sync + 'static>(&mut self, stage: L) -> &mut Self {
        self.stages.push(Box::new(stage));
        self
    }

    pub fn with<L: Invertible + Send + Sync + 'static>(mut self, stage: L) -> Self {
        self.push(stage);
        self
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }
}

impl std::fmt::Debug for Sequential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sequential")
            .field("stages", &self.stages.len())
            .finish()
    }
}

impl Invertible for Sequential {
    fn forward(&self, x: &ArrayView2<f32>) -> Result<Array2<f32>> {
        check_batch(x)?;
        let mut h = x.to_owned();
        for stage in &self.stages {
            h = stage.forward(&h.view())?;
        }
        Ok(h)
    }

    fn inverse(&self, z: &ArrayView2<f32>) -> Result<Array2<f32>> {
        check_batch(z)?;
        let mut h = z.to_owned();
        for stage in self.stages.iter().rev() {
            h = stage.inverse(&h.view())?;
        }
        Ok(h)
    }

    fn forward_with_log_det(&self, x: &ArrayView2<f32>) -> Result<(Array2<f32>, Array1<f32>)> {
        check_batch(x)?;
        let mut h = x.to_owned();
        let mut log_det = Array1::<f32>::zeros(x.nrows());
        for stage in &self.stages {
            let (next, ld) = stage.forward_with_log_det(&h.view())?;
            log_det += &ld;
            h = next;
        }
        log::trace!("sequential forward: stages={} batch={}", self.stages.len(), x.nrows());
        Ok((h, log_det))
    }

    fn inverse_with_log_det(&self, z: &ArrayView2<f32>) -> Result<(Array2<f32>, Array1<f32>)> {
        check_batch(z)?;
        let mut h = z.to_owned();
        let mut log_det = Array1::<f32>::zeros(z.nrows());
        for stage in self.stages.iter().rev() {
            let (next, ld) = stage.inverse_with_log_det(&h.view())?;
            log_det += &ld;
            h = next;
        }
        log::trace!("sequential inverse: stages={} batch={}", self.stages.len(), z.nrows());
        Ok((h, log_det))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::affine::AffineTransform;
    use crate::split::{EvenSplit, Interleaved};
    use crate::subnet::{ConstantSubnet, LinearSubnet};
    use approx::assert_abs_diff_eq;
    use ndarray::array;
    use proptest::prelude::*;

    #[test]
    fn permutation_moves_columns() {
        let p = Permutation::new(vec![2, 0, 1]).unwrap();
        let x = array![[10.0f32, 20.0, 30.0], [1.0, 2.0, 3.0]];
        let y = p.forward(&x.view()).unwrap();
        assert_eq!(y, array![[30.0f32, 10.0, 20.0], [3.0, 1.0, 2.0]]);
        assert_eq!(p.inverse(&y.view()).unwrap(), x);
        let (_, ld) = p.forward_with_log_det(&x.view()).unwrap();
        assert_eq!(ld, Array1::<f32>::zeros(2));
    }

    #[test]
    fn invalid_permutations_are_rejected() {
        assert!(Permutation::new(vec![]).is_err());
        assert!(Permutation::new(vec![0, 0]).is_err());
        assert!(Permutation::new(vec![0, 2]).is_err());
        let p = Permutation::reverse(3).unwrap();
        let x = Array2::<f32>::zeros((1, 4));
        assert!(matches!(p.forward(&x.view()), Err(Error::Shape(_))));
    }

    #[test]
    fn random_permutation_is_seeded() {
        let a = Permutation::random(16, 3).unwrap();
        let b = Permutation::random(16, 3).unwrap();
        assert_eq!(a, b);
        let mut sorted = a.indices().to_vec();
        sorted.sort_unstable();
        assert_eq!(sorted, (0..16).collect::<Vec<_>>());
    }

    #[test]
    fn sequential_sums_log_dets_and_inverts() {
        let ln2 = 2.0f32.ln();
        let coupling = Coupling::new(
            EvenSplit,
            AffineTransform,
            ConstantSubnet::new(2, array![ln2, 0.5]),
        )
        .unwrap();
        let flow = Sequential::new()
            .with(coupling.clone())
            .with(Permutation::reverse(4).unwrap())
            .with(coupling);
        assert_eq!(flow.len(), 3);

        let x = array![[1.0f32, -1.0, 0.0, 2.0]];
        let (z, ld) = flow.forward_with_log_det(&x.view()).unwrap();
        // Two couplings, four channels scaled by 2 each.
        assert_abs_diff_eq!(ld[0], 8.0 * ln2, epsilon = 1e-5);

        let (x_back, ld_inv) = flow.inverse_with_log_det(&z.view()).unwrap();
        assert_abs_diff_eq!(ld_inv[0], -ld[0], epsilon = 1e-5);
        for (a, b) in x.iter().zip(x_back.iter()) {
            assert_abs_diff_eq!(*a, *b, epsilon = 1e-5);
        }
    }

    #[test]
    fn empty_batches_are_rejected_by_every_stage() {
        let x = Array2::<f32>::zeros((0, 4));
        let p = Permutation::reverse(4).unwrap();
        assert!(matches!(p.forward(&x.view()), Err(Error::Domain(_))));
        assert!(matches!(p.inverse_with_log_det(&x.view()), Err(Error::Domain(_))));

        let flow = Sequential::new();
        assert!(matches!(flow.forward(&x.view()), Err(Error::Domain(_))));
        assert!(matches!(flow.inverse_with_log_det(&x.view()), Err(Error::Domain(_))));
    }

    #[test]
    fn empty_sequential_is_identity() {
        let flow = Sequential::new();
        assert!(flow.is_empty());
        let x = array![[1.0f32, 2.0]];
        assert_eq!(flow.forward(&x.view()).unwrap(), x);
        assert_eq!(flow.inverse(&x.view()).unwrap(), x);
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 64,
            .. ProptestConfig::default()
        })]

        #[test]
        fn prop_linear_flow_roundtrip(
            seed in 0u64..1_000,
            vals in prop::collection::vec(-3.0f32..3.0, 18),
        ) {
            let x = Array2::from_shape_vec((3, 6), vals).unwrap();
            let mut flow = Sequential::new();
            for k in 0..3u64 {
                // Small weights keep every stage's scale near 1, so no stage collapses in f32.
                let mut net = LinearSubnet::seeded(3, 2, seed + k).unwrap();
                net.w.mapv_inplace(|w| 0.05 * w);
                if k % 2 == 0 {
                    flow.push(Coupling::new(EvenSplit, AffineTransform, net).unwrap());
                } else {
                    flow.push(Coupling::new(Interleaved, AffineTransform, net).unwrap());
                }
                flow.push(Permutation::random(6, seed ^ k).unwrap());
            }

            let (z, ld) = flow.forward_with_log_det(&x.view()).unwrap();
            let (x_back, ld_inv) = flow.inverse_with_log_det(&z.view()).unwrap();
            for (a, b) in x.iter().zip(x_back.iter()) {
                prop_assert!((a - b).abs() <= 1e-3 * (1.0 + a.abs()), "{a} vs {b}");
            }
            for (a, b) in ld.iter().zip(ld_inv.iter()) {
                prop_assert!((a + b).abs() <= 1e-3 * (1.0 + a.abs()));
            }
        }
    }
}
