//! All-pairs DTW driver: N(N-1)/2 squared distances, packed upper triangle.
//!
//! Alignments are scheduled per anchor: one grid of partner alignments for
//! each anchor sequence, fanned out across rayon workers host-side (and
//! across devices round-robin on the CUDA engine). Only the leading-edge
//! cost columns live between swaths; no step matrices are produced here.

use crate::dtw::{cost, DtwError, DtwFlags};
use crate::utilities::helpers::ProgressMeter;
use rayon::prelude::*;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PairwiseError {
    #[error("All-pairs DTW needs at least two sequences, got {count}")]
    TooFewSequences { count: usize },
    #[error("All-pairs DTW failed on pair ({anchor}, {partner}): {source}")]
    Alignment {
        anchor: usize,
        partner: usize,
        #[source]
        source: DtwError,
    },
    #[cfg(feature = "cuda")]
    #[error("CUDA all-pairs DTW failed: {0}")]
    Cuda(String),
    #[error("The CUDA engine was requested but this build has no `cuda` feature or no device")]
    CudaUnavailable,
}

/// Upper-triangular matrix of squared DTW distances, stored as a flat
/// packed array of length N(N-1)/2 in row-major order.
#[derive(Debug, Clone)]
pub struct PairwiseDistances {
    n: usize,
    packed: Vec<f64>,
    max_distance: f64,
}

impl PairwiseDistances {
    pub fn from_packed(n: usize, packed: Vec<f64>) -> Self {
        debug_assert_eq!(packed.len(), n * (n - 1) / 2);
        let max_distance = packed.iter().cloned().fold(0.0, f64::max);
        PairwiseDistances {
            n,
            packed,
            max_distance,
        }
    }

    /// Flat index of the first element of row `i`.
    #[inline]
    pub fn row_start(&self, i: usize) -> usize {
        i * (2 * self.n - i - 1) / 2
    }

    /// D(i, j) with symmetry; the diagonal is zero.
    pub fn get(&self, i: usize, j: usize) -> f64 {
        if i == j {
            return 0.0;
        }
        let (lo, hi) = if i < j { (i, j) } else { (j, i) };
        self.packed[self.row_start(lo) + hi - lo - 1]
    }

    pub fn len(&self) -> usize {
        self.n
    }

    pub fn is_empty(&self) -> bool {
        self.n == 0
    }

    /// Largest stored distance (raw, before the 0 -> 1 remap the cluster
    /// normalisation applies).
    pub fn max_distance(&self) -> f64 {
        self.max_distance
    }

    pub fn packed(&self) -> &[f64] {
        &self.packed
    }
}

/// Compute all pairwise DTW^2 distances on the CPU engine. The anchor
/// sequence sits on the height axis, each partner on the width axis.
pub fn all_pairs(
    sequences: &[Vec<f64>],
    flags: DtwFlags,
    block_width: usize,
    progress: Option<&ProgressMeter>,
) -> Result<PairwiseDistances, PairwiseError> {
    let n = sequences.len();
    if n < 2 {
        return Err(PairwiseError::TooFewSequences { count: n });
    }

    let rows: Vec<Vec<f64>> = (0..n - 1)
        .into_par_iter()
        .map(|anchor| {
            let mut row = Vec::with_capacity(n - anchor - 1);
            for partner in anchor + 1..n {
                let d = cost::dtw_cost(&sequences[partner], &sequences[anchor], flags, block_width)
                    .map_err(|source| PairwiseError::Alignment {
                        anchor,
                        partner,
                        source,
                    })?;
                row.push(d);
            }
            if let Some(meter) = progress {
                meter.tick();
            }
            Ok(row)
        })
        .collect::<Result<_, PairwiseError>>()?;

    let mut packed = Vec::with_capacity(n * (n - 1) / 2);
    for row in rows {
        packed.extend(row);
    }
    Ok(PairwiseDistances::from_packed(n, packed))
}
