//! DBA update: align every cluster member to the current centroid and
//! rebuild the centroid from the aligned values.
//!
//! Member alignments fan out across rayon workers; each produces its own
//! path, and partial accumulators are folded in member order so the refined
//! centroid is deterministic. When a member is strictly longer than the
//! centroid and open-end is on, the sequence order is flipped so the
//! centroid sits on the Y axis with the member's surplus tail riding
//! open-right, instead of degenerating into an all-up-then-all-right path.

use crate::dtw::accumulate::CentroidAccumulator;
use crate::dtw::striped::{align_with_path, choose_path_mode};
use crate::dtw::{DtwError, DtwFlags, PathCell, DEFAULT_BLOCK_WIDTH};
use crate::utilities::helpers::ProgressMeter;
use rayon::prelude::*;
use thiserror::Error;

/// Default cap on refinement rounds per cluster.
pub const ROUND_LIMIT: usize = 250;

#[derive(Debug, Error)]
pub enum AverageError {
    #[error("DBA update has no member sequences to average")]
    NoMembers,
    #[error("DBA update failed aligning member {member}: {source}")]
    Alignment {
        member: usize,
        #[source]
        source: DtwError,
    },
}

#[derive(Copy, Clone, Debug)]
pub struct AverageParams {
    pub flags: DtwFlags,
    pub block_width: usize,
    /// Memory budget steering the full/striped path decision; `None` means
    /// unconstrained.
    pub mem_limit: Option<usize>,
    pub max_rounds: usize,
}

impl Default for AverageParams {
    fn default() -> Self {
        AverageParams {
            flags: DtwFlags::default(),
            block_width: DEFAULT_BLOCK_WIDTH,
            mem_limit: None,
            max_rounds: ROUND_LIMIT,
        }
    }
}

/// One member's alignment against the centroid, as produced by a round.
#[derive(Debug, Clone)]
pub struct MemberAlignment {
    /// Index into the member slice passed to `dba_update`.
    pub member: usize,
    /// True when the centroid sat on the Y axis for this alignment.
    pub flip: bool,
    /// Terminal-to-anchor alignment cells.
    pub cells: Vec<PathCell>,
}

/// Run one DBA refinement round. Returns the refined centroid, the delta
/// (max single-point movement) and the per-member alignments for path
/// persistence.
pub fn dba_update(
    centroid: &[f64],
    members: &[&[f64]],
    params: &AverageParams,
    progress: Option<&ProgressMeter>,
) -> Result<(Vec<f64>, f64, Vec<MemberAlignment>), AverageError> {
    if members.is_empty() {
        return Err(AverageError::NoMembers);
    }

    let alignments: Vec<MemberAlignment> = members
        .par_iter()
        .enumerate()
        .map(|(member, seq)| {
            let flip = params.flags.open_end && seq.len() > centroid.len();
            let (x, y): (&[f64], &[f64]) = if flip { (seq, centroid) } else { (centroid, seq) };
            let mode = choose_path_mode(x.len(), y.len(), params.mem_limit);
            let cells = align_with_path(x, y, params.flags, params.block_width, mode)
                .map_err(|source| AverageError::Alignment { member, source })?;
            if let Some(meter) = progress {
                meter.tick();
            }
            Ok(MemberAlignment {
                member,
                flip,
                cells,
            })
        })
        .collect::<Result<_, AverageError>>()?;

    let mut acc = CentroidAccumulator::new(centroid.len());
    for alignment in &alignments {
        acc.absorb_path(&alignment.cells, members[alignment.member], alignment.flip);
    }
    let refined = acc.refined(centroid);

    let delta = centroid
        .iter()
        .zip(&refined)
        .map(|(old, new)| (old - new).abs())
        .fold(0.0, f64::max);

    Ok((refined, delta, alignments))
}

/// Bitwise centroid equality, the flip-flop guard's comparison: open-end
/// refinement can oscillate between two alternates forever, and only exact
/// recurrence counts as a flip-flop.
pub fn bits_equal(a: &[f64], b: &[f64]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.to_bits() == y.to_bits())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_members_converge_immediately() -> Result<(), AverageError> {
        let seq = vec![1.0; 10];
        let members: Vec<&[f64]> = vec![&seq, &seq];
        let (refined, delta, alignments) = dba_update(&seq, &members, &AverageParams::default(), None)?;
        assert_eq!(refined, seq);
        assert_eq!(delta, 0.0);
        assert_eq!(alignments.len(), 2);
        Ok(())
    }

    #[test]
    fn warped_pair_keeps_the_medoid_fixed() -> Result<(), AverageError> {
        // Both members align losslessly onto the longer medoid, so the
        // first refinement round reproduces it exactly.
        let short = vec![1.0, 2.0, 3.0, 4.0];
        let long = vec![1.0, 1.0, 2.0, 3.0, 3.0, 4.0];
        let members: Vec<&[f64]> = vec![&short, &long];
        let (refined, delta, _) = dba_update(&long, &members, &AverageParams::default(), None)?;
        assert_eq!(refined, long);
        assert_eq!(delta, 0.0);
        Ok(())
    }

    #[test]
    fn longer_member_flips_and_tail_is_suppressed() -> Result<(), AverageError> {
        let centroid = vec![1.0, 2.0, 3.0];
        let member = vec![1.0, 2.0, 3.0, 9.0, 9.0];
        let members: Vec<&[f64]> = vec![&member];
        let params = AverageParams {
            flags: DtwFlags {
                open_start: false,
                open_end: true,
            },
            ..AverageParams::default()
        };
        let (refined, delta, alignments) = dba_update(&centroid, &members, &params, None)?;
        assert!(alignments[0].flip);
        // The 9.0 tail rides open-right and contributes nothing.
        assert_eq!(refined, centroid);
        assert_eq!(delta, 0.0);
        Ok(())
    }

    #[test]
    fn refined_centroid_averages_aligned_values() -> Result<(), AverageError> {
        let centroid = vec![0.0, 10.0];
        let a = vec![0.0, 8.0];
        let b = vec![0.0, 12.0];
        let members: Vec<&[f64]> = vec![&a, &b];
        let (refined, delta, _) = dba_update(&centroid, &members, &AverageParams::default(), None)?;
        assert_eq!(refined, vec![0.0, 10.0]);
        assert_eq!(delta, 0.0);
        // Biased members move the centroid.
        let c = vec![0.0, 8.0];
        let members: Vec<&[f64]> = vec![&a, &c];
        let (refined, delta, _) = dba_update(&centroid, &members, &AverageParams::default(), None)?;
        assert_eq!(refined, vec![0.0, 8.0]);
        assert_eq!(delta, 2.0);
        Ok(())
    }

    #[test]
    fn striped_budget_produces_identical_updates() -> Result<(), AverageError> {
        let centroid: Vec<f64> = (0..40).map(|i| ((i as f64) * 0.2).sin()).collect();
        let m1: Vec<f64> = (0..55).map(|i| ((i as f64) * 0.19).sin()).collect();
        let m2: Vec<f64> = (0..35).map(|i| ((i as f64) * 0.23).sin() + 0.1).collect();
        let members: Vec<&[f64]> = vec![&m1, &m2];
        let unconstrained = AverageParams {
            block_width: 8,
            ..AverageParams::default()
        };
        let tight = AverageParams {
            block_width: 8,
            mem_limit: Some(64), // far below any full step matrix
            ..AverageParams::default()
        };
        let (full, d_full, _) = dba_update(&centroid, &members, &unconstrained, None)?;
        let (striped, d_striped, _) = dba_update(&centroid, &members, &tight, None)?;
        assert!(bits_equal(&full, &striped));
        assert_eq!(d_full.to_bits(), d_striped.to_bits());
        Ok(())
    }

    #[test]
    fn bits_equal_distinguishes_near_values() {
        assert!(bits_equal(&[1.0, 2.0], &[1.0, 2.0]));
        assert!(!bits_equal(&[1.0], &[1.0 + f64::EPSILON]));
        assert!(!bits_equal(&[1.0], &[1.0, 2.0]));
    }
}
