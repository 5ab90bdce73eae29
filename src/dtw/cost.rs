//! Cost-kernel: one vertical column-swath of cumulative DTW cost.
//!
//! The recurrence is evaluated column-major over `block_width` columns,
//! seeded by the prior swath's leading-edge cost column, mirroring the
//! device kernel's wavefront over the same swath. Ties break
//! Diagonal < Right < Up.

use super::{DtwError, DtwFlags, Step, StepMatrix};
use aligned_vec::{AVec, CACHELINE_ALIGN};

/// Compute cumulative costs for columns `[col_offset, col_offset+block_width)`
/// (clamped to the matrix width), over rows `[0, rows)`.
///
/// `prior` holds the cost column at `col_offset - 1` (ignored for the
/// leftmost swath); `leading_out` receives the cost column at the last
/// processed column. `true_height` is the full matrix height: when `rows`
/// is bounded below it (striped recompute), open-end rides stay disabled
/// because the real top row is not part of this pass.
///
/// When `steps` is given, every visited cell's move code is recorded at
/// column `j - base`.
pub(crate) fn swath(
    x: &[f64],
    y: &[f64],
    rows: usize,
    true_height: usize,
    col_offset: usize,
    block_width: usize,
    prior: &[f64],
    leading_out: &mut [f64],
    mut steps: Option<(&mut StepMatrix, usize)>,
    flags: DtwFlags,
) {
    debug_assert!(rows >= 1 && rows <= true_height && true_height <= y.len());
    debug_assert!(col_offset < x.len());
    debug_assert!(col_offset == 0 || prior.len() >= rows);

    let swath_end = (col_offset + block_width).min(x.len());
    let mut prev: AVec<f64> = AVec::with_capacity(CACHELINE_ALIGN, rows);
    if col_offset == 0 {
        prev.resize(rows, 0.0);
    } else {
        prev.extend_from_slice(&prior[..rows]);
    }
    let mut cur: AVec<f64> = AVec::with_capacity(CACHELINE_ALIGN, rows);
    cur.resize(rows, 0.0);

    for j in col_offset..swath_end {
        for h in 0..rows {
            let d = x[j] - y[h];
            let local = d * d;
            let (cost, step) = if h == 0 {
                if j == 0 {
                    (local, Step::Nil)
                } else if flags.open_start {
                    (local, Step::NilOpenRight)
                } else {
                    let mut cost = prev[0] + local;
                    let mut step = Step::Right;
                    if flags.open_end && true_height == 1 && prev[0] < cost {
                        cost = prev[0];
                        step = Step::OpenRight;
                    }
                    (cost, step)
                }
            } else if j == 0 {
                (cur[h - 1] + local, Step::Up)
            } else {
                let diag = prev[h - 1];
                let right = prev[h];
                let up = cur[h - 1];
                let mut best = diag;
                let mut step = Step::Diagonal;
                if right < best {
                    best = right;
                    step = Step::Right;
                }
                if up < best {
                    best = up;
                    step = Step::Up;
                }
                let mut cost = local + best;
                if flags.open_end && h == true_height - 1 && right < cost {
                    cost = right;
                    step = Step::OpenRight;
                }
                (cost, step)
            };
            cur[h] = cost;
            if let Some((matrix, base)) = steps.as_mut() {
                matrix.set(j - *base, h, step);
            }
        }
        std::mem::swap(&mut prev, &mut cur);
    }
    leading_out[..rows].copy_from_slice(&prev[..rows]);
}

fn validate(x: &[f64], y: &[f64], block_width: usize) -> Result<(), DtwError> {
    if x.is_empty() || y.is_empty() {
        return Err(DtwError::EmptySequence {
            x_len: x.len(),
            y_len: y.len(),
        });
    }
    if block_width == 0 {
        return Err(DtwError::ZeroBlockWidth);
    }
    Ok(())
}

/// Squared DTW cost of aligning `x` (width axis) against `y` (height axis),
/// pipelined swath by swath without a step matrix.
pub fn dtw_cost(x: &[f64], y: &[f64], flags: DtwFlags, block_width: usize) -> Result<f64, DtwError> {
    validate(x, y, block_width)?;
    let rows = y.len();
    let mut prior = vec![0.0f64; rows];
    let mut leading = vec![0.0f64; rows];
    let mut offset = 0;
    while offset < x.len() {
        swath(x, y, rows, rows, offset, block_width, &prior, &mut leading, None, flags);
        prior.copy_from_slice(&leading);
        offset += block_width;
    }
    Ok(leading[rows - 1])
}

/// Full-matrix cost pass recording every step; returns nothing — the
/// caller owns the matrix and backtraces it.
pub(crate) fn full_cost_with_steps(
    x: &[f64],
    y: &[f64],
    flags: DtwFlags,
    block_width: usize,
    matrix: &mut StepMatrix,
) {
    let rows = y.len();
    let mut prior = vec![0.0f64; rows];
    let mut leading = vec![0.0f64; rows];
    let mut offset = 0;
    while offset < x.len() {
        swath(
            x,
            y,
            rows,
            rows,
            offset,
            block_width,
            &prior,
            &mut leading,
            Some((&mut *matrix, 0)),
            flags,
        );
        prior.copy_from_slice(&leading);
        offset += block_width;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dtw::DEFAULT_BLOCK_WIDTH;

    #[test]
    fn identical_sequences_cost_zero() -> Result<(), DtwError> {
        let s = [1.0, 2.0, 3.0, 4.0];
        let cost = dtw_cost(&s, &s, DtwFlags::default(), DEFAULT_BLOCK_WIDTH)?;
        assert_eq!(cost, 0.0);
        Ok(())
    }

    #[test]
    fn warped_repeat_costs_zero() -> Result<(), DtwError> {
        let x = [1.0, 1.0, 2.0, 3.0, 3.0, 4.0];
        let y = [1.0, 2.0, 3.0, 4.0];
        assert_eq!(dtw_cost(&x, &y, DtwFlags::default(), DEFAULT_BLOCK_WIDTH)?, 0.0);
        assert_eq!(dtw_cost(&y, &x, DtwFlags::default(), DEFAULT_BLOCK_WIDTH)?, 0.0);
        Ok(())
    }

    #[test]
    fn single_row_is_a_prefix_sum() -> Result<(), DtwError> {
        let x = [1.0, 3.0, 2.0];
        let y = [1.0];
        // (1-1)^2 + (3-1)^2 + (2-1)^2
        assert_eq!(dtw_cost(&x, &y, DtwFlags::default(), DEFAULT_BLOCK_WIDTH)?, 5.0);
        Ok(())
    }

    #[test]
    fn known_small_matrix() -> Result<(), DtwError> {
        let x = [0.0, 1.0];
        let y = [0.0, 2.0];
        // (0,0)=0; (1,0)=1; (0,1)=4; (1,1)=(1-2)^2+min(0,1,4)=1
        assert_eq!(dtw_cost(&x, &y, DtwFlags::default(), DEFAULT_BLOCK_WIDTH)?, 1.0);
        Ok(())
    }

    #[test]
    fn open_end_ignores_extra_tail() -> Result<(), DtwError> {
        let x = [1.0, 2.0, 9.0, 9.0];
        let y = [1.0, 2.0];
        let open = DtwFlags {
            open_start: false,
            open_end: true,
        };
        assert_eq!(dtw_cost(&x, &y, open, DEFAULT_BLOCK_WIDTH)?, 0.0);
        // Without the open end, the tail must be paid for.
        assert!(dtw_cost(&x, &y, DtwFlags::default(), DEFAULT_BLOCK_WIDTH)? > 0.0);
        Ok(())
    }

    #[test]
    fn open_start_frees_the_row_zero_prefix() -> Result<(), DtwError> {
        let x = [9.0, 9.0, 1.0, 2.0];
        let y = [1.0, 2.0];
        let open = DtwFlags {
            open_start: true,
            open_end: false,
        };
        assert_eq!(dtw_cost(&x, &y, open, DEFAULT_BLOCK_WIDTH)?, 0.0);
        assert!(dtw_cost(&x, &y, DtwFlags::default(), DEFAULT_BLOCK_WIDTH)? > 0.0);
        Ok(())
    }

    #[test]
    fn swath_width_does_not_change_costs() -> Result<(), DtwError> {
        let x: Vec<f64> = (0..37).map(|i| ((i as f64) * 0.31).sin()).collect();
        let y: Vec<f64> = (0..23).map(|i| ((i as f64) * 0.29).cos()).collect();
        for flags in [
            DtwFlags::default(),
            DtwFlags {
                open_start: true,
                open_end: true,
            },
        ] {
            let wide = dtw_cost(&x, &y, flags, DEFAULT_BLOCK_WIDTH)?;
            for bw in [1usize, 2, 3, 5, 8, 16] {
                assert_eq!(dtw_cost(&x, &y, flags, bw)?, wide, "block width {}", bw);
            }
        }
        Ok(())
    }

    #[test]
    fn rejects_empty_inputs() {
        assert!(dtw_cost(&[], &[1.0], DtwFlags::default(), 4).is_err());
        assert!(dtw_cost(&[1.0], &[1.0], DtwFlags::default(), 0).is_err());
    }
}
