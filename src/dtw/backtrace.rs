//! Walk a step matrix from the terminal corner back to the anchor.
//!
//! Invariant violations do not return errors: a step matrix that walks
//! outside its contract is corrupt state, and the walk panics the same way
//! the device kernel asserts a trap.

use super::{PathCell, Step, StepMatrix, MOVE_COL, MOVE_ROW};

/// How a backtrace over one matrix (or one stripe of it) ended.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BacktraceExit {
    /// Reached a terminator cell; the alignment is complete.
    Anchored,
    /// Crossed the stripe's left edge; the walk resumes in the next stripe
    /// to the left, which only needs `next_rows` rows recomputed.
    LeftEdge { next_rows: usize },
}

/// Walk from `(start_col, start_row)` (local coordinates), appending cells
/// in terminal-to-anchor order with `col_base` added to emitted columns.
/// The anchor cell itself is emitted.
pub fn backtrace(
    matrix: &StepMatrix,
    start_col: usize,
    start_row: usize,
    col_base: usize,
    out: &mut Vec<PathCell>,
) -> BacktraceExit {
    let mut col = start_col as isize;
    let mut row = start_row as isize;
    let budget = matrix.cols() + matrix.rows() + 1;
    let mut taken = 0usize;

    loop {
        let byte = matrix.get(col as usize, row as usize);
        let step = match Step::from_byte(byte) {
            Some(step) => step,
            None => panic!(
                "DTW backtrace hit invalid move byte {} at row {} column {}",
                byte,
                row,
                col_base + col as usize
            ),
        };
        match step {
            Step::Nil => {
                if row != 0 || col_base + col as usize != 0 {
                    panic!(
                        "DTW backtrace anchored off the origin at row {} column {}",
                        row,
                        col_base + col as usize
                    );
                }
                out.push(PathCell {
                    row: 0,
                    col: 0,
                    step,
                });
                return BacktraceExit::Anchored;
            }
            Step::NilOpenRight => {
                if row != 0 {
                    panic!(
                        "DTW backtrace hit a free-start anchor off row 0 (row {} column {})",
                        row,
                        col_base + col as usize
                    );
                }
                out.push(PathCell {
                    row: 0,
                    col: col_base + col as usize,
                    step,
                });
                return BacktraceExit::Anchored;
            }
            _ => {
                out.push(PathCell {
                    row: row as usize,
                    col: col_base + col as usize,
                    step,
                });
                row += MOVE_ROW[step as usize];
                col += MOVE_COL[step as usize];
                if row < 0 {
                    panic!("DTW backtrace walked below row 0");
                }
                if col < 0 {
                    if col_base == 0 {
                        panic!("DTW backtrace crossed the left edge of the full matrix");
                    }
                    return BacktraceExit::LeftEdge {
                        next_rows: row as usize + 1,
                    };
                }
            }
        }
        taken += 1;
        if taken > budget {
            panic!(
                "DTW backtrace did not terminate within {} steps: step matrix is cyclic",
                budget
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matrix_from(rows: &[&[Step]]) -> StepMatrix {
        let height = rows.len();
        let width = rows[0].len();
        let mut m = StepMatrix::new(width, height);
        for (h, row) in rows.iter().enumerate() {
            for (j, &s) in row.iter().enumerate() {
                m.set(j, h, s);
            }
        }
        m
    }

    #[test]
    fn walks_a_diagonal_to_the_origin() {
        use Step::*;
        let m = matrix_from(&[&[Nil, Right], &[Up, Diagonal]]);
        let mut cells = Vec::new();
        let exit = backtrace(&m, 1, 1, 0, &mut cells);
        assert_eq!(exit, BacktraceExit::Anchored);
        let coords: Vec<(usize, usize)> = cells.iter().map(|c| (c.row, c.col)).collect();
        assert_eq!(coords, vec![(1, 1), (0, 0)]);
    }

    #[test]
    fn terminates_within_the_step_budget() {
        use Step::*;
        // Worst-case staircase: rights along the top then ups down column 0.
        let m = matrix_from(&[&[Nil, Right, Right], &[Up, Right, Right], &[Up, Right, Right]]);
        let mut cells = Vec::new();
        assert_eq!(backtrace(&m, 2, 2, 0, &mut cells), BacktraceExit::Anchored);
        assert!(cells.len() <= 3 + 3);
    }

    #[test]
    fn reports_a_left_edge_exit_for_stripes() {
        use Step::*;
        // Stripe with col_base > 0: every cell points left.
        let m = matrix_from(&[&[Right, Right], &[Diagonal, Right]]);
        let mut cells = Vec::new();
        let exit = backtrace(&m, 1, 1, 4, &mut cells);
        // (1,1) Right -> (1,0) Diagonal -> crosses the edge into row 0.
        assert_eq!(exit, BacktraceExit::LeftEdge { next_rows: 1 });
        assert_eq!(cells.len(), 2);
        assert_eq!((cells[0].row, cells[0].col), (1, 5));
        assert_eq!((cells[1].row, cells[1].col), (1, 4));
    }

    #[test]
    fn free_start_anchor_is_emitted() {
        use Step::*;
        let m = matrix_from(&[&[Nil, NilOpenRight, Right], &[Up, Up, Diagonal]]);
        let mut cells = Vec::new();
        let exit = backtrace(&m, 2, 1, 0, &mut cells);
        assert_eq!(exit, BacktraceExit::Anchored);
        assert_eq!(cells.last().map(|c| (c.row, c.col)), Some((0, 1)));
        assert_eq!(cells.last().map(|c| c.step), Some(NilOpenRight));
    }

    #[test]
    #[should_panic(expected = "invalid move byte")]
    fn panics_on_garbage_bytes() {
        let mut m = StepMatrix::new(2, 2);
        m.bytes[m.pitch + 1] = 9; // corrupt (1,1)
        let mut cells = Vec::new();
        backtrace(&m, 1, 1, 0, &mut cells);
    }

    #[test]
    #[should_panic(expected = "anchored off the origin")]
    fn panics_when_nil_is_off_origin() {
        use Step::*;
        let m = matrix_from(&[&[Nil, Nil], &[Up, Up]]);
        let mut cells = Vec::new();
        backtrace(&m, 1, 1, 0, &mut cells);
    }
}
