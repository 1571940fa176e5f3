//! Exhaustive searches over the cells of a payoff matrix.

use crate::payoff::PayoffMatrix;
use serde::{Deserialize, Serialize};

/// Cells maximizing the sum of both payoffs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SocialOptimum {
    /// Maximal payoff sum.
    pub value: f64,
    /// All cells reaching `value`, in row-major order.
    pub cells: Vec<(usize, usize)>,
}

/// For each column, the rows maximizing player 1's payoff (ties kept).
pub fn row_best_responses(mat: &PayoffMatrix) -> Vec<Vec<usize>> {
    (0..mat.n_cols())
        .map(|col| argmax_all((0..mat.n_rows()).map(|row| mat.get(row, col).p1)))
        .collect()
}

/// For each row, the columns maximizing player 2's payoff (ties kept).
pub fn col_best_responses(mat: &PayoffMatrix) -> Vec<Vec<usize>> {
    (0..mat.n_rows())
        .map(|row| argmax_all((0..mat.n_cols()).map(|col| mat.get(row, col).p2)))
        .collect()
}

/// Find every pure-strategy Nash equilibrium.
///
/// A cell is an equilibrium when its row is a best response of player 1 to
/// its column and its column a best response of player 2 to its row.
/// Cells are returned in row-major order; the result may be empty.
pub fn find_pure_nash(mat: &PayoffMatrix) -> Vec<(usize, usize)> {
    let br_rows = row_best_responses(mat);
    let br_cols = col_best_responses(mat);

    mat.iter()
        .map(|(row, col, _)| (row, col))
        .filter(|&(row, col)| br_rows[col].contains(&row) && br_cols[row].contains(&col))
        .collect()
}

/// Find the cells maximizing the unweighted payoff sum.
pub fn find_social_optimum(mat: &PayoffMatrix) -> SocialOptimum {
    let mut value = f64::NEG_INFINITY;
    let mut cells = Vec::new();
    for (row, col, payoff) in mat.iter() {
        let sum = payoff.sum();
        if sum > value {
            value = sum;
            cells.clear();
            cells.push((row, col));
        } else if sum == value {
            cells.push((row, col));
        }
    }
    SocialOptimum { value, cells }
}

fn argmax_all<I: Iterator<Item = f64>>(vals: I) -> Vec<usize> {
    let mut max = f64::NEG_INFINITY;
    let mut idxs = Vec::new();
    for (idx, val) in vals.enumerate() {
        if val > max {
            max = val;
            idxs.clear();
            idxs.push(idx);
        } else if val == max {
            idxs.push(idx);
        }
    }
    idxs
}
