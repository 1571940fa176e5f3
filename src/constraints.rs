//! Linear programs for maxmin strategies and correlated equilibria.

use crate::error::GameError;
use crate::payoff::{Payoff, PayoffMatrix};
use crate::solver::{LpProblem, LpSolver, SolverConfig};
use serde::{Deserialize, Serialize};

/// Mixed strategy guaranteeing `value` whatever the opponent plays.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaxminSolution {
    pub value: f64,
    pub strategy: Vec<f64>,
}

/// Joint probability distribution over the cells of a payoff matrix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JointDistribution {
    n_rows: usize,
    n_cols: usize,
    probs: Vec<f64>,
}

impl JointDistribution {
    /// Probability that the correlating device recommends `(row, col)`.
    pub fn get(&self, row: usize, col: usize) -> f64 {
        self.probs[row * self.n_cols + col]
    }

    /// Cell probabilities in row-major order.
    pub fn probs(&self) -> &[f64] {
        &self.probs
    }

    /// Expected payoff pair when both players follow the recommendations.
    pub fn expected_payoff(&self, mat: &PayoffMatrix) -> Payoff {
        mat.iter().fold(Payoff::default(), |acc, (row, col, payoff)| {
            acc + payoff.scaled(self.get(row, col))
        })
    }

    /// Cells recommended with probability above `tol`, in row-major order.
    pub fn support(&self, tol: f64) -> Vec<(usize, usize)> {
        self.probs
            .iter()
            .enumerate()
            .filter(|&(_, &prob)| prob > tol)
            .map(|(idx, _)| (idx / self.n_cols, idx % self.n_cols))
            .collect()
    }
}

/// Build the maxmin program of the player choosing the rows of `a`.
///
/// Variables are `[v, p_1, .., p_n]`. The program maximizes `v` subject to
/// `v <= sum_i p_i a[i][j]` for every column `j`, `p >= 0` and `sum p = 1`.
pub fn maxmin_problem(a: &[Vec<f64>]) -> Result<LpProblem, GameError> {
    let n_rows = a.len();
    let n_cols = a.first().map_or(0, Vec::len);
    if n_rows == 0 || n_cols == 0 || a.iter().any(|row| row.len() != n_cols) {
        return Err(GameError::ShapeMismatch(
            "maxmin payoff grid must be non-empty and rectangular".to_string(),
        ));
    }
    let n_vars = n_rows + 1;

    let mut c = vec![0.0; n_vars];
    c[0] = -1.0;

    let mut g = Vec::with_capacity(n_cols + n_rows);
    for col in 0..n_cols {
        let mut row = Vec::with_capacity(n_vars);
        row.push(1.0);
        row.extend(a.iter().map(|a_row| -a_row[col]));
        g.push(row);
    }
    for i in 0..n_rows {
        let mut row = vec![0.0; n_vars];
        row[i + 1] = -1.0;
        g.push(row);
    }
    let h = vec![0.0; g.len()];

    let mut sum_row = vec![1.0; n_vars];
    sum_row[0] = 0.0;

    Ok(LpProblem {
        c,
        g,
        h,
        a: vec![sum_row],
        b: vec![1.0],
    })
}

/// Solve the maxmin program of the row player of `a`.
pub fn solve_maxmin<S: LpSolver + ?Sized>(
    a: &[Vec<f64>],
    solver: &S,
    cfg: &SolverConfig,
) -> Result<MaxminSolution, GameError> {
    let problem = maxmin_problem(a)?;
    let sol = solver.solve(&problem, cfg)?;
    log::debug!(
        "maxmin solved in {} pivots, objective {}",
        sol.iterations,
        sol.objective
    );
    Ok(MaxminSolution {
        value: sol.x[0],
        strategy: sol.x[1..].iter().map(|&prob| prob.max(0.0)).collect(),
    })
}

/// Incentive constraints of a correlated equilibrium, one row per ordered
/// pair of distinct actions of each player.
///
/// Row `(i, j)` of player 1 bounds the gain of playing `j` when `i` is
/// recommended; it only touches the cells of row `i`. Column constraints
/// are built the same way over the cells of column `i`.
pub fn build_ce_constraints(mat: &PayoffMatrix) -> Vec<Vec<f64>> {
    let (n_rows, n_cols) = mat.dim();
    let n_cells = n_rows * n_cols;
    let mut g = Vec::with_capacity(n_rows * (n_rows - 1) + n_cols * (n_cols - 1));

    for i in 0..n_rows {
        for j in (0..n_rows).filter(|&j| j != i) {
            let mut row = vec![0.0; n_cells];
            for k in 0..n_cols {
                row[i * n_cols + k] = -mat.get(i, k).p1 + mat.get(j, k).p1;
            }
            g.push(row);
        }
    }

    for i in 0..n_cols {
        for j in (0..n_cols).filter(|&j| j != i) {
            let mut row = vec![0.0; n_cells];
            for k in 0..n_rows {
                row[k * n_cols + i] = -mat.get(k, i).p2 + mat.get(k, j).p2;
            }
            g.push(row);
        }
    }

    g
}

/// Build the program of the welfare-maximizing correlated equilibrium.
pub fn correlated_problem(mat: &PayoffMatrix) -> LpProblem {
    let n_cells = mat.cells().len();

    let c = mat.cells().iter().map(|payoff| -payoff.sum()).collect();

    let mut g = build_ce_constraints(mat);
    for idx in 0..n_cells {
        let mut row = vec![0.0; n_cells];
        row[idx] = -1.0;
        g.push(row);
    }
    let h = vec![0.0; g.len()];

    LpProblem {
        c,
        g,
        h,
        a: vec![vec![1.0; n_cells]],
        b: vec![1.0],
    }
}

/// Solve for the correlated equilibrium maximizing the sum of payoffs.
pub fn solve_correlated<S: LpSolver + ?Sized>(
    mat: &PayoffMatrix,
    solver: &S,
    cfg: &SolverConfig,
) -> Result<JointDistribution, GameError> {
    let problem = correlated_problem(mat);
    let sol = solver.solve(&problem, cfg)?;
    log::debug!(
        "correlated equilibrium solved in {} pivots, welfare {}",
        sol.iterations,
        -sol.objective
    );
    let (n_rows, n_cols) = mat.dim();
    Ok(JointDistribution {
        n_rows,
        n_cols,
        probs: sol.x.iter().map(|&prob| prob.max(0.0)).collect(),
    })
}
