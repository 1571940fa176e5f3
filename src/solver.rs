//! Linear program solving capability.
//!
//! Problems are given in the form
//!
//! ```text
//! minimize    c'x
//! subject to  G x <= h
//!             A x  = b
//! ```
//!
//! with every component of `x` unrestricted in sign. Bounds on variables
//! must be written as rows of `G`.

use crate::error::GameError;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// Smallest tableau entry accepted as a pivot.
const PIV_TOL: f64 = 1e-9;
/// Reduced costs above `-DUAL_TOL` count as optimal.
const DUAL_TOL: f64 = 1e-9;
/// Amount a basic value may go negative during a ratio test step.
const FEAS_TOL: f64 = 1e-9;
/// Relative shift of every right-hand side against degenerate cycling.
const PERTURB: f64 = 1e-9;
/// Tableau entries below this magnitude are flushed to zero.
const DROP_TOL: f64 = 1e-12;
/// Relative constraint violation accepted in a returned solution.
const CHECK_TOL: f64 = 1e-6;

/// Linear program `min c'x  s.t.  Gx <= h, Ax = b`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct LpProblem {
    pub c: Vec<f64>,
    pub g: Vec<Vec<f64>>,
    pub h: Vec<f64>,
    pub a: Vec<Vec<f64>>,
    pub b: Vec<f64>,
}

impl LpProblem {
    pub fn n_vars(&self) -> usize {
        self.c.len()
    }

    fn validate(&self) -> Result<(), GameError> {
        let n_vars = self.n_vars();
        if n_vars == 0 {
            return Err(GameError::Solver("problem has no variables".to_string()));
        }
        if self.g.len() != self.h.len() {
            return Err(GameError::Solver(format!(
                "G has {} rows but h has {} entries",
                self.g.len(),
                self.h.len()
            )));
        }
        if self.a.len() != self.b.len() {
            return Err(GameError::Solver(format!(
                "A has {} rows but b has {} entries",
                self.a.len(),
                self.b.len()
            )));
        }
        if let Some(row) = self.g.iter().chain(&self.a).find(|row| row.len() != n_vars) {
            return Err(GameError::Solver(format!(
                "constraint row has {} coefficients, expected {n_vars}",
                row.len()
            )));
        }
        let all_finite = self
            .c
            .iter()
            .chain(&self.h)
            .chain(&self.b)
            .chain(self.g.iter().flatten())
            .chain(self.a.iter().flatten())
            .all(|val| val.is_finite());
        if !all_finite {
            return Err(GameError::Solver("problem data is not finite".to_string()));
        }
        Ok(())
    }

    /// Largest violation of `Gx <= h` or `Ax = b` at `x`.
    ///
    /// Each row's violation is relative to the magnitude of its terms, so
    /// rows with large coefficients are not penalized for rounding.
    pub fn max_violation(&self, x: &[f64]) -> f64 {
        let residual = |coefs: &[f64], rhs: f64| {
            let (lhs, size) = coefs
                .iter()
                .zip(x)
                .fold((0.0, 0.0), |(lhs, size), (coef, x_j)| {
                    (lhs + coef * x_j, size + (coef * x_j).abs())
                });
            (lhs - rhs, 1.0 + size + rhs.abs())
        };

        let ineq = self.g.iter().zip(&self.h).map(|(coefs, &rhs)| {
            let (diff, size) = residual(coefs, rhs);
            diff.max(0.0) / size
        });
        let eq = self.a.iter().zip(&self.b).map(|(coefs, &rhs)| {
            let (diff, size) = residual(coefs, rhs);
            diff.abs() / size
        });
        ineq.chain(eq).fold(0.0, f64::max)
    }
}

/// Optimal point of a linear program.
#[derive(Debug, Clone, PartialEq)]
pub struct LpSolution {
    pub x: Vec<f64>,
    pub objective: f64,
    pub iterations: usize,
}

/// Rule used to choose the entering column.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PivotRule {
    /// Lowest-index improving column.
    #[default]
    Bland,
    /// Most negative reduced cost. Usually fewer pivots.
    Dantzig,
}

/// Per-solve configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverConfig {
    /// Maximum number of pivots over both phases.
    pub max_iter: usize,
    /// Wall-clock limit in milliseconds.
    pub time_limit_ms: u64,
    /// Log every pivot at debug level.
    pub verbose: bool,
    pub pivot_rule: PivotRule,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            max_iter: 10_000,
            time_limit_ms: 1000,
            verbose: false,
            pivot_rule: PivotRule::Bland,
        }
    }
}

impl SolverConfig {
    pub fn time_limit(&self) -> Duration {
        Duration::from_millis(self.time_limit_ms)
    }
}

/// Anything able to solve an [`LpProblem`].
pub trait LpSolver {
    /// Solve `problem` within the limits of `cfg`.
    ///
    /// # Errors
    /// Returns [`GameError::Infeasible`], [`GameError::Unbounded`],
    /// [`GameError::SolverTimeout`] or [`GameError::Solver`].
    fn solve(&self, problem: &LpProblem, cfg: &SolverConfig) -> Result<LpSolution, GameError>;
}

/// Dense two-phase tableau simplex.
///
/// Rows `-x_j <= 0` are turned into sign restrictions on `x_j`. Every other
/// variable is split into positive and negative parts. Rows are scaled to a
/// unit largest coefficient, inequality rows get a slack column, and rows
/// without a feasible slack start on an artificial column. Right-hand sides
/// are perturbed while pivoting; the reported point is read from an
/// unperturbed copy and checked against the problem before it is returned.
#[derive(Debug, Clone, Copy, Default)]
pub struct Simplex;

impl LpSolver for Simplex {
    fn solve(&self, problem: &LpProblem, cfg: &SolverConfig) -> Result<LpSolution, GameError> {
        problem.validate()?;

        let mut tab = Tableau::new(problem);
        let (n_cols, art_start) = (tab.n_cols, tab.art_start);
        let mut run = Run {
            cfg,
            start: Instant::now(),
            iterations: 0,
        };

        // Phase 1: drive artificial columns to zero.
        if art_start < n_cols {
            let mut cost = vec![0.0; n_cols];
            cost[art_start..].iter_mut().for_each(|ele| *ele = 1.0);
            run.optimize(&mut tab, &cost, n_cols)?;
            if tab.objective(&cost) > CHECK_TOL * tab.rhs_scale() {
                return Err(GameError::Infeasible);
            }
            tab.evict_artificials();
        }

        // Phase 2: problem objective over the structural and slack columns.
        let mut cost = vec![0.0; n_cols];
        for (j, &c_j) in problem.c.iter().enumerate() {
            cost[j] = c_j;
            if let Some(neg) = tab.neg_cols[j] {
                cost[neg] = -c_j;
            }
        }
        run.optimize(&mut tab, &cost, art_start)?;

        let x: Vec<f64> = (0..problem.n_vars())
            .map(|j| tab.value(j) - tab.neg_cols[j].map_or(0.0, |neg| tab.value(neg)))
            .collect();
        let violation = problem.max_violation(&x);
        if violation > CHECK_TOL {
            return Err(GameError::Solver(format!(
                "solution violates the constraints by {violation:e}"
            )));
        }
        let objective = x.iter().zip(&problem.c).map(|(x_j, c_j)| x_j * c_j).sum();

        if cfg.verbose {
            log::debug!(
                "simplex finished after {} pivots, objective {objective}",
                run.iterations
            );
        }

        Ok(LpSolution {
            x,
            objective,
            iterations: run.iterations,
        })
    }
}

/// Row-major tableau. Each row holds `n_cols` coefficients, then the
/// perturbed right-hand side used for pivoting, then the exact one.
struct Tableau {
    rows: Vec<Vec<f64>>,
    basis: Vec<usize>,
    /// Column of the negative part of each variable, `None` if `x_j >= 0`.
    neg_cols: Vec<Option<usize>>,
    n_cols: usize,
    art_start: usize,
}

impl Tableau {
    fn new(problem: &LpProblem) -> Self {
        let n_vars = problem.n_vars();

        let mut nonneg = vec![false; n_vars];
        let mut sign_rows = vec![false; problem.g.len()];
        for (i_row, (coefs, &rhs)) in problem.g.iter().zip(&problem.h).enumerate() {
            let mut nonzero = coefs.iter().enumerate().filter(|&(_, &coef)| coef != 0.0);
            match (nonzero.next(), nonzero.next()) {
                (Some((j, &coef)), None) if coef < 0.0 && rhs == 0.0 => {
                    nonneg[j] = true;
                    sign_rows[i_row] = true;
                }
                _ => {}
            }
        }

        let mut neg_cols = Vec::with_capacity(n_vars);
        let mut n_struct = n_vars;
        for &is_nonneg in &nonneg {
            if is_nonneg {
                neg_cols.push(None);
            } else {
                neg_cols.push(Some(n_struct));
                n_struct += 1;
            }
        }

        let ineqs = problem
            .g
            .iter()
            .zip(&problem.h)
            .zip(&sign_rows)
            .filter(|&(_, &is_sign)| !is_sign)
            .map(|((coefs, &rhs), _)| (coefs, rhs, true));
        let eqs = problem
            .a
            .iter()
            .zip(&problem.b)
            .map(|(coefs, &rhs)| (coefs, rhs, false));
        let constraints: Vec<_> = ineqs.chain(eqs).collect();

        let n_rows = constraints.len();
        let n_ineq = constraints.iter().filter(|&&(_, _, is_ineq)| is_ineq).count();
        let n_art = constraints
            .iter()
            .filter(|&&(_, rhs, is_ineq)| !is_ineq || rhs < 0.0)
            .count();
        let art_start = n_struct + n_ineq;
        let n_cols = art_start + n_art;

        let mut rows = Vec::with_capacity(n_rows);
        let mut basis = Vec::with_capacity(n_rows);
        let (mut slack, mut art) = (n_struct, art_start);
        for (i_row, &(coefs, rhs, is_ineq)) in constraints.iter().enumerate() {
            let mut row = vec![0.0; n_cols + 2];
            let scale = coefs.iter().fold(0.0, |acc: f64, coef| acc.max(coef.abs()));
            let scale = if scale > 0.0 { scale } else { 1.0 };
            for (j, &coef) in coefs.iter().enumerate() {
                row[j] = coef / scale;
                if let Some(neg) = neg_cols[j] {
                    row[neg] = -coef / scale;
                }
            }
            if is_ineq {
                row[slack] = 1.0;
            }
            row[n_cols] = rhs / scale;
            if rhs < 0.0 {
                row.iter_mut().for_each(|ele| *ele = -*ele);
            }

            let exact = row[n_cols];
            row[n_cols + 1] = exact;
            row[n_cols] += PERTURB * (1.0 + i_row as f64 / n_rows as f64) * (1.0 + exact);

            if !is_ineq || rhs < 0.0 {
                row[art] = 1.0;
                basis.push(art);
                art += 1;
            } else {
                basis.push(slack);
            }
            if is_ineq {
                slack += 1;
            }
            rows.push(row);
        }

        Self {
            rows,
            basis,
            neg_cols,
            n_cols,
            art_start,
        }
    }

    /// Perturbed right-hand side of a row.
    fn rhs(&self, i_row: usize) -> f64 {
        self.rows[i_row][self.n_cols]
    }

    fn exact_rhs(&self, i_row: usize) -> f64 {
        self.rows[i_row][self.n_cols + 1]
    }

    fn rhs_scale(&self) -> f64 {
        (0..self.rows.len())
            .map(|i_row| self.exact_rhs(i_row).abs())
            .fold(1.0, f64::max)
    }

    fn value(&self, col: usize) -> f64 {
        self.basis
            .iter()
            .position(|&basic| basic == col)
            .map_or(0.0, |i_row| self.exact_rhs(i_row))
    }

    fn objective(&self, cost: &[f64]) -> f64 {
        self.basis
            .iter()
            .enumerate()
            .map(|(i_row, &basic)| cost[basic] * self.exact_rhs(i_row))
            .sum()
    }

    fn reduced_cost(&self, cost: &[f64], col: usize) -> f64 {
        cost[col]
            - self
                .basis
                .iter()
                .zip(&self.rows)
                .map(|(&basic, row)| cost[basic] * row[col])
                .sum::<f64>()
    }

    fn pivot(&mut self, i_pivot: usize, col: usize) {
        let n_cols = self.n_cols;
        let factor = self.rows[i_pivot][col];
        self.rows[i_pivot].iter_mut().for_each(|ele| *ele /= factor);

        let pivot_row = self.rows[i_pivot].clone();
        for (i_row, row) in self.rows.iter_mut().enumerate() {
            if i_row == i_pivot {
                continue;
            }
            let mult = row[col];
            if mult == 0.0 {
                continue;
            }
            for (ele, &piv) in row.iter_mut().zip(&pivot_row) {
                *ele -= mult * piv;
                if ele.abs() < DROP_TOL {
                    *ele = 0.0;
                }
            }
            row[col] = 0.0;
        }

        // The ratio test lets basic values dip below zero by at most FEAS_TOL.
        for row in &mut self.rows {
            if row[n_cols] < 0.0 && row[n_cols] > -FEAS_TOL {
                row[n_cols] = 0.0;
            }
        }
        self.basis[i_pivot] = col;
    }

    /// Replace basic artificial columns with the largest entry of their row.
    /// Rows with no such entry are redundant and are removed.
    fn evict_artificials(&mut self) {
        let mut i_row = 0;
        while i_row < self.rows.len() {
            if self.basis[i_row] < self.art_start {
                i_row += 1;
                continue;
            }
            let row = &self.rows[i_row];
            let col = (0..self.art_start)
                .filter(|&col| row[col].abs() > PIV_TOL)
                .max_by(|&a, &b| row[a].abs().total_cmp(&row[b].abs()));
            match col {
                Some(col) => {
                    self.pivot(i_row, col);
                    i_row += 1;
                }
                None => {
                    self.rows.remove(i_row);
                    self.basis.remove(i_row);
                }
            }
        }
    }
}

struct Run<'a> {
    cfg: &'a SolverConfig,
    start: Instant,
    iterations: usize,
}

impl Run<'_> {
    fn optimize(
        &mut self,
        tab: &mut Tableau,
        cost: &[f64],
        n_allowed: usize,
    ) -> Result<(), GameError> {
        loop {
            let Some(col) = self.entering_col(tab, cost, n_allowed) else {
                return Ok(());
            };

            let elapsed = self.start.elapsed();
            if self.iterations >= self.cfg.max_iter || elapsed >= self.cfg.time_limit() {
                return Err(GameError::SolverTimeout {
                    iterations: self.iterations,
                    elapsed,
                });
            }

            let i_row = leaving_row(tab, col).ok_or(GameError::Unbounded)?;
            if self.cfg.verbose {
                log::debug!(
                    "pivot {}: column {col} enters, column {} leaves",
                    self.iterations,
                    tab.basis[i_row]
                );
            }
            tab.pivot(i_row, col);
            self.iterations += 1;
        }
    }

    fn entering_col(&self, tab: &Tableau, cost: &[f64], n_allowed: usize) -> Option<usize> {
        let mut candidates = (0..n_allowed)
            .filter(|col| !tab.basis.contains(col))
            .map(|col| (col, tab.reduced_cost(cost, col)))
            .filter(|&(_, red)| red < -DUAL_TOL);

        match self.cfg.pivot_rule {
            PivotRule::Bland => candidates.next().map(|(col, _)| col),
            PivotRule::Dantzig => candidates
                .min_by(|a, b| a.1.total_cmp(&b.1))
                .map(|(col, _)| col),
        }
    }
}

/// Two-pass ratio test.
///
/// The first pass bounds the step so that no basic value drops below
/// `-FEAS_TOL`. The second pass takes the largest pivot element among the
/// rows within that bound, ties broken by the lowest basic column.
fn leaving_row(tab: &Tableau, col: usize) -> Option<usize> {
    let bound = pivot_rows(tab, col)
        .map(|(_, rhs, ele)| (rhs + FEAS_TOL) / ele)
        .min_by(f64::total_cmp)?;

    pivot_rows(tab, col)
        .filter(|&(_, rhs, ele)| rhs / ele <= bound)
        .max_by(|&(i_a, _, ele_a), &(i_b, _, ele_b)| {
            ele_a
                .total_cmp(&ele_b)
                .then(tab.basis[i_b].cmp(&tab.basis[i_a]))
        })
        .map(|(i_row, _, _)| i_row)
}

/// Rows that can leave when `col` enters, as `(row, rhs, entry)`.
fn pivot_rows(tab: &Tableau, col: usize) -> impl Iterator<Item = (usize, f64, f64)> + '_ {
    tab.rows
        .iter()
        .enumerate()
        .filter(move |(_, row)| row[col] > PIV_TOL)
        .map(move |(i_row, row)| (i_row, tab.rhs(i_row).max(0.0), row[col]))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tutorial_problem() -> LpProblem {
        LpProblem {
            c: vec![2.0, 1.0],
            g: vec![
                vec![-1.0, 1.0],
                vec![-1.0, -1.0],
                vec![0.0, -1.0],
                vec![1.0, -2.0],
            ],
            h: vec![1.0, -2.0, 0.0, 4.0],
            ..Default::default()
        }
    }

    #[test]
    fn solves_tutorial_problem() {
        for pivot_rule in [PivotRule::Bland, PivotRule::Dantzig] {
            let cfg = SolverConfig {
                pivot_rule,
                ..Default::default()
            };
            let sol = Simplex.solve(&tutorial_problem(), &cfg).unwrap();
            assert!((sol.x[0] - 0.5).abs() < 1e-9, "{pivot_rule:?}: {:?}", sol.x);
            assert!((sol.x[1] - 1.5).abs() < 1e-9, "{pivot_rule:?}: {:?}", sol.x);
            assert!((sol.objective - 2.5).abs() < 1e-9);
        }
    }

    #[test]
    fn handles_negative_free_variables() {
        // min x  s.t.  x >= -3, x + y = 1, y <= 10
        let problem = LpProblem {
            c: vec![1.0, 0.0],
            g: vec![vec![-1.0, 0.0], vec![0.0, 1.0]],
            h: vec![3.0, 10.0],
            a: vec![vec![1.0, 1.0]],
            b: vec![1.0],
        };
        let sol = Simplex.solve(&problem, &SolverConfig::default()).unwrap();
        assert!((sol.x[0] + 3.0).abs() < 1e-9);
        assert!((sol.x[1] - 4.0).abs() < 1e-9);
    }

    #[test]
    fn detects_infeasibility() {
        // x <= -1 and x >= 0
        let problem = LpProblem {
            c: vec![1.0],
            g: vec![vec![1.0], vec![-1.0]],
            h: vec![-1.0, 0.0],
            ..Default::default()
        };
        assert_eq!(
            Simplex.solve(&problem, &SolverConfig::default()),
            Err(GameError::Infeasible)
        );
    }

    #[test]
    fn detects_unboundedness() {
        // min -x  s.t.  x >= 0
        let problem = LpProblem {
            c: vec![-1.0],
            g: vec![vec![-1.0]],
            h: vec![0.0],
            ..Default::default()
        };
        assert_eq!(
            Simplex.solve(&problem, &SolverConfig::default()),
            Err(GameError::Unbounded)
        );
    }

    #[test]
    fn stops_at_iteration_limit() {
        let cfg = SolverConfig {
            max_iter: 0,
            ..Default::default()
        };
        assert!(matches!(
            Simplex.solve(&tutorial_problem(), &cfg),
            Err(GameError::SolverTimeout { iterations: 0, .. })
        ));
    }

    #[test]
    fn stops_at_time_limit() {
        let cfg = SolverConfig {
            time_limit_ms: 0,
            ..Default::default()
        };
        assert!(matches!(
            Simplex.solve(&tutorial_problem(), &cfg),
            Err(GameError::SolverTimeout { iterations: 0, .. })
        ));
    }

    #[test]
    fn drops_redundant_equalities() {
        // min x  s.t.  x, y >= 0, x + y = 1, 2x + 2y = 2
        let problem = LpProblem {
            c: vec![1.0, 0.0],
            g: vec![vec![-1.0, 0.0], vec![0.0, -1.0]],
            h: vec![0.0, 0.0],
            a: vec![vec![1.0, 1.0], vec![2.0, 2.0]],
            b: vec![1.0, 2.0],
        };
        let sol = Simplex.solve(&problem, &SolverConfig::default()).unwrap();
        assert!(sol.x[0].abs() < 1e-9);
        assert!((sol.x[1] - 1.0).abs() < 1e-9);
    }

    #[test]
    fn measures_relative_violation() {
        let problem = tutorial_problem();
        assert_eq!(problem.max_violation(&[0.5, 1.5]), 0.0);
        // -x - y <= -2 misses by 2 with no terms at the origin.
        assert!((problem.max_violation(&[0.0, 0.0]) - 2.0 / 3.0).abs() < 1e-12);

        let problem = LpProblem {
            c: vec![0.0, 0.0],
            a: vec![vec![1.0, 1.0]],
            b: vec![1.0],
            ..Default::default()
        };
        assert!((problem.max_violation(&[1.0, 0.5]) - 0.5 / 3.5).abs() < 1e-12);
    }

    #[test]
    fn rejects_inconsistent_dimensions() {
        let mut problem = tutorial_problem();
        problem.h.pop();
        assert!(matches!(
            Simplex.solve(&problem, &SolverConfig::default()),
            Err(GameError::Solver(_))
        ));

        let mut problem = tutorial_problem();
        problem.g[2].push(1.0);
        assert!(matches!(
            Simplex.solve(&problem, &SolverConfig::default()),
            Err(GameError::Solver(_))
        ));
    }
}
