//! Two-player payoff storage.

use crate::error::GameError;
use serde::{Deserialize, Serialize};
use std::ops::Add;

/// Payoff pair of a single joint action.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Payoff {
    /// Row player payoff.
    pub p1: f64,
    /// Column player payoff.
    pub p2: f64,
}

impl Payoff {
    pub fn new(p1: f64, p2: f64) -> Self {
        Self { p1, p2 }
    }

    /// Sum of both payoffs (social welfare of the cell).
    pub fn sum(&self) -> f64 {
        self.p1 + self.p2
    }

    /// Same payoffs seen from the opposite side of the table.
    pub fn swapped(&self) -> Self {
        Self::new(self.p2, self.p1)
    }

    pub fn scaled(&self, factor: f64) -> Self {
        Self::new(self.p1 * factor, self.p2 * factor)
    }
}

impl Add for Payoff {
    type Output = Payoff;

    fn add(self, rhs: Payoff) -> Payoff {
        Payoff {
            p1: self.p1 + rhs.p1,
            p2: self.p2 + rhs.p2,
        }
    }
}

/// Payoff matrix of a finite two-player normal-form game.
///
/// Rows are the actions of player 1, columns the actions of player 2.
/// Cells are stored in row-major order and never change after construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PayoffMatrix {
    n_rows: usize,
    n_cols: usize,
    cells: Vec<Payoff>,
}

impl PayoffMatrix {
    /// Build a matrix from one payoff grid per player.
    ///
    /// # Errors
    /// Returns [`GameError::ShapeMismatch`] if a grid is empty or
    /// non-rectangular, or if the two grids have different dimensions.
    pub fn new(p1_grid: &[Vec<f64>], p2_grid: &[Vec<f64>]) -> Result<Self, GameError> {
        let dim_1 = grid_dim(p1_grid)
            .map_err(|msg| GameError::ShapeMismatch(format!("player 1 {msg}")))?;
        let dim_2 = grid_dim(p2_grid)
            .map_err(|msg| GameError::ShapeMismatch(format!("player 2 {msg}")))?;
        if dim_1 != dim_2 {
            return Err(GameError::ShapeMismatch(format!(
                "player 1 grid is {dim_1:?} but player 2 grid is {dim_2:?}"
            )));
        }

        let (n_rows, n_cols) = dim_1;
        let cells = p1_grid
            .iter()
            .zip(p2_grid)
            .flat_map(|(row_1, row_2)| row_1.iter().zip(row_2))
            .map(|(&p1, &p2)| Payoff { p1, p2 })
            .collect();

        Ok(Self {
            n_rows,
            n_cols,
            cells,
        })
    }

    /// Dimensions as `(rows, cols)`.
    pub fn dim(&self) -> (usize, usize) {
        (self.n_rows, self.n_cols)
    }

    pub fn n_rows(&self) -> usize {
        self.n_rows
    }

    pub fn n_cols(&self) -> usize {
        self.n_cols
    }

    /// Payoff pair at `(row, col)`.
    ///
    /// # Panics
    /// Panics if the coordinates are out of range.
    pub fn get(&self, row: usize, col: usize) -> Payoff {
        assert!(
            row < self.n_rows && col < self.n_cols,
            "cell ({row}, {col}) out of range"
        );
        self.cells[row * self.n_cols + col]
    }

    /// All cells in row-major order.
    pub fn cells(&self) -> &[Payoff] {
        &self.cells
    }

    /// Iterate over `(row, col, payoff)` in row-major order.
    pub fn iter(&self) -> impl Iterator<Item = (usize, usize, Payoff)> + '_ {
        self.cells
            .iter()
            .enumerate()
            .map(|(idx, &payoff)| (idx / self.n_cols, idx % self.n_cols, payoff))
    }

    /// Player 1 payoffs, indexed `[row][col]`.
    pub fn p1_grid(&self) -> Vec<Vec<f64>> {
        self.cells
            .chunks_exact(self.n_cols)
            .map(|row| row.iter().map(|payoff| payoff.p1).collect())
            .collect()
    }

    /// Player 2 payoffs from player 2's side, indexed `[col][row]`.
    pub fn p2_grid_transposed(&self) -> Vec<Vec<f64>> {
        (0..self.n_cols)
            .map(|col| (0..self.n_rows).map(|row| self.get(row, col).p2).collect())
            .collect()
    }

    pub fn is_zero_sum(&self) -> bool {
        self.cells.iter().all(|payoff| payoff.sum() == 0.0)
    }
}

fn grid_dim(grid: &[Vec<f64>]) -> Result<(usize, usize), String> {
    let n_rows = grid.len();
    if n_rows == 0 {
        return Err("grid has no rows".to_string());
    }
    let n_cols = grid[0].len();
    if n_cols == 0 {
        return Err("grid has no columns".to_string());
    }
    if let Some(i_row) = grid.iter().position(|row| row.len() != n_cols) {
        return Err(format!(
            "grid row {i_row} has {} columns, expected {n_cols}",
            grid[i_row].len()
        ));
    }
    Ok((n_rows, n_cols))
}
