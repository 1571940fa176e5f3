use std::time::Duration;

/// Errors raised while building or solving games.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum GameError {
    #[error("malformed payoff grids: {0}")]
    ShapeMismatch(String),

    #[error("linear program is infeasible")]
    Infeasible,

    #[error("linear program is unbounded")]
    Unbounded,

    #[error("solver stopped after {iterations} iterations ({elapsed:?})")]
    SolverTimeout { iterations: usize, elapsed: Duration },

    #[error("solver error: {0}")]
    Solver(String),

    #[error("no game defined for pairing \"{first} {second}\" in either order")]
    UnknownPairing { first: String, second: String },

    #[error("invalid agent type label {0:?}")]
    InvalidLabel(String),
}
