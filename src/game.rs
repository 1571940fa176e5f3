use crate::constraints::{JointDistribution, MaxminSolution, solve_correlated, solve_maxmin};
use crate::equilibrium::{SocialOptimum, find_pure_nash, find_social_optimum};
use crate::error::GameError;
use crate::payoff::{Payoff, PayoffMatrix};
use crate::solver::{LpSolver, SolverConfig};
use serde::{Deserialize, Serialize};

/// How the equilibrium outcome of a game is resolved.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EquilibriumMode {
    /// Pure-strategy Nash equilibria only.
    #[default]
    Pure,
    /// Welfare-maximizing correlated equilibrium.
    Correlated,
}

/// Outcome used as the value of a game.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum NashValue {
    /// Payoff at the first pure equilibrium in row-major order.
    Pure(Payoff),
    /// Expected payoff under the correlated equilibrium distribution.
    Expected(Payoff),
    /// No pure equilibrium exists.
    None,
}

impl NashValue {
    pub fn payoff(&self) -> Option<Payoff> {
        match *self {
            NashValue::Pure(payoff) | NashValue::Expected(payoff) => Some(payoff),
            NashValue::None => None,
        }
    }
}

/// Game definition as read from a configuration file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameDef {
    #[serde(default)]
    pub name: Option<String>,
    /// Player 1 payoffs, indexed `[row][col]`.
    pub p1: Vec<Vec<f64>>,
    /// Player 2 payoffs, indexed `[row][col]`.
    pub p2: Vec<Vec<f64>>,
}

/// Solved two-player game.
///
/// Every result is computed once by [`Game::new`] and read-only afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Game {
    name: String,
    mode: EquilibriumMode,
    matrix: PayoffMatrix,
    nash_locations: Vec<(usize, usize)>,
    nash_value: NashValue,
    social_optimum: SocialOptimum,
    correlated: Option<JointDistribution>,
}

impl Game {
    /// Build and solve a game.
    ///
    /// Pure equilibria and the social optimum are always computed. In
    /// [`EquilibriumMode::Correlated`] the correlated equilibrium program is
    /// also solved and its expected payoff becomes the game value.
    pub fn new<S: LpSolver + ?Sized>(
        name: &str,
        matrix: PayoffMatrix,
        mode: EquilibriumMode,
        solver: &S,
        cfg: &SolverConfig,
    ) -> Result<Self, GameError> {
        let nash_locations = find_pure_nash(&matrix);
        let social_optimum = find_social_optimum(&matrix);

        let (nash_value, correlated) = match mode {
            EquilibriumMode::Pure => {
                let nash_value = match nash_locations.first() {
                    Some(&(row, col)) => NashValue::Pure(matrix.get(row, col)),
                    None => NashValue::None,
                };
                (nash_value, None)
            }
            EquilibriumMode::Correlated => {
                let dist = solve_correlated(&matrix, solver, cfg)?;
                (NashValue::Expected(dist.expected_payoff(&matrix)), Some(dist))
            }
        };

        Ok(Self {
            name: name.to_string(),
            mode,
            matrix,
            nash_locations,
            nash_value,
            social_optimum,
            correlated,
        })
    }

    /// Build and solve a game from its definition.
    pub fn from_def<S: LpSolver + ?Sized>(
        default_name: &str,
        def: &GameDef,
        mode: EquilibriumMode,
        solver: &S,
        cfg: &SolverConfig,
    ) -> Result<Self, GameError> {
        let matrix = PayoffMatrix::new(&def.p1, &def.p2)?;
        let name = def.name.as_deref().unwrap_or(default_name);
        Self::new(name, matrix, mode, solver, cfg)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn mode(&self) -> EquilibriumMode {
        self.mode
    }

    pub fn matrix(&self) -> &PayoffMatrix {
        &self.matrix
    }

    pub fn nash_locations(&self) -> &[(usize, usize)] {
        &self.nash_locations
    }

    pub fn nash_value(&self) -> NashValue {
        self.nash_value
    }

    pub fn social_optimum(&self) -> &SocialOptimum {
        &self.social_optimum
    }

    pub fn correlated(&self) -> Option<&JointDistribution> {
        self.correlated.as_ref()
    }

    /// Maxmin strategies of both players.
    ///
    /// The row player maximizes over `p1`, the column player over `p2` seen
    /// from its own side. For zero-sum games the first entry is the minimax
    /// solution of the game.
    pub fn security_strategies<S: LpSolver + ?Sized>(
        &self,
        solver: &S,
        cfg: &SolverConfig,
    ) -> Result<[MaxminSolution; 2], GameError> {
        let row = solve_maxmin(&self.matrix.p1_grid(), solver, cfg)?;
        let col = solve_maxmin(&self.matrix.p2_grid_transposed(), solver, cfg)?;
        Ok([row, col])
    }
}
