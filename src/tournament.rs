use crate::error::GameError;
use crate::game::{EquilibriumMode, Game, GameDef};
use crate::payoff::Payoff;
use crate::solver::{LpSolver, SolverConfig};
use anyhow::{Context, Result, bail};
use rand::prelude::*;
use rand_chacha::ChaCha12Rng;
use rmp_serde::{decode, encode};
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    fs::File,
    io::{BufReader, BufWriter, Write},
    path::Path,
};

/// Number of agents of each type.
pub type Population = BTreeMap<String, usize>;

/// Cumulative score of every agent, grouped by type.
pub type Snapshot = BTreeMap<String, Vec<f64>>;

/// Individual agent: its type and its index within the type.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AgentId {
    pub kind: String,
    pub idx: usize,
}

/// Catalog key for a row type and a column type.
pub fn pair_key(first: &str, second: &str) -> String {
    format!("{first} {second}")
}

/// Split a catalog key into its row and column types.
pub fn split_key(key: &str) -> Result<(&str, &str), GameError> {
    let mut labels = key.split_whitespace();
    match (labels.next(), labels.next(), labels.next()) {
        (Some(first), Some(second), None) => Ok((first, second)),
        _ => Err(GameError::InvalidLabel(key.to_string())),
    }
}

/// Check that an agent type label can be used in catalog keys.
pub fn check_label(label: &str) -> Result<(), GameError> {
    if label.is_empty() || label.contains(char::is_whitespace) {
        return Err(GameError::InvalidLabel(label.to_string()));
    }
    Ok(())
}

/// Game found for a pair of agents.
pub struct Matchup<'a> {
    pub game: &'a Game,
    /// The game is stored with the second agent as row player.
    pub swapped: bool,
}

impl Matchup<'_> {
    /// Payoffs of the queried `(first, second)` agents, in that order.
    pub fn outcome(&self) -> Option<Payoff> {
        let payoff = self.game.nash_value().payoff()?;
        Some(if self.swapped {
            payoff.swapped()
        } else {
            payoff
        })
    }
}

/// Solved games indexed by `"RowType ColType"` keys.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameCatalog {
    games: BTreeMap<String, Game>,
}

impl GameCatalog {
    /// Solve every game definition.
    ///
    /// In [`EquilibriumMode::Pure`], games without a pure equilibrium are
    /// solved again in correlated mode so that every pairing has an outcome.
    pub fn new<S: LpSolver + ?Sized>(
        defs: &BTreeMap<String, GameDef>,
        mode: EquilibriumMode,
        solver: &S,
        cfg: &SolverConfig,
    ) -> Result<Self> {
        let mut games = BTreeMap::new();
        for (key, def) in defs {
            let (first, second) = split_key(key)?;
            let key = pair_key(first, second);

            let mut game = Game::from_def(&key, def, mode, solver, cfg)
                .with_context(|| format!("failed to solve game {key:?}"))?;
            if game.nash_value().payoff().is_none() {
                log::warn!("game {key:?} has no pure equilibrium, using correlated equilibrium");
                game = Game::from_def(&key, def, EquilibriumMode::Correlated, solver, cfg)
                    .with_context(|| format!("failed to solve game {key:?}"))?;
            }
            log::info!("{key:?}: {:?}", game.nash_value());

            if games.contains_key(&key) {
                bail!("more than one game for pairing {key:?}");
            }
            games.insert(key, game);
        }
        Ok(Self { games })
    }

    pub fn games(&self) -> &BTreeMap<String, Game> {
        &self.games
    }

    /// Find the game played by `first` (row) against `second` (column).
    ///
    /// Tries `"first second"` then `"second first"`.
    pub fn lookup(&self, first: &str, second: &str) -> Option<Matchup<'_>> {
        if let Some(game) = self.games.get(&pair_key(first, second)) {
            return Some(Matchup {
                game,
                swapped: false,
            });
        }
        self.games
            .get(&pair_key(second, first))
            .map(|game| Matchup {
                game,
                swapped: true,
            })
    }
}

/// Scores of every round, starting with the initial scores.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreHistory {
    snapshots: Vec<Snapshot>,
    pairings: Vec<Vec<(AgentId, AgentId)>>,
}

impl ScoreHistory {
    pub fn new(population: &Population, init_score: f64) -> Self {
        let snapshot = population
            .iter()
            .map(|(kind, &count)| (kind.clone(), vec![init_score; count]))
            .collect();
        Self {
            snapshots: vec![snapshot],
            pairings: vec![Vec::new()],
        }
    }

    /// Number of rounds played (round 0 excluded).
    pub fn n_rounds(&self) -> usize {
        self.snapshots.len() - 1
    }

    pub fn snapshots(&self) -> &[Snapshot] {
        &self.snapshots
    }

    /// Pairs resolved in each round; empty for round 0.
    pub fn pairings(&self) -> &[Vec<(AgentId, AgentId)>] {
        &self.pairings
    }

    pub fn latest(&self) -> &Snapshot {
        &self.snapshots[self.snapshots.len() - 1]
    }

    fn push(&mut self, snapshot: Snapshot, pairs: Vec<(AgentId, AgentId)>) {
        self.snapshots.push(snapshot);
        self.pairings.push(pairs);
    }

    /// Save the history to a MessagePack file.
    pub fn save<P: AsRef<Path>>(&self, file: P) -> Result<()> {
        let file = file.as_ref();
        let file = File::create(file).with_context(|| format!("failed to create {file:?}"))?;
        let mut writer = BufWriter::new(file);
        encode::write(&mut writer, self).context("failed to serialize score history")?;
        writer.flush().context("failed to flush writer stream")?;
        Ok(())
    }

    /// Load a history saved with [`ScoreHistory::save`].
    pub fn load<P: AsRef<Path>>(file: P) -> Result<Self> {
        let file = file.as_ref();
        let file = File::open(file).with_context(|| format!("failed to open {file:?}"))?;
        let reader = BufReader::new(file);
        decode::from_read(reader).context("failed to deserialize score history")
    }
}

/// Tournament parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TournamentConfig {
    #[serde(default)]
    pub mode: EquilibriumMode,
    /// Rounds played per run.
    pub n_rounds: usize,
    /// Score of every agent at round 0.
    #[serde(default)]
    pub init_score: f64,
    pub population: Population,
}

/// Repeated tournament with random pairing.
///
/// Holds the configuration, the solved games, the score history and the
/// random number generator, so a checkpoint can resume exactly where a run
/// stopped.
#[derive(Serialize, Deserialize)]
pub struct Tournament {
    cfg: TournamentConfig,
    catalog: GameCatalog,
    history: ScoreHistory,
    rng: ChaCha12Rng,
}

impl Tournament {
    /// Create a tournament at round 0.
    ///
    /// The generator is seeded from `seed`, or from the OS when `None`.
    pub fn new(cfg: TournamentConfig, catalog: GameCatalog, seed: Option<u64>) -> Result<Self> {
        for kind in cfg.population.keys() {
            check_label(kind)?;
        }

        let rng = match seed {
            Some(seed) => ChaCha12Rng::seed_from_u64(seed),
            None => ChaCha12Rng::try_from_os_rng()?,
        };
        let history = ScoreHistory::new(&cfg.population, cfg.init_score);

        Ok(Self {
            cfg,
            catalog,
            history,
            rng,
        })
    }

    pub fn cfg(&self) -> &TournamentConfig {
        &self.cfg
    }

    pub fn catalog(&self) -> &GameCatalog {
        &self.catalog
    }

    pub fn history(&self) -> &ScoreHistory {
        &self.history
    }

    /// Play `n_rounds` rounds in order.
    pub fn run(&mut self, n_rounds: usize) -> Result<()> {
        let log_every = (n_rounds / 10).max(1);
        for i_round in 0..n_rounds {
            let round = self.history.n_rounds() + 1;
            self.play_round()
                .with_context(|| format!("failed to play round {round}"))?;

            if (i_round + 1) % log_every == 0 || i_round + 1 == n_rounds {
                let progress = 100.0 * (i_round + 1) as f64 / n_rounds as f64;
                log::info!("completed {progress:06.2}%");
            }
        }
        Ok(())
    }

    /// Pair every agent at random and append the resulting scores.
    ///
    /// Nothing is appended if any pairing fails.
    pub fn play_round(&mut self) -> Result<()> {
        let mut ids = self.identities();
        ids.shuffle(&mut self.rng);

        let mut snapshot = self.history.latest().clone();
        let mut pairs = Vec::with_capacity(ids.len() / 2);

        for pair in ids.chunks_exact(2) {
            // Pairs holding the placeholder sit this round out.
            let (Some(first), Some(second)) = (&pair[0], &pair[1]) else {
                continue;
            };

            let matchup = self
                .catalog
                .lookup(&first.kind, &second.kind)
                .ok_or_else(|| GameError::UnknownPairing {
                    first: first.kind.clone(),
                    second: second.kind.clone(),
                })?;
            let payoff = matchup.outcome().with_context(|| {
                format!("game {:?} has no equilibrium outcome", matchup.game.name())
            })?;

            add_score(&mut snapshot, first, payoff.p1)?;
            add_score(&mut snapshot, second, payoff.p2)?;
            pairs.push((first.clone(), second.clone()));
        }

        self.history.push(snapshot, pairs);
        Ok(())
    }

    /// Every agent, plus one placeholder when the total is odd.
    fn identities(&self) -> Vec<Option<AgentId>> {
        let mut ids: Vec<_> = self
            .cfg
            .population
            .iter()
            .flat_map(|(kind, &count)| {
                (0..count).map(move |idx| {
                    Some(AgentId {
                        kind: kind.clone(),
                        idx,
                    })
                })
            })
            .collect();
        if ids.len() % 2 != 0 {
            ids.push(None);
        }
        ids
    }

    /// Save a checkpoint of the entire tournament state.
    pub fn save_checkpoint<P: AsRef<Path>>(&self, file: P) -> Result<()> {
        let file = file.as_ref();
        let file = File::create(file).with_context(|| format!("failed to create {file:?}"))?;
        let mut writer = BufWriter::new(file);
        encode::write(&mut writer, self).context("failed to serialize tournament")?;
        writer.flush().context("failed to flush writer stream")?;
        Ok(())
    }

    /// Load a previously saved tournament checkpoint.
    pub fn load_checkpoint<P: AsRef<Path>>(file: P) -> Result<Self> {
        let file = file.as_ref();
        let file = File::open(file).with_context(|| format!("failed to open {file:?}"))?;
        let mut reader = BufReader::new(file);
        let tournament =
            decode::from_read(&mut reader).context("failed to deserialize tournament")?;
        Ok(tournament)
    }
}

fn add_score(snapshot: &mut Snapshot, agent: &AgentId, val: f64) -> Result<()> {
    let score = snapshot
        .get_mut(&agent.kind)
        .and_then(|scores| scores.get_mut(agent.idx))
        .with_context(|| format!("no score slot for {agent:?}"))?;
    *score += val;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::solver::Simplex;
    use std::{collections::BTreeSet, env, fs, process};

    fn def(p1: &[&[f64]], p2: &[&[f64]]) -> GameDef {
        GameDef {
            name: None,
            p1: p1.iter().map(|row| row.to_vec()).collect(),
            p2: p2.iter().map(|row| row.to_vec()).collect(),
        }
    }

    fn prisoners_dilemma() -> GameDef {
        def(&[&[-1.0, -3.0], &[0.0, -2.0]], &[&[-1.0, 0.0], &[-3.0, -2.0]])
    }

    fn catalog(defs: Vec<(&str, GameDef)>, mode: EquilibriumMode) -> GameCatalog {
        let defs = defs
            .into_iter()
            .map(|(key, def)| (key.to_string(), def))
            .collect();
        GameCatalog::new(&defs, mode, &Simplex, &SolverConfig::default()).unwrap()
    }

    fn tournament(population: &[(&str, usize)], catalog: GameCatalog, seed: u64) -> Tournament {
        let cfg = TournamentConfig {
            mode: EquilibriumMode::Pure,
            n_rounds: 10,
            init_score: 0.0,
            population: population
                .iter()
                .map(|&(kind, count)| (kind.to_string(), count))
                .collect(),
        };
        Tournament::new(cfg, catalog, Some(seed)).unwrap()
    }

    fn score(history: &ScoreHistory, round: usize, agent: &AgentId) -> f64 {
        history.snapshots()[round][&agent.kind][agent.idx]
    }

    #[test]
    fn single_agent_never_plays() {
        let cat = catalog(vec![("A A", prisoners_dilemma())], EquilibriumMode::Pure);
        let mut trn = tournament(&[("A", 1)], cat, 7);
        trn.run(5).unwrap();

        let history = trn.history();
        assert_eq!(history.snapshots().len(), 6);
        for (snapshot, pairs) in history.snapshots().iter().zip(history.pairings()) {
            assert_eq!(snapshot["A"], vec![0.0]);
            assert!(pairs.is_empty());
        }
    }

    #[test]
    fn only_paired_agents_change_score() {
        let cat = catalog(
            vec![
                ("X X", prisoners_dilemma()),
                ("X Y", prisoners_dilemma()),
                ("Y Y", prisoners_dilemma()),
            ],
            EquilibriumMode::Pure,
        );
        let mut trn = tournament(&[("X", 3), ("Y", 2)], cat, 42);
        trn.run(20).unwrap();

        let history = trn.history();
        assert_eq!(history.n_rounds(), 20);
        let agents: Vec<_> = [("X", 3), ("Y", 2)]
            .iter()
            .flat_map(|&(kind, count)| {
                (0..count).map(move |idx| AgentId {
                    kind: kind.to_string(),
                    idx,
                })
            })
            .collect();

        for round in 1..=20 {
            let pairs = &history.pairings()[round];
            assert_eq!(pairs.len(), 2);

            let paired: Vec<_> = pairs.iter().flat_map(|(a, b)| [a, b]).collect();
            let unique: BTreeSet<_> = paired.iter().collect();
            assert_eq!(unique.len(), 4);

            for agent in &agents {
                let prev = score(history, round - 1, agent);
                let curr = score(history, round, agent);
                if paired.contains(&agent) {
                    assert_eq!(curr - prev, -2.0);
                } else {
                    assert_eq!(curr, prev);
                }
            }
        }
    }

    #[test]
    fn reversed_key_swaps_payoffs() {
        let cat = catalog(vec![("X Y", def(&[&[5.0]], &[&[1.0]]))], EquilibriumMode::Pure);
        assert!(!cat.lookup("X", "Y").unwrap().swapped);
        assert_eq!(
            cat.lookup("Y", "X").unwrap().outcome(),
            Some(Payoff::new(1.0, 5.0))
        );

        let mut trn = tournament(&[("X", 1), ("Y", 1)], cat, 3);
        trn.run(3).unwrap();
        assert_eq!(trn.history().latest()["X"], vec![15.0]);
        assert_eq!(trn.history().latest()["Y"], vec![3.0]);
    }

    #[test]
    fn keys_are_normalized() {
        let defs: BTreeMap<_, _> = [
            ("X\tY".to_string(), def(&[&[5.0]], &[&[1.0]])),
            ("Y  Y".to_string(), prisoners_dilemma()),
        ]
        .into_iter()
        .collect();
        let cfg = SolverConfig::default();
        let cat = GameCatalog::new(&defs, EquilibriumMode::Pure, &Simplex, &cfg).unwrap();
        assert!(cat.games().contains_key("X Y"));
        assert!(cat.lookup("Y", "Y").is_some());

        let mut defs = defs;
        defs.insert("X Y".to_string(), prisoners_dilemma());
        assert!(GameCatalog::new(&defs, EquilibriumMode::Pure, &Simplex, &cfg).is_err());
    }

    #[test]
    fn unknown_pairing_aborts_round() {
        let cat = catalog(vec![("X X", prisoners_dilemma())], EquilibriumMode::Pure);
        assert!(cat.lookup("X", "Y").is_none());

        let mut trn = tournament(&[("X", 1), ("Y", 1)], cat, 0);
        let err = trn.run(1).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<GameError>(),
            Some(GameError::UnknownPairing { .. })
        ));
        assert_eq!(trn.history().n_rounds(), 0);
    }

    #[test]
    fn pure_mode_falls_back_to_correlated() {
        let pennies = def(&[&[2.0, 0.0], &[0.0, 2.0]], &[&[0.0, 2.0], &[2.0, 0.0]]);
        let cat = catalog(vec![("A A", pennies)], EquilibriumMode::Pure);
        assert_eq!(cat.games()["A A"].mode(), EquilibriumMode::Correlated);

        let mut trn = tournament(&[("A", 2)], cat, 11);
        trn.run(3).unwrap();
        for &score in &trn.history().latest()["A"] {
            assert!((score - 3.0).abs() < 1e-6);
        }
    }

    #[test]
    fn same_seed_same_history() {
        let make = |seed| {
            let cat = catalog(vec![("X X", prisoners_dilemma())], EquilibriumMode::Pure);
            let mut trn = tournament(&[("X", 9)], cat, seed);
            trn.run(15).unwrap();
            trn.history().clone()
        };
        assert_eq!(make(5), make(5));
    }

    #[test]
    fn checkpoint_resume_matches_uninterrupted_run() {
        let make = || {
            let cat = catalog(
                vec![
                    ("X X", prisoners_dilemma()),
                    ("X Y", def(&[&[5.0]], &[&[1.0]])),
                    ("Y Y", prisoners_dilemma()),
                ],
                EquilibriumMode::Pure,
            );
            tournament(&[("X", 4), ("Y", 3)], cat, 9)
        };

        let mut full = make();
        full.run(100).unwrap();

        let mut first = make();
        first.run(50).unwrap();
        let file = env::temp_dir().join(format!("equilibria-resume-{}.msgpack", process::id()));
        first.save_checkpoint(&file).unwrap();
        let mut resumed = Tournament::load_checkpoint(&file).unwrap();
        fs::remove_file(&file).ok();
        resumed.run(50).unwrap();

        assert_eq!(resumed.history().n_rounds(), 100);
        assert_eq!(resumed.history(), full.history());
        assert_eq!(resumed.catalog(), full.catalog());
    }

    #[test]
    fn initial_offset_and_labels() {
        let cat = catalog(vec![("X X", prisoners_dilemma())], EquilibriumMode::Pure);
        let cfg = TournamentConfig {
            mode: EquilibriumMode::Pure,
            n_rounds: 1,
            init_score: 10.0,
            population: [("X".to_string(), 2)].into_iter().collect(),
        };
        let trn = Tournament::new(cfg.clone(), cat.clone(), Some(1)).unwrap();
        assert_eq!(trn.history().snapshots()[0]["X"], vec![10.0, 10.0]);

        let mut bad = cfg;
        bad.population.insert("bad label".to_string(), 1);
        assert!(Tournament::new(bad, cat, Some(1)).is_err());

        assert_eq!(split_key("A B").unwrap(), ("A", "B"));
        assert!(split_key("A").is_err());
        assert!(split_key("A B C").is_err());
    }
}
