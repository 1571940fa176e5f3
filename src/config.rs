use crate::game::GameDef;
use crate::solver::SolverConfig;
use crate::tournament::{TournamentConfig, check_label, pair_key, split_key};
use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::{
    collections::{BTreeMap, BTreeSet},
    fmt::Debug,
    fs,
    ops::RangeBounds,
    path::Path,
};

/// Simulation configuration parameters.
///
/// Loaded from a TOML file and validated before use.
/// See [`Config::from_file`] for loading.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Linear program solver limits.
    #[serde(default)]
    pub solver: SolverConfig,
    /// Population and number of rounds.
    pub tournament: TournamentConfig,
    /// Game played by each pair of agent types, keyed by `"RowType ColType"`.
    pub catalog: BTreeMap<String, GameDef>,
}

impl Config {
    /// Load a [`Config`] from a file.
    ///
    /// The file must be TOML-encoded and contain a serialized [`Config`].
    /// Performs validation on all parameters before returning.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read, deserialized,
    /// or if the configuration values are invalid.
    pub fn from_file<P: AsRef<Path>>(file: P) -> Result<Self> {
        let file = file.as_ref();
        let contents =
            fs::read_to_string(file).with_context(|| format!("failed to read {file:?}"))?;
        Self::from_toml(&contents)
    }

    /// Parse and validate a [`Config`] from a TOML string.
    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents).context("failed to deserialize config")?;

        config.validate().context("failed to validate config")?;

        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        check_num(self.solver.max_iter, 1..100_000_000).context("invalid solver iteration limit")?;
        check_num(self.solver.time_limit_ms, 1..3_600_000).context("invalid solver time limit")?;

        let trn = &self.tournament;
        check_num(trn.n_rounds, 1..1_000_000).context("invalid number of rounds")?;
        check_num(trn.init_score, -1e12..1e12).context("invalid initial score")?;
        for kind in trn.population.keys() {
            check_label(kind).context("invalid population")?;
        }
        let n_agents: usize = trn.population.values().sum();
        check_num(n_agents, 1..1_000_000).context("invalid number of agents")?;

        let mut pairs = BTreeSet::new();
        for (key, def) in &self.catalog {
            let (first, second) =
                split_key(key).with_context(|| format!("invalid catalog key {key:?}"))?;
            if !pairs.insert(pair_key(first, second)) {
                bail!("catalog key {key:?} names the same pairing as another key");
            }
            check_game(def).with_context(|| format!("invalid game {key:?}"))?;
        }

        // Every pair of types that can meet needs a game in some orientation.
        let kinds: Vec<_> = trn
            .population
            .iter()
            .filter(|&(_, &count)| count > 0)
            .collect();
        for (i_kind, &(first, &count)) in kinds.iter().enumerate() {
            for &(second, _) in &kinds[i_kind..] {
                if first == second && count < 2 {
                    continue;
                }
                let covered = pairs.contains(&pair_key(first, second))
                    || pairs.contains(&pair_key(second, first));
                if !covered {
                    bail!("catalog has no game for pairing {first:?} with {second:?}");
                }
            }
        }

        Ok(())
    }
}

fn check_num<T, R>(num: T, range: R) -> Result<()>
where
    T: PartialOrd + Debug,
    R: RangeBounds<T> + Debug,
{
    if !range.contains(&num) {
        bail!("number must be in the range {range:?}, but is {num:?}");
    }
    Ok(())
}

fn check_mat(mat: &[Vec<f64>], exp_dim: (usize, usize)) -> Result<()> {
    // Ensure matrix has expected dimensions.
    let (exp_n_rows, exp_n_cols) = exp_dim;
    let n_rows = mat.len();
    if n_rows != exp_n_rows {
        bail!("matrix must have {exp_n_rows} rows, but has {n_rows}");
    }
    if mat.iter().any(|row| row.len() != exp_n_cols) {
        bail!("matrix must have {exp_n_cols} columns");
    }
    if mat.iter().flatten().any(|ele| !ele.is_finite()) {
        bail!("matrix must have only finite elements");
    }
    Ok(())
}

fn check_game(def: &GameDef) -> Result<()> {
    let n_rows = def.p1.len();
    let n_cols = def.p1.first().map_or(0, Vec::len);
    check_num(n_rows, 1..1000).context("invalid number of rows")?;
    check_num(n_cols, 1..1000).context("invalid number of columns")?;
    check_mat(&def.p1, (n_rows, n_cols)).context("invalid player 1 payoffs")?;
    check_mat(&def.p2, (n_rows, n_cols)).context("invalid player 2 payoffs")?;
    Ok(())
}
