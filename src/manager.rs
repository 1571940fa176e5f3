use crate::analysis::RunReport;
use crate::config::Config;
use crate::constraints::MaxminSolution;
use crate::game::Game;
use crate::solver::Simplex;
use crate::tournament::{GameCatalog, ScoreHistory, Tournament};
use anyhow::{Context, Result, bail};
use glob::glob;
use rmp_serde::encode;
use serde::Serialize;
use std::{
    fs::{self, File},
    io::{BufWriter, Write},
    path::{Path, PathBuf},
};

pub struct Manager {
    sim_dir: PathBuf,
    cfg: Config,
}

/// Solved game with its security strategies, as written by `solve`.
#[derive(Serialize)]
struct GameReport<'a> {
    key: &'a str,
    game: &'a Game,
    security: [MaxminSolution; 2],
}

impl Manager {
    pub fn new<P: AsRef<Path>>(sim_dir: P) -> Result<Self> {
        let sim_dir = sim_dir.as_ref().to_path_buf();

        let cfg =
            Config::from_file(sim_dir.join("config.toml")).context("failed to construct cfg")?;
        log::info!("{cfg:#?}");

        Ok(Self { sim_dir, cfg })
    }

    pub fn solve_games(&self) -> Result<()> {
        let catalog = self.build_catalog()?;
        let solver_cfg = &self.cfg.solver;

        let mut reports = Vec::with_capacity(catalog.games().len());
        for (key, game) in catalog.games() {
            log::info!(
                "{key:?} ({}, {:?}): nash at {:?}, social optimum {} at {:?}",
                game.name(),
                game.mode(),
                game.nash_locations(),
                game.social_optimum().value,
                game.social_optimum().cells
            );
            if let Some(dist) = game.correlated() {
                log::info!(
                    "{key:?}: correlated equilibrium {:?} on {:?}",
                    dist.probs(),
                    dist.support(1e-9)
                );
            }

            let security = game
                .security_strategies(&Simplex, solver_cfg)
                .with_context(|| format!("failed to solve security strategies of {key:?}"))?;
            if game.matrix().is_zero_sum() {
                log::info!("{key:?}: zero-sum, value {}", security[0].value);
            }
            reports.push(GameReport {
                key,
                game,
                security,
            });
        }

        let file = self.games_file();
        write_msgpack(&file, &reports).context("failed to save games")?;
        log::info!("saved {file:?}");

        Ok(())
    }

    pub fn create_run(&self, seed: Option<u64>) -> Result<()> {
        let run_idx = self.count_run_dirs().context("failed to count run dirs")?;

        let run_dir = self.run_dir(run_idx);
        fs::create_dir_all(&run_dir).with_context(|| format!("failed to create {run_dir:?}"))?;
        log::info!("created {run_dir:?}");

        let catalog = self.build_catalog()?;
        let tournament = Tournament::new(self.cfg.tournament.clone(), catalog, seed)
            .context("failed to construct tournament")?;

        self.run_tournament(run_idx, tournament)
    }

    pub fn resume_run(&self, run_idx: usize) -> Result<()> {
        let checkpoint_file = self.checkpoint_file(run_idx);
        let tournament = Tournament::load_checkpoint(&checkpoint_file)
            .with_context(|| format!("failed to load {checkpoint_file:?}"))?;
        if tournament.cfg() != &self.cfg.tournament {
            bail!("checkpoint config differs from the current config");
        }
        let catalog = self.build_catalog()?;
        if tournament.catalog() != &catalog {
            bail!("checkpoint catalog differs from the current catalog");
        }
        log::info!("loaded {checkpoint_file:?}");

        self.run_tournament(run_idx, tournament)
    }

    pub fn analyze_sim(&self) -> Result<()> {
        let n_runs = self.count_run_dirs().context("failed to count run dirs")?;
        for run_idx in 0..n_runs {
            let scores_file = self.scores_file(run_idx);
            let history = ScoreHistory::load(&scores_file)
                .with_context(|| format!("failed to load {scores_file:?}"))?;

            let report = RunReport::new(&history);
            for (kind, type_report) in &report.types {
                log::info!("run {run_idx} {kind:?}: {:?}", type_report.final_scores);
            }

            let results_file = self.results_file(run_idx);
            report
                .save(&results_file)
                .context("failed to save results")?;
            log::info!("saved {results_file:?}");
        }

        Ok(())
    }

    pub fn clean_sim(&self) -> Result<()> {
        let n_runs = self.count_run_dirs().context("failed to count run dirs")?;
        for run_idx in 0..n_runs {
            let run_dir = self.run_dir(run_idx);
            fs::remove_dir_all(&run_dir)
                .with_context(|| format!("failed to remove {run_dir:?}"))?;
            log::info!("removed {run_dir:?}");
        }

        let games_file = self.games_file();
        if games_file.exists() {
            fs::remove_file(&games_file)
                .with_context(|| format!("failed to remove {games_file:?}"))?;
            log::info!("removed {games_file:?}");
        }

        Ok(())
    }

    fn build_catalog(&self) -> Result<GameCatalog> {
        GameCatalog::new(
            &self.cfg.catalog,
            self.cfg.tournament.mode,
            &Simplex,
            &self.cfg.solver,
        )
        .context("failed to construct catalog")
    }

    fn run_tournament(&self, run_idx: usize, mut tournament: Tournament) -> Result<()> {
        tournament
            .run(self.cfg.tournament.n_rounds)
            .context("failed to run tournament")?;

        let scores_file = self.scores_file(run_idx);
        tournament
            .history()
            .save(&scores_file)
            .context("failed to save scores")?;
        log::info!("saved {scores_file:?}");

        tournament
            .save_checkpoint(self.checkpoint_file(run_idx))
            .context("failed to save checkpoint")?;

        Ok(())
    }

    fn count_run_dirs(&self) -> Result<usize> {
        let pattern = self.sim_dir.join("run-*");
        let pattern = pattern.to_str().context("pattern is not valid UTF-8")?;
        let count = glob(pattern)
            .context("failed to glob run dirs")?
            .filter_map(Result::ok)
            .filter(|p| p.is_dir())
            .count();
        Ok(count)
    }

    fn run_dir(&self, run_idx: usize) -> PathBuf {
        self.sim_dir.join(format!("run-{run_idx:04}"))
    }

    fn games_file(&self) -> PathBuf {
        self.sim_dir.join("games.msgpack")
    }

    fn checkpoint_file(&self, run_idx: usize) -> PathBuf {
        self.run_dir(run_idx).join("checkpoint.msgpack")
    }

    fn scores_file(&self, run_idx: usize) -> PathBuf {
        self.run_dir(run_idx).join("scores.msgpack")
    }

    fn results_file(&self, run_idx: usize) -> PathBuf {
        self.run_dir(run_idx).join("results.msgpack")
    }
}

fn write_msgpack<T: Serialize + ?Sized>(file: &Path, val: &T) -> Result<()> {
    let file = File::create(file).with_context(|| format!("failed to create {file:?}"))?;
    let mut writer = BufWriter::new(file);
    encode::write(&mut writer, val).context("failed to serialize value")?;
    writer.flush().context("failed to flush writer stream")?;
    Ok(())
}
