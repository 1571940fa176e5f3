use crate::tournament::{ScoreHistory, Snapshot};
use anyhow::{Context, Result};
use rmp_serde::encode;
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    fs::File,
    io::{BufWriter, Write},
    path::Path,
};

/// Online mean and variance (Welford).
pub struct Accumulator {
    n_vals: usize,
    mean: f64,
    diff_2_sum: f64,
    min: f64,
    max: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccumulatorReport {
    pub n_vals: usize,
    pub mean: f64,
    pub std_dev: f64,
    pub min: f64,
    pub max: f64,
}

impl Accumulator {
    pub fn new() -> Self {
        Self {
            n_vals: 0,
            mean: 0.0,
            diff_2_sum: 0.0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
        }
    }

    pub fn add(&mut self, val: f64) {
        self.n_vals += 1;

        let diff_a = val - self.mean;
        self.mean += diff_a / self.n_vals as f64;

        let diff_b = val - self.mean;
        self.diff_2_sum += diff_a * diff_b;

        self.min = self.min.min(val);
        self.max = self.max.max(val);
    }

    pub fn report(&self) -> AccumulatorReport {
        AccumulatorReport {
            n_vals: self.n_vals,
            mean: if self.n_vals > 0 { self.mean } else { f64::NAN },
            std_dev: if self.n_vals > 1 {
                (self.diff_2_sum / (self.n_vals as f64 - 1.0)).sqrt()
            } else {
                f64::NAN
            },
            min: if self.n_vals > 0 { self.min } else { f64::NAN },
            max: if self.n_vals > 0 { self.max } else { f64::NAN },
        }
    }
}

/// Score statistics of one agent type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypeReport {
    /// Statistics over the agents of the latest round.
    pub final_scores: AccumulatorReport,
    /// Mean score of the type at every round.
    pub mean_by_round: Vec<f64>,
}

/// Per-type statistics of a finished run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub n_rounds: usize,
    pub types: BTreeMap<String, TypeReport>,
}

impl RunReport {
    pub fn new(history: &ScoreHistory) -> Self {
        let types = history
            .latest()
            .iter()
            .map(|(kind, scores)| {
                let mut acc = Accumulator::new();
                scores.iter().for_each(|&score| acc.add(score));

                let mean_by_round = history
                    .snapshots()
                    .iter()
                    .map(|snapshot| type_mean(snapshot, kind))
                    .collect();

                let report = TypeReport {
                    final_scores: acc.report(),
                    mean_by_round,
                };
                (kind.clone(), report)
            })
            .collect();

        Self {
            n_rounds: history.n_rounds(),
            types,
        }
    }

    pub fn save<P: AsRef<Path>>(&self, file: P) -> Result<()> {
        let file = file.as_ref();
        let file = File::create(file).with_context(|| format!("failed to create {file:?}"))?;
        let mut writer = BufWriter::new(file);
        encode::write(&mut writer, self).context("failed to serialize report")?;
        writer.flush().context("failed to flush writer stream")?;
        Ok(())
    }
}

fn type_mean(snapshot: &Snapshot, kind: &str) -> f64 {
    let mut acc = Accumulator::new();
    snapshot
        .get(kind)
        .into_iter()
        .flatten()
        .for_each(|&score| acc.add(score));
    acc.report().mean
}
