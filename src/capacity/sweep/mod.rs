//! Top level loop: for every selected entity, run one scenario per sweep point and store the
//! resulting flows as one table per entity.

use std::fs;
use std::ops::Range;
use std::path::{Path, PathBuf};

use derive_builder::Builder;
use serde::Serialize;
use tracing::{info, warn};

use crate::capacity::aggregate::{aggregate_dir, AggregationError, Throughput};
use crate::capacity::config::ConfigError;
use crate::capacity::driver::{self, SimOverrides, SimulationBackend, SimulationError};
use crate::capacity::io::write_table;
use crate::capacity::network::{Network, ParseError};
use crate::capacity::scenario::extract::{ExternalToolError, NetworkFilter};
use crate::capacity::scenario::{Scenario, ScenarioError, ScenarioFiles};

pub mod edges;
pub mod junctions;

/// Demand scales 1.00, 1.05, ..., 2.00.
pub fn scale_points() -> Vec<f64> {
    (0..=20).map(|i| 1.0 + 0.05 * i as f64).collect()
}

#[derive(Debug, Clone, PartialEq)]
pub enum SweepPoint {
    Scale(f64),
    Profile(String),
}

impl SweepPoint {
    pub fn label(&self) -> String {
        match self {
            SweepPoint::Scale(scale) => format!("{scale:.2}"),
            SweepPoint::Profile(name) => name.clone(),
        }
    }
}

/// One row of an entity's result table.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowResult {
    pub junction_id: Option<String>,
    pub edge_id: Option<String>,
    pub from_edge_id: Option<String>,
    pub to_edge_id: Option<String>,
    pub sweep_point: String,
    /// Veh/h.
    pub flow: f64,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Builder)]
#[builder(pattern = "owned")]
pub struct SweepSettings {
    #[builder(default = "PathBuf::from(\"output\")")]
    pub output: PathBuf,
    /// Directory holding the artifacts of the scenario being simulated.
    #[builder(default = "PathBuf::from(\"runner0\")")]
    pub work_dir: PathBuf,
    #[builder(default = "0.2")]
    pub step_length: f64,
    #[builder(default)]
    pub from_index: usize,
    #[builder(default)]
    pub to_index: Option<usize>,
    #[builder(default)]
    pub runner_total: usize,
    #[builder(default)]
    pub runner_index: usize,
}

/// Block `index` of `total` nearly equal contiguous blocks of `0..n`.
pub fn partition_range(n: usize, total: usize, index: usize) -> Range<usize> {
    (index * n / total)..((index + 1) * n / total)
}

/// Entities handled by this runner. An explicit index range applies when the work is not
/// partitioned across runners.
pub fn resolve_range(n: usize, settings: &SweepSettings) -> Range<usize> {
    if settings.runner_total > 1 {
        return partition_range(n, settings.runner_total, settings.runner_index);
    }
    let end = settings.to_index.map_or(n, |to| to.min(n));
    settings.from_index.min(end)..end
}

/// Failure of a single sweep point or entity. The sweep continues with the next one.
#[derive(thiserror::Error, Debug)]
pub enum PointError {
    #[error(transparent)]
    Filter(#[from] ExternalToolError),
    #[error(transparent)]
    Scenario(#[from] ScenarioError),
    #[error(transparent)]
    Simulation(#[from] SimulationError),
    #[error(transparent)]
    Aggregation(#[from] AggregationError),
}

/// Failures that end the whole run.
#[derive(thiserror::Error, Debug)]
pub enum SweepError {
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("could not write result table: {0}")]
    Table(#[from] csv::Error),
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct SweepReport {
    pub processed: Vec<String>,
    /// Entities without a result table, with the reason.
    pub skipped: Vec<(String, String)>,
    pub failed_points: usize,
}

impl SweepReport {
    /// 0 if everything succeeded, 2 if any entity was skipped or any sweep point failed.
    pub fn exit_code(&self) -> u8 {
        if self.skipped.is_empty() && self.failed_points == 0 {
            0
        } else {
            2
        }
    }

    pub fn log_summary(&self) {
        info!(
            "Processed {} entities, skipped {}, {} failed sweep points.",
            self.processed.len(),
            self.skipped.len(),
            self.failed_points
        );
        for (id, reason) in &self.skipped {
            warn!("Skipped {id}: {reason}");
        }
    }

    fn finish_entity(&mut self, id: &str, rows: &[FlowResult], output: &Path) -> Result<(), SweepError> {
        if rows.is_empty() {
            warn!("No sweep point of {id} produced a result");
            self.skipped
                .push((id.to_string(), "no successful sweep point".to_string()));
        } else {
            write_table(rows, &output.join(format!("{id}.csv")))?;
            self.processed.push(id.to_string());
        }
        Ok(())
    }

    fn skip_entity(&mut self, id: &str, error: &PointError) {
        warn!("Skipping {id}: {error}");
        self.skipped.push((id.to_string(), error.to_string()));
    }
}

/// Shared context of a sweep over the entities of one network.
pub struct Sweep<'a, F: NetworkFilter, B: SimulationBackend> {
    pub network: &'a Network,
    /// The network file the scenarios are cropped from.
    pub network_path: &'a Path,
    pub filter: &'a F,
    pub backend: &'a B,
    pub settings: &'a SweepSettings,
}

impl<F: NetworkFilter, B: SimulationBackend> Sweep<'_, F, B> {
    /// Creates the work directory if needed. Files from a previous entity are overwritten later.
    fn work_files(&self) -> Result<ScenarioFiles, PointError> {
        fs::create_dir_all(&self.settings.work_dir).map_err(ScenarioError::from)?;
        Ok(ScenarioFiles::in_dir(&self.settings.work_dir))
    }

    /// Writes the scenario, simulates it and aggregates the detector output. A simulation that
    /// fails midway is still aggregated.
    fn simulate_point(
        &self,
        scenario: &Scenario,
        files: &ScenarioFiles,
        overrides: &SimOverrides,
    ) -> Result<Throughput, PointError> {
        scenario.write(files)?;
        let outcome = driver::run(
            self.backend,
            &files.config,
            overrides,
            scenario.timing.steps(),
        )?;
        if let Some(failure) = &outcome.failure {
            warn!(
                "Aggregating partial output after {} steps ({failure})",
                outcome.steps_completed
            );
        }
        Ok(aggregate_dir(&files.detector_output)?)
    }
}

fn log_progress(done: usize, total: usize) {
    info!("[{done} / {total}]");
}
