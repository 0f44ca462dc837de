use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};

use ahash::HashSet;
use clap::{Args, Parser};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::capacity::io::{create_writer, open_reader};
use crate::capacity::scenario::demand::{MixProfile, VehicleShares};
use crate::capacity::sweep::{SweepSettings, SweepSettingsBuilder, SweepSettingsBuilderError};

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("vehicle shares must not all be zero")]
    NoVehicleShares,
    #[error("vehicle shares must be finite and non-negative, got {0:?}")]
    InvalidShare(VehicleShares),
    #[error("input file {0:?} does not exist")]
    MissingInput(PathBuf),
    #[error("SUMO installation unknown. Set --sumo-home or the SUMO_HOME environment variable")]
    MissingSumoHome,
    #[error("SUMO tool {0:?} not found")]
    MissingTool(PathBuf),
    #[error("runner index {index} is out of range for {total} runners")]
    InvalidRunner { index: usize, total: usize },
    #[error("step length must be positive, got {0}")]
    StepLength(f64),
    #[error("could not read profiles from {path:?}: {source}")]
    Profiles {
        path: PathBuf,
        source: serde_yaml::Error,
    },
    #[error("profile file {0:?} defines no profiles")]
    NoProfiles(PathBuf),
    #[error("profile {0} is defined more than once")]
    DuplicateProfile(String),
    #[error("selection {path:?} is invalid: {reason}")]
    Selection { path: PathBuf, reason: String },
    #[error(transparent)]
    Csv(#[from] csv::Error),
    #[error(transparent)]
    Settings(#[from] SweepSettingsBuilderError),
    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Arguments shared by the sweep tools.
#[derive(Args, Debug, Clone)]
pub struct SweepArgs {
    /// Selection of entities to process
    pub input: PathBuf,
    /// Directory for result tables and logs
    #[arg(long, default_value = "output")]
    pub output: PathBuf,
    /// Network to extract scenarios from (.net.xml or .net.xml.gz)
    #[arg(long)]
    pub network: PathBuf,
    /// SUMO installation containing bin/sumo and bin/netconvert
    #[arg(long, env = "SUMO_HOME")]
    pub sumo_home: Option<PathBuf>,
    /// Share of conventional vehicles
    #[arg(long, default_value_t = 1.0)]
    pub cv: f64,
    /// Share of automated vehicles
    #[arg(long, default_value_t = 0.0)]
    pub av: f64,
    /// Share of connected automated vehicles
    #[arg(long, default_value_t = 0.0)]
    pub acv: f64,
    /// Start from this entity
    #[arg(long, default_value_t = 0)]
    pub from_index: usize,
    /// Stop before this entity
    #[arg(long)]
    pub to_index: Option<usize>,
    /// Simulated seconds per step
    #[arg(long, default_value_t = 0.2)]
    pub step_length: f64,
    /// Work directory of this runner
    #[arg(long, default_value = "runner0")]
    pub runner: PathBuf,
    /// Total number of runners sharing the selection
    #[arg(long, default_value_t = 0)]
    pub runner_total: usize,
    /// Index of this runner
    #[arg(long, default_value_t = 0)]
    pub runner_index: usize,
}

#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "Determine edge capacities with SUMO", long_about = None)]
pub struct EdgeVolumeArgs {
    #[command(flatten)]
    pub sweep: SweepArgs,
}

#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "Determine junction capacities with SUMO", long_about = None)]
pub struct JunctionVolumeArgs {
    #[command(flatten)]
    pub sweep: SweepArgs,
    /// YAML file with named vehicle profiles. Replaces --cv/--av/--acv
    #[arg(long)]
    pub profiles: Option<PathBuf>,
}

#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "Write connection and edge features of a network", long_about = None)]
pub struct NetworkFeatureArgs {
    pub network: PathBuf,
    /// One row per connection
    #[arg(long, default_value = "connections.csv")]
    pub connections: PathBuf,
    /// One row per edge
    #[arg(long)]
    pub edges: Option<PathBuf>,
}

/// Locations of the SUMO binaries.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SumoTools {
    pub sumo: PathBuf,
    pub netconvert: PathBuf,
}

impl SumoTools {
    pub fn from_home(home: &Path) -> Result<Self, ConfigError> {
        let tools = SumoTools {
            sumo: binary(home, "sumo"),
            netconvert: binary(home, "netconvert"),
        };
        for tool in [&tools.sumo, &tools.netconvert] {
            if !tool.is_file() {
                return Err(ConfigError::MissingTool(tool.clone()));
            }
        }
        Ok(tools)
    }
}

fn binary(home: &Path, name: &str) -> PathBuf {
    let bin = home.join("bin");
    if cfg!(windows) {
        bin.join(format!("{name}.exe"))
    } else {
        bin.join(name)
    }
}

/// Validated settings of one sweep run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SweepConfig {
    pub input: PathBuf,
    pub network: PathBuf,
    pub tools: SumoTools,
    pub profile: MixProfile,
    pub settings: SweepSettings,
    /// Used to name per runner files.
    pub runner_name: String,
}

impl SweepArgs {
    pub fn validate(&self) -> Result<SweepConfig, ConfigError> {
        for path in [&self.input, &self.network] {
            if !path.is_file() {
                return Err(ConfigError::MissingInput(path.clone()));
            }
        }
        let home = self.sumo_home.as_ref().ok_or(ConfigError::MissingSumoHome)?;
        let tools = SumoTools::from_home(home)?;

        let shares = VehicleShares::new(self.cv, self.av, self.acv);
        let mix = shares.normalize()?;
        let name = format!(
            "cv{:.2}_av{:.2}_acv{:.2}",
            mix.conventional, mix.automated, mix.connected_automated
        );

        if !(self.step_length.is_finite() && self.step_length > 0.) {
            return Err(ConfigError::StepLength(self.step_length));
        }
        if self.runner_total > 1 && self.runner_index >= self.runner_total {
            return Err(ConfigError::InvalidRunner {
                index: self.runner_index,
                total: self.runner_total,
            });
        }

        let settings = SweepSettingsBuilder::default()
            .output(self.output.clone())
            .work_dir(self.runner.clone())
            .step_length(self.step_length)
            .from_index(self.from_index)
            .to_index(self.to_index)
            .runner_total(self.runner_total)
            .runner_index(self.runner_index)
            .build()?;

        Ok(SweepConfig {
            input: self.input.clone(),
            network: self.network.clone(),
            tools,
            profile: MixProfile::from_shares(name, shares),
            settings,
            runner_name: runner_name(&self.runner),
        })
    }
}

fn runner_name(runner: &Path) -> String {
    runner
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "runner".to_string())
}

impl JunctionVolumeArgs {
    /// The sweep configuration and the profiles to evaluate. Without a profile file the vehicle
    /// shares form the only profile.
    pub fn validate(&self) -> Result<(SweepConfig, Vec<MixProfile>), ConfigError> {
        let config = self.sweep.validate()?;
        let profiles = match &self.profiles {
            Some(path) => load_profiles(path)?,
            None => vec![config.profile.clone()],
        };
        Ok((config, profiles))
    }
}

#[derive(Debug, Deserialize)]
struct ProfileFile {
    profiles: Vec<MixProfile>,
}

pub fn load_profiles(path: &Path) -> Result<Vec<MixProfile>, ConfigError> {
    if !path.is_file() {
        return Err(ConfigError::MissingInput(path.to_path_buf()));
    }
    let file: ProfileFile =
        serde_yaml::from_reader(open_reader(path)?).map_err(|source| ConfigError::Profiles {
            path: path.to_path_buf(),
            source,
        })?;
    if file.profiles.is_empty() {
        return Err(ConfigError::NoProfiles(path.to_path_buf()));
    }

    let mut names = HashSet::default();
    for profile in &file.profiles {
        if !names.insert(profile.name.as_str()) {
            return Err(ConfigError::DuplicateProfile(profile.name.clone()));
        }
        profile.shares.normalize()?;
    }
    info!("Loaded {} profiles from {path:?}", file.profiles.len());
    Ok(file.profiles)
}

/// Stores the resolved settings next to the results as `run_config_<runner>.yml`.
pub fn write_config<T: Serialize>(config: &T, output: &Path, runner: &str) -> Result<(), ConfigError> {
    let path = output.join(format!("run_config_{runner}.yml"));
    let mut writer = create_writer(&path)?;
    serde_yaml::to_writer(&mut writer, config)?;
    writer.flush()?;
    Ok(())
}

/// Edge ids from the `edgeId` column of a csv file.
pub fn read_edge_selection(path: &Path) -> Result<HashSet<String>, ConfigError> {
    let mut reader = csv::Reader::from_reader(open_reader(path)?);
    let column = reader
        .headers()?
        .iter()
        .position(|h| h == "edgeId")
        .ok_or_else(|| ConfigError::Selection {
            path: path.to_path_buf(),
            reason: "missing column 'edgeId'".to_string(),
        })?;

    let mut selection = HashSet::default();
    for record in reader.records() {
        if let Some(id) = record?.get(column) {
            selection.insert(id.to_string());
        }
    }
    Ok(selection)
}

/// Junction ids, one per line.
pub fn read_junction_selection(path: &Path) -> Result<HashSet<String>, ConfigError> {
    let mut selection = HashSet::default();
    for line in open_reader(path)?.lines() {
        let line = line?;
        let id = line.trim();
        if !id.is_empty() {
            selection.insert(id.to_string());
        }
    }
    Ok(selection)
}
