use std::fs;
use std::process::ExitCode;

use serde::Serialize;
use tracing::{error, info};

use crate::capacity::config::{
    read_edge_selection, read_junction_selection, write_config, EdgeVolumeArgs,
    JunctionVolumeArgs, NetworkFeatureArgs, SweepConfig,
};
use crate::capacity::driver::traci::SumoBackend;
use crate::capacity::driver::SimulationBackend;
use crate::capacity::io::write_table;
use crate::capacity::logging::{init_logging, init_std_out_logging};
use crate::capacity::network::features::{connection_features, edge_features};
use crate::capacity::network::Network;
use crate::capacity::scenario::demand::MixProfile;
use crate::capacity::scenario::extract::{Netconvert, NetworkFilter};
use crate::capacity::sweep::{Sweep, SweepError, SweepReport};

const CONFIG_ERROR: u8 = 1;

pub fn run_edges(args: EdgeVolumeArgs) -> ExitCode {
    let _std_out = init_std_out_logging();
    let config = match args.sweep.validate() {
        Ok(config) => config,
        Err(e) => return fail(SweepError::from(e)),
    };

    if let Err(e) = prepare_dirs(&config) {
        return fail(e);
    }

    let _guards = init_logging(&config.settings.output, &config.runner_name);
    info!("Running vehicle profile {}", config.profile.name);
    let filter = Netconvert::new(config.tools.netconvert.clone());
    let backend = SumoBackend::new(config.tools.sumo.clone());
    finish(sweep_edges(&config, &filter, &backend))
}

pub fn run_junctions(args: JunctionVolumeArgs) -> ExitCode {
    let _std_out = init_std_out_logging();
    let (config, profiles) = match args.validate() {
        Ok(validated) => validated,
        Err(e) => return fail(SweepError::from(e)),
    };

    if let Err(e) = prepare_dirs(&config) {
        return fail(e);
    }

    let _guards = init_logging(&config.settings.output, &config.runner_name);
    let names: Vec<_> = profiles.iter().map(|p| p.name.as_str()).collect();
    info!("Running vehicle profiles {names:?}");
    let filter = Netconvert::new(config.tools.netconvert.clone());
    let backend = SumoBackend::new(config.tools.sumo.clone());
    finish(sweep_junctions(&config, &profiles, &filter, &backend))
}

pub fn run_features(args: NetworkFeatureArgs) -> ExitCode {
    let _std_out = init_std_out_logging();
    let result = Network::from_file(&args.network)
        .map_err(SweepError::from)
        .and_then(|network| {
            write_table(&connection_features(&network), &args.connections)?;
            if let Some(edges) = &args.edges {
                write_table(&edge_features(&network), edges)?;
            }
            Ok(())
        });

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => fail(e),
    }
}

/// Edge sweep over the edges of the selection, in network order.
pub fn sweep_edges<F: NetworkFilter, B: SimulationBackend>(
    config: &SweepConfig,
    filter: &F,
    backend: &B,
) -> Result<SweepReport, SweepError> {
    write_config(config, &config.settings.output, &config.runner_name)?;
    let selection = read_edge_selection(&config.input)?;
    let network = Network::from_file(&config.network)?;

    let edges: Vec<usize> = network
        .edges
        .iter()
        .enumerate()
        .filter(|(_, e)| selection.contains(&e.id))
        .map(|(i, _)| i)
        .collect();
    info!("Total number of edges: {}", edges.len());

    let sweep = Sweep {
        network: &network,
        network_path: &config.network,
        filter,
        backend,
        settings: &config.settings,
    };
    sweep.run_edges(&edges, &config.profile)
}

#[derive(Serialize)]
struct JunctionRun<'a> {
    #[serde(flatten)]
    config: &'a SweepConfig,
    profiles: &'a [MixProfile],
}

/// Junction sweep over the signalized junctions of the selection, in network order.
pub fn sweep_junctions<F: NetworkFilter, B: SimulationBackend>(
    config: &SweepConfig,
    profiles: &[MixProfile],
    filter: &F,
    backend: &B,
) -> Result<SweepReport, SweepError> {
    let run = JunctionRun { config, profiles };
    write_config(&run, &config.settings.output, &config.runner_name)?;
    let selection = read_junction_selection(&config.input)?;
    let network = Network::from_file(&config.network)?;

    let junctions: Vec<usize> = network
        .junctions
        .iter()
        .enumerate()
        .filter(|(_, j)| j.is_signalized() && selection.contains(&j.id))
        .map(|(i, _)| i)
        .collect();
    info!("Total number of traffic light junctions: {}", junctions.len());

    let sweep = Sweep {
        network: &network,
        network_path: &config.network,
        filter,
        backend,
        settings: &config.settings,
    };
    sweep.run_junctions(&junctions, profiles)
}

fn prepare_dirs(config: &SweepConfig) -> Result<(), SweepError> {
    fs::create_dir_all(&config.settings.output)?;
    fs::create_dir_all(&config.settings.work_dir)?;
    Ok(())
}

fn finish(result: Result<SweepReport, SweepError>) -> ExitCode {
    match result {
        Ok(report) => {
            report.log_summary();
            ExitCode::from(report.exit_code())
        }
        Err(e) => fail(e),
    }
}

fn fail(e: SweepError) -> ExitCode {
    error!("{e}");
    ExitCode::from(CONFIG_ERROR)
}
