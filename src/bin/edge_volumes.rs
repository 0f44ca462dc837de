use std::process::ExitCode;

use clap::Parser;

use sumo_capacity::capacity::config::EdgeVolumeArgs;
use sumo_capacity::capacity::controller::run_edges;

fn main() -> ExitCode {
    run_edges(EdgeVolumeArgs::parse())
}
