use std::process::ExitCode;

use clap::Parser;

use sumo_capacity::capacity::config::JunctionVolumeArgs;
use sumo_capacity::capacity::controller::run_junctions;

fn main() -> ExitCode {
    run_junctions(JunctionVolumeArgs::parse())
}
