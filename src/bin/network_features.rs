use std::process::ExitCode;

use clap::Parser;

use sumo_capacity::capacity::config::NetworkFeatureArgs;
use sumo_capacity::capacity::controller::run_features;

fn main() -> ExitCode {
    run_features(NetworkFeatureArgs::parse())
}
