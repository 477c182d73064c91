#![forbid(unsafe_code)]
//! tdp — trip duration prediction service CLI entry point.

use clap::Parser;
use trip_duration_predictor::cli_app::{self, Cli};

fn main() {
    let cli = Cli::parse();
    let exit_code = cli_app::run(&cli);
    std::process::exit(exit_code);
}
