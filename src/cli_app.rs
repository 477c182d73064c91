//! CLI surface (§10.4): three subcommands sharing global flags, dispatching
//! to a `run` function so exit-code selection happens in exactly one place.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::core::config::Config;
use crate::core::errors::PredictorError;

/// Model lifecycle and prediction service for urban taxi trip duration estimation.
#[derive(Debug, Parser)]
#[command(name = "tdp", version, about)]
pub struct Cli {
    /// Subcommand to run; defaults to `serve` when omitted.
    #[command(subcommand)]
    pub command: Option<Command>,

    /// Path to a TOML configuration file (equivalent to `PREDICTOR_CONFIG`).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Machine-readable output for `scan`/`train`.
    #[arg(long, global = true)]
    pub json: bool,

    /// Increase log verbosity.
    #[arg(long, global = true, conflicts_with = "quiet")]
    pub verbose: bool,

    /// Decrease log verbosity.
    #[arg(long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,
}

/// The three subcommands of §6.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the supervisor: bootstrap if needed, serve HTTP, supervise subprocesses.
    Serve,
    /// Run bootstrap training once and exit.
    Train,
    /// Print the ranked registry scan result and exit.
    Scan,
}

/// Dispatch to the selected subcommand. All error formatting and exit-code
/// selection happens here; `main` only needs the returned code.
pub fn run(cli: &Cli) -> i32 {
    let config = match Config::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("tdp: {err}");
            return exit_code_for(&err);
        }
    };

    let command = cli.command.as_ref().unwrap_or(&Command::Serve);
    let result = match command {
        Command::Serve => crate::supervisor::run(config),
        Command::Train => run_train(&config, cli.json),
        Command::Scan => run_scan(&config, cli.json),
    };

    match result {
        Ok(()) => 0,
        Err(err) => {
            eprintln!("tdp: {err}");
            exit_code_for(&err)
        }
    }
}

fn run_train(config: &Config, json: bool) -> crate::core::errors::Result<()> {
    let result = crate::bootstrap::train(config)?;
    if json {
        println!(
            "{}",
            serde_json::json!({
                "run_id": result.run_id,
                "artifact_dir": result.artifact_dir.display().to_string(),
                "rmse": result.rmse,
            })
        );
    } else {
        println!(
            "trained run {} (rmse={:.3}) at {}",
            result.run_id,
            result.rmse,
            result.artifact_dir.display()
        );
    }
    Ok(())
}

fn run_scan(config: &Config, json: bool) -> crate::core::errors::Result<()> {
    let scan_result = crate::registry::scan(config)?;
    if scan_result.is_empty() {
        return Err(PredictorError::NoModelAvailable {
            root: config.model_registry_root.clone(),
        });
    }

    if json {
        let candidates: Vec<_> = scan_result
            .candidates
            .iter()
            .map(|c| {
                serde_json::json!({
                    "run_id": c.run_id,
                    "rmse": c.metadata.rmse,
                    "trained_at": c.metadata.trained_at,
                })
            })
            .collect();
        println!("{}", serde_json::json!({ "candidates": candidates }));
    } else {
        for (rank, candidate) in scan_result.candidates.iter().enumerate() {
            println!(
                "{}. {} rmse={:.3} trained_at={}",
                rank + 1,
                candidate.run_id,
                candidate.metadata.rmse,
                candidate.metadata.trained_at
            );
        }
    }
    Ok(())
}

/// Exit codes per §6: 0 success, 1 generic error, 2 configuration error, 3 no model available.
fn exit_code_for(err: &PredictorError) -> i32 {
    match err {
        PredictorError::Configuration { .. } => 2,
        PredictorError::NoModelAvailable { .. } => 3,
        _ => 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_code_mapping_matches_spec() {
        assert_eq!(exit_code_for(&PredictorError::config("x")), 2);
        assert_eq!(
            exit_code_for(&PredictorError::NoModelAvailable { root: PathBuf::from("/x") }),
            3
        );
        assert_eq!(exit_code_for(&PredictorError::NotInitialized), 1);
    }

    #[test]
    fn serve_is_the_default_command() {
        let cli = Cli::parse_from(["tdp"]);
        assert!(cli.command.is_none());
    }

    #[test]
    fn scan_subcommand_parses() {
        let cli = Cli::parse_from(["tdp", "scan", "--json"]);
        assert!(matches!(cli.command, Some(Command::Scan)));
        assert!(cli.json);
    }
}
