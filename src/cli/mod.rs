//! Command line interface.

pub mod commands;
pub mod output;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use commands::{patch::PatchArgs, run::RunArgs, status::StatusArgs, validate::ValidateArgs};

#[derive(Parser, Debug)]
#[command(name = "trialsync")]
#[command(about = "Synchronize optimization experiments and trials with a remote server", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Output in JSON format
    #[arg(short, long, global = true)]
    pub json: bool,

    /// Configuration file; defaults to .trialsync/config.yaml and .trialsync/local.yaml
    #[arg(short, long, global = true, env = "TRIALSYNC_CONFIG")]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the controller against a state file
    Run(RunArgs),

    /// Show experiments and their trials
    Status(StatusArgs),

    /// Render the patches of a trial without applying them
    Patch(PatchArgs),

    /// Check assignments against an experiment's parameters
    Validate(ValidateArgs),
}

/// Report a failed command and exit with a non-zero status.
pub fn handle_error(err: &anyhow::Error, json_mode: bool) -> ! {
    if json_mode {
        let body = serde_json::json!({
            "success": false,
            "error": format!("{err:#}"),
        });
        eprintln!("{}", serde_json::to_string_pretty(&body).unwrap_or_default());
    } else {
        eprintln!("Error: {err:#}");
    }
    std::process::exit(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_validate() {
        let cli = Cli::try_parse_from([
            "trialsync",
            "--json",
            "validate",
            "--state",
            "state.yaml",
            "tuning/exp",
            "--assign",
            "cpu=500",
            "--assign",
            "memory=128",
        ])
        .unwrap();
        assert!(cli.json);
        let Commands::Validate(args) = cli.command else {
            panic!("expected validate");
        };
        assert_eq!(args.experiment, "tuning/exp");
        assert_eq!(args.assign, vec![("cpu".to_string(), 500), ("memory".to_string(), 128)]);
    }

    #[test]
    fn test_rejects_malformed_assignment() {
        let result = Cli::try_parse_from([
            "trialsync", "validate", "--state", "s.yaml", "exp", "--assign", "cpu",
        ]);
        assert!(result.is_err());
    }
}
