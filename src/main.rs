//! Trialsync CLI entry point.

use anyhow::Result;
use clap::Parser;

use trialsync::cli::{self, commands, Cli, Commands};
use trialsync::infrastructure::logging::{LogConfig, LoggerImpl};
use trialsync::ConfigLoader;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let json_mode = cli.json;

    if let Err(err) = run(cli).await {
        cli::handle_error(&err, json_mode);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = match &cli.config {
        Some(path) => ConfigLoader::load_from_file(path)?,
        None => ConfigLoader::load()?,
    };
    let _logger = LoggerImpl::init(&LogConfig::from(&config.logging))?;

    match cli.command {
        Commands::Run(args) => commands::run::execute(args, config, cli.json).await,
        Commands::Status(args) => commands::status::execute(args, cli.json).await,
        Commands::Patch(args) => commands::patch::execute(args, cli.json).await,
        Commands::Validate(args) => commands::validate::execute(args, cli.json).await,
    }
}
