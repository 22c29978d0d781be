//! `run`: drive the controller over a YAML state file.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;
use serde::Serialize;
use tracing::{info, warn};

use crate::adapters::server::HttpOptimizationServer;
use crate::cli::commands::load_store;
use crate::cli::output::{output, CommandOutput};
use crate::domain::models::{Config, TrialPhase};
use crate::domain::ports::OptimizationServer;
use crate::services::{derive_phase, ControllerManager, MetricCapture};

#[derive(Args, Debug)]
pub struct RunArgs {
    /// YAML state file seeding the in-memory object store
    #[arg(short, long)]
    pub state: PathBuf,

    /// Where to write the final state; defaults to the state file itself
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Keep reconciling until interrupted instead of stopping once idle
    #[arg(short, long)]
    pub watch: bool,

    /// Skip the server availability check
    #[arg(long)]
    pub skip_check: bool,
}

#[derive(Debug, Serialize)]
pub struct RunOutput {
    pub state_file: String,
    pub experiments: usize,
    pub trials: usize,
    pub completed: usize,
    pub failed: usize,
}

impl CommandOutput for RunOutput {
    fn to_human(&self) -> String {
        format!(
            "Reconciled {} experiment(s) with {} trial(s): {} completed, {} failed\nState written to {}",
            self.experiments, self.trials, self.completed, self.failed, self.state_file
        )
    }
}

pub async fn execute(args: RunArgs, config: Config, json_mode: bool) -> Result<()> {
    let store = Arc::new(load_store(&args.state)?);
    let server = Arc::new(
        HttpOptimizationServer::new(&config.server).context("Failed to configure optimization server client")?,
    );
    if !args.skip_check {
        server
            .check_available()
            .await
            .with_context(|| format!("Optimization server at {} is not available", config.server.address))?;
    }
    let metrics = MetricCapture::new(config.metrics.clone()).context("Failed to configure metric capture")?;

    let manager = ControllerManager::new(store.clone(), server, metrics, config.controller.clone());
    let shutdown = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "unable to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    info!(state = %args.state.display(), watch = args.watch, "starting controller");
    if args.watch {
        manager.run(shutdown).await?;
    } else {
        manager.run_until_idle(shutdown).await?;
    }

    let path = args.output.unwrap_or(args.state);
    store
        .save_yaml_file(&path)
        .await
        .with_context(|| format!("Failed to write state to {}", path.display()))?;

    let snapshot = store.snapshot().await;
    let phases: Vec<TrialPhase> = snapshot.trials.iter().map(derive_phase).collect();
    let result = RunOutput {
        state_file: path.display().to_string(),
        experiments: snapshot.experiments.len(),
        trials: snapshot.trials.len(),
        completed: phases.iter().filter(|p| **p == TrialPhase::Completed).count(),
        failed: phases.iter().filter(|p| **p == TrialPhase::Failed).count(),
    };
    output(&result, json_mode);
    Ok(())
}
