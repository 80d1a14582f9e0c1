use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use incident_common::Config;
use incident_orchestrator::Orchestrator;
use incident_pipeline_core::wiring::ExternalPorts;
use incident_pipeline_core::PipelineRuntime;
use tokio::signal;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "incident-pipeline", version, about = "Incident Pipeline Core")]
struct Cli {
    /// Path to the TOML configuration file; missing sections fall back to defaults.
    #[arg(long, default_value = "./config/pipeline.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    info!(config_path = %cli.config.display(), "starting incident pipeline core");

    let config = Arc::new(Config::load(&cli.config)?);
    let runtime = PipelineRuntime::build(config, ExternalPorts::default()).await?;

    info!("pipeline runtime wired, awaiting signals");
    run(runtime).await
}

async fn run(runtime: PipelineRuntime) -> anyhow::Result<()> {
    #[cfg(unix)]
    let mut reload_signal = signal::unix::signal(signal::unix::SignalKind::hangup())?;

    loop {
        #[cfg(unix)]
        let reload = reload_signal.recv();
        #[cfg(not(unix))]
        let reload = std::future::pending::<Option<()>>();

        tokio::select! {
            _ = reload => {
                info!("reload signal received, swapping rule set and sop catalog");
                if let Err(e) = runtime.reload().await {
                    error!(error = %e, "reload failed, keeping previous snapshot");
                }
            }
            _ = signal::ctrl_c() => {
                info!("shutdown signal received");
                break;
            }
        }
    }

    if let Err(e) = runtime.orchestrator.shutdown().await {
        error!(error = %e, "error during shutdown");
    }
    info!("incident pipeline core stopped");
    Ok(())
}
