//! Shutter capture agent entry point.
//!
//! ```text
//! shutter-agent                   Run with stdin console (foreground)
//! shutter-agent --headless        Run without reading stdin
//! shutter-agent --config <path>   Load a custom config TOML
//! shutter-agent --endpoint <url>  Override the controller address
//! shutter-agent --gen-config      Write default config to stdout
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use shutter_agent::config::{AgentConfig, ConfigError};
use shutter_agent::presentation::{LogPresentation, spawn_event_logger};
use shutter_agent::reencode::JpegReencoder;
use shutter_agent::sensor::{FileSensor, local_ip_toward};
use shutter_agent::console;
use shutter_core::{ArtifactPipeline, CaptureController, DirectoryStorage, SessionOrchestrator};

// ── CLI ──────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "shutter-agent", about = "Remote-triggered capture agent")]
struct Cli {
    /// Path to configuration TOML file.
    #[arg(short, long, default_value = "shutter-agent.toml")]
    config: PathBuf,

    /// Controller address, overriding `network.endpoint`.
    #[arg(short, long)]
    endpoint: Option<String>,

    /// Do not read commands from stdin.
    #[arg(long)]
    headless: bool,

    /// Print the default configuration to stdout and exit.
    #[arg(long)]
    gen_config: bool,
}

// ── Main ─────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // --gen-config: dump defaults and exit.
    if cli.gen_config {
        let text = toml::to_string_pretty(&AgentConfig::default())?;
        println!("{text}");
        return Ok(());
    }

    // Load config. Problems are reported once tracing is up.
    let (mut config, load_error) = match AgentConfig::load(&cli.config) {
        Ok(config) => (config, None),
        Err(e) => (AgentConfig::default(), Some(e)),
    };
    if let Some(endpoint) = cli.endpoint {
        config.network.endpoint = endpoint;
    }

    // Init tracing.
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match load_error {
        Some(e @ ConfigError::Missing(_)) => info!("{e}; using defaults"),
        Some(e) => warn!("{e}; using defaults"),
        None => {}
    }

    let orchestrator_config = config.to_orchestrator_config()?;
    let readiness = config.readiness_policy();

    info!("shutter-agent v{}", env!("CARGO_PKG_VERSION"));
    info!("controller: {}", orchestrator_config.endpoint);
    info!("source: {}", config.sensor.source.display());
    info!("readiness ceiling: {:?}", readiness.ceiling);

    // Sensor.
    let device_tag = if config.sensor.device_tag.is_empty() {
        match local_ip_toward(&orchestrator_config.endpoint).await {
            Some(ip) => ip.to_string(),
            None => {
                warn!("could not determine local address; device tag left empty");
                String::new()
            }
        }
    } else {
        config.sensor.device_tag.clone()
    };
    info!("device tag: {device_tag:?}");
    let sensor = FileSensor::new(
        &config.sensor.source,
        Duration::from_millis(config.sensor.warmup_ms),
        device_tag,
    );
    let controller = CaptureController::new(Arc::new(sensor), readiness);

    // Artifact pipeline.
    let mut pipeline = ArtifactPipeline::new(config.artifact_policy(), Arc::new(JpegReencoder));
    if config.storage.enabled {
        info!("saving copies to {}", config.storage.directory.display());
        pipeline = pipeline.with_storage(Arc::new(DirectoryStorage::new(
            &config.storage.directory,
            config.storage.permission_granted,
        )));
    }

    let (orchestrator, handle) = SessionOrchestrator::new(
        orchestrator_config,
        controller,
        Arc::new(pipeline),
        Arc::new(LogPresentation),
    );
    spawn_event_logger(&handle);

    if !cli.headless {
        let console_handle = handle.clone();
        tokio::spawn(async move {
            if let Err(e) = console::run(console_handle).await {
                warn!("console stopped: {e}");
            }
        });
    }

    // Ctrl-C handler.
    let stop = handle.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Ctrl-C received; shutting down");
        let _ = stop.shutdown().await;
    });

    drop(handle);
    orchestrator.run().await;

    Ok(())
}
