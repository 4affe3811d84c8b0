//! ECOS gateway - Main Entry Point
//!
//! Serves the HTTP API and, when enabled, the MQTT telemetry service.

use clap::{Parser, Subcommand};
use ecos_gateway::checklist::execute_all_initiatives;
use ecos_gateway::config::GatewayConfig;
use ecos_gateway::dispatcher::Dispatcher;
use ecos_gateway::gateway::{self, projects::readiness_report, AppState};
use ecos_gateway::observability::{init_default_logging, init_logging, LogFormat};
use ecos_gateway::processing::InboundProcessor;
use ecos_gateway::transport::mqtt::MqttClient;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn, Level};

/// ECOS API gateway and MQTT service
#[derive(Parser)]
#[command(name = "ecos-gateway")]
#[command(about = "ECOS API gateway, MQTT telemetry service and ecosystem brains")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Verbose logging (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP gateway (and the MQTT service when enabled)
    Serve,
    /// Validate configuration
    Config {
        /// Show the effective configuration
        #[arg(long)]
        show: bool,
    },
    /// Print checklist readiness for every initiative
    Readiness,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    init_observability(cli.verbose);

    info!("Starting ECOS gateway v{}", env!("CARGO_PKG_VERSION"));

    let config = match load_configuration(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Serve => run_gateway(config).await,
        Commands::Config { show } => handle_config_command(&config, show),
        Commands::Readiness => print_readiness(),
    };

    if let Err(e) = result {
        error!("Command failed: {}", e);
        process::exit(1);
    }

    info!("Application shutdown complete");
}

fn init_observability(verbose: u8) {
    let level = match verbose {
        0 => return init_default_logging(),
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };
    let format = LogFormat::parse(&std::env::var("LOG_FORMAT").unwrap_or_else(|_| "pretty".into()));
    init_logging(level, format, true);
}

fn load_configuration(
    config_path: &Option<PathBuf>,
) -> Result<GatewayConfig, Box<dyn std::error::Error>> {
    match config_path {
        Some(path) => {
            info!("Loading configuration from: {}", path.display());
            Ok(GatewayConfig::load_from_file(path)?)
        }
        None => {
            for path_str in ["ecos.toml", "config/ecos.toml"] {
                let path = PathBuf::from(path_str);
                if path.exists() {
                    info!("Loading configuration from: {}", path.display());
                    return Ok(GatewayConfig::load_from_file(&path)?);
                }
            }

            info!("No configuration file found; using defaults and environment");
            Ok(GatewayConfig::from_env()?)
        }
    }
}

async fn run_gateway(config: GatewayConfig) -> Result<(), Box<dyn std::error::Error>> {
    let dispatcher = Arc::new(Dispatcher::new());
    let mut state = AppState::from_config(config.clone(), dispatcher.clone())?;

    let mut mqtt_client = None;
    let mut processor = None;
    if config.mqtt.enabled {
        let mut client = MqttClient::new(config.mqtt.clone())?;
        let (sender, receiver) = InboundProcessor::channel();
        client.set_inbound_sender(sender);
        processor = Some(tokio::spawn(
            InboundProcessor::new(dispatcher.clone()).run(receiver),
        ));

        if let Err(e) = client.connect().await {
            warn!(
                broker = %config.mqtt.broker_url,
                error = %e,
                "MQTT broker unavailable; serving HTTP while the client keeps retrying"
            );
        }

        let client = Arc::new(client);
        state = state.with_transport(client.clone());
        mqtt_client = Some(client);
    } else {
        info!("MQTT disabled; control commands will not be published");
    }

    let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt())?;
    let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;
    let shutdown = async move {
        tokio::select! {
            _ = sigint.recv() => {
                info!("Received SIGINT, shutting down gracefully...");
            }
            _ = sigterm.recv() => {
                info!("Received SIGTERM, shutting down gracefully...");
            }
        }
    };

    gateway::serve(state.shared(), shutdown).await?;

    if let Some(client) = mqtt_client {
        match Arc::try_unwrap(client) {
            Ok(mut client) => {
                if let Err(e) = client.disconnect().await {
                    error!("Error during MQTT disconnect: {}", e);
                }
            }
            Err(_) => warn!("MQTT client still shared at shutdown; closing on drop"),
        }
    }

    if let Some(processor) = processor {
        processor.abort();
    }

    Ok(())
}

fn handle_config_command(
    config: &GatewayConfig,
    show: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    config.validate()?;
    if show {
        println!("Current configuration:");
        println!("{}", toml::to_string_pretty(config)?);
    }

    info!("Configuration validation complete");
    Ok(())
}

fn print_readiness() -> Result<(), Box<dyn std::error::Error>> {
    let report = readiness_report(execute_all_initiatives(None));
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
