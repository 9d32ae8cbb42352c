//! SchoolBridge live-update client - command line entry point
//!
//! `run` keeps a session open and logs every inbound update, `publish` sends
//! one message, `config` validates (and optionally prints) the configuration.

use clap::{Parser, Subcommand};
use schoolbridge_live::config::{Credentials, LiveConfig};
use schoolbridge_live::live::{ConnectionState, LiveClient, PublishOutcome};
use schoolbridge_live::observability::logging::parse_level;
use schoolbridge_live::observability::{init_logging, LogFormat};
use schoolbridge_live::protocol::{OutboundMessage, Qos};
use schoolbridge_live::LiveError;
use std::env;
use std::path::PathBuf;
use std::process;
use tokio::signal;
use tracing::{error, info, warn, Level};

/// Resilient MQTT live-update client for SchoolBridge
#[derive(Parser)]
#[command(name = "schoolbridge-live")]
#[command(about = "Resilient MQTT live-update client for SchoolBridge")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE", env = "SCHOOLBRIDGE_CONFIG")]
    config: Option<PathBuf>,

    /// Verbose logging (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect, subscribe to the configured topics and log every update
    Run,
    /// Publish a single message and exit
    Publish {
        #[arg(short, long)]
        topic: String,
        #[arg(short, long)]
        message: String,
        /// Delivery level: 0, 1 or 2
        #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u8).range(0..=2))]
        qos: u8,
        #[arg(long)]
        retain: bool,
    },
    /// Validate the configuration
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => parse_level(&env::var("LOG_LEVEL").unwrap_or_default()),
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };
    let format = LogFormat::parse(&env::var("LOG_FORMAT").unwrap_or_default());
    init_logging(level, format, false);

    info!("Starting schoolbridge-live v{}", env!("CARGO_PKG_VERSION"));

    let config = match load_configuration(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Run => run_client(config).await,
        Commands::Publish {
            topic,
            message,
            qos,
            retain,
        } => publish_once(config, topic, message, qos, retain).await,
        Commands::Config { show } => handle_config_command(config, show),
    };

    if let Err(e) = result {
        error!("Command failed: {}", e);
        process::exit(1);
    }

    info!("Shutdown complete");
}

fn load_configuration(
    config_path: &Option<PathBuf>,
) -> Result<LiveConfig, Box<dyn std::error::Error>> {
    if let Some(path) = config_path {
        info!("Loading configuration from: {}", path.display());
        return Ok(LiveConfig::load_from_file(path)?);
    }

    let default_paths = ["schoolbridge.toml", "config/schoolbridge.toml"];
    for path_str in default_paths {
        let path = PathBuf::from(path_str);
        if path.exists() {
            info!("Loading configuration from: {}", path.display());
            return Ok(LiveConfig::load_from_file(&path)?);
        }
    }

    Err("no configuration file found; pass -c/--config or create schoolbridge.toml".into())
}

fn build_client(config: &LiveConfig) -> Result<LiveClient, LiveError> {
    let credentials = Credentials::from_env(&config.mqtt);
    if credentials.is_none() {
        warn!("No credentials in the environment, connecting anonymously");
    }
    LiveClient::from_config(config, credentials)
}

/// Connect, treating a slow broker as "still retrying" rather than fatal
async fn connect(client: &LiveClient) -> Result<(), LiveError> {
    match client.connect().await {
        Err(LiveError::ConnectTimeout(timeout)) => {
            warn!(?timeout, "Broker not reachable yet, retrying in the background");
            Ok(())
        }
        other => other,
    }
}

async fn run_client(config: LiveConfig) -> Result<(), Box<dyn std::error::Error>> {
    let client = build_client(&config)?;

    let updates = client
        .add_handler("#", |message| {
            info!(
                topic = %message.topic,
                bytes = message.payload.len(),
                qos = %message.qos,
                retain = message.retain,
                payload = %String::from_utf8_lossy(&message.payload),
                "Live update"
            );
            Ok(())
        })
        .await?;

    connect(&client).await?;
    info!(
        subscriptions = config.subscriptions.len(),
        "Live client running, waiting for updates"
    );

    let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt())?;
    let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;

    tokio::select! {
        _ = sigint.recv() => {
            info!("Received SIGINT, shutting down gracefully...");
        }
        _ = sigterm.recv() => {
            info!("Received SIGTERM, shutting down gracefully...");
        }
        _ = client.wait_for_state(ConnectionState::Disconnected) => {
            let last_error = client.snapshot().last_error;
            error!(error = ?last_error, "Connection permanently lost");
        }
    }

    updates.remove();
    client.disconnect().await?;
    info!(
        metrics = %serde_json::to_string(&client.metrics())?,
        "Final metrics"
    );
    Ok(())
}

async fn publish_once(
    config: LiveConfig,
    topic: String,
    message: String,
    qos: u8,
    retain: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let qos = Qos::try_from(qos)?;
    let client = build_client(&config)?;
    client.connect().await?;

    let outbound = OutboundMessage::new(topic.as_str(), message, qos).retained(retain);
    match client.publish_message(outbound).await? {
        PublishOutcome::Sent => info!(%topic, %qos, "Message published"),
        PublishOutcome::Queued { depth } => {
            warn!(%topic, depth, "Connection lost before publish, message not sent")
        }
    }

    client.disconnect().await?;
    Ok(())
}

fn handle_config_command(config: LiveConfig, show: bool) -> Result<(), Box<dyn std::error::Error>> {
    if show {
        println!("Current configuration:");
        println!("{}", toml::to_string_pretty(&config)?);
    }

    info!("Configuration validation complete");
    Ok(())
}
