//! MQTT Communicator - Command Line Entry Point

use clap::{Parser, Subcommand};
use mqtt_communicator::communicator::{CommunicatorOptions, Message, MqttCommunicator};
use mqtt_communicator::config::CommunicatorConfig;
use mqtt_communicator::observability::init_default_logging;
use mqtt_communicator::transport::mqtt::RumqttcClient;
use serde_json::json;
use signal_hook::consts::{SIGINT, SIGTERM};
use std::path::PathBuf;
use std::process;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info};
use uuid::Uuid;

/// How long a single wait in the listen loop lasts before re-checking signals
const LISTEN_SLICE: Duration = Duration::from_millis(200);

/// Blocking MQTT communicator
#[derive(Parser)]
#[command(name = "mqtt-communicator")]
#[command(about = "Send and receive MQTT messages through a blocking communicator")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print received messages as JSON lines until interrupted
    Listen {
        /// Stop after this many messages
        #[arg(long)]
        count: Option<usize>,
        /// Stop when no message arrives for this many milliseconds
        #[arg(long, value_name = "MS")]
        timeout_ms: Option<u64>,
    },
    /// Publish one message
    Send {
        /// Payload text
        #[arg(short, long)]
        message: String,
        /// Topic to publish to instead of the configured one
        #[arg(short, long)]
        topic: Option<String>,
    },
    /// Validate configuration
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
    },
}

fn main() {
    let cli = Cli::parse();

    init_default_logging();

    let config = match load_configuration(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Listen { count, timeout_ms } => {
            run_listen(&config, count, timeout_ms.map(Duration::from_millis))
        }
        Commands::Send { message, topic } => run_send(&config, &message, topic.as_deref()),
        Commands::Config { show } => handle_config_command(&config, show),
    };

    if let Err(e) = result {
        error!("Command failed: {}", e);
        process::exit(1);
    }
}

fn load_configuration(
    config_path: &Option<PathBuf>,
) -> Result<CommunicatorConfig, Box<dyn std::error::Error>> {
    match config_path {
        Some(path) => {
            info!("Loading configuration from: {}", path.display());
            Ok(CommunicatorConfig::load_from_file(path)?)
        }
        None => {
            let default_paths = ["communicator.toml", "config/communicator.toml"];

            for path_str in default_paths {
                let path = PathBuf::from(path_str);
                if path.exists() {
                    info!("Loading configuration from: {}", path.display());
                    return Ok(CommunicatorConfig::load_from_file(&path)?);
                }
            }

            Err("No configuration file found. Provide one with -c/--config or create communicator.toml".into())
        }
    }
}

fn run_listen(
    config: &CommunicatorConfig,
    count: Option<usize>,
    idle_timeout: Option<Duration>,
) -> Result<(), Box<dyn std::error::Error>> {
    // Signals keep their default action until connected; connect may block forever
    let communicator = MqttCommunicator::from_config(config)?;

    let shutdown = Arc::new(AtomicBool::new(false));
    signal_hook::flag::register(SIGINT, Arc::clone(&shutdown))?;
    signal_hook::flag::register(SIGTERM, Arc::clone(&shutdown))?;
    info!(
        "Listening on {} at {}",
        communicator.subscribe_topic(),
        communicator.endpoint()
    );

    let mut received = 0usize;
    let mut last_activity = Instant::now();

    while !shutdown.load(Ordering::Relaxed) {
        if count.is_some_and(|limit| received >= limit) {
            break;
        }
        if idle_timeout.is_some_and(|idle| last_activity.elapsed() >= idle) {
            info!("No message received within the idle timeout");
            break;
        }

        match communicator.get_message_timeout(LISTEN_SLICE) {
            Ok(message) => {
                println!("{}", message_line(&message));
                received += 1;
                last_activity = Instant::now();
            }
            Err(e) if e.is_timeout() => continue,
            Err(e) => return Err(e.into()),
        }
    }

    info!(
        "Stopping after {} messages: {}",
        received,
        serde_json::to_string(&communicator.stats())?
    );
    communicator.shutdown();
    Ok(())
}

fn message_line(message: &Message) -> serde_json::Value {
    json!({
        "topic": message.topic(),
        "payload": message.payload_str(),
        "received_at": message.received_at().to_rfc3339(),
    })
}

fn run_send(
    config: &CommunicatorConfig,
    payload: &str,
    topic: Option<&str>,
) -> Result<(), Box<dyn std::error::Error>> {
    config.validate()?;

    // A one-shot sender must not take over the session of a running listener
    let client_id = format!("{}-send-{}", config.communicator.id, Uuid::new_v4().simple());
    let mut client = RumqttcClient::new(client_id);
    if let Some((username, password)) = config.credentials()? {
        client = client.with_credentials(username, password);
    }

    let communicator =
        MqttCommunicator::connect(Arc::new(client), CommunicatorOptions::from_config(config))?;

    match topic {
        Some(topic) => communicator.send_to(payload, topic)?,
        None => communicator.send(payload)?,
    }
    info!(
        "Published {} bytes to {}",
        payload.len(),
        topic.unwrap_or(communicator.publish_topic())
    );

    communicator.shutdown();
    Ok(())
}

fn handle_config_command(
    config: &CommunicatorConfig,
    show: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    config.validate()?;

    if show {
        println!("{}", toml::to_string_pretty(config)?);
    }

    info!("Configuration validation complete");
    Ok(())
}
