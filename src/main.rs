//! mqtt-chat - terminal front end for the chat session
//!
//! Prints delivered messages as `[HH:MM] <sender>: text` (or JSON lines with
//! `--json`) and sends every line typed on stdin. `/quit`, end of input, SIGINT
//! and SIGTERM all end the session.

use clap::{Parser, Subcommand};
use mqtt_chat::error::{ChatError, ErrorKind};
use mqtt_chat::observability::{init_default_logging, init_logging, LogFormat};
use mqtt_chat::{ChatConfig, ChatMessage, ChatSession, SessionState};
use std::path::{Path, PathBuf};
use std::process;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{error, info, warn, Level};

/// Command typed on stdin that ends the session
const QUIT_COMMAND: &str = "/quit";

/// Default configuration locations, tried in order
const DEFAULT_CONFIG_PATHS: [&str; 2] = ["chat.toml", "config/chat.toml"];

/// Chat over a single MQTT topic
#[derive(Parser)]
#[command(name = "mqtt-chat")]
#[command(about = "Chat client over a single MQTT topic")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Verbose logging (-v debug, -vv trace); overrides LOG_LEVEL
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect and chat from the terminal
    Run {
        /// Print delivered messages as JSON lines instead of chat lines
        #[arg(long)]
        json: bool,
    },
    /// Validate configuration
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    match cli.verbose {
        0 => init_default_logging(),
        n => {
            let level = if n == 1 { Level::DEBUG } else { Level::TRACE };
            let format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "compact".to_string());
            init_logging(level, LogFormat::parse(&format), false);
        }
    }

    info!("Starting mqtt-chat v{}", env!("CARGO_PKG_VERSION"));

    let config = match load_configuration(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            eprintln!("mqtt-chat: {e}");
            process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Run { json } => run_chat(config, json).await,
        Commands::Config { show } => handle_config_command(&config, show),
    };

    if let Err(e) = result {
        error!("Command failed: {}", e);
        eprintln!("mqtt-chat: {e}");
        process::exit(1);
    }

    info!("Application shutdown complete");
}

fn load_configuration(config_path: Option<&Path>) -> Result<ChatConfig, Box<dyn std::error::Error>> {
    if let Some(path) = config_path {
        info!("Loading configuration from: {}", path.display());
        return Ok(ChatConfig::load_from_file(path)?);
    }

    for path_str in DEFAULT_CONFIG_PATHS {
        let path = PathBuf::from(path_str);
        if path.exists() {
            info!("Loading configuration from: {}", path.display());
            return Ok(ChatConfig::load_from_file(&path)?);
        }
    }

    Err("no configuration file found; pass -c/--config or create chat.toml".into())
}

async fn run_chat(config: ChatConfig, json: bool) -> Result<(), Box<dyn std::error::Error>> {
    let chat = ChatSession::from_config(&config)?;
    info!(client_id = %chat.client_id(), topic = %config.broker.topic, "Joining chat");
    eprintln!("* joining {} as {}", config.broker.topic, chat.client_id());

    // Printer: one line per delivered message, in delivery order
    let mut feed = chat.messages();
    let printer = tokio::spawn(async move {
        while let Some(message) = feed.next().await {
            if json {
                match serde_json::to_string(&message) {
                    Ok(line) => println!("{line}"),
                    Err(e) => error!("Failed to serialize message: {}", e),
                }
            } else {
                println!("{}", format_line(&message));
            }
        }
    });

    // Connectivity notices
    let mut states = chat.state_changes();
    let notifier = tokio::spawn(async move {
        while states.changed().await.is_ok() {
            if *states.borrow_and_update() == SessionState::Connected {
                eprintln!("* connected");
            }
        }
    });

    let mut events = chat.connection_events();
    let delay_secs = config.reconnect.delay_secs;
    let failures = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => {
                    let err = ChatError::from(event);
                    warn!(kind = ?err.kind(), "{}", err);
                    eprintln!("* {err}, retrying in {delay_secs}s");
                }
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    // Failed attempts are reported above and retried; only bad config is fatal
    if let Err(e) = chat.connect().await {
        if e.kind() == ErrorKind::Config {
            return Err(e.into());
        }
    }

    let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt())?;
    let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            _ = sigint.recv() => {
                info!("Received SIGINT, shutting down gracefully...");
                break;
            }
            _ = sigterm.recv() => {
                info!("Received SIGTERM, shutting down gracefully...");
                break;
            }
            line = lines.next_line() => match line {
                Ok(Some(line)) if line.trim() == QUIT_COMMAND => break,
                Ok(Some(line)) => {
                    if let Err(e) = chat.send(&line).await {
                        eprintln!("* not sent: {e}");
                    }
                }
                Ok(None) => {
                    info!("Input closed, shutting down");
                    break;
                }
                Err(e) => {
                    error!("Failed to read input: {}", e);
                    break;
                }
            }
        }
    }

    // Explicit disconnect also reports a loss; nothing is retried after it
    failures.abort();
    chat.shutdown().await?;
    notifier.abort();
    printer.abort();
    Ok(())
}

fn handle_config_command(config: &ChatConfig, show: bool) -> Result<(), Box<dyn std::error::Error>> {
    if show {
        println!("{}", toml::to_string_pretty(config)?);
    }

    let endpoint = config.endpoint()?;
    println!(
        "Configuration OK: {}:{} ({}), topic {}",
        endpoint.host,
        endpoint.port,
        if endpoint.tls { "tls" } else { "plain" },
        config.broker.topic
    );
    info!("Configuration validation complete");
    Ok(())
}

/// `[HH:MM] <you|sender>: text`
fn format_line(message: &ChatMessage) -> String {
    let who = if message.from_self {
        "you"
    } else {
        message.sender_id.as_str()
    };
    format!("[{}] {}: {}", message.local_time_label(), who, message.text)
}
