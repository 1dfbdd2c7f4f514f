//! wmqtt - command line entry point

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use wmqtt::credentials::{CookieFile, CookieSource};
use wmqtt::observability::init_default_logging;
use wmqtt::session::{handler_channel, Session};
use wmqtt::{ClientConfig, WebSocketTransport, WorksMessage};

/// Works Mobile push notification client
#[derive(Parser)]
#[command(name = "wmqtt")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect and print incoming messages until interrupted
    Run,
    /// Validate configuration
    Config {
        /// Print the effective configuration as TOML
        #[arg(long)]
        show: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_default_logging();

    let config = match load_configuration(cli.config.as_ref()) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Run => run_client(config).await,
        Commands::Config { show } => handle_config_command(&config, show),
    };

    if let Err(e) = result {
        error!("{}", wmqtt::error::sanitize_error_message(&e.to_string()));
        process::exit(1);
    }
}

fn load_configuration(path: Option<&PathBuf>) -> Result<ClientConfig, wmqtt::ConfigError> {
    if let Some(path) = path {
        info!("Loading configuration from: {}", path.display());
        return ClientConfig::load_from_file(path);
    }

    for candidate in ["wmqtt.toml", "config/wmqtt.toml"] {
        let path = PathBuf::from(candidate);
        if path.exists() {
            info!("Loading configuration from: {}", path.display());
            return ClientConfig::load_from_file(&path);
        }
    }

    info!("No configuration file found, using defaults");
    Ok(ClientConfig::default())
}

fn handle_config_command(
    config: &ClientConfig,
    show: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    if show {
        println!("{}", toml::to_string_pretty(config)?);
    } else {
        println!("Configuration is valid");
    }
    Ok(())
}

async fn run_client(mut config: ClientConfig) -> Result<(), Box<dyn std::error::Error>> {
    let jar = CookieFile::new(&config.credentials.cookie_file).load()?;
    if config.session.subscriptions.is_empty() {
        config.session.subscriptions = jar.default_subscriptions();
    }
    if config.session.subscriptions.is_empty() {
        warn!("No subscriptions configured and no WORKS_USER_ID cookie; only direct pushes will arrive");
    }

    let (handler_tx, handler_rx) = handler_channel(&config);
    let session = Arc::new(
        Session::new(config, WebSocketTransport::new(), handler_tx).with_cookie_header(jar.header()),
    );
    info!(client_id = session.client_id(), "Starting push session");

    let consumer = tokio::spawn(print_messages(handler_rx));
    let runner = tokio::spawn({
        let session = session.clone();
        async move { session.run().await }
    });

    let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;
    let outcome = tokio::select! {
        _ = signal::ctrl_c() => {
            info!("Received SIGINT, shutting down");
            None
        }
        _ = sigterm.recv() => {
            info!("Received SIGTERM, shutting down");
            None
        }
        result = runner => Some(result),
    };

    session.stop().await;
    drop(session);
    if let Err(e) = consumer.await {
        warn!("Message consumer ended abnormally: {}", e);
    }

    match outcome {
        Some(result) => Ok(result??),
        None => Ok(()),
    }
}

async fn print_messages(mut rx: mpsc::Receiver<WorksMessage>) {
    while let Some(message) = rx.recv().await {
        info!(
            kind = %message.message_type(),
            channel_id = %message.channel_id,
            sender = message.sender_name().unwrap_or(""),
            text = message.text().unwrap_or(""),
            "Message received"
        );
        match serde_json::to_string(&message) {
            Ok(json) => println!("{json}"),
            Err(e) => warn!("Failed to serialize message: {}", e),
        }
    }
}
