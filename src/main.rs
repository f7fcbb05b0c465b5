//! message-relay CLI.
//!
//! This is the main binary entry point. See the `message_relay` library
//! for the core functionality.

use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use message_relay::chat::{ChatSession, ConsoleSession, GatewaySession};
use message_relay::relay::{forwarder, Dispatcher, RelaySession};
use message_relay::{markup, Config};
use mimalloc::MiMalloc;
use tokio_util::sync::CancellationToken;

/// Global allocator configured per M-MIMALLOC-APPS guideline.
#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// How long to wait for leftover tasks once the relay has shut down.
const RUNTIME_SHUTDOWN_TIMEOUT: std::time::Duration = std::time::Duration::from_millis(500);

// CLI
#[derive(Parser)]
#[command(name = "message-relay")]
#[command(version = VERSION)]
#[command(about = "Relay between a chat network session and a remote control API")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect to the control API and relay until interrupted
    Run {
        /// Path to config.json
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Load and validate the configuration, then print it (key redacted)
    CheckConfig {
        /// Path to config.json
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Convert rich-text HTML to chat styling and print the result
    Format {
        /// HTML to convert; read from stdin when omitted
        text: Option<String>,
    },
}

/// Start the chat session selected by the config.
async fn open_chat_session(config: &Config) -> Result<Arc<dyn ChatSession>> {
    if let Some(gateway_url) = &config.gateway_url {
        let session = Arc::new(
            GatewaySession::connect(gateway_url)
                .await
                .context("Could not initialize chat session")?,
        );
        session.spawn_event_poller(config.poll_interval());
        return Ok(session);
    }

    log::warn!("No gateway_url configured; running console dry run (type '<jid> <text>' to simulate messages)");
    let session = Arc::new(ConsoleSession::new());
    session.spawn_line_reader(tokio::io::BufReader::new(tokio::io::stdin()));
    Ok(session)
}

/// Log the joined groups so their identities can be copied into `wid_jids`.
async fn log_joined_groups(chat: &dyn ChatSession) {
    match chat.joined_groups().await {
        Ok(groups) => {
            for group in groups {
                log::info!("[Chat] Group {:?}: {}", group.name, group.jid);
            }
        }
        Err(e) => log::warn!("[Chat] Error getting joined groups: {}", e),
    }
}

/// Install Ctrl-C / SIGTERM handling that cancels `token`.
fn install_signal_handler(token: &CancellationToken) -> Result<()> {
    let token = token.clone();
    ctrlc::set_handler(move || {
        log::info!("Interrupt received");
        token.cancel();
    })
    .context("Could not install signal handler")
}

async fn run(config_path: Option<PathBuf>) -> Result<()> {
    let config = Config::load(config_path.as_deref())?;
    let relay_config = config.relay_config()?;

    let shutdown = CancellationToken::new();
    install_signal_handler(&shutdown)?;

    let chat = open_chat_session(&config).await?;
    log_joined_groups(chat.as_ref()).await;
    let dispatcher = Dispatcher::new(Arc::clone(&chat), config.wid_jids.clone());
    let relay = RelaySession::connect(relay_config, dispatcher).await?;
    let forwarder = forwarder::spawn(chat.subscribe(), relay.outbound(), relay.shutdown_token());

    log::info!(
        "message-relay v{} running ({} recipient(s))",
        VERSION,
        config.wid_jids.len()
    );

    shutdown.cancelled().await;
    relay.shutdown().await;
    if let Err(e) = forwarder.await {
        log::warn!("Forwarder task failed: {}", e);
    }
    Ok(())
}

fn check_config(config_path: Option<PathBuf>) -> Result<()> {
    let config = Config::load(config_path.as_deref())?;
    let relay_config = config.relay_config()?;
    println!("{config:#?}");
    println!("endpoint: {}", relay_config.endpoint);
    Ok(())
}

fn format_html(text: Option<String>) -> Result<()> {
    let input = match text {
        Some(text) => text,
        None => {
            let mut buffer = String::new();
            std::io::stdin()
                .read_to_string(&mut buffer)
                .context("Could not read stdin")?;
            buffer
        }
    };
    print!("{}", markup::translate(&input));
    Ok(())
}

fn init_logging() -> Result<()> {
    let mut builder = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    builder.format_timestamp_secs();
    if let Ok(path) = std::env::var("RELAY_LOG_FILE") {
        let log_file = std::fs::File::create(&path)
            .with_context(|| format!("Failed to create log file at {path}"))?;
        builder.target(env_logger::Target::Pipe(Box::new(log_file)));
    }
    builder.init();
    Ok(())
}

fn main() -> Result<()> {
    init_logging()?;

    let cli = Cli::parse();

    match cli.command.unwrap_or(Commands::Run { config: None }) {
        Commands::Run { config } => {
            let runtime = tokio::runtime::Runtime::new().context("Could not start async runtime")?;
            let result = runtime.block_on(run(config));
            // A console dry run leaves a blocking stdin read behind; don't wait for it.
            runtime.shutdown_timeout(RUNTIME_SHUTDOWN_TIMEOUT);
            result?;
        }
        Commands::CheckConfig { config } => check_config(config)?,
        Commands::Format { text } => format_html(text)?,
    }

    Ok(())
}
