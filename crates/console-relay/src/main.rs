//! console-relay: entry point.
//!
//! Connects to the consoles of the configured game servers through the
//! upstream control plane, prints every console line as a JSON object on
//! stdout, and forwards operator commands typed on stdin.
//!
//! # Usage
//!
//! ```text
//! console-relay [OPTIONS]
//!
//! Options:
//!   --config <PATH>       TOML config file [default: console-relay.toml]
//!   --endpoint <URL>      Upstream WebSocket endpoint (overrides the file)
//!   --token <TOKEN>       Upstream bearer token (overrides the file)
//!   --server <ID>         Server to connect (repeatable; default: all in file)
//!   --log-level <FILTER>  Log filter when RUST_LOG is unset
//!   --probe               Send `serverinfo` to every server, print a report, exit
//! ```
//!
//! # Interactive mode
//!
//! Each stdin line of the form `<server_id> <command>` is sent to that
//! server.  `:status` prints connection status.  Ctrl+C or end of input
//! shuts the relay down.
//!
//! # Environment variable overrides
//!
//! | Variable                | Flag          |
//! |-------------------------|---------------|
//! | `CONSOLE_RELAY_CONFIG`  | `--config`    |
//! | `CONSOLE_RELAY_ENDPOINT`| `--endpoint`  |
//! | `CONSOLE_RELAY_TOKEN`   | `--token`     |
//! | `CONSOLE_RELAY_LOG`     | `--log-level` |

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use console_core::ServerId;
use console_relay::domain::ServerRegistry;
use console_relay::infrastructure::storage::{load_config, ConfigFile};
use console_relay::{ConsoleConfig, ConsoleManager};

// ── CLI argument definitions ──────────────────────────────────────────────────

/// Real-time multi-server game console relay.
#[derive(Debug, Parser)]
#[command(
    name = "console-relay",
    about = "Relay game-server consoles from the upstream control plane",
    version
)]
struct Cli {
    /// Path of the TOML configuration file.  A missing file means defaults.
    #[arg(long, default_value = "console-relay.toml", env = "CONSOLE_RELAY_CONFIG")]
    config: PathBuf,

    /// Upstream WebSocket endpoint; overrides `[upstream].endpoint`.
    #[arg(long, env = "CONSOLE_RELAY_ENDPOINT")]
    endpoint: Option<String>,

    /// Upstream bearer token; overrides `[upstream].token`.
    #[arg(long, env = "CONSOLE_RELAY_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Server to connect.  Repeat for several; defaults to every `[[servers]]`
    /// entry of the config file.
    #[arg(long = "server", value_name = "ID")]
    servers: Vec<ServerId>,

    /// Log filter used when `RUST_LOG` is not set; overrides `log_level`.
    #[arg(long, env = "CONSOLE_RELAY_LOG")]
    log_level: Option<String>,

    /// Probe every connected server with `serverinfo`, print the report, exit.
    #[arg(long)]
    probe: bool,
}

impl Cli {
    /// Applies the command-line overrides on top of the config file.
    fn into_console_config(&self, file: &ConfigFile) -> ConsoleConfig {
        let mut config = file.to_console_config();
        if let Some(endpoint) = &self.endpoint {
            config.endpoint = endpoint.clone();
        }
        if let Some(token) = &self.token {
            config.token = Some(token.clone());
        }
        config
    }

    /// Servers to connect at startup.
    fn targets(&self, registry: &dyn ServerRegistry) -> Vec<ServerId> {
        if self.servers.is_empty() {
            registry.server_ids()
        } else {
            self.servers.clone()
        }
    }
}

/// One parsed stdin line.
#[derive(Debug, PartialEq, Eq)]
enum Input<'a> {
    Status,
    Command { server_id: ServerId, text: &'a str },
    Blank,
    Invalid,
}

fn parse_input(line: &str) -> Input<'_> {
    let line = line.trim();
    if line.is_empty() {
        return Input::Blank;
    }
    if line == ":status" {
        return Input::Status;
    }
    let Some((id, text)) = line.split_once(char::is_whitespace) else {
        return Input::Invalid;
    };
    match (id.parse(), text.trim()) {
        (Ok(server_id), text) if !text.is_empty() => Input::Command { server_id, text },
        _ => Input::Invalid,
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let file = load_config(&cli.config)
        .with_context(|| format!("failed to load config from {}", cli.config.display()))?;

    // RUST_LOG wins; otherwise --log-level, then the file's log_level.
    let fallback = cli.log_level.clone().unwrap_or_else(|| file.log_level.clone());
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback)),
        )
        .init();

    let config = cli.into_console_config(&file);
    let registry = Arc::new(file.registry());
    let targets = cli.targets(registry.as_ref());
    info!(
        endpoint = %config.endpoint,
        servers = targets.len(),
        "console relay starting"
    );

    let relay = ConsoleManager::with_websocket(config, registry);

    for server_id in &targets {
        match relay.connect_registered(*server_id).await {
            Ok(result) if result.success => info!(server_id, "connected"),
            Ok(result) => warn!(
                server_id,
                error = result.status.last_error.as_deref().unwrap_or("unknown"),
                "not connected yet; retrying in the background"
            ),
            Err(e) => error!(server_id, "cannot connect: {e}"),
        }
    }

    if cli.probe {
        let report = relay.test().await;
        println!("{}", serde_json::to_string_pretty(&report)?);
        relay.shutdown().await;
        return Ok(());
    }

    // ── Live output ────────────────────────────────────────────────────────────
    let mut live = relay.subscribe();
    let printer = tokio::spawn(async move {
        loop {
            match live.recv().await {
                Ok(msg) => match serde_json::to_string(&msg) {
                    Ok(line) => println!("{line}"),
                    Err(e) => error!("failed to encode message: {e}"),
                },
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "output fell behind"),
                Err(RecvError::Closed) => break,
            }
        }
    });

    // ── Operator input ────────────────────────────────────────────────────────
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                if let Err(e) = signal {
                    error!("failed to listen for Ctrl+C signal: {e}");
                }
                info!("received Ctrl+C; shutting down");
                break;
            }
            line = lines.next_line() => line.context("failed to read stdin")?,
        };
        let Some(line) = line else {
            info!("end of input; shutting down");
            break;
        };

        match parse_input(&line) {
            Input::Blank => {}
            Input::Status => println!("{}", serde_json::to_string(&relay.status(None))?),
            Input::Command { server_id, text } => match relay.send(server_id, text).await {
                Ok(command_id) => info!(server_id, %command_id, "sent"),
                Err(e) => warn!(server_id, "send failed: {e}"),
            },
            Input::Invalid => warn!("expected `<server_id> <command>` or `:status`"),
        }
    }

    relay.shutdown().await;
    printer.abort();
    info!("console relay stopped");
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
