//! Connect command - stream events from the server until interrupted.

use std::path::PathBuf;
use std::time::Duration;

use console::style;
use dialoguer::Input;
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, warn};

use sc_core::config::{AppConfig, ConfigHandle};
use sc_core::error::{ScError, ScResult};
use sc_socket::{
    ConnectionState, ConnectionStatus, DisconnectionSource, Event, EventDispatcher, SocketManager,
};

use super::timestamp;
use crate::OutputFormat;

/// Command-line overrides for the connection settings.
pub struct ConnectArgs {
    pub address: Option<String>,
    pub api_key: Option<String>,
    pub token: Option<String>,
    pub save: bool,
}

fn prompt(label: &str) -> ScResult<String> {
    Input::new()
        .with_prompt(label)
        .interact_text()
        .map_err(|e| ScError::Internal(e.to_string()))
}

/// Run the connect command.
pub async fn run(
    config: ConfigHandle,
    config_path: PathBuf,
    args: ConnectArgs,
    format: OutputFormat,
) -> ScResult<()> {
    // Determine address: arg > config > interactive prompt
    let address = match args.address {
        Some(address) => address,
        None => {
            let current = config.read().await.server.address.clone();
            if current.is_empty() {
                prompt("Server address")?
            } else {
                current
            }
        }
    };

    let api_key = match args.api_key {
        Some(key) => key,
        None => {
            let current = config.read().await.server.api_key.clone();
            if current.is_empty() {
                prompt("API key")?
            } else {
                current
            }
        }
    };

    // Apply to config
    {
        let mut cfg = config.write().await;
        cfg.server.address = AppConfig::sanitize_server_address(&address);
        cfg.server.api_key = api_key;
        if let Some(token) = args.token {
            cfg.server.user_token = token;
        }
    }

    let cfg = config.read().await.clone();
    if !cfg.is_server_configured() {
        error!("no server configured. Use --address/--api-key or set them in the config file.");
        return Err(ScError::MissingConfig("server address and API key".into()));
    }

    if args.save {
        cfg.save_to_file(&config_path)?;
        println!(
            "  {} Config saved to {}",
            style("OK").green(),
            config_path.display()
        );
    }

    let dispatcher = EventDispatcher::new(256);
    let mut events = dispatcher.subscribe();
    let manager = SocketManager::builder_from_config(&cfg)
        .with_dispatcher(dispatcher)
        .build();
    let mut states = manager.state_receiver();

    println!(
        "{} Connecting to {} ... (Ctrl+C to stop)",
        style("[socket]").bold().dim(),
        cfg.server.address
    );
    manager.connect();

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            changed = states.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = states.borrow_and_update().clone();
                print_state(&state, format);
            }
            event = events.recv() => {
                match event {
                    Ok(event) => print_event(&event, format),
                    Err(RecvError::Lagged(n)) => {
                        warn!("event consumer lagged behind, {n} event(s) skipped");
                        println!("  {} Missed {n} events (slow consumer)", style("WARN").yellow());
                    }
                    Err(RecvError::Closed) => break,
                }
            }
            _ = &mut ctrl_c => {
                println!("\n  Disconnecting...");
                manager.disconnect(DisconnectionSource::UserInitiated);
                wait_for_disconnect(&manager).await;
                break;
            }
        }
    }

    Ok(())
}

async fn wait_for_disconnect(manager: &SocketManager) {
    let mut states = manager.state_receiver();
    let finished = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if matches!(*states.borrow_and_update(), ConnectionState::Disconnected { .. }) {
                return;
            }
            if states.changed().await.is_err() {
                return;
            }
        }
    })
    .await;

    if finished.is_err() {
        warn!("socket did not confirm the disconnect in time");
    }
}

fn print_state(state: &ConnectionState, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::json!({
                    "time": timestamp(),
                    "kind": "state",
                    "state": state.to_string(),
                })
            );
        }
        OutputFormat::Text => {
            let label = match state {
                ConnectionState::Connected { .. } => style(state.to_string()).green().bold(),
                ConnectionState::WaitingForReconnect { .. } => style(state.to_string()).yellow(),
                ConnectionState::Disconnected { .. } => style(state.to_string()).red(),
                _ => style(state.to_string()).dim(),
            };
            println!("{} {} {}", style(timestamp()).dim(), style("state").bold(), label);
        }
    }
}

fn print_event(event: &Event, format: OutputFormat) {
    match (event, format) {
        (Event::Server(server_event), OutputFormat::Json) => {
            println!(
                "{}",
                serde_json::json!({
                    "time": timestamp(),
                    "kind": "event",
                    "type": server_event.event_type.as_str(),
                    "data": server_event.data,
                })
            );
        }
        (Event::Server(server_event), OutputFormat::Text) => {
            println!(
                "{} {} {}",
                style(timestamp()).dim(),
                style(format!("[{}]", server_event.event_type.as_str())).cyan(),
                server_event.cid().unwrap_or("-")
            );
        }
        (Event::ConnectionStatusUpdated(update), OutputFormat::Json) => {
            println!(
                "{}",
                serde_json::json!({
                    "time": timestamp(),
                    "kind": "status",
                    "status": update.connection_status.to_string(),
                })
            );
        }
        (Event::ConnectionStatusUpdated(update), OutputFormat::Text) => {
            let status = match &update.connection_status {
                ConnectionStatus::Connected => style("online".to_string()).green().bold(),
                ConnectionStatus::Disconnected { .. } => {
                    style(update.connection_status.to_string()).red().bold()
                }
                other => style(other.to_string()).yellow(),
            };
            println!("{} {} {}", style(timestamp()).dim(), style("status").bold(), status);
        }
        (Event::HealthCheck(_), _) => {}
    }
}
