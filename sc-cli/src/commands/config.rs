//! Config commands.

use std::path::PathBuf;

use clap::Subcommand;
use comfy_table::{modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL, ContentArrangement, Table};
use console::style;

use sc_core::config::{AppConfig, ConfigHandle};
use sc_core::error::ScResult;

use super::mask_secret;
use crate::OutputFormat;

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Show the effective configuration.
    Show,
    /// Write a default configuration file.
    Init {
        /// Overwrite an existing file.
        #[arg(long)]
        force: bool,
    },
    /// Print the configuration file path.
    Path,
}

fn settings_rows(cfg: &AppConfig) -> Vec<(String, String)> {
    let mut rows = vec![
        ("server.address".to_string(), cfg.server.address.clone()),
        ("server.api_key".to_string(), mask_secret(&cfg.server.api_key)),
        ("server.user_token".to_string(), mask_secret(&cfg.server.user_token)),
        (
            "server.connect_timeout_ms".to_string(),
            cfg.server.connect_timeout_ms.to_string(),
        ),
    ];
    for (name, value) in &cfg.server.custom_headers {
        rows.push((format!("server.custom_headers.{name}"), value.clone()));
    }

    let socket = &cfg.socket;
    rows.extend([
        ("socket.ping_interval_secs".to_string(), socket.ping_interval_secs.to_string()),
        ("socket.pong_timeout_secs".to_string(), socket.pong_timeout_secs.to_string()),
        ("socket.max_missed_pongs".to_string(), socket.max_missed_pongs.to_string()),
        ("socket.batch_period_ms".to_string(), socket.batch_period_ms.to_string()),
        ("socket.reconnect_base_delay_ms".to_string(), socket.reconnect_base_delay_ms.to_string()),
        ("socket.reconnect_max_delay_ms".to_string(), socket.reconnect_max_delay_ms.to_string()),
        ("socket.reconnect_jitter".to_string(), socket.reconnect_jitter.to_string()),
        ("socket.reconnect_max_attempts".to_string(), socket.reconnect_max_attempts.to_string()),
        ("socket.server_close_grace_ms".to_string(), socket.server_close_grace_ms.to_string()),
        ("logging.level".to_string(), cfg.logging.level.clone()),
        ("logging.directory".to_string(), cfg.logging.directory.clone()),
        ("logging.json_output".to_string(), cfg.logging.json_output.to_string()),
    ]);
    rows
}

/// Run a config command.
pub async fn run(
    config: ConfigHandle,
    config_path: PathBuf,
    action: ConfigAction,
    format: OutputFormat,
) -> ScResult<()> {
    match action {
        ConfigAction::Show => {
            let cfg = config.read().await;
            let rows = settings_rows(&cfg);
            match format {
                OutputFormat::Json => {
                    let map: serde_json::Map<String, serde_json::Value> = rows
                        .into_iter()
                        .map(|(key, value)| (key, serde_json::Value::String(value)))
                        .collect();
                    println!("{}", serde_json::to_string_pretty(&map)?);
                }
                OutputFormat::Text => {
                    let mut table = Table::new();
                    table
                        .load_preset(UTF8_FULL)
                        .apply_modifier(UTF8_ROUND_CORNERS)
                        .set_content_arrangement(ContentArrangement::Dynamic);
                    table.set_header(vec!["Key", "Value"]);
                    for (key, value) in rows {
                        table.add_row(vec![key, value]);
                    }
                    println!("{table}");
                    println!("\nLoaded from {}", config_path.display());
                }
            }
        }
        ConfigAction::Init { force } => {
            if config_path.exists() && !force {
                println!(
                    "{} {} already exists (use --force to overwrite)",
                    style("SKIP").yellow().bold(),
                    config_path.display()
                );
                return Ok(());
            }
            AppConfig::default().save_to_file(&config_path)?;
            println!(
                "{} Wrote default config to {}",
                style("OK").green().bold(),
                config_path.display()
            );
        }
        ConfigAction::Path => match format {
            OutputFormat::Json => {
                println!("{}", serde_json::json!({ "path": config_path.display().to_string() }));
            }
            OutputFormat::Text => println!("{}", config_path.display()),
        },
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_rows_mask_secrets() {
        let mut cfg = AppConfig::default();
        cfg.server.api_key = "my-api-key-1234".into();
        let rows = settings_rows(&cfg);

        let api_key = rows
            .iter()
            .find(|(key, _)| key == "server.api_key")
            .map(|(_, value)| value.as_str());
        assert_eq!(api_key, Some("********1234"));
        assert!(rows.iter().any(|(key, _)| key == "socket.server_close_grace_ms"));
    }
}
