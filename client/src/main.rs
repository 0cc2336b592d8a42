use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use canvas_client::canvas::{self, SnapshotArchive, DEFAULT_CANVAS};
use canvas_client::RelayClient;
use clap::Parser;
use shared::prelude::*;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(author, version, about = "Canvas relay client")]
struct Cli {
    /// Path to client configuration JSON file; defaults are used when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Display name to log in with, overriding the configured one
    #[arg(short, long)]
    name: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing("canvas-client")?;

    let cli = Cli::parse();
    let mut config = match &cli.config {
        Some(path) => ClientConfig::load_from_path(path)?,
        None => {
            let mut config = ClientConfig::default();
            config.finalize(Path::new("."))?;
            config
        }
    };
    if let Some(name) = cli.name {
        config.display_name = name;
    }

    let client = if config.save_received {
        RelayClient::new(SnapshotArchive::new(config.snapshot_dir.clone(), config.jpeg_quality)?)
    } else {
        RelayClient::new(|snapshot: RasterSnapshot| {
            info!(width = snapshot.width(), height = snapshot.height(), "received snapshot");
        })
    }
    .with_max_frame_bytes(config.max_frame_bytes);

    client
        .connect(&config.relay_ip, config.relay_port, &config.display_name)
        .await
        .with_context(|| format!("Failed to reach relay at {}", config.relay_addr()))?;

    info!("type help for a list of commands");
    tokio::select! {
        result = command_loop(&client) => {
            if let Err(err) = result {
                error!(?err, "command loop failed");
            }
        }
        _ = signal::ctrl_c() => {
            info!("received Ctrl+C");
        }
    }

    client.disconnect().await;
    Ok(())
}

async fn command_loop(client: &RelayClient) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let mut parts = trimmed.split_whitespace();
        match parts.next().unwrap_or("") {
            "help" => print_help(),
            "send" => match parts.next() {
                Some(path) => {
                    if let Err(err) = share_image(client, PathBuf::from(path)).await {
                        error!(?err, "failed to share image");
                    }
                }
                None => warn!("usage: send <image.jpg>"),
            },
            "fill" => {
                let color = parts.next().map(canvas::parse_color);
                let width = parts.next().and_then(|w| w.parse().ok());
                let height = parts.next().and_then(|h| h.parse().ok());
                match color {
                    Some(Ok(color)) => {
                        let snapshot = RasterSnapshot::filled(
                            width.unwrap_or(DEFAULT_CANVAS.0),
                            height.unwrap_or(DEFAULT_CANVAS.1),
                            color,
                        );
                        if let Err(err) = client.send_snapshot(&snapshot).await {
                            error!(?err, "failed to share canvas");
                        }
                    }
                    Some(Err(err)) => warn!(%err, "usage: fill <rrggbb> [width height]"),
                    None => warn!("usage: fill <rrggbb> [width height]"),
                }
            }
            "quit" | "exit" => break,
            other => warn!(%other, "unknown command, type help"),
        }
        if !client.is_connected() {
            warn!("connection to relay lost");
            break;
        }
    }
    Ok(())
}

async fn share_image(client: &RelayClient, path: PathBuf) -> Result<()> {
    let snapshot = tokio::task::spawn_blocking(move || canvas::load_image(&path))
        .await
        .context("image loader panicked")??;
    info!(
        width = snapshot.width(),
        height = snapshot.height(),
        "sharing image"
    );
    client.send_snapshot(&snapshot).await?;
    Ok(())
}

fn print_help() {
    println!(
        "Commands:\n  help                       show this help\n  send <image.jpg>           share an image file\n  fill <rrggbb> [w h]        share a solid canvas\n  quit                       disconnect and exit"
    );
}
