use std::path::PathBuf;

use anyhow::Result;
use canvas_relay::Relay;
use clap::Parser;
use shared::prelude::*;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(author, version, about = "Canvas snapshot relay")]
struct Cli {
    /// Path to relay configuration (TOML); defaults are used when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Listen on this port instead of the configured one
    #[arg(short, long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing("canvas-relay")?;

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => RelayConfig::load_from_path(path)?,
        None => RelayConfig::default(),
    };
    let port = cli.port.unwrap_or(config.listen_port);

    let relay = Relay::new(config);
    relay.on_registry_changed(|names| {
        if names.is_empty() {
            println!("Connected users: (none)");
        } else {
            println!("Connected users: {}", names.join(", "));
        }
    });
    relay.start(port).await?;

    info!("type help for a list of commands");
    tokio::select! {
        result = command_loop(&relay) => {
            if let Err(err) = result {
                error!(?err, "command loop failed");
            }
        }
        _ = signal::ctrl_c() => {
            info!("received Ctrl+C");
        }
    }

    relay.stop().await;
    Ok(())
}

async fn command_loop(relay: &Relay) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        match trimmed {
            "help" => print_help(),
            "users" => print_users(relay),
            "quit" | "exit" => break,
            other => warn!(%other, "unknown command"),
        }
    }
    Ok(())
}

fn print_help() {
    println!(
        "Commands:\n  help     show this help\n  users    list connected users\n  quit     stop the relay"
    );
}

fn print_users(relay: &Relay) {
    let names = relay.list_names();
    if names.is_empty() {
        println!("No users connected");
        return;
    }
    println!("Connected users:");
    for name in names {
        println!("- {name}");
    }
}
