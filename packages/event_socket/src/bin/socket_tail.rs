//! Tail one or more channels and print every message as a JSON line.

use anyhow::{Context, Result};
use clap::Parser;
use futures::StreamExt;
use futures::stream::select_all;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

use event_socket::{Anonymous, Channel, CredentialSource, EventSocket, SocketConfig};

#[derive(Parser)]
#[command(name = "socket-tail")]
#[command(about = "Subscribe to realtime channels and print their messages")]
struct Args {
    /// Config file (TOML); EVENT_SOCKET_* env vars override it
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Channel to subscribe to (repeatable)
    #[arg(long = "channel", required = true)]
    channels: Vec<String>,

    /// Only show these events (repeatable; default: all)
    #[arg(short, long = "event")]
    events: Vec<String>,

    /// Bearer token for the connection and private channels
    #[arg(long, env = "EVENT_SOCKET_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Setup logging; stdout is reserved for messages
    let filter = if args.debug {
        "event_socket=debug,socket_tail=debug"
    } else {
        "event_socket=info,socket_tail=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let config = SocketConfig::load(args.config.as_deref()).context("invalid configuration")?;

    let credentials: Arc<dyn CredentialSource> = match args.token {
        Some(token) => Arc::new(move || Some(token.clone())),
        None => Arc::new(Anonymous),
    };
    let socket = EventSocket::from_config(&config, credentials)?;

    let streams = args
        .channels
        .iter()
        .map(|name| socket.subscribe(Channel::new(name.as_str()), args.events.clone()));
    let mut merged = select_all(streams);

    info!(channels = ?args.channels, "tailing");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted");
                break;
            }
            item = merged.next() => match item {
                Some(Ok(message)) => println!("{}", serde_json::to_string(&message)?),
                Some(Err(err)) => warn!(code = err.error_code(), "{err}"),
                None => break,
            },
        }
    }

    socket.disconnect();
    Ok(())
}
