use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::{Arc, Weak};
use tracing::{info, warn};

use console_socket::{
    ConnectionCallbacks, ConsoleSocket, ServerCallbacks, SocketConfig, SocketFileConfig,
    load_config,
};

#[derive(Parser)]
#[command(name = "console-socket")]
#[command(about = "Serve terminal sessions over websockets, routed by handle")]
struct Args {
    /// Handles to listen for (each served at /terminal/<handle>/)
    #[arg(default_value = "console")]
    handles: Vec<String>,

    /// Config file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Host to bind to (overrides the config file)
    #[arg(short = 'b', long)]
    host: Option<String>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

/// Echo every input line back to its sender.
fn echo_callbacks(socket: Weak<ConsoleSocket>, handle: String) -> ConnectionCallbacks {
    let opened = handle.clone();
    let closed = handle.clone();
    ConnectionCallbacks::new()
        .on_connection_opened(move || info!(handle = %opened, "Client connected"))
        .on_connection_closed(move || info!(handle = %closed, "Client disconnected"))
        .on_received_input(move |input| {
            let Some(socket) = socket.upgrade() else {
                return;
            };
            if let Err(e) = socket.send_text(&handle, input) {
                warn!(handle = %handle, "Echo failed: {}", e);
            }
        })
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let default_directive = if args.debug {
        "console_socket=debug"
    } else {
        "console_socket=info"
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let mut file_config: SocketFileConfig = load_config(args.config.as_deref())
        .extract()
        .context("Failed to load configuration")?;
    if args.host.is_some() {
        file_config.host = args.host.clone();
    }
    let config = SocketConfig::from_file(&file_config)?;

    let socket = Arc::new(ConsoleSocket::new(config));
    socket.ensure_server_running(
        ServerCallbacks::new().on_socket_closed(|| info!("Listener closed")),
    )?;

    let host = file_config.host.as_deref().unwrap_or("localhost");
    for handle in &args.handles {
        socket.listen(handle, echo_callbacks(Arc::downgrade(&socket), handle.clone()))?;
        println!("ws://{}:{}/terminal/{}/", host, socket.port(), handle);
    }

    tokio::signal::ctrl_c()
        .await
        .context("Failed to install Ctrl+C handler")?;
    info!("Received shutdown signal, cleaning up...");

    // stop_server joins the loop thread, keep it off the async workers.
    let stopping = socket.clone();
    tokio::task::spawn_blocking(move || -> Result<()> {
        stopping.stop_all()?;
        stopping.stop_server()?;
        Ok(())
    })
    .await
    .context("Shutdown task failed")??;

    Ok(())
}
