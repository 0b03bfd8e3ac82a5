//! Entry point for `socket-tcp`.
//!
//! Parses CLI arguments and dispatches into either **server** or **client** mode.
//! All actual protocol work is delegated to library modules; `main.rs` owns only
//! process setup (logging, argument parsing, file reading, console output).

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use socket_tcp::framing::{recv_framed, send_framed};
use socket_tcp::{Config, Connection, Listener, Socket};

/// TCP-like reliable text channel over UDP.
#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    /// Initial retransmission timeout in milliseconds.
    #[arg(long, default_value_t = 1000)]
    timeout_ms: u64,

    /// Retransmissions allowed per segment before giving up.
    #[arg(long, default_value_t = 6)]
    max_retries: u32,

    #[command(subcommand)]
    mode: Mode,
}

#[derive(Subcommand)]
enum Mode {
    /// Accept connections forever, printing one framed message from each.
    Server {
        /// Local address to bind.
        #[arg(short, long, default_value = "127.0.0.1:5000")]
        bind: SocketAddr,
        /// Bytes requested per receive call.
        #[arg(long, default_value_t = 128)]
        buf_size: usize,
    },
    /// Send the contents of a file to a server.
    Client {
        /// Remote server address.
        #[arg(short, long, default_value = "127.0.0.1:5000")]
        server: SocketAddr,
        /// File whose text is sent.
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialise env_logger; set RUST_LOG to control verbosity.
    env_logger::init();

    let cli = Cli::parse();
    let config = Config::default()
        .with_timeout(Duration::from_millis(cli.timeout_ms))
        .with_max_retries(cli.max_retries);
    config.validate().context("invalid timing flags")?;

    match cli.mode {
        Mode::Server { bind, buf_size } => serve(bind, buf_size, config).await,
        Mode::Client { server, file } => send_file(server, &file, config).await,
    }
}

async fn serve(bind: SocketAddr, buf_size: usize, config: Config) -> Result<()> {
    let listener = Listener::bind(bind, config)
        .await
        .with_context(|| format!("binding {bind}"))?;
    log::info!("Listening for messages on {}", listener.local_addr());

    loop {
        let (mut conn, local) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                log::warn!("handshake failed: {e}");
                continue;
            }
        };
        log::info!("accepted {} on {local}", conn.peer_addr());

        tokio::spawn(async move {
            let peer = conn.peer_addr();
            match recv_framed(&mut conn, buf_size).await {
                Ok(Some(text)) => {
                    if let Err(e) = conn.close().await {
                        log::warn!("closing {peer}: {e}");
                    }
                    println!("Received message from {peer}:\n{text}\n");
                }
                Ok(None) => log::info!("{peer} closed before sending a message"),
                Err(e) => log::error!("receiving from {peer}: {e}"),
            }
        });
    }
}

async fn send_file(server: SocketAddr, file: &Path, config: Config) -> Result<()> {
    let text = tokio::fs::read_to_string(file)
        .await
        .with_context(|| format!("reading {}", file.display()))?;

    let local: SocketAddr = if server.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" }
        .parse()
        .context("wildcard address")?;
    let socket = Socket::bind(local).await.context("binding client socket")?;
    let mut conn = Connection::connect(socket, server, config)
        .await
        .with_context(|| format!("connecting to {server}"))?;

    send_framed(&mut conn, &text).await.context("sending file")?;
    println!("Sent {} ({} bytes) to {server}", file.display(), text.len());

    // The server closes once it has the whole message.
    let rest = conn.recv(1).await.context("waiting for server close")?;
    if !rest.is_empty() || !conn.is_closed() {
        log::warn!("server sent data instead of closing");
        conn.close().await.context("closing")?;
    }
    Ok(())
}
