// ============================================
// File: crates/quicvc-node/src/main.rs
// ============================================
//! # QUICVC Node Entry Point
//!
//! ## Creation Reason
//! Thin CLI over the node library for trying the protocol by hand.
//!
//! ## Usage
//! ```bash
//! quicvc-node keygen --device-id laptop   # create identity file
//! quicvc-node listen                      # accept connections, echo data
//! quicvc-node connect 192.168.1.20:49497 --message hello
//! quicvc-node validate -c node.toml       # check config file
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - `RUST_LOG` overrides `logging.level`
//! - The identity file is created on first use if missing
//!
//! ## Last Modified
//! v0.1.0 - Initial CLI implementation

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use quicvc_core::credential::CredentialEngine;
use quicvc_node::{ConnectionEvent, ConnectionManager, DeviceIdentity, NodeConfig, QuicVcListener};

// ============================================
// CLI Definition
// ============================================

/// QUICVC peer-to-peer node
#[derive(Parser, Debug)]
#[command(name = "quicvc-node")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to configuration file (defaults apply if omitted)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Subcommand to execute
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create a device identity file
    Keygen {
        /// Device label (overrides identity.device_id)
        #[arg(long)]
        device_id: Option<String>,

        /// Overwrite an existing identity file
        #[arg(long)]
        force: bool,
    },

    /// Accept connections and echo received data
    Listen {
        /// Listen address (overrides network.listen_addr)
        #[arg(short, long)]
        listen: Option<SocketAddr>,
    },

    /// Connect to a listening peer
    Connect {
        /// Peer address, e.g. 192.168.1.20:49497
        addr: SocketAddr,

        /// Message to send once connected
        #[arg(short, long)]
        message: Option<String>,
    },

    /// Validate configuration file
    Validate,
}

// ============================================
// Main
// ============================================

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match load_config(cli.config.as_deref()).await {
        Ok(config) => config,
        Err(e) => {
            init_logging("info");
            error!("{:#}", e);
            std::process::exit(1);
        }
    };
    init_logging(&config.logging.level);

    let result = match cli.command {
        Commands::Keygen { device_id, force } => cmd_keygen(config, device_id, force).await,
        Commands::Listen { listen } => cmd_listen(config, listen).await,
        Commands::Connect { addr, message } => cmd_connect(config, addr, message).await,
        Commands::Validate => cmd_validate(&config, cli.config.as_deref()),
    };

    if let Err(e) = result {
        error!("{:#}", e);
        std::process::exit(1);
    }
}

// ============================================
// Commands
// ============================================

/// Creates the identity file.
async fn cmd_keygen(config: NodeConfig, device_id: Option<String>, force: bool) -> anyhow::Result<()> {
    let path = PathBuf::from(&config.identity.key_file);
    if path.exists() && !force {
        anyhow::bail!(
            "identity file {} already exists (use --force to replace it)",
            path.display()
        );
    }

    let device_id = device_id.unwrap_or(config.identity.device_id);
    let identity = DeviceIdentity::generate(device_id);
    identity.save(&path).await?;

    println!("Identity written to {}", path.display());
    println!("   Device ID:  {}", identity.device_id);
    println!("   DID:        {}", identity.signing.did());
    println!("   Public key: {}", identity.encryption.public_key_hex());
    Ok(())
}

/// Runs a listener until Ctrl-C.
async fn cmd_listen(mut config: NodeConfig, listen: Option<SocketAddr>) -> anyhow::Result<()> {
    if let Some(addr) = listen {
        config.network.listen_addr = addr;
    }
    let engine = load_engine(&config).await?;
    let listener = Arc::new(QuicVcListener::bind(config, engine).await?);

    info!(addr = %listener.local_addr()?, "Waiting for connections (Ctrl-C to stop)");

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let Some(mut stream) = accepted else { break };
                let listener = Arc::clone(&listener);
                tokio::spawn(async move {
                    let id = stream.id();
                    let peer = stream.remote_device_id().unwrap_or("?").to_string();
                    println!("+ {peer} connected from {}", stream.remote_addr());
                    while let Some(event) = stream.next().await {
                        match event {
                            ConnectionEvent::Data { payload, .. } => {
                                println!("[{peer}] {}", String::from_utf8_lossy(&payload));
                                if let Err(e) = listener.send(id, &payload).await {
                                    warn!(connection = %id, error = %e, "Echo failed");
                                }
                            }
                            ConnectionEvent::Error { message } => warn!(connection = %id, "{message}"),
                            ConnectionEvent::Closed => println!("- {peer} disconnected"),
                            ConnectionEvent::Connected { .. } => {}
                        }
                    }
                });
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl-C, shutting down");
                break;
            }
        }
    }

    listener.shutdown().await?;
    Ok(())
}

/// Connects, optionally sends one message, prints replies until Ctrl-C.
async fn cmd_connect(config: NodeConfig, addr: SocketAddr, message: Option<String>) -> anyhow::Result<()> {
    let engine = load_engine(&config).await?;
    let manager = ConnectionManager::new(config, engine);

    let mut stream = manager
        .connect(addr)
        .await
        .with_context(|| format!("connecting to {addr}"))?;
    let peer = stream.remote_device_id().unwrap_or("?").to_string();
    println!("Connected to {peer} ({addr})");

    if let Some(message) = message {
        manager.send(stream.id(), message.as_bytes()).await?;
    }

    loop {
        tokio::select! {
            event = stream.next() => match event {
                Some(ConnectionEvent::Data { payload, .. }) => {
                    println!("[{peer}] {}", String::from_utf8_lossy(&payload));
                }
                Some(ConnectionEvent::Error { message }) => warn!("{message}"),
                Some(ConnectionEvent::Connected { .. }) => {}
                Some(ConnectionEvent::Closed) | None => {
                    println!("Connection closed");
                    break;
                }
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    manager.shutdown().await;
    Ok(())
}

/// Validates configuration.
fn cmd_validate(config: &NodeConfig, path: Option<&Path>) -> anyhow::Result<()> {
    match path {
        Some(path) => println!("✅ Configuration is valid: {}", path.display()),
        None => println!("⚠️  No config file given; showing defaults"),
    }
    println!();
    println!("Identity:");
    println!("   Device ID:  {}", config.identity.device_id);
    println!("   Key file:   {}", config.identity.key_file);
    println!();
    println!("Network:");
    println!("   Listen:     {}", config.network.listen_addr);
    println!();
    println!("Timers:");
    println!("   Handshake:  {} ms", config.handshake.timeout_ms);
    println!("   Heartbeat:  {} s", config.heartbeat.interval_secs);
    println!("   Idle:       {} s", config.heartbeat.idle_timeout_secs);
    println!();
    println!("Limits:");
    println!("   Max conns:  {}", config.limits.max_connections);
    Ok(())
}

// ============================================
// Helpers
// ============================================

/// Initializes logging.
fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true))
        .with(filter)
        .try_init()
        .ok();
}

/// Loads config from `path`, or defaults.
async fn load_config(path: Option<&Path>) -> anyhow::Result<NodeConfig> {
    match path {
        Some(path) => Ok(NodeConfig::load(path).await?),
        None => Ok(NodeConfig::default()),
    }
}

/// Loads (or creates) the identity and builds the credential engine.
async fn load_engine(config: &NodeConfig) -> anyhow::Result<Arc<CredentialEngine>> {
    let identity =
        DeviceIdentity::load_or_create(&config.identity.key_file, &config.identity.device_id).await?;
    info!(device_id = %identity.device_id, did = %identity.signing.did(), "Identity ready");
    Ok(Arc::new(identity.into_engine()))
}
