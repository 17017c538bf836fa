//! Switchboard Signal Server
//!
//! WebSocket signaling relay for WebRTC call setup.
//!
//! # Usage
//!
//! ```bash
//! # In-memory account directory (default)
//! switchboard-signal --port 8080
//!
//! # With SQLite account directory
//! switchboard-signal --port 8080 --db /var/lib/switchboard/accounts.db
//! ```

use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing::{info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use switchboard_core::Config;
use switchboard_signal::{AccountDirectory, MemoryDirectory, SignalServer, SqliteDirectory};

#[derive(Parser, Debug)]
#[command(name = "switchboard-signal")]
#[command(about = "Switchboard signaling relay for WebRTC call setup")]
#[command(version)]
struct Args {
    /// Config file (defaults to the platform config directory)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Port to listen on
    #[arg(short, long)]
    port: Option<u16>,

    /// Bind address
    #[arg(short, long)]
    bind: Option<IpAddr>,

    /// SQLite account database (in-memory if not specified)
    #[arg(short, long)]
    db: Option<PathBuf>,

    /// Seconds before an unanswered call is canceled
    #[arg(long)]
    call_timeout: Option<u64>,

    /// Emit logs as JSON
    #[arg(long)]
    log_json: bool,

    /// Print a sample config file and exit
    #[arg(long)]
    print_config: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    if args.print_config {
        print!("{}", Config::sample());
        return Ok(());
    }

    // Initialize logging
    let filter = EnvFilter::builder()
        .with_default_directive(Level::INFO.into())
        .from_env_lossy();
    if args.log_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer())
            .with(filter)
            .init();
    }

    let mut config = match &args.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load(),
    };
    if let Some(port) = args.port {
        config.signal.port = port;
    }
    if let Some(bind) = args.bind {
        config.signal.bind = bind;
    }
    if let Some(secs) = args.call_timeout {
        config.signal.call_timeout_secs = secs;
    }
    if args.db.is_some() {
        config.accounts.db_path = args.db;
    }

    let addr = config.signal.socket_addr();
    info!("Starting Switchboard Signal Server");
    info!("Listening on {}", addr);
    info!("Unanswered calls time out after {:?}", config.signal.call_timeout());

    let directory: Arc<dyn AccountDirectory> = match &config.accounts.db_path {
        Some(db_path) => {
            // Create parent directory if it doesn't exist
            if let Some(parent) = db_path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            info!("Using SQLite account directory: {:?}", db_path);
            let store = SqliteDirectory::open(db_path)?;
            info!(
                "Loaded {} accounts and {} guests from database",
                store.account_count().unwrap_or(0),
                store.guest_count().unwrap_or(0)
            );
            Arc::new(store)
        }
        None => {
            info!("Using in-memory account directory (no persistence)");
            Arc::new(MemoryDirectory::new())
        }
    };

    let server = SignalServer::new(directory, config.signal.call_timeout());
    server.serve(addr).await?;

    Ok(())
}
