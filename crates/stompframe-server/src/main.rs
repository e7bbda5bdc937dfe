//! Stompframe server binary.
//!
//! # Usage
//!
//! ```bash
//! # Defaults: 0.0.0.0:7777, login required
//! stompframe-server
//!
//! # Permissive mode for clients that publish before CONNECT
//! stompframe-server --bind 127.0.0.1:61613 --allow-anonymous
//! ```

use clap::Parser;
use stompframe_server::{DispatcherConfig, Server, ServerConfig};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Stompframe publish/subscribe server
#[derive(Parser, Debug)]
#[command(name = "stompframe-server")]
#[command(about = "STOMP-style publish/subscribe server")]
#[command(version)]
struct Args {
    /// Address to bind to
    #[arg(short, long, default_value = "0.0.0.0:7777")]
    bind: String,

    /// Maximum concurrent connections
    #[arg(long, default_value = "10000")]
    max_connections: usize,

    /// Largest accepted frame in bytes
    #[arg(long, default_value_t = stompframe_proto::DEFAULT_MAX_FRAME_SIZE)]
    max_frame_size: usize,

    /// Frames queued for one client before it is dropped as too slow
    #[arg(long, default_value_t = stompframe_server::DEFAULT_OUTBOUND_CAPACITY)]
    outbound_capacity: usize,

    /// Allow SUBSCRIBE, UNSUBSCRIBE and SEND before CONNECT
    #[arg(long)]
    allow_anonymous: bool,

    /// Answer unrecognized commands with an ERROR frame
    #[arg(long)]
    reject_unknown_commands: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    tracing::info!("Stompframe server starting");
    tracing::info!("Binding to {}", args.bind);

    if args.allow_anonymous {
        tracing::warn!("Anonymous access enabled: clients may publish without logging in");
    }

    let config = ServerConfig {
        bind_address: args.bind,
        max_connections: args.max_connections,
        max_frame_size: args.max_frame_size,
        outbound_capacity: args.outbound_capacity,
        dispatcher: DispatcherConfig {
            require_login: !args.allow_anonymous,
            reject_unknown_commands: args.reject_unknown_commands,
        },
    };

    let server = Server::bind(config).await?;

    tracing::info!("Server listening on {}", server.local_addr()?);

    server
        .run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for Ctrl-C: {}", e);
                std::future::pending::<()>().await;
            }
        })
        .await?;

    tracing::info!("Server stopped");

    Ok(())
}
