//! API gateway.
//!
//! ```text
//!     Client Request
//!     ──────────────▶ CORS / timeout / body limit
//!                       │
//!                       ▼
//!                   dispatcher ── strip /api/v1, route lookup
//!                       │
//!                       ▼
//!     logging → crash isolation → request id → inject → authenticate
//!                       │
//!                       ▼
//!                 [route gate] → handler ──▶ storage / resource store
//! ```

use std::path::PathBuf;

use clap::Parser;
use tokio::net::TcpListener;

use api_gateway::lifecycle::{signals, startup, Shutdown};
use api_gateway::observability::{init_tracing, metrics};

#[derive(Parser)]
#[command(name = "api-gateway")]
#[command(about = "HTTP API gateway with resumable uploads", long_about = None)]
struct Args {
    /// Path to a TOML configuration file. Defaults are used when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config = startup::load(args.config.as_deref())?;
    init_tracing(&config.observability);

    tracing::info!("api-gateway v{} starting", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        bind_address = %config.listener.bind_address,
        prefix = %config.api.prefix,
        request_timeout_secs = config.timeouts.request_secs,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    let server = startup::build_server(config).await?;

    let shutdown = Shutdown::new();
    let server_shutdown = shutdown.subscribe();
    let serving = tokio::spawn(server.run(listener, server_shutdown));

    signals::shutdown_on_signal(&shutdown).await;
    serving.await??;

    tracing::info!("Shutdown complete");
    Ok(())
}
