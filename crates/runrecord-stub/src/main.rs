//! Run the stub recording service locally.
//!
//! # Usage
//!
//! ```bash
//! cargo run -p runrecord-stub -- --port 4000
//! cargo run -p runrecord-stub -- --port 4000 --no-encrypt --no-proxy
//! ```
//!
//! Then point the client at it:
//!
//! ```bash
//! runrecord --dev-envelope --api-url http://127.0.0.1:4000/api/ preflight --project-id abc123
//! ```

use std::net::SocketAddr;

use clap::Parser;
use runrecord_stub::{StubConfig, spawn_stub};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Local stand-in for the recording service.
#[derive(Parser)]
#[command(name = "runrecord-stub")]
struct Args {
    /// Port to listen on.
    #[arg(long, default_value_t = 4000)]
    port: u16,

    /// Negotiate plaintext payloads during preflight.
    #[arg(long)]
    no_encrypt: bool,

    /// Do not serve the `/api-proxy` base, forcing the direct fallback.
    #[arg(long)]
    no_proxy: bool,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("runrecord_stub=debug,tower_http=info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = StubConfig {
        bind_addr: SocketAddr::from(([127, 0, 0, 1], args.port)),
        encrypt: !args.no_encrypt,
        proxy: !args.no_proxy,
        ..Default::default()
    };

    let stub = match spawn_stub(config).await {
        Ok((_, stub)) => stub,
        Err(e) => {
            eprintln!("Error: failed to start stub: {e}");
            std::process::exit(1);
        }
    };
    eprintln!("Stub recording service: {}", stub.api_url());

    if let Err(e) = tokio::signal::ctrl_c().await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
