//! Talk to a recording service from the command line.
//!
//! Reads `CYPRESS_API_URL`, `API_RETRY_INTERVALS`, and `DISABLE_API_RETRIES`
//! from the environment; flags override them. Results are printed as JSON.
//!
//! No production envelope cipher ships with the crate, so the CLI only talks
//! to services that accept the development envelope, selected with
//! `--dev-envelope`.
//!
//! # Examples
//!
//! ```sh
//! # Check connectivity
//! runrecord --dev-envelope --api-url http://127.0.0.1:4000/api/ ping
//!
//! # Discover dashboard URLs
//! runrecord --dev-envelope auth-urls
//!
//! # Negotiate a run session, failing fast
//! runrecord --dev-envelope --retry-intervals 100,200 preflight --project-id abc123 --parallel
//! ```

use std::process;

use clap::{Parser, Subcommand};
use runrecord::config::parse_intervals;
use runrecord::envelope::DevEnvelopeCodec;
use runrecord::{ApiConfig, CloudApi, Error, PreflightInfo};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Talk to a recording service from the command line.
#[derive(Parser)]
#[command(name = "runrecord", version)]
struct Cli {
    /// Base address of the recording service
    #[arg(long)]
    api_url: Option<String>,

    /// Run every call exactly once
    #[arg(long)]
    no_retries: bool,

    /// Comma-separated backoff delays in milliseconds
    #[arg(long)]
    retry_intervals: Option<String>,

    /// Seal payloads with the unprotected development envelope (local stubs only)
    #[arg(long)]
    dev_envelope: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Check that the service is reachable
    Ping,
    /// Print the dashboard login and logout URLs
    AuthUrls,
    /// Negotiate encryption and base address for a run
    Preflight {
        #[arg(long)]
        project_id: String,

        #[arg(long)]
        ci_build_id: Option<String>,

        #[arg(long)]
        parallel: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("runrecord=info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    match run(cli).await {
        Ok(output) => println!("{output}"),
        Err(e) => {
            eprintln!("Error: {e}");
            process::exit(1);
        }
    }
}

async fn run(cli: Cli) -> Result<String, Error> {
    let mut config = ApiConfig::from_env()?;
    if let Some(url) = cli.api_url {
        config = config.with_api_url(url);
    }
    if let Some(intervals) = cli.retry_intervals {
        config = config.with_retry_schedule(parse_intervals(&intervals)?);
    }
    if cli.no_retries {
        config = config.with_retries_disabled(true);
    }

    let mut builder = CloudApi::builder(config);
    if cli.dev_envelope {
        builder = builder.codec(DevEnvelopeCodec);
    }
    let api = builder.build()?;
    let output = match cli.command {
        Command::Ping => {
            api.ping().await?;
            serde_json::json!({ "ok": true })
        }
        Command::AuthUrls => serde_json::to_value(api.auth_urls().await?)?,
        Command::Preflight {
            project_id,
            ci_build_id,
            parallel,
        } => {
            let session = api.new_session();
            let info = PreflightInfo {
                project_id: Some(project_id),
                ci_build_id,
                parallel: parallel.then_some(true),
                ..Default::default()
            };
            let response = api.preflight(&session, &info).await?;
            let negotiated = session.current();
            serde_json::json!({
                "encrypt": negotiated.encrypt,
                "apiUrl": negotiated.api_url,
                "warnings": response.warnings.unwrap_or_default(),
            })
        }
    };
    Ok(serde_json::to_string_pretty(&output)?)
}
