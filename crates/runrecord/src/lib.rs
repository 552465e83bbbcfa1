//! Resilient client for a test-run recording service.
//!
//! `runrecord` uploads test-run telemetry (runs, instances, results, logs) over
//! HTTP. It survives transient network failures with a fixed backoff
//! schedule, negotiates per run whether payloads are end-to-end encrypted and
//! which base address to use, and memoizes idempotent reads.
//!
//! # Getting started
//!
//! ```ignore
//! use runrecord::{ApiConfig, CloudApi, CreateRunOptions};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), runrecord::Error> {
//!     // `MyCodec` implements `runrecord::envelope::EnvelopeCodec`.
//!     let api = CloudApi::new(ApiConfig::from_env()?, MyCodec::load()?)?;
//!
//!     // One session per run; it holds the negotiated base address.
//!     let session = api.new_session();
//!     let run = api
//!         .create_run(
//!             &session,
//!             &CreateRunOptions {
//!                 project_id: "abc123".into(),
//!                 ..Default::default()
//!             },
//!         )
//!         .await?;
//!
//!     println!("{}", run["runUrl"]);
//!     Ok(())
//! }
//! ```
//!
//! # Where to find things
//!
//! - **Call the service:** [`CloudApi`] and its builder. Option types for each
//!   operation live in [`payload`].
//! - **Tune retries:** [`RetryPolicy`](retry::RetryPolicy) and
//!   [`BackoffSchedule`](retry::BackoffSchedule), usually via [`ApiConfig`].
//! - **Observe behavior:** implement [`ApiEventHandler`](events::ApiEventHandler)
//!   or use [`LoggingHandler`](events::LoggingHandler).
//! - **Plug in a cipher:** implement [`EnvelopeCodec`](envelope::EnvelopeCodec).
//! - **Test without a network:** implement [`Transport`](transport::Transport)
//!   and [`Sleeper`](retry::Sleeper).
//!
//! # Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`client`] | Request executor and named operations |
//! | [`preflight`] | Per-run negotiation and [`RecordSession`] |
//! | [`retry`] | Backoff schedule and retry state machine |
//! | [`envelope`] | Encrypted request/response pipeline |
//! | [`cache`] | Response cache for idempotent reads |
//! | [`transport`] | HTTP seam and `reqwest` implementation |
//! | [`events`] | Event types and handlers |
//! | [`error`] | Error taxonomy |
//! | [`config`] | Configuration and environment overrides |

pub mod cache;
pub mod client;
pub mod config;
pub mod envelope;
pub mod error;
pub mod events;
pub mod machine;
pub mod payload;
pub mod preflight;
pub mod request;
pub mod retry;
pub mod routes;
pub mod transport;

pub use client::{CloudApi, CloudApiBuilder};
pub use config::ApiConfig;
pub use error::{ApiError, Error};
pub use payload::{
    AuthUrls, CreateInstanceOptions, CreateRunOptions, InstanceResultsOptions,
    InstanceStdoutOptions, InstanceTestsOptions, PreflightInfo, TestingType,
};
pub use preflight::{PreflightResponse, PreflightSession, RecordSession};

/// Marks an encrypted request, and on a response, an encrypted body.
pub const HEADER_ENCRYPTED: &str = "x-cypress-encrypted";
/// Per-endpoint schema revision.
pub const HEADER_ROUTE_VERSION: &str = "x-route-version";
/// 0-based attempt index within one operation.
pub const HEADER_REQUEST_ATTEMPT: &str = "x-cypress-request-attempt";
pub const HEADER_RUN_ID: &str = "x-cypress-run-id";
pub const HEADER_CLIENT_VERSION: &str = "x-cypress-version";
pub const HEADER_OS_NAME: &str = "x-os-name";
pub const HEADER_MACHINE_ID: &str = "x-machine-id";
