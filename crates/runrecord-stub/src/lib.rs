//! Local stand-in for the recording service.
//!
//! `runrecord-stub` serves the routes `runrecord` talks to, speaking the same
//! wire contract: route-version and attempt headers, encrypted bodies sealed
//! with [`DevEnvelopeCodec`](runrecord::envelope::DevEnvelopeCodec), and the
//! `preflight` negotiation on both the direct and the proxy base. Every
//! request is recorded so tests can assert on what reached the server.
//!
//! # Quick start
//!
//! ```ignore
//! use runrecord_stub::{StubConfig, spawn_stub};
//!
//! let (addr, stub) = spawn_stub(StubConfig::default()).await?;
//! println!("API: {}", stub.api_url());
//!
//! // Make the next two run creations fail before succeeding.
//! stub.fail_next("/api/runs", [503, 502]);
//! ```
//!
//! # Layout
//!
//! ```text
//! /api/...        direct base  (ping, auth, preflight, runs, instances, exceptions, logout)
//! /api-proxy/...  proxy base   (same routes; mounted unless `proxy` is false)
//! /_stub/requests recorded requests as JSON
//! ```

mod api;
mod server;

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use serde::Serialize;
use serde_json::Value;

/// Configuration for the stub server.
#[derive(Debug, Clone)]
pub struct StubConfig {
    /// Address to bind to. Default: `127.0.0.1:0` (any free port).
    pub bind_addr: SocketAddr,
    /// Negotiated encryption setting returned by `preflight`. Default: `true`.
    pub encrypt: bool,
    /// Base address returned by `preflight`. Default: the stub's own direct base.
    pub api_url: Option<String>,
    /// Warnings returned by `preflight`.
    pub preflight_warnings: Vec<Value>,
    /// Mount the routes under `/api-proxy` as well. Default: `true`.
    pub proxy: bool,
}

impl Default for StubConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            encrypt: true,
            api_url: None,
            preflight_warnings: Vec::new(),
            proxy: true,
        }
    }
}

/// One request as the stub received it, body already opened.
#[derive(Debug, Clone, Serialize)]
pub struct RecordedRequest {
    pub method: String,
    pub path: String,
    pub headers: BTreeMap<String, String>,
    pub body: Value,
    pub encrypted: bool,
}

impl RecordedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }
}

#[derive(Debug, Default)]
struct Journal {
    requests: Vec<RecordedRequest>,
    failures: HashMap<String, VecDeque<u16>>,
    next_id: u64,
}

#[derive(Debug)]
struct Settings {
    origin: String,
    encrypt: bool,
    api_url: Option<String>,
    preflight_warnings: Vec<Value>,
}

/// Shared handle to a running stub.
#[derive(Debug, Clone)]
pub struct StubState {
    settings: Arc<Settings>,
    journal: Arc<Mutex<Journal>>,
}

impl StubState {
    fn new(origin: String, config: &StubConfig) -> Self {
        Self {
            settings: Arc::new(Settings {
                origin,
                encrypt: config.encrypt,
                api_url: config.api_url.clone(),
                preflight_warnings: config.preflight_warnings.clone(),
            }),
            journal: Arc::new(Mutex::new(Journal::default())),
        }
    }

    /// Direct base address, e.g. `http://127.0.0.1:4000/api/`.
    pub fn api_url(&self) -> String {
        format!("{}/api/", self.settings.origin)
    }

    /// Every request received so far, in arrival order.
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.journal().requests.clone()
    }

    /// Requests whose path ends with `suffix`.
    pub fn requests_to(&self, suffix: &str) -> Vec<RecordedRequest> {
        self.journal()
            .requests
            .iter()
            .filter(|r| r.path.ends_with(suffix))
            .cloned()
            .collect()
    }

    /// Answer the next requests to `path` with these statuses, in order,
    /// before handling normally.
    pub fn fail_next(&self, path: &str, statuses: impl IntoIterator<Item = u16>) {
        self.journal()
            .failures
            .entry(path.to_string())
            .or_default()
            .extend(statuses);
    }

    fn journal(&self) -> std::sync::MutexGuard<'_, Journal> {
        self.journal.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn record(&self, request: RecordedRequest) {
        self.journal().requests.push(request);
    }

    fn take_failure(&self, path: &str) -> Option<u16> {
        self.journal()
            .failures
            .get_mut(path)
            .and_then(VecDeque::pop_front)
    }

    fn next_id(&self) -> u64 {
        let mut journal = self.journal();
        journal.next_id += 1;
        journal.next_id
    }
}

/// Bind, start serving in the background, and return the bound address with
/// a handle to the stub's state.
pub async fn spawn_stub(config: StubConfig) -> std::io::Result<(SocketAddr, StubState)> {
    let listener = server::bind(config.bind_addr).await?;
    let addr = listener.local_addr()?;
    let state = StubState::new(format!("http://{addr}"), &config);
    let router = server::build_router(state.clone(), config.proxy);
    server::serve(listener, router);
    Ok((addr, state))
}
