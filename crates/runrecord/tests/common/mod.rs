//! Shared utilities for executor integration tests.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use runrecord::envelope::DevEnvelopeCodec;
use runrecord::retry::Sleeper;
use runrecord::transport::{Transport, WireRequest, WireResponse};
use runrecord::{ApiConfig, ApiError, CloudApi, HEADER_ENCRYPTED};
use serde_json::Value;

pub const API: &str = "https://api.example/";

/// A scripted reply for one request.
#[allow(dead_code)]
pub enum Reply {
    /// Plain JSON body.
    Json(u16, Value),
    /// Body sealed with the key from the request envelope, signalled by header.
    Sealed(u16, Value),
    /// Failure before any status.
    Fail(ApiError),
    /// A response exactly as given.
    Raw(WireResponse),
}

/// Answers requests from per-route queues and records everything sent.
///
/// Routes are matched by URL suffix. A route with an empty queue answers 404.
#[derive(Clone, Default)]
pub struct ScriptedTransport {
    routes: Arc<Mutex<HashMap<String, VecDeque<Reply>>>>,
    sent: Arc<Mutex<Vec<WireRequest>>>,
}

#[allow(dead_code)]
impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(self, suffix: &str, reply: Reply) -> Self {
        self.routes
            .lock()
            .unwrap()
            .entry(suffix.to_string())
            .or_default()
            .push_back(reply);
        self
    }

    pub fn sent(&self) -> Vec<WireRequest> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_to(&self, suffix: &str) -> Vec<WireRequest> {
        self.sent()
            .into_iter()
            .filter(|r| r.url.ends_with(suffix))
            .collect()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, request: WireRequest) -> Result<WireResponse, ApiError> {
        self.sent.lock().unwrap().push(request.clone());

        let reply = {
            let mut routes = self.routes.lock().unwrap();
            let mut suffixes: Vec<_> = routes
                .keys()
                .filter(|s| request.url.ends_with(s.as_str()))
                .cloned()
                .collect();
            suffixes.sort_by_key(|s| std::cmp::Reverse(s.len()));
            suffixes
                .first()
                .and_then(|s| routes.get_mut(s))
                .and_then(VecDeque::pop_front)
        };

        match reply {
            None => Ok(WireResponse::new(404, "Not Found")),
            Some(Reply::Json(status, body)) => Ok(WireResponse::json(status, &body)),
            Some(Reply::Fail(err)) => Err(err),
            Some(Reply::Raw(response)) => Ok(response),
            Some(Reply::Sealed(status, body)) => {
                let envelope = request.body.clone().unwrap_or(Value::Null);
                let (key, _) = DevEnvelopeCodec
                    .open_request(&envelope)
                    .expect("request was not sealed");
                let sealed = DevEnvelopeCodec.seal_with(&body, &key);
                Ok(WireResponse::json(status, &sealed).with_header(HEADER_ENCRYPTED, "1"))
            }
        }
    }
}

/// Records requested delays without waiting.
#[derive(Clone, Default)]
pub struct RecordingSleeper(Arc<Mutex<Vec<Duration>>>);

#[allow(dead_code)]
impl RecordingSleeper {
    pub fn delays(&self) -> Vec<Duration> {
        self.0.lock().unwrap().clone()
    }
}

#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, delay: Duration) {
        self.0.lock().unwrap().push(delay);
    }
}

/// A client wired to the scripted transport with the default backoff schedule.
pub fn client(transport: &ScriptedTransport, sleeper: &RecordingSleeper) -> CloudApi {
    client_with(ApiConfig::default().with_api_url(API), transport, sleeper)
}

pub fn client_with(
    config: ApiConfig,
    transport: &ScriptedTransport,
    sleeper: &RecordingSleeper,
) -> CloudApi {
    CloudApi::builder(config)
        .transport(transport.clone())
        .codec(DevEnvelopeCodec)
        .sleeper(sleeper.clone())
        .machine_ids(runrecord::machine::FixedMachineId(Some("machine-1".into())))
        .build()
        .expect("client builds")
}
