//! Per-run negotiation of encryption and base route.
//!
//! Before the first state-mutating call of a run, the client posts a small
//! payload to `preflight` and the service answers with whether later payloads
//! should be encrypted and which base address the run should use. The answer
//! is stored in the run's [`RecordSession`].
//!
//! Each retry attempt first tries the proxy base (the configured address with
//! its first `api` replaced by `api-proxy`) and, on any failure, makes exactly
//! one further request to the direct base.

use std::sync::RwLock;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use crate::envelope::EncryptMode;
use crate::error::{ApiError, Error};
use crate::events::{ApiEvent, ApiEventHandler};
use crate::payload::PreflightInfo;
use crate::request::RequestDescriptor;
use crate::retry::{AttemptError, Retrier, RetryPolicy, Sleeper};
use crate::routes::{Routes, proxy_base};
use crate::{HEADER_REQUEST_ATTEMPT, HEADER_ROUTE_VERSION};

/// The negotiated settings for one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreflightSession {
    pub encrypt: bool,
    pub api_url: String,
}

impl PreflightSession {
    /// Settings before any negotiation: encryption on, configured base.
    pub fn initial(api_url: impl Into<String>) -> Self {
        Self {
            encrypt: true,
            api_url: api_url.into(),
        }
    }
}

/// Handle for one logical run. Run-scoped operations read their base address
/// and encryption setting from here.
///
/// The session is only ever read or replaced as a whole value.
#[derive(Debug)]
pub struct RecordSession {
    default_api_url: String,
    current: RwLock<PreflightSession>,
}

impl RecordSession {
    pub fn new(api_url: impl Into<String>) -> Self {
        let default_api_url = api_url.into();
        Self {
            current: RwLock::new(PreflightSession::initial(default_api_url.clone())),
            default_api_url,
        }
    }

    /// A snapshot of the current settings.
    pub fn current(&self) -> PreflightSession {
        self.current
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Replace the settings wholesale.
    pub fn replace(&self, session: PreflightSession) {
        *self.current.write().unwrap_or_else(|e| e.into_inner()) = session;
    }

    /// Return to the settings the session was created with.
    pub fn reset(&self) {
        self.replace(PreflightSession::initial(self.default_api_url.clone()));
    }

    /// Routes built on the negotiated base address.
    pub fn routes(&self) -> Routes {
        Routes::new(self.current().api_url)
    }

    pub fn encrypt_mode(&self) -> EncryptMode {
        EncryptMode::from(self.current().encrypt)
    }
}

/// Body of a successful negotiation.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PreflightResponse {
    pub encrypt: bool,
    pub api_url: String,
    #[serde(default)]
    pub warnings: Option<Vec<Value>>,
}

/// Performs one physical attempt of a request.
#[async_trait]
pub trait Dispatch: Send + Sync {
    async fn dispatch(&self, request: RequestDescriptor) -> Result<Value, AttemptError>;
}

/// Runs the negotiation under the client's retry policy.
pub struct PreflightNegotiator<'a> {
    dispatcher: &'a dyn Dispatch,
    policy: &'a RetryPolicy,
    sleeper: &'a dyn Sleeper,
    events: &'a dyn ApiEventHandler,
    api_url: &'a str,
    env_url: Option<&'a str>,
}

impl<'a> PreflightNegotiator<'a> {
    pub fn new(
        dispatcher: &'a dyn Dispatch,
        policy: &'a RetryPolicy,
        sleeper: &'a dyn Sleeper,
        events: &'a dyn ApiEventHandler,
        api_url: &'a str,
    ) -> Self {
        Self {
            dispatcher,
            policy,
            sleeper,
            events,
            api_url,
            env_url: None,
        }
    }

    /// Alternate address reported to the service as `envUrl`.
    pub fn env_url(mut self, env_url: Option<&'a str>) -> Self {
        self.env_url = env_url;
        self
    }

    /// Negotiate and, on success, replace `session` with the result.
    ///
    /// On failure the session is left untouched and the error that ended the
    /// retry loop is returned.
    pub async fn negotiate(
        &self,
        session: &RecordSession,
        info: &PreflightInfo,
    ) -> Result<PreflightResponse, Error> {
        let payload = self.payload(info)?;
        let proxy = Routes::new(proxy_base(self.api_url)).preflight();
        let direct = Routes::new(self.api_url).preflight();

        let retrier = Retrier::new(self.policy, self.sleeper, self.events, "preflight");
        let response = retrier
            .run(|attempt| {
                let (payload, proxy, direct) = (&payload, &proxy, &direct);
                async move {
                    let body = match self.post(proxy, attempt, payload).await {
                        Ok(body) => body,
                        Err(err) => {
                            self.events.on_event(&ApiEvent::PreflightFallback {
                                proxy_url: proxy,
                                error: err.inner(),
                            });
                            self.post(direct, attempt, payload).await?
                        }
                    };
                    parse_response(body)
                }
            })
            .await?;

        session.replace(PreflightSession {
            encrypt: response.encrypt,
            api_url: response.api_url.clone(),
        });
        self.events.on_event(&ApiEvent::PreflightCompleted {
            encrypt: response.encrypt,
            api_url: &response.api_url,
        });
        Ok(response)
    }

    fn payload(&self, info: &PreflightInfo) -> Result<Value, Error> {
        let mut body = serde_json::Map::new();
        body.insert("apiUrl".into(), Value::String(self.api_url.to_string()));
        if let Some(env_url) = self.env_url {
            body.insert("envUrl".into(), Value::String(env_url.to_string()));
        }
        if let Value::Object(fields) = serde_json::to_value(info)? {
            body.extend(fields);
        }
        Ok(Value::Object(body))
    }

    async fn post(&self, url: &str, attempt: u32, payload: &Value) -> Result<Value, AttemptError> {
        let request = RequestDescriptor::post(url)
            .header(HEADER_ROUTE_VERSION, 1)
            .header(HEADER_REQUEST_ATTEMPT, attempt)
            .json(payload.clone())
            .encrypt(EncryptMode::Always);
        self.dispatcher.dispatch(request).await
    }
}

fn parse_response(body: Value) -> Result<PreflightResponse, AttemptError> {
    serde_json::from_value(body).map_err(|e| {
        AttemptError::Transform(ApiError::Decryption(format!(
            "unexpected preflight response: {e}"
        )))
    })
}
