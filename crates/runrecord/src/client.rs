//! The request executor: every named operation against the recording service.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::cache::{CacheKey, ResponseCache};
use crate::config::ApiConfig;
use crate::envelope::{EncryptMode, EncryptionPipeline, EnvelopeCodec};
use crate::error::{ApiError, Error};
use crate::events::{ApiEvent, ApiEventHandler, LoggingHandler};
use crate::machine::{HostMachineId, MachineIdSource};
use crate::payload::{
    AuthUrls, CreateInstanceOptions, CreateRunOptions, InstanceResultsOptions,
    InstanceStdoutOptions, InstanceTestsOptions, PreflightInfo, runner_capabilities,
};
use crate::preflight::{Dispatch, PreflightNegotiator, PreflightResponse, RecordSession};
use crate::request::RequestDescriptor;
use crate::retry::{AttemptError, Retrier, Sleeper, TokioSleeper};
use crate::routes::Routes;
use crate::transport::{ReqwestTransport, Transport, WireRequest};
use crate::{
    HEADER_CLIENT_VERSION, HEADER_MACHINE_ID, HEADER_OS_NAME, HEADER_REQUEST_ATTEMPT,
    HEADER_ROUTE_VERSION, HEADER_RUN_ID,
};

/// Default timeout for crash reports.
pub const CRASH_REPORT_TIMEOUT: Duration = Duration::from_secs(3);

/// Client for the recording service.
///
/// Holds the response cache and the collaborators every call goes through.
/// Run-scoped operations take a [`RecordSession`] created by
/// [`CloudApi::new_session`]; the session carries the negotiated base address
/// and encryption setting for that run.
pub struct CloudApi {
    config: ApiConfig,
    routes: Routes,
    transport: Arc<dyn Transport>,
    codec: Arc<dyn EnvelopeCodec>,
    sleeper: Arc<dyn Sleeper>,
    events: Arc<dyn ApiEventHandler>,
    machine_ids: Arc<dyn MachineIdSource>,
    cache: ResponseCache,
}

/// Builder for [`CloudApi`]. The envelope codec is required; every other
/// unset collaborator gets a production default.
pub struct CloudApiBuilder {
    config: ApiConfig,
    transport: Option<Arc<dyn Transport>>,
    codec: Option<Arc<dyn EnvelopeCodec>>,
    sleeper: Option<Arc<dyn Sleeper>>,
    events: Option<Arc<dyn ApiEventHandler>>,
    machine_ids: Option<Arc<dyn MachineIdSource>>,
}

impl CloudApiBuilder {
    pub fn transport(mut self, transport: impl Transport + 'static) -> Self {
        self.transport = Some(Arc::new(transport));
        self
    }

    /// Envelope codec for encrypted calls. Required: the crate ships no
    /// production cipher, and [`DevEnvelopeCodec`](crate::envelope::DevEnvelopeCodec)
    /// is only suitable for local stubs.
    pub fn codec(mut self, codec: impl EnvelopeCodec + 'static) -> Self {
        self.codec = Some(Arc::new(codec));
        self
    }

    pub fn sleeper(mut self, sleeper: impl Sleeper + 'static) -> Self {
        self.sleeper = Some(Arc::new(sleeper));
        self
    }

    pub fn events(mut self, events: impl ApiEventHandler + 'static) -> Self {
        self.events = Some(Arc::new(events));
        self
    }

    pub fn machine_ids(mut self, source: impl MachineIdSource + 'static) -> Self {
        self.machine_ids = Some(Arc::new(source));
        self
    }

    pub fn build(self) -> Result<CloudApi, Error> {
        let codec = self.codec.ok_or(Error::MissingCodec)?;
        let transport: Arc<dyn Transport> = match self.transport {
            Some(t) => t,
            None => Arc::new(ReqwestTransport::new(&format!(
                "runrecord/{}",
                self.config.client_version
            ))?),
        };
        Ok(CloudApi {
            routes: Routes::new(self.config.api_url.clone()),
            transport,
            codec,
            sleeper: self.sleeper.unwrap_or_else(|| Arc::new(TokioSleeper)),
            events: self.events.unwrap_or_else(|| Arc::new(LoggingHandler)),
            machine_ids: self.machine_ids.unwrap_or_else(|| Arc::new(HostMachineId)),
            cache: ResponseCache::new(),
            config: self.config,
        })
    }
}

impl CloudApi {
    /// Client sealing encrypted calls with `codec` and using production
    /// defaults for every other collaborator.
    pub fn new(config: ApiConfig, codec: impl EnvelopeCodec + 'static) -> Result<Self, Error> {
        Self::builder(config).codec(codec).build()
    }

    pub fn builder(config: ApiConfig) -> CloudApiBuilder {
        CloudApiBuilder {
            config,
            transport: None,
            codec: None,
            sleeper: None,
            events: None,
            machine_ids: None,
        }
    }

    pub fn config(&self) -> &ApiConfig {
        &self.config
    }

    pub fn cache(&self) -> &ResponseCache {
        &self.cache
    }

    /// A fresh session for one run, starting from the configured base address
    /// with encryption on.
    pub fn new_session(&self) -> RecordSession {
        RecordSession::new(self.config.api_url.clone())
    }

    /// Empty the response cache. Call between independent runs in the same
    /// process.
    pub fn clear_cache(&self) {
        debug!(entries = self.cache.len(), "clearing response cache");
        self.cache.clear();
    }

    pub async fn ping(&self) -> Result<(), Error> {
        self.send_once(RequestDescriptor::get(self.routes.ping()))
            .await?;
        Ok(())
    }

    /// Dashboard login and logout addresses. Cached until [`clear_cache`](Self::clear_cache).
    pub async fn auth_urls(&self) -> Result<AuthUrls, Error> {
        let body = self
            .send_once(
                RequestDescriptor::get(self.routes.auth())
                    .header(HEADER_ROUTE_VERSION, 2)
                    .cacheable(),
            )
            .await?;
        Ok(serde_json::from_value(body)?)
    }

    /// Negotiate encryption and base address for `session`.
    pub async fn preflight(
        &self,
        session: &RecordSession,
        info: &PreflightInfo,
    ) -> Result<PreflightResponse, Error> {
        PreflightNegotiator::new(
            self,
            &self.config.retry,
            self.sleeper.as_ref(),
            self.events.as_ref(),
            &self.config.api_url,
        )
        .env_url(self.config.env_url.as_deref())
        .negotiate(session, info)
        .await
    }

    /// Negotiate, then create the run on the negotiated base address.
    ///
    /// Warnings from the negotiation come first in the returned `warnings`.
    pub async fn create_run(
        &self,
        session: &RecordSession,
        options: &CreateRunOptions,
    ) -> Result<Value, Error> {
        let negotiated = self.preflight(session, &options.preflight_info()).await?;

        let mut body = serde_json::to_value(options)?;
        if let Value::Object(fields) = &mut body {
            fields.insert("runnerCapabilities".into(), runner_capabilities());
        }
        let url = session.routes().runs();
        let encrypt = session.encrypt_mode();

        let mut run = self
            .send_with_retry("create run", |attempt| {
                RequestDescriptor::post(&url)
                    .header(HEADER_ROUTE_VERSION, 4)
                    .header(HEADER_REQUEST_ATTEMPT, attempt)
                    .json(body.clone())
                    .encrypt(encrypt)
                    .timeout_opt(options.timeout)
            })
            .await?;

        if let Some(warnings) = negotiated.warnings {
            merge_warnings(&mut run, warnings);
        }
        Ok(run)
    }

    pub async fn create_instance(
        &self,
        session: &RecordSession,
        options: &CreateInstanceOptions,
    ) -> Result<Value, Error> {
        let body = serde_json::to_value(options)?;
        let url = session.routes().instances(&options.run_id);
        let encrypt = session.encrypt_mode();

        self.send_with_retry("create instance", |attempt| {
            RequestDescriptor::post(&url)
                .header(HEADER_ROUTE_VERSION, 5)
                .header(HEADER_RUN_ID, &options.run_id)
                .header(HEADER_REQUEST_ATTEMPT, attempt)
                .json(body.clone())
                .encrypt(encrypt)
                .timeout_opt(options.timeout)
        })
        .await
    }

    pub async fn post_instance_tests(
        &self,
        session: &RecordSession,
        options: &InstanceTestsOptions,
    ) -> Result<Value, Error> {
        self.post_instance(
            "post instance tests",
            session.routes().instance_tests(&options.instance_id),
            session.encrypt_mode(),
            &options.run_id,
            options,
            options.timeout,
        )
        .await
    }

    pub async fn update_instance_stdout(
        &self,
        session: &RecordSession,
        options: &InstanceStdoutOptions,
    ) -> Result<Value, Error> {
        let url = session.routes().instance_stdout(&options.instance_id);
        let body = serde_json::json!({ "stdout": options.stdout });

        self.send_with_retry("update instance stdout", |attempt| {
            RequestDescriptor::put(&url)
                .header(HEADER_RUN_ID, &options.run_id)
                .header(HEADER_REQUEST_ATTEMPT, attempt)
                .json(body.clone())
                .timeout_opt(options.timeout)
        })
        .await
    }

    pub async fn post_instance_results(
        &self,
        session: &RecordSession,
        options: &InstanceResultsOptions,
    ) -> Result<Value, Error> {
        self.post_instance(
            "post instance results",
            session.routes().instance_results(&options.instance_id),
            session.encrypt_mode(),
            &options.run_id,
            options,
            options.timeout,
        )
        .await
    }

    /// Report an unexpected exception. Not retried.
    pub async fn create_crash_report(
        &self,
        body: &Value,
        auth_token: &str,
        timeout: Option<Duration>,
    ) -> Result<Value, Error> {
        self.send_once(
            RequestDescriptor::post(self.routes.exceptions())
                .json(body.clone())
                .bearer(auth_token)
                .timeout(timeout.unwrap_or(CRASH_REPORT_TIMEOUT)),
        )
        .await
    }

    /// Invalidate `auth_token` with the dashboard. Server errors are retried;
    /// an already-invalid token (401) counts as logged out.
    pub async fn log_out(&self, auth_token: &str) -> Result<(), Error> {
        let (urls, machine_id) = futures::join!(self.auth_urls(), self.machine_ids.machine_id());
        let url = urls?
            .dashboard_logout_url
            .ok_or(Error::MissingField("dashboardLogoutUrl"))?;

        let result = self
            .send_with_retry("log out", |_| {
                let request = RequestDescriptor::post(&url).bearer(auth_token);
                match &machine_id {
                    Some(id) => request.header(HEADER_MACHINE_ID, id),
                    None => request,
                }
            })
            .await;

        match result {
            Ok(_) => Ok(()),
            Err(Error::Api(ApiError::Status { code: 401, .. })) => {
                debug!("logout token already invalid");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn post_instance(
        &self,
        operation: &str,
        url: String,
        encrypt: EncryptMode,
        run_id: &str,
        options: &impl Serialize,
        timeout: Option<Duration>,
    ) -> Result<Value, Error> {
        let body = serde_json::to_value(options)?;
        self.send_with_retry(operation, |attempt| {
            RequestDescriptor::post(&url)
                .header(HEADER_ROUTE_VERSION, 1)
                .header(HEADER_RUN_ID, run_id)
                .header(HEADER_REQUEST_ATTEMPT, attempt)
                .json(body.clone())
                .encrypt(encrypt)
                .timeout_opt(timeout)
        })
        .await
    }

    async fn send_once(&self, request: RequestDescriptor) -> Result<Value, Error> {
        self.execute(request)
            .await
            .map_err(|e| Error::Api(e.into_inner()))
    }

    async fn send_with_retry(
        &self,
        operation: &str,
        build: impl Fn(u32) -> RequestDescriptor,
    ) -> Result<Value, Error> {
        let retrier = Retrier::new(
            &self.config.retry,
            self.sleeper.as_ref(),
            self.events.as_ref(),
            operation,
        );
        Ok(retrier.run(|attempt| self.execute(build(attempt))).await?)
    }

    /// One physical attempt: cache lookup, default headers, encode, send,
    /// decode, cache store.
    async fn execute(&self, request: RequestDescriptor) -> Result<Value, AttemptError> {
        let RequestDescriptor {
            method,
            url,
            headers,
            body,
            cacheable,
            encrypt,
            bearer,
            timeout,
        } = request;

        let cache_key = cacheable.then(|| CacheKey::new(method.clone(), url.clone()));
        if let Some(key) = &cache_key
            && let Some(cached) = self.cache.get(key)
        {
            self.events.on_event(&ApiEvent::CacheHit { url: &url });
            return Ok(cached);
        }

        let mut wire = WireRequest {
            method,
            url,
            headers,
            body,
            bearer,
            timeout: timeout.unwrap_or(crate::request::DEFAULT_TIMEOUT),
        };
        wire.headers
            .insert(HEADER_OS_NAME.into(), self.config.os_name.clone());
        wire.headers
            .insert(HEADER_CLIENT_VERSION.into(), self.config.client_version.clone());

        let pipeline = EncryptionPipeline::new(self.codec.as_ref());
        let envelope = pipeline.encode(encrypt, &mut wire).await?;

        let url = wire.url.clone();
        self.events.on_event(&ApiEvent::RequestSent {
            method: wire.method.as_str(),
            url: &url,
            attempt: wire
                .header(HEADER_REQUEST_ATTEMPT)
                .and_then(|a| a.parse().ok()),
            encrypted: envelope.is_some(),
        });

        let start = Instant::now();
        let response = self.transport.send(wire).await?;
        self.events.on_event(&ApiEvent::ResponseReceived {
            url: &url,
            status: response.status,
            elapsed: start.elapsed(),
        });

        let body = pipeline.decode(envelope.as_ref(), response).await?;
        if let Some(key) = cache_key {
            self.cache.put(key, body.clone());
            self.events.on_event(&ApiEvent::CacheStored { url: &url });
        }
        Ok(body)
    }
}

#[async_trait]
impl Dispatch for CloudApi {
    async fn dispatch(&self, request: RequestDescriptor) -> Result<Value, AttemptError> {
        self.execute(request).await
    }
}

/// Prepend `earlier` to the `warnings` array of `run`, creating it if absent.
fn merge_warnings(run: &mut Value, earlier: Vec<Value>) {
    let Value::Object(fields) = run else {
        return;
    };
    let later = match fields.remove("warnings") {
        Some(Value::Array(items)) => items,
        Some(Value::Null) | None => Vec::new(),
        Some(other) => vec![other],
    };
    let mut merged = earlier;
    merged.extend(later);
    fields.insert("warnings".into(), Value::Array(merged));
}
