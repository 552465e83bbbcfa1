//! Events and handlers for observing outbound calls.
//!
//! The client reports what it decided (retrying, serving from cache, falling
//! back during preflight) through [`ApiEvent`] values. Callers implement
//! [`ApiEventHandler`] to surface these as warnings, metrics, or test
//! assertions.
//!
//! # Choosing an event handler
//!
//! | Handler | Use case |
//! |---------|----------|
//! | [`NoopHandler`] | Tests or silent embedding |
//! | [`LoggingHandler`] | Structured logging via `tracing` (the default) |
//! | [`FnEventHandler`] | Quick closures for simple callbacks |
//! | [`CompositeEventHandler`] | Compose multiple handlers in order |

use std::time::Duration;

use tracing::{debug, info, warn};

use crate::error::ApiError;

/// Events emitted while executing calls against the recording service.
#[derive(Debug)]
pub enum ApiEvent<'a> {
    /// A request is about to be dispatched.
    RequestSent {
        method: &'a str,
        url: &'a str,
        attempt: Option<u32>,
        encrypted: bool,
    },
    /// A response arrived (any status).
    ResponseReceived {
        url: &'a str,
        status: u16,
        elapsed: Duration,
    },
    /// A retriable failure occurred and the next attempt is scheduled.
    RetryScheduled {
        operation: &'a str,
        attempt: u32,
        delay: Duration,
        remaining: usize,
        error: &'a ApiError,
    },
    /// A cacheable request was answered from the response cache.
    CacheHit { url: &'a str },
    /// A successful cacheable response was stored.
    CacheStored { url: &'a str },
    /// Negotiation against the proxy base failed; trying the direct base.
    PreflightFallback {
        proxy_url: &'a str,
        error: &'a ApiError,
    },
    /// Negotiation succeeded and the session was replaced.
    PreflightCompleted { encrypt: bool, api_url: &'a str },
}

/// Handler for client events.
///
/// The default implementation ignores every event.
pub trait ApiEventHandler: Send + Sync {
    fn on_event(&self, event: &ApiEvent<'_>) {
        let _ = event;
    }
}

/// Ignores all events.
pub struct NoopHandler;
impl ApiEventHandler for NoopHandler {}

/// An event handler backed by a closure.
///
/// ```ignore
/// let handler = FnEventHandler::new(|event| {
///     if let ApiEvent::RetryScheduled { delay, .. } = event {
///         eprintln!("retrying in {delay:?}");
///     }
/// });
/// ```
pub struct FnEventHandler<F>(F)
where
    F: Fn(&ApiEvent<'_>) + Send + Sync;

impl<F> FnEventHandler<F>
where
    F: Fn(&ApiEvent<'_>) + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

impl<F> ApiEventHandler for FnEventHandler<F>
where
    F: Fn(&ApiEvent<'_>) + Send + Sync,
{
    fn on_event(&self, event: &ApiEvent<'_>) {
        (self.0)(event)
    }
}

/// Dispatches every event to each inner handler in registration order.
pub struct CompositeEventHandler {
    handlers: Vec<Box<dyn ApiEventHandler>>,
}

impl CompositeEventHandler {
    pub fn new() -> Self {
        Self {
            handlers: Vec::new(),
        }
    }

    /// Add a handler to the chain.
    pub fn with(mut self, handler: impl ApiEventHandler + 'static) -> Self {
        self.handlers.push(Box::new(handler));
        self
    }

    /// Conditionally add a handler to the chain.
    pub fn with_if(self, condition: bool, handler: impl ApiEventHandler + 'static) -> Self {
        if condition { self.with(handler) } else { self }
    }
}

impl Default for CompositeEventHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl ApiEventHandler for CompositeEventHandler {
    fn on_event(&self, event: &ApiEvent<'_>) {
        for handler in &self.handlers {
            handler.on_event(event);
        }
    }
}

/// Logs events through `tracing`. Retries are warnings; everything else is
/// debug-level except a completed negotiation.
pub struct LoggingHandler;

impl ApiEventHandler for LoggingHandler {
    fn on_event(&self, event: &ApiEvent<'_>) {
        match event {
            ApiEvent::RequestSent {
                method,
                url,
                attempt,
                encrypted,
            } => {
                debug!(method, url, attempt, encrypted, "request to url");
            }
            ApiEvent::ResponseReceived {
                url,
                status,
                elapsed,
            } => {
                debug!(
                    url,
                    status,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "response received"
                );
            }
            ApiEvent::RetryScheduled {
                operation,
                attempt,
                delay,
                remaining,
                error,
            } => {
                warn!(
                    operation,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    remaining,
                    error = %error,
                    "recording service request failed, retrying"
                );
            }
            ApiEvent::CacheHit { url } => {
                debug!(url, "resolving with cached response");
            }
            ApiEvent::CacheStored { url } => {
                debug!(url, "caching response");
            }
            ApiEvent::PreflightFallback { proxy_url, error } => {
                debug!(proxy_url, error = %error, "preflight via proxy failed, trying direct route");
            }
            ApiEvent::PreflightCompleted { encrypt, api_url } => {
                info!(encrypt, api_url, "preflight negotiated");
            }
        }
    }
}
