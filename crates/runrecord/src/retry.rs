//! Retry with a fixed backoff schedule.
//!
//! Retries timeouts, 5xx responses, and connection failures that never
//! produced a status. Never retries 4xx responses or anything that failed
//! while opening an encrypted payload: the payload itself is unreadable and
//! another attempt will not change that.
//!
//! The loop is an explicit state machine:
//!
//! ```text
//! Attempting(i) ── ok ──────────────────────────▶ return value
//!       │
//!       └─ err ─┬─ retriable, i < len ─▶ BackoffWait(i) ─▶ Attempting(i + 1)
//!               └─ otherwise ─────────────────────────────▶ return error
//! ```
//!
//! Delays go through a [`Sleeper`] so tests can observe them without waiting.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::error::ApiError;
use crate::events::{ApiEvent, ApiEventHandler};

pub const THIRTY_SECONDS: Duration = Duration::from_secs(30);
pub const SIXTY_SECONDS: Duration = Duration::from_secs(60);
pub const TWO_MINUTES: Duration = Duration::from_secs(120);

/// Ordered waits between successive attempts.
///
/// Attempt `i` that fails retriably waits `delays[i]` before attempt `i + 1`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackoffSchedule {
    delays: Vec<Duration>,
}

impl Default for BackoffSchedule {
    fn default() -> Self {
        Self {
            delays: vec![THIRTY_SECONDS, SIXTY_SECONDS, TWO_MINUTES],
        }
    }
}

impl BackoffSchedule {
    pub fn new(delays: Vec<Duration>) -> Self {
        Self { delays }
    }

    /// The wait after a failed attempt `attempt`, or `None` when the schedule
    /// is exhausted and the failure should be surfaced.
    pub fn delay_for_attempt(&self, attempt: u32) -> Option<Duration> {
        self.delays.get(attempt as usize).copied()
    }

    pub fn delays(&self) -> &[Duration] {
        &self.delays
    }

    pub fn len(&self) -> usize {
        self.delays.len()
    }

    pub fn is_empty(&self) -> bool {
        self.delays.is_empty()
    }
}

/// Retry configuration shared by every operation of a client.
#[derive(Debug, Clone, Default)]
pub struct RetryPolicy {
    pub schedule: BackoffSchedule,
    /// Run every operation exactly once at attempt 0.
    pub disabled: bool,
}

impl RetryPolicy {
    pub fn new(schedule: BackoffSchedule) -> Self {
        Self {
            schedule,
            disabled: false,
        }
    }

    /// A policy that never retries.
    pub fn disabled() -> Self {
        Self {
            schedule: BackoffSchedule::default(),
            disabled: true,
        }
    }

    /// Decide what follows a failed attempt.
    pub fn decide(&self, attempt: u32, err: &AttemptError) -> RetryDecision {
        if self.disabled {
            return RetryDecision::Surface;
        }
        match err {
            AttemptError::Transform(_) => RetryDecision::Surface,
            AttemptError::Request(e) if !is_retriable(e) => RetryDecision::Surface,
            AttemptError::Request(_) => match self.schedule.delay_for_attempt(attempt) {
                Some(delay) => RetryDecision::RetryAfter(delay),
                None => RetryDecision::Surface,
            },
        }
    }
}

/// Outcome of [`RetryPolicy::decide`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    RetryAfter(Duration),
    Surface,
}

/// Where a failed attempt broke.
#[derive(Debug)]
pub enum AttemptError {
    /// Dispatch or status failure; classified by [`is_retriable`].
    Request(ApiError),
    /// Failure while decoding an encrypted response. Never retried.
    Transform(ApiError),
}

impl AttemptError {
    /// The underlying error, with the transform wrapper removed.
    pub fn into_inner(self) -> ApiError {
        match self {
            AttemptError::Request(e) | AttemptError::Transform(e) => e,
        }
    }

    pub fn inner(&self) -> &ApiError {
        match self {
            AttemptError::Request(e) | AttemptError::Transform(e) => e,
        }
    }
}

impl From<ApiError> for AttemptError {
    fn from(e: ApiError) -> Self {
        AttemptError::Request(e)
    }
}

/// Whether a request failure is worth another attempt: timeouts, 5xx, and
/// failures without any status.
pub fn is_retriable(err: &ApiError) -> bool {
    match err {
        ApiError::Timeout { .. } => true,
        ApiError::Status { code, .. } => (500..600).contains(code),
        ApiError::Transport { .. } => true,
        ApiError::Decryption(_) => false,
    }
}

/// Suspends between attempts.
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, delay: Duration);
}

/// Sleeps on the Tokio timer.
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, delay: Duration) {
        tokio::time::sleep(delay).await;
    }
}

/// State of one retry loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryState {
    Attempting(u32),
    BackoffWait { attempt: u32, delay: Duration },
}

/// Runs one logical operation under a [`RetryPolicy`].
pub struct Retrier<'a> {
    policy: &'a RetryPolicy,
    sleeper: &'a dyn Sleeper,
    events: &'a dyn ApiEventHandler,
    operation: &'a str,
}

impl<'a> Retrier<'a> {
    pub fn new(
        policy: &'a RetryPolicy,
        sleeper: &'a dyn Sleeper,
        events: &'a dyn ApiEventHandler,
        operation: &'a str,
    ) -> Self {
        Self {
            policy,
            sleeper,
            events,
            operation,
        }
    }

    /// Call `attempt_fn` with 0-based attempt indices until it succeeds, fails
    /// non-retriably, or the schedule runs out.
    pub async fn run<T, F, Fut>(&self, mut attempt_fn: F) -> Result<T, ApiError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, AttemptError>>,
    {
        if self.policy.disabled {
            debug!(operation = self.operation, "api retries disabled");
            return attempt_fn(0).await.map_err(AttemptError::into_inner);
        }

        let mut state = RetryState::Attempting(0);
        loop {
            state = match state {
                RetryState::Attempting(attempt) => match attempt_fn(attempt).await {
                    Ok(value) => return Ok(value),
                    Err(err) => match self.policy.decide(attempt, &err) {
                        RetryDecision::RetryAfter(delay) => {
                            self.events.on_event(&ApiEvent::RetryScheduled {
                                operation: self.operation,
                                attempt,
                                delay,
                                remaining: self.policy.schedule.len() - attempt as usize,
                                error: err.inner(),
                            });
                            RetryState::BackoffWait { attempt, delay }
                        }
                        RetryDecision::Surface => return Err(err.into_inner()),
                    },
                },
                RetryState::BackoffWait { attempt, delay } => {
                    self.sleeper.sleep(delay).await;
                    debug!(
                        operation = self.operation,
                        "retry #{} after {}ms",
                        attempt + 1,
                        delay.as_millis()
                    );
                    RetryState::Attempting(attempt + 1)
                }
            };
        }
    }
}
