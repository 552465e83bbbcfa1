//! Error taxonomy for calls to the recording service.
//!
//! [`ApiError`] describes how a single outbound call failed. [`Error`] is what
//! the public operations on [`CloudApi`](crate::CloudApi) return: its
//! [`Error::Api`] variant tags a failure as coming from the recording service,
//! so callers can tell "our outbound call failed" apart from local failures
//! such as an unserializable payload.

use std::time::Duration;

use thiserror::Error;

/// How one outbound call failed.
#[non_exhaustive]
#[derive(Debug, Clone, Error)]
pub enum ApiError {
    /// Connection-level failure; the server never produced a status.
    #[error("request failed: {message}")]
    Transport { message: String },

    /// The attempt exceeded its per-request timeout.
    #[error("request timed out after {}s", timeout.as_secs_f64())]
    Timeout { timeout: Duration },

    /// The server answered with an error status. `body` is always plaintext,
    /// even when the response was encrypted on the wire.
    #[error("{}", format_status(*code, body))]
    Status {
        code: u16,
        body: serde_json::Value,
    },

    /// The response payload could not be opened.
    #[error("decryption failed: {0}")]
    Decryption(String),
}

impl ApiError {
    pub fn transport(message: impl Into<String>) -> Self {
        ApiError::Transport {
            message: message.into(),
        }
    }

    pub fn status(code: u16, body: serde_json::Value) -> Self {
        ApiError::Status { code, body }
    }

    /// HTTP status carried by the error, if the server produced one.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            ApiError::Status { code, .. } => Some(*code),
            _ => None,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, ApiError::Timeout { .. })
    }

    pub fn is_decryption(&self) -> bool {
        matches!(self, ApiError::Decryption(_))
    }
}

/// Render a status error. Object bodies are pretty-printed beneath the code so
/// the server's explanation is readable in terminal output.
fn format_status(code: u16, body: &serde_json::Value) -> String {
    match body {
        serde_json::Value::Object(_) => {
            let pretty = serde_json::to_string_pretty(body).unwrap_or_else(|_| body.to_string());
            format!("{code}\n\n{pretty}")
        }
        serde_json::Value::Null => code.to_string(),
        serde_json::Value::String(s) => format!("{code} - {s}"),
        other => format!("{code} - {other}"),
    }
}

/// Error returned by the public operations of [`CloudApi`](crate::CloudApi).
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum Error {
    /// An outbound call to the recording service failed.
    #[error(transparent)]
    Api(#[from] ApiError),

    /// A payload could not be converted to or from JSON.
    #[error("invalid JSON payload: {0}")]
    Payload(#[from] serde_json::Error),

    /// A response was missing a field the operation depends on.
    #[error("response is missing `{0}`")]
    MissingField(&'static str),

    /// The HTTP client could not be constructed.
    #[error("failed to build HTTP client: {0}")]
    Client(String),

    /// A client was built without an envelope codec.
    #[error("no envelope codec configured")]
    MissingCodec,

    #[error(transparent)]
    Config(#[from] crate::config::ConfigError),
}

impl Error {
    /// Whether this failure originated from a call to the recording service.
    pub fn is_api_error(&self) -> bool {
        matches!(self, Error::Api(_))
    }

    pub fn api_error(&self) -> Option<&ApiError> {
        match self {
            Error::Api(e) => Some(e),
            _ => None,
        }
    }

    pub fn status_code(&self) -> Option<u16> {
        self.api_error().and_then(ApiError::status_code)
    }
}
