//! Request encoding and response decoding for end-to-end encrypted calls.
//!
//! Encoding and decoding are two explicit phases tied together by the
//! [`SessionKey`] returned from [`EncryptionPipeline::encode`]:
//!
//! ```text
//! encode(mode, request) ── Some(envelope) ──▶ transport ──▶ decode(envelope, response)
//!        └─ mode Off ──── None ────────────▶ transport ──▶ decode(None, response)
//! ```
//!
//! The cipher itself lives behind [`EnvelopeCodec`]. This module only decides
//! when to apply it and how to react to the `x-cypress-encrypted` signal.

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use thiserror::Error;
use zeroize::Zeroizing;

use crate::HEADER_ENCRYPTED;
use crate::error::ApiError;
use crate::retry::AttemptError;
use crate::transport::{WireRequest, WireResponse};

/// Per-request encryption setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EncryptMode {
    /// Bodies pass through untouched.
    #[default]
    Off,
    /// Encrypt the request; decode the response only if the server signals it.
    On,
    /// Encrypt the request; treat every non-5xx response as encrypted.
    Always,
}

impl From<bool> for EncryptMode {
    fn from(enabled: bool) -> Self {
        if enabled {
            EncryptMode::On
        } else {
            EncryptMode::Off
        }
    }
}

/// Ephemeral key for one attempt. Memory is zeroed on drop via [`Zeroizing`].
#[derive(Clone, PartialEq, Eq)]
pub struct SessionKey(Zeroizing<Vec<u8>>);

impl SessionKey {
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(Zeroizing::new(bytes))
    }

    /// A fresh random 128-bit key.
    pub fn generate() -> Self {
        Self::from_bytes(uuid::Uuid::new_v4().into_bytes().to_vec())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl std::fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SessionKey([REDACTED])")
    }
}

/// Errors from sealing or opening an envelope.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum CodecError {
    /// The envelope is not in the expected format.
    #[error("malformed envelope: {0}")]
    Malformed(String),

    /// The envelope was sealed under a different key.
    #[error("envelope was sealed with a different key")]
    KeyMismatch,

    /// The cipher rejected the operation.
    #[error("envelope operation failed: {0}")]
    OperationFailed(String),
}

/// Seals request bodies and opens response bodies.
///
/// Implementations own key exchange and the cipher. `seal` produces a fresh
/// key per call; `open` must fail when given any key other than the one the
/// payload was sealed under.
#[async_trait]
pub trait EnvelopeCodec: Send + Sync {
    async fn seal(
        &self,
        body: &serde_json::Value,
    ) -> Result<(SessionKey, serde_json::Value), CodecError>;

    async fn open(
        &self,
        envelope: &serde_json::Value,
        key: &SessionKey,
    ) -> Result<serde_json::Value, CodecError>;
}

const DEV_PREFIX: &str = "dev1";

/// Keyed envelope format for local stub servers and tests.
///
/// Envelopes look like `dev1.<key>.<payload>`: the key travels in the clear
/// and the payload is only masked with it, so this provides no
/// confidentiality. It does have the properties the protocol relies on: a
/// response sealed for one key fails to open with another, and corrupted
/// envelopes are rejected.
#[derive(Debug, Clone, Copy, Default)]
pub struct DevEnvelopeCodec;

impl DevEnvelopeCodec {
    /// Seal `body` under an existing key (the server side of a response).
    pub fn seal_with(&self, body: &serde_json::Value, key: &SessionKey) -> serde_json::Value {
        let mut payload = body.to_string().into_bytes();
        mask(&mut payload, key.as_bytes());
        serde_json::Value::String(format!(
            "{DEV_PREFIX}.{}.{}",
            URL_SAFE_NO_PAD.encode(key.as_bytes()),
            URL_SAFE_NO_PAD.encode(&payload)
        ))
    }

    /// Open a request envelope, recovering the key the client generated
    /// (the server side of a request).
    pub fn open_request(
        &self,
        envelope: &serde_json::Value,
    ) -> Result<(SessionKey, serde_json::Value), CodecError> {
        let (key, payload) = split_envelope(envelope)?;
        let body = unmask(payload, &key)?;
        Ok((key, body))
    }
}

#[async_trait]
impl EnvelopeCodec for DevEnvelopeCodec {
    async fn seal(
        &self,
        body: &serde_json::Value,
    ) -> Result<(SessionKey, serde_json::Value), CodecError> {
        let key = SessionKey::generate();
        let envelope = self.seal_with(body, &key);
        Ok((key, envelope))
    }

    async fn open(
        &self,
        envelope: &serde_json::Value,
        key: &SessionKey,
    ) -> Result<serde_json::Value, CodecError> {
        let (sealed_for, payload) = split_envelope(envelope)?;
        if &sealed_for != key {
            return Err(CodecError::KeyMismatch);
        }
        unmask(payload, key)
    }
}

fn split_envelope(envelope: &serde_json::Value) -> Result<(SessionKey, Vec<u8>), CodecError> {
    let text = envelope
        .as_str()
        .ok_or_else(|| CodecError::Malformed("envelope is not a string".into()))?;
    let mut parts = text.splitn(3, '.');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(DEV_PREFIX), Some(key), Some(payload)) => {
            let key = URL_SAFE_NO_PAD
                .decode(key)
                .map_err(|e| CodecError::Malformed(format!("key: {e}")))?;
            let payload = URL_SAFE_NO_PAD
                .decode(payload)
                .map_err(|e| CodecError::Malformed(format!("payload: {e}")))?;
            if key.is_empty() {
                return Err(CodecError::Malformed("empty key".into()));
            }
            Ok((SessionKey::from_bytes(key), payload))
        }
        _ => Err(CodecError::Malformed("unrecognized envelope format".into())),
    }
}

fn unmask(mut payload: Vec<u8>, key: &SessionKey) -> Result<serde_json::Value, CodecError> {
    mask(&mut payload, key.as_bytes());
    serde_json::from_slice(&payload).map_err(|e| CodecError::Malformed(e.to_string()))
}

fn mask(data: &mut [u8], key: &[u8]) {
    for (byte, k) in data.iter_mut().zip(key.iter().cycle()) {
        *byte ^= k;
    }
}

/// Context kept between encoding a request and decoding its response.
#[derive(Debug)]
pub struct EncryptedEnvelope {
    pub key: SessionKey,
    pub mode: EncryptMode,
}

/// Applies an [`EnvelopeCodec`] according to a request's [`EncryptMode`].
pub struct EncryptionPipeline<'a> {
    codec: &'a dyn EnvelopeCodec,
}

impl<'a> EncryptionPipeline<'a> {
    pub fn new(codec: &'a dyn EnvelopeCodec) -> Self {
        Self { codec }
    }

    /// Replace the request body with its envelope and mark the request as
    /// encrypted. Returns `None` without touching the request when `mode` is
    /// [`EncryptMode::Off`].
    ///
    /// A request without a body is sealed as `null`.
    pub async fn encode(
        &self,
        mode: EncryptMode,
        request: &mut WireRequest,
    ) -> Result<Option<EncryptedEnvelope>, AttemptError> {
        if mode == EncryptMode::Off {
            return Ok(None);
        }
        let body = request.body.take().unwrap_or(serde_json::Value::Null);
        let (key, envelope) = self.codec.seal(&body).await.map_err(|e| {
            AttemptError::Transform(ApiError::Decryption(format!(
                "could not seal request: {e}"
            )))
        })?;
        request.body = Some(envelope);
        request
            .headers
            .insert(HEADER_ENCRYPTED.to_string(), "1".to_string());
        Ok(Some(EncryptedEnvelope { key, mode }))
    }

    /// Interpret a response, opening it when the server signals encryption or
    /// when the request was sent in [`EncryptMode::Always`] and the status is
    /// below 500.
    ///
    /// Failures while opening, and opened bodies carrying a status above 400,
    /// are transform failures: they are never retried and the caller sees the
    /// plaintext body.
    pub async fn decode(
        &self,
        envelope: Option<&EncryptedEnvelope>,
        response: WireResponse,
    ) -> Result<serde_json::Value, AttemptError> {
        let status = response.status;
        let success = response.is_success();
        let body = parse_body(&response.body);

        if let Some(env) = envelope {
            let signalled = response.header(HEADER_ENCRYPTED).is_some();
            if signalled || (env.mode == EncryptMode::Always && status < 500) {
                let decoded = self.codec.open(&body, &env.key).await.map_err(|e| {
                    AttemptError::Transform(ApiError::Decryption(e.to_string()))
                })?;
                if status > 400 {
                    return Err(AttemptError::Transform(ApiError::status(status, decoded)));
                }
                return finish(success, status, decoded);
            }
        }

        finish(success, status, body)
    }
}

fn finish(
    success: bool,
    status: u16,
    body: serde_json::Value,
) -> Result<serde_json::Value, AttemptError> {
    if success {
        Ok(body)
    } else {
        Err(AttemptError::Request(ApiError::status(status, body)))
    }
}

/// Parse a response body as JSON, keeping non-JSON text as a string and an
/// empty body as `null`.
pub(crate) fn parse_body(text: &str) -> serde_json::Value {
    if text.trim().is_empty() {
        return serde_json::Value::Null;
    }
    serde_json::from_str(text).unwrap_or_else(|_| serde_json::Value::String(text.to_string()))
}
