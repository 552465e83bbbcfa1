//! Immutable description of one call.

use std::time::Duration;

use reqwest::Method;

use crate::envelope::EncryptMode;
use crate::retry::SIXTY_SECONDS;
use crate::transport::Headers;

/// Timeout applied when a descriptor does not carry its own.
pub const DEFAULT_TIMEOUT: Duration = SIXTY_SECONDS;

/// Everything needed to issue one call, before default headers and encoding.
///
/// Only GET descriptors can be cacheable; [`RequestDescriptor::cacheable`] on
/// any other method has no effect.
#[derive(Debug, Clone)]
pub struct RequestDescriptor {
    pub(crate) method: Method,
    pub(crate) url: String,
    pub(crate) headers: Headers,
    pub(crate) body: Option<serde_json::Value>,
    pub(crate) cacheable: bool,
    pub(crate) encrypt: EncryptMode,
    pub(crate) bearer: Option<String>,
    pub(crate) timeout: Option<Duration>,
}

impl RequestDescriptor {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: Headers::new(),
            body: None,
            cacheable: false,
            encrypt: EncryptMode::Off,
            bearer: None,
            timeout: None,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::GET, url)
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self::new(Method::POST, url)
    }

    pub fn put(url: impl Into<String>) -> Self {
        Self::new(Method::PUT, url)
    }

    pub fn header(mut self, name: &str, value: impl ToString) -> Self {
        self.headers
            .insert(name.to_ascii_lowercase(), value.to_string());
        self
    }

    /// Mark a GET as safe to answer from the response cache.
    pub fn cacheable(mut self) -> Self {
        self.cacheable = self.method == Method::GET;
        self
    }

    pub fn json(mut self, body: serde_json::Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn encrypt(mut self, mode: EncryptMode) -> Self {
        self.encrypt = mode;
        self
    }

    pub fn bearer(mut self, token: impl Into<String>) -> Self {
        self.bearer = Some(token.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set the timeout if one was supplied, otherwise keep the default.
    pub fn timeout_opt(mut self, timeout: Option<Duration>) -> Self {
        if timeout.is_some() {
            self.timeout = timeout;
        }
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn is_cacheable(&self) -> bool {
        self.cacheable
    }

    pub fn encrypt_mode(&self) -> EncryptMode {
        self.encrypt
    }

    /// The timeout this call will use.
    pub fn effective_timeout(&self) -> Duration {
        self.timeout.unwrap_or(DEFAULT_TIMEOUT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_get_can_be_cacheable() {
        assert!(RequestDescriptor::get("https://x/auth").cacheable().is_cacheable());
        assert!(!RequestDescriptor::post("https://x/runs").cacheable().is_cacheable());
    }

    #[test]
    fn long_timeout_by_default() {
        let desc = RequestDescriptor::post("https://x/runs");
        assert_eq!(desc.effective_timeout(), Duration::from_secs(60));
        let desc = desc.timeout_opt(Some(Duration::from_secs(5)));
        assert_eq!(desc.effective_timeout(), Duration::from_secs(5));
        let desc = desc.timeout_opt(None);
        assert_eq!(desc.effective_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn header_names_are_lowercased() {
        let desc = RequestDescriptor::get("https://x/").header("X-Route-Version", 2);
        assert_eq!(desc.headers.get("x-route-version").map(String::as_str), Some("2"));
    }
}
