//! Route URLs relative to an API base address.

/// Default recording service base address.
pub const DEFAULT_API_URL: &str = "https://api.cypress.io/";

/// Builds endpoint URLs from a base address. The base is normalized to end
/// with `/`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Routes {
    base: String,
}

impl Routes {
    pub fn new(base: impl Into<String>) -> Self {
        let mut base = base.into();
        if !base.ends_with('/') {
            base.push('/');
        }
        Self { base }
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    pub fn ping(&self) -> String {
        format!("{}ping", self.base)
    }

    pub fn auth(&self) -> String {
        format!("{}auth", self.base)
    }

    pub fn preflight(&self) -> String {
        format!("{}preflight", self.base)
    }

    pub fn runs(&self) -> String {
        format!("{}runs", self.base)
    }

    pub fn instances(&self, run_id: &str) -> String {
        format!("{}runs/{run_id}/instances", self.base)
    }

    pub fn instance_tests(&self, instance_id: &str) -> String {
        format!("{}instances/{instance_id}/tests", self.base)
    }

    pub fn instance_stdout(&self, instance_id: &str) -> String {
        format!("{}instances/{instance_id}/stdout", self.base)
    }

    pub fn instance_results(&self, instance_id: &str) -> String {
        format!("{}instances/{instance_id}/results", self.base)
    }

    pub fn exceptions(&self) -> String {
        format!("{}exceptions", self.base)
    }
}

impl Default for Routes {
    fn default() -> Self {
        Self::new(DEFAULT_API_URL)
    }
}

/// The negotiation proxy for a base address: the first `api` in the URL
/// becomes `api-proxy`.
pub fn proxy_base(api_url: &str) -> String {
    api_url.replacen("api", "api-proxy", 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_gets_trailing_slash() {
        let routes = Routes::new("http://localhost:1234");
        assert_eq!(routes.ping(), "http://localhost:1234/ping");
    }

    #[test]
    fn run_scoped_routes() {
        let routes = Routes::new("https://api.example/");
        assert_eq!(routes.instances("run-1"), "https://api.example/runs/run-1/instances");
        assert_eq!(
            routes.instance_results("inst-9"),
            "https://api.example/instances/inst-9/results"
        );
        assert_eq!(
            routes.instance_stdout("inst-9"),
            "https://api.example/instances/inst-9/stdout"
        );
    }

    #[test]
    fn proxy_base_replaces_first_api() {
        assert_eq!(
            proxy_base("https://api.cypress.io/"),
            "https://api-proxy.cypress.io/"
        );
        assert_eq!(proxy_base("http://localhost:1234/"), "http://localhost:1234/");
    }
}
