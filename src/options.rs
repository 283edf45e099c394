use crate::RetryPolicy;

/// Configures timeout, retry behavior and default headers.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ClientOptions {
    /// Per-attempt timeout in milliseconds. `0` disables the timeout.
    pub timeout_ms: u64,
    /// Retry policy applied to every call.
    pub retry: RetryPolicy,
    /// Headers added to every request before the credential and options.
    pub default_headers: Vec<(String, String)>,
    /// `User-Agent` header value.
    pub user_agent: String,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            timeout_ms: 30_000,
            retry: RetryPolicy::default(),
            default_headers: Vec::new(),
            user_agent: format!("gitlab-http/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl ClientOptions {
    pub fn with_default_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.default_headers.push((name.into(), value.into()));
        self
    }
}
