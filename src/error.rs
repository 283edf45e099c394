use std::fmt;

use reqwest::StatusCode;
use serde_json::Value as JsonValue;

use crate::Response;

/// Upper bound on the response body kept for diagnostics.
pub const BODY_SNIPPET_LIMIT: usize = 1024;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Error type returned by this crate.
#[derive(Debug, thiserror::Error)]
pub enum GitlabError {
    /// Bad input detected before any network call.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// The server could not be reached.
    #[error("transport error: {0}")]
    Transport(#[source] BoxError),
    /// An attempt did not complete within its timeout.
    #[error("request timed out: {0}")]
    Timeout(String),
    /// The call's cancellation token fired.
    #[error("request canceled")]
    Canceled,
    /// 4xx response other than 429.
    #[error("{0}")]
    Client(Box<ApiFailure>),
    /// 429 response after retries were exhausted.
    #[error("rate limited: {0}")]
    RateLimited(Box<ApiFailure>),
    /// 5xx response after retries were exhausted.
    #[error("server error: {0}")]
    Server(Box<ApiFailure>),
    /// A successful response whose body did not match the expected shape.
    #[error("decode error: {message}; {failure}")]
    Decode {
        message: String,
        failure: Box<ApiFailure>,
    },
}

/// Closed set of failure kinds, see [`GitlabError::kind`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InvalidArgument,
    TransportFailure,
    Timeout,
    Canceled,
    ClientError,
    RateLimited,
    ServerError,
    DecodeFailure,
}

/// A received response that could not be turned into a result.
#[derive(Clone, Debug)]
pub struct ApiFailure {
    /// Response metadata, including status and headers.
    pub response: Response,
    /// Leading part of the raw body, at most [`BODY_SNIPPET_LIMIT`] bytes.
    pub body: String,
    /// Error message reported by the API, if the body carried one.
    pub message: Option<String>,
}

impl ApiFailure {
    pub(crate) fn new(response: Response, body: &[u8]) -> Self {
        Self {
            message: parse_error_message(body),
            body: body_snippet(body),
            response,
        }
    }

    pub fn status(&self) -> StatusCode {
        self.response.status
    }
}

impl fmt::Display for ApiFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let response = &self.response;
        write!(
            f,
            "{} {}: {}",
            response.method,
            response.url,
            response.status.as_u16()
        )?;
        match &self.message {
            Some(message) => write!(f, " {message}"),
            None if !self.body.is_empty() => write!(f, " {}", self.body),
            None => Ok(()),
        }
    }
}

impl GitlabError {
    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }

    /// Classifies a non-success response by status code.
    pub(crate) fn from_status(failure: ApiFailure) -> Self {
        let status = failure.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            Self::RateLimited(Box::new(failure))
        } else if status.is_server_error() {
            Self::Server(Box::new(failure))
        } else {
            Self::Client(Box::new(failure))
        }
    }

    pub(crate) fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout(err.to_string())
        } else if err.is_builder() {
            Self::InvalidArgument(err.to_string())
        } else {
            Self::Transport(Box::new(err))
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidArgument(_) => ErrorKind::InvalidArgument,
            Self::Transport(_) => ErrorKind::TransportFailure,
            Self::Timeout(_) => ErrorKind::Timeout,
            Self::Canceled => ErrorKind::Canceled,
            Self::Client(_) => ErrorKind::ClientError,
            Self::RateLimited(_) => ErrorKind::RateLimited,
            Self::Server(_) => ErrorKind::ServerError,
            Self::Decode { .. } => ErrorKind::DecodeFailure,
        }
    }

    /// Returns the failure details when a response was received.
    pub fn failure(&self) -> Option<&ApiFailure> {
        match self {
            Self::Client(failure) | Self::RateLimited(failure) | Self::Server(failure) => {
                Some(failure)
            }
            Self::Decode { failure, .. } => Some(failure),
            _ => None,
        }
    }

    pub fn response(&self) -> Option<&Response> {
        self.failure().map(|failure| &failure.response)
    }

    pub fn status(&self) -> Option<StatusCode> {
        self.response().map(|response| response.status)
    }

    pub fn body(&self) -> Option<&str> {
        self.failure().map(|failure| failure.body.as_str())
    }

    /// Whether this kind of failure is retried under the default policy.
    ///
    /// Reflects the error kind only. A status added to
    /// [`RetryPolicy::retryable_statuses`](crate::RetryPolicy::retryable_statuses)
    /// is retried by the executor even when this returns `false`.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::TransportFailure
                | ErrorKind::Timeout
                | ErrorKind::RateLimited
                | ErrorKind::ServerError
        )
    }
}

pub(crate) fn body_snippet(body: &[u8]) -> String {
    let text = String::from_utf8_lossy(body);
    if text.len() <= BODY_SNIPPET_LIMIT {
        return text.into_owned();
    }
    let mut end = BODY_SNIPPET_LIMIT;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    text[..end].to_owned()
}

/// Extracts the message from a GitLab error body.
///
/// GitLab reports `{"message": ...}` where the message is a string, an
/// array of strings, or an object of field errors, and OAuth endpoints
/// report `{"error": ...}`.
pub(crate) fn parse_error_message(body: &[u8]) -> Option<String> {
    let value: JsonValue = serde_json::from_slice(body).ok()?;
    let object = value.as_object()?;
    if let Some(message) = object.get("message") {
        return flatten_message(message);
    }
    object.get("error").and_then(flatten_message)
}

fn flatten_message(value: &JsonValue) -> Option<String> {
    match value {
        JsonValue::String(text) => Some(text.clone()),
        JsonValue::Array(items) => {
            let parts: Vec<String> = items.iter().filter_map(flatten_message).collect();
            (!parts.is_empty()).then(|| parts.join(", "))
        }
        JsonValue::Object(fields) => {
            let mut keys: Vec<&String> = fields.keys().collect();
            keys.sort();
            let parts: Vec<String> = keys
                .into_iter()
                .filter_map(|key| {
                    let value = flatten_message(&fields[key.as_str()])?;
                    Some(format!("{key}: {value}"))
                })
                .collect();
            (!parts.is_empty()).then(|| parts.join("; "))
        }
        JsonValue::Null => None,
        other => Some(other.to_string()),
    }
}
