use std::fmt;

use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use reqwest::{Method, StatusCode};
use serde_json::Value as JsonValue;

use crate::{GitlabError, Result};

/// Characters left unescaped in a single path segment (RFC 3986 unreserved).
const PATH_SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Where an endpoint's parameter value is encoded.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BodyEncoding {
    /// URL query string, omitting unset fields.
    Query,
    /// JSON request body.
    Json,
}

impl BodyEncoding {
    /// GET, DELETE and HEAD carry parameters in the query; everything else
    /// carries a JSON body.
    pub fn for_method(method: &Method) -> Self {
        if *method == Method::GET || *method == Method::DELETE || *method == Method::HEAD {
            Self::Query
        } else {
            Self::Json
        }
    }
}

/// Describes one API operation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Endpoint {
    method: Method,
    path: String,
    encoding: BodyEncoding,
    expected: Vec<StatusCode>,
}

impl Endpoint {
    /// Creates a descriptor for `path`, relative to the client's base URL.
    ///
    /// Identifier segments must already be escaped, see [`ResourceId::escaped`].
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            encoding: BodyEncoding::for_method(&method),
            method,
            path: path.into(),
            expected: Vec::new(),
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    pub fn patch(path: impl Into<String>) -> Self {
        Self::new(Method::PATCH, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    pub fn head(path: impl Into<String>) -> Self {
        Self::new(Method::HEAD, path)
    }

    /// Overrides the method-derived parameter encoding.
    pub fn with_encoding(mut self, encoding: BodyEncoding) -> Self {
        self.encoding = encoding;
        self
    }

    /// Restricts success to the given statuses. Without any, every 2xx
    /// status is a success.
    pub fn expect_status(mut self, status: StatusCode) -> Self {
        self.expected.push(status);
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn encoding(&self) -> BodyEncoding {
        self.encoding
    }

    pub(crate) fn accepts(&self, status: StatusCode) -> bool {
        if self.expected.is_empty() {
            status.is_success()
        } else {
            self.expected.contains(&status)
        }
    }
}

/// A resource addressed either by numeric ID or by namespaced path.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ResourceId {
    ById(u64),
    ByPath(String),
}

impl ResourceId {
    /// Returns the identifier as exactly one escaped path segment.
    ///
    /// `group/sub-group` becomes `group%2Fsub-group`. Empty paths are rejected.
    pub fn escaped(&self) -> Result<String> {
        match self {
            Self::ById(id) => Ok(id.to_string()),
            Self::ByPath(path) => {
                if path.is_empty() {
                    return Err(GitlabError::invalid("resource path cannot be empty"));
                }
                if path == "." || path == ".." {
                    return Err(GitlabError::invalid(format!(
                        "resource path '{path}' is a dot segment"
                    )));
                }
                Ok(utf8_percent_encode(path, PATH_SEGMENT).to_string())
            }
        }
    }

    /// Returns the identifier unescaped, as used in headers such as `Sudo`.
    pub fn raw(&self) -> Result<String> {
        match self {
            Self::ById(id) => Ok(id.to_string()),
            Self::ByPath(path) if path.is_empty() => {
                Err(GitlabError::invalid("resource path cannot be empty"))
            }
            Self::ByPath(path) => Ok(path.clone()),
        }
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ById(id) => write!(f, "{id}"),
            Self::ByPath(path) => f.write_str(path),
        }
    }
}

impl From<u64> for ResourceId {
    fn from(id: u64) -> Self {
        Self::ById(id)
    }
}

impl From<u32> for ResourceId {
    fn from(id: u32) -> Self {
        Self::ById(id.into())
    }
}

impl From<&str> for ResourceId {
    fn from(path: &str) -> Self {
        Self::ByPath(path.to_owned())
    }
}

impl From<String> for ResourceId {
    fn from(path: String) -> Self {
        Self::ByPath(path)
    }
}

impl TryFrom<i64> for ResourceId {
    type Error = GitlabError;

    fn try_from(id: i64) -> Result<Self> {
        u64::try_from(id)
            .map(Self::ById)
            .map_err(|_| GitlabError::invalid(format!("invalid ID {id}: must not be negative")))
    }
}

/// Accepts dynamically typed input: integers and strings only.
///
/// Floats are rejected rather than truncated.
impl TryFrom<&JsonValue> for ResourceId {
    type Error = GitlabError;

    fn try_from(value: &JsonValue) -> Result<Self> {
        match value {
            JsonValue::Number(number) => match (number.as_u64(), number.as_i64()) {
                (Some(id), _) => Ok(Self::ById(id)),
                (None, Some(id)) => Self::try_from(id),
                (None, None) => Err(GitlabError::invalid(format!(
                    "invalid ID type {number}: expected an integer or a string"
                ))),
            },
            JsonValue::String(path) => Ok(Self::ByPath(path.clone())),
            other => Err(GitlabError::invalid(format!(
                "invalid ID type {other}: expected an integer or a string"
            ))),
        }
    }
}
