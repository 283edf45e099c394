//! `gitlab-http` is the typed request, retry and pagination core for the
//! GitLab REST API.
//!
//! Resource-specific calls are thin wrappers over:
//! - [`GitlabClient::request`] and [`GitlabClient::request_into`]
//! - [`GitlabClient::request_raw`]
//! - [`GitlabClient::paginate`]
//!
//! Every call is described by an [`Endpoint`], optional serializable
//! parameters and a list of [`RequestOption`]s.

mod client;
mod credential;
mod decode;
mod endpoint;
mod error;
mod options;
mod pagination;
mod params;
mod request;
mod retry;
mod transport;
mod types;

pub use client::{GitlabClient, DEFAULT_BASE_URL, NO_PARAMS};
pub use credential::Credential;
pub use endpoint::{BodyEncoding, Endpoint, ResourceId};
pub use error::{ApiFailure, ErrorKind, GitlabError, BODY_SNIPPET_LIMIT};
pub use options::ClientOptions;
pub use pagination::{Page, PageCursor, PageMode};
pub use params::{ListOptions, Sort};
pub use request::{ApiRequest, RequestOption};
pub use retry::{Jitter, RetryPolicy};
pub use transport::{RawResponse, ReqwestTransport, Transport};
pub use types::{PageInfo, Response};

pub type Result<T> = std::result::Result<T, GitlabError>;
