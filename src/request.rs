use std::{fmt, sync::Arc, time::Duration};

use bytes::Bytes;
use reqwest::{
    header::{HeaderMap, HeaderName, HeaderValue},
    Method,
};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::{Credential, GitlabError, ResourceId, Result};

const SUDO: &str = "sudo";

/// A fully built, not yet sent request.
///
/// Rebuilt from scratch for every attempt of a call, so options observe a
/// fresh request each time.
#[derive(Clone, Debug)]
pub struct ApiRequest {
    method: Method,
    url: Url,
    headers: HeaderMap,
    body: Option<Bytes>,
    timeout: Option<Duration>,
    cancellation: Option<CancellationToken>,
    max_attempts: Option<u32>,
}

impl ApiRequest {
    pub(crate) fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            headers: HeaderMap::new(),
            body: None,
            timeout: None,
            cancellation: None,
            max_attempts: None,
        }
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn url_mut(&mut self) -> &mut Url {
        &mut self.url
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    pub fn body(&self) -> Option<&Bytes> {
        self.body.as_ref()
    }

    pub(crate) fn set_body(&mut self, body: Bytes) {
        self.body = Some(body);
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn set_timeout(&mut self, timeout: Option<Duration>) {
        self.timeout = timeout;
    }

    pub fn cancellation(&self) -> Option<&CancellationToken> {
        self.cancellation.as_ref()
    }

    pub fn set_cancellation(&mut self, token: CancellationToken) {
        self.cancellation = Some(token);
    }

    pub fn max_attempts(&self) -> Option<u32> {
        self.max_attempts
    }

    pub fn set_max_attempts(&mut self, attempts: u32) {
        self.max_attempts = Some(attempts);
    }

    /// Inserts a header, replacing previous values of the same name.
    pub fn set_header(&mut self, name: &str, value: &str) -> Result<()> {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|_| GitlabError::invalid(format!("invalid header name '{name}'")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|_| GitlabError::invalid(format!("invalid value for header '{name}'")))?;
        self.headers.insert(name, value);
        Ok(())
    }

    /// Sets a query parameter, replacing previous values of the same key.
    pub fn set_query_param(&mut self, key: &str, value: &str) {
        let retained: Vec<(String, String)> = self
            .url
            .query_pairs()
            .filter(|(name, _)| name != key)
            .map(|(name, value)| (name.into_owned(), value.into_owned()))
            .collect();

        let mut pairs = self.url.query_pairs_mut();
        pairs.clear();
        pairs.extend_pairs(retained);
        pairs.append_pair(key, value);
    }

    pub(crate) fn into_reqwest(self) -> reqwest::Request {
        let mut request = reqwest::Request::new(self.method, self.url);
        *request.headers_mut() = self.headers;
        *request.timeout_mut() = self.timeout;
        if let Some(body) = self.body {
            *request.body_mut() = Some(body.into());
        }
        request
    }
}

type ApplyFn = dyn Fn(&mut ApiRequest) -> Result<()> + Send + Sync;

/// A request-mutating step of the option pipeline.
///
/// Client-level options run before call-level options. The first option
/// that fails aborts the call before any network I/O.
#[derive(Clone)]
pub struct RequestOption(Arc<ApplyFn>);

impl fmt::Debug for RequestOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("RequestOption(..)")
    }
}

impl RequestOption {
    pub fn new<F>(apply: F) -> Self
    where
        F: Fn(&mut ApiRequest) -> Result<()> + Send + Sync + 'static,
    {
        Self(Arc::new(apply))
    }

    pub(crate) fn apply(&self, request: &mut ApiRequest) -> Result<()> {
        (self.0)(request)
    }

    pub fn header(name: impl Into<String>, value: impl Into<String>) -> Self {
        let name = name.into();
        let value = value.into();
        Self::new(move |request| request.set_header(&name, &value))
    }

    pub fn headers<I, K, V>(headers: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let headers: Vec<(String, String)> = headers
            .into_iter()
            .map(|(name, value)| (name.into(), value.into()))
            .collect();
        Self::new(move |request| {
            headers
                .iter()
                .try_for_each(|(name, value)| request.set_header(name, value))
        })
    }

    pub fn query(key: impl Into<String>, value: impl Into<String>) -> Self {
        let key = key.into();
        let value = value.into();
        Self::new(move |request| {
            request.set_query_param(&key, &value);
            Ok(())
        })
    }

    /// Performs the call on behalf of another user (`Sudo` header).
    pub fn sudo(user: impl Into<ResourceId>) -> Self {
        let user = user.into();
        Self::new(move |request| {
            let value = user.raw()?;
            request.set_header(SUDO, &value)
        })
    }

    /// Replaces the client's credential for this call.
    pub fn token(credential: Credential) -> Self {
        Self::new(move |request| credential.apply(request.headers_mut()))
    }

    pub fn cancellation(token: CancellationToken) -> Self {
        Self::new(move |request| {
            request.set_cancellation(token.clone());
            Ok(())
        })
    }

    pub fn timeout(timeout: Duration) -> Self {
        Self::new(move |request| {
            request.set_timeout(Some(timeout));
            Ok(())
        })
    }

    /// Overrides the retry policy's attempt bound for this call.
    pub fn max_attempts(attempts: u32) -> Self {
        Self::new(move |request| {
            request.set_max_attempts(attempts);
            Ok(())
        })
    }

    /// Requests a specific page in offset pagination.
    pub fn page(page: u32, per_page: u32) -> Self {
        Self::new(move |request| {
            request.set_query_param("page", &page.to_string());
            request.set_query_param("per_page", &per_page.to_string());
            Ok(())
        })
    }

    /// Copies the query parameters of a keyset `Link: rel="next"` URL.
    pub fn keyset_from_link(next_link: impl Into<String>) -> Self {
        let next_link = next_link.into();
        Self::new(move |request| {
            let link = Url::parse(&next_link).map_err(|err| {
                GitlabError::invalid(format!("invalid pagination link '{next_link}': {err}"))
            })?;
            for (key, value) in link.query_pairs() {
                request.set_query_param(&key, &value);
            }
            Ok(())
        })
    }
}

/// Runs `options` in order, stopping at the first failure.
pub(crate) fn apply_options<'a, I>(request: &mut ApiRequest, options: I) -> Result<()>
where
    I: IntoIterator<Item = &'a RequestOption>,
{
    options
        .into_iter()
        .try_for_each(|option| option.apply(request))
}
