use std::{fmt, sync::Arc, time::Duration};

use bytes::Bytes;
use reqwest::header::{HeaderValue, ACCEPT, CONTENT_TYPE, USER_AGENT};
use serde::{de::DeserializeOwned, Serialize};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::{
    decode::{decode_into, unexpected_status},
    error::ApiFailure,
    params::{encode_payload, Payload},
    request::apply_options,
    ApiRequest, ClientOptions, Credential, Endpoint, ErrorKind, GitlabError, PageCursor,
    RawResponse, ReqwestTransport, RequestOption, Response, Result, Transport,
};

/// Base URL used by [`GitlabClient::from_env`] when `GITLAB_BASE_URL` is unset.
pub const DEFAULT_BASE_URL: &str = "https://gitlab.com/api/v4";

/// Parameter placeholder for calls that send no parameters.
pub const NO_PARAMS: Option<&()> = None;

const JSON: &str = "application/json";

/// Typed request, retry and pagination core for a GitLab API instance.
///
/// Configuration is fixed after construction; clones share the transport
/// and its connection pool.
#[derive(Clone)]
pub struct GitlabClient {
    transport: Arc<dyn Transport>,
    base_url: Url,
    credential: Credential,
    options: ClientOptions,
    request_options: Vec<RequestOption>,
}

impl fmt::Debug for GitlabClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GitlabClient")
            .field("base_url", &self.base_url.as_str())
            .field("credential", &self.credential)
            .field("options", &self.options)
            .field("request_options", &self.request_options.len())
            .finish()
    }
}

impl GitlabClient {
    /// Creates a client for `base_url`, e.g. `https://gitlab.example.com/api/v4`.
    ///
    /// The base URL's path prefix is kept for every request. Fails with
    /// [`GitlabError::InvalidArgument`] if the URL cannot be parsed.
    pub fn new(base_url: impl AsRef<str>, credential: Credential) -> Result<Self> {
        Ok(Self {
            transport: Arc::new(ReqwestTransport::default()),
            base_url: parse_base_url(base_url.as_ref())?,
            credential,
            options: ClientOptions::default(),
            request_options: Vec::new(),
        })
    }

    /// Creates a client authenticating with a personal/project/group access token.
    pub fn with_private_token(base_url: impl AsRef<str>, token: impl Into<String>) -> Result<Self> {
        Self::new(base_url, Credential::private_token(token))
    }

    /// Creates a client authenticating with an OAuth2 bearer token.
    ///
    /// If the token carries a `Bearer ` prefix, it is removed.
    pub fn with_oauth_token(base_url: impl AsRef<str>, token: impl AsRef<str>) -> Result<Self> {
        Self::new(base_url, Credential::oauth(token))
    }

    /// Creates a client authenticating with a CI job token.
    pub fn with_job_token(base_url: impl AsRef<str>, token: impl Into<String>) -> Result<Self> {
        Self::new(base_url, Credential::job_token(token))
    }

    /// Creates a client using HTTP basic authentication.
    pub fn with_basic_auth(
        base_url: impl AsRef<str>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Result<Self> {
        Self::new(base_url, Credential::basic(username, password))
    }

    /// Creates a client from environment variables.
    ///
    /// Reads:
    /// - `GITLAB_BASE_URL`: API root, defaults to [`DEFAULT_BASE_URL`]
    /// - `GITLAB_TOKEN`: access token, or
    /// - `GITLAB_OAUTH_TOKEN`: OAuth2 token, or
    /// - `CI_JOB_TOKEN`: CI job token
    ///
    /// The first token variable that is set and non-empty wins.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use gitlab_http::GitlabClient;
    ///
    /// let client = GitlabClient::from_env().expect("missing GITLAB_* env vars");
    /// ```
    pub fn from_env() -> Result<Self> {
        let base_url =
            non_empty_env("GITLAB_BASE_URL").unwrap_or_else(|| DEFAULT_BASE_URL.to_owned());

        let credential = if let Some(token) = non_empty_env("GITLAB_TOKEN") {
            Credential::private_token(token)
        } else if let Some(token) = non_empty_env("GITLAB_OAUTH_TOKEN") {
            Credential::oauth(token)
        } else if let Some(token) = non_empty_env("CI_JOB_TOKEN") {
            Credential::job_token(token)
        } else {
            return Err(GitlabError::invalid(
                "missing GITLAB_TOKEN, GITLAB_OAUTH_TOKEN or CI_JOB_TOKEN environment variable",
            ));
        };

        Self::new(base_url, credential)
    }

    /// Applies client options such as timeout, retry policy and default headers.
    pub fn with_options(mut self, opts: ClientOptions) -> Self {
        self.options = opts;
        self
    }

    /// Replaces the HTTP transport.
    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = transport;
        self
    }

    /// Adds an option applied to every request, before call-level options.
    pub fn with_request_option(mut self, option: RequestOption) -> Self {
        self.request_options.push(option);
        self
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn options(&self) -> &ClientOptions {
        &self.options
    }

    /// Builds the request a call would send on its first attempt, without
    /// sending it.
    pub fn build_request<B>(
        &self,
        endpoint: &Endpoint,
        params: Option<&B>,
        options: &[RequestOption],
    ) -> Result<ApiRequest>
    where
        B: Serialize + ?Sized,
    {
        let payload = encode_payload(endpoint.encoding(), params)?;
        self.build_from_payload(endpoint, &payload, options)
    }

    /// Performs a call and decodes the response body into `dest`.
    ///
    /// A body that is empty, `null` or `""` leaves `dest` unmodified.
    pub async fn request_into<B, T>(
        &self,
        endpoint: &Endpoint,
        params: Option<&B>,
        options: &[RequestOption],
        dest: &mut T,
    ) -> Result<Response>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let (body, response) = self.request_raw(endpoint, params, options).await?;
        decode_into(&body, &response, dest)?;
        Ok(response)
    }

    /// Performs a call and decodes the response body, yielding
    /// `T::default()` when the body has no content.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use gitlab_http::{Endpoint, GitlabClient, ResourceId, NO_PARAMS};
    /// use serde::Deserialize;
    ///
    /// #[derive(Debug, Default, Deserialize)]
    /// struct Project {
    ///     id: u64,
    ///     name: String,
    /// }
    ///
    /// # async fn run() -> gitlab_http::Result<()> {
    /// let client = GitlabClient::from_env()?;
    /// let project = ResourceId::from("group/sub-group/project");
    /// let endpoint = Endpoint::get(format!("projects/{}", project.escaped()?));
    /// let (project, response) = client.request::<_, Project>(&endpoint, NO_PARAMS, &[]).await?;
    /// println!("{} {} ({})", project.id, project.name, response.status);
    /// # Ok(())
    /// # }
    /// ```
    pub async fn request<B, T>(
        &self,
        endpoint: &Endpoint,
        params: Option<&B>,
        options: &[RequestOption],
    ) -> Result<(T, Response)>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned + Default,
    {
        let mut value = T::default();
        let response = self
            .request_into(endpoint, params, options, &mut value)
            .await?;
        Ok((value, response))
    }

    /// Performs a call and returns the undecoded body.
    pub async fn request_raw<B>(
        &self,
        endpoint: &Endpoint,
        params: Option<&B>,
        options: &[RequestOption],
    ) -> Result<(Bytes, Response)>
    where
        B: Serialize + ?Sized,
    {
        let payload = encode_payload(endpoint.encoding(), params)?;
        self.execute(endpoint, &payload, options).await
    }

    /// Starts a page cursor over a list endpoint.
    ///
    /// Nothing is sent until [`PageCursor::next_page`] is called.
    pub fn paginate<B, T>(
        &self,
        endpoint: Endpoint,
        params: Option<&B>,
        options: Vec<RequestOption>,
    ) -> Result<PageCursor<'_, T>>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let payload = encode_payload(endpoint.encoding(), params)?;
        Ok(PageCursor::new(self, endpoint, payload, options))
    }

    pub(crate) fn build_from_payload(
        &self,
        endpoint: &Endpoint,
        payload: &Payload,
        options: &[RequestOption],
    ) -> Result<ApiRequest> {
        let mut url = resolve_url(&self.base_url, endpoint.path());
        if let Payload::Query(query) = payload {
            append_query(&mut url, query);
        }

        let mut request = ApiRequest::new(endpoint.method().clone(), url);
        request
            .headers_mut()
            .insert(ACCEPT, HeaderValue::from_static(JSON));
        request.set_header(USER_AGENT.as_str(), &self.options.user_agent)?;
        for (name, value) in &self.options.default_headers {
            request.set_header(name, value)?;
        }
        self.credential.apply(request.headers_mut())?;

        if let Payload::Json(body) = payload {
            request
                .headers_mut()
                .insert(CONTENT_TYPE, HeaderValue::from_static(JSON));
            request.set_body(body.clone());
        }
        if self.options.timeout_ms > 0 {
            request.set_timeout(Some(Duration::from_millis(self.options.timeout_ms)));
        }

        apply_options(&mut request, self.request_options.iter().chain(options))?;
        Ok(request)
    }

    /// Runs one logical call: build, send, classify, back off and retry
    /// until success, a terminal error, or the attempt bound.
    pub(crate) async fn execute(
        &self,
        endpoint: &Endpoint,
        payload: &Payload,
        options: &[RequestOption],
    ) -> Result<(Bytes, Response)> {
        let policy = &self.options.retry;
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            let request = self.build_from_payload(endpoint, payload, options)?;
            let max_attempts = request
                .max_attempts()
                .unwrap_or_else(|| policy.attempts())
                .max(1);
            let cancellation = request.cancellation().cloned();
            let method = request.method().clone();
            let url = request.url().clone();

            #[cfg(feature = "tracing")]
            tracing::debug!(%method, %url, attempt, max_attempts, "sending request");

            let (err, headers) = match self.send_attempt(request, cancellation.as_ref()).await {
                Ok(raw) => {
                    let response = Response::new(method, url, raw.status, raw.headers);
                    if endpoint.accepts(response.status) {
                        return Ok((raw.body, response));
                    }
                    if response.status.is_success() {
                        return Err(unexpected_status(&raw.body, response));
                    }

                    let retryable = policy.is_retryable_status(response.status);
                    let headers = response.headers.clone();
                    let err = GitlabError::from_status(ApiFailure::new(response, &raw.body));
                    if !retryable {
                        return Err(err);
                    }
                    (err, Some(headers))
                }
                Err(err) => {
                    let retryable = policy.retry_transport_errors
                        && matches!(err.kind(), ErrorKind::TransportFailure | ErrorKind::Timeout);
                    if !retryable {
                        return Err(err);
                    }
                    (err, None)
                }
            };

            if attempt >= max_attempts {
                #[cfg(feature = "tracing")]
                tracing::debug!(attempts = attempt, error = %err, "retries exhausted");
                return Err(err);
            }

            let delay = policy.delay_for(attempt, headers.as_ref());

            #[cfg(feature = "tracing")]
            {
                if err.kind() == ErrorKind::RateLimited {
                    tracing::warn!(delay_ms = delay.as_millis() as u64, "rate limited by server");
                }
                tracing::debug!(
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "retrying request"
                );
            }

            wait_before_retry(delay, cancellation.as_ref()).await?;
        }
    }

    async fn send_attempt(
        &self,
        request: ApiRequest,
        cancellation: Option<&CancellationToken>,
    ) -> Result<RawResponse> {
        let timeout = request.timeout();
        let send = async move {
            match timeout {
                Some(limit) => tokio::time::timeout(limit, self.transport.send(request))
                    .await
                    .unwrap_or_else(|_| {
                        Err(GitlabError::Timeout(format!(
                            "no response within {} ms",
                            limit.as_millis()
                        )))
                    }),
                None => self.transport.send(request).await,
            }
        };

        match cancellation {
            Some(token) => tokio::select! {
                biased;
                _ = token.cancelled() => Err(GitlabError::Canceled),
                result = send => result,
            },
            None => send.await,
        }
    }
}

/// Sleeps for `delay`, returning early with [`GitlabError::Canceled`] if the
/// call's cancellation token fires.
async fn wait_before_retry(delay: Duration, cancellation: Option<&CancellationToken>) -> Result<()> {
    match cancellation {
        Some(token) => tokio::select! {
            biased;
            _ = token.cancelled() => Err(GitlabError::Canceled),
            _ = sleep(delay) => Ok(()),
        },
        None => {
            sleep(delay).await;
            Ok(())
        }
    }
}

fn parse_base_url(base_url: &str) -> Result<Url> {
    let mut url = Url::parse(base_url.trim())
        .map_err(|err| GitlabError::invalid(format!("invalid base URL '{base_url}': {err}")))?;
    if url.cannot_be_a_base() || !matches!(url.scheme(), "http" | "https") {
        return Err(GitlabError::invalid(format!(
            "invalid base URL '{base_url}': expected an http(s) URL"
        )));
    }
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    url.set_query(None);
    url.set_fragment(None);
    Ok(url)
}

/// Appends `path` (and its query, if any) to the base URL's path prefix.
fn resolve_url(base: &Url, path: &str) -> Url {
    let (path, query) = match path.split_once('?') {
        Some((path, query)) => (path, Some(query)),
        None => (path, None),
    };

    let mut url = base.clone();
    url.set_path(&format!("{}{}", base.path(), path.trim_start_matches('/')));
    url.set_query(query.filter(|query| !query.is_empty()));
    url
}

fn append_query(url: &mut Url, query: &str) {
    let merged = match url.query() {
        Some(existing) if !existing.is_empty() => format!("{existing}&{query}"),
        _ => query.to_owned(),
    };
    url.set_query(Some(&merged));
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .filter(|value| !value.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{
            atomic::{AtomicUsize, Ordering},
            Arc,
        },
        time::{Duration, Instant},
    };

    use async_trait::async_trait;
    use reqwest::{
        header::{HeaderMap, HeaderValue},
        StatusCode,
    };
    use serde::Serialize;
    use serde_json::json;
    use tokio_util::sync::CancellationToken;

    use super::{parse_base_url, resolve_url, GitlabClient, NO_PARAMS};
    use crate::{
        ApiRequest, ClientOptions, Credential, Endpoint, ErrorKind, Jitter, RawResponse,
        RequestOption, ResourceId, Result, RetryPolicy, Transport,
    };

    fn client() -> GitlabClient {
        GitlabClient::with_private_token("https://gitlab.example.com/api/v4", "secret-token")
            .expect("valid base url")
    }

    #[test]
    fn base_url_prefix_is_preserved() {
        let base = parse_base_url("https://api.example.com/v1").expect("valid base url");
        assert_eq!(base.as_str(), "https://api.example.com/v1/");
        assert_eq!(
            resolve_url(&base, "/widgets/42").as_str(),
            "https://api.example.com/v1/widgets/42"
        );
        assert_eq!(
            resolve_url(&base, "widgets?scope=all").as_str(),
            "https://api.example.com/v1/widgets?scope=all"
        );
    }

    #[test]
    fn invalid_base_url_is_rejected_at_construction() {
        for base in ["not a url", "mailto:root@example.com", "ftp://example.com/api"] {
            let err = GitlabClient::new(base, Credential::private_token("t"))
                .expect_err("must reject base url");
            assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        }
    }

    #[test]
    fn escaped_identifier_stays_one_segment() {
        let id = ResourceId::from("group/sub-group");
        let endpoint = Endpoint::get(format!("projects/{}", id.escaped().expect("escape")));
        let request = client()
            .build_request(&endpoint, NO_PARAMS, &[])
            .expect("must build");
        assert_eq!(
            request.url().as_str(),
            "https://gitlab.example.com/api/v4/projects/group%2Fsub-group"
        );
        assert_eq!(
            request.url().path_segments().map(|s| s.count()),
            Some(4)
        );
    }

    #[derive(Serialize, Default)]
    struct Filter {
        #[serde(skip_serializing_if = "Option::is_none")]
        state: Option<String>,
    }

    #[test]
    fn zero_valued_get_has_no_query() {
        let request = client()
            .build_request(&Endpoint::get("issues"), Some(&Filter::default()), &[])
            .expect("must build");
        assert_eq!(request.url().query(), None);
        assert!(request.body().is_none());

        let request = client()
            .build_request(&Endpoint::delete("issues/1"), Some(&Filter::default()), &[])
            .expect("must build");
        assert_eq!(request.url().query(), None);
    }

    #[test]
    fn post_params_become_json_body() {
        let filter = Filter {
            state: Some("close".to_owned()),
        };
        let request = client()
            .build_request(&Endpoint::put("issues/1"), Some(&filter), &[])
            .expect("must build");
        assert_eq!(request.url().query(), None);
        assert_eq!(request.headers()["content-type"], "application/json");
        assert_eq!(
            request.body().map(|b| &b[..]),
            Some(&br#"{"state":"close"}"#[..])
        );
    }

    #[test]
    fn building_is_idempotent() {
        let filter = Filter {
            state: Some("opened".to_owned()),
        };
        let client = client().with_request_option(RequestOption::header("X-Team", "core"));
        let options = [RequestOption::sudo("root"), RequestOption::query("scope", "all")];
        let endpoint = Endpoint::get("projects/1/issues");

        let first = client
            .build_request(&endpoint, Some(&filter), &options)
            .expect("must build");
        let second = client
            .build_request(&endpoint, Some(&filter), &options)
            .expect("must build");

        assert_eq!(first.method(), second.method());
        assert_eq!(first.url(), second.url());
        assert_eq!(first.headers(), second.headers());
        assert_eq!(first.body(), second.body());
        assert_eq!(
            first.url().query(),
            Some("state=opened&scope=all")
        );
    }

    #[test]
    fn call_options_run_after_client_options() {
        let client = client().with_request_option(RequestOption::header("X-Layer", "client"));
        let request = client
            .build_request(
                &Endpoint::get("user"),
                NO_PARAMS,
                &[RequestOption::header("X-Layer", "call")],
            )
            .expect("must build");
        assert_eq!(request.headers()["x-layer"], "call");
    }

    #[test]
    fn token_option_overrides_client_credential() {
        let request = client()
            .build_request(
                &Endpoint::get("user"),
                NO_PARAMS,
                &[RequestOption::token(Credential::job_token("job"))],
            )
            .expect("must build");
        assert!(request.headers().get("private-token").is_none());
        assert_eq!(request.headers()["job-token"], "job");
    }

    struct Stub {
        hits: AtomicUsize,
        respond: Box<dyn Fn(usize) -> Option<RawResponse> + Send + Sync>,
    }

    impl Stub {
        fn new<F>(respond: F) -> Arc<Self>
        where
            F: Fn(usize) -> Option<RawResponse> + Send + Sync + 'static,
        {
            Arc::new(Self {
                hits: AtomicUsize::new(0),
                respond: Box::new(respond),
            })
        }

        fn status(status: StatusCode) -> Arc<Self> {
            Self::new(move |_| Some(RawResponse::new(status, HeaderMap::new(), "")))
        }

        /// Never answers.
        fn pending() -> Arc<Self> {
            Self::new(|_| None)
        }

        fn hits(&self) -> usize {
            self.hits.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Transport for Stub {
        async fn send(&self, _request: ApiRequest) -> Result<RawResponse> {
            let hit = self.hits.fetch_add(1, Ordering::SeqCst) + 1;
            match (self.respond)(hit) {
                Some(response) => Ok(response),
                None => std::future::pending().await,
            }
        }
    }

    fn stub_client(stub: Arc<Stub>, max_attempts: u32) -> GitlabClient {
        let retry = RetryPolicy::exponential(max_attempts, Duration::from_millis(1))
            .with_jitter(Jitter::None);
        client()
            .with_options(ClientOptions {
                retry,
                ..ClientOptions::default()
            })
            .with_transport(stub)
    }

    #[tokio::test]
    async fn rate_limit_retries_are_bounded() {
        let stub = Stub::status(StatusCode::TOO_MANY_REQUESTS);
        let client = stub_client(stub.clone(), 3);

        let err = client
            .request_raw(&Endpoint::get("projects"), NO_PARAMS, &[])
            .await
            .expect_err("must fail");

        assert_eq!(err.kind(), ErrorKind::RateLimited);
        assert_eq!(err.status(), Some(StatusCode::TOO_MANY_REQUESTS));
        assert_eq!(stub.hits(), 3);
    }

    #[tokio::test]
    async fn server_errors_are_retried_then_reported() {
        let stub = Stub::status(StatusCode::SERVICE_UNAVAILABLE);
        let client = stub_client(stub.clone(), 4);

        let err = client
            .request_raw(&Endpoint::get("projects"), NO_PARAMS, &[])
            .await
            .expect_err("must fail");

        assert_eq!(err.kind(), ErrorKind::ServerError);
        assert_eq!(stub.hits(), 4);
    }

    #[tokio::test]
    async fn call_can_lower_attempt_bound() {
        let stub = Stub::status(StatusCode::BAD_GATEWAY);
        let client = stub_client(stub.clone(), 5);

        let err = client
            .request_raw(
                &Endpoint::get("projects"),
                NO_PARAMS,
                &[RequestOption::max_attempts(1)],
            )
            .await
            .expect_err("must fail");

        assert_eq!(err.kind(), ErrorKind::ServerError);
        assert_eq!(stub.hits(), 1);
    }

    #[tokio::test]
    async fn configured_client_status_is_retried_but_keeps_its_kind() {
        let stub = Stub::status(StatusCode::REQUEST_TIMEOUT);
        let options = ClientOptions {
            retry: RetryPolicy::exponential(3, Duration::from_millis(1))
                .with_jitter(Jitter::None)
                .with_statuses(vec![408, 429, 503]),
            ..ClientOptions::default()
        };
        let client = client().with_options(options).with_transport(stub.clone());

        let err = client
            .request_raw(&Endpoint::get("projects"), NO_PARAMS, &[])
            .await
            .expect_err("must fail");

        assert_eq!(stub.hits(), 3);
        assert_eq!(err.kind(), ErrorKind::ClientError);
        assert_eq!(err.status(), Some(StatusCode::REQUEST_TIMEOUT));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn client_errors_are_not_retried() {
        let stub = Stub::new(|_| {
            Some(RawResponse::new(
                StatusCode::NOT_FOUND,
                HeaderMap::new(),
                r#"{"message":"404 Project Not Found"}"#,
            ))
        });
        let client = stub_client(stub.clone(), 5);

        let err = client
            .request_raw(&Endpoint::get("projects/9"), NO_PARAMS, &[])
            .await
            .expect_err("must fail");

        assert_eq!(err.kind(), ErrorKind::ClientError);
        assert_eq!(
            err.failure().and_then(|f| f.message.as_deref()),
            Some("404 Project Not Found")
        );
        assert_eq!(stub.hits(), 1);
    }

    #[tokio::test]
    async fn options_run_again_on_every_attempt() {
        let stub = Stub::new(|hit| {
            let status = if hit < 3 {
                StatusCode::SERVICE_UNAVAILABLE
            } else {
                StatusCode::OK
            };
            Some(RawResponse::new(status, HeaderMap::new(), r#"{"id":7}"#))
        });
        let client = stub_client(stub.clone(), 3);
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = runs.clone();
        let option = RequestOption::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        let (value, response) = client
            .request::<_, serde_json::Value>(&Endpoint::get("projects/7"), NO_PARAMS, &[option])
            .await
            .expect("third attempt succeeds");

        assert_eq!(value["id"], 7);
        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(stub.hits(), 3);
        assert_eq!(runs.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn failing_option_sends_nothing() {
        let stub = Stub::status(StatusCode::OK);
        let client = stub_client(stub.clone(), 3);
        let option = RequestOption::new(|request| {
            let id = ResourceId::try_from(&json!(1.5))?;
            request.set_query_param("user_id", &id.to_string());
            Ok(())
        });

        let err = client
            .request_raw(&Endpoint::get("users"), NO_PARAMS, &[option])
            .await
            .expect_err("must fail");

        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        assert_eq!(stub.hits(), 0);
    }

    #[tokio::test]
    async fn cancellation_interrupts_pending_send() {
        let stub = Stub::pending();
        let client = stub_client(stub.clone(), 3);
        let token = CancellationToken::new();
        let trigger = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let started = Instant::now();
        let err = client
            .request_raw(
                &Endpoint::get("projects"),
                NO_PARAMS,
                &[RequestOption::cancellation(token)],
            )
            .await
            .expect_err("must be canceled");

        assert_eq!(err.kind(), ErrorKind::Canceled);
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(stub.hits(), 1);
    }

    #[tokio::test]
    async fn cancellation_interrupts_backoff() {
        let stub = Stub::new(|_| {
            let mut headers = HeaderMap::new();
            headers.insert("retry-after", HeaderValue::from_static("30"));
            Some(RawResponse::new(
                StatusCode::TOO_MANY_REQUESTS,
                headers,
                "",
            ))
        });
        let client = stub_client(stub.clone(), 5);
        let token = CancellationToken::new();
        let trigger = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let started = Instant::now();
        let err = client
            .request_raw(
                &Endpoint::get("projects"),
                NO_PARAMS,
                &[RequestOption::cancellation(token)],
            )
            .await
            .expect_err("must be canceled");

        assert_eq!(err.kind(), ErrorKind::Canceled);
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(stub.hits(), 1);
    }

    #[tokio::test]
    async fn precanceled_call_sends_nothing() {
        let stub = Stub::status(StatusCode::OK);
        let client = stub_client(stub.clone(), 3);
        let token = CancellationToken::new();
        token.cancel();

        let err = client
            .request_raw(
                &Endpoint::get("projects"),
                NO_PARAMS,
                &[RequestOption::cancellation(token)],
            )
            .await
            .expect_err("must be canceled");

        assert_eq!(err.kind(), ErrorKind::Canceled);
        assert_eq!(stub.hits(), 0);
    }

    #[tokio::test]
    async fn attempt_timeout_is_reported_and_retried() {
        let stub = Stub::pending();
        let client = stub_client(stub.clone(), 2);

        let err = client
            .request_raw(
                &Endpoint::get("projects"),
                NO_PARAMS,
                &[RequestOption::timeout(Duration::from_millis(20))],
            )
            .await
            .expect_err("must time out");

        assert_eq!(err.kind(), ErrorKind::Timeout);
        assert_eq!(stub.hits(), 2);
    }

    #[tokio::test]
    async fn server_wait_is_capped() {
        let stub = Stub::new(|hit| {
            if hit == 1 {
                let mut headers = HeaderMap::new();
                headers.insert("retry-after", HeaderValue::from_static("3600"));
                Some(RawResponse::new(StatusCode::TOO_MANY_REQUESTS, headers, ""))
            } else {
                Some(RawResponse::new(StatusCode::OK, HeaderMap::new(), "[]"))
            }
        });
        let mut options = ClientOptions::default();
        options.retry.max_retry_after = Duration::from_millis(10);
        let client = client().with_options(options).with_transport(stub.clone());

        let started = Instant::now();
        client
            .request_raw(&Endpoint::get("projects"), NO_PARAMS, &[])
            .await
            .expect("second attempt succeeds");

        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(stub.hits(), 2);
    }

    #[tokio::test]
    async fn empty_body_keeps_destination() {
        let stub = Stub::status(StatusCode::NO_CONTENT);
        let client = stub_client(stub, 1);

        let mut dest = vec!["kept".to_owned()];
        let response = client
            .request_into(&Endpoint::delete("projects/1"), NO_PARAMS, &[], &mut dest)
            .await
            .expect("no content is success");

        assert_eq!(response.status, StatusCode::NO_CONTENT);
        assert_eq!(dest, vec!["kept".to_owned()]);
    }

    #[tokio::test]
    async fn unexpected_success_status_is_decode_failure() {
        let stub = Stub::status(StatusCode::OK);
        let client = stub_client(stub.clone(), 3);
        let endpoint = Endpoint::post("projects").expect_status(StatusCode::CREATED);

        let err = client
            .request_raw(&endpoint, NO_PARAMS, &[])
            .await
            .expect_err("must fail");

        assert_eq!(err.kind(), ErrorKind::DecodeFailure);
        assert_eq!(err.status(), Some(StatusCode::OK));
        assert_eq!(stub.hits(), 1);
    }

    #[test]
    fn debug_redacts_credential() {
        let debug = format!("{:?}", client());
        assert!(debug.contains("<redacted>"));
        assert!(!debug.contains("secret-token"));
    }
}
