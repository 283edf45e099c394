use std::fmt;

use base64::Engine;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION};

use crate::{GitlabError, Result};

const PRIVATE_TOKEN: &str = "private-token";
const JOB_TOKEN: &str = "job-token";
const DEPLOY_TOKEN: &str = "deploy-token";

/// Authentication credential attached to every request.
#[derive(Clone, PartialEq, Eq)]
pub enum Credential {
    /// HTTP basic authentication.
    Basic { username: String, password: String },
    /// Personal, project or group access token sent as `PRIVATE-TOKEN`.
    PrivateToken(String),
    /// OAuth2 access token sent as `Authorization: Bearer`.
    OAuth(String),
    /// CI job token sent as `JOB-TOKEN`.
    JobToken(String),
    /// Deploy token sent as `Deploy-Token`.
    DeployToken(String),
}

impl Credential {
    pub fn basic(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self::Basic {
            username: username.into(),
            password: password.into(),
        }
    }

    pub fn private_token(token: impl Into<String>) -> Self {
        Self::PrivateToken(token.into())
    }

    /// Builds an OAuth credential. A leading `Bearer ` prefix is stripped.
    pub fn oauth(token: impl AsRef<str>) -> Self {
        Self::OAuth(strip_bearer_prefix(token.as_ref()))
    }

    pub fn job_token(token: impl Into<String>) -> Self {
        Self::JobToken(token.into())
    }

    pub fn deploy_token(token: impl Into<String>) -> Self {
        Self::DeployToken(token.into())
    }

    /// Writes the credential's header, replacing any previous credential
    /// header so a per-call override never sends two identities.
    pub(crate) fn apply(&self, headers: &mut HeaderMap) -> Result<()> {
        headers.remove(AUTHORIZATION);
        headers.remove(PRIVATE_TOKEN);
        headers.remove(JOB_TOKEN);
        headers.remove(DEPLOY_TOKEN);

        let (name, value) = match self {
            Self::Basic { username, password } => {
                let encoded = base64::engine::general_purpose::STANDARD
                    .encode(format!("{username}:{password}"));
                (AUTHORIZATION, format!("Basic {encoded}"))
            }
            Self::PrivateToken(token) => (HeaderName::from_static(PRIVATE_TOKEN), token.clone()),
            Self::OAuth(token) => (AUTHORIZATION, format!("Bearer {token}")),
            Self::JobToken(token) => (HeaderName::from_static(JOB_TOKEN), token.clone()),
            Self::DeployToken(token) => (HeaderName::from_static(DEPLOY_TOKEN), token.clone()),
        };

        let mut value = HeaderValue::from_str(&value)
            .map_err(|_| GitlabError::invalid("credential contains invalid header characters"))?;
        value.set_sensitive(true);
        headers.insert(name, value);
        Ok(())
    }

    fn scheme(&self) -> &'static str {
        match self {
            Self::Basic { .. } => "Basic",
            Self::PrivateToken(_) => "PrivateToken",
            Self::OAuth(_) => "OAuth",
            Self::JobToken(_) => "JobToken",
            Self::DeployToken(_) => "DeployToken",
        }
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Basic { username, .. } => f
                .debug_struct("Basic")
                .field("username", username)
                .field("password", &"<redacted>")
                .finish(),
            other => f.debug_tuple(other.scheme()).field(&"<redacted>").finish(),
        }
    }
}

fn strip_bearer_prefix(token: &str) -> String {
    let trimmed = token.trim();
    let prefix = trimmed.get(..7);
    if prefix.is_some_and(|value| value.eq_ignore_ascii_case("bearer ")) {
        trimmed[7..].trim_start().to_owned()
    } else {
        trimmed.to_owned()
    }
}
