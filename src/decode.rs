use serde::de::DeserializeOwned;

use crate::{error::ApiFailure, GitlabError, Response, Result};

/// Whether a successful body carries no value: empty, whitespace, `null`
/// or an empty JSON string.
pub(crate) fn is_no_content(body: &[u8]) -> bool {
    let trimmed = body.trim_ascii();
    trimmed.is_empty() || trimmed == b"null" || trimmed == b"\"\""
}

/// Decodes `body` into `dest`, leaving `dest` untouched when the body has
/// no content.
pub(crate) fn decode_into<T>(body: &[u8], response: &Response, dest: &mut T) -> Result<()>
where
    T: DeserializeOwned,
{
    if is_no_content(body) {
        return Ok(());
    }

    *dest = serde_json::from_slice(body).map_err(|err| GitlabError::Decode {
        message: format!("invalid response JSON: {err}"),
        failure: Box::new(ApiFailure::new(response.clone(), body)),
    })?;
    Ok(())
}

/// Rejects a 2xx status the endpoint does not list as expected.
pub(crate) fn unexpected_status(body: &[u8], response: Response) -> GitlabError {
    GitlabError::Decode {
        message: format!("unexpected status {}", response.status.as_u16()),
        failure: Box::new(ApiFailure::new(response, body)),
    }
}
