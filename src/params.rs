use bytes::Bytes;
use serde::Serialize;
use serde_json::Value as JsonValue;

use crate::{BodyEncoding, GitlabError, Result};

/// Encoded parameter value of a call, computed once and reused by every
/// attempt.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum Payload {
    Empty,
    Query(String),
    Json(Bytes),
}

impl Payload {
    /// Returns the first value of `key` in a query payload.
    pub(crate) fn query_value(&self, key: &str) -> Option<String> {
        let Self::Query(query) = self else {
            return None;
        };
        url::form_urlencoded::parse(query.as_bytes())
            .find(|(name, _)| name == key)
            .map(|(_, value)| value.into_owned())
    }
}

pub(crate) fn encode_payload<B>(encoding: BodyEncoding, params: Option<&B>) -> Result<Payload>
where
    B: Serialize + ?Sized,
{
    let Some(params) = params else {
        return Ok(Payload::Empty);
    };

    match encoding {
        BodyEncoding::Query => {
            let pairs = query_pairs(params)?;
            if pairs.is_empty() {
                return Ok(Payload::Empty);
            }
            serde_urlencoded::to_string(&pairs)
                .map(Payload::Query)
                .map_err(|err| {
                    GitlabError::invalid(format!("parameters cannot be query-encoded: {err}"))
                })
        }
        BodyEncoding::Json => serde_json::to_vec(params)
            .map(|body| Payload::Json(body.into()))
            .map_err(|err| {
                GitlabError::invalid(format!("parameters cannot be JSON-encoded: {err}"))
            }),
    }
}

/// Flattens a struct or map into query pairs in field order.
///
/// Unset (`null`) values are omitted. Sequences repeat the key as `key[]`
/// and nested maps become `key[field]`.
fn query_pairs<B>(params: &B) -> Result<Vec<(String, String)>>
where
    B: Serialize + ?Sized,
{
    let value = serde_json::to_value(params).map_err(|err| {
        GitlabError::invalid(format!("parameters cannot be query-encoded: {err}"))
    })?;

    let fields = match value {
        JsonValue::Object(fields) => fields,
        JsonValue::Null => return Ok(Vec::new()),
        other => {
            return Err(GitlabError::invalid(format!(
                "query parameters must be a struct or map, got {other}"
            )))
        }
    };

    let mut pairs = Vec::new();
    for (key, value) in fields {
        flatten_into(&mut pairs, key, value);
    }
    Ok(pairs)
}

fn flatten_into(pairs: &mut Vec<(String, String)>, key: String, value: JsonValue) {
    match value {
        JsonValue::Null => {}
        JsonValue::Bool(flag) => pairs.push((key, flag.to_string())),
        JsonValue::Number(number) => pairs.push((key, number.to_string())),
        JsonValue::String(text) => pairs.push((key, text)),
        JsonValue::Array(items) => {
            let key = format!("{key}[]");
            for item in items {
                flatten_into(pairs, key.clone(), item);
            }
        }
        JsonValue::Object(fields) => {
            for (field, value) in fields {
                flatten_into(pairs, format!("{key}[{field}]"), value);
            }
        }
    }
}

/// Sort direction for list endpoints.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Sort {
    Asc,
    Desc,
}

/// Parameters shared by list endpoints. Unset fields are omitted.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ListOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub per_page: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_by: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sort: Option<Sort>,
    /// `keyset` selects cursor pagination on endpoints that support it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pagination: Option<String>,
}

impl ListOptions {
    pub fn per_page(per_page: u32) -> Self {
        Self {
            per_page: Some(per_page),
            ..Self::default()
        }
    }

    pub fn order_by(mut self, field: impl Into<String>, sort: Sort) -> Self {
        self.order_by = Some(field.into());
        self.sort = Some(sort);
        self
    }
}
