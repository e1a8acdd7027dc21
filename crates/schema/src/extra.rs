use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::ConcatError;

/// Provider-specific side channel attached to a message.
///
/// Keys are owned by the provider adapter that writes them, e.g. `ark-request-id`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Extra(BTreeMap<String, ExtraValue>);

impl Extra {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn get(&self, key: &str) -> Option<&ExtraValue> {
        self.0.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// Inserts a value, returning the previous one stored under `key`.
    pub fn insert(&mut self, key: impl Into<String>, value: ExtraValue) -> Option<ExtraValue> {
        self.0.insert(key.into(), value)
    }

    pub fn remove(&mut self, key: &str) -> Option<ExtraValue> {
        self.0.remove(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ExtraValue)> {
        self.0.iter().map(|(key, value)| (key.as_str(), value))
    }

    /// Text stored under `key` when the value is one of the string kinds.
    pub fn text(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(ExtraValue::as_text)
    }
}

impl FromIterator<(String, ExtraValue)> for Extra {
    fn from_iter<I: IntoIterator<Item = (String, ExtraValue)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Value stored in [`Extra`].
///
/// Each variant has a default concatenation rule, applied when no function is registered for
/// the key in the [`ConcatRegistry`](crate::ConcatRegistry).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum ExtraValue {
    /// Provider request identifier. Default rule: last non-empty value.
    RequestId(String),
    /// Model reasoning text streamed alongside the answer. Default rule: concatenation.
    ReasoningContent(String),
    /// Free-form text. Default rule: concatenation.
    Text(String),
    /// Default rule: last non-zero value.
    Integer(i64),
    /// Structured provider payload. Default rule: last non-null value.
    Json(serde_json::Value),
    /// Opaque payload for unknown extensions. Default rule: last non-empty value.
    Bytes(Vec<u8>),
}

impl ExtraValue {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::RequestId(_) => "request_id",
            Self::ReasoningContent(_) => "reasoning_content",
            Self::Text(_) => "text",
            Self::Integer(_) => "integer",
            Self::Json(_) => "json",
            Self::Bytes(_) => "bytes",
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::RequestId(s) | Self::ReasoningContent(s) | Self::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Applies the default rule for this value kind to `self` followed by `next`.
    pub fn concat_default(self, key: &str, next: ExtraValue) -> Result<ExtraValue, ConcatError> {
        let merged = match (self, next) {
            (Self::ReasoningContent(mut left), Self::ReasoningContent(right)) => {
                left.push_str(&right);
                Self::ReasoningContent(left)
            }
            (Self::Text(mut left), Self::Text(right)) => {
                left.push_str(&right);
                Self::Text(left)
            }
            (Self::RequestId(left), Self::RequestId(right)) => {
                Self::RequestId(if right.is_empty() { left } else { right })
            }
            (Self::Integer(left), Self::Integer(right)) => Self::Integer(if right == 0 { left } else { right }),
            (Self::Json(left), Self::Json(right)) => Self::Json(if right.is_null() { left } else { right }),
            (Self::Bytes(left), Self::Bytes(right)) => Self::Bytes(if right.is_empty() { left } else { right }),
            (left, right) => {
                return Err(ConcatError::ExtraMismatch {
                    key: key.to_string(),
                    left: left.kind(),
                    right: right.kind(),
                });
            }
        };

        Ok(merged)
    }
}
