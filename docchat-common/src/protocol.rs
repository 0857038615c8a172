//! Wire format for broker requests and worker responses.
//!
//! Stream entries only carry flat string fields, so nested values are JSON
//! encoded before they are published.
//!
//! # Message Flow
//!
//! 1. The gateway assigns a fresh UUID and publishes a [`RequestMessage`]
//!    (`id`, `model`, `prompt`) on the request channel
//! 2. One worker of the request group reads it, acknowledges it and runs inference
//! 3. The worker publishes exactly one [`ResponseMessage`] (`id`, `response`)
//!    on the response channel, carrying either the full completion JSON or
//!    `{"error": "..."}`
//! 4. The gateway's dispatcher matches the response to the waiting call by `id`
//!
//! The `id` is the only correlation key between the two channels.

use serde_json::Value;
use uuid::Uuid;

use crate::chat::{ChatCompletionResponse, ChatMessage};
use crate::stream::Fields;

pub const FIELD_ID: &str = "id";
pub const FIELD_MODEL: &str = "model";
pub const FIELD_PROMPT: &str = "prompt";
pub const FIELD_RESPONSE: &str = "response";

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("Missing field '{0}'")]
    MissingField(&'static str),

    #[error("Invalid field '{field}': {source}")]
    InvalidField {
        field: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to encode field '{field}': {source}")]
    Encode {
        field: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

/// Why a response payload could not be turned into completion text.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReplyError {
    /// The worker reported a failure (`{"error": ...}`).
    #[error("{0}")]
    Failed(String),

    /// A payload arrived but lacked the expected completion shape.
    #[error("{0}")]
    Malformed(String),
}

/// An inference request as published on the request channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestMessage {
    pub id: String,
    pub model: String,
    pub prompt: Vec<ChatMessage>,
}

impl RequestMessage {
    /// Create a request with a fresh correlation id.
    pub fn new(model: impl Into<String>, prompt: Vec<ChatMessage>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            model: model.into(),
            prompt,
        }
    }

    pub fn to_fields(&self) -> Result<Fields, ProtocolError> {
        let prompt = serde_json::to_string(&self.prompt).map_err(|source| {
            ProtocolError::Encode {
                field: FIELD_PROMPT,
                source,
            }
        })?;

        let mut fields = Fields::new();
        fields.insert(FIELD_ID.to_string(), self.id.clone());
        fields.insert(FIELD_MODEL.to_string(), self.model.clone());
        fields.insert(FIELD_PROMPT.to_string(), prompt);
        Ok(fields)
    }

    pub fn from_fields(fields: &Fields) -> Result<Self, ProtocolError> {
        let id = required(fields, FIELD_ID)?;
        let model = required(fields, FIELD_MODEL)?;
        let prompt = serde_json::from_str(required(fields, FIELD_PROMPT)?).map_err(|source| {
            ProtocolError::InvalidField {
                field: FIELD_PROMPT,
                source,
            }
        })?;

        Ok(Self {
            id: id.to_string(),
            model: model.to_string(),
            prompt,
        })
    }
}

/// A worker's answer as published on the response channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseMessage {
    pub id: String,
    /// JSON text: a completion object or `{"error": "..."}`.
    pub response: String,
}

impl ResponseMessage {
    /// Wrap a successful completion, keeping the whole result structure.
    pub fn completion(
        id: impl Into<String>,
        completion: &ChatCompletionResponse,
    ) -> Result<Self, ProtocolError> {
        let response = serde_json::to_string(completion).map_err(|source| {
            ProtocolError::Encode {
                field: FIELD_RESPONSE,
                source,
            }
        })?;
        Ok(Self {
            id: id.into(),
            response,
        })
    }

    /// Error indicator so the waiting caller fails fast instead of timing out.
    pub fn error(id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            response: serde_json::json!({ "error": message.into() }).to_string(),
        }
    }

    pub fn to_fields(&self) -> Fields {
        let mut fields = Fields::new();
        fields.insert(FIELD_ID.to_string(), self.id.clone());
        fields.insert(FIELD_RESPONSE.to_string(), self.response.clone());
        fields
    }

    pub fn from_fields(fields: &Fields) -> Result<Self, ProtocolError> {
        Ok(Self {
            id: required(fields, FIELD_ID)?.to_string(),
            response: required(fields, FIELD_RESPONSE)?.to_string(),
        })
    }

    /// Extract `choices[0].message.content`, or say why it is not there.
    pub fn content(&self) -> Result<String, ReplyError> {
        parse_reply(&self.response)
    }
}

/// Correlation id of an entry, if it carries one.
pub fn correlation_id(fields: &Fields) -> Option<&str> {
    fields
        .get(FIELD_ID)
        .map(String::as_str)
        .filter(|id| !id.is_empty())
}

fn required<'a>(fields: &'a Fields, name: &'static str) -> Result<&'a str, ProtocolError> {
    fields
        .get(name)
        .map(String::as_str)
        .ok_or(ProtocolError::MissingField(name))
}

/// Interpret a serialized response payload.
pub fn parse_reply(raw: &str) -> Result<String, ReplyError> {
    let payload: Value = serde_json::from_str(raw)
        .map_err(|e| ReplyError::Malformed(format!("response is not valid JSON: {}", e)))?;

    if let Some(error) = payload.get("error") {
        let message = match error {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        return Err(ReplyError::Failed(message));
    }

    let choices = payload
        .get("choices")
        .and_then(Value::as_array)
        .ok_or_else(|| {
            ReplyError::Malformed("'choices' field missing or invalid format in response".to_string())
        })?;

    let first = choices
        .first()
        .ok_or_else(|| ReplyError::Malformed("'choices' is empty".to_string()))?;

    first
        .get("message")
        .and_then(|m| m.get("content"))
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| ReplyError::Malformed("first choice has no message content".to_string()))
}
