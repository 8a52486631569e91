//! Line-delimited JSON-RPC codec.
//!
//! One message per line, UTF-8, newline-terminated. Compact JSON never
//! contains a raw newline, so a serialized message always fits one line.
//! Blank lines carry no message: callers check [`is_blank`] and skip them
//! instead of reporting an error.

use crate::protocol::{JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, Message, RequestId};
use serde_json::Value;

/// Failure to turn one line into a [`Message`].
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    /// The line was empty or whitespace-only.
    #[error("empty line")]
    Empty,

    /// The line is not well-formed JSON.
    #[error("malformed JSON: {0}")]
    MalformedSyntax(#[from] serde_json::Error),

    /// Well-formed JSON that is not a JSON-RPC message.
    #[error("not a JSON-RPC message: {0}")]
    InvalidMessage(String),

    /// A request with a usable id whose other fields are malformed.
    #[error("invalid request {id}: {reason}")]
    InvalidRequest { id: RequestId, reason: String },
}

impl DecodeError {
    /// The id a failure can be answered under, if any.
    pub fn request_id(&self) -> Option<&RequestId> {
        match self {
            Self::InvalidRequest { id, .. } => Some(id),
            _ => None,
        }
    }
}

/// Failure to serialize a [`Message`].
#[derive(Debug, thiserror::Error)]
#[error("failed to encode message: {0}")]
pub struct EncodeError(#[from] serde_json::Error);

/// True when the line holds no message and must be skipped silently.
pub fn is_blank(line: &str) -> bool {
    line.trim().is_empty()
}

/// Serialize a message to a single line without the terminator.
///
/// This is the frame handed to `LinesCodec`, which appends the newline.
pub fn serialize(message: &Message) -> Result<String, EncodeError> {
    Ok(serde_json::to_string(message)?)
}

/// Serialize a message to one newline-terminated line.
pub fn encode(message: &Message) -> Result<String, EncodeError> {
    let mut line = serialize(message)?;
    line.push('\n');
    Ok(line)
}

/// Parse one line into a message.
pub fn decode(line: &str) -> Result<Message, DecodeError> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Err(DecodeError::Empty);
    }

    let value: Value = serde_json::from_str(trimmed)?;
    decode_value(value)
}

/// Classify an already-parsed JSON value as a request, notification or response.
pub fn decode_value(value: Value) -> Result<Message, DecodeError> {
    let Value::Object(object) = &value else {
        return Err(DecodeError::InvalidMessage(
            "expected a JSON object".to_string(),
        ));
    };

    if let Some(method) = object.get("method") {
        // A null id is treated the same as a missing one.
        let id = object.get("id").filter(|id| !id.is_null());
        let invalid = |reason: String| match id
            .and_then(|id| serde_json::from_value::<RequestId>(id.clone()).ok())
        {
            Some(id) => DecodeError::InvalidRequest { id, reason },
            None => DecodeError::InvalidMessage(reason),
        };

        if !method.is_string() {
            return Err(invalid("method must be a string".to_string()));
        }

        let message = if id.is_some() {
            serde_json::from_value::<JsonRpcRequest>(value.clone()).map(Message::Request)
        } else {
            serde_json::from_value::<JsonRpcNotification>(value.clone()).map(Message::Notification)
        };
        return message.map_err(|e| invalid(e.to_string()));
    }

    match (object.contains_key("result"), object.contains_key("error")) {
        (true, false) | (false, true) => serde_json::from_value::<JsonRpcResponse>(value)
            .map(Message::Response)
            .map_err(|e| DecodeError::InvalidMessage(e.to_string())),
        (true, true) => Err(DecodeError::InvalidMessage(
            "response carries both result and error".to_string(),
        )),
        (false, false) => Err(DecodeError::InvalidMessage(
            "missing method, result or error".to_string(),
        )),
    }
}
