//! Wire envelope model and codec.
//!
//! An envelope is a JSON object. Requests carry `method`, an optional
//! `params` object, and an optional correlation token under
//! [`CORRELATION_FIELD`]; responses carry `result`, `error`, and the token
//! echoed unchanged. The token is opaque to the dispatcher; it exists so
//! a caller can multiplex concurrent calls over one shared channel, and
//! is held by the transport adapter, never by the [`Request`] itself.

use serde::{Deserialize, Serialize};
use serde_json::{Map as JsonMap, Value as JsonValue};
use thiserror::Error;

/// Envelope field carrying the caller-supplied correlation token.
pub const CORRELATION_FIELD: &str = "uid";

/// Closed enumeration of dispatch-level error kinds.
///
/// Wire numbers are frozen: new kinds may be appended, existing values are
/// never reassigned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    NoSuchMethod,
    InvokeFailed,
    DatabaseFailed,
}

impl ErrorCode {
    pub const fn as_i64(self) -> i64 {
        match self {
            ErrorCode::NoSuchMethod => 100,
            ErrorCode::InvokeFailed => 101,
            ErrorCode::DatabaseFailed => 102,
        }
    }
}

/// Structured error carried in a response envelope.
///
/// `code` stays a plain integer so deployments can append collaborator
/// codes beyond [`ErrorCode`] without touching this crate.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorInfo {
    pub code: i64,
    pub message: String,
}

impl ErrorInfo {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self { code: code.as_i64(), message: message.into() }
    }
}

/// A decoded RPC call. Immutable once constructed; carries no transport
/// identity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Request {
    pub method: String,
    #[serde(default)]
    pub params: JsonMap<String, JsonValue>,
}

impl Request {
    pub fn new(method: impl Into<String>, params: JsonMap<String, JsonValue>) -> Self {
        Self { method: method.into(), params }
    }
}

/// The single outcome of an invocation: `result` on success XOR `error`
/// on failure; both absent only for success with no value.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Response {
    pub result: Option<JsonValue>,
    pub error: Option<ErrorInfo>,
}

impl Response {
    pub fn success(result: JsonValue) -> Self {
        Self { result: Some(result), error: None }
    }

    pub fn empty() -> Self {
        Self { result: None, error: None }
    }

    pub fn failure(code: ErrorCode, message: impl Into<String>) -> Self {
        Self { result: None, error: Some(ErrorInfo::new(code, message)) }
    }

    pub fn from_error(error: ErrorInfo) -> Self {
        Self { result: None, error: Some(error) }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("envelope is not well-formed json: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("envelope is not a json object")]
    NotAnObject,
    #[error("envelope field \"method\" is missing or not a string")]
    BadMethod,
    #[error("envelope field \"params\" is not an object")]
    BadParams,
}

/// Decode a request envelope into the in-memory model plus its
/// correlation token. An absent token collapses to `null`.
pub fn decode_envelope(raw: &[u8]) -> Result<(Request, JsonValue), DecodeError> {
    let value: JsonValue = serde_json::from_slice(raw)?;
    let JsonValue::Object(mut fields) = value else {
        return Err(DecodeError::NotAnObject);
    };

    let method = match fields.get("method") {
        Some(JsonValue::String(method)) if !method.is_empty() => method.clone(),
        _ => return Err(DecodeError::BadMethod),
    };

    let params = match fields.remove("params") {
        None | Some(JsonValue::Null) => JsonMap::new(),
        Some(JsonValue::Object(params)) => params,
        Some(_) => return Err(DecodeError::BadParams),
    };

    let token = fields.remove(CORRELATION_FIELD).unwrap_or(JsonValue::Null);

    Ok((Request { method, params }, token))
}

/// Encode a response envelope, writing the token back under the same
/// field name it arrived in.
pub fn encode_envelope(
    response: &Response,
    token: &JsonValue,
) -> Result<Vec<u8>, serde_json::Error> {
    let mut envelope = match serde_json::to_value(response)? {
        JsonValue::Object(fields) => fields,
        other => {
            // Response serializes as an object by construction.
            return serde_json::to_vec(&other);
        }
    };
    envelope.insert(CORRELATION_FIELD.to_string(), token.clone());
    serde_json::to_vec(&JsonValue::Object(envelope))
}

/// Encode a request envelope. Callers that do not multiplex pass `null`
/// as the token.
pub fn encode_request_envelope(
    request: &Request,
    token: &JsonValue,
) -> Result<Vec<u8>, serde_json::Error> {
    let mut envelope = match serde_json::to_value(request)? {
        JsonValue::Object(fields) => fields,
        other => return serde_json::to_vec(&other),
    };
    envelope.insert(CORRELATION_FIELD.to_string(), token.clone());
    serde_json::to_vec(&JsonValue::Object(envelope))
}
