//! Raw agent event records and the decode step for their payloads.
//!
//! The agent runtime streams heterogeneous JSON records. A record may carry a
//! `chunk` (generated text, possibly with an attribution block), a `trace`
//! block, or one of the named error variants. Chunk payloads do not have a
//! single shape: the same text can arrive as a bare byte buffer or as a
//! mapping with a `bytes` or `text` field. [`ChunkPayload::decode`] tries each
//! representation in turn instead of trusting one type check.

use std::fmt;

use base64::{Engine as _, engine::general_purpose::STANDARD};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// One record of an agent invocation stream.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RawAgentEvent(Map<String, Value>);

impl RawAgentEvent {
    pub fn new(fields: Map<String, Value>) -> Self {
        Self(fields)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn chunk(&self) -> Option<&Value> {
        self.get("chunk")
    }

    pub fn trace(&self) -> Option<&Value> {
        self.get("trace")
    }

    /// Error variants present on this record, in [`AgentErrorKind::ALL`] order.
    pub fn errors(&self) -> impl Iterator<Item = (AgentErrorKind, &Value)> {
        AgentErrorKind::ALL
            .into_iter()
            .filter_map(|kind| self.get(kind.key()).map(|payload| (kind, payload)))
    }
}

impl TryFrom<Value> for RawAgentEvent {
    type Error = serde_json::Error;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        serde_json::from_value(value)
    }
}

/// Error variants the agent runtime can emit inside the stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AgentErrorKind {
    AccessDeniedException,
    BadGatewayException,
    ConflictException,
    DependencyFailedException,
    InternalServerException,
    ModelNotReadyException,
    ResourceNotFoundException,
    ServiceQuotaExceededException,
    ThrottlingException,
    ValidationException,
}

impl AgentErrorKind {
    pub const ALL: [Self; 10] = [
        Self::AccessDeniedException,
        Self::BadGatewayException,
        Self::ConflictException,
        Self::DependencyFailedException,
        Self::InternalServerException,
        Self::ModelNotReadyException,
        Self::ResourceNotFoundException,
        Self::ServiceQuotaExceededException,
        Self::ThrottlingException,
        Self::ValidationException,
    ];

    /// Key under which the variant appears in a stream record.
    pub fn key(self) -> &'static str {
        match self {
            Self::AccessDeniedException => "accessDeniedException",
            Self::BadGatewayException => "badGatewayException",
            Self::ConflictException => "conflictException",
            Self::DependencyFailedException => "dependencyFailedException",
            Self::InternalServerException => "internalServerException",
            Self::ModelNotReadyException => "modelNotReadyException",
            Self::ResourceNotFoundException => "resourceNotFoundException",
            Self::ServiceQuotaExceededException => "serviceQuotaExceededException",
            Self::ThrottlingException => "throttlingException",
            Self::ValidationException => "validationException",
        }
    }
}

impl fmt::Display for AgentErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// Decoded shape of a `chunk` value.
#[derive(Debug, Clone, PartialEq)]
pub enum ChunkPayload<'a> {
    /// The chunk itself is a byte buffer.
    Buffer(Vec<u8>),
    /// The chunk is a mapping; `body` comes from its `bytes` or `text` field.
    Mapping {
        body: ChunkBody,
        attribution: Option<&'a Value>,
    },
    /// The chunk is shaped like a byte buffer but does not decode as one.
    Undecodable(BlobError),
    /// Neither representation applies.
    Unrecognized,
}

/// Text-bearing part of a mapping-style chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkBody {
    Bytes(Vec<u8>),
    Text(String),
    /// The named field is present but holds neither bytes nor a string.
    Malformed(&'static str),
    /// The `bytes` field is shaped like a buffer but does not decode as one.
    Undecodable(BlobError),
    Empty,
}

impl<'a> ChunkPayload<'a> {
    /// Try the byte-buffer representation first, then the mapping.
    ///
    /// A `bytes` field governs the mapping even when it is malformed; `text`
    /// is only consulted in its absence.
    pub fn decode(value: &'a Value) -> Self {
        match decode_blob(value) {
            Ok(bytes) => return Self::Buffer(bytes),
            Err(BlobError::NotABlob) => {}
            Err(e) => return Self::Undecodable(e),
        }

        let Value::Object(map) = value else {
            return Self::Unrecognized;
        };

        let body = match (map.get("bytes"), map.get("text")) {
            (Some(raw), _) => match decode_blob(raw) {
                Ok(bytes) => ChunkBody::Bytes(bytes),
                Err(BlobError::NotABlob) => ChunkBody::Malformed("bytes"),
                Err(e) => ChunkBody::Undecodable(e),
            },
            (None, Some(Value::String(text))) => ChunkBody::Text(text.clone()),
            (None, Some(_)) => ChunkBody::Malformed("text"),
            (None, None) => ChunkBody::Empty,
        };

        Self::Mapping {
            body,
            attribution: map.get("attribution"),
        }
    }
}

/// Why a JSON value could not be read as a byte buffer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BlobError {
    #[error("invalid base64: {0}")]
    InvalidBase64(#[from] base64::DecodeError),
    #[error("array element {index} is not an octet")]
    InvalidOctet { index: usize },
    #[error("value is neither a string nor an array")]
    NotABlob,
}

/// Decode a blob as carried in JSON: base64 text or an array of octets.
pub fn decode_blob(value: &Value) -> Result<Vec<u8>, BlobError> {
    match value {
        Value::String(encoded) => Ok(STANDARD.decode(encoded)?),
        Value::Array(items) => items
            .iter()
            .enumerate()
            .map(|(index, item)| {
                item.as_u64()
                    .and_then(|n| u8::try_from(n).ok())
                    .ok_or(BlobError::InvalidOctet { index })
            })
            .collect(),
        _ => Err(BlobError::NotABlob),
    }
}
