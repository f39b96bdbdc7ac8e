//! Wire representation of chunks and control strings.
//!
//! A wire message is either a control string (`!Welcome`, `!DIE`) or a chunk
//! encoded as a compact JSON object with the fields `kind`, `name`,
//! `sender`, `receiver`, `tic`, `payload` and `log`. Framing is the
//! channel's job; this module only maps one frame body to one message.

use std::fmt;

use serde_json::Value;

use crate::chunk::Chunk;
use crate::constants::CONTROL_SENTINEL;
use crate::ProtocolError;

/// Fields a chunk record must carry to be decoded.
pub const REQUIRED_FIELDS: [&str; 5] = ["kind", "name", "sender", "receiver", "tic"];

/// Encodes and decodes chunk records.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChunkCodec;

impl ChunkCodec {
    pub fn encode(chunk: &Chunk) -> Result<Vec<u8>, ProtocolError> {
        serde_json::to_vec(chunk).map_err(|e| ProtocolError::Encode(e.to_string()))
    }

    /// Decode a chunk record, rejecting anything missing a required field.
    pub fn decode(bytes: &[u8]) -> Result<Chunk, ProtocolError> {
        let value: Value =
            serde_json::from_slice(bytes).map_err(|e| ProtocolError::Malformed(e.to_string()))?;

        let object = value
            .as_object()
            .ok_or_else(|| ProtocolError::Malformed("chunk record is not an object".into()))?;

        for field in REQUIRED_FIELDS {
            if object.get(field).map_or(true, Value::is_null) {
                return Err(ProtocolError::MissingField(field));
            }
        }

        // Surface an unknown kind as such rather than a generic serde error.
        match object.get("kind") {
            Some(Value::String(kind)) => {
                kind.parse::<crate::ChunkKind>()?;
            }
            _ => return Err(ProtocolError::Malformed("`kind` must be a string".into())),
        }

        serde_json::from_value(value).map_err(|e| ProtocolError::Malformed(e.to_string()))
    }
}

/// Out-of-band session control vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ControlString {
    /// Sent by the listening side as soon as a connection is accepted.
    Welcome,
    /// Closes the channel it arrives on. Does not cascade.
    Die,
}

impl ControlString {
    pub fn as_str(&self) -> &'static str {
        match self {
            ControlString::Welcome => "Welcome",
            ControlString::Die => "DIE",
        }
    }

    /// Parse a frame body that starts with the sentinel.
    pub fn parse(body: &str) -> Result<Self, ProtocolError> {
        let word = body
            .strip_prefix(CONTROL_SENTINEL as char)
            .ok_or_else(|| ProtocolError::UnknownControl(body.to_string()))?;
        match word {
            "Welcome" => Ok(ControlString::Welcome),
            "DIE" => Ok(ControlString::Die),
            other => Err(ProtocolError::UnknownControl(other.to_string())),
        }
    }
}

impl fmt::Display for ControlString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", CONTROL_SENTINEL as char, self.as_str())
    }
}

/// One message as carried by a channel frame.
#[derive(Debug, Clone, PartialEq)]
pub enum WireMessage {
    Control(ControlString),
    Chunk(Chunk),
}

impl WireMessage {
    /// Frame body, without the delimiter.
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        match self {
            WireMessage::Control(control) => Ok(control.to_string().into_bytes()),
            WireMessage::Chunk(chunk) => ChunkCodec::encode(chunk),
        }
    }

    pub fn decode(body: &[u8]) -> Result<Self, ProtocolError> {
        if body.first() == Some(&CONTROL_SENTINEL) {
            let text = std::str::from_utf8(body)
                .map_err(|e| ProtocolError::Malformed(format!("control string: {e}")))?;
            return ControlString::parse(text.trim_end()).map(WireMessage::Control);
        }
        ChunkCodec::decode(body).map(WireMessage::Chunk)
    }

    /// Short label for log lines.
    pub fn label(&self) -> String {
        match self {
            WireMessage::Control(control) => control.to_string(),
            WireMessage::Chunk(chunk) => format!("{} {} tic={}", chunk.kind, chunk.name, chunk.tic),
        }
    }
}

impl From<Chunk> for WireMessage {
    fn from(chunk: Chunk) -> Self {
        WireMessage::Chunk(chunk)
    }
}

impl From<ControlString> for WireMessage {
    fn from(control: ControlString) -> Self {
        WireMessage::Control(control)
    }
}
