use std::path::PathBuf;

use thiserror::Error;

use crate::chunk::{ChunkKind, Tic};

/// Malformed wire bytes, undecodable chunks, or chunks that violate the
/// protocol. Handlers log these and drop the offending message; the
/// connection stays open.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ProtocolError {
    #[error("malformed message: {0}")]
    Malformed(String),

    #[error("cannot encode chunk: {0}")]
    Encode(String),

    #[error("missing required field `{0}`")]
    MissingField(&'static str),

    #[error("unknown chunk kind `{0}`")]
    UnknownKind(String),

    #[error("unknown control string `{0}`")]
    UnknownControl(String),

    #[error("frame exceeds {limit} bytes")]
    FrameTooLong { limit: usize },

    #[error("{kind} is not valid on the {link} link")]
    WrongLink { kind: ChunkKind, link: &'static str },

    #[error("stale tic {got}, current tic is {current}")]
    StaleTic { got: Tic, current: Tic },

    #[error("unexpected {kind} from {sender}")]
    Unexpected { kind: ChunkKind, sender: String },
}

/// The configuration provider failed. Fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot parse agent context: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid agent context: {0}")]
    Invalid(String),

    #[error("no configuration path given and no platform config directory")]
    NoConfigPath,
}
