//! Error types for the mirror/projector core.
//!
//! Mirrors the codebase's mixed convention: most modules derive
//! [`thiserror::Error`]; the framing decoder hand-rolls `Display`/`Error`
//! the way the storage layer's journal error does, since it is a tight
//! inner-loop type that predates the rest of the crate.

use thiserror::Error;

/// Framing-layer decode failure. Fatal to the current connection.
#[derive(Debug)]
pub enum DecodeError {
    BadLengthPrefix(String),
    Json(String),
}

impl std::fmt::Display for DecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DecodeError::BadLengthPrefix(s) => write!(f, "bad frame length prefix: {s}"),
            DecodeError::Json(s) => write!(f, "frame payload is not valid JSON: {s}"),
        }
    }
}

impl std::error::Error for DecodeError {}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("reading config file: {0}")]
    Io(String),
    #[error("parsing config TOML: {0}")]
    Parse(String),
    #[error("missing required field: {0}")]
    MissingField(String),
    #[error("invalid config value: {0}")]
    InvalidValue(String),
}

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("zone sink unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Error)]
pub enum PubSubError {
    #[error("subscriber '{0}' is already subscribed")]
    AlreadySubscribed(String),
    #[error("subscriber '{0}' not found")]
    NotFound(String),
}

#[derive(Debug, Error)]
pub enum MirrorError {
    #[error("pub/sub: {0}")]
    PubSub(#[from] PubSubError),
    #[error("mirror actor inbox closed")]
    ActorGone,
}
