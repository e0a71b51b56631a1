use std::fmt;

use thiserror::Error;

use lobby_types::blob::BlobError;
use lobby_types::channel::ChannelError;
use lobby_types::store::StoreError;

/// A snapshot or profile read failed. Recoverable: the caller may retry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("fetch from '{table}' failed: {reason}")]
pub struct TransientFetchError {
    pub table: String,
    pub reason: String,
}

impl TransientFetchError {
    pub fn new(table: &str, err: StoreError) -> Self {
        Self {
            table: table.to_string(),
            reason: err.to_string(),
        }
    }
}

/// A row or push event that cannot be turned into an entry. Logged and
/// dropped, never surfaced to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("payload is not valid JSON: {0}")]
    Json(String),

    #[error("payload is not a JSON object")]
    NotAnObject,

    #[error("missing field '{0}'")]
    MissingField(&'static str),

    #[error("invalid field '{field}': {reason}")]
    InvalidField { field: &'static str, reason: String },
}

/// The composer stage a send failed at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendStage {
    Validation,
    Storage,
    Write,
}

impl fmt::Display for SendStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Validation => "validation",
            Self::Storage => "storage",
            Self::Write => "write",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Error)]
#[error("message not sent ({reason}): {detail}")]
pub struct SendError {
    pub reason: SendStage,
    pub detail: String,
}

impl SendError {
    pub fn validation(detail: impl Into<String>) -> Self {
        Self {
            reason: SendStage::Validation,
            detail: detail.into(),
        }
    }

    pub fn storage(err: BlobError) -> Self {
        Self {
            reason: SendStage::Storage,
            detail: err.to_string(),
        }
    }

    pub fn write(err: StoreError) -> Self {
        Self {
            reason: SendStage::Write,
            detail: err.to_string(),
        }
    }
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("could not arm live updates: {0}")]
    Subscribe(#[from] ChannelError),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {var}: {reason}")]
    Invalid { var: &'static str, reason: String },
}
