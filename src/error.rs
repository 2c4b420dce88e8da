//! Error types
//!
//! Every failure inside the rule core is one of these kinds. None of them
//! aborts an operation on its own: rules degrade to empty output and record
//! the message in a last-error slot, records degrade to a summary entry.

use thiserror::Error;

/// A book-source record could not be accepted.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("document is not valid JSON: {0}")]
    InvalidJson(String),

    #[error("record #{index} is not an object")]
    NotAnObject { index: usize },

    #[error("record #{index}: missing required field `{field}`")]
    MissingField { index: usize, field: &'static str },

    #[error("record #{index}: unsupported source type {code}")]
    UnsupportedKind { index: usize, code: i64 },

    #[error("record #{index}: source is disabled")]
    Disabled { index: usize },

    #[error("record #{index}: searchUrl has no place for the search key")]
    NoKeyHole { index: usize },
}

impl DecodeError {
    /// Gate rejections count as skipped, everything else as failed.
    pub fn is_skip(&self) -> bool {
        matches!(
            self,
            DecodeError::UnsupportedKind { .. } | DecodeError::Disabled { .. }
        )
    }
}

/// A selector could not be converted or evaluated.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SelectorError {
    #[error("cannot convert selector `{0}`")]
    Unconvertible(String),

    #[error("invalid XPath `{expr}`: {reason}")]
    InvalidXPath { expr: String, reason: String },

    #[error("unsupported JSONPath `{0}`")]
    UnsupportedJsonPath(String),

    #[error("evaluation stopped")]
    Stopped,
}

/// A script raised, tripped the memory limit or could not be started.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScriptError {
    #[error("JS Error: {0}")]
    Runtime(String),

    #[error("JS Error: script runtime unavailable: {0}")]
    Init(String),
}

/// The HTTP transport failed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("HTTP {status} for {url}")]
    Status { status: u16, url: String },

    #[error("request to {url} failed: {reason}")]
    Request { url: String, reason: String },

    #[error("invalid URL `{0}`")]
    InvalidUrl(String),

    #[error("network access is disabled")]
    Offline,
}

/// A stage of the orchestrator could not produce output at all.
#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("fetch failed: {0}")]
    Transport(#[from] TransportError),

    #[error("source `{0}` has no search URL")]
    NoSearchUrl(String),

    #[error("source `{source_name}` has no `{field}` rule")]
    MissingRule {
        source_name: String,
        field: &'static str,
    },

    #[error("stopped")]
    Stopped,
}

/// Crate-level error
#[derive(Error, Debug)]
pub enum Error {
    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("Selector error: {0}")]
    Selector(#[from] SelectorError),

    #[error("{0}")]
    Script(#[from] ScriptError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Orchestrator error: {0}")]
    Orchestrator(#[from] OrchestratorError),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
