//! Error types for the mutation pipeline

use crate::codec::CodecOp;
use thiserror::Error;

/// Main error type for mutator operations
#[derive(Debug, Error)]
pub enum MutatorError {
    #[error("Invalid {target} pattern '{pattern}': {reason}")]
    InvalidPattern {
        target: PatternTarget,
        pattern: String,
        reason: String,
    },

    #[error("Codec operation {op:?} failed: {reason}")]
    Codec { op: CodecOp, reason: String },

    #[error("Request reassembly failed: {0}")]
    Reassembly(#[from] ReassemblyError),

    #[error("Invalid header '{name}': {reason}")]
    InvalidHeader { name: String, reason: String },

    #[error("Failed to build log message: {0}")]
    LogBuild(#[from] std::fmt::Error),

    #[error("Settings error: {reason}")]
    Settings { reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl MutatorError {
    /// Create a codec error for the given operation
    pub fn codec(op: CodecOp, reason: impl Into<String>) -> Self {
        Self::Codec {
            op,
            reason: reason.into(),
        }
    }

    /// Create a settings error
    pub fn settings(reason: impl Into<String>) -> Self {
        Self::Settings {
            reason: reason.into(),
        }
    }
}

/// Which part of a rule a pattern belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatternTarget {
    Parameter,
    Path,
}

impl std::fmt::Display for PatternTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PatternTarget::Parameter => write!(f, "parameter"),
            PatternTarget::Path => write!(f, "path"),
        }
    }
}

/// Failure to turn a rewritten raw message back into a structured request
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReassemblyError {
    #[error("message has no request line")]
    MissingRequestLine,

    #[error("malformed request line: {line}")]
    MalformedRequestLine { line: String },

    #[error("invalid method '{method}'")]
    InvalidMethod { method: String },

    #[error("no blank line separating headers from body")]
    MissingHeaderTerminator,
}

impl From<serde_json::Error> for MutatorError {
    fn from(error: serde_json::Error) -> Self {
        MutatorError::Settings {
            reason: error.to_string(),
        }
    }
}

impl From<toml::de::Error> for MutatorError {
    fn from(error: toml::de::Error) -> Self {
        MutatorError::Settings {
            reason: error.to_string(),
        }
    }
}

/// Result type for mutator operations
pub type MutatorResult<T> = Result<T, MutatorError>;
