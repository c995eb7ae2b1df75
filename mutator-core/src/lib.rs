//! Param Mutator Core Library
//!
//! Rule-driven mutation of HTTP request parameters for security testing:
//! path and parameter matching, codec chains, random values, `{$name$}`
//! placeholder substitution over the serialized message, request reassembly
//! with `Content-Length` repair, and a bounded activity log.

pub mod codec;
pub mod engine;
pub mod handler;
pub mod placeholder;
pub mod random;
pub mod reassembly;
pub mod request;
pub mod rule;

/// Settings files and the live configuration snapshot
pub mod config;

/// Error types for mutator operations
pub mod error;

/// Size-bounded activity log
pub mod log;

pub use codec::{CodecChain, CodecOp};
pub use config::{ConfigHandle, MutatorConfig, MutatorSettings};
pub use engine::{EngineResult, MutationEngine, RuleFailure};
pub use error::{MutatorError, MutatorResult, PatternTarget, ReassemblyError};
pub use handler::{MutationOutcome, ParamMutator, SubstitutionStatus};
pub use log::{BoundedLog, LogEntry, LogLevel, LogSettings};
pub use placeholder::{PlaceholderSubstitutor, Substitution};
pub use random::{RandomType, RandomValueGenerator};
pub use reassembly::RequestReassembler;
pub use request::{HttpRequest, HttpService, Parameter, ParameterType};
pub use rule::{MutationMode, PathFilterConfig, PatternType, Position, Rule, RuleConfig, RuleSet};

/// Re-exported so callers can build requests without depending on hyper
pub use hyper::Method;

/// Result type alias for mutator operations
pub type Result<T> = std::result::Result<T, MutatorError>;
