//! Error types for future coordination and signal multiplexing.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Producer-reported error carried inside a finalized future record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[error("{message}")]
pub struct FutureError {
    pub message: String,
}

impl FutureError {
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into() }
    }
}

/// Why a caller's wait ended before the awaited thing happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ContextError {
    #[error("context canceled")]
    Cancelled,
    #[error("context deadline exceeded")]
    DeadlineExceeded,
}

/// Failure to construct a future.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NewFutureError {
    #[error("future key must not be empty")]
    EmptyKey,
    #[error("future `{0}` is already registered in this execution")]
    DuplicateKey(String),
    #[error(transparent)]
    Version(#[from] VersionError),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FinalizeError {
    #[error("future `{key}` is already finalized")]
    AlreadyFinalized { key: String },
    #[error("failed to encode data for future `{key}`: {message}")]
    Encode { key: String, message: String },
}

/// Errors surfaced by the query primitive of the execution substrate.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueryError {
    /// The execution exists but has not registered the named query yet.
    #[error("unknown queryType `{query}`")]
    UnknownQuery { query: String },
    #[error("execution `{execution}` not found")]
    ExecutionNotFound { execution: String },
    #[error("query handler failed: {0}")]
    Handler(String),
    #[error("query transport error: {0}")]
    Transport(String),
}

/// Errors surfaced by the push side of a resolver.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    #[error("no resolution recorded for `{0}`")]
    NotFound(String),
    #[error("resolver transport error: {0}")]
    Transport(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LocalCallError {
    #[error("local call timed out after {0:?}")]
    Timeout(std::time::Duration),
    #[error("local call failed: {0}")]
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VersionError {
    #[error("version {version} for change `{change_id}` is outside supported range [{min}, {max}]")]
    OutOfRange {
        change_id: String,
        version: i32,
        min: i32,
        max: i32,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExecutionRefError {
    #[error("execution reference must not be empty")]
    Empty,
    #[error("malformed execution reference `{0}`")]
    Malformed(String),
}

/// Errors returned while awaiting a future owned by another execution.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AwaitError {
    #[error(transparent)]
    Context(#[from] ContextError),
    /// The producer finalized the future with an error.
    #[error(transparent)]
    Producer(#[from] FutureError),
    #[error(transparent)]
    Query(#[from] QueryError),
    #[error("failed to decode future record: {0}")]
    Decode(String),
    #[error("future `{key}` finalized without data")]
    MissingData { key: String },
    #[error("future key must not be empty")]
    EmptyKey,
}

/// Protocol errors produced by a `SignalSwitch` activation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SwitchError {
    #[error("unhandled signal kind `{0}`")]
    UnhandledKind(String),
    #[error("malformed signal envelope: {0}")]
    MalformedEnvelope(String),
    #[error("failed to decode payload for `{kind}`: {message}")]
    Decode { kind: String, message: String },
    #[error(transparent)]
    Context(#[from] ContextError),
    /// Catch-all for handlers that use `SwitchError` as their error type.
    #[error("{0}")]
    Handler(String),
}

/// Errors from the in-memory host's management calls.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HostError {
    #[error("execution `{0}` already exists")]
    AlreadyExists(String),
    #[error("execution `{0}` not found")]
    NotFound(String),
    #[error("failed to encode signal payload: {0}")]
    Encode(String),
}
