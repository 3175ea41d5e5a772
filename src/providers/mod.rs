//! Contracts for the collaborators this crate consumes from the execution
//! substrate. Implementations live outside the crate; `in_memory` is a
//! single-process reference used by tests and embedders.

use crate::error::{QueryError, ResolveError};
use crate::execution::ExecutionRef;
use crate::future::FutureRecord;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

pub mod in_memory;

/// Synchronous read of state exposed by a running execution.
#[async_trait]
pub trait QueryClient: Send + Sync {
    /// Must fail with `QueryError::UnknownQuery` when the execution is
    /// reachable but has no handler named `query`, so callers can tell a
    /// not-yet-created future from a real failure.
    async fn query(&self, execution: &ExecutionRef, query: &str) -> Result<Value, QueryError>;
}

/// Push channel for finalized futures plus access to the query primitive
/// used by the poll fallback.
#[async_trait]
pub trait FutureResolver: Send + Sync {
    /// Publish a finalized record produced by `execution_id`.
    async fn resolve(&self, execution_id: &str, record: &FutureRecord<Value>) -> Result<(), ResolveError>;

    /// Wait for the serialized record stored under `push_key`. Callers bound
    /// this with their own timeout; implementations may return early with
    /// `ResolveError::NotFound` if they cannot wait.
    async fn await_resolution(&self, push_key: &str) -> Result<Vec<u8>, ResolveError>;

    fn query_client(&self) -> Arc<dyn QueryClient>;
}

/// Key under which a resolver stores the record for `key` produced by `execution_id`.
pub fn push_key(execution_id: &str, key: &str) -> String {
    format!("{execution_id}:{key}")
}
