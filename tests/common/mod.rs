#![allow(dead_code)]

use async_trait::async_trait;
use rust_dtf_coord::future::FutureRecord;
use rust_dtf_coord::{CoordinationConfig, ExecutionRef, FutureResolver, QueryClient, QueryError, ResolveError};
use serde_json::Value;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Wraps a query client and counts every query issued through it.
pub struct CountingQueries {
    inner: Arc<dyn QueryClient>,
    calls: AtomicUsize,
}

impl CountingQueries {
    pub fn new(inner: Arc<dyn QueryClient>) -> Arc<Self> {
        Arc::new(Self {
            inner,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl QueryClient for CountingQueries {
    async fn query(&self, execution: &ExecutionRef, query: &str) -> Result<Value, QueryError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.query(execution, query).await
    }
}

/// Resolver with an always-empty push store: every await goes to polling.
pub struct PollOnlyResolver {
    queries: Arc<dyn QueryClient>,
    pub pushes: AtomicUsize,
}

impl PollOnlyResolver {
    pub fn new(queries: Arc<dyn QueryClient>) -> Self {
        Self {
            queries,
            pushes: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl FutureResolver for PollOnlyResolver {
    async fn resolve(&self, _execution_id: &str, _record: &FutureRecord<Value>) -> Result<(), ResolveError> {
        self.pushes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn await_resolution(&self, push_key: &str) -> Result<Vec<u8>, ResolveError> {
        Err(ResolveError::NotFound(push_key.to_string()))
    }

    fn query_client(&self) -> Arc<dyn QueryClient> {
        self.queries.clone()
    }
}

/// Resolver whose push channel is broken in both directions.
pub struct BrokenPushResolver {
    queries: Arc<dyn QueryClient>,
}

impl BrokenPushResolver {
    pub fn new(queries: Arc<dyn QueryClient>) -> Self {
        Self { queries }
    }
}

#[async_trait]
impl FutureResolver for BrokenPushResolver {
    async fn resolve(&self, _execution_id: &str, _record: &FutureRecord<Value>) -> Result<(), ResolveError> {
        Err(ResolveError::Transport("push store unavailable".into()))
    }

    async fn await_resolution(&self, _push_key: &str) -> Result<Vec<u8>, ResolveError> {
        Err(ResolveError::Transport("push store unavailable".into()))
    }

    fn query_client(&self) -> Arc<dyn QueryClient> {
        self.queries.clone()
    }
}

/// Short timings so tests running on real time finish quickly.
pub fn fast_config() -> CoordinationConfig {
    CoordinationConfig {
        fast_path_timeout_ms: 20,
        poll_interval_ms: 10,
        push_timeout_ms: 100,
    }
}
