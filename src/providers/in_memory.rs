use super::{FutureResolver, QueryClient, push_key};
use crate::codec::{Codec, Json};
use crate::config::CoordinationConfig;
use crate::error::{HostError, QueryError, ResolveError};
use crate::execution::{DEFAULT_VERSION, ExecutionContext, ExecutionRef};
use crate::future::{FutureRecord, PUBSUB_VERSION_CHANGE_KEY};
use crate::signal::{ENVELOPE_CHANNEL, SignalEnvelope};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use tokio::sync::Notify;
use tracing::{debug, info};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Single-process host tracking live executions. Serves queries and
/// delivers signals; it does not schedule or persist anything.
pub struct InMemoryHost {
    executions: RwLock<HashMap<String, ExecutionContext>>,
    config: CoordinationConfig,
}

impl InMemoryHost {
    /// Host configured from the `DTF_*` environment variables.
    pub fn new() -> Arc<Self> {
        Self::with_config(CoordinationConfig::from_env())
    }

    /// Host whose executions use `config` for their push timeout.
    pub fn with_config(config: CoordinationConfig) -> Arc<Self> {
        crate::logging::init_tracing();
        Arc::new(Self {
            executions: RwLock::new(HashMap::new()),
            config,
        })
    }

    /// Register a new execution created with the current protocol version.
    pub fn start_execution(&self, execution_id: &str) -> Result<ExecutionContext, HostError> {
        self.insert(ExecutionContext::builder(execution_id).config(self.config).build())
    }

    /// Register an execution that predates the push protocol: its version
    /// gate is pinned at `DEFAULT_VERSION`, so its futures finalize poll-only.
    pub fn start_legacy_execution(&self, execution_id: &str) -> Result<ExecutionContext, HostError> {
        self.insert(
            ExecutionContext::builder(execution_id)
                .config(self.config)
                .pin_version(PUBSUB_VERSION_CHANGE_KEY, DEFAULT_VERSION)
                .build(),
        )
    }

    /// Register an execution built elsewhere (custom run id, pinned versions).
    pub fn insert(&self, ctx: ExecutionContext) -> Result<ExecutionContext, HostError> {
        let mut executions = self.executions.write().unwrap_or_else(PoisonError::into_inner);
        let id = ctx.execution_id().to_string();
        if executions.contains_key(&id) {
            return Err(HostError::AlreadyExists(id));
        }
        info!(execution = %id, "execution started");
        executions.insert(id, ctx.clone());
        Ok(ctx)
    }

    pub fn execution(&self, execution_id: &str) -> Option<ExecutionContext> {
        self.executions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(execution_id)
            .cloned()
    }

    /// Forget an execution; later queries report it as not found.
    pub fn complete_execution(&self, execution_id: &str) -> bool {
        let removed = self
            .executions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(execution_id)
            .is_some();
        if removed {
            info!(execution = execution_id, "execution completed");
        }
        removed
    }

    /// Deliver `payload` unwrapped to the channel named `channel`.
    pub fn signal<T: Serialize>(&self, execution_id: &str, channel: &str, payload: &T) -> Result<(), HostError> {
        let raw = Json::encode(payload).map_err(HostError::Encode)?;
        self.deliver(execution_id, channel, raw)
    }

    /// Wrap `payload` in an envelope of `kind` and deliver it on the shared channel.
    pub fn signal_envelope<T: Serialize>(&self, execution_id: &str, kind: &str, payload: &T) -> Result<(), HostError> {
        let raw = SignalEnvelope::new(kind, payload)
            .encode()
            .map_err(|e| HostError::Encode(e.to_string()))?;
        self.deliver(execution_id, ENVELOPE_CHANNEL, raw)
    }

    /// Deliver an already-encoded payload.
    pub fn deliver(&self, execution_id: &str, channel: &str, raw: String) -> Result<(), HostError> {
        let ctx = self
            .execution(execution_id)
            .ok_or_else(|| HostError::NotFound(execution_id.to_string()))?;
        debug!(execution = execution_id, channel, "signal delivered");
        ctx.deliver_signal(channel, raw);
        Ok(())
    }
}

#[async_trait]
impl QueryClient for InMemoryHost {
    async fn query(&self, execution: &ExecutionRef, query: &str) -> Result<Value, QueryError> {
        let not_found = || QueryError::ExecutionNotFound {
            execution: execution.to_string(),
        };
        let ctx = self.execution(&execution.workflow_id).ok_or_else(not_found)?;
        if let Some(run) = &execution.run_id
            && ctx.execution_ref().run_id.as_ref() != Some(run)
        {
            return Err(not_found());
        }
        ctx.query(query)
    }
}

/// Push store keyed by `<execution>:<key>`. Waiters are woken on every write.
pub struct InMemoryResolver {
    records: Mutex<HashMap<String, Vec<u8>>>,
    written: Notify,
    queries: Arc<dyn QueryClient>,
}

impl InMemoryResolver {
    pub fn new(queries: Arc<dyn QueryClient>) -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
            written: Notify::new(),
            queries,
        }
    }

    /// The raw record pushed under `push_key`, if any.
    pub fn pushed(&self, push_key: &str) -> Option<Vec<u8>> {
        lock(&self.records).get(push_key).cloned()
    }

    pub fn pushed_count(&self) -> usize {
        lock(&self.records).len()
    }
}

#[async_trait]
impl FutureResolver for InMemoryResolver {
    async fn resolve(&self, execution_id: &str, record: &FutureRecord<Value>) -> Result<(), ResolveError> {
        let bytes = serde_json::to_vec(record).map_err(|e| ResolveError::Transport(e.to_string()))?;
        let key = push_key(execution_id, &record.key);
        debug!(push_key = %key, "future record stored");
        lock(&self.records).insert(key, bytes);
        self.written.notify_waiters();
        Ok(())
    }

    async fn await_resolution(&self, push_key: &str) -> Result<Vec<u8>, ResolveError> {
        loop {
            // Register interest before checking so a write in between is not missed.
            let written = self.written.notified();
            let hit = self.pushed(push_key);
            if let Some(bytes) = hit {
                return Ok(bytes);
            }
            written.await;
        }
    }

    fn query_client(&self) -> Arc<dyn QueryClient> {
        self.queries.clone()
    }
}
