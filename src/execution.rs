//! Per-execution handle onto the substrate primitives the coordination core
//! relies on: query registration, named signal channels, the version gate and
//! the local side-effecting call.

use crate::config::CoordinationConfig;
use crate::error::{ExecutionRefError, LocalCallError, QueryError, VersionError};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Version returned by the gate for executions that predate a change.
pub const DEFAULT_VERSION: i32 = -1;

/// Read-only query callback; must return a snapshot, never a live reference.
pub type QueryHandler = Arc<dyn Fn() -> Result<Value, String> + Send + Sync>;

/// Address of an execution: workflow id plus optional run id.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ExecutionRef {
    pub workflow_id: String,
    pub run_id: Option<String>,
}

impl ExecutionRef {
    pub fn new(workflow_id: impl Into<String>) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            run_id: None,
        }
    }

    pub fn with_run(workflow_id: impl Into<String>, run_id: impl Into<String>) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            run_id: Some(run_id.into()),
        }
    }
}

impl FromStr for ExecutionRef {
    type Err = ExecutionRefError;

    /// Accepts `"<workflow_id>"` or `"<workflow_id>:<run_id>"`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(ExecutionRefError::Empty);
        }
        match s.split_once(':') {
            None => Ok(Self::new(s)),
            Some((wf, run)) if !wf.is_empty() && !run.is_empty() && !run.contains(':') => Ok(Self::with_run(wf, run)),
            Some(_) => Err(ExecutionRefError::Malformed(s.to_string())),
        }
    }
}

impl fmt::Display for ExecutionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.run_id {
            Some(run) => write!(f, "{}:{}", self.workflow_id, run),
            None => f.write_str(&self.workflow_id),
        }
    }
}

/// Receiving end of one named signal channel. Undelivered payloads stay
/// queued; `recv` is cancel-safe so losing a race never drops a signal.
#[derive(Clone)]
pub struct SignalChannel {
    name: String,
    rx: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<String>>>,
}

impl SignalChannel {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Wait for the next payload. `None` only if every sender is gone.
    pub async fn recv(&self) -> Option<String> {
        self.rx.lock().await.recv().await
    }

    /// Take a queued payload without waiting.
    pub fn try_recv(&self) -> Option<String> {
        self.rx.try_lock().ok()?.try_recv().ok()
    }
}

struct SignalSlot {
    tx: mpsc::UnboundedSender<String>,
    channel: SignalChannel,
}

impl SignalSlot {
    fn new(name: &str) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            channel: SignalChannel {
                name: name.to_string(),
                rx: Arc::new(tokio::sync::Mutex::new(rx)),
            },
        }
    }
}

struct ExecInner {
    execution: ExecutionRef,
    config: CoordinationConfig,
    queries: Mutex<HashMap<String, QueryHandler>>,
    versions: Mutex<HashMap<String, i32>>,
    signals: Mutex<HashMap<String, SignalSlot>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Handle held by the code running inside one execution.
#[derive(Clone)]
pub struct ExecutionContext {
    inner: Arc<ExecInner>,
}

impl fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("execution", &self.inner.execution)
            .finish_non_exhaustive()
    }
}

impl ExecutionContext {
    pub fn new(execution_id: impl Into<String>) -> Self {
        Self::builder(execution_id).build()
    }

    pub fn builder(execution_id: impl Into<String>) -> ExecutionContextBuilder {
        ExecutionContextBuilder {
            execution: ExecutionRef::new(execution_id),
            config: CoordinationConfig::default(),
            versions: HashMap::new(),
        }
    }

    pub fn execution_id(&self) -> &str {
        &self.inner.execution.workflow_id
    }

    pub fn execution_ref(&self) -> &ExecutionRef {
        &self.inner.execution
    }

    pub fn config(&self) -> &CoordinationConfig {
        &self.inner.config
    }

    /// Register a named query. Returns false, leaving the existing handler in
    /// place, if the name is already taken.
    pub fn register_query(&self, name: impl Into<String>, handler: QueryHandler) -> bool {
        let name = name.into();
        let mut queries = lock(&self.inner.queries);
        if queries.contains_key(&name) {
            return false;
        }
        debug!(execution = %self.inner.execution, query = %name, "query handler registered");
        queries.insert(name, handler);
        true
    }

    /// Run a registered query against this execution.
    pub fn query(&self, name: &str) -> Result<Value, QueryError> {
        // Clone the handler out so it runs without holding the registry lock.
        let handler = lock(&self.inner.queries).get(name).cloned();
        match handler {
            Some(h) => h().map_err(QueryError::Handler),
            None => Err(QueryError::UnknownQuery { query: name.to_string() }),
        }
    }

    /// Version gate keyed by `change_id`. The first lookup fixes the value for
    /// the lifetime of the execution: a pinned marker (from history) if one
    /// exists, else `max`.
    pub fn get_version(&self, change_id: &str, min: i32, max: i32) -> Result<i32, VersionError> {
        let mut versions = lock(&self.inner.versions);
        let version = *versions.entry(change_id.to_string()).or_insert(max);
        if version < min || version > max {
            return Err(VersionError::OutOfRange {
                change_id: change_id.to_string(),
                version,
                min,
                max,
            });
        }
        Ok(version)
    }

    /// Local side-effecting call with its own timeout. Its outcome never
    /// feeds back into the execution's decisions.
    pub async fn execute_local<T, F>(&self, timeout: Duration, call: F) -> Result<T, LocalCallError>
    where
        F: Future<Output = Result<T, String>>,
    {
        match tokio::time::timeout(timeout, call).await {
            Ok(Ok(v)) => Ok(v),
            Ok(Err(e)) => Err(LocalCallError::Failed(e)),
            Err(_) => Err(LocalCallError::Timeout(timeout)),
        }
    }

    /// Receiving end of the named signal channel, created on first use.
    pub fn signal_channel(&self, name: &str) -> SignalChannel {
        lock(&self.inner.signals)
            .entry(name.to_string())
            .or_insert_with(|| SignalSlot::new(name))
            .channel
            .clone()
    }

    /// Deliver a payload to a named channel. Used by hosts; payloads sent
    /// before anyone listens are buffered.
    pub fn deliver_signal(&self, name: &str, payload: impl Into<String>) {
        let mut signals = lock(&self.inner.signals);
        let slot = signals.entry(name.to_string()).or_insert_with(|| SignalSlot::new(name));
        if slot.tx.send(payload.into()).is_err() {
            warn!(execution = %self.inner.execution, channel = name, "signal dropped: channel closed");
        }
    }
}

pub struct ExecutionContextBuilder {
    execution: ExecutionRef,
    config: CoordinationConfig,
    versions: HashMap<String, i32>,
}

impl ExecutionContextBuilder {
    pub fn run_id(mut self, run_id: impl Into<String>) -> Self {
        self.execution.run_id = Some(run_id.into());
        self
    }

    pub fn config(mut self, config: CoordinationConfig) -> Self {
        self.config = config;
        self
    }

    /// Pin a version marker, as replay of an existing execution would.
    pub fn pin_version(mut self, change_id: impl Into<String>, version: i32) -> Self {
        self.versions.insert(change_id.into(), version);
        self
    }

    pub fn build(self) -> ExecutionContext {
        ExecutionContext {
            inner: Arc::new(ExecInner {
                execution: self.execution,
                config: self.config,
                queries: Mutex::new(HashMap::new()),
                versions: Mutex::new(self.versions),
                signals: Mutex::new(HashMap::new()),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn execution_ref_parsing() {
        assert_eq!("wf".parse::<ExecutionRef>().unwrap(), ExecutionRef::new("wf"));
        assert_eq!("wf:run".parse::<ExecutionRef>().unwrap(), ExecutionRef::with_run("wf", "run"));
        assert_eq!("".parse::<ExecutionRef>(), Err(ExecutionRefError::Empty));
        assert!(matches!(":run".parse::<ExecutionRef>(), Err(ExecutionRefError::Malformed(_))));
        assert!(matches!("a:b:c".parse::<ExecutionRef>(), Err(ExecutionRefError::Malformed(_))));
        assert_eq!(ExecutionRef::with_run("wf", "run").to_string(), "wf:run");
    }

    #[test]
    fn version_is_fixed_on_first_lookup() {
        let ctx = ExecutionContext::new("wf");
        assert_eq!(ctx.get_version("change", DEFAULT_VERSION, 1), Ok(1));
        // a later, wider range does not re-evaluate the recorded value
        assert_eq!(ctx.get_version("change", DEFAULT_VERSION, 2), Ok(1));

        let legacy = ExecutionContext::builder("old").pin_version("change", DEFAULT_VERSION).build();
        assert_eq!(legacy.get_version("change", DEFAULT_VERSION, 1), Ok(DEFAULT_VERSION));
        assert!(legacy.get_version("change", 0, 1).is_err());
    }

    #[test]
    fn queries_are_registered_once() {
        let ctx = ExecutionContext::new("wf");
        assert!(ctx.register_query("q", Arc::new(|| Ok(Value::from(1)))));
        assert!(!ctx.register_query("q", Arc::new(|| Ok(Value::from(2)))));
        assert_eq!(ctx.query("q"), Ok(Value::from(1)));
        assert!(matches!(ctx.query("missing"), Err(QueryError::UnknownQuery { .. })));
    }

    #[tokio::test]
    async fn signals_delivered_before_listening_are_buffered() {
        let ctx = ExecutionContext::new("wf");
        ctx.deliver_signal("ping", "1");
        ctx.deliver_signal("ping", "2");
        let ch = ctx.signal_channel("ping");
        assert_eq!(ch.recv().await.as_deref(), Some("1"));
        assert_eq!(ch.try_recv().as_deref(), Some("2"));
        assert_eq!(ch.try_recv(), None);
    }
}
