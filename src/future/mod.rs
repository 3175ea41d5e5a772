//! Write-once, queryable futures owned by a producing execution.
//!
//! A `DurableFuture` is exposed through the query `workflow_waiter_<key>` as
//! soon as it is created. Finalizing it flips the record exactly once and,
//! when the execution's version gate allows, pushes the record through a
//! `FutureResolver` so awaiters can skip polling.

use crate::codec::{Codec, Json};
use crate::error::{FinalizeError, FutureError, NewFutureError};
use crate::execution::{DEFAULT_VERSION, ExecutionContext};
use crate::providers::FutureResolver;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, error, warn};

pub mod waiter;

pub use waiter::{await_future, await_future_with, await_typed_future, await_typed_future_with};

/// Version-gate change id guarding the push side effect at finalize.
pub const PUBSUB_VERSION_CHANGE_KEY: &str = "pubsub_version_change";
pub const PUBSUB_VERSION_MAX_SUPPORTED: i32 = 1;

const QUERY_PREFIX: &str = "workflow_waiter_";

/// Name of the query exposing the future stored under `key`.
pub fn query_name(key: &str) -> String {
    format!("{QUERY_PREFIX}{key}")
}

/// Wire form of a future: `{key, finalized, data?, error?}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FutureRecord<T> {
    pub key: String,
    pub finalized: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<FutureError>,
}

impl<T> FutureRecord<T> {
    pub fn pending(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            finalized: false,
            data: None,
            error: None,
        }
    }

    /// Outcome of a finalized record; `None` while pending.
    pub fn outcome(self) -> Option<Result<Option<T>, FutureError>> {
        if !self.finalized {
            return None;
        }
        Some(match self.error {
            Some(e) => Err(e),
            None => Ok(self.data),
        })
    }
}

/// Producer-side handle. Mutated only by the owning execution; everyone else
/// reads snapshots through the query or the resolver.
pub struct DurableFuture<T> {
    key: String,
    state: Arc<Mutex<FutureRecord<T>>>,
    ctx: ExecutionContext,
    // Captured once at creation so every finalize of this instance behaves
    // the same on replay.
    push_enabled: bool,
}

impl<T> fmt::Debug for DurableFuture<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DurableFuture")
            .field("key", &self.key)
            .field("finalized", &self.is_finalized())
            .field("push_enabled", &self.push_enabled)
            .finish()
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Create a data-less future and expose it on `ctx`.
pub fn new_future(ctx: &ExecutionContext, key: impl Into<String>) -> Result<DurableFuture<()>, NewFutureError> {
    DurableFuture::create(ctx, key.into())
}

/// Create a future carrying a `T` on success and expose it on `ctx`.
pub fn new_typed_future<T>(ctx: &ExecutionContext, key: impl Into<String>) -> Result<DurableFuture<T>, NewFutureError>
where
    T: Serialize + Send + 'static,
{
    DurableFuture::create(ctx, key.into())
}

impl<T> DurableFuture<T> {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn is_finalized(&self) -> bool {
        lock(&self.state).finalized
    }

    /// Whether finalize will attempt the push side effect.
    pub fn push_enabled(&self) -> bool {
        self.push_enabled
    }

    pub fn snapshot(&self) -> FutureRecord<T>
    where
        T: Clone,
    {
        lock(&self.state).clone()
    }
}

impl<T> DurableFuture<T>
where
    T: Serialize + Send + 'static,
{
    fn create(ctx: &ExecutionContext, key: String) -> Result<Self, NewFutureError> {
        if key.is_empty() {
            return Err(NewFutureError::EmptyKey);
        }
        let version = ctx.get_version(PUBSUB_VERSION_CHANGE_KEY, DEFAULT_VERSION, PUBSUB_VERSION_MAX_SUPPORTED)?;
        let state = Arc::new(Mutex::new(FutureRecord::pending(key.clone())));

        let exposed = state.clone();
        let registered = ctx.register_query(
            query_name(&key),
            Arc::new(move || {
                let record = lock(&exposed);
                Json::to_value(&*record)
            }),
        );
        if !registered {
            return Err(NewFutureError::DuplicateKey(key));
        }
        debug!(execution = ctx.execution_id(), key = %key, version, "future created");
        Ok(Self {
            key,
            state,
            ctx: ctx.clone(),
            push_enabled: version != DEFAULT_VERSION,
        })
    }

    /// Mark the future done with neither data nor error.
    pub async fn finalize(&self, resolver: &dyn FutureResolver) -> Result<(), FinalizeError> {
        self.transition(resolver, None, None).await
    }

    pub async fn finalize_with_data(&self, resolver: &dyn FutureResolver, data: T) -> Result<(), FinalizeError> {
        self.transition(resolver, Some(data), None).await
    }

    /// Finalize with a producer error; awaiters see `err.to_string()` as the message.
    pub async fn finalize_err(&self, resolver: &dyn FutureResolver, err: impl fmt::Display) -> Result<(), FinalizeError> {
        self.transition(resolver, None, Some(FutureError::new(err.to_string())))
            .await
    }

    async fn transition(
        &self,
        resolver: &dyn FutureResolver,
        data: Option<T>,
        error: Option<FutureError>,
    ) -> Result<(), FinalizeError> {
        let pushed = {
            let mut record = lock(&self.state);
            if record.finalized {
                warn!(execution = self.ctx.execution_id(), key = %self.key, "ignoring second finalize");
                return Err(FinalizeError::AlreadyFinalized { key: self.key.clone() });
            }
            // A failed encode leaves the record pending.
            let encoded = data
                .as_ref()
                .map(Json::to_value)
                .transpose()
                .map_err(|message| FinalizeError::Encode {
                    key: self.key.clone(),
                    message,
                })?;
            record.finalized = true;
            record.data = data;
            record.error = error.clone();
            FutureRecord {
                key: self.key.clone(),
                finalized: true,
                data: encoded,
                error,
            }
        };
        debug!(execution = self.ctx.execution_id(), key = %self.key, failed = pushed.error.is_some(), "future finalized");

        if self.push_enabled {
            self.push(resolver, &pushed).await;
        }
        Ok(())
    }

    async fn push(&self, resolver: &dyn FutureResolver, record: &FutureRecord<Value>) {
        let execution_id = self.ctx.execution_id();
        let timeout = self.ctx.config().push_timeout();
        let call = async { resolver.resolve(execution_id, record).await.map_err(|e| e.to_string()) };
        match self.ctx.execute_local(timeout, call).await {
            Ok(()) => debug!(execution = execution_id, key = %self.key, "future pushed"),
            // Awaiters still observe the value through the poll path.
            Err(e) => error!(execution = execution_id, key = %self.key, error = %e, "error resolving future"),
        }
    }
}
