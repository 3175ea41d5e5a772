use super::{FutureRecord, query_name};
use crate::codec::{Codec, Json};
use crate::config::CoordinationConfig;
use crate::context::WaitContext;
use crate::error::{AwaitError, QueryError};
use crate::execution::ExecutionRef;
use crate::providers::{FutureResolver, push_key};
use serde::de::{DeserializeOwned, IgnoredAny};
use serde_json::Value;
use tracing::debug;

type Outcome<T> = Result<Option<T>, AwaitError>;

/// Wait for the future `key` owned by `owner` to finalize, discarding its data.
/// Returns the producer's error if it finalized with one.
pub async fn await_future(
    ctx: &WaitContext,
    resolver: &dyn FutureResolver,
    owner: &ExecutionRef,
    key: &str,
) -> Result<(), AwaitError> {
    await_future_with(ctx, resolver, owner, key, &CoordinationConfig::default()).await
}

pub async fn await_future_with(
    ctx: &WaitContext,
    resolver: &dyn FutureResolver,
    owner: &ExecutionRef,
    key: &str,
    config: &CoordinationConfig,
) -> Result<(), AwaitError> {
    wait_for_outcome::<IgnoredAny>(ctx, resolver, owner, key, config)
        .await
        .map(|_| ())
}

/// Wait for the future `key` owned by `owner` and decode its data as `T`.
///
/// A future finalized without data yields `T` only if `T` accepts `null`
/// (`()`, `Option<_>`); otherwise `AwaitError::MissingData`.
pub async fn await_typed_future<T: DeserializeOwned>(
    ctx: &WaitContext,
    resolver: &dyn FutureResolver,
    owner: &ExecutionRef,
    key: &str,
) -> Result<T, AwaitError> {
    await_typed_future_with(ctx, resolver, owner, key, &CoordinationConfig::default()).await
}

pub async fn await_typed_future_with<T: DeserializeOwned>(
    ctx: &WaitContext,
    resolver: &dyn FutureResolver,
    owner: &ExecutionRef,
    key: &str,
    config: &CoordinationConfig,
) -> Result<T, AwaitError> {
    match wait_for_outcome::<T>(ctx, resolver, owner, key, config).await? {
        Some(data) => Ok(data),
        None => Json::from_value(Value::Null).map_err(|_| AwaitError::MissingData { key: key.to_string() }),
    }
}

async fn wait_for_outcome<T: DeserializeOwned>(
    ctx: &WaitContext,
    resolver: &dyn FutureResolver,
    owner: &ExecutionRef,
    key: &str,
    config: &CoordinationConfig,
) -> Outcome<T> {
    if key.is_empty() {
        return Err(AwaitError::EmptyKey);
    }
    if let Some(err) = ctx.err() {
        return Err(err.into());
    }
    if let Some(outcome) = fast_path::<T>(ctx, resolver, owner, key, config).await {
        return outcome;
    }
    poll::<T>(ctx, resolver, owner, key, config).await
}

/// One bounded read of the push store. `None` means fall back to polling.
async fn fast_path<T: DeserializeOwned>(
    ctx: &WaitContext,
    resolver: &dyn FutureResolver,
    owner: &ExecutionRef,
    key: &str,
    config: &CoordinationConfig,
) -> Option<Outcome<T>> {
    let push_key = push_key(&owner.workflow_id, key);
    let attempt = tokio::select! {
        r = tokio::time::timeout(config.fast_path_timeout(), resolver.await_resolution(&push_key)) => r,
        // The poll loop reports the context error on its first check.
        _ = ctx.done() => return None,
    };
    let bytes = match attempt {
        Ok(Ok(bytes)) => bytes,
        Ok(Err(e)) => {
            debug!(push_key = %push_key, error = %e, "fast path miss; polling");
            return None;
        }
        Err(_) => {
            debug!(push_key = %push_key, timeout_ms = config.fast_path_timeout_ms, "fast path timed out; polling");
            return None;
        }
    };
    let record = match serde_json::from_slice::<FutureRecord<T>>(&bytes) {
        Ok(r) => r,
        Err(e) => return Some(Err(AwaitError::Decode(e.to_string()))),
    };
    match record.outcome() {
        Some(outcome) => {
            debug!(push_key = %push_key, "future resolved from push");
            Some(outcome.map_err(AwaitError::from))
        }
        None => {
            debug!(push_key = %push_key, "pushed record not finalized; polling");
            None
        }
    }
}

async fn poll<T: DeserializeOwned>(
    ctx: &WaitContext,
    resolver: &dyn FutureResolver,
    owner: &ExecutionRef,
    key: &str,
    config: &CoordinationConfig,
) -> Outcome<T> {
    let queries = resolver.query_client();
    let query = query_name(key);
    let mut attempt: u64 = 0;
    loop {
        if let Some(err) = ctx.err() {
            return Err(err.into());
        }
        attempt += 1;
        let result = tokio::select! {
            r = queries.query(owner, &query) => r,
            err = ctx.done() => return Err(err.into()),
        };
        match result {
            // Producer has not created the future yet.
            Err(QueryError::UnknownQuery { .. }) => {
                debug!(owner = %owner, key, attempt, "future not exposed yet");
            }
            Err(e) => return Err(e.into()),
            Ok(value) => {
                let record: FutureRecord<T> = Json::from_value(value).map_err(AwaitError::Decode)?;
                if let Some(outcome) = record.outcome() {
                    debug!(owner = %owner, key, attempt, "future resolved from query");
                    return outcome.map_err(AwaitError::from);
                }
            }
        }
        ctx.sleep(config.poll_interval()).await?;
    }
}
