//! Coordination primitives for durable executions.
//!
//! Long-running executions that are scheduled independently need to hand
//! results to each other without blocking the substrate they run on. This
//! crate provides:
//!
//! - `DurableFuture`: a write-once result owned by a producing execution,
//!   exposed through a query and optionally pushed through a `FutureResolver`
//! - `await_future` / `await_typed_future`: read a future from anywhere, first
//!   from the push store with a short timeout, then by polling the producer's
//!   query until it finalizes or the caller's `WaitContext` ends
//! - `SignalSwitch`: wait on several signals, enveloped signals and
//!   sub-futures at one suspension point and run exactly one handler
//!
//! The substrate (query transport, signal delivery, push store) is consumed
//! through the traits in `providers`; `providers::in_memory` implements them
//! in-process.

mod codec;
pub mod config;
pub mod context;
pub mod error;
pub mod execution;
pub mod future;
pub mod logging;
pub mod providers;
pub mod signal;

pub use config::CoordinationConfig;
pub use context::WaitContext;
pub use error::{
    AwaitError, ContextError, FinalizeError, FutureError, NewFutureError, QueryError, ResolveError, SwitchError,
};
pub use execution::{ExecutionContext, ExecutionRef, SignalChannel};
pub use future::{
    DurableFuture, FutureRecord, await_future, await_future_with, await_typed_future, await_typed_future_with,
    new_future, new_typed_future,
};
pub use providers::{FutureResolver, QueryClient};
pub use signal::{SignalEnvelope, SignalSwitch};
