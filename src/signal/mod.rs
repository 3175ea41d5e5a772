//! Waiting on several mutually exclusive events at one suspension point.

use futures::future::BoxFuture;

pub mod envelope;
pub mod switch;

pub use envelope::{Demultiplexer, ENVELOPE_CHANNEL, SignalEnvelope, decode_kind};
pub use switch::SignalSwitch;

/// A handler invocation ready to run; resolves to the handler's outcome.
pub type Dispatch<'a, E> = BoxFuture<'a, Result<(), E>>;
