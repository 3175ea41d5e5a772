use super::envelope::{Demultiplexer, ENVELOPE_CHANNEL};
use super::Dispatch;
use crate::codec::{Codec, Json};
use crate::context::WaitContext;
use crate::error::SwitchError;
use crate::execution::{ExecutionContext, SignalChannel};
use futures::FutureExt;
use futures::future::{BoxFuture, pending, ready, select_all};
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::future::Future;
use tracing::debug;

type SignalHandler<'a, E> = Box<dyn FnMut(String) -> Dispatch<'a, E> + Send + 'a>;

enum Source<'a, E> {
    /// The shared enveloped channel; handlers live in the switch's demultiplexer.
    Envelope { channel: SignalChannel },
    Unwrapped {
        channel: SignalChannel,
        handler: SignalHandler<'a, E>,
    },
    /// Sub-future already paired with its handler; `None` once it has fired.
    Future {
        pending: Option<BoxFuture<'a, Dispatch<'a, E>>>,
    },
}

enum Ready<'a, E> {
    Envelope(String),
    Unwrapped(usize, String),
    Future(Dispatch<'a, E>),
}

impl<'a, E: 'a> Source<'a, E> {
    /// Resolves when this source has something to dispatch. Dropping the
    /// returned future before it resolves consumes nothing.
    fn next_ready<'s>(&'s mut self, index: usize) -> BoxFuture<'s, Ready<'a, E>> {
        match self {
            Source::Envelope { channel } => {
                let channel = &*channel;
                async move {
                    match channel.recv().await {
                        Some(raw) => Ready::Envelope(raw),
                        None => pending::<Ready<'a, E>>().await,
                    }
                }
                .boxed()
            }
            Source::Unwrapped { channel, .. } => {
                let channel = &*channel;
                async move {
                    match channel.recv().await {
                        Some(raw) => Ready::Unwrapped(index, raw),
                        None => pending::<Ready<'a, E>>().await,
                    }
                }
                .boxed()
            }
            Source::Future { pending: slot } => async move {
                let Some(fut) = slot.as_mut() else {
                    return pending::<Ready<'a, E>>().await;
                };
                let dispatch = fut.await;
                *slot = None;
                Ready::Future(dispatch)
            }
            .boxed(),
        }
    }
}

/// Waits on signals, enveloped signals and sub-futures, and runs exactly one
/// handler per `select`.
///
/// Sources that are ready but lose a `select` keep their event for the next
/// call. When several sources are ready at once the one registered first
/// wins, so replays dispatch identically.
///
/// `E` is the handlers' error type; protocol failures (unknown kind, bad
/// envelope, payload mismatch, cancellation) are converted into it through
/// `From<SwitchError>`. Handler errors are returned untouched.
pub struct SignalSwitch<'a, E = SwitchError> {
    ctx: ExecutionContext,
    sources: Vec<Source<'a, E>>,
    demux: Demultiplexer<'a, E>,
    // Kind of each unwrapped handler to its index in `sources`.
    unwrapped: HashMap<String, usize>,
    envelope_attached: bool,
    activations: u64,
}

impl<'a, E> SignalSwitch<'a, E>
where
    E: From<SwitchError> + Send + 'a,
{
    pub fn new(ctx: &ExecutionContext) -> Self {
        Self {
            ctx: ctx.clone(),
            sources: Vec::new(),
            demux: Demultiplexer::new(),
            unwrapped: HashMap::new(),
            envelope_attached: false,
            activations: 0,
        }
    }

    /// Handle envelopes of `kind` arriving on the shared envelope channel.
    /// A later registration for the same kind replaces the earlier one.
    pub fn add_signal_handler<T, H, Fut>(&mut self, kind: impl Into<String>, handler: H) -> &mut Self
    where
        T: DeserializeOwned + 'a,
        H: FnMut(T) -> Fut + Send + 'a,
        Fut: Future<Output = Result<(), E>> + Send + 'a,
    {
        self.demux.register(kind, handler);
        if !self.envelope_attached {
            self.envelope_attached = true;
            self.sources.push(Source::Envelope {
                channel: self.ctx.signal_channel(ENVELOPE_CHANNEL),
            });
        }
        self
    }

    /// Handle bare payloads sent to the channel named `kind`.
    /// A later registration for the same kind replaces the earlier one.
    pub fn add_unwrapped_signal_handler<T, H, Fut>(&mut self, kind: impl Into<String>, mut handler: H) -> &mut Self
    where
        T: DeserializeOwned + 'a,
        H: FnMut(T) -> Fut + Send + 'a,
        Fut: Future<Output = Result<(), E>> + Send + 'a,
    {
        let kind = kind.into();
        let label = kind.clone();
        let decode_and_invoke: SignalHandler<'a, E> = Box::new(move |raw: String| -> Dispatch<'a, E> {
            match Json::decode::<T>(&raw) {
                Ok(v) => handler(v).boxed(),
                Err(message) => ready(Err(E::from(SwitchError::Decode {
                    kind: label.clone(),
                    message,
                })))
                .boxed(),
            }
        });
        if let Some(&index) = self.unwrapped.get(&kind)
            && let Some(Source::Unwrapped { handler, .. }) = self.sources.get_mut(index)
        {
            *handler = decode_and_invoke;
            return self;
        }
        let channel = self.ctx.signal_channel(&kind);
        self.unwrapped.insert(kind, self.sources.len());
        self.sources.push(Source::Unwrapped {
            channel,
            handler: decode_and_invoke,
        });
        self
    }

    /// Run `handler` with the output of `future` once it completes. The
    /// sub-future fires at most once over the switch's lifetime.
    pub fn add_future_handler<F, H, Fut>(&mut self, future: F, handler: H) -> &mut Self
    where
        F: Future + Send + 'a,
        H: FnOnce(F::Output) -> Fut + Send + 'a,
        Fut: Future<Output = Result<(), E>> + Send + 'a,
    {
        let paired = async move {
            let output = future.await;
            handler(output).boxed()
        };
        self.sources.push(Source::Future {
            pending: Some(paired.boxed()),
        });
        self
    }

    /// Number of registered sources (the envelope channel counts once).
    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// Block until one source is ready, run its handler and return its result.
    /// Returns the context error if `ctx` ends while nothing is ready.
    pub async fn select(&mut self, ctx: &WaitContext) -> Result<(), E> {
        self.activations += 1;
        let activation = self.activations;

        let fired = {
            let waits: Vec<_> = self
                .sources
                .iter_mut()
                .enumerate()
                .map(|(i, s)| s.next_ready(i))
                .collect();
            let fan_in = async move {
                if waits.is_empty() {
                    pending::<Ready<'a, E>>().await
                } else {
                    select_all(waits).await.0
                }
            };
            tokio::select! {
                biased;
                r = fan_in => r,
                err = ctx.done() => {
                    debug!(execution = self.ctx.execution_id(), activation, error = %err, "select interrupted");
                    return Err(E::from(SwitchError::Context(err)));
                }
            }
        };

        let dispatch = match fired {
            Ready::Envelope(raw) => {
                debug!(execution = self.ctx.execution_id(), activation, "dispatching enveloped signal");
                self.demux.dispatch(&raw)
            }
            Ready::Unwrapped(index, raw) => match self.sources.get_mut(index) {
                Some(Source::Unwrapped { channel, handler }) => {
                    debug!(execution = self.ctx.execution_id(), activation, channel = channel.name(), "dispatching signal");
                    handler(raw)
                }
                _ => ready(Err(E::from(SwitchError::Handler(format!("signal source {index} vanished"))))).boxed(),
            },
            Ready::Future(dispatch) => {
                debug!(execution = self.ctx.execution_id(), activation, "dispatching sub-future");
                dispatch
            }
        };
        dispatch.await
    }
}
