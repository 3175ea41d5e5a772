use super::Dispatch;
use crate::codec::{Codec, Json};
use crate::error::SwitchError;
use futures::FutureExt;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use tracing::warn;

/// Channel shared by every enveloped signal kind.
pub const ENVELOPE_CHANNEL: &str = "signal_envelope";

/// Discriminator plus payload, so many signal kinds can share one channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalEnvelope<T> {
    pub kind: String,
    pub payload: T,
}

impl<T> SignalEnvelope<T> {
    pub fn new(kind: impl Into<String>, payload: T) -> Self {
        Self {
            kind: kind.into(),
            payload,
        }
    }
}

impl<T: Serialize> SignalEnvelope<T> {
    pub fn encode(&self) -> Result<String, SwitchError> {
        Json::encode(self).map_err(SwitchError::MalformedEnvelope)
    }
}

// Envelope with the payload left undecoded until the kind is known.
#[derive(Deserialize)]
struct RawEnvelope {
    kind: String,
    #[serde(default)]
    payload: Value,
}

/// Split an encoded envelope into its kind and raw payload.
pub fn decode_kind(raw: &str) -> Result<(String, Value), SwitchError> {
    let env: RawEnvelope = Json::decode(raw).map_err(SwitchError::MalformedEnvelope)?;
    Ok((env.kind, env.payload))
}

type EnvelopeHandler<'a, E> = Box<dyn FnMut(Value) -> Dispatch<'a, E> + Send + 'a>;

/// Routes envelopes to the decoder and handler registered for their kind.
pub struct Demultiplexer<'a, E> {
    handlers: HashMap<String, EnvelopeHandler<'a, E>>,
}

impl<'a, E> Default for Demultiplexer<'a, E> {
    fn default() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }
}

impl<'a, E> Demultiplexer<'a, E>
where
    E: From<SwitchError> + Send + 'a,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `kind`, replacing any earlier registration.
    pub fn register<T, H, Fut>(&mut self, kind: impl Into<String>, mut handler: H)
    where
        T: DeserializeOwned + 'a,
        H: FnMut(T) -> Fut + Send + 'a,
        Fut: Future<Output = Result<(), E>> + Send + 'a,
    {
        let kind = kind.into();
        let label = kind.clone();
        let decode_and_invoke = move |payload: Value| -> Dispatch<'a, E> {
            match Json::from_value::<T>(payload) {
                Ok(v) => handler(v).boxed(),
                Err(message) => futures::future::ready(Err(E::from(SwitchError::Decode {
                    kind: label.clone(),
                    message,
                })))
                .boxed(),
            }
        };
        self.handlers.insert(kind, Box::new(decode_and_invoke));
    }

    pub fn is_registered(&self, kind: &str) -> bool {
        self.handlers.contains_key(kind)
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Decode the discriminator of `raw` and hand the payload to its handler.
    /// Protocol failures become the returned dispatch's error.
    pub fn dispatch(&mut self, raw: &str) -> Dispatch<'a, E> {
        let (kind, payload) = match decode_kind(raw) {
            Ok(parts) => parts,
            Err(e) => {
                warn!(error = %e, "dropping malformed signal envelope");
                return futures::future::ready(Err(E::from(e))).boxed();
            }
        };
        match self.handlers.get_mut(&kind) {
            Some(handler) => handler(payload),
            None => {
                warn!(kind = %kind, "unhandled signal kind");
                futures::future::ready(Err(E::from(SwitchError::UnhandledKind(kind)))).boxed()
            }
        }
    }
}
