//! Narrow transport seams: a request/response `Requester` and a push-event `Socket`.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::emitter::{EventEmitter, ListenerId};
use crate::error::TransportError;

pub type PushHandler = Arc<dyn Fn(&Value) + Send + Sync>;

/// Request/response channel to the authoritative store.
#[async_trait]
pub trait Requester: Send + Sync {
    async fn post(&self, path: &str, body: Value) -> Result<Value, TransportError>;
}

/// Push-event channel from the authoritative store.
pub trait Socket: Send + Sync {
    fn on(&self, event: &str, handler: PushHandler) -> ListenerId;

    /// Removes one handler, or all handlers of `event` when `id` is `None`.
    fn off(&self, event: &str, id: Option<ListenerId>);
}

/// Push-event name for `event` on the struct called `schema`.
#[must_use]
pub fn push_event_name(schema: &str, event: &str) -> String {
    format!("struct:{schema}:{event}")
}

/// In-process socket. Anything holding it can deliver push events with [`LocalSocket::dispatch`].
#[derive(Debug, Default)]
pub struct LocalSocket {
    emitter: EventEmitter<String, Value>,
}

impl LocalSocket {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Delivers `payload` to the handlers of `event`; returns how many ran.
    pub fn dispatch(&self, event: &str, payload: &Value) -> usize {
        let delivered = self.emitter.emit(&event.to_string(), payload);
        tracing::trace!(event, delivered, "push event dispatched");
        delivered
    }

    pub fn handler_count(&self, event: &str) -> usize {
        self.emitter.listener_count(&event.to_string())
    }

    pub fn close(&self) {
        self.emitter.destroy();
    }
}

impl Socket for LocalSocket {
    fn on(&self, event: &str, handler: PushHandler) -> ListenerId {
        self.emitter.on_shared(event.to_string(), handler)
    }

    fn off(&self, event: &str, id: Option<ListenerId>) {
        self.emitter.off(&event.to_string(), id);
    }
}
