//! Local publish/subscribe for client observers.
//!
//! DESIGN
//! ======
//! Event names are a typed [`EventKey`] rather than strings. The two
//! channel families (`AllChannels` and `Channel(name)`) carry wire side
//! effects, but those live in the client and the subscription manager; the
//! bus itself only stores handlers and invokes them in registration order.
//!
//! Handlers receive `&mut Event` so the `BeforeSend` and `BeforeRequest`
//! hooks can rewrite outbound data. Every handler for a key sees the same
//! event value, including edits made by earlier handlers.

use std::collections::HashMap;

use serde::Serialize;
use serde_json::{Map, Value};

// =============================================================================
// KEYS
// =============================================================================

/// Which event a handler observes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventKey {
    /// The connection became open.
    Open,
    /// The connection closed.
    Close,
    /// An outbound frame is about to be transmitted (text is mutable).
    BeforeSend,
    /// Any inbound message, verbatim.
    Message,
    /// Publications on every channel (wildcard interest).
    AllChannels,
    /// Publications on one named channel.
    Channel(String),
    /// A request is about to be sent (params are mutable).
    BeforeRequest,
    /// A request received its response.
    Request,
}

impl EventKey {
    /// Shorthand for [`EventKey::Channel`].
    pub fn channel(name: impl Into<String>) -> Self {
        Self::Channel(name.into())
    }
}

// =============================================================================
// PAYLOADS
// =============================================================================

/// A publication delivered on a channel.
///
/// Exactly one of `params` and `message` is set.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChannelEvent {
    pub channel: String,
    /// Decoded JSON body.
    pub params: Option<Value>,
    /// Opaque text body.
    pub message: Option<String>,
}

/// Raw wire text, inbound or outbound.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MessageEvent {
    pub message: String,
}

/// A request before it is sent, or a response once it has arrived.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RequestEvent {
    pub route: String,
    pub params: Map<String, Value>,
}

/// Event value passed to handlers.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Open,
    Close,
    BeforeSend(MessageEvent),
    Message(MessageEvent),
    Channel(ChannelEvent),
    BeforeRequest(RequestEvent),
    Request(RequestEvent),
}

// =============================================================================
// BUS
// =============================================================================

/// Identifies one registered handler so it can be removed later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandlerId(u64);

pub type Handler = Box<dyn FnMut(&mut Event) + Send>;

#[derive(Default)]
pub struct EventBus {
    handlers: HashMap<EventKey, Vec<(HandlerId, Handler)>>,
    next_id: u64,
}

impl EventBus {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a handler for `key` and return its id.
    pub fn on(&mut self, key: EventKey, handler: Handler) -> HandlerId {
        self.next_id += 1;
        let id = HandlerId(self.next_id);
        self.handlers.entry(key).or_default().push((id, handler));
        id
    }

    /// Remove one handler. Returns `false` if it was not registered under `key`.
    pub fn off(&mut self, key: &EventKey, id: HandlerId) -> bool {
        let Some(list) = self.handlers.get_mut(key) else {
            return false;
        };
        let before = list.len();
        list.retain(|(handler_id, _)| *handler_id != id);
        let removed = list.len() != before;
        if list.is_empty() {
            self.handlers.remove(key);
        }
        removed
    }

    /// Remove every handler for `key`, returning how many were dropped.
    pub fn off_all(&mut self, key: &EventKey) -> usize {
        self.handlers.remove(key).map_or(0, |list| list.len())
    }

    #[must_use]
    pub fn has_handlers(&self, key: &EventKey) -> bool {
        self.handler_count(key) > 0
    }

    #[must_use]
    fn handler_count(&self, key: &EventKey) -> usize {
        self.handlers.get(key).map_or(0, Vec::len)
    }

    /// Invoke every handler for `key` in registration order.
    pub fn trigger(&mut self, key: &EventKey, event: &mut Event) {
        let Some(list) = self.handlers.get_mut(key) else {
            return;
        };
        for (_, handler) in list.iter_mut() {
            handler(event);
        }
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let counts: HashMap<&EventKey, usize> = self.handlers.iter().map(|(k, v)| (k, v.len())).collect();
        f.debug_struct("EventBus").field("handlers", &counts).finish()
    }
}

#[cfg(test)]
#[path = "events_test.rs"]
mod tests;
