//! Request correlator — matches action responses to in-flight requests.
//!
//! DESIGN
//! ======
//! An explicit table of `request id → (route, oneshot sender)`. The caller
//! holds a [`PendingResponse`] wrapping the receiving half. Entries leave the
//! table exactly once: on a matching response or on an explicit
//! [`Requests::cancel`].
//!
//! KNOWN GAP
//! =========
//! Nothing expires automatically. A request whose response never arrives
//! (e.g. the connection dropped) stays pending until cancelled. Callers that
//! need bounded waits use [`PendingResponse::timeout`] and then cancel.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use serde_json::{Map, Value};
use tokio::sync::oneshot;
use uuid::Uuid;

use crate::error::ClientError;
use crate::events::RequestEvent;

struct PendingRequest {
    route: String,
    settle: oneshot::Sender<Value>,
}

#[derive(Default)]
pub struct Requests {
    pending: HashMap<String, PendingRequest>,
}

impl Requests {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fresh collision-resistant request identifier.
    #[must_use]
    pub fn next_id() -> String {
        Uuid::new_v4().to_string()
    }

    /// Record an in-flight request and return the future its caller awaits.
    ///
    /// Re-using an identifier that is still pending replaces the older entry,
    /// whose future then resolves to [`ClientError::RequestAbandoned`].
    pub fn track(&mut self, request_id: &str, route: &str) -> PendingResponse {
        let (settle, rx) = oneshot::channel();
        let entry = PendingRequest { route: route.to_owned(), settle };
        if self.pending.insert(request_id.to_owned(), entry).is_some() {
            tracing::warn!(%request_id, "request id reused while still pending");
        }
        PendingResponse { request_id: request_id.to_owned(), rx }
    }

    /// Settle the request matching `request_id` with `payload`.
    ///
    /// Returns the completed request for observers, or `None` when the id is
    /// unknown (late, duplicate, or cancelled).
    pub fn resolve(&mut self, request_id: &str, payload: Map<String, Value>) -> Option<RequestEvent> {
        let Some(entry) = self.pending.remove(request_id) else {
            tracing::trace!(%request_id, "response for unknown request ignored");
            return None;
        };
        if entry.settle.send(Value::Object(payload.clone())).is_err() {
            tracing::debug!(%request_id, route = %entry.route, "response arrived after caller stopped waiting");
        }
        Some(RequestEvent { route: entry.route, params: payload })
    }

    /// Drop a pending entry without settling it. Returns whether it existed.
    pub fn cancel(&mut self, request_id: &str) -> bool {
        self.pending.remove(request_id).is_some()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

impl std::fmt::Debug for Requests {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Requests").field("pending", &self.pending.len()).finish()
    }
}

// =============================================================================
// PENDING RESPONSE
// =============================================================================

/// Future resolving to the response object of one request.
#[derive(Debug)]
#[must_use = "a request's response is only observable by awaiting its PendingResponse"]
pub struct PendingResponse {
    request_id: String,
    rx: oneshot::Receiver<Value>,
}

impl PendingResponse {
    /// Identifier sent with the request.
    #[must_use]
    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    /// Wait at most `duration` for the response.
    ///
    /// On timeout the pending entry is left in place; pass
    /// [`Self::request_id`] to `Client::cancel_request` to drop it.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::RequestTimeout`] when the deadline passes and
    /// [`ClientError::RequestAbandoned`] when the entry was dropped first.
    pub async fn timeout(self, duration: Duration) -> Result<Value, ClientError> {
        let request_id = self.request_id.clone();
        tokio::time::timeout(duration, self)
            .await
            .unwrap_or(Err(ClientError::RequestTimeout { request_id }))
    }
}

impl Future for PendingResponse {
    type Output = Result<Value, ClientError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx).poll(cx).map(|result| {
            result.map_err(|_| ClientError::RequestAbandoned { request_id: self.request_id.clone() })
        })
    }
}

#[cfg(test)]
#[path = "requests_test.rs"]
mod tests;
