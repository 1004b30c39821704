//! Event pump and reconnection policy.
//!
//! `run` owns the transport's event receiver and feeds every event into a
//! shared client. After a close the client did not ask for, it waits with
//! exponential backoff and opens again. The mutex is only held while an
//! event is applied, never across an `.await`.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::client::Client;
use crate::config::ClientConfig;
use crate::transport::{Transport, TransportEvent, WsTransport};

pub const DEFAULT_INITIAL_BACKOFF: Duration = Duration::from_millis(1000);
pub const DEFAULT_MAX_BACKOFF: Duration = Duration::from_millis(10_000);

/// Client shared between the event pump and application code.
pub type SharedClient<T> = Arc<Mutex<Client<T>>>;

// =============================================================================
// BACKOFF
// =============================================================================

/// Doubling delay with an upper bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    #[must_use]
    pub fn new(initial: Duration, max: Duration) -> Self {
        let initial = initial.min(max);
        Self { initial, max, current: initial }
    }

    /// Delay to wait now. Doubles the following one up to the cap.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = self.current.saturating_mul(2).min(self.max);
        delay
    }

    /// Back to the initial delay after a successful open.
    pub fn reset(&mut self) {
        self.current = self.initial;
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(DEFAULT_INITIAL_BACKOFF, DEFAULT_MAX_BACKOFF)
    }
}

/// What to do when the connection drops without a local `close()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectPolicy {
    /// Only pump events.
    Disabled,
    /// Reopen after each backoff delay.
    Backoff(Backoff),
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::Backoff(Backoff::default())
    }
}

// =============================================================================
// EVENT PUMP
// =============================================================================

/// Feed transport events into `client` until the event stream ends.
pub async fn run<T: Transport>(
    client: SharedClient<T>,
    mut events: mpsc::UnboundedReceiver<TransportEvent>,
    policy: ReconnectPolicy,
) {
    let mut backoff = match policy {
        ReconnectPolicy::Disabled => None,
        ReconnectPolicy::Backoff(backoff) => Some(backoff),
    };

    while let Some(event) = events.recv().await {
        let reopen = {
            let mut client = lock(&client);
            let closed = event == TransportEvent::Close;
            if event == TransportEvent::Open {
                if let Some(backoff) = backoff.as_mut() {
                    backoff.reset();
                }
            }
            client.handle_transport_event(event);
            closed && !client.is_open() && !client.is_force_closed()
        };

        let Some(backoff) = backoff.as_mut().filter(|_| reopen) else {
            continue;
        };
        let delay = backoff.next_delay();
        info!(delay_ms = delay.as_millis(), "connection lost; reconnecting after backoff");
        tokio::time::sleep(delay).await;

        let mut client = lock(&client);
        if client.is_open() || client.is_force_closed() {
            debug!("reconnect skipped");
        } else {
            client.open();
        }
    }
    debug!("transport event stream ended");
}

/// Build a WebSocket client and spawn its event pump on the current runtime.
///
/// Must be called from within a tokio runtime.
#[must_use]
pub fn spawn_ws_client(config: ClientConfig, policy: ReconnectPolicy) -> (SharedClient<WsTransport>, JoinHandle<()>) {
    let (transport, events) = WsTransport::new();
    let client = Arc::new(Mutex::new(Client::new(config, transport)));
    let pump = tokio::spawn(run(Arc::clone(&client), events, policy));
    (client, pump)
}

/// Lock the shared client, recovering from a poisoned mutex.
pub fn lock<T: Transport>(client: &Mutex<Client<T>>) -> MutexGuard<'_, Client<T>> {
    client.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
#[path = "reconnect_test.rs"]
mod tests;
