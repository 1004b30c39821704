//! WebSocket transport over tokio-tungstenite.
//!
//! Each `open` spawns one connection task. The task forwards outbound text
//! from an unbounded channel to the socket and pushes inbound text frames,
//! plus `Open`/`Close` signals, into the event channel handed out by
//! [`WsTransport::new`]. Dropping the outbound sender (via `close`) makes the
//! task send a close frame and exit.
//!
//! A connection counts as finished as soon as it reports `Close`, even if its
//! task is still unwinding, so an `open` issued in reaction to that `Close`
//! always starts a new connection.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use super::{Transport, TransportEvent};

pub struct WsTransport {
    events: mpsc::UnboundedSender<TransportEvent>,
    outbound: Option<mpsc::UnboundedSender<String>>,
    task: Option<Connection>,
}

/// One spawned connection task.
struct Connection {
    handle: JoinHandle<()>,
    closed: Arc<AtomicBool>,
}

impl Connection {
    fn is_live(&self) -> bool {
        !self.closed.load(Ordering::Acquire) && !self.handle.is_finished()
    }
}

impl WsTransport {
    /// Create an idle transport and the receiver its events arrive on.
    #[must_use]
    pub fn new() -> (Self, mpsc::UnboundedReceiver<TransportEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        (Self { events, outbound: None, task: None }, rx)
    }

    /// True from `open` until the connection reports `Close`.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.task.as_ref().is_some_and(Connection::is_live)
    }
}

impl Transport for WsTransport {
    fn open(&mut self, url: &str) {
        if self.is_active() {
            debug!(%url, "websocket already active; open ignored");
            return;
        }
        // Spawning needs a runtime; report a failed attempt instead of panicking.
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(%url, "no tokio runtime available; websocket not opened");
            emit(&self.events, TransportEvent::Close);
            return;
        };

        if let Some(previous) = self.task.take() {
            previous.handle.abort();
        }
        let (tx, rx) = mpsc::unbounded_channel();
        let closed = Arc::new(AtomicBool::new(false));
        let task = run_connection(url.to_owned(), rx, self.events.clone(), Arc::clone(&closed));
        self.outbound = Some(tx);
        self.task = Some(Connection { handle: runtime.spawn(task), closed });
    }

    fn close(&mut self) {
        if self.outbound.take().is_some() {
            debug!("websocket close requested");
        }
    }

    fn send(&mut self, text: String) {
        let Some(outbound) = &self.outbound else {
            debug!("websocket not connected; frame discarded");
            return;
        };
        if outbound.send(text).is_err() {
            debug!("websocket task gone; frame discarded");
        }
    }
}

impl Drop for WsTransport {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.handle.abort();
        }
    }
}

/// Run one connection until either side closes it.
async fn run_connection(
    url: String,
    mut outbound: mpsc::UnboundedReceiver<String>,
    events: mpsc::UnboundedSender<TransportEvent>,
    closed: Arc<AtomicBool>,
) {
    let stream = match connect_async(url.as_str()).await {
        Ok((stream, _)) => stream,
        Err(e) => {
            warn!(%url, error = %e, "websocket connect failed");
            report_close(&closed, &events);
            return;
        }
    };
    info!(%url, "websocket connected");
    if !emit(&events, TransportEvent::Open) {
        return;
    }

    let (mut ws_write, mut ws_read) = stream.split();
    loop {
        tokio::select! {
            out = outbound.recv() => match out {
                Some(text) => {
                    if let Err(e) = ws_write.send(Message::Text(text.into())).await {
                        warn!(error = %e, "websocket send failed");
                        break;
                    }
                }
                None => {
                    if let Err(e) = ws_write.send(Message::Close(None)).await {
                        debug!(error = %e, "websocket close frame not sent");
                    }
                    break;
                }
            },
            msg = ws_read.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    if !emit(&events, TransportEvent::Message(text.as_str().to_owned())) {
                        break;
                    }
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!(error = %e, "websocket recv error");
                    break;
                }
            },
        }
    }

    info!(%url, "websocket disconnected");
    report_close(&closed, &events);
}

/// Mark the connection finished, then tell the owner.
fn report_close(closed: &AtomicBool, events: &mpsc::UnboundedSender<TransportEvent>) {
    closed.store(true, Ordering::Release);
    emit(events, TransportEvent::Close);
}

/// Push one event to the owner. Returns `false` once nobody is listening.
fn emit(events: &mpsc::UnboundedSender<TransportEvent>, event: TransportEvent) -> bool {
    if events.send(event).is_err() {
        debug!("transport event receiver dropped");
        return false;
    }
    true
}
