//! Transport contract consumed by the client.
//!
//! SYSTEM CONTEXT
//! ==============
//! A transport moves whole text frames. It is driven through three
//! non-blocking calls and reports back with [`TransportEvent`] values that
//! its owner feeds into `Client::handle_transport_event`. Framing, TLS and
//! socket details stay inside the implementation, so the rest of the client
//! never changes when the transport does.
//!
//! Contract:
//! - `Open` once the connection is usable.
//! - At most one `Close` per established connection, never repeated before
//!   the next `Open`. A failed connect attempt also reports `Close`.
//! - One `Message` per complete inbound frame.

pub mod ws;

pub use ws::WsTransport;

/// Signal raised by a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Open,
    Close,
    Message(String),
}

pub trait Transport: Send {
    /// Begin connecting to `url`. Completion is reported as [`TransportEvent::Open`].
    fn open(&mut self, url: &str);

    /// Close the current connection, if any.
    fn close(&mut self);

    /// Transmit one frame.
    fn send(&mut self, text: String);
}
