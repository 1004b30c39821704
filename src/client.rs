//! Comet client — channels, actions and connection state over one transport.
//!
//! DESIGN
//! ======
//! `Client` is a plain owned struct driven through `&mut self`. It never
//! touches sockets or timers itself:
//! - outbound work calls into the [`Transport`] it owns;
//! - inbound work arrives through [`Client::handle_transport_event`], fed by
//!   whoever owns the transport's event stream (see `reconnect::run`).
//!
//! Subscription bookkeeping lives in [`Subscriptions`], request correlation
//! in [`Requests`], observers in [`EventBus`]. The client glues them together
//! and owns the ordering rules between them.
//!
//! Outbound frames are never queued. While the connection is closed they are
//! dropped after the `BeforeSend` hook runs; subscriptions made meanwhile are
//! still tracked and replayed on the next open.
//!
//! REENTRANCY
//! ==========
//! Observers run while the client is mutably borrowed, and under
//! `reconnect::run` while its mutex is held. An observer must never lock a
//! `SharedClient`; that deadlocks. Observers act on the client through a
//! [`ClientHandle`] instead: its commands are queued and applied as soon as
//! the client call that fired the observer finishes.

use frames::{Frame, Inbound, Payload, REQUEST_ID_KEY};
use serde::Serialize;
use serde_json::{Map, Value};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::config::ClientConfig;
use crate::error::{ClientError, ConfigError};
use crate::events::{ChannelEvent, Event, EventBus, EventKey, HandlerId, MessageEvent, RequestEvent};
use crate::requests::{PendingResponse, Requests};
use crate::subscriptions::Subscriptions;
use crate::transport::{Transport, TransportEvent};

/// Connection state as seen by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Closed,
    Open,
}

pub struct Client<T: Transport> {
    config: ClientConfig,
    transport: T,
    state: ConnectionState,
    force_closed: bool,
    station_id: Uuid,
    server_url: String,
    events: EventBus,
    subscriptions: Subscriptions,
    requests: Requests,
    commands: mpsc::UnboundedSender<Command>,
    queued: mpsc::UnboundedReceiver<Command>,
}

impl<T: Transport> Client<T> {
    /// Build a client around `transport`.
    ///
    /// The server URL template is resolved once here. When `auto_open` is
    /// set the transport is asked to connect immediately.
    pub fn new(config: ClientConfig, transport: T) -> Self {
        let server_url = config.resolve_server_url();
        let (commands, queued) = mpsc::unbounded_channel();
        let mut client = Self {
            config,
            transport,
            state: ConnectionState::Closed,
            force_closed: false,
            station_id: Uuid::new_v4(),
            server_url,
            events: EventBus::new(),
            subscriptions: Subscriptions::new(),
            requests: Requests::new(),
            commands,
            queued,
        };
        tracing::debug!(station_id = %client.station_id, url = %client.server_url, "comet client created");
        if client.config.auto_open {
            client.open();
        }
        client
    }

    /// Build a client from `COMET_*` environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Config`] if the environment is incomplete or malformed.
    pub fn from_env(transport: T) -> Result<Self, ClientError> {
        Ok(Self::new(ClientConfig::from_env()?, transport))
    }

    // =========================================================================
    // CONNECTION
    // =========================================================================

    /// Ask the transport to connect. Clears the force-closed flag.
    pub fn open(&mut self) {
        self.force_closed = false;
        if self.state == ConnectionState::Closed {
            tracing::info!(station_id = %self.station_id, url = %self.server_url, "opening connection");
            self.transport.open(&self.server_url);
        }
    }

    /// Close the connection and mark it as locally initiated.
    pub fn close(&mut self) {
        self.force_closed = true;
        if self.state == ConnectionState::Open {
            tracing::info!(station_id = %self.station_id, "closing connection");
            self.transport.close();
        }
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        self.state == ConnectionState::Open
    }

    /// True when the last close was requested locally.
    #[must_use]
    pub fn is_force_closed(&self) -> bool {
        self.force_closed
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Identifier of this client instance.
    #[must_use]
    pub fn station_id(&self) -> Uuid {
        self.station_id
    }

    /// Concrete URL used by the next `open`.
    #[must_use]
    pub fn server_url(&self) -> &str {
        &self.server_url
    }

    /// Replace the URL template. Takes effect on the next `open`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingServerUrl`] if `template` is blank.
    pub fn set_server_url(&mut self, template: impl Into<String>) -> Result<(), ConfigError> {
        let template = template.into();
        if template.trim().is_empty() {
            return Err(ConfigError::MissingServerUrl);
        }
        self.config.server_url = template;
        self.server_url = self.config.resolve_server_url();
        tracing::debug!(station_id = %self.station_id, url = %self.server_url, "server url changed");
        Ok(())
    }

    #[must_use]
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    #[must_use]
    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    // =========================================================================
    // CHANNELS
    // =========================================================================

    /// Track `channel` and send a `subscribe` frame if it was not tracked yet.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::InvalidChannel`] for empty or whitespace-bearing names.
    pub fn subscribe(&mut self, channel: &str) -> Result<(), ClientError> {
        validate_channel(channel)?;
        if let Some(frame) = self.subscriptions.subscribe(channel) {
            self.send_frame(&frame);
        }
        Ok(())
    }

    /// Stop tracking `channel` and send an `unsubscribe` frame if it was tracked.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::InvalidChannel`] for empty or whitespace-bearing names.
    pub fn unsubscribe(&mut self, channel: &str) -> Result<(), ClientError> {
        validate_channel(channel)?;
        if let Some(frame) = self.subscriptions.unsubscribe(channel) {
            self.send_frame(&frame);
        }
        Ok(())
    }

    /// Tracked channels in subscription order.
    #[must_use]
    pub fn subscriptions(&self) -> &[String] {
        self.subscriptions.channels()
    }

    /// Publish `data` on `channel`. Dropped silently while closed.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::InvalidChannel`] for empty or whitespace-bearing names.
    pub fn send(&mut self, channel: &str, data: impl Into<Payload>) -> Result<(), ClientError> {
        validate_channel(channel)?;
        self.send_frame(&Frame::Channel { channel: channel.to_owned(), payload: data.into() });
        Ok(())
    }

    // =========================================================================
    // ACTIONS
    // =========================================================================

    /// Send an action on `route` and return the future for its response.
    ///
    /// A fresh `requestId` is merged into `params` before `BeforeRequest`
    /// observers run. If an observer removes it, the generated id is put back.
    /// The request is tracked even while closed; its frame is then dropped and
    /// the caller decides how long to wait.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::InvalidRoute`] for empty or whitespace-bearing routes.
    pub fn request(&mut self, route: &str, mut params: Map<String, Value>) -> Result<PendingResponse, ClientError> {
        if !frames::is_valid_name(route) {
            return Err(ClientError::InvalidRoute(route.to_owned()));
        }

        let generated = Requests::next_id();
        params.insert(REQUEST_ID_KEY.to_owned(), Value::String(generated.clone()));

        let mut event = Event::BeforeRequest(RequestEvent { route: route.to_owned(), params });
        self.events.trigger(&EventKey::BeforeRequest, &mut event);
        // An observer that swapped the event out leaves nothing but the id.
        let mut params = match event {
            Event::BeforeRequest(request) => request.params,
            _ => Map::new(),
        };

        let request_id = match params.get(REQUEST_ID_KEY).and_then(Value::as_str) {
            Some(id) => id.to_owned(),
            None => {
                params.insert(REQUEST_ID_KEY.to_owned(), Value::String(generated.clone()));
                generated
            }
        };

        tracing::debug!(station_id = %self.station_id, %route, %request_id, "sending request");
        let pending = self.requests.track(&request_id, route);
        self.send_frame(&Frame::Action { route: route.to_owned(), params });
        self.apply_queued_commands();
        Ok(pending)
    }

    /// Drop a pending request. Its future resolves to `RequestAbandoned`.
    pub fn cancel_request(&mut self, request_id: &str) -> bool {
        let cancelled = self.requests.cancel(request_id);
        if cancelled {
            tracing::debug!(station_id = %self.station_id, %request_id, "request cancelled");
        }
        cancelled
    }

    #[must_use]
    pub fn pending_requests(&self) -> usize {
        self.requests.len()
    }

    // =========================================================================
    // OBSERVERS
    // =========================================================================

    /// Register an observer for `key`.
    ///
    /// The first observer of `AllChannels` or of `Channel(name)` subscribes
    /// the matching channel on the wire.
    ///
    /// Observers run while the client is borrowed and must not lock the
    /// `SharedClient` that owns it. To open, close, subscribe or publish from
    /// an observer, capture a [`Client::handle`].
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::InvalidChannel`] for `Channel` keys with invalid names.
    pub fn on<F>(&mut self, key: EventKey, handler: F) -> Result<HandlerId, ClientError>
    where
        F: FnMut(&mut Event) + Send + 'static,
    {
        if let EventKey::Channel(name) = &key {
            validate_channel(name)?;
        }
        let had_handlers = self.events.has_handlers(&key);
        let frame = self.subscriptions.handler_added(&key, had_handlers);
        if let Some(frame) = frame {
            self.send_frame(&frame);
        }
        Ok(self.events.on(key, Box::new(handler)))
    }

    /// Remove one observer. Unsubscribes when it was the last one for a channel key.
    pub fn off(&mut self, key: &EventKey, id: HandlerId) -> bool {
        let removed = self.events.off(key, id);
        if removed {
            let remaining = self.events.has_handlers(key);
            if let Some(frame) = self.subscriptions.handler_removed(key, remaining) {
                self.send_frame(&frame);
            }
        }
        removed
    }

    /// Remove every observer for `key`, returning how many were removed.
    pub fn off_all(&mut self, key: &EventKey) -> usize {
        let removed = self.events.off_all(key);
        if removed > 0 {
            if let Some(frame) = self.subscriptions.handler_removed(key, false) {
                self.send_frame(&frame);
            }
        }
        removed
    }

    #[must_use]
    pub fn has_handlers(&self, key: &EventKey) -> bool {
        self.events.has_handlers(key)
    }

    #[must_use]
    pub fn has_channel_handlers(&self, channel: &str) -> bool {
        self.events.has_handlers(&EventKey::channel(channel))
    }

    /// Handle for observers that need to act on this client.
    #[must_use]
    pub fn handle(&self) -> ClientHandle {
        ClientHandle { commands: self.commands.clone() }
    }

    fn apply_queued_commands(&mut self) {
        while let Ok(command) = self.queued.try_recv() {
            tracing::debug!(station_id = %self.station_id, ?command, "applying queued command");
            match command {
                Command::Open => self.open(),
                Command::Close => self.close(),
                Command::Subscribe(channel) => {
                    if let Some(frame) = self.subscriptions.subscribe(&channel) {
                        self.send_frame(&frame);
                    }
                }
                Command::Unsubscribe(channel) => {
                    if let Some(frame) = self.subscriptions.unsubscribe(&channel) {
                        self.send_frame(&frame);
                    }
                }
                Command::Send { channel, payload } => self.send_frame(&Frame::Channel { channel, payload }),
            }
        }
    }

    // =========================================================================
    // TRANSPORT EVENTS
    // =========================================================================

    /// Apply one signal raised by the transport.
    pub fn handle_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Open => self.on_transport_open(),
            TransportEvent::Close => self.on_transport_close(),
            TransportEvent::Message(text) => self.on_transport_message(text),
        }
        self.apply_queued_commands();
    }

    fn on_transport_open(&mut self) {
        if self.state == ConnectionState::Open {
            return;
        }
        self.state = ConnectionState::Open;
        tracing::info!(station_id = %self.station_id, url = %self.server_url, "connection open");

        if self.config.auto_subscribe_on_reconnect {
            for channel in self.subscriptions.take_for_replay() {
                if let Some(frame) = self.subscriptions.subscribe(&channel) {
                    self.send_frame(&frame);
                }
            }
        }
        self.events.trigger(&EventKey::Open, &mut Event::Open);
    }

    fn on_transport_close(&mut self) {
        if self.state == ConnectionState::Closed {
            return;
        }
        self.state = ConnectionState::Closed;
        tracing::info!(station_id = %self.station_id, force_closed = self.force_closed, "connection closed");
        self.events.trigger(&EventKey::Close, &mut Event::Close);
    }

    fn on_transport_message(&mut self, text: String) {
        match frames::decode_frame(&text) {
            Ok(Inbound::Action { request_id, payload }) => {
                if let Some(request) = self.requests.resolve(&request_id, payload) {
                    self.events.trigger(&EventKey::Request, &mut Event::Request(request));
                }
            }
            Ok(Inbound::Channel { channel, payload }) => self.dispatch_channel(channel, payload),
            Ok(Inbound::Other) => {}
            Err(e) => {
                tracing::warn!(station_id = %self.station_id, error = %e, "dropping malformed frame");
            }
        }
        self.events.trigger(&EventKey::Message, &mut Event::Message(MessageEvent { message: text }));
    }

    fn dispatch_channel(&mut self, channel: String, payload: Payload) {
        let (params, message) = payload.into_parts();
        let key = EventKey::Channel(channel.clone());
        let mut event = Event::Channel(ChannelEvent { channel, params, message });
        self.events.trigger(&key, &mut event);
        self.events.trigger(&EventKey::AllChannels, &mut event);
    }

    // =========================================================================
    // OUTBOUND
    // =========================================================================

    fn send_frame(&mut self, frame: &Frame) {
        self.send_raw(frames::encode_frame(frame));
    }

    fn send_raw(&mut self, text: String) {
        let text = if self.events.has_handlers(&EventKey::BeforeSend) {
            let mut event = Event::BeforeSend(MessageEvent { message: text });
            self.events.trigger(&EventKey::BeforeSend, &mut event);
            match event {
                Event::BeforeSend(MessageEvent { message }) => Some(message),
                _ => {
                    tracing::warn!(station_id = %self.station_id, "before-send observer replaced the frame; dropped");
                    None
                }
            }
        } else {
            Some(text)
        };

        match text {
            Some(text) if self.state == ConnectionState::Open => self.transport.send(text),
            Some(text) => {
                tracing::debug!(station_id = %self.station_id, frame = %text, "connection closed; frame dropped");
            }
            None => {}
        }
        self.apply_queued_commands();
    }
}

// =============================================================================
// HANDLE
// =============================================================================

/// Work queued through a [`ClientHandle`].
#[derive(Debug)]
enum Command {
    Open,
    Close,
    Subscribe(String),
    Unsubscribe(String),
    Send { channel: String, payload: Payload },
}

/// Cloneable, `Send` handle that queues operations for a [`Client`].
///
/// Meant for observers, which cannot borrow the client that is running
/// them. Queued commands are applied in order once the client call that
/// fired the observer returns, or on the next transport event otherwise.
#[derive(Debug, Clone)]
pub struct ClientHandle {
    commands: mpsc::UnboundedSender<Command>,
}

impl ClientHandle {
    /// Queue [`Client::open`].
    pub fn open(&self) {
        self.push(Command::Open);
    }

    /// Queue [`Client::close`].
    pub fn close(&self) {
        self.push(Command::Close);
    }

    /// Queue [`Client::subscribe`].
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::InvalidChannel`] for empty or whitespace-bearing names.
    pub fn subscribe(&self, channel: &str) -> Result<(), ClientError> {
        validate_channel(channel)?;
        self.push(Command::Subscribe(channel.to_owned()));
        Ok(())
    }

    /// Queue [`Client::unsubscribe`].
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::InvalidChannel`] for empty or whitespace-bearing names.
    pub fn unsubscribe(&self, channel: &str) -> Result<(), ClientError> {
        validate_channel(channel)?;
        self.push(Command::Unsubscribe(channel.to_owned()));
        Ok(())
    }

    /// Queue [`Client::send`].
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::InvalidChannel`] for empty or whitespace-bearing names.
    pub fn send(&self, channel: &str, data: impl Into<Payload>) -> Result<(), ClientError> {
        validate_channel(channel)?;
        self.push(Command::Send { channel: channel.to_owned(), payload: data.into() });
        Ok(())
    }

    fn push(&self, command: Command) {
        if self.commands.send(command).is_err() {
            tracing::debug!("client dropped; queued command discarded");
        }
    }
}

impl<T: Transport> std::fmt::Debug for Client<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("station_id", &self.station_id)
            .field("state", &self.state)
            .field("force_closed", &self.force_closed)
            .field("server_url", &self.server_url)
            .field("subscriptions", &self.subscriptions)
            .field("requests", &self.requests)
            .finish_non_exhaustive()
    }
}

fn validate_channel(channel: &str) -> Result<(), ClientError> {
    if frames::is_valid_name(channel) {
        Ok(())
    } else {
        Err(ClientError::InvalidChannel(channel.to_owned()))
    }
}

#[cfg(test)]
#[path = "client_test.rs"]
mod tests;
