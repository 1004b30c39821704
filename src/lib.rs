//! Comet — real-time messaging client.
//!
//! ARCHITECTURE
//! ============
//! A [`Client`] keeps one logical connection to a Comet server through a
//! pluggable [`Transport`]. On top of it sit two interaction styles:
//! - pub/sub channels (`subscribe`, `send`, channel observers);
//! - request/response actions (`request`, settled by a correlated response).
//!
//! Wire frames are encoded and decoded by the `frames` crate. The client is
//! sans-IO: transports report events, and [`reconnect::run`] pumps them into
//! a shared client while applying the reconnection policy.
//!
//! Observers run inside the client, so they cannot lock a [`SharedClient`].
//! They act on it through a [`ClientHandle`], whose commands run right after
//! the observer returns. Reconnection belongs to [`reconnect::run`], not to
//! an observer.
//!
//! ```no_run
//! use comet::{ClientConfig, EventKey, ReconnectPolicy};
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ClientConfig::new("wss://comet.example.com/ws")?;
//! let (client, _pump) = comet::spawn_ws_client(config, ReconnectPolicy::default());
//!
//! let pending = {
//!     let mut client = comet::lock(&client);
//!     client.on(EventKey::channel("room1"), |event| println!("{event:?}"))?;
//!     client.request("user.get", serde_json::Map::new())?
//! };
//! let response = pending.await?;
//! # drop(response);
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod events;
pub mod reconnect;
pub mod requests;
pub mod subscriptions;
pub mod transport;

pub use client::{Client, ClientHandle, ConnectionState};
pub use config::ClientConfig;
pub use error::{ClientError, ConfigError};
pub use events::{ChannelEvent, Event, EventKey, HandlerId, MessageEvent, RequestEvent};
pub use frames::{ALL_CHANNELS, Payload, REQUEST_ID_KEY};
pub use reconnect::{Backoff, ReconnectPolicy, SharedClient, lock, spawn_ws_client};
pub use requests::PendingResponse;
pub use transport::{Transport, TransportEvent, WsTransport};
