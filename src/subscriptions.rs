//! Subscription manager — tracks which channels the server should send us.
//!
//! DESIGN
//! ======
//! Sans-IO: each operation returns the frame the client must transmit (if
//! any) instead of sending it. The tracked set is ordered so replay after a
//! reconnect re-subscribes in the original order.
//!
//! Handler-driven interest:
//! - `AllChannels` subscribes the sentinel when its first handler arrives and
//!   unsubscribes when its last handler leaves.
//! - `Channel(name)` follows the same presence rule per channel name, so a
//!   second listener keeps the channel alive when the first one is removed.

use frames::{ALL_CHANNELS, Frame};

use crate::events::EventKey;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Subscriptions {
    channels: Vec<String>,
}

impl Subscriptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Track `channel`. Returns the frame to send, or `None` if already tracked.
    pub fn subscribe(&mut self, channel: &str) -> Option<Frame> {
        if self.contains(channel) {
            return None;
        }
        self.channels.push(channel.to_owned());
        Some(Frame::Subscribe(channel.to_owned()))
    }

    /// Stop tracking `channel`. Returns the frame to send, or `None` if absent.
    pub fn unsubscribe(&mut self, channel: &str) -> Option<Frame> {
        let index = self.channels.iter().position(|c| c == channel)?;
        let channel = self.channels.remove(index);
        Some(Frame::Unsubscribe(channel))
    }

    /// React to a handler being registered under `key`.
    ///
    /// `had_handlers` is whether `key` already had handlers before this one.
    pub fn handler_added(&mut self, key: &EventKey, had_handlers: bool) -> Option<Frame> {
        match key {
            EventKey::AllChannels if !had_handlers => self.subscribe(ALL_CHANNELS),
            EventKey::Channel(name) => self.subscribe(name),
            _ => None,
        }
    }

    /// React to handler removal under `key`.
    ///
    /// `handlers_remaining` is whether `key` still has handlers afterwards.
    pub fn handler_removed(&mut self, key: &EventKey, handlers_remaining: bool) -> Option<Frame> {
        if handlers_remaining {
            return None;
        }
        match key {
            EventKey::AllChannels => self.unsubscribe(ALL_CHANNELS),
            EventKey::Channel(name) => self.unsubscribe(name),
            _ => None,
        }
    }

    /// Clear the set and hand back what was tracked, in subscription order.
    ///
    /// The caller re-subscribes each channel once the server has lost state.
    pub fn take_for_replay(&mut self) -> Vec<String> {
        std::mem::take(&mut self.channels)
    }

    #[must_use]
    pub fn contains(&self, channel: &str) -> bool {
        self.channels.iter().any(|c| c == channel)
    }

    #[must_use]
    pub fn channels(&self) -> &[String] {
        &self.channels
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.channels.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}

#[cfg(test)]
#[path = "subscriptions_test.rs"]
mod tests;
