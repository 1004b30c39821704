//! Text frame model and codec for the comet wire protocol.
//!
//! This crate owns the wire representation shared by the client and any
//! server counterpart. Every frame is one line of space-separated text:
//!
//! ```text
//! subscribe <channel>
//! unsubscribe <channel>
//! channel <channel> <payload>
//! action <route> <json-object>
//! ```
//!
//! Payloads stay flexible (`serde_json::Value` or opaque text). The parser
//! only splits on the first delimiters it needs, so JSON bodies containing
//! spaces pass through untouched.

use std::fmt;

use serde_json::{Map, Value};

// =============================================================================
// CONSTANTS
// =============================================================================

/// Key under which every action request and response carries its identifier.
pub const REQUEST_ID_KEY: &str = "requestId";

/// Sentinel channel name meaning "every channel".
pub const ALL_CHANNELS: &str = "__allVfcOS7";

const SUBSCRIBE: &str = "subscribe";
const UNSUBSCRIBE: &str = "unsubscribe";
const CHANNEL: &str = "channel";
const ACTION: &str = "action";

// =============================================================================
// ERRORS
// =============================================================================

/// Error returned by [`decode_frame`].
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// The JSON body after `action ` or `channel <name> ` is malformed.
    #[error("failed to decode frame body: {0}")]
    Json(#[from] serde_json::Error),
    /// A `channel` frame arrived without a channel name.
    #[error("channel frame is missing a channel name")]
    MissingChannel,
}

// =============================================================================
// PAYLOAD
// =============================================================================

/// Body of a channel publication.
#[derive(Clone, Debug, PartialEq)]
pub enum Payload {
    /// Structured JSON body.
    Json(Value),
    /// Opaque text body, sent verbatim.
    Text(String),
}

impl Payload {
    /// Interpret raw payload text the way the wire does: text starting with
    /// `{` or `[` is JSON, everything else is opaque.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Json`] when the text looks like JSON but does
    /// not parse.
    pub fn parse(text: &str) -> Result<Self, CodecError> {
        if looks_like_json(text) {
            Ok(Self::Json(serde_json::from_str(text)?))
        } else {
            Ok(Self::Text(text.to_owned()))
        }
    }

    /// Split into `(params, message)` with exactly one side populated.
    #[must_use]
    pub fn into_parts(self) -> (Option<Value>, Option<String>) {
        match self {
            Self::Json(value) => (Some(value), None),
            Self::Text(text) => (None, Some(text)),
        }
    }
}

impl fmt::Display for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Json(value) => write!(f, "{value}"),
            Self::Text(text) => f.write_str(text),
        }
    }
}

impl From<Value> for Payload {
    fn from(value: Value) -> Self {
        Self::Json(value)
    }
}

impl From<Map<String, Value>> for Payload {
    fn from(map: Map<String, Value>) -> Self {
        Self::Json(Value::Object(map))
    }
}

impl From<String> for Payload {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<&str> for Payload {
    fn from(text: &str) -> Self {
        Self::Text(text.to_owned())
    }
}

fn looks_like_json(text: &str) -> bool {
    text.starts_with('{') || text.starts_with('[')
}

// =============================================================================
// FRAMES
// =============================================================================

/// An outbound command sent from client to server.
#[derive(Clone, Debug, PartialEq)]
pub enum Frame {
    /// Start receiving publications on a channel.
    Subscribe(String),
    /// Stop receiving publications on a channel.
    Unsubscribe(String),
    /// Publish a payload to a channel.
    Channel {
        /// Target channel.
        channel: String,
        /// Publication body.
        payload: Payload,
    },
    /// Invoke a server route. `params` carries [`REQUEST_ID_KEY`].
    Action {
        /// Route identifier, e.g. `"user.get"`.
        route: String,
        /// Request parameters.
        params: Map<String, Value>,
    },
}

/// A decoded server-to-client message.
#[derive(Clone, Debug, PartialEq)]
pub enum Inbound {
    /// Publication received on a channel.
    Channel {
        /// Channel the publication arrived on.
        channel: String,
        /// Publication body.
        payload: Payload,
    },
    /// Response to an action request.
    Action {
        /// Identifier echoed from the request.
        request_id: String,
        /// Full response object, identifier included.
        payload: Map<String, Value>,
    },
    /// Anything the client does not route (still surfaced as raw traffic).
    Other,
}

/// Encode an outbound frame as one line of wire text.
#[must_use]
pub fn encode_frame(frame: &Frame) -> String {
    match frame {
        Frame::Subscribe(channel) => format!("{SUBSCRIBE} {channel}"),
        Frame::Unsubscribe(channel) => format!("{UNSUBSCRIBE} {channel}"),
        Frame::Channel { channel, payload } => format!("{CHANNEL} {channel} {payload}"),
        Frame::Action { route, params } => {
            // Map's Display writes compact JSON and cannot fail.
            let body = Value::Object(params.clone());
            format!("{ACTION} {route} {body}")
        }
    }
}

/// Decode one inbound wire message.
///
/// # Errors
///
/// Returns [`CodecError::Json`] for malformed JSON bodies and
/// [`CodecError::MissingChannel`] for `channel` frames without a name.
pub fn decode_frame(text: &str) -> Result<Inbound, CodecError> {
    if let Some(body) = strip_command(text, ACTION) {
        return decode_action(body);
    }
    if let Some(body) = strip_command(text, CHANNEL) {
        return decode_channel(body);
    }
    Ok(Inbound::Other)
}

/// True when `name` can be placed in a frame without breaking the grammar.
#[must_use]
pub fn is_valid_name(name: &str) -> bool {
    !name.is_empty() && !name.contains(char::is_whitespace)
}

fn strip_command<'a>(text: &'a str, command: &str) -> Option<&'a str> {
    text.strip_prefix(command)?.strip_prefix(' ')
}

fn decode_action(body: &str) -> Result<Inbound, CodecError> {
    let Value::Object(payload) = serde_json::from_str::<Value>(body)? else {
        return Ok(Inbound::Other);
    };
    let Some(request_id) = payload.get(REQUEST_ID_KEY).and_then(Value::as_str) else {
        return Ok(Inbound::Other);
    };
    let request_id = request_id.to_owned();
    Ok(Inbound::Action { request_id, payload })
}

fn decode_channel(body: &str) -> Result<Inbound, CodecError> {
    let (channel, rest) = body.split_once(' ').unwrap_or((body, ""));
    if channel.is_empty() {
        return Err(CodecError::MissingChannel);
    }
    Ok(Inbound::Channel { channel: channel.to_owned(), payload: Payload::parse(rest)? })
}

#[cfg(test)]
#[path = "lib_test.rs"]
mod tests;
