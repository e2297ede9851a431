//! JSON events exchanged between the browser UI and the gateway.
//!
//! Every WebSocket text frame carries exactly one JSON object with a `"type"`
//! discriminator.  Serde's internally-tagged representation maps it directly
//! onto the enums below:
//!
//! ```text
//! Browser → gateway                      Gateway → browser
//! {"type":"location","data":"37.3,-122"} {"type":"welcome","client_id":"…"}
//! {"type":"clear"}                       {"type":"ack","event":"location"}
//!                                        {"type":"error","kind":"malformed_location","message":"…"}
//! ```
//!
//! The coordinate payload stays a `"lat,lon"` string on the wire; parsing it
//! is the job of [`kinesis_core::parse_location`], not serde, so a bad value
//! produces a `malformed_location` error rather than a `malformed_event` one.

use serde::{Deserialize, Serialize};

/// An event sent by the browser.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEvent {
    /// Move the simulated position.  `data` is `"lat,lon"` in decimal degrees.
    Location { data: String },

    /// Stop simulating and return the device to its real position.
    Clear,
}

/// Which client event an [`ServerEvent::Ack`] confirms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AckedEvent {
    Location,
    Clear,
}

/// Category of a rejected client event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The frame was not a JSON object with a known `"type"`.
    MalformedEvent,
    /// The `"data"` of a location event was not two finite numbers.
    MalformedLocation,
    /// The client has no live session (closing or never admitted).
    UnknownSession,
    /// The device rejected the command or the tunnel is gone.
    DeviceCommand,
}

/// An event sent by the gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    /// First frame after the control session is open.
    Welcome { client_id: String },

    /// The client event was applied to the device.
    Ack { event: AckedEvent },

    /// The client event was rejected.  The connection stays open.
    Error { kind: ErrorKind, message: String },
}

impl ServerEvent {
    pub fn error(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self::Error {
            kind,
            message: message.into(),
        }
    }
}
