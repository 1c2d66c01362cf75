use std::fmt;

use serde::{Deserialize, Serialize};

use crate::reaction::ReactionSummary;

/// Backend-assigned message identifier.
///
/// Serials are opaque strings with one guarantee: within a room their
/// lexicographic order is the canonical timeline order. Two snapshots
/// describe the same message exactly when their serials are equal,
/// whatever their versions say.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageSerial(String);

impl MessageSerial {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageSerial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MessageSerial {
    fn from(raw: &str) -> Self {
        Self(raw.to_owned())
    }
}

impl From<String> for MessageSerial {
    fn from(raw: String) -> Self {
        Self(raw)
    }
}

/// Canonical state of one message as known to the client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MessageSnapshot {
    /// Backend-assigned serial, unique within the room.
    pub serial: MessageSerial,
    /// Monotonic revision counter; edits and deletions bump it.
    pub version: u64,
    /// Client ID of the author.
    pub client_id: String,
    /// Message body. Kept verbatim after deletion so history stays legible.
    pub text: String,
    /// Creation time in milliseconds since the Unix epoch.
    pub created_at_ms: u64,
    /// Time of the most recent edit, absent until the first edit.
    pub updated_at_ms: Option<u64>,
    /// Client ID of the most recent editor.
    pub updated_by: Option<String>,
    /// Soft-deletion flag; deleted messages keep their timeline position.
    pub deleted: bool,
    /// Deletion time, set together with `deleted`.
    pub deleted_at_ms: Option<u64>,
    /// Client ID of the deleting client.
    pub deleted_by: Option<String>,
    /// Aggregated reactions, replaced wholesale by summary events.
    pub reactions: ReactionSummary,
}

/// One page of room history as returned by the backend.
///
/// Pages are newest-first, mirroring how chat backends paginate backwards
/// from the present.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct MessagePage {
    /// Page entries in backend order, newest first.
    pub items: Vec<MessageSnapshot>,
}

/// Live event delivered on a room subscription.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum RoomEvent {
    /// A new message reached the room.
    MessageCreated {
        /// Full snapshot of the created message.
        message: MessageSnapshot,
    },
    /// An existing message was edited.
    MessageUpdated {
        /// Serial of the edited message.
        serial: MessageSerial,
        /// Revision after the edit.
        version: u64,
        /// Replacement body.
        text: String,
        /// Edit time in milliseconds since the Unix epoch.
        updated_at_ms: u64,
        /// Client ID of the editor, when the backend reports one.
        updated_by: Option<String>,
    },
    /// An existing message was soft-deleted.
    MessageDeleted {
        /// Serial of the deleted message.
        serial: MessageSerial,
        /// Revision after the deletion.
        version: u64,
        /// Deletion time in milliseconds since the Unix epoch.
        deleted_at_ms: u64,
        /// Client ID of the deleting client, when the backend reports one.
        deleted_by: Option<String>,
    },
    /// Complete replacement of one message's aggregated reactions.
    ReactionSummary {
        /// Serial of the affected message.
        serial: MessageSerial,
        /// The new authoritative summary.
        summary: ReactionSummary,
    },
    /// The subscription lost continuity; incremental state can no longer
    /// be trusted and the room must be resynchronized from scratch.
    Discontinuity {
        /// Backend-provided reason, when available.
        reason: Option<String>,
    },
}
