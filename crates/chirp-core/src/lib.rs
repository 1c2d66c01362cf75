//! Domain core for client-local chat state.
//!
//! This crate defines the message and reaction types, the room event
//! protocol, the timeline reconciler that keeps one room's view ordered
//! and deduplicated, and the shared error and channel primitives. It is
//! runtime-free: nothing here performs IO or spawns tasks.

/// Room event fan-out primitives.
pub mod channel;
/// Stable chat error types shared across the SDK boundary.
pub mod error;
/// Reaction kinds, tallies and aggregated summaries.
pub mod reaction;
/// Room timeline reconciliation.
pub mod timeline;
/// Message, page and room event types.
pub mod types;

pub use channel::{DEFAULT_EVENT_BUFFER, EventStream, RoomEvents};
pub use error::{ChatError, ChatErrorCategory};
pub use reaction::{ReactionKind, ReactionSummary, ReactionTally};
pub use timeline::{
    ApplyOutcome, BackfillOutcome, BackfillToken, DEFAULT_PENDING_LIMIT, MAX_BACKFILL_LIMIT,
    RoomTimeline, TimelineStatus,
};
pub use types::{MessagePage, MessageSerial, MessageSnapshot, RoomEvent};
