//! Chat client runtime: the backend trait, an in-memory reference
//! implementation, and the live room feed that keeps a timeline
//! reconciled against a subscription.

/// Backend client trait and operation parameter types.
pub mod client;
/// Live room feed worker.
pub mod feed;
/// In-memory backend used by tests and demos.
pub mod memory;

pub use client::{
    ChatClient, DeleteMessageParams, ReactionParams, SendMessageParams, UpdateMessageParams,
};
pub use feed::{
    DEFAULT_BACKFILL_LIMIT, RoomFeed, RoomFeedOptions, SnapshotCallback, TimelineSnapshot,
};
pub use memory::InMemoryChatClient;
