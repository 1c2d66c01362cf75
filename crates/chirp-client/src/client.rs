use std::future::Future;

use serde::{Deserialize, Serialize};

use chirp_core::{ChatError, EventStream, MessagePage, MessageSerial, MessageSnapshot, ReactionKind};

/// Parameters for sending a new message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SendMessageParams {
    /// Client ID of the author.
    pub client_id: String,
    /// Message body.
    pub text: String,
}

/// Parameters for editing an existing message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UpdateMessageParams {
    /// Client ID of the editor.
    pub client_id: String,
    /// Replacement body.
    pub text: String,
}

/// Parameters for soft-deleting an existing message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeleteMessageParams {
    /// Client ID of the deleting client.
    pub client_id: String,
}

/// Parameters for adding or removing one reaction.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReactionParams {
    /// Client ID of the reacting client.
    pub client_id: String,
    /// Aggregation mode this reaction counts under.
    pub kind: ReactionKind,
    /// Emoji (or other short token) being reacted with.
    pub emoji: String,
    /// Reaction weight; only `Multiple` honors values above one.
    pub count: u64,
}

impl ReactionParams {
    pub fn new(client_id: impl Into<String>, kind: ReactionKind, emoji: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            kind,
            emoji: emoji.into(),
            count: 1,
        }
    }

    pub fn with_count(mut self, count: u64) -> Self {
        self.count = count;
        self
    }
}

/// Client surface of the messaging backend.
///
/// The feed layer drives rooms purely through this trait, so tests and
/// demos can swap the hosted service for [`crate::InMemoryChatClient`].
/// Mutation calls resolve once the backend acknowledged the operation;
/// the returned snapshots are authoritative post-operation state.
pub trait ChatClient: Send + Sync {
    /// Open a live event subscription for a room, starting at the current
    /// stream position.
    fn subscribe(&self, room_id: &str) -> EventStream;

    /// Fetch up to `limit` of the latest messages, newest first.
    fn fetch_previous_messages(
        &self,
        room_id: &str,
        limit: u16,
    ) -> impl Future<Output = Result<MessagePage, ChatError>> + Send;

    /// Send a new message and return its authoritative snapshot.
    fn send_message(
        &self,
        room_id: &str,
        params: SendMessageParams,
    ) -> impl Future<Output = Result<MessageSnapshot, ChatError>> + Send;

    /// Edit an existing message.
    fn update_message(
        &self,
        room_id: &str,
        serial: &MessageSerial,
        params: UpdateMessageParams,
    ) -> impl Future<Output = Result<MessageSnapshot, ChatError>> + Send;

    /// Soft-delete an existing message.
    fn delete_message(
        &self,
        room_id: &str,
        serial: &MessageSerial,
        params: DeleteMessageParams,
    ) -> impl Future<Output = Result<MessageSnapshot, ChatError>> + Send;

    /// Add one reaction to a message.
    fn add_reaction(
        &self,
        room_id: &str,
        serial: &MessageSerial,
        params: ReactionParams,
    ) -> impl Future<Output = Result<(), ChatError>> + Send;

    /// Remove this client's reaction from a message.
    fn delete_reaction(
        &self,
        room_id: &str,
        serial: &MessageSerial,
        params: ReactionParams,
    ) -> impl Future<Output = Result<(), ChatError>> + Send;
}
