use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock, RwLockWriteGuard};
use std::time::{SystemTime, UNIX_EPOCH};

use chirp_core::{
    ChatError, EventStream, MessagePage, MessageSerial, MessageSnapshot, ReactionKind,
    ReactionSummary, ReactionTally, RoomEvent, RoomEvents,
};

use crate::client::{
    ChatClient, DeleteMessageParams, ReactionParams, SendMessageParams, UpdateMessageParams,
};

/// In-memory stand-in for the hosted messaging backend.
///
/// Keeps per-room message logs, assigns serials in creation order and
/// aggregates reactions the way the real service would, emitting complete
/// replacement summaries after every reaction change. Events travel over a
/// process-local broadcast channel, so a subscriber that never drains its
/// stream experiences the same lag signal a gapped network subscription
/// would.
#[derive(Clone, Default)]
pub struct InMemoryChatClient {
    rooms: Arc<RwLock<HashMap<String, RoomState>>>,
}

#[derive(Default)]
struct RoomState {
    events: RoomEvents,
    messages: Vec<MessageSnapshot>,
    next_serial: u64,
    reactions: HashMap<String, ReactionLedger>,
}

/// Per-message reaction bookkeeping: for each mode, emoji to client to
/// count. The public summary is derived from this, never stored.
#[derive(Default)]
struct ReactionLedger {
    unique: BTreeMap<String, BTreeMap<String, u64>>,
    distinct: BTreeMap<String, BTreeMap<String, u64>>,
    multiple: BTreeMap<String, BTreeMap<String, u64>>,
}

impl ReactionLedger {
    fn add(&mut self, kind: ReactionKind, emoji: &str, client_id: &str, count: u64) {
        match kind {
            ReactionKind::Unique => {
                // One reaction per client: moving to a new emoji drops the
                // previous one.
                for clients in self.unique.values_mut() {
                    clients.remove(client_id);
                }
                self.unique
                    .entry(emoji.to_owned())
                    .or_default()
                    .insert(client_id.to_owned(), 1);
                self.unique.retain(|_, clients| !clients.is_empty());
            }
            ReactionKind::Distinct => {
                self.distinct
                    .entry(emoji.to_owned())
                    .or_default()
                    .insert(client_id.to_owned(), 1);
            }
            ReactionKind::Multiple => {
                *self
                    .multiple
                    .entry(emoji.to_owned())
                    .or_default()
                    .entry(client_id.to_owned())
                    .or_insert(0) += count.max(1);
            }
        }
    }

    fn remove(&mut self, kind: ReactionKind, emoji: &str, client_id: &str) {
        let entries = match kind {
            ReactionKind::Unique => &mut self.unique,
            ReactionKind::Distinct => &mut self.distinct,
            ReactionKind::Multiple => &mut self.multiple,
        };
        if let Some(clients) = entries.get_mut(emoji) {
            clients.remove(client_id);
            if clients.is_empty() {
                entries.remove(emoji);
            }
        }
    }

    fn summary(&self) -> ReactionSummary {
        ReactionSummary {
            unique: summarize(&self.unique),
            distinct: summarize(&self.distinct),
            multiple: summarize(&self.multiple),
        }
    }
}

fn summarize(entries: &BTreeMap<String, BTreeMap<String, u64>>) -> BTreeMap<String, ReactionTally> {
    entries
        .iter()
        .map(|(emoji, clients)| {
            (
                emoji.clone(),
                ReactionTally {
                    total: clients.values().sum(),
                    client_ids: clients.keys().cloned().collect(),
                },
            )
        })
        .collect()
}

impl InMemoryChatClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Signal a lost-continuity gap to every subscriber of `room_id`, as a
    /// flaky transport would.
    pub fn emit_discontinuity(&self, room_id: &str, reason: Option<String>) {
        let mut rooms = self.lock_rooms();
        let room = rooms.entry(room_id.to_owned()).or_default();
        room.events.emit(RoomEvent::Discontinuity { reason });
    }

    fn lock_rooms(&self) -> RwLockWriteGuard<'_, HashMap<String, RoomState>> {
        // A poisoned lock only means some caller panicked mid-operation;
        // the map itself is still coherent enough for a test double.
        match self.rooms.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_millis() as u64)
        .unwrap_or(0)
}

impl ChatClient for InMemoryChatClient {
    fn subscribe(&self, room_id: &str) -> EventStream {
        let mut rooms = self.lock_rooms();
        rooms
            .entry(room_id.to_owned())
            .or_default()
            .events
            .subscribe()
    }

    async fn fetch_previous_messages(
        &self,
        room_id: &str,
        limit: u16,
    ) -> Result<MessagePage, ChatError> {
        let mut rooms = self.lock_rooms();
        let room = rooms.entry(room_id.to_owned()).or_default();
        let limit = usize::from(limit.max(1));
        let start = room.messages.len().saturating_sub(limit);
        let mut items = room.messages[start..].to_vec();
        items.reverse();
        Ok(MessagePage { items })
    }

    async fn send_message(
        &self,
        room_id: &str,
        params: SendMessageParams,
    ) -> Result<MessageSnapshot, ChatError> {
        let mut rooms = self.lock_rooms();
        let room = rooms.entry(room_id.to_owned()).or_default();
        room.next_serial += 1;
        let message = MessageSnapshot {
            serial: MessageSerial::new(format!("{:020}", room.next_serial)),
            version: 1,
            client_id: params.client_id,
            text: params.text,
            created_at_ms: now_ms(),
            updated_at_ms: None,
            updated_by: None,
            deleted: false,
            deleted_at_ms: None,
            deleted_by: None,
            reactions: ReactionSummary::default(),
        };
        room.messages.push(message.clone());
        room.events.emit(RoomEvent::MessageCreated {
            message: message.clone(),
        });
        Ok(message)
    }

    async fn update_message(
        &self,
        room_id: &str,
        serial: &MessageSerial,
        params: UpdateMessageParams,
    ) -> Result<MessageSnapshot, ChatError> {
        let mut rooms = self.lock_rooms();
        let room = rooms
            .get_mut(room_id)
            .ok_or_else(|| ChatError::room_not_found(room_id))?;
        let message = room
            .messages
            .iter_mut()
            .find(|message| &message.serial == serial)
            .ok_or_else(|| ChatError::message_not_found(serial))?;

        let now = now_ms();
        message.version += 1;
        message.text = params.text;
        message.updated_at_ms = Some(now);
        message.updated_by = Some(params.client_id);
        let snapshot = message.clone();

        room.events.emit(RoomEvent::MessageUpdated {
            serial: snapshot.serial.clone(),
            version: snapshot.version,
            text: snapshot.text.clone(),
            updated_at_ms: now,
            updated_by: snapshot.updated_by.clone(),
        });
        Ok(snapshot)
    }

    async fn delete_message(
        &self,
        room_id: &str,
        serial: &MessageSerial,
        params: DeleteMessageParams,
    ) -> Result<MessageSnapshot, ChatError> {
        let mut rooms = self.lock_rooms();
        let room = rooms
            .get_mut(room_id)
            .ok_or_else(|| ChatError::room_not_found(room_id))?;
        let message = room
            .messages
            .iter_mut()
            .find(|message| &message.serial == serial)
            .ok_or_else(|| ChatError::message_not_found(serial))?;

        let now = now_ms();
        message.version += 1;
        message.deleted = true;
        message.deleted_at_ms = Some(now);
        message.deleted_by = Some(params.client_id);
        let snapshot = message.clone();

        room.events.emit(RoomEvent::MessageDeleted {
            serial: snapshot.serial.clone(),
            version: snapshot.version,
            deleted_at_ms: now,
            deleted_by: snapshot.deleted_by.clone(),
        });
        Ok(snapshot)
    }

    async fn add_reaction(
        &self,
        room_id: &str,
        serial: &MessageSerial,
        params: ReactionParams,
    ) -> Result<(), ChatError> {
        let mut rooms = self.lock_rooms();
        let room = rooms
            .get_mut(room_id)
            .ok_or_else(|| ChatError::room_not_found(room_id))?;
        if !room.messages.iter().any(|message| &message.serial == serial) {
            return Err(ChatError::message_not_found(serial));
        }

        let ledger = room.reactions.entry(serial.as_str().to_owned()).or_default();
        ledger.add(params.kind, &params.emoji, &params.client_id, params.count);
        let summary = ledger.summary();

        if let Some(message) = room
            .messages
            .iter_mut()
            .find(|message| &message.serial == serial)
        {
            message.reactions = summary.clone();
        }
        room.events.emit(RoomEvent::ReactionSummary {
            serial: serial.clone(),
            summary,
        });
        Ok(())
    }

    async fn delete_reaction(
        &self,
        room_id: &str,
        serial: &MessageSerial,
        params: ReactionParams,
    ) -> Result<(), ChatError> {
        let mut rooms = self.lock_rooms();
        let room = rooms
            .get_mut(room_id)
            .ok_or_else(|| ChatError::room_not_found(room_id))?;
        if !room.messages.iter().any(|message| &message.serial == serial) {
            return Err(ChatError::message_not_found(serial));
        }

        let ledger = room.reactions.entry(serial.as_str().to_owned()).or_default();
        ledger.remove(params.kind, &params.emoji, &params.client_id);
        let summary = ledger.summary();

        if let Some(message) = room
            .messages
            .iter_mut()
            .find(|message| &message.serial == serial)
        {
            message.reactions = summary.clone();
        }
        room.events.emit(RoomEvent::ReactionSummary {
            serial: serial.clone(),
            summary,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn send_params(client_id: &str, text: &str) -> SendMessageParams {
        SendMessageParams {
            client_id: client_id.to_owned(),
            text: text.to_owned(),
        }
    }

    #[tokio::test]
    async fn assigns_serials_in_creation_order() {
        let client = InMemoryChatClient::new();

        let first = client
            .send_message("room:general", send_params("client:a", "one"))
            .await
            .expect("send should succeed");
        let second = client
            .send_message("room:general", send_params("client:a", "two"))
            .await
            .expect("send should succeed");

        assert!(first.serial < second.serial);
        assert_eq!(first.version, 1);
    }

    #[tokio::test]
    async fn pages_history_newest_first_with_limit() {
        let client = InMemoryChatClient::new();
        for text in ["one", "two", "three"] {
            client
                .send_message("room:general", send_params("client:a", text))
                .await
                .expect("send should succeed");
        }

        let page = client
            .fetch_previous_messages("room:general", 2)
            .await
            .expect("fetch should succeed");

        let texts: Vec<&str> = page.items.iter().map(|item| item.text.as_str()).collect();
        assert_eq!(texts, vec!["three", "two"]);
    }

    #[tokio::test]
    async fn fetch_on_untouched_room_returns_empty_page() {
        let client = InMemoryChatClient::new();

        let page = client
            .fetch_previous_messages("room:empty", 50)
            .await
            .expect("fetch should succeed");

        assert!(page.items.is_empty());
    }

    #[tokio::test]
    async fn update_bumps_version_and_broadcasts() {
        let client = InMemoryChatClient::new();
        let mut events = client.subscribe("room:general");
        let sent = client
            .send_message("room:general", send_params("client:a", "draft"))
            .await
            .expect("send should succeed");

        let updated = client
            .update_message(
                "room:general",
                &sent.serial,
                UpdateMessageParams {
                    client_id: "client:a".to_owned(),
                    text: "final".to_owned(),
                },
            )
            .await
            .expect("update should succeed");

        assert_eq!(updated.version, 2);
        assert_eq!(updated.text, "final");

        let created = events.recv().await.expect("created event");
        assert!(matches!(created, RoomEvent::MessageCreated { .. }));
        let edited = events.recv().await.expect("updated event");
        match edited {
            RoomEvent::MessageUpdated { serial, version, text, .. } => {
                assert_eq!(serial, sent.serial);
                assert_eq!(version, 2);
                assert_eq!(text, "final");
            }
            other => panic!("expected MessageUpdated, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn delete_marks_tombstone_but_keeps_the_entry() {
        let client = InMemoryChatClient::new();
        let sent = client
            .send_message("room:general", send_params("client:a", "to be removed"))
            .await
            .expect("send should succeed");

        let deleted = client
            .delete_message(
                "room:general",
                &sent.serial,
                DeleteMessageParams {
                    client_id: "client:mod".to_owned(),
                },
            )
            .await
            .expect("delete should succeed");

        assert!(deleted.deleted);
        assert_eq!(deleted.deleted_by.as_deref(), Some("client:mod"));
        assert_eq!(deleted.text, "to be removed");

        let page = client
            .fetch_previous_messages("room:general", 10)
            .await
            .expect("fetch should succeed");
        assert_eq!(page.items.len(), 1);
        assert!(page.items[0].deleted);
    }

    #[tokio::test]
    async fn unique_reaction_moves_between_emojis() {
        let client = InMemoryChatClient::new();
        let sent = client
            .send_message("room:general", send_params("client:a", "pick one"))
            .await
            .expect("send should succeed");

        client
            .add_reaction(
                "room:general",
                &sent.serial,
                ReactionParams::new("client:b", ReactionKind::Unique, "👍"),
            )
            .await
            .expect("reaction should succeed");
        client
            .add_reaction(
                "room:general",
                &sent.serial,
                ReactionParams::new("client:b", ReactionKind::Unique, "❤️"),
            )
            .await
            .expect("reaction should succeed");

        let page = client
            .fetch_previous_messages("room:general", 1)
            .await
            .expect("fetch should succeed");
        let summary = &page.items[0].reactions;
        assert!(!summary.unique.contains_key("👍"));
        let tally = summary.unique.get("❤️").expect("tally should exist");
        assert_eq!(tally.total, 1);
        assert!(tally.client_ids.contains("client:b"));
    }

    #[tokio::test]
    async fn distinct_reaction_is_capped_at_one_per_client_per_emoji() {
        let client = InMemoryChatClient::new();
        let sent = client
            .send_message("room:general", send_params("client:a", "vote"))
            .await
            .expect("send should succeed");

        for _ in 0..3 {
            client
                .add_reaction(
                    "room:general",
                    &sent.serial,
                    ReactionParams::new("client:b", ReactionKind::Distinct, "👍"),
                )
                .await
                .expect("reaction should succeed");
        }
        client
            .add_reaction(
                "room:general",
                &sent.serial,
                ReactionParams::new("client:c", ReactionKind::Distinct, "👍"),
            )
            .await
            .expect("reaction should succeed");

        let page = client
            .fetch_previous_messages("room:general", 1)
            .await
            .expect("fetch should succeed");
        let tally = page.items[0]
            .reactions
            .distinct
            .get("👍")
            .expect("tally should exist");
        assert_eq!(tally.total, 2);
        assert_eq!(tally.client_ids.len(), 2);
    }

    #[tokio::test]
    async fn multiple_reactions_accumulate_counts() {
        let client = InMemoryChatClient::new();
        let sent = client
            .send_message("room:general", send_params("client:a", "hype"))
            .await
            .expect("send should succeed");

        client
            .add_reaction(
                "room:general",
                &sent.serial,
                ReactionParams::new("client:b", ReactionKind::Multiple, "🎉").with_count(3),
            )
            .await
            .expect("reaction should succeed");
        client
            .add_reaction(
                "room:general",
                &sent.serial,
                ReactionParams::new("client:b", ReactionKind::Multiple, "🎉").with_count(2),
            )
            .await
            .expect("reaction should succeed");

        let page = client
            .fetch_previous_messages("room:general", 1)
            .await
            .expect("fetch should succeed");
        let tally = page.items[0]
            .reactions
            .multiple
            .get("🎉")
            .expect("tally should exist");
        assert_eq!(tally.total, 5);
        assert_eq!(tally.client_ids.len(), 1);
    }

    #[tokio::test]
    async fn delete_reaction_removes_only_that_clients_contribution() {
        let client = InMemoryChatClient::new();
        let sent = client
            .send_message("room:general", send_params("client:a", "shared"))
            .await
            .expect("send should succeed");

        for reactor in ["client:b", "client:c"] {
            client
                .add_reaction(
                    "room:general",
                    &sent.serial,
                    ReactionParams::new(reactor, ReactionKind::Distinct, "👍"),
                )
                .await
                .expect("reaction should succeed");
        }
        client
            .delete_reaction(
                "room:general",
                &sent.serial,
                ReactionParams::new("client:b", ReactionKind::Distinct, "👍"),
            )
            .await
            .expect("removal should succeed");

        let page = client
            .fetch_previous_messages("room:general", 1)
            .await
            .expect("fetch should succeed");
        let tally = page.items[0]
            .reactions
            .distinct
            .get("👍")
            .expect("tally should exist");
        assert_eq!(tally.total, 1);
        assert!(tally.client_ids.contains("client:c"));
    }

    #[tokio::test]
    async fn removing_the_last_reaction_drops_the_emoji_entry() {
        let client = InMemoryChatClient::new();
        let sent = client
            .send_message("room:general", send_params("client:a", "fleeting"))
            .await
            .expect("send should succeed");

        client
            .add_reaction(
                "room:general",
                &sent.serial,
                ReactionParams::new("client:b", ReactionKind::Distinct, "👍"),
            )
            .await
            .expect("reaction should succeed");
        client
            .delete_reaction(
                "room:general",
                &sent.serial,
                ReactionParams::new("client:b", ReactionKind::Distinct, "👍"),
            )
            .await
            .expect("removal should succeed");

        let page = client
            .fetch_previous_messages("room:general", 1)
            .await
            .expect("fetch should succeed");
        assert!(page.items[0].reactions.is_empty());
    }

    #[tokio::test]
    async fn operations_on_missing_targets_fail_with_stable_codes() {
        let client = InMemoryChatClient::new();
        let sent = client
            .send_message("room:general", send_params("client:a", "anchor"))
            .await
            .expect("send should succeed");

        let missing_room = client
            .update_message(
                "room:ghost",
                &sent.serial,
                UpdateMessageParams {
                    client_id: "client:a".to_owned(),
                    text: "x".to_owned(),
                },
            )
            .await
            .expect_err("unknown room should fail");
        assert_eq!(missing_room.code, "room_not_found");

        let missing_message = client
            .add_reaction(
                "room:general",
                &MessageSerial::from("00000000000000009999"),
                ReactionParams::new("client:a", ReactionKind::Distinct, "👍"),
            )
            .await
            .expect_err("unknown message should fail");
        assert_eq!(missing_message.code, "message_not_found");
    }

    #[tokio::test]
    async fn discontinuity_reaches_subscribers() {
        let client = InMemoryChatClient::new();
        let mut events = client.subscribe("room:general");

        client.emit_discontinuity("room:general", Some("injected gap".to_owned()));

        let event = events.recv().await.expect("event should arrive");
        assert_eq!(
            event,
            RoomEvent::Discontinuity {
                reason: Some("injected gap".to_owned())
            }
        );
    }
}
