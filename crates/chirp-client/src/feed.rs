use std::sync::{Arc, Mutex};

use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use chirp_core::{
    ApplyOutcome, BackfillOutcome, BackfillToken, MAX_BACKFILL_LIMIT, MessageSnapshot,
    RoomTimeline, TimelineStatus,
};

use crate::client::ChatClient;

/// Default number of messages requested per backfill.
pub const DEFAULT_BACKFILL_LIMIT: u16 = 50;

const STATE_LOCK_MSG: &str = "room feed state lock poisoned";

/// Callback used to publish fresh timeline snapshots to the UI layer.
pub type SnapshotCallback = Arc<dyn Fn(TimelineSnapshot) + Send + Sync + 'static>;

/// Tuning for a spawned room feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoomFeedOptions {
    /// Messages requested per backfill, clamped against the server cap.
    pub backfill_limit: u16,
    /// Cap on live events buffered while a backfill is in flight.
    pub pending_limit: usize,
}

impl Default for RoomFeedOptions {
    fn default() -> Self {
        Self {
            backfill_limit: DEFAULT_BACKFILL_LIMIT,
            pending_limit: chirp_core::DEFAULT_PENDING_LIMIT,
        }
    }
}

/// Immutable view of one room timeline, ready for rendering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimelineSnapshot {
    /// Reconciler lifecycle stage.
    pub status: TimelineStatus,
    /// Messages in ascending serial order.
    pub messages: Vec<MessageSnapshot>,
    /// Most recent backfill failure, cleared by the next successful load.
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FeedCommand {
    Refresh,
}

struct FeedShared {
    timeline: RoomTimeline,
    last_error: Option<String>,
}

/// Live feed for one room: subscribes to the client's event stream, runs
/// the initial backfill and keeps a [`RoomTimeline`] reconciled on a
/// background task.
///
/// Failed backfills are surfaced through `last_error` and never retried
/// automatically; call [`RoomFeed::refresh`] to try again.
pub struct RoomFeed {
    room_id: String,
    shared: Arc<Mutex<FeedShared>>,
    command_tx: mpsc::UnboundedSender<FeedCommand>,
    stop: CancellationToken,
    worker: tokio::task::JoinHandle<()>,
}

impl RoomFeed {
    /// Spawn the feed worker for `room_id` on the current tokio runtime.
    ///
    /// The worker subscribes before issuing the first backfill so no event
    /// can slip between the history snapshot and the live stream.
    pub fn spawn<C>(
        client: C,
        room_id: impl Into<String>,
        options: RoomFeedOptions,
        on_update: SnapshotCallback,
    ) -> Self
    where
        C: ChatClient + 'static,
    {
        let room_id = room_id.into();
        let shared = Arc::new(Mutex::new(FeedShared {
            timeline: RoomTimeline::new(options.pending_limit),
            last_error: None,
        }));
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let stop = CancellationToken::new();

        let worker = tokio::spawn(run_feed(
            client,
            room_id.clone(),
            options,
            Arc::clone(&shared),
            command_rx,
            stop.child_token(),
            on_update,
        ));

        Self {
            room_id,
            shared,
            command_tx,
            stop,
            worker,
        }
    }

    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    /// Current reconciled view of the room.
    pub fn snapshot(&self) -> TimelineSnapshot {
        let state = self.shared.lock().expect(STATE_LOCK_MSG);
        snapshot_of(&state)
    }

    /// Ask the worker to rerun the backfill. This is the caller-driven
    /// retry path after a failed load, and also works as a plain reload.
    pub fn refresh(&self) {
        let _ = self.command_tx.send(FeedCommand::Refresh);
    }

    /// Stop the worker and wait for it to exit.
    pub async fn shutdown(self) {
        self.stop.cancel();
        let _ = self.worker.await;
    }
}

async fn run_feed<C: ChatClient>(
    client: C,
    room_id: String,
    options: RoomFeedOptions,
    shared: Arc<Mutex<FeedShared>>,
    mut command_rx: mpsc::UnboundedReceiver<FeedCommand>,
    stop: CancellationToken,
    on_update: SnapshotCallback,
) {
    debug!(%room_id, "room feed worker started");
    let mut events = client.subscribe(&room_id);

    let token = {
        let mut state = shared.lock().expect(STATE_LOCK_MSG);
        state.timeline.begin_backfill()
    };
    publish(&shared, &on_update);
    run_backfill(&client, &room_id, options.backfill_limit, &shared, token, &on_update).await;

    loop {
        tokio::select! {
            _ = stop.cancelled() => break,
            command = command_rx.recv() => {
                match command {
                    Some(FeedCommand::Refresh) => {
                        debug!(%room_id, "refreshing room timeline");
                        let token = {
                            let mut state = shared.lock().expect(STATE_LOCK_MSG);
                            state.timeline.begin_backfill()
                        };
                        publish(&shared, &on_update);
                        run_backfill(&client, &room_id, options.backfill_limit, &shared, token, &on_update).await;
                    }
                    // Handle dropped without shutdown; nothing left to drive.
                    None => break,
                }
            }
            event = events.recv() => {
                match event {
                    Ok(event) => {
                        let (outcome, token) = {
                            let mut state = shared.lock().expect(STATE_LOCK_MSG);
                            let outcome = state.timeline.apply(event);
                            (outcome, state.timeline.backfill_token())
                        };
                        trace!(%room_id, ?outcome, "applied live event");
                        publish(&shared, &on_update);
                        if outcome == ApplyOutcome::ResyncRequired {
                            warn!(%room_id, "event stream discontinuity; resynchronizing");
                            run_backfill(&client, &room_id, options.backfill_limit, &shared, token, &on_update).await;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        // A lagged receiver has lost events, which is
                        // indistinguishable from a transport gap.
                        warn!(%room_id, missed, "event stream lagged; resynchronizing");
                        let token = {
                            let mut state = shared.lock().expect(STATE_LOCK_MSG);
                            state.timeline.on_discontinuity()
                        };
                        publish(&shared, &on_update);
                        run_backfill(&client, &room_id, options.backfill_limit, &shared, token, &on_update).await;
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        warn!(%room_id, "event stream closed; room feed worker exiting");
                        break;
                    }
                }
            }
        }
    }
    debug!(%room_id, "room feed worker exited");
}

async fn run_backfill<C: ChatClient>(
    client: &C,
    room_id: &str,
    requested_limit: u16,
    shared: &Arc<Mutex<FeedShared>>,
    token: BackfillToken,
    on_update: &SnapshotCallback,
) {
    let limit = RoomTimeline::bounded_backfill_limit(requested_limit, MAX_BACKFILL_LIMIT);
    match client.fetch_previous_messages(room_id, limit).await {
        Ok(page) => {
            let mut state = shared.lock().expect(STATE_LOCK_MSG);
            match state.timeline.complete_backfill(token, page) {
                BackfillOutcome::Applied => {
                    state.last_error = None;
                    debug!(
                        %room_id,
                        messages = state.timeline.len(),
                        dropped = state.timeline.dropped_pending(),
                        "backfill applied"
                    );
                }
                BackfillOutcome::Stale => {
                    trace!(%room_id, "discarding stale backfill response");
                }
            }
        }
        Err(err) => {
            let mut state = shared.lock().expect(STATE_LOCK_MSG);
            match state.timeline.fail_backfill(token) {
                BackfillOutcome::Applied => {
                    warn!(
                        %room_id,
                        error = %err,
                        transient = err.is_transient(),
                        "backfill failed; keeping previous view"
                    );
                    state.last_error = Some(err.to_string());
                }
                BackfillOutcome::Stale => {
                    trace!(%room_id, "ignoring failure of superseded backfill");
                }
            }
        }
    }
    publish(shared, on_update);
}

fn publish(shared: &Arc<Mutex<FeedShared>>, on_update: &SnapshotCallback) {
    let snapshot = {
        let state = shared.lock().expect(STATE_LOCK_MSG);
        snapshot_of(&state)
    };
    (on_update)(snapshot);
}

fn snapshot_of(state: &FeedShared) -> TimelineSnapshot {
    TimelineSnapshot {
        status: state.timeline.status(),
        messages: state.timeline.messages().to_vec(),
        last_error: state.last_error.clone(),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::time::timeout;

    use chirp_core::{ChatError, EventStream, MessagePage, MessageSerial, ReactionKind, RoomEvents};

    use super::*;
    use crate::client::{
        DeleteMessageParams, ReactionParams, SendMessageParams, UpdateMessageParams,
    };
    use crate::memory::InMemoryChatClient;

    const WAIT: Duration = Duration::from_secs(5);

    fn snapshot_channel() -> (
        SnapshotCallback,
        mpsc::UnboundedReceiver<TimelineSnapshot>,
    ) {
        let (tx, rx) = mpsc::unbounded_channel();
        let callback: SnapshotCallback = Arc::new(move |snapshot| {
            let _ = tx.send(snapshot);
        });
        (callback, rx)
    }

    async fn wait_for(
        rx: &mut mpsc::UnboundedReceiver<TimelineSnapshot>,
        mut accept: impl FnMut(&TimelineSnapshot) -> bool,
    ) -> TimelineSnapshot {
        timeout(WAIT, async {
            loop {
                let snapshot = rx.recv().await.expect("snapshot stream should stay open");
                if accept(&snapshot) {
                    return snapshot;
                }
            }
        })
        .await
        .expect("expected snapshot should arrive in time")
    }

    fn send_params(client_id: &str, text: &str) -> SendMessageParams {
        SendMessageParams {
            client_id: client_id.to_owned(),
            text: text.to_owned(),
        }
    }

    fn texts(snapshot: &TimelineSnapshot) -> Vec<String> {
        snapshot
            .messages
            .iter()
            .map(|message| message.text.clone())
            .collect()
    }

    #[tokio::test]
    async fn backfills_history_then_applies_live_events() {
        let client = InMemoryChatClient::new();
        for text in ["one", "two"] {
            client
                .send_message("room:general", send_params("client:a", text))
                .await
                .expect("send should succeed");
        }

        let (callback, mut snapshots) = snapshot_channel();
        let feed = RoomFeed::spawn(
            client.clone(),
            "room:general",
            RoomFeedOptions::default(),
            callback,
        );

        let ready = wait_for(&mut snapshots, |snapshot| {
            snapshot.status == TimelineStatus::Ready && snapshot.messages.len() == 2
        })
        .await;
        assert_eq!(texts(&ready), vec!["one", "two"]);

        client
            .send_message("room:general", send_params("client:b", "three"))
            .await
            .expect("send should succeed");

        let grown = wait_for(&mut snapshots, |snapshot| snapshot.messages.len() == 3).await;
        assert_eq!(texts(&grown), vec!["one", "two", "three"]);

        feed.shutdown().await;
    }

    #[tokio::test]
    async fn edits_deletes_and_reactions_flow_into_snapshots() {
        let client = InMemoryChatClient::new();
        let first = client
            .send_message("room:general", send_params("client:a", "original"))
            .await
            .expect("send should succeed");
        let second = client
            .send_message("room:general", send_params("client:b", "disposable"))
            .await
            .expect("send should succeed");

        let (callback, mut snapshots) = snapshot_channel();
        let feed = RoomFeed::spawn(
            client.clone(),
            "room:general",
            RoomFeedOptions::default(),
            callback,
        );
        wait_for(&mut snapshots, |snapshot| {
            snapshot.status == TimelineStatus::Ready && snapshot.messages.len() == 2
        })
        .await;

        client
            .update_message(
                "room:general",
                &first.serial,
                UpdateMessageParams {
                    client_id: "client:a".to_owned(),
                    text: "edited".to_owned(),
                },
            )
            .await
            .expect("update should succeed");
        client
            .delete_message(
                "room:general",
                &second.serial,
                DeleteMessageParams {
                    client_id: "client:mod".to_owned(),
                },
            )
            .await
            .expect("delete should succeed");
        client
            .add_reaction(
                "room:general",
                &first.serial,
                ReactionParams::new("client:b", ReactionKind::Distinct, "👍"),
            )
            .await
            .expect("reaction should succeed");

        let settled = wait_for(&mut snapshots, |snapshot| {
            snapshot.messages.len() == 2
                && snapshot.messages[0].text == "edited"
                && snapshot.messages[1].deleted
                && !snapshot.messages[0].reactions.distinct.is_empty()
        })
        .await;
        assert_eq!(settled.messages[0].version, 2);
        let tally = settled.messages[0]
            .reactions
            .distinct
            .get("👍")
            .expect("tally should exist");
        assert_eq!(tally.total, 1);

        feed.shutdown().await;
    }

    #[tokio::test]
    async fn discontinuity_resynchronizes_the_whole_room() {
        let client = InMemoryChatClient::new();
        client
            .send_message("room:general", send_params("client:a", "before gap"))
            .await
            .expect("send should succeed");

        let (callback, mut snapshots) = snapshot_channel();
        let feed = RoomFeed::spawn(
            client.clone(),
            "room:general",
            RoomFeedOptions::default(),
            callback,
        );
        wait_for(&mut snapshots, |snapshot| {
            snapshot.status == TimelineStatus::Ready && snapshot.messages.len() == 1
        })
        .await;

        client.emit_discontinuity("room:general", Some("injected gap".to_owned()));
        // While the room resyncs another message lands server-side.
        client
            .send_message("room:general", send_params("client:b", "after gap"))
            .await
            .expect("send should succeed");

        let resynced = wait_for(&mut snapshots, |snapshot| {
            snapshot.status == TimelineStatus::Ready && snapshot.messages.len() == 2
        })
        .await;
        assert_eq!(texts(&resynced), vec!["before gap", "after gap"]);

        feed.shutdown().await;
    }

    /// Client whose history endpoint fails until `heal` is called.
    #[derive(Clone)]
    struct FlakyHistoryClient {
        inner: InMemoryChatClient,
        healthy: Arc<std::sync::atomic::AtomicBool>,
    }

    impl FlakyHistoryClient {
        fn new(inner: InMemoryChatClient) -> Self {
            Self {
                inner,
                healthy: Arc::new(std::sync::atomic::AtomicBool::new(false)),
            }
        }

        fn heal(&self) {
            self.healthy
                .store(true, std::sync::atomic::Ordering::SeqCst);
        }
    }

    impl ChatClient for FlakyHistoryClient {
        fn subscribe(&self, room_id: &str) -> EventStream {
            self.inner.subscribe(room_id)
        }

        async fn fetch_previous_messages(
            &self,
            room_id: &str,
            limit: u16,
        ) -> Result<MessagePage, ChatError> {
            if !self.healthy.load(std::sync::atomic::Ordering::SeqCst) {
                return Err(ChatError::new(
                    chirp_core::ChatErrorCategory::Network,
                    "history_unavailable",
                    "history endpoint unreachable",
                ));
            }
            self.inner.fetch_previous_messages(room_id, limit).await
        }

        async fn send_message(
            &self,
            room_id: &str,
            params: SendMessageParams,
        ) -> Result<chirp_core::MessageSnapshot, ChatError> {
            self.inner.send_message(room_id, params).await
        }

        async fn update_message(
            &self,
            room_id: &str,
            serial: &MessageSerial,
            params: UpdateMessageParams,
        ) -> Result<chirp_core::MessageSnapshot, ChatError> {
            self.inner.update_message(room_id, serial, params).await
        }

        async fn delete_message(
            &self,
            room_id: &str,
            serial: &MessageSerial,
            params: DeleteMessageParams,
        ) -> Result<chirp_core::MessageSnapshot, ChatError> {
            self.inner.delete_message(room_id, serial, params).await
        }

        async fn add_reaction(
            &self,
            room_id: &str,
            serial: &MessageSerial,
            params: ReactionParams,
        ) -> Result<(), ChatError> {
            self.inner.add_reaction(room_id, serial, params).await
        }

        async fn delete_reaction(
            &self,
            room_id: &str,
            serial: &MessageSerial,
            params: ReactionParams,
        ) -> Result<(), ChatError> {
            self.inner.delete_reaction(room_id, serial, params).await
        }
    }

    #[tokio::test]
    async fn failed_backfill_surfaces_error_and_refresh_recovers() {
        let inner = InMemoryChatClient::new();
        inner
            .send_message("room:general", send_params("client:a", "hidden history"))
            .await
            .expect("send should succeed");
        let client = FlakyHistoryClient::new(inner);

        let (callback, mut snapshots) = snapshot_channel();
        let feed = RoomFeed::spawn(
            client.clone(),
            "room:general",
            RoomFeedOptions::default(),
            callback,
        );

        let failed = wait_for(&mut snapshots, |snapshot| snapshot.last_error.is_some()).await;
        assert_eq!(failed.status, TimelineStatus::Empty);
        assert!(failed.messages.is_empty());

        client.heal();
        feed.refresh();

        let recovered = wait_for(&mut snapshots, |snapshot| {
            snapshot.status == TimelineStatus::Ready && snapshot.messages.len() == 1
        })
        .await;
        assert_eq!(recovered.last_error, None);
        assert_eq!(texts(&recovered), vec!["hidden history"]);

        feed.shutdown().await;
    }

    #[tokio::test]
    async fn lagged_event_stream_triggers_resync() {
        // A tiny broadcast buffer plus a worker that never gets to run
        // forces the receiver into the lagged state.
        #[derive(Clone)]
        struct TinyBufferClient {
            inner: InMemoryChatClient,
            events: RoomEvents,
        }

        impl ChatClient for TinyBufferClient {
            fn subscribe(&self, _room_id: &str) -> EventStream {
                self.events.subscribe()
            }

            async fn fetch_previous_messages(
                &self,
                room_id: &str,
                limit: u16,
            ) -> Result<MessagePage, ChatError> {
                self.inner.fetch_previous_messages(room_id, limit).await
            }

            async fn send_message(
                &self,
                room_id: &str,
                params: SendMessageParams,
            ) -> Result<chirp_core::MessageSnapshot, ChatError> {
                let message = self.inner.send_message(room_id, params).await?;
                self.events.emit(chirp_core::RoomEvent::MessageCreated {
                    message: message.clone(),
                });
                Ok(message)
            }

            async fn update_message(
                &self,
                room_id: &str,
                serial: &MessageSerial,
                params: UpdateMessageParams,
            ) -> Result<chirp_core::MessageSnapshot, ChatError> {
                self.inner.update_message(room_id, serial, params).await
            }

            async fn delete_message(
                &self,
                room_id: &str,
                serial: &MessageSerial,
                params: DeleteMessageParams,
            ) -> Result<chirp_core::MessageSnapshot, ChatError> {
                self.inner.delete_message(room_id, serial, params).await
            }

            async fn add_reaction(
                &self,
                room_id: &str,
                serial: &MessageSerial,
                params: ReactionParams,
            ) -> Result<(), ChatError> {
                self.inner.add_reaction(room_id, serial, params).await
            }

            async fn delete_reaction(
                &self,
                room_id: &str,
                serial: &MessageSerial,
                params: ReactionParams,
            ) -> Result<(), ChatError> {
                self.inner.delete_reaction(room_id, serial, params).await
            }
        }

        let client = TinyBufferClient {
            inner: InMemoryChatClient::new(),
            events: RoomEvents::new(1),
        };

        let (callback, mut snapshots) = snapshot_channel();
        let feed = RoomFeed::spawn(
            client.clone(),
            "room:general",
            RoomFeedOptions::default(),
            callback,
        );
        wait_for(&mut snapshots, |snapshot| {
            snapshot.status == TimelineStatus::Ready
        })
        .await;

        // Flood the single-slot buffer faster than the worker can drain.
        for text in ["a", "b", "c", "d", "e", "f", "g", "h"] {
            client
                .send_message("room:general", send_params("client:a", text))
                .await
                .expect("send should succeed");
        }

        // Whether or not individual events were missed, the feed must end
        // on a complete view of the room.
        let settled = wait_for(&mut snapshots, |snapshot| {
            snapshot.status == TimelineStatus::Ready && snapshot.messages.len() == 8
        })
        .await;
        assert_eq!(settled.messages.len(), 8);

        feed.shutdown().await;
    }
}
