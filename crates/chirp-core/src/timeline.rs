use std::collections::{HashSet, VecDeque};

use crate::reaction::ReactionSummary;
use crate::types::{MessagePage, MessageSerial, MessageSnapshot, RoomEvent};

/// Cap on live events buffered while a backfill is in flight.
pub const DEFAULT_PENDING_LIMIT: usize = 256;

/// Hard ceiling on backfill page sizes, matching the server-side cap.
pub const MAX_BACKFILL_LIMIT: u16 = 100;

/// Lifecycle of a room timeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimelineStatus {
    /// No backfill has completed yet; nothing trustworthy to show.
    Empty,
    /// A backfill request is in flight.
    Loading,
    /// The timeline reflects a completed backfill plus live events.
    Ready,
}

/// Guard for one backfill request.
///
/// Tokens are issued in strictly increasing order and a response is only
/// applied while its token is still the latest one, so a late response
/// from before a discontinuity cannot clobber the resynchronized view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackfillToken(u64);

/// What happened when one live event was offered to the reconciler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// The visible timeline changed.
    Applied,
    /// The event was absorbed without effect: a duplicate delivery, an
    /// unknown serial, a stale version or an unchanged summary.
    NoOp,
    /// The timeline is not ready; the event was queued for replay.
    Buffered,
    /// The event signalled lost continuity; a fresh backfill is required.
    ResyncRequired,
}

/// What happened when a backfill response was handed back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackfillOutcome {
    /// The response matched the latest request and was applied.
    Applied,
    /// The response was superseded by a newer request and ignored.
    Stale,
}

/// Ordered, deduplicated view of one room's messages.
///
/// The reconciler is a plain synchronous state machine: callers feed it
/// live events and backfill responses and read the merged result. It never
/// performs IO itself, which keeps every ordering scenario testable
/// without a runtime.
#[derive(Debug, Clone)]
pub struct RoomTimeline {
    status: TimelineStatus,
    items: Vec<MessageSnapshot>,
    pending: VecDeque<RoomEvent>,
    pending_limit: usize,
    latest_token: u64,
    had_ready_view: bool,
    dropped_pending: u64,
}

impl RoomTimeline {
    pub fn new(pending_limit: usize) -> Self {
        Self {
            status: TimelineStatus::Empty,
            items: Vec::new(),
            pending: VecDeque::new(),
            pending_limit: pending_limit.max(1),
            latest_token: 0,
            had_ready_view: false,
            dropped_pending: 0,
        }
    }

    pub fn status(&self) -> TimelineStatus {
        self.status
    }

    /// Messages in ascending serial order.
    pub fn messages(&self) -> &[MessageSnapshot] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Number of live events currently queued for replay.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Total live events discarded because the replay queue overflowed.
    pub fn dropped_pending(&self) -> u64 {
        self.dropped_pending
    }

    /// The most recently issued backfill token.
    pub fn backfill_token(&self) -> BackfillToken {
        BackfillToken(self.latest_token)
    }

    /// Start (or restart) a backfill, superseding any in-flight request.
    ///
    /// Existing items stay visible while the request runs; only the
    /// response replaces them.
    pub fn begin_backfill(&mut self) -> BackfillToken {
        self.had_ready_view = match self.status {
            TimelineStatus::Ready => true,
            TimelineStatus::Loading => self.had_ready_view,
            TimelineStatus::Empty => false,
        };
        self.status = TimelineStatus::Loading;
        self.latest_token += 1;
        BackfillToken(self.latest_token)
    }

    /// Apply a completed backfill response.
    ///
    /// The page replaces the whole timeline, then buffered live events are
    /// replayed on top in arrival order. Responses carrying a superseded
    /// token are discarded untouched.
    pub fn complete_backfill(&mut self, token: BackfillToken, page: MessagePage) -> BackfillOutcome {
        if token.0 != self.latest_token {
            return BackfillOutcome::Stale;
        }
        self.items = normalize_page(page);
        self.status = TimelineStatus::Ready;
        self.had_ready_view = true;
        self.replay_pending();
        BackfillOutcome::Applied
    }

    /// Record a failed backfill without touching existing items.
    ///
    /// A timeline that was ready before stays ready on its previous view; a
    /// timeline that never loaded returns to empty. Buffered events are
    /// kept so a later successful backfill can still replay them.
    pub fn fail_backfill(&mut self, token: BackfillToken) -> BackfillOutcome {
        if token.0 != self.latest_token {
            return BackfillOutcome::Stale;
        }
        if self.had_ready_view {
            self.status = TimelineStatus::Ready;
            self.replay_pending();
        } else {
            self.status = TimelineStatus::Empty;
        }
        BackfillOutcome::Applied
    }

    /// Handle lost continuity: discard all local state and start a fresh
    /// backfill cycle.
    ///
    /// Buffered events are dropped as well, since events queued before the
    /// gap may themselves be incomplete.
    pub fn on_discontinuity(&mut self) -> BackfillToken {
        self.items.clear();
        self.pending.clear();
        self.had_ready_view = false;
        self.status = TimelineStatus::Loading;
        self.latest_token += 1;
        BackfillToken(self.latest_token)
    }

    /// Offer one live event to the reconciler.
    pub fn apply(&mut self, event: RoomEvent) -> ApplyOutcome {
        match event {
            RoomEvent::Discontinuity { .. } => {
                self.on_discontinuity();
                ApplyOutcome::ResyncRequired
            }
            event if self.status != TimelineStatus::Ready => {
                self.buffer(event);
                ApplyOutcome::Buffered
            }
            RoomEvent::MessageCreated { message } => self.apply_created(message),
            RoomEvent::MessageUpdated {
                serial,
                version,
                text,
                updated_at_ms,
                updated_by,
            } => self.apply_updated(&serial, version, text, updated_at_ms, updated_by),
            RoomEvent::MessageDeleted {
                serial,
                version,
                deleted_at_ms,
                deleted_by,
            } => self.apply_deleted(&serial, version, deleted_at_ms, deleted_by),
            RoomEvent::ReactionSummary { serial, summary } => {
                self.apply_reaction_summary(&serial, summary)
            }
        }
    }

    /// Clamp a requested backfill limit against the server-side cap.
    ///
    /// The result is always in `1..=MAX_BACKFILL_LIMIT`, whatever the
    /// caller or a misbehaving configuration asks for.
    pub fn bounded_backfill_limit(requested: u16, server_cap: u16) -> u16 {
        let safe_requested = requested.max(1);
        let safe_cap = server_cap.clamp(1, MAX_BACKFILL_LIMIT);
        safe_requested.min(safe_cap)
    }

    fn apply_created(&mut self, message: MessageSnapshot) -> ApplyOutcome {
        if self.position_of(&message.serial).is_some() {
            return ApplyOutcome::NoOp;
        }
        self.items.push(message);
        self.items.sort_by(|a, b| a.serial.cmp(&b.serial));
        ApplyOutcome::Applied
    }

    fn apply_updated(
        &mut self,
        serial: &MessageSerial,
        version: u64,
        text: String,
        updated_at_ms: u64,
        updated_by: Option<String>,
    ) -> ApplyOutcome {
        let Some(index) = self.position_of(serial) else {
            return ApplyOutcome::NoOp;
        };
        let current = &mut self.items[index];
        if version <= current.version {
            return ApplyOutcome::NoOp;
        }
        current.version = version;
        current.text = text;
        current.updated_at_ms = Some(updated_at_ms);
        current.updated_by = updated_by;
        ApplyOutcome::Applied
    }

    fn apply_deleted(
        &mut self,
        serial: &MessageSerial,
        version: u64,
        deleted_at_ms: u64,
        deleted_by: Option<String>,
    ) -> ApplyOutcome {
        let Some(index) = self.position_of(serial) else {
            return ApplyOutcome::NoOp;
        };
        let current = &mut self.items[index];
        if version <= current.version {
            return ApplyOutcome::NoOp;
        }
        current.version = version;
        current.deleted = true;
        current.deleted_at_ms = Some(deleted_at_ms);
        current.deleted_by = deleted_by;
        ApplyOutcome::Applied
    }

    fn apply_reaction_summary(
        &mut self,
        serial: &MessageSerial,
        summary: ReactionSummary,
    ) -> ApplyOutcome {
        let Some(index) = self.position_of(serial) else {
            return ApplyOutcome::NoOp;
        };
        let current = &mut self.items[index];
        if current.reactions == summary {
            return ApplyOutcome::NoOp;
        }
        current.reactions = summary;
        ApplyOutcome::Applied
    }

    fn position_of(&self, serial: &MessageSerial) -> Option<usize> {
        self.items.iter().position(|item| &item.serial == serial)
    }

    fn buffer(&mut self, event: RoomEvent) {
        if self.pending.len() >= self.pending_limit {
            self.pending.pop_front();
            self.dropped_pending += 1;
        }
        self.pending.push_back(event);
    }

    fn replay_pending(&mut self) {
        let queued: Vec<RoomEvent> = self.pending.drain(..).collect();
        for event in queued {
            self.apply(event);
        }
    }
}

impl Default for RoomTimeline {
    fn default() -> Self {
        Self::new(DEFAULT_PENDING_LIMIT)
    }
}

/// Turn a newest-first backend page into an ascending, serial-unique item
/// list. The page is walked in delivery order so the newest instance of a
/// duplicated serial wins.
fn normalize_page(page: MessagePage) -> Vec<MessageSnapshot> {
    let mut seen: HashSet<MessageSerial> = HashSet::with_capacity(page.items.len());
    let mut items: Vec<MessageSnapshot> = Vec::with_capacity(page.items.len());
    for item in page.items {
        if seen.insert(item.serial.clone()) {
            items.push(item);
        }
    }
    items.sort_by(|a, b| a.serial.cmp(&b.serial));
    items
}
