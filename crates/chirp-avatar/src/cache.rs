use std::num::NonZeroUsize;

use lru::LruCache;
use thiserror::Error;
use tracing::{debug, warn};

use crate::record::{AvatarNamespace, AvatarPatch, AvatarRecord};
use crate::store::{AVATAR_CACHE_VERSION, AvatarStore, PersistedAvatarCache};

/// Default capacity for the user namespace.
pub const DEFAULT_USER_CAPACITY: usize = 256;
/// Default capacity for the room namespace.
pub const DEFAULT_ROOM_CAPACITY: usize = 64;

/// Per-namespace capacity configuration.
///
/// Capacities below one are clamped to one; an unbounded namespace is
/// deliberately not expressible.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AvatarCacheConfig {
    pub user_capacity: usize,
    pub room_capacity: usize,
}

impl Default for AvatarCacheConfig {
    fn default() -> Self {
        Self {
            user_capacity: DEFAULT_USER_CAPACITY,
            room_capacity: DEFAULT_ROOM_CAPACITY,
        }
    }
}

/// Change notification delivered to registered listeners after a record
/// was written and persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AvatarChange {
    /// Namespace of the changed record.
    pub namespace: AvatarNamespace,
    /// Id of the changed record.
    pub id: String,
    /// Record state after the change.
    pub record: AvatarRecord,
    /// Record state before the change, `None` for a fresh id.
    pub previous: Option<AvatarRecord>,
}

/// Handle returned by `on_change`; pass it to `remove_listener` to stop
/// receiving notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AvatarListenerHandle(u64);

/// Failure to import an avatar snapshot.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AvatarImportError {
    #[error("avatar snapshot schema version {found} does not match expected {expected}")]
    SchemaMismatch { found: u32, expected: u32 },
}

type AvatarListener = Box<dyn Fn(&AvatarChange) + Send + Sync + 'static>;

/// Bounded, persisted avatar metadata service.
///
/// Owns both namespaces behind strict LRU bounds and writes the whole
/// snapshot through its store after every mutation, so a crash never
/// loses more than the mutation in flight. Construct one per application
/// and share it by handle; there is no global instance.
pub struct AvatarCache {
    store: Box<dyn AvatarStore>,
    user_avatars: LruCache<String, AvatarRecord>,
    room_avatars: LruCache<String, AvatarRecord>,
    listeners: Vec<(u64, AvatarListener)>,
    next_listener_id: u64,
}

impl AvatarCache {
    /// Build the cache, seeding both namespaces from the store.
    ///
    /// A missing, unreadable or version-mismatched snapshot degrades to an
    /// empty cache; construction never fails on bad persisted data.
    pub fn new(store: Box<dyn AvatarStore>, config: AvatarCacheConfig) -> Self {
        let seed = match store.load() {
            Ok(Some(snapshot)) if snapshot.version == AVATAR_CACHE_VERSION => Some(snapshot),
            Ok(Some(snapshot)) => {
                warn!(
                    found = snapshot.version,
                    expected = AVATAR_CACHE_VERSION,
                    "ignoring persisted avatar cache with mismatched schema version"
                );
                None
            }
            Ok(None) => None,
            Err(err) => {
                warn!(error = %err, "failed loading persisted avatar cache; starting fresh");
                None
            }
        };

        let mut cache = Self {
            store,
            user_avatars: LruCache::new(bounded_capacity(config.user_capacity)),
            room_avatars: LruCache::new(bounded_capacity(config.room_capacity)),
            listeners: Vec::new(),
            next_listener_id: 0,
        };
        if let Some(snapshot) = seed {
            for (id, record) in snapshot.user_avatars {
                cache.user_avatars.put(id, record);
            }
            for (id, record) in snapshot.room_avatars {
                cache.room_avatars.put(id, record);
            }
            debug!(
                users = cache.user_avatars.len(),
                rooms = cache.room_avatars.len(),
                "seeded avatar cache from persisted snapshot"
            );
        }
        cache
    }

    /// Fetch the record for `id`, synthesizing and storing a default on
    /// first sight. Hits refresh recency; misses count as a mutation and
    /// persist, but emit no change notification.
    pub fn get_or_create(
        &mut self,
        namespace: AvatarNamespace,
        id: &str,
        display_name_hint: Option<&str>,
    ) -> AvatarRecord {
        if let Some(record) = self.entries_mut(namespace).get(id) {
            return record.clone();
        }

        let record = AvatarRecord::generated(id, display_name_hint);
        if let Some((evicted_id, _)) = self
            .entries_mut(namespace)
            .push(id.to_owned(), record.clone())
        {
            debug!(
                namespace = namespace.as_str(),
                evicted = %evicted_id,
                "evicted least recently used avatar"
            );
        }
        self.persist();
        record
    }

    /// Merge `patch` into the record for `id`, creating a default first
    /// when the id is unknown. Persists, then notifies listeners with the
    /// new and previous record states.
    pub fn set_patch(
        &mut self,
        namespace: AvatarNamespace,
        id: &str,
        patch: AvatarPatch,
    ) -> AvatarRecord {
        let previous = self.entries_mut(namespace).get(id).cloned();
        let mut record = match &previous {
            Some(existing) => existing.clone(),
            None => AvatarRecord::generated(id, patch.display_name.as_deref()),
        };
        record.apply(&patch);

        if let Some((evicted_id, _)) = self
            .entries_mut(namespace)
            .push(id.to_owned(), record.clone())
        {
            if evicted_id != id {
                debug!(
                    namespace = namespace.as_str(),
                    evicted = %evicted_id,
                    "evicted least recently used avatar"
                );
            }
        }
        self.persist();

        let change = AvatarChange {
            namespace,
            id: id.to_owned(),
            record: record.clone(),
            previous,
        };
        self.notify(&change);
        record
    }

    /// Drop every record in one namespace. Bulk operation: persists once
    /// and emits no per-record notifications.
    pub fn clear_namespace(&mut self, namespace: AvatarNamespace) {
        self.entries_mut(namespace).clear();
        self.persist();
    }

    /// Drop every record in both namespaces.
    pub fn clear_all(&mut self) {
        self.user_avatars.clear();
        self.room_avatars.clear();
        self.persist();
    }

    /// Snapshot both namespaces for backup or transfer. Does not touch
    /// recency.
    pub fn export(&self) -> PersistedAvatarCache {
        PersistedAvatarCache {
            version: AVATAR_CACHE_VERSION,
            user_avatars: collect_records(&self.user_avatars),
            room_avatars: collect_records(&self.room_avatars),
        }
    }

    /// Replace both namespaces from a snapshot.
    ///
    /// The snapshot version must match exactly; a mismatch rejects the
    /// whole import and leaves the cache untouched. Bulk operation: no
    /// per-record notifications.
    pub fn import(&mut self, snapshot: PersistedAvatarCache) -> Result<(), AvatarImportError> {
        if snapshot.version != AVATAR_CACHE_VERSION {
            return Err(AvatarImportError::SchemaMismatch {
                found: snapshot.version,
                expected: AVATAR_CACHE_VERSION,
            });
        }

        self.user_avatars.clear();
        self.room_avatars.clear();
        for (id, record) in snapshot.user_avatars {
            self.user_avatars.put(id, record);
        }
        for (id, record) in snapshot.room_avatars {
            self.room_avatars.put(id, record);
        }
        self.persist();
        Ok(())
    }

    /// Register a change listener. Listeners run synchronously in
    /// registration order after each persisted record change.
    pub fn on_change(
        &mut self,
        listener: impl Fn(&AvatarChange) + Send + Sync + 'static,
    ) -> AvatarListenerHandle {
        let id = self.next_listener_id;
        self.next_listener_id += 1;
        self.listeners.push((id, Box::new(listener)));
        AvatarListenerHandle(id)
    }

    /// Remove a registered listener. Unknown handles are ignored.
    pub fn remove_listener(&mut self, handle: AvatarListenerHandle) {
        self.listeners.retain(|(id, _)| *id != handle.0);
    }

    /// Number of records currently cached in one namespace.
    pub fn len(&self, namespace: AvatarNamespace) -> usize {
        self.entries(namespace).len()
    }

    pub fn is_empty(&self, namespace: AvatarNamespace) -> bool {
        self.entries(namespace).is_empty()
    }

    /// Whether `id` is cached, without touching recency.
    pub fn contains(&self, namespace: AvatarNamespace, id: &str) -> bool {
        self.entries(namespace).contains(id)
    }

    /// Read a record without touching recency.
    pub fn peek(&self, namespace: AvatarNamespace, id: &str) -> Option<&AvatarRecord> {
        self.entries(namespace).peek(id)
    }

    fn entries(&self, namespace: AvatarNamespace) -> &LruCache<String, AvatarRecord> {
        match namespace {
            AvatarNamespace::User => &self.user_avatars,
            AvatarNamespace::Room => &self.room_avatars,
        }
    }

    fn entries_mut(&mut self, namespace: AvatarNamespace) -> &mut LruCache<String, AvatarRecord> {
        match namespace {
            AvatarNamespace::User => &mut self.user_avatars,
            AvatarNamespace::Room => &mut self.room_avatars,
        }
    }

    fn persist(&self) {
        let snapshot = self.export();
        if let Err(err) = self.store.save(&snapshot) {
            warn!(error = %err, "failed persisting avatar cache");
        }
    }

    fn notify(&self, change: &AvatarChange) {
        for (_, listener) in &self.listeners {
            listener(change);
        }
    }
}

fn bounded_capacity(capacity: usize) -> NonZeroUsize {
    NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN)
}

fn collect_records(
    cache: &LruCache<String, AvatarRecord>,
) -> std::collections::BTreeMap<String, AvatarRecord> {
    cache
        .iter()
        .map(|(id, record)| (id.clone(), record.clone()))
        .collect()
}
