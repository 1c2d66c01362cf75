//! Bounded, persisted avatar metadata for chat UIs.
//!
//! User and room avatars live in independent LRU namespaces, survive
//! restarts through a pluggable snapshot store, and fall back to
//! deterministic initials and palette colors when no image is known.

/// Bounded cache manager with change listeners and import/export.
pub mod cache;
/// Deterministic initials and color derivation.
pub mod identity;
/// Record, patch and namespace types.
pub mod record;
/// Snapshot persistence backends.
pub mod store;

pub use cache::{
    AvatarCache, AvatarCacheConfig, AvatarChange, AvatarImportError, AvatarListenerHandle,
    DEFAULT_ROOM_CAPACITY, DEFAULT_USER_CAPACITY,
};
pub use identity::{AVATAR_PALETTE, color_for, initials_for, stable_hash};
pub use record::{AvatarNamespace, AvatarPatch, AvatarRecord};
pub use store::{
    AVATAR_CACHE_FILENAME, AVATAR_CACHE_VERSION, AvatarStore, AvatarStoreError,
    InMemoryAvatarStore, JsonFileAvatarStore, PersistedAvatarCache,
};
