use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{SystemTime, UNIX_EPOCH};
use std::{fmt, fs, io};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::record::AvatarRecord;

/// Schema version stamped on every persisted snapshot. Bump it whenever
/// the snapshot layout changes incompatibly.
pub const AVATAR_CACHE_VERSION: u32 = 1;

/// File name of the persisted snapshot inside the data directory.
pub const AVATAR_CACHE_FILENAME: &str = "chirp-avatars.json";

/// Full avatar cache snapshot, used both for persistence and for
/// export/import across devices.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PersistedAvatarCache {
    /// Schema version; a mismatch invalidates the whole snapshot.
    pub version: u32,
    /// User-namespace records keyed by user id.
    pub user_avatars: BTreeMap<String, AvatarRecord>,
    /// Room-namespace records keyed by room id.
    pub room_avatars: BTreeMap<String, AvatarRecord>,
}

impl PersistedAvatarCache {
    pub fn empty() -> Self {
        Self {
            version: AVATAR_CACHE_VERSION,
            user_avatars: BTreeMap::new(),
            room_avatars: BTreeMap::new(),
        }
    }
}

impl Default for PersistedAvatarCache {
    fn default() -> Self {
        Self::empty()
    }
}

/// Errors raised by avatar persistence backends.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AvatarStoreError {
    #[error("avatar store unavailable: {0}")]
    Unavailable(String),
    #[error("avatar store backend failure: {0}")]
    Backend(String),
}

/// Durable storage for the avatar cache snapshot.
///
/// Implementations store one whole snapshot; there is no per-record
/// access. Writes must be synchronous so a crash never loses more than
/// the mutation in flight.
pub trait AvatarStore: Send + Sync {
    /// Load the last saved snapshot, `None` when nothing was stored yet.
    fn load(&self) -> Result<Option<PersistedAvatarCache>, AvatarStoreError>;
    /// Replace the stored snapshot.
    fn save(&self, snapshot: &PersistedAvatarCache) -> Result<(), AvatarStoreError>;
}

/// Volatile store for tests and demos. Counts saves so tests can assert
/// the persist-on-every-mutation contract.
#[derive(Default, Clone)]
pub struct InMemoryAvatarStore {
    snapshot: Arc<RwLock<Option<PersistedAvatarCache>>>,
    saves: Arc<AtomicU64>,
}

impl InMemoryAvatarStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-seeded with a snapshot, as if a previous run saved it.
    pub fn seeded(snapshot: PersistedAvatarCache) -> Self {
        Self {
            snapshot: Arc::new(RwLock::new(Some(snapshot))),
            saves: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Number of times `save` has been called.
    pub fn save_count(&self) -> u64 {
        self.saves.load(Ordering::SeqCst)
    }

    /// The currently stored snapshot, if any.
    pub fn stored(&self) -> Option<PersistedAvatarCache> {
        self.snapshot.read().ok().and_then(|guard| guard.clone())
    }
}

impl fmt::Debug for InMemoryAvatarStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryAvatarStore")
            .field("saves", &self.save_count())
            .finish_non_exhaustive()
    }
}

impl AvatarStore for InMemoryAvatarStore {
    fn load(&self) -> Result<Option<PersistedAvatarCache>, AvatarStoreError> {
        let guard = self
            .snapshot
            .read()
            .map_err(|_| AvatarStoreError::Backend("in-memory avatar store lock poisoned".into()))?;
        Ok(guard.clone())
    }

    fn save(&self, snapshot: &PersistedAvatarCache) -> Result<(), AvatarStoreError> {
        let mut guard = self
            .snapshot
            .write()
            .map_err(|_| AvatarStoreError::Backend("in-memory avatar store lock poisoned".into()))?;
        *guard = Some(snapshot.clone());
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// JSON-file-backed store writing `chirp-avatars.json` under a data
/// directory. Saves go through a temp file and rename so a crash mid-write
/// leaves the previous snapshot intact.
#[derive(Debug, Clone)]
pub struct JsonFileAvatarStore {
    path: PathBuf,
}

impl JsonFileAvatarStore {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            path: data_dir.into().join(AVATAR_CACHE_FILENAME),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_failure(&self, err: &io::Error) -> AvatarStoreError {
        AvatarStoreError::Backend(format!("failed reading {}: {err}", self.path.display()))
    }

    fn write_failure(&self, err: &io::Error) -> AvatarStoreError {
        AvatarStoreError::Backend(format!("failed writing {}: {err}", self.path.display()))
    }
}

impl AvatarStore for JsonFileAvatarStore {
    fn load(&self) -> Result<Option<PersistedAvatarCache>, AvatarStoreError> {
        let raw = match fs::read(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(self.read_failure(&err)),
        };
        let snapshot = serde_json::from_slice::<PersistedAvatarCache>(&raw).map_err(|err| {
            AvatarStoreError::Backend(format!("failed parsing {}: {err}", self.path.display()))
        })?;
        Ok(Some(snapshot))
    }

    fn save(&self, snapshot: &PersistedAvatarCache) -> Result<(), AvatarStoreError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|err| {
                AvatarStoreError::Unavailable(format!(
                    "failed creating avatar cache directory {}: {err}",
                    parent.display()
                ))
            })?;
        }

        let payload = serde_json::to_vec_pretty(snapshot).map_err(|err| {
            AvatarStoreError::Backend(format!("failed encoding avatar snapshot: {err}"))
        })?;

        let temp_path = snapshot_temp_path(&self.path);
        fs::write(&temp_path, &payload).map_err(|err| self.write_failure(&err))?;

        if let Err(rename_err) = fs::rename(&temp_path, &self.path) {
            // Windows does not allow replacing existing files via rename.
            match fs::remove_file(&self.path) {
                Ok(()) => {}
                Err(err) if err.kind() == io::ErrorKind::NotFound => {}
                Err(err) => {
                    let _ = fs::remove_file(&temp_path);
                    return Err(AvatarStoreError::Backend(format!(
                        "failed replacing {} after rename error ({rename_err}): {err}",
                        self.path.display()
                    )));
                }
            }
            fs::rename(&temp_path, &self.path).map_err(|err| {
                let _ = fs::remove_file(&temp_path);
                self.write_failure(&err)
            })?;
        }
        Ok(())
    }
}

fn snapshot_temp_path(path: &Path) -> PathBuf {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    let file_name = path
        .file_name()
        .and_then(|value| value.to_str())
        .unwrap_or(AVATAR_CACHE_FILENAME);
    let now_nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_nanos())
        .unwrap_or(0);
    parent.join(format!(".{file_name}.{now_nanos}.tmp"))
}
