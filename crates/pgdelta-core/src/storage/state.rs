//! Persistence of the most recent snapshot per monitored target.
//!
//! File layout:
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │ HEADER (8 bytes, uncompressed)                           │
//! │   magic: [u8; 4]          = b"PGDS"                      │
//! │   format_version: u32 LE  = STATE_FORMAT_VERSION         │
//! ├──────────────────────────────────────────────────────────┤
//! │ BODY: postcard(BTreeMap<api_key, StoredState>)           │
//! │   StoredState.checksum: crc32 of data                    │
//! │   StoredState.data:     zstd(postcard(Snapshot))         │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! A header with a different magic or format version discards the whole
//! file. A damaged entry only discards that API key. Every save rewrites the
//! file through a `.tmp` sibling and an atomic rename, so a crash leaves
//! either the old or the new file in place.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::storage::model::Snapshot;

/// Increment this when state written by an older build must be ignored.
pub const STATE_FORMAT_VERSION: u32 = 1;

const MAGIC: [u8; 4] = *b"PGDS";
const HEADER_SIZE: usize = 8;
const ZSTD_LEVEL: i32 = 3;

/// Error type for saving state.
#[derive(Debug)]
pub enum StoreError {
    /// Writing the state file failed.
    Io(io::Error),
    /// Serializing the snapshot failed.
    Encode(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::Io(e) => write!(f, "state store I/O error: {}", e),
            StoreError::Encode(msg) => write!(f, "state store encode error: {}", msg),
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StoreError::Io(e) => Some(e),
            StoreError::Encode(_) => None,
        }
    }
}

impl From<io::Error> for StoreError {
    fn from(e: io::Error) -> Self {
        StoreError::Io(e)
    }
}

/// Storage of the previous snapshot, partitioned by API key.
///
/// `load` never fails: anything unreadable is reported as no previous state.
pub trait StateStore: Send + Sync {
    fn load(&self, api_key: &str) -> Option<Snapshot>;
    fn save(&self, api_key: &str, snapshot: &Snapshot) -> Result<(), StoreError>;
}

#[derive(Serialize, Deserialize)]
struct StoredState {
    checksum: u32,
    data: Vec<u8>,
}

impl StoredState {
    fn encode(snapshot: &Snapshot) -> Result<Self, StoreError> {
        let raw = postcard::to_allocvec(snapshot).map_err(|e| StoreError::Encode(e.to_string()))?;
        let data = zstd::encode_all(&raw[..], ZSTD_LEVEL)?;
        Ok(Self {
            checksum: crc32fast::hash(&data),
            data,
        })
    }

    fn decode(&self) -> Result<Snapshot, String> {
        let actual = crc32fast::hash(&self.data);
        if actual != self.checksum {
            return Err(format!(
                "checksum mismatch: expected {:08x}, got {:08x}",
                self.checksum, actual
            ));
        }
        let raw = zstd::decode_all(&self.data[..]).map_err(|e| e.to_string())?;
        postcard::from_bytes(&raw).map_err(|e| e.to_string())
    }
}

type StateOnDisk = BTreeMap<String, StoredState>;

enum ContainerError {
    VersionMismatch(u32),
    Corrupt(String),
}

fn encode_container(states: &StateOnDisk) -> Result<Vec<u8>, StoreError> {
    let body = postcard::to_allocvec(states).map_err(|e| StoreError::Encode(e.to_string()))?;
    let mut buf = Vec::with_capacity(HEADER_SIZE + body.len());
    buf.extend_from_slice(&MAGIC);
    buf.extend_from_slice(&STATE_FORMAT_VERSION.to_le_bytes());
    buf.extend_from_slice(&body);
    Ok(buf)
}

fn decode_container(data: &[u8]) -> Result<StateOnDisk, ContainerError> {
    if data.len() < HEADER_SIZE {
        return Err(ContainerError::Corrupt(format!(
            "truncated header: {} bytes",
            data.len()
        )));
    }
    if data[0..4] != MAGIC {
        return Err(ContainerError::Corrupt(format!(
            "invalid magic: expected PGDS, got {:?}",
            &data[0..4]
        )));
    }
    let version = u32::from_le_bytes([data[4], data[5], data[6], data[7]]);
    if version != STATE_FORMAT_VERSION {
        return Err(ContainerError::VersionMismatch(version));
    }
    postcard::from_bytes(&data[HEADER_SIZE..]).map_err(|e| ContainerError::Corrupt(e.to_string()))
}

/// Shortens an API key for log output.
pub fn masked(api_key: &str) -> String {
    let prefix: String = api_key.chars().take(4).collect();
    format!("{}****", prefix)
}

/// Path of the temporary file a save writes before renaming.
fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)?;
    }

    let tmp = tmp_path(path);
    let mut file = fs::File::create(&tmp)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    drop(file);

    fs::rename(tmp, path)
}

/// State store backed by a single file shared by all targets of the process.
pub struct FileStateStore {
    path: PathBuf,
    /// Serializes read-modify-write cycles of the file between worker threads.
    write_lock: Mutex<()>,
}

impl FileStateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();

        // Cleanup a save interrupted by a crash
        let tmp = tmp_path(&path);
        if tmp.exists() {
            match fs::remove_file(&tmp) {
                Ok(()) => debug!(path = %tmp.display(), "removed leftover temporary state file"),
                Err(e) => warn!(path = %tmp.display(), error = %e, "failed to remove temporary state file"),
            }
        }

        Self {
            path,
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the container. Format problems start a fresh container; I/O
    /// errors are returned so a save never drops other targets' entries.
    fn read_container(&self) -> io::Result<StateOnDisk> {
        self.parse_container(fs::read(&self.path))
    }

    fn parse_container(&self, read: io::Result<Vec<u8>>) -> io::Result<StateOnDisk> {
        let data = match read {
            Ok(d) => d,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(StateOnDisk::new()),
            Err(e) => return Err(e),
        };

        match decode_container(&data) {
            Ok(states) => Ok(states),
            Err(ContainerError::VersionMismatch(found)) => {
                info!(
                    path = %self.path.display(),
                    found,
                    expected = STATE_FORMAT_VERSION,
                    "ignoring state file written in an incompatible format"
                );
                Ok(StateOnDisk::new())
            }
            Err(ContainerError::Corrupt(msg)) => {
                warn!(path = %self.path.display(), error = %msg,
                    "state file is unreadable, continuing without previous state");
                Ok(StateOnDisk::new())
            }
        }
    }

    /// Merges `entry` into the container read as `current` and rewrites the
    /// file. Caller holds the write lock.
    fn update(
        &self,
        current: io::Result<Vec<u8>>,
        api_key: &str,
        entry: StoredState,
    ) -> Result<(), StoreError> {
        let mut states = self.parse_container(current)?;
        states.insert(api_key.to_string(), entry);
        let bytes = encode_container(&states)?;
        write_atomic(&self.path, &bytes)?;

        debug!(
            api_key = %masked(api_key),
            targets = states.len(),
            bytes = bytes.len(),
            "state saved"
        );
        Ok(())
    }
}

impl StateStore for FileStateStore {
    fn load(&self, api_key: &str) -> Option<Snapshot> {
        let mut states = match self.read_container() {
            Ok(states) => states,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e,
                    "failed to read state file, continuing without previous state");
                return None;
            }
        };
        let stored = states.remove(api_key)?;
        match stored.decode() {
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                warn!(api_key = %masked(api_key), error = %e,
                    "discarding unreadable previous state");
                None
            }
        }
    }

    fn save(&self, api_key: &str, snapshot: &Snapshot) -> Result<(), StoreError> {
        let entry = StoredState::encode(snapshot)?;

        let _guard = self
            .write_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        self.update(fs::read(&self.path), api_key, entry)
    }
}

/// State store that lives only as long as the process.
#[derive(Default)]
pub struct MemoryStateStore {
    states: Mutex<HashMap<String, Snapshot>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StateStore for MemoryStateStore {
    fn load(&self, api_key: &str) -> Option<Snapshot> {
        self.states
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(api_key)
            .cloned()
    }

    fn save(&self, api_key: &str, snapshot: &Snapshot) -> Result<(), StoreError> {
        self.states
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(api_key.to_string(), snapshot.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::model::{StatementKey, StatementStats};
    use std::sync::Arc;
    use tempfile::tempdir;

    fn snapshot(collected_at: i64, calls: i64) -> Snapshot {
        let mut s = Snapshot {
            collected_at,
            ..Snapshot::default()
        };
        s.statement_stats.insert(
            StatementKey {
                database_oid: 16384,
                role_oid: 10,
                query_id: 42,
            },
            StatementStats {
                calls,
                total_time: 1.5,
                min_time: Some(0.1),
                ..StatementStats::default()
            },
        );
        s
    }

    #[test]
    fn load_without_file_returns_none() {
        let dir = tempdir().unwrap();
        let store = FileStateStore::new(dir.path().join("state"));
        assert!(store.load("key").is_none());
    }

    #[test]
    fn save_and_load_round_trip_across_instances() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state");

        FileStateStore::new(&path)
            .save("key", &snapshot(100, 7))
            .unwrap();

        let loaded = FileStateStore::new(&path).load("key").unwrap();
        assert_eq!(loaded, snapshot(100, 7));
    }

    #[test]
    fn save_replaces_previous_snapshot_for_key() {
        let dir = tempdir().unwrap();
        let store = FileStateStore::new(dir.path().join("state"));

        store.save("key", &snapshot(100, 7)).unwrap();
        store.save("key", &snapshot(110, 9)).unwrap();

        assert_eq!(store.load("key").unwrap().collected_at, 110);
    }

    #[test]
    fn keys_are_partitioned() {
        let dir = tempdir().unwrap();
        let store = FileStateStore::new(dir.path().join("state"));

        store.save("a", &snapshot(100, 1)).unwrap();
        store.save("b", &snapshot(200, 2)).unwrap();

        assert_eq!(store.load("a").unwrap().collected_at, 100);
        assert_eq!(store.load("b").unwrap().collected_at, 200);
        assert!(store.load("c").is_none());
    }

    #[test]
    fn format_version_mismatch_discards_everything() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state");
        let store = FileStateStore::new(&path);
        store.save("a", &snapshot(100, 1)).unwrap();
        store.save("b", &snapshot(200, 2)).unwrap();

        let mut data = fs::read(&path).unwrap();
        data[4..8].copy_from_slice(&(STATE_FORMAT_VERSION + 1).to_le_bytes());
        fs::write(&path, data).unwrap();

        assert!(store.load("a").is_none());
        assert!(store.load("b").is_none());
    }

    #[test]
    fn garbage_file_is_treated_as_empty_and_overwritten() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state");
        fs::write(&path, b"definitely not a state file").unwrap();

        let store = FileStateStore::new(&path);
        assert!(store.load("key").is_none());

        store.save("key", &snapshot(100, 1)).unwrap();
        assert_eq!(store.load("key").unwrap().collected_at, 100);
    }

    #[test]
    fn damaged_entry_only_affects_its_key() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state");

        let mut states = StateOnDisk::new();
        states.insert("good".to_string(), StoredState::encode(&snapshot(100, 1)).unwrap());
        states.insert(
            "bad".to_string(),
            StoredState {
                checksum: 0,
                data: vec![1, 2, 3],
            },
        );
        fs::write(&path, encode_container(&states).unwrap()).unwrap();

        let store = FileStateStore::new(&path);
        assert!(store.load("bad").is_none());
        assert_eq!(store.load("good").unwrap().collected_at, 100);
    }

    #[test]
    fn read_error_during_save_keeps_other_keys() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state");
        let store = FileStateStore::new(&path);
        store.save("a", &snapshot(100, 1)).unwrap();
        store.save("b", &snapshot(200, 2)).unwrap();

        let entry = StoredState::encode(&snapshot(300, 3)).unwrap();
        let err = store
            .update(Err(io::Error::other("input/output error")), "c", entry)
            .unwrap_err();
        assert!(matches!(err, StoreError::Io(_)));

        assert_eq!(store.load("a").unwrap().collected_at, 100);
        assert_eq!(store.load("b").unwrap().collected_at, 200);
        assert!(store.load("c").is_none());
    }

    #[test]
    fn unreadable_path_fails_save_and_load_degrades() {
        let dir = tempdir().unwrap();
        // A directory where the file should be cannot be read as one.
        let path = dir.path().join("state");
        fs::create_dir(&path).unwrap();
        let store = FileStateStore::new(&path);

        assert!(matches!(
            store.save("key", &snapshot(100, 1)),
            Err(StoreError::Io(_))
        ));
        assert!(store.load("key").is_none());
        assert!(path.is_dir());
    }

    #[test]
    fn leftover_tmp_file_is_removed_on_open() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state");
        FileStateStore::new(&path)
            .save("key", &snapshot(100, 1))
            .unwrap();

        let tmp = tmp_path(&path);
        fs::write(&tmp, b"half-written").unwrap();

        let store = FileStateStore::new(&path);
        assert!(!tmp.exists());
        assert_eq!(store.load("key").unwrap().collected_at, 100);
    }

    #[test]
    fn save_creates_missing_parent_directory() {
        let dir = tempdir().unwrap();
        let store = FileStateStore::new(dir.path().join("nested").join("state"));
        store.save("key", &snapshot(100, 1)).unwrap();
        assert!(store.load("key").is_some());
    }

    #[test]
    fn concurrent_saves_for_different_keys_all_land() {
        let dir = tempdir().unwrap();
        let store = Arc::new(FileStateStore::new(dir.path().join("state")));

        std::thread::scope(|scope| {
            for i in 0..8 {
                let store = Arc::clone(&store);
                scope.spawn(move || {
                    store
                        .save(&format!("key-{}", i), &snapshot(i as i64, i as i64))
                        .unwrap();
                });
            }
        });

        for i in 0..8 {
            let loaded = store.load(&format!("key-{}", i)).unwrap();
            assert_eq!(loaded.collected_at, i as i64);
        }
    }

    #[test]
    fn memory_store_round_trip() {
        let store = MemoryStateStore::new();
        assert!(store.load("key").is_none());
        store.save("key", &snapshot(100, 1)).unwrap();
        assert_eq!(store.load("key").unwrap(), snapshot(100, 1));
    }

    #[test]
    fn masked_key_hides_suffix() {
        assert_eq!(masked("abcdefgh"), "abcd****");
        assert_eq!(masked("ab"), "ab****");
    }
}
