//! File-backed credential slots.
//!
//! Slots live in a single JSON object on disk. Writes go through a temporary
//! file and a rename so a crash never leaves a half-written credential file,
//! and other processes observe either the old or the new contents.

use crate::watch::{StorageEvent, EVENT_CHANNEL_CAPACITY};
use crate::{
    ContextId, CredentialStore, StorageChange, StorageError, StorageResult, StorageWatcher,
};
use notify::{RecommendedWatcher, RecursiveMode};
use notify_debouncer_mini::{new_debouncer, DebounceEventResult, Debouncer};
use std::collections::HashMap;
use std::ffi::OsString;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

/// How long file-system events are coalesced before the file is re-read.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(200);

type Slots = HashMap<String, String>;

/// Credential slots persisted in a JSON file.
pub struct FileCredentialStore {
    path: PathBuf,
    context: ContextId,
    debounce: Duration,
    /// Slot values as last written or observed by this handle.
    known: Arc<Mutex<Slots>>,
}

impl FileCredentialStore {
    /// Open (or lazily create) the credential file at `path`.
    pub fn new(path: impl Into<PathBuf>) -> StorageResult<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let known = read_slots(&path)?;

        Ok(Self {
            path,
            context: ContextId::next(),
            debounce: DEFAULT_DEBOUNCE,
            known: Arc::new(Mutex::new(known)),
        })
    }

    /// Set the debounce window for file-system events.
    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    /// Location of the credential file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Context id of this handle.
    pub fn context_id(&self) -> ContextId {
        self.context
    }

    /// Directory watched for changes. Atomic writes replace the file itself,
    /// so the parent is watched rather than the file.
    fn watch_dir(&self) -> PathBuf {
        self.path
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."))
    }
}

impl CredentialStore for FileCredentialStore {
    fn set(&self, key: &str, value: &str) -> StorageResult<()> {
        debug!(path = %self.path.display(), key = %key, "Writing credential slot");

        let mut known = self.known.lock().unwrap_or_else(PoisonError::into_inner);
        let mut slots = read_slots(&self.path)?;
        slots.insert(key.to_string(), value.to_string());
        write_slots(&self.path, &slots)?;
        known.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn get(&self, key: &str) -> StorageResult<Option<String>> {
        Ok(read_slots(&self.path)?.remove(key))
    }

    fn delete(&self, key: &str) -> StorageResult<bool> {
        debug!(path = %self.path.display(), key = %key, "Deleting credential slot");

        let mut known = self.known.lock().unwrap_or_else(PoisonError::into_inner);
        let mut slots = read_slots(&self.path)?;
        let removed = slots.remove(key).is_some();
        if removed {
            write_slots(&self.path, &slots)?;
        }
        known.remove(key);
        Ok(removed)
    }

    fn watch(&self) -> Option<StorageWatcher> {
        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                warn!("No tokio runtime available, credential file changes will not be observed");
                return None;
            }
        };

        let (fs_tx, fs_rx) = mpsc::unbounded_channel();
        let mut debouncer = match new_debouncer(self.debounce, move |result: DebounceEventResult| {
            let _ = fs_tx.send(result);
        }) {
            Ok(debouncer) => debouncer,
            Err(e) => {
                warn!(error = %e, "Failed to create credential file watcher");
                return None;
            }
        };

        let watch_dir = self.watch_dir();
        if let Err(e) = debouncer
            .watcher()
            .watch(&watch_dir, RecursiveMode::NonRecursive)
        {
            warn!(path = %watch_dir.display(), error = %e, "Failed to watch credential directory");
            return None;
        }
        info!(path = %self.path.display(), "Watching credential file");

        let (tx, rx) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        runtime.spawn(forward_changes(
            debouncer,
            self.path.clone(),
            self.known.clone(),
            fs_rx,
            tx,
        ));

        Some(StorageWatcher::new(self.context, rx))
    }
}

/// Turn debounced file-system events into slot changes.
///
/// Owns the debouncer; watching stops when this task ends.
async fn forward_changes(
    _debouncer: Debouncer<RecommendedWatcher>,
    path: PathBuf,
    known: Arc<Mutex<Slots>>,
    mut fs_events: mpsc::UnboundedReceiver<DebounceEventResult>,
    tx: broadcast::Sender<StorageEvent>,
) {
    let file_name: Option<OsString> = path.file_name().map(OsString::from);

    while let Some(result) = fs_events.recv().await {
        if tx.receiver_count() == 0 {
            debug!(path = %path.display(), "Credential watcher dropped, stopping");
            break;
        }

        match result {
            Ok(events) => {
                let touches_file = events
                    .iter()
                    .any(|event| event.path.file_name() == file_name.as_deref());
                if !touches_file {
                    continue;
                }
            }
            Err(e) => {
                warn!(path = %path.display(), error = ?e, "Credential file watcher error");
                continue;
            }
        }

        // Diff under the lock so a concurrent write by this handle is never
        // mistaken for a foreign change.
        let changes = {
            let mut known = known.lock().unwrap_or_else(PoisonError::into_inner);
            let current = match read_slots(&path) {
                Ok(slots) => slots,
                Err(e) => {
                    debug!(path = %path.display(), error = %e, "Failed to re-read credential file");
                    continue;
                }
            };
            let changes = diff_slots(&known, &current);
            *known = current;
            changes
        };

        for change in changes {
            let _ = tx.send(StorageEvent {
                origin: ContextId::external(),
                change,
            });
        }
    }
}

fn diff_slots(before: &Slots, after: &Slots) -> Vec<StorageChange> {
    let mut changes: Vec<StorageChange> = after
        .iter()
        .filter(|(key, value)| before.get(*key) != Some(*value))
        .map(|(key, value)| StorageChange::Updated {
            key: key.clone(),
            value: value.clone(),
        })
        .chain(
            before
                .keys()
                .filter(|key| !after.contains_key(*key))
                .map(|key| StorageChange::Removed { key: key.clone() }),
        )
        .collect();
    changes.sort_by(|a, b| a.key().cmp(&b.key()));
    changes
}

fn read_slots(path: &Path) -> StorageResult<Slots> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Slots::new()),
        Err(e) => return Err(StorageError::Io(e)),
    };

    if content.trim().is_empty() {
        return Ok(Slots::new());
    }

    serde_json::from_str(&content).map_err(|e| {
        StorageError::Encoding(format!("invalid credential file {}: {}", path.display(), e))
    })
}

fn write_slots(path: &Path, slots: &Slots) -> StorageResult<()> {
    let content = serde_json::to_string_pretty(slots)
        .map_err(|e| StorageError::Encoding(e.to_string()))?;
    atomic_write(path, &content)
}

fn atomic_write(path: &Path, content: &str) -> StorageResult<()> {
    let dir = path
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| StorageError::InvalidPath(path.display().to_string()))?;

    let tmp_path = dir.join(format!(
        ".{}.tmp.{}",
        file_name,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos()
    ));

    let write_result = (|| -> io::Result<()> {
        let mut options = fs::OpenOptions::new();
        options.write(true).create_new(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }

        let mut file = options.open(&tmp_path)?;
        file.write_all(content.as_bytes())?;
        file.sync_all()?;
        fs::rename(&tmp_path, path)?;

        if let Ok(parent_dir) = fs::File::open(dir) {
            let _ = parent_dir.sync_all();
        }
        Ok(())
    })();

    if let Err(e) = write_result {
        let _ = fs::remove_file(&tmp_path);
        return Err(StorageError::Io(e));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::StorageKeys;
    use tempfile::TempDir;

    fn store_in(dir: &TempDir) -> FileCredentialStore {
        FileCredentialStore::new(dir.path().join("credentials.json"))
            .unwrap()
            .with_debounce(Duration::from_millis(50))
    }

    #[test]
    fn test_missing_file_reads_as_empty() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);

        assert_eq!(store.get(StorageKeys::REFRESH_TOKEN).unwrap(), None);
        assert!(!store.delete(StorageKeys::REFRESH_TOKEN).unwrap());
    }

    #[test]
    fn test_values_survive_reopen() {
        let dir = TempDir::new().unwrap();
        store_in(&dir)
            .set(StorageKeys::REFRESH_TOKEN, "rt-1")
            .unwrap();

        let reopened = store_in(&dir);
        assert_eq!(
            reopened.get(StorageKeys::REFRESH_TOKEN).unwrap(),
            Some("rt-1".to_string())
        );
        assert!(reopened.delete(StorageKeys::REFRESH_TOKEN).unwrap());
        assert!(!reopened.has(StorageKeys::REFRESH_TOKEN).unwrap());
    }

    #[test]
    fn test_corrupt_file_is_an_encoding_error() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        fs::write(store.path(), "not json").unwrap();

        assert!(matches!(
            store.get(StorageKeys::REFRESH_TOKEN),
            Err(StorageError::Encoding(_))
        ));
    }

    #[cfg(unix)]
    #[test]
    fn test_file_is_private_to_owner() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        store.set(StorageKeys::REFRESH_TOKEN, "rt-1").unwrap();

        let mode = fs::metadata(store.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn test_diff_slots_reports_updates_and_removals() {
        let before = Slots::from([
            ("a".to_string(), "1".to_string()),
            ("b".to_string(), "2".to_string()),
        ]);
        let after = Slots::from([
            ("a".to_string(), "1".to_string()),
            ("c".to_string(), "3".to_string()),
        ]);

        assert_eq!(
            diff_slots(&before, &after),
            vec![
                StorageChange::Removed {
                    key: "b".to_string()
                },
                StorageChange::Updated {
                    key: "c".to_string(),
                    value: "3".to_string()
                },
            ]
        );
    }

    #[test]
    fn test_watch_needs_a_runtime() {
        let dir = TempDir::new().unwrap();
        assert!(store_in(&dir).watch().is_none());
    }

    #[tokio::test]
    async fn test_watcher_ignores_own_writes_and_sees_foreign_delete() {
        let dir = TempDir::new().unwrap();
        let ours = store_in(&dir);
        let theirs = store_in(&dir);
        let mut watcher = ours.watch().expect("runtime is available");

        ours.set(StorageKeys::REFRESH_TOKEN, "rt-1").unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        theirs.delete(StorageKeys::REFRESH_TOKEN).unwrap();

        let change = tokio::time::timeout(Duration::from_secs(5), watcher.changed())
            .await
            .expect("change observed")
            .expect("watcher open");
        assert_eq!(
            change,
            StorageChange::Removed {
                key: StorageKeys::REFRESH_TOKEN.to_string()
            }
        );
    }
}
