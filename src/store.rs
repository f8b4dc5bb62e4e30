//! Durable alarm persistence.
//!
//! One JSON document per alarm id under a state directory. Writes go through
//! a temp file and an atomic rename so a crash never leaves a torn record.
//! Unreadable individual records are skipped (logged) at load time so one
//! corrupt file cannot abort recovery of the remaining alarms.

use crate::alarm::{Alarm, AlarmId};
use crate::error::{AlarmError, Result};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, warn};

/// Durable key-value record store for alarms.
pub trait AlarmStore: Send + Sync {
    /// Load every readable record, ordered by creation time.
    ///
    /// Individually unreadable records are skipped by the implementation,
    /// not surfaced as errors.
    fn load_all(&self) -> Result<Vec<Alarm>>;

    /// Write or replace the record for `alarm.id`.
    fn put(&self, alarm: &Alarm) -> Result<()>;

    /// Remove the record for `id`. Removing an absent record is not an error.
    fn remove(&self, id: AlarmId) -> Result<()>;
}

/// File-backed store keeping `<dir>/<id>.json` per alarm.
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    /// Create a store rooted at `dir`. The directory is created lazily on
    /// the first write.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Default state directory (`~/.local/share/chime/alarms` or the
    /// platform equivalent).
    #[must_use]
    pub fn default_dir() -> Option<PathBuf> {
        dirs::data_dir().map(|d| d.join("chime").join("alarms"))
    }

    fn record_path(&self, id: AlarmId) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }
}

impl AlarmStore for FileStore {
    fn load_all(&self) -> Result<Vec<Alarm>> {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(AlarmError::Persistence(format!(
                    "cannot read state directory {}: {e}",
                    self.dir.display()
                )));
            }
        };

        let mut alarms = Vec::new();
        for entry in entries {
            let path = match entry {
                Ok(entry) => entry.path(),
                Err(e) => {
                    warn!("skipping unreadable state directory entry: {e}");
                    continue;
                }
            };
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            let bytes = match std::fs::read(&path) {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!("skipping unreadable alarm record {}: {e}", path.display());
                    continue;
                }
            };
            match serde_json::from_slice::<Alarm>(&bytes) {
                Ok(alarm) => alarms.push(alarm),
                Err(e) => {
                    warn!("skipping malformed alarm record {}: {e}", path.display());
                }
            }
        }

        alarms.sort_by_key(|a| (a.created_at_ms, a.id));
        debug!(count = alarms.len(), "loaded alarm records from disk");
        Ok(alarms)
    }

    fn put(&self, alarm: &Alarm) -> Result<()> {
        std::fs::create_dir_all(&self.dir).map_err(|e| {
            AlarmError::Persistence(format!(
                "cannot create state directory {}: {e}",
                self.dir.display()
            ))
        })?;

        let json = serde_json::to_vec_pretty(alarm)
            .map_err(|e| AlarmError::Persistence(format!("cannot serialize alarm record: {e}")))?;

        let path = self.record_path(alarm.id);
        let tmp_path = path.with_extension("tmp");
        std::fs::write(&tmp_path, json).map_err(|e| {
            AlarmError::Persistence(format!("cannot write alarm record temp file: {e}"))
        })?;
        std::fs::rename(&tmp_path, &path)
            .map_err(|e| AlarmError::Persistence(format!("cannot finalize alarm record: {e}")))?;
        Ok(())
    }

    fn remove(&self, id: AlarmId) -> Result<()> {
        match std::fs::remove_file(self.record_path(id)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(AlarmError::Persistence(format!(
                "cannot delete alarm record {id}: {e}"
            ))),
        }
    }
}

/// In-memory store for tests and ephemeral deployments.
///
/// Supports injected write failures so callers can verify that a failed
/// durable write leaves the manager's in-memory state untouched.
#[derive(Default)]
pub struct MemoryStore {
    records: Mutex<HashMap<AlarmId, Alarm>>,
    fail_writes: AtomicBool,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `put`/`remove` fail with a persistence error.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Number of records currently held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.lock().map(|r| r.len()).unwrap_or(0)
    }

    /// `true` when no records are held.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check_writable(&self) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(AlarmError::Persistence(
                "injected write failure".to_owned(),
            ));
        }
        Ok(())
    }
}

impl AlarmStore for MemoryStore {
    fn load_all(&self) -> Result<Vec<Alarm>> {
        let records = self
            .records
            .lock()
            .map_err(|_| AlarmError::Persistence("record table poisoned".to_owned()))?;
        let mut alarms: Vec<Alarm> = records.values().cloned().collect();
        alarms.sort_by_key(|a| (a.created_at_ms, a.id));
        Ok(alarms)
    }

    fn put(&self, alarm: &Alarm) -> Result<()> {
        self.check_writable()?;
        let mut records = self
            .records
            .lock()
            .map_err(|_| AlarmError::Persistence("record table poisoned".to_owned()))?;
        records.insert(alarm.id, alarm.clone());
        Ok(())
    }

    fn remove(&self, id: AlarmId) -> Result<()> {
        self.check_writable()?;
        let mut records = self
            .records
            .lock()
            .map_err(|_| AlarmError::Persistence("record table poisoned".to_owned()))?;
        records.remove(&id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use crate::alarm::{AlarmState, Schedule};

    fn sample_alarm(created_at_ms: u64) -> Alarm {
        Alarm::new(
            AlarmId::new(),
            Schedule::Fixed {
                fire_at_ms: created_at_ms + 5_000,
            },
            serde_json::json!({ "alert_title": "Wake up" }),
            created_at_ms,
        )
    }

    #[test]
    fn file_store_round_trips_records() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FileStore::new(dir.path());

        let first = sample_alarm(100);
        let second = sample_alarm(200);
        store.put(&second).unwrap();
        store.put(&first).unwrap();

        let loaded = store.load_all().unwrap();
        assert_eq!(loaded.len(), 2);
        // Creation order, not write order.
        assert_eq!(loaded[0].id, first.id);
        assert_eq!(loaded[1].id, second.id);
        assert_eq!(loaded[0].state, AlarmState::Armed);
    }

    #[test]
    fn file_store_put_replaces_existing_record() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FileStore::new(dir.path());

        let mut alarm = sample_alarm(100);
        store.put(&alarm).unwrap();
        alarm.state = AlarmState::Fired;
        store.put(&alarm).unwrap();

        let loaded = store.load_all().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].state, AlarmState::Fired);
    }

    #[test]
    fn file_store_remove_is_idempotent() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FileStore::new(dir.path());

        let alarm = sample_alarm(100);
        store.put(&alarm).unwrap();
        store.remove(alarm.id).unwrap();
        store.remove(alarm.id).unwrap();
        assert!(store.load_all().unwrap().is_empty());
    }

    #[test]
    fn missing_state_directory_loads_empty() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FileStore::new(dir.path().join("never-created"));
        assert!(store.load_all().unwrap().is_empty());
    }

    #[test]
    fn malformed_record_is_skipped_not_fatal() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FileStore::new(dir.path());

        let alarm = sample_alarm(100);
        store.put(&alarm).unwrap();
        std::fs::write(dir.path().join("not-an-alarm.json"), b"{ nope").unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"ignored").unwrap();

        let loaded = store.load_all().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].id, alarm.id);
    }

    #[test]
    fn memory_store_injected_failure_blocks_writes() {
        let store = MemoryStore::new();
        let alarm = sample_alarm(100);
        store.put(&alarm).unwrap();

        store.fail_writes(true);
        assert!(matches!(
            store.put(&alarm),
            Err(AlarmError::Persistence(_))
        ));
        assert!(matches!(
            store.remove(alarm.id),
            Err(AlarmError::Persistence(_))
        ));

        store.fail_writes(false);
        store.remove(alarm.id).unwrap();
        assert!(store.is_empty());
    }
}
