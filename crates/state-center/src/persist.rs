//! Best-effort persistence of page records.
//!
//! Records are keyed by [`PageKey::storage_key`]. In-memory state stays authoritative; a sink
//! failure is logged by the reconciler and never fails the update that triggered it.
//! `put` and `remove` never block on disk; sinks with a durable copy write it in `flush`.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use serde_json::to_writer_pretty;
use tracing::warn;

use pagesync_core_types::{PageKey, SyncError};

use crate::model::PageRecord;

pub trait PersistenceSink: Send + Sync {
    fn name(&self) -> &str;
    fn put(&self, key: &PageKey, record: &PageRecord) -> Result<(), SyncError>;
    fn remove(&self, key: &PageKey) -> Result<(), SyncError>;

    /// Writes buffered changes out. Called off the update path.
    fn flush(&self) -> Result<(), SyncError> {
        Ok(())
    }
}

/// Local copy kept next to the live store.
#[derive(Default)]
pub struct MemorySink {
    entries: Mutex<BTreeMap<String, PageRecord>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> BTreeMap<String, PageRecord> {
        self.entries.lock().clone()
    }
}

impl PersistenceSink for MemorySink {
    fn name(&self) -> &str {
        "memory"
    }

    fn put(&self, key: &PageKey, record: &PageRecord) -> Result<(), SyncError> {
        self.entries.lock().insert(key.storage_key(), record.clone());
        Ok(())
    }

    fn remove(&self, key: &PageKey) -> Result<(), SyncError> {
        self.entries.lock().remove(&key.storage_key());
        Ok(())
    }
}

/// Durable copy: the whole map is rewritten as one pretty-printed JSON object on `flush`,
/// and only when something changed since the last write.
pub struct JsonFileSink {
    path: PathBuf,
    entries: Mutex<BTreeMap<String, PageRecord>>,
    dirty: AtomicBool,
}

impl JsonFileSink {
    /// Opens the sink, loading whatever an earlier run left behind.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, SyncError> {
        let path = path.into();
        let entries = if path.exists() {
            read_all(&path)?
        } else {
            BTreeMap::new()
        };
        Ok(Self {
            path,
            entries: Mutex::new(entries),
            dirty: AtomicBool::new(false),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    fn write_file(&self, entries: &BTreeMap<String, PageRecord>) -> Result<(), SyncError> {
        if let Some(parent) = self.path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(io_error)?;
        }
        let file = File::create(&self.path).map_err(io_error)?;
        let mut writer = BufWriter::new(file);
        to_writer_pretty(&mut writer, entries)
            .map_err(|err| SyncError::Transport(format!("serialize records: {err}")))?;
        writer.flush().map_err(io_error)?;
        Ok(())
    }
}

impl PersistenceSink for JsonFileSink {
    fn name(&self) -> &str {
        "json-file"
    }

    fn put(&self, key: &PageKey, record: &PageRecord) -> Result<(), SyncError> {
        self.entries.lock().insert(key.storage_key(), record.clone());
        self.dirty.store(true, Ordering::Release);
        Ok(())
    }

    fn remove(&self, key: &PageKey) -> Result<(), SyncError> {
        if self.entries.lock().remove(&key.storage_key()).is_some() {
            self.dirty.store(true, Ordering::Release);
        }
        Ok(())
    }

    fn flush(&self) -> Result<(), SyncError> {
        if !self.dirty.swap(false, Ordering::AcqRel) {
            return Ok(());
        }
        let snapshot = self.entries.lock().clone();
        if let Err(err) = self.write_file(&snapshot) {
            self.dirty.store(true, Ordering::Release);
            return Err(err);
        }
        Ok(())
    }
}

impl Drop for JsonFileSink {
    fn drop(&mut self) {
        if let Err(err) = self.flush() {
            warn!(path = %self.path.display(), %err, "final record flush failed");
        }
    }
}

/// Reads a file written by [`JsonFileSink`].
pub fn read_all(path: impl AsRef<Path>) -> Result<BTreeMap<String, PageRecord>, SyncError> {
    let file = File::open(path.as_ref()).map_err(io_error)?;
    serde_json::from_reader(BufReader::new(file))
        .map_err(|err| SyncError::Transport(format!("parse records: {err}")))
}

fn io_error(err: std::io::Error) -> SyncError {
    SyncError::Transport(format!("record file: {err}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::PagePhase;
    use pagesync_core_types::TabId;

    #[test]
    fn file_sink_round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("records.json");
        let key = PageKey::new(TabId(3), "https://shop.test/cart?x=1");
        {
            let sink = JsonFileSink::open(&path).unwrap();
            let record = PageRecord::new(&key.url, PagePhase::Ready, "content", 42);
            sink.put(&key, &record).unwrap();
        }

        let reopened = JsonFileSink::open(&path).unwrap();
        let stored = read_all(reopened.path()).unwrap();
        let (raw_key, record) = stored.iter().next().unwrap();
        assert_eq!(PageKey::from_storage_key(raw_key), Some(key.clone()));
        assert_eq!(record.last_update.timestamp, 42);

        reopened.remove(&key).unwrap();
        assert!(reopened.is_dirty());
        reopened.flush().unwrap();
        assert!(read_all(&path).unwrap().is_empty());
    }

    #[test]
    fn file_sink_buffers_until_flushed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("records.json");
        let sink = JsonFileSink::open(&path).unwrap();
        let first = PageKey::new(TabId(4), "https://shop.test/a");
        let second = PageKey::new(TabId(4), "https://shop.test/b");
        sink.put(&first, &PageRecord::new(&first.url, PagePhase::Ready, "content", 1))
            .unwrap();
        sink.put(&second, &PageRecord::new(&second.url, PagePhase::Ready, "content", 2))
            .unwrap();
        assert!(!path.exists());
        assert!(sink.is_dirty());

        sink.flush().unwrap();
        assert_eq!(read_all(&path).unwrap().len(), 2);
        assert!(!sink.is_dirty());

        // removing an unknown key leaves nothing to write
        sink.remove(&PageKey::new(TabId(4), "https://shop.test/missing"))
            .unwrap();
        assert!(!sink.is_dirty());
        sink.remove(&first).unwrap();
        assert_eq!(read_all(&path).unwrap().len(), 2);
        sink.flush().unwrap();
        assert_eq!(read_all(&path).unwrap().len(), 1);
    }
}
