//! Stream storage backends.
//!
//! A stream is an append-only list of [`Item`]s keyed by an opaque string
//! (usually a session key). Both backends here are synchronous; callers that
//! need to avoid blocking an async runtime should go through
//! [`crate::async_merkle::AsyncMerkle`] instead of calling these directly.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::error::StoreError;

/// A single appended record in a stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Item {
    pub children: Vec<String>,
    pub hash: String,
    pub timestamp: String,
    pub event: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

/// Append-only storage backend for streams of [`Item`]s.
pub trait StreamStorage: Send + Sync {
    fn append_to_stream(&self, stream_key: &str, item: Item) -> Result<(), StoreError>;
    fn rename_or_alias_stream(&self, from: &str, to: &str) -> Result<(), StoreError>;
    fn get_stream_data(&self, stream_key: &str) -> Result<Option<Vec<Item>>, StoreError>;
    fn delete_stream(&self, stream_key: &str) -> Result<(), StoreError>;
    fn most_recent_item(&self, stream_key: &str) -> Result<Option<Item>, StoreError> {
        Ok(self
            .get_stream_data(stream_key)?
            .and_then(|items| items.into_iter().last()))
    }
    fn walk_streams(&self) -> Result<Vec<(String, Vec<Item>)>, StoreError>;
}

impl StreamStorage for Box<dyn StreamStorage> {
    fn append_to_stream(&self, stream_key: &str, item: Item) -> Result<(), StoreError> {
        (**self).append_to_stream(stream_key, item)
    }
    fn rename_or_alias_stream(&self, from: &str, to: &str) -> Result<(), StoreError> {
        (**self).rename_or_alias_stream(from, to)
    }
    fn get_stream_data(&self, stream_key: &str) -> Result<Option<Vec<Item>>, StoreError> {
        (**self).get_stream_data(stream_key)
    }
    fn delete_stream(&self, stream_key: &str) -> Result<(), StoreError> {
        (**self).delete_stream(stream_key)
    }
    fn most_recent_item(&self, stream_key: &str) -> Result<Option<Item>, StoreError> {
        (**self).most_recent_item(stream_key)
    }
    fn walk_streams(&self) -> Result<Vec<(String, Vec<Item>)>, StoreError> {
        (**self).walk_streams()
    }
}

// ---------------------------------------------------------------------------
// In-memory backend
// ---------------------------------------------------------------------------

/// A process-local backend. Useful for tests and ephemeral deployments.
#[derive(Default)]
pub struct InMemoryStore {
    streams: Mutex<HashMap<String, Vec<Item>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StreamStorage for InMemoryStore {
    fn append_to_stream(&self, stream_key: &str, item: Item) -> Result<(), StoreError> {
        let mut streams = self.streams.lock().expect("store mutex poisoned");
        streams.entry(stream_key.to_owned()).or_default().push(item);
        Ok(())
    }

    fn rename_or_alias_stream(&self, from: &str, to: &str) -> Result<(), StoreError> {
        if from == to {
            return Ok(());
        }
        let mut streams = self.streams.lock().expect("store mutex poisoned");
        if let Some(items) = streams.remove(from) {
            streams.insert(to.to_owned(), items);
        }
        Ok(())
    }

    fn get_stream_data(&self, stream_key: &str) -> Result<Option<Vec<Item>>, StoreError> {
        let streams = self.streams.lock().expect("store mutex poisoned");
        Ok(streams.get(stream_key).cloned())
    }

    fn delete_stream(&self, stream_key: &str) -> Result<(), StoreError> {
        let mut streams = self.streams.lock().expect("store mutex poisoned");
        streams.remove(stream_key);
        Ok(())
    }

    fn walk_streams(&self) -> Result<Vec<(String, Vec<Item>)>, StoreError> {
        // Snapshot under the lock, then release it before the caller iterates.
        let streams = self.streams.lock().expect("store mutex poisoned");
        Ok(streams
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }
}

// ---------------------------------------------------------------------------
// Filesystem backend
// ---------------------------------------------------------------------------

/// One JSONL file per stream, named by the hex SHA-256 digest of the stream
/// key. Because the on-disk filename is a hash, a reverse map from filename
/// back to the original key is kept in memory so `walk_streams` can report
/// real keys — populated lazily, only for streams this process has touched.
pub struct FsStore {
    root: PathBuf,
    key_map: Mutex<HashMap<String, String>>,
}

impl FsStore {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            key_map: Mutex::new(HashMap::new()),
        })
    }

    fn file_path(&self, stream_key: &str) -> PathBuf {
        let digest = Sha256::digest(stream_key.as_bytes());
        let filename = hex::encode(digest);
        self.key_map
            .lock()
            .expect("key map mutex poisoned")
            .insert(filename.clone(), stream_key.to_owned());
        self.root.join(filename)
    }

    fn read_items(path: &Path) -> Result<Option<Vec<Item>>, StoreError> {
        if !path.exists() {
            return Ok(None);
        }
        let file = fs::File::open(path)?;
        let reader = BufReader::new(file);
        let mut items = Vec::new();
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            items.push(serde_json::from_str(&line)?);
        }
        Ok(Some(items))
    }
}

impl StreamStorage for FsStore {
    fn append_to_stream(&self, stream_key: &str, item: Item) -> Result<(), StoreError> {
        let path = self.file_path(stream_key);
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        let line = serde_json::to_string(&item)?;
        writeln!(file, "{}", line)?;
        Ok(())
    }

    fn rename_or_alias_stream(&self, from: &str, to: &str) -> Result<(), StoreError> {
        let from_path = self.file_path(from);
        let to_path = self.file_path(to);
        if from_path == to_path {
            return Ok(());
        }
        if from_path.exists() {
            fs::rename(from_path, to_path)?;
        }
        Ok(())
    }

    fn get_stream_data(&self, stream_key: &str) -> Result<Option<Vec<Item>>, StoreError> {
        let path = self.file_path(stream_key);
        Self::read_items(&path)
    }

    fn delete_stream(&self, stream_key: &str) -> Result<(), StoreError> {
        let path = self.file_path(stream_key);
        if path.exists() {
            fs::remove_file(path)?;
        }
        Ok(())
    }

    fn most_recent_item(&self, stream_key: &str) -> Result<Option<Item>, StoreError> {
        // A full read, same as the reference implementation. An optimized
        // tail-read would avoid re-parsing the whole file on every append.
        Ok(self
            .get_stream_data(stream_key)?
            .and_then(|items| items.into_iter().last()))
    }

    fn walk_streams(&self) -> Result<Vec<(String, Vec<Item>)>, StoreError> {
        let mut out = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let filename = entry.file_name().to_string_lossy().into_owned();
            let key = self
                .key_map
                .lock()
                .expect("key map mutex poisoned")
                .get(&filename)
                .cloned()
                .unwrap_or(filename);
            if let Some(items) = Self::read_items(&entry.path())? {
                out.push((key, items));
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_item(label: &str) -> Item {
        Item {
            children: vec!["c1".to_owned()],
            hash: format!("hash-{label}"),
            timestamp: "2024-01-01T00:00:00".to_owned(),
            event: serde_json::json!({"type": label}),
            label: Some(label.to_owned()),
        }
    }

    #[test]
    fn in_memory_store_append_is_ordered_and_persistent() {
        let store = InMemoryStore::new();
        store.append_to_stream("s1", sample_item("a")).unwrap();
        store.append_to_stream("s1", sample_item("b")).unwrap();
        let items = store.get_stream_data("s1").unwrap().unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].label.as_deref(), Some("a"));
        assert_eq!(items[1].label.as_deref(), Some("b"));
    }

    #[test]
    fn in_memory_store_missing_stream_is_none() {
        let store = InMemoryStore::new();
        assert!(store.get_stream_data("nope").unwrap().is_none());
    }

    #[test]
    fn in_memory_store_delete_is_idempotent() {
        let store = InMemoryStore::new();
        store.delete_stream("nope").unwrap();
        store.append_to_stream("s1", sample_item("a")).unwrap();
        store.delete_stream("s1").unwrap();
        store.delete_stream("s1").unwrap();
        assert!(store.get_stream_data("s1").unwrap().is_none());
    }

    #[test]
    fn in_memory_store_rename_overwrites_destination() {
        let store = InMemoryStore::new();
        store.append_to_stream("src", sample_item("a")).unwrap();
        store.append_to_stream("dst", sample_item("old")).unwrap();
        store.rename_or_alias_stream("src", "dst").unwrap();
        let items = store.get_stream_data("dst").unwrap().unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].label.as_deref(), Some("a"));
        assert!(store.get_stream_data("src").unwrap().is_none());
    }

    #[test]
    fn fs_store_round_trips_through_a_temp_directory() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsStore::new(dir.path()).unwrap();
        store.append_to_stream("my-session", sample_item("a")).unwrap();
        store.append_to_stream("my-session", sample_item("b")).unwrap();
        let items = store.get_stream_data("my-session").unwrap().unwrap();
        assert_eq!(items.len(), 2);
    }

    #[test]
    fn fs_store_walk_streams_reports_original_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsStore::new(dir.path()).unwrap();
        store.append_to_stream("alpha", sample_item("a")).unwrap();
        store.append_to_stream("beta", sample_item("b")).unwrap();
        let mut keys: Vec<String> = store
            .walk_streams()
            .unwrap()
            .into_iter()
            .map(|(k, _)| k)
            .collect();
        keys.sort();
        assert_eq!(keys, vec!["alpha".to_owned(), "beta".to_owned()]);
    }

    #[test]
    fn fs_store_delete_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsStore::new(dir.path()).unwrap();
        store.delete_stream("nope").unwrap();
        store.append_to_stream("s1", sample_item("a")).unwrap();
        store.delete_stream("s1").unwrap();
        store.delete_stream("s1").unwrap();
        assert!(store.get_stream_data("s1").unwrap().is_none());
    }
}
