//! Content-addressed, tamper-evident, append-only log store.
//!
//! A "stream" is keyed by a session descriptor (or, once closed, by its own
//! final hash) and holds a chain of [`storage::Item`]s linked by hash. See
//! [`merkle::Merkle`] for the session lifecycle and [`async_merkle::AsyncMerkle`]
//! for the non-blocking facade used by the gateway.

pub mod async_merkle;
pub mod categories;
pub mod codec;
pub mod error;
pub mod merkle;
pub mod storage;

use std::collections::BTreeMap;

/// Category name -> one or more values.
pub type SessionDescriptor = BTreeMap<String, Vec<String>>;

pub use async_merkle::AsyncMerkle;
pub use codec::{canonical_json, merkle_hash, session_key, timestamp};
pub use error::{MerkleError, StoreError};
pub use merkle::{Merkle, Tombstone};
pub use storage::{FsStore, InMemoryStore, Item, StreamStorage};

/// Instantiate a boxed storage backend from a config-level name.
///
/// Matches the reference `STORES = {'fs': FSStorage, 'inmemory': InMemoryStorage}`
/// registry.
pub fn store_from_name(
    name: &str,
    fs_root: Option<&std::path::Path>,
) -> Result<Box<dyn StreamStorage>, StoreError> {
    match name {
        "inmemory" => Ok(Box::new(InMemoryStore::new())),
        "fs" => {
            let root = fs_root.ok_or_else(|| {
                StoreError::Io(std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    "fs store requires a root path",
                ))
            })?;
            Ok(Box::new(FsStore::new(root)?))
        }
        other => Err(StoreError::NotFound(format!("unknown store backend '{other}'"))),
    }
}
