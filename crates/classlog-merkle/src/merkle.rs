//! The synchronous Merkle engine: session lifecycle, parent-stream
//! propagation, chain verification, and tombstone deletion.

use std::collections::HashSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::categories::DEFAULT_CATEGORIES;
use crate::codec::{canonical_json, merkle_hash, session_key, timestamp};
use crate::error::MerkleError;
use crate::storage::{Item, StreamStorage};
use crate::SessionDescriptor;

/// A tombstone left behind after a stream is deleted.
///
/// `tombstone_hash` is computed over every other field, never over itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tombstone {
    #[serde(rename = "type")]
    pub kind: String,
    pub deleted_stream: String,
    pub final_hash: String,
    pub item_hashes: Vec<String>,
    pub item_count: usize,
    pub reason: String,
    pub timestamp: String,
    pub tombstone_hash: String,
}

pub struct Merkle<S: StreamStorage> {
    storage: Arc<S>,
    categories: HashSet<String>,
}

impl<S: StreamStorage> Merkle<S> {
    pub fn new(storage: Arc<S>) -> Self {
        Self::with_categories(
            storage,
            DEFAULT_CATEGORIES.iter().map(|s| (*s).to_owned()).collect(),
        )
    }

    pub fn with_categories(storage: Arc<S>, categories: HashSet<String>) -> Self {
        Self { storage, categories }
    }

    fn node_hash(children: &[String], ts: &str) -> Result<String, MerkleError> {
        let mut sorted = children.to_vec();
        sorted.sort();
        let mut parts: Vec<&str> = sorted.iter().map(String::as_str).collect();
        parts.push(ts);
        merkle_hash(&parts)
    }

    pub fn event_to_session(
        &self,
        event: &Value,
        session: &SessionDescriptor,
        mut children: Vec<String>,
        label: Option<&str>,
    ) -> Result<Item, MerkleError> {
        let sid = session_key(session);
        let ts = timestamp();
        let event_json = canonical_json(event);
        let event_hash = merkle_hash(&[event_json.as_str()])?;
        children.push(event_hash);
        if let Some(prev) = self.storage.most_recent_item(&sid)? {
            children.push(prev.hash);
        }

        let node_hash = Self::node_hash(&children, &ts)?;
        let item = Item {
            children,
            hash: node_hash,
            timestamp: ts,
            event: event.clone(),
            label: label.map(ToOwned::to_owned),
        };
        self.storage.append_to_stream(&sid, item.clone())?;
        Ok(item)
    }

    pub fn start(
        &self,
        session: &SessionDescriptor,
        metadata: Option<&Value>,
        continuation_hash: Option<&str>,
    ) -> Result<Item, MerkleError> {
        let mut event = json!({
            "type": if continuation_hash.is_some() { "continue" } else { "start" },
            "session": session,
        });
        if let Some(metadata) = metadata {
            event["metadata"] = metadata.clone();
        }
        let mut children = Vec::new();
        if let Some(hash) = continuation_hash {
            event["continues"] = json!(hash);
            children.push(hash.to_owned());
        }
        self.event_to_session(&event, session, children, Some("start"))
    }

    pub fn close_session(
        &self,
        session: &SessionDescriptor,
        logical_break: bool,
    ) -> Result<String, MerkleError> {
        let event = json!({"type": "close", "session": session});
        let final_item = self.event_to_session(&event, session, Vec::new(), Some("close"))?;
        let session_hash = final_item.hash;
        self.storage
            .rename_or_alias_stream(&session_key(session), &session_hash)?;

        if logical_break {
            return Ok(session_hash);
        }

        for (key, values) in session {
            if !self.categories.contains(key) {
                continue;
            }
            for value in values {
                let parent_session: SessionDescriptor =
                    [(key.clone(), vec![value.clone()])].into_iter().collect();
                let propagated = json!({
                    "type": "child_session_finished",
                    "child_hash": session_hash,
                    "child_session": session,
                });
                self.event_to_session(
                    &propagated,
                    &parent_session,
                    vec![session_hash.clone()],
                    Some(&format!("{key}:{value}")),
                )?;
            }
        }

        Ok(session_hash)
    }

    pub fn break_session(&self, session: &SessionDescriptor) -> Result<String, MerkleError> {
        let segment_hash = self.close_session(session, true)?;
        self.start(session, None, Some(&segment_hash))?;
        Ok(segment_hash)
    }

    pub fn verify_chain(&self, stream_key: &str) -> Result<(), MerkleError> {
        let data = self
            .storage
            .get_stream_data(stream_key)?
            .filter(|items| !items.is_empty())
            .ok_or_else(|| MerkleError::NotFound(stream_key.to_owned()))?;

        let mut prev_hash: Option<String> = None;
        for (index, item) in data.iter().enumerate() {
            let event_hash = merkle_hash(&[canonical_json(&item.event).as_str()])?;
            if !item.children.contains(&event_hash) {
                return Err(MerkleError::ChainBroken {
                    stream_key: stream_key.to_owned(),
                    index,
                    detail: "event hash missing from children".to_owned(),
                });
            }
            if let Some(prev) = &prev_hash {
                if !item.children.contains(prev) {
                    return Err(MerkleError::ChainBroken {
                        stream_key: stream_key.to_owned(),
                        index,
                        detail: "previous item hash missing from children".to_owned(),
                    });
                }
            }
            let expected = Self::node_hash(&item.children, &item.timestamp)?;
            if expected != item.hash {
                return Err(MerkleError::ChainBroken {
                    stream_key: stream_key.to_owned(),
                    index,
                    detail: format!("node hash mismatch: expected {expected}, got {}", item.hash),
                });
            }
            prev_hash = Some(item.hash.clone());
        }
        Ok(())
    }

    pub fn delete_stream_with_tombstone(
        &self,
        stream_key: &str,
        reason: &str,
    ) -> Result<Tombstone, MerkleError> {
        let data = self
            .storage
            .get_stream_data(stream_key)?
            .filter(|items| !items.is_empty())
            .ok_or_else(|| MerkleError::NotFound(stream_key.to_owned()))?;

        let final_hash = data.last().expect("checked non-empty above").hash.clone();
        let item_hashes: Vec<String> = data.iter().map(|i| i.hash.clone()).collect();
        let item_count = data.len();
        let ts = timestamp();

        // Hash over every field except tombstone_hash itself.
        let unhashed = json!({
            "type": "tombstone",
            "deleted_stream": stream_key,
            "final_hash": final_hash,
            "item_hashes": item_hashes,
            "item_count": item_count,
            "reason": reason,
            "timestamp": ts,
        });
        let tombstone_hash = merkle_hash(&[canonical_json(&unhashed).as_str()])?;

        self.storage.delete_stream(stream_key)?;

        let tombstone = Tombstone {
            kind: "tombstone".to_owned(),
            deleted_stream: stream_key.to_owned(),
            final_hash,
            item_hashes,
            item_count,
            reason: reason.to_owned(),
            timestamp: ts,
            tombstone_hash,
        };

        let tombstone_item = Item {
            children: Vec::new(),
            hash: tombstone.tombstone_hash.clone(),
            timestamp: tombstone.timestamp.clone(),
            event: serde_json::to_value(&tombstone).expect("tombstone always serializes"),
            label: Some("tombstone".to_owned()),
        };
        self.storage
            .append_to_stream(&format!("__tombstone__{stream_key}"), tombstone_item)?;

        Ok(tombstone)
    }
}
