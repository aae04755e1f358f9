//! Async facade over the synchronous [`Merkle`] engine.
//!
//! Every method here offloads the corresponding blocking call onto
//! `tokio::task::spawn_blocking`, mirroring the reference implementation's
//! use of a default executor for the same purpose.

use std::sync::Arc;

use serde_json::Value;

use crate::error::MerkleError;
use crate::merkle::{Merkle, Tombstone};
use crate::storage::{Item, StreamStorage};
use crate::SessionDescriptor;

pub struct AsyncMerkle<S: StreamStorage + 'static> {
    inner: Arc<Merkle<S>>,
}

impl<S: StreamStorage + 'static> AsyncMerkle<S> {
    pub fn new(merkle: Merkle<S>) -> Self {
        Self {
            inner: Arc::new(merkle),
        }
    }

    async fn offload<F, T>(&self, f: F) -> Result<T, MerkleError>
    where
        F: FnOnce(&Merkle<S>) -> Result<T, MerkleError> + Send + 'static,
        T: Send + 'static,
    {
        let inner = self.inner.clone();
        tokio::task::spawn_blocking(move || f(&inner))
            .await
            .map_err(|e| MerkleError::TaskFailed(e.to_string()))?
    }

    pub async fn start(
        &self,
        session: SessionDescriptor,
        metadata: Option<Value>,
        continuation_hash: Option<String>,
    ) -> Result<Item, MerkleError> {
        self.offload(move |m| {
            m.start(&session, metadata.as_ref(), continuation_hash.as_deref())
        })
        .await
    }

    pub async fn event_to_session(
        &self,
        event: Value,
        session: SessionDescriptor,
        children: Vec<String>,
        label: Option<String>,
    ) -> Result<Item, MerkleError> {
        self.offload(move |m| {
            m.event_to_session(&event, &session, children, label.as_deref())
        })
        .await
    }

    pub async fn close_session(
        &self,
        session: SessionDescriptor,
        logical_break: bool,
    ) -> Result<String, MerkleError> {
        self.offload(move |m| m.close_session(&session, logical_break))
            .await
    }

    pub async fn break_session(&self, session: SessionDescriptor) -> Result<String, MerkleError> {
        self.offload(move |m| m.break_session(&session)).await
    }

    pub async fn verify_chain(&self, stream_key: String) -> Result<(), MerkleError> {
        self.offload(move |m| m.verify_chain(&stream_key)).await
    }

    pub async fn delete_stream_with_tombstone(
        &self,
        stream_key: String,
        reason: String,
    ) -> Result<Tombstone, MerkleError> {
        self.offload(move |m| m.delete_stream_with_tombstone(&stream_key, &reason))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InMemoryStore;

    fn session(pairs: &[(&str, &str)]) -> SessionDescriptor {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), vec![v.to_string()]))
            .collect()
    }

    #[tokio::test]
    async fn async_facade_round_trips_a_session() {
        let merkle = Merkle::new(Arc::new(InMemoryStore::new()));
        let async_merkle = AsyncMerkle::new(merkle);
        let sess = session(&[("student", "u1")]);

        async_merkle.start(sess.clone(), None, None).await.unwrap();
        let hash = async_merkle.close_session(sess, false).await.unwrap();
        async_merkle.verify_chain(hash).await.unwrap();
    }
}
