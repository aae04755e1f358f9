//! Event decoder / logger factory (C5).
//!
//! Owns the per-connection Merkle session lifecycle: buffers events until
//! identity is known, then replays the buffer and persists live from then on.

use std::sync::Arc;

use classlog_merkle::{AsyncMerkle, SessionDescriptor, StreamStorage};
use serde_json::Value;

use crate::study_log::StudyLog;

pub struct Decoder {
    merkle: Arc<AsyncMerkle<Box<dyn StreamStorage>>>,
    session: Option<SessionDescriptor>,
    session_started: bool,
    session_closed: bool,
    pre_session_buffer: Vec<Value>,
    headers: Option<Value>,
    pub study_log: Option<StudyLog>,
}

impl Decoder {
    pub fn new(merkle: Arc<AsyncMerkle<Box<dyn StreamStorage>>>, headers: Option<Value>) -> Self {
        Decoder {
            merkle,
            session: None,
            session_started: false,
            session_closed: false,
            pre_session_buffer: Vec::new(),
            headers,
            study_log: None,
        }
    }

    /// Idempotent: a no-op once the session has already started.
    pub async fn initialize_session(
        &mut self,
        student: &str,
        tool: &str,
        metadata: Option<Value>,
    ) -> Result<(), classlog_merkle::MerkleError> {
        if self.session_started {
            return Ok(());
        }

        let mut session = SessionDescriptor::new();
        session.insert("student".to_owned(), vec![student.to_owned()]);
        session.insert("tool".to_owned(), vec![tool.to_owned()]);

        self.merkle
            .start(session.clone(), metadata, None)
            .await?;

        if let Some(headers) = self.headers.take() {
            self.merkle
                .event_to_session(
                    serde_json::json!({"type": "header", "headers": headers}),
                    session.clone(),
                    Vec::new(),
                    Some("headers".to_owned()),
                )
                .await?;
        }

        // Log the buffer length before clearing it, unlike the reference
        // implementation, whose equivalent log statement always reports zero
        // because it reads the buffer after it has already been drained.
        let buffered = self.pre_session_buffer.len();
        if buffered > 0 {
            tracing::debug!(buffered, "replaying buffered pre-session events");
        }

        for event in self.pre_session_buffer.drain(..) {
            self.merkle
                .event_to_session(event, session.clone(), Vec::new(), None)
                .await?;
        }

        self.session = Some(session);
        self.session_started = true;
        Ok(())
    }

    /// Idempotent: a no-op once already closed.
    pub async fn close_session(&mut self) {
        if self.session_closed {
            return;
        }
        self.session_closed = true;

        if self.session_started {
            let session = self.session.clone().expect("session set once started");
            if let Err(err) = self.merkle.close_session(session, false).await {
                tracing::error!(error = %err, "failed to close merkle session");
            }
        } else if !self.pre_session_buffer.is_empty() {
            tracing::warn!(
                count = self.pre_session_buffer.len(),
                "connection closed before identity was established; buffered events were never persisted"
            );
        }

        if let Some(log) = &mut self.study_log {
            log.close();
        }
    }

    /// Persists the event if the session has started, else buffers it.
    /// Always returns the event unchanged so the pipeline can continue.
    pub async fn decode_and_log(&mut self, event: Value) -> Value {
        if let Some(log) = &self.study_log {
            let _ = log.append(&event);
        }

        if self.session_started {
            let session = self.session.clone().expect("session set once started");
            if let Err(err) = self
                .merkle
                .event_to_session(event.clone(), session, Vec::new(), None)
                .await
            {
                tracing::error!(error = %err, "failed to persist event to merkle session");
            }
        } else {
            self.pre_session_buffer.push(event.clone());
        }
        event
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use classlog_merkle::{InMemoryStore, Merkle};

    fn merkle() -> Arc<AsyncMerkle<Box<dyn StreamStorage>>> {
        let storage: Box<dyn StreamStorage> = Box::new(InMemoryStore::new());
        Arc::new(AsyncMerkle::new(Merkle::new(Arc::new(storage))))
    }

    #[tokio::test]
    async fn buffered_events_replay_on_initialize() {
        let mut decoder = Decoder::new(merkle(), None);
        decoder.decode_and_log(serde_json::json!({"event": "early"})).await;
        decoder
            .initialize_session("u1", "docs", None)
            .await
            .unwrap();
        decoder.decode_and_log(serde_json::json!({"event": "live"})).await;
        decoder.close_session().await;
    }

    #[tokio::test]
    async fn initialize_session_is_idempotent() {
        let mut decoder = Decoder::new(merkle(), None);
        decoder.initialize_session("u1", "docs", None).await.unwrap();
        decoder.initialize_session("u1", "docs", None).await.unwrap();
    }

    #[tokio::test]
    async fn close_session_is_idempotent() {
        let mut decoder = Decoder::new(merkle(), None);
        decoder.initialize_session("u1", "docs", None).await.unwrap();
        decoder.close_session().await;
        decoder.close_session().await;
    }
}
