//! The per-connection stage graph (C6).
//!
//! Stages run in a fixed order for every event read off the socket:
//! `lock_fields -> terminate -> auth -> blacklist -> blob -> reducer-refresh
//! -> reducers`. Each stage either forwards its event to the next one,
//! drops it silently, or ends the connection.

use classlog_protocol::{AuthIdentity, ControlFrame};
use serde_json::{Map, Value};

use crate::auth::Authenticator;

/// What a stage did with the event it was given.
pub enum StageOutcome {
    /// Forward this event (possibly modified) to the next stage.
    Forward(Value),
    /// Consume the event; nothing moves to the next stage.
    Drop,
    /// Consume the event and end the connection. Carries an optional frame
    /// to send before closing.
    Close(Option<ControlFrame>),
}

// ---------------------------------------------------------------------------
// Stage 3: lock_fields
// ---------------------------------------------------------------------------

/// Merges `event.fields` into the connection's locked-field map when the
/// incoming map either omits `source` or names a different one than is
/// currently locked; otherwise stamps the locked fields onto ordinary
/// events. The triggering `lock_fields` event itself is never forwarded.
pub fn stage_lock_fields(locked: &mut Map<String, Value>, mut event: Value) -> StageOutcome {
    if event.get("event").and_then(Value::as_str) == Some("lock_fields") {
        if let Some(fields) = event.get("fields").and_then(Value::as_object) {
            let should_merge = match fields.get("source") {
                None => true,
                Some(new_source) => locked.get("source") != Some(new_source),
            };
            if should_merge {
                for (k, v) in fields {
                    locked.insert(k.clone(), v.clone());
                }
            }
        }
        return StageOutcome::Drop;
    }

    if let Some(obj) = event.as_object_mut() {
        for (k, v) in locked.iter() {
            obj.insert(k.clone(), v.clone());
        }
    }
    StageOutcome::Forward(event)
}

// ---------------------------------------------------------------------------
// Stage 4: terminate
// ---------------------------------------------------------------------------

pub fn is_terminate(event: &Value) -> bool {
    event.get("event").and_then(Value::as_str) == Some("terminate")
}

// ---------------------------------------------------------------------------
// Stage 5: auth
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct AuthStage {
    authenticated: Option<AuthIdentity>,
    backlog: Vec<(Value, bool)>,
}

impl AuthStage {
    pub fn identity(&self) -> Option<&AuthIdentity> {
        self.authenticated.as_ref()
    }

    pub fn is_authenticated(&self) -> bool {
        self.authenticated.is_some()
    }

    /// Returns the events ready to forward this call (in FIFO order, each
    /// already stamped with `auth`), plus a control frame to send when this
    /// call is the one that establishes authentication.
    pub fn process(
        &mut self,
        authenticator: &dyn Authenticator,
        mut event: Value,
    ) -> (Vec<Value>, Option<ControlFrame>) {
        if let Some(obj) = event.as_object_mut() {
            obj.remove("auth");
        }

        if self.authenticated.is_none() {
            let mut consumed = false;
            let mut frame = None;
            if let Some(identity) = authenticator.try_authenticate(&event) {
                frame = Some(ControlFrame::Auth {
                    user_id: identity.user_id.clone(),
                });
                self.authenticated = Some(identity);
                consumed = true;
            }
            self.backlog.push((event, consumed));
            return (Vec::new(), frame);
        }

        let identity = self.authenticated.clone().expect("checked above");
        let mut out = Vec::new();
        for (mut backlogged, consumed) in self.backlog.drain(..) {
            if consumed {
                continue;
            }
            stamp_auth(&mut backlogged, &identity);
            out.push(backlogged);
        }
        stamp_auth(&mut event, &identity);
        out.push(event);
        (out, None)
    }
}

fn stamp_auth(event: &mut Value, identity: &AuthIdentity) {
    if let Some(obj) = event.as_object_mut() {
        obj.insert(
            "auth".to_owned(),
            serde_json::to_value(identity).expect("identity always serializes"),
        );
    }
}

// ---------------------------------------------------------------------------
// Stage 7: blob
// ---------------------------------------------------------------------------

pub enum BlobOutcome {
    /// Not a blob verb; pass through unchanged.
    PassThrough(Value),
    /// A blob verb was consumed; this frame (if any) should be sent back.
    Consumed(Option<ControlFrame>),
}

pub fn stage_blob(event: Value) -> BlobOutcome {
    let verb = event.get("event").and_then(Value::as_str);
    match verb {
        Some("save_blob") | Some("fetch_blob") => {
            // Actual blob storage is an external concern (deliberately out of
            // scope); here we only own the event-consumption contract: blob
            // verbs never reach reducers.
            BlobOutcome::Consumed(None)
        }
        _ => BlobOutcome::PassThrough(event),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn lock_fields_event_is_never_forwarded() {
        let mut locked = Map::new();
        let event = json!({"event": "lock_fields", "fields": {"source": "docs"}});
        assert!(matches!(stage_lock_fields(&mut locked, event), StageOutcome::Drop));
        assert_eq!(locked.get("source"), Some(&json!("docs")));
    }

    #[test]
    fn lock_fields_skips_merge_when_source_unchanged() {
        let mut locked = Map::new();
        locked.insert("source".to_owned(), json!("docs"));
        locked.insert("extra".to_owned(), json!("keep-me"));
        let event = json!({"event": "lock_fields", "fields": {"source": "docs", "extra": "overwritten?"}});
        stage_lock_fields(&mut locked, event);
        assert_eq!(locked.get("extra"), Some(&json!("keep-me")));
    }

    #[test]
    fn ordinary_events_get_stamped_with_locked_fields() {
        let mut locked = Map::new();
        locked.insert("source".to_owned(), json!("docs"));
        let event = json!({"event": "keystroke"});
        match stage_lock_fields(&mut locked, event) {
            StageOutcome::Forward(stamped) => assert_eq!(stamped["source"], json!("docs")),
            _ => panic!("expected forward"),
        }
    }

    #[test]
    fn terminate_is_detected_by_event_tag() {
        assert!(is_terminate(&json!({"event": "terminate"})));
        assert!(!is_terminate(&json!({"event": "keystroke"})));
    }

    struct AlwaysAuth;
    impl Authenticator for AlwaysAuth {
        fn try_authenticate(&self, event: &Value) -> Option<AuthIdentity> {
            event.get("user_id").and_then(Value::as_str).map(|s| AuthIdentity {
                user_id: s.to_owned(),
                safe_user_id: s.to_owned(),
                legacy_user_id: None,
                email: None,
                google_id: None,
            })
        }
    }

    #[test]
    fn auth_stage_backlogs_until_authenticated_then_flushes() {
        let mut stage = AuthStage::default();
        let auth = AlwaysAuth;

        let (out1, frame1) = stage.process(&auth, json!({"event": "a"}));
        assert!(out1.is_empty());
        assert!(frame1.is_none());

        let (out2, frame2) = stage.process(&auth, json!({"event": "identify", "user_id": "u1"}));
        assert!(out2.is_empty());
        assert!(frame2.is_some());
        assert!(stage.is_authenticated());

        let (out3, _) = stage.process(&auth, json!({"event": "b"}));
        // The identify event that triggered auth is skipped; "a" and "b" forward.
        assert_eq!(out3.len(), 2);
        assert_eq!(out3[0]["event"], json!("a"));
        assert_eq!(out3[1]["event"], json!("b"));
    }

    #[test]
    fn blob_verbs_are_consumed_not_forwarded() {
        assert!(matches!(
            stage_blob(json!({"event": "save_blob"})),
            BlobOutcome::Consumed(_)
        ));
        assert!(matches!(
            stage_blob(json!({"event": "keystroke"})),
            BlobOutcome::PassThrough(_)
        ));
    }
}
