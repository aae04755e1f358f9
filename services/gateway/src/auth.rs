//! Authentication contract (C6 stage 5).
//!
//! The concrete identity-provider integration (OAuth, SSO, district roster
//! lookups) is deliberately out of scope here; this module owns only the
//! contract the pipeline stage needs: given an event, try once to resolve
//! an identity from it.

use classlog_protocol::AuthIdentity;
use serde_json::Value;

pub trait Authenticator: Send + Sync {
    /// Attempt to authenticate from a single event. Returns `None` when the
    /// event carries no usable credential (not an error — the caller keeps
    /// trying on subsequent events).
    fn try_authenticate(&self, event: &Value) -> Option<AuthIdentity>;
}

/// An authenticator driven by a single field carrying the already-resolved
/// user id (e.g. a test-framework fake-identity event, or a trusted
/// upstream proxy header folded into the event by the caller).
pub struct FieldAuthenticator {
    pub field: String,
}

impl Authenticator for FieldAuthenticator {
    fn try_authenticate(&self, event: &Value) -> Option<AuthIdentity> {
        // No sanitization step is implemented here, so the plain and safe
        // ids are the same value; a real identity provider would derive
        // `safe_user_id` from `user_id` instead of copying it.
        let user_id = event.get(&self.field)?.as_str()?.to_owned();
        Some(AuthIdentity {
            safe_user_id: user_id.clone(),
            user_id,
            legacy_user_id: event
                .get("legacy_user_id")
                .and_then(Value::as_str)
                .map(ToOwned::to_owned),
            email: event.get("email").and_then(Value::as_str).map(ToOwned::to_owned),
            google_id: event
                .get("google_id")
                .and_then(Value::as_str)
                .map(ToOwned::to_owned),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn field_authenticator_resolves_identity_from_named_field() {
        let auth = FieldAuthenticator {
            field: "user_id".to_owned(),
        };
        let identity = auth
            .try_authenticate(&json!({"user_id": "u1", "email": "u1@school.edu"}))
            .unwrap();
        assert_eq!(identity.safe_user_id, "u1");
        assert_eq!(identity.email.as_deref(), Some("u1@school.edu"));
    }

    #[test]
    fn field_authenticator_returns_none_when_field_absent() {
        let auth = FieldAuthenticator {
            field: "user_id".to_owned(),
        };
        assert!(auth.try_authenticate(&json!({"other": 1})).is_none());
    }
}
