// classlog-protocol: wire types for the student-event ingestion channel.
//
// Events arriving over the websocket are freeform JSON objects; the types
// here cover the envelope the gateway builds around them and the small set
// of control frames the gateway sends back, not the student event bodies
// themselves (those are reducer-defined and stay as `serde_json::Value`).

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A session descriptor: category name -> one or more values.
///
/// Canonicalizes to a session key via sorted-key JSON, so a `BTreeMap` is
/// used directly rather than a `HashMap` to keep iteration order stable
/// even before serialization.
pub type SessionDescriptor = BTreeMap<String, Vec<String>>;

/// Server-side enrichment attached to every persisted event.
///
/// Mirrors the original system's `compile_server_data` block exactly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerInfo {
    pub time: f64,
    pub origin: String,
    pub agent: String,
    pub ip: String,
    pub executable: String,
}

/// Fixed label for this binary, used in every `ServerInfo` emitted by the gateway.
pub const EXECUTABLE_NAME: &str = "classlog_gateway";

/// The envelope actually persisted and handed to reducers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub client: serde_json::Value,
    pub server: ServerInfo,
    pub metadata: serde_json::Value,
}

/// Authenticated identity attached to an event once auth succeeds.
///
/// `user_id` is the plain identifier the identity provider returns;
/// `safe_user_id` is the sanitized/anonymized id used for storage keys and
/// filenames. A minimal authenticator (one with no real sanitization step)
/// may set both to the same value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthIdentity {
    pub user_id: String,
    pub safe_user_id: String,
    #[serde(default)]
    pub legacy_user_id: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub google_id: Option<String>,
}

/// Control frames the gateway sends back to a connection.
///
/// Serializes with a top-level `status` tag, matching the original's
/// `{status: "..."}` control-frame convention.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status")]
#[serde(rename_all = "snake_case")]
pub enum ControlFrame {
    Auth {
        user_id: String,
    },
    FetchBlob {
        data: Option<serde_json::Value>,
    },
    Blacklisted {
        #[serde(rename = "type")]
        kind: String,
        msg: String,
        status_code: u16,
    },
}

/// Frozen blacklist action names, returned over the wire as `type`.
pub mod blacklist_actions {
    pub const ALLOW: &str = "ALLOW";
    pub const DENY: &str = "DENY";
    pub const DENY_FOR_TWO_DAYS: &str = "DENY_FOR_TWO_DAYS";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn control_frame_auth_serializes_with_status_tag() {
        let frame = ControlFrame::Auth {
            user_id: "u-1".to_owned(),
        };
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["status"], "auth");
        assert_eq!(json["user_id"], "u-1");
    }

    #[test]
    fn control_frame_blacklisted_carries_status_code() {
        let frame = ControlFrame::Blacklisted {
            kind: blacklist_actions::DENY.to_owned(),
            msg: "denied".to_owned(),
            status_code: 403,
        };
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["status_code"], 403);
    }
}
