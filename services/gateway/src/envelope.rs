//! Server-side enrichment (`compile_server_data` equivalent).

use axum::http::HeaderMap;
use classlog_protocol::{EventEnvelope, ServerInfo, EXECUTABLE_NAME};
use serde_json::Value;

fn header_str(headers: &HeaderMap, name: &str) -> String {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_owned()
}

pub fn compile_server_info(headers: &HeaderMap) -> ServerInfo {
    ServerInfo {
        time: chrono::Utc::now().timestamp_millis() as f64 / 1000.0,
        origin: header_str(headers, "origin"),
        agent: header_str(headers, "user-agent"),
        ip: header_str(headers, "x-real-ip"),
        executable: EXECUTABLE_NAME.to_owned(),
    }
}

pub fn build_envelope(client: Value, headers: &HeaderMap, metadata: Value) -> Value {
    let envelope = EventEnvelope {
        client,
        server: compile_server_info(headers),
        metadata,
    };
    serde_json::to_value(envelope).expect("envelope always serializes")
}
