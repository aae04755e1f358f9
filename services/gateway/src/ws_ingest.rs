//! The websocket connection handler: wires the stage graph (C6) to a single
//! live socket, one task per connection.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use classlog_protocol::ControlFrame;
use classlog_reducer::{PreparedReducer, RunMode as ReducerRunMode};
use serde_json::Value;
use tracing::{debug, error, warn};

use crate::auth::Authenticator;
use crate::blacklist::Verdict;
use crate::config::RunMode;
use crate::decoder::Decoder;
use crate::envelope::build_envelope;
use crate::pipeline::{is_terminate, stage_blob, stage_lock_fields, AuthStage, BlobOutcome, StageOutcome};
use crate::state::AppState;
use crate::study_log::StudyLog;

pub async fn ws_ingest_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_ingest_socket(socket, state, headers))
}

/// Per-connection state threaded through the stage graph. Not `Clone`: it
/// owns the connection's one-shot session lifecycle.
struct Connection {
    locked_fields: serde_json::Map<String, Value>,
    auth: AuthStage,
    decoder: Decoder,
    reducer_generation_seen: u64,
    prepared: Vec<PreparedReducer>,
    headers: HeaderMap,
}

async fn handle_ingest_socket(mut socket: WebSocket, state: AppState, headers: HeaderMap) {
    let study_log = StudyLog::open(std::path::Path::new(state.study_log_dir.as_ref()), "GUEST")
        .map_err(|err| error!(error = %err, "failed to open study log"))
        .ok();

    let mut decoder = Decoder::new(
        state.merkle.clone(),
        Some(serde_json::to_value(header_map_to_pairs(&headers)).unwrap_or(Value::Null)),
    );
    decoder.study_log = study_log;

    let mut conn = Connection {
        locked_fields: serde_json::Map::new(),
        auth: AuthStage::default(),
        decoder,
        reducer_generation_seen: state.reducer_generation(),
        prepared: state.reducers.prepare(&Value::Null).await,
        headers,
    };

    loop {
        match socket.recv().await {
            Some(Ok(Message::Text(text))) => {
                let raw: Value = match serde_json::from_str(&text) {
                    Ok(v) => v,
                    Err(err) => {
                        warn!(error = %err, "dropping non-JSON frame");
                        continue;
                    }
                };
                if !raw.is_object() {
                    warn!("dropping non-object event");
                    continue;
                }
                if !process_event(&mut conn, &state, &mut socket, raw).await {
                    break;
                }
            }
            Some(Ok(Message::Ping(data))) => {
                let _ = socket.send(Message::Pong(data)).await;
            }
            Some(Ok(Message::Close(_))) | None => break,
            Some(Ok(_)) => {}
            Some(Err(err)) => {
                warn!(error = %err, "websocket error");
                break;
            }
        }
    }

    conn.decoder.close_session().await;
}

/// Runs one event through the full stage graph. Returns `false` when the
/// connection should be torn down.
async fn process_event(conn: &mut Connection, state: &AppState, socket: &mut WebSocket, raw: Value) -> bool {
    let event = conn.decoder.decode_and_log(raw).await;

    let event = match stage_lock_fields(&mut conn.locked_fields, event) {
        StageOutcome::Drop => return true,
        StageOutcome::Close(_) => return false,
        StageOutcome::Forward(e) => e,
    };

    if is_terminate(&event) {
        conn.decoder.close_session().await;
        return false;
    }

    let was_authenticated = conn.auth.is_authenticated();
    let (forwarded, frame) = conn.auth.process(&*state.authenticator, event);

    if let Some(frame) = &frame {
        if !send_frame(socket, frame).await {
            return false;
        }
    }

    if !was_authenticated && conn.auth.is_authenticated() {
        if let Some(identity) = conn.auth.identity().cloned() {
            let tool = conn
                .locked_fields
                .get("source")
                .and_then(Value::as_str)
                .unwrap_or("unknown")
                .to_owned();
            let metadata = serde_json::json!({"safe_user_id": identity.safe_user_id});
            if let Err(err) = conn
                .decoder
                .initialize_session(&identity.user_id, &tool, Some(metadata.clone()))
                .await
            {
                error!(error = %err, "failed to initialize merkle session");
            }
            conn.prepared = state.reducers.prepare(&metadata).await;
            conn.reducer_generation_seen = state.reducer_generation();

            match StudyLog::open(
                std::path::Path::new(state.study_log_dir.as_ref()),
                &identity.safe_user_id,
            ) {
                Ok(log) => conn.decoder.study_log = Some(log),
                Err(err) => error!(error = %err, "failed to re-open study log for authenticated user"),
            }
        }
    }

    for event in forwarded {
        if !run_post_auth_stages(conn, state, socket, event).await {
            return false;
        }
    }
    true
}

/// Blacklist -> blob -> reducer-refresh -> reducer dispatch. Returns `false`
/// when the connection should end (a deny verdict, or a socket failure).
async fn run_post_auth_stages(conn: &mut Connection, state: &AppState, socket: &mut WebSocket, event: Value) -> bool {
    let identity = conn.auth.identity().cloned();
    let record = identity
        .as_ref()
        .map(|i| serde_json::to_value(i).unwrap_or(Value::Null))
        .unwrap_or(Value::Null);
    let verdict = state.blacklist.evaluate(&record);
    if !verdict.is_allowed() {
        send_frame(socket, &verdict_frame(&verdict)).await;
        return false;
    }

    let event = match stage_blob(event) {
        BlobOutcome::Consumed(Some(frame)) => {
            return send_frame(socket, &frame).await;
        }
        BlobOutcome::Consumed(None) => return true,
        BlobOutcome::PassThrough(e) => e,
    };

    let current_generation = state.reducer_generation();
    if current_generation != conn.reducer_generation_seen {
        debug!(generation = current_generation, "reducer set changed; re-preparing");
        let metadata = identity
            .as_ref()
            .map(|i| serde_json::json!({"safe_user_id": i.safe_user_id}))
            .unwrap_or(Value::Null);
        conn.prepared = state.reducers.prepare(&metadata).await;
        conn.reducer_generation_seen = current_generation;
    }

    let envelope = build_envelope(
        event,
        &conn.headers,
        identity
            .map(|i| serde_json::json!({"safe_user_id": i.safe_user_id}))
            .unwrap_or(Value::Null),
    );

    let reducer_run_mode = match state.run_mode {
        RunMode::Dev => ReducerRunMode::Dev,
        RunMode::Prod => ReducerRunMode::Prod,
    };
    if let Err(err) = classlog_reducer::dispatch(
        &conn.prepared,
        &envelope,
        reducer_run_mode,
        std::path::Path::new(state.traceback_dir.as_ref()),
    )
    .await
    {
        error!(error = %err, "reducer dispatch failed in dev mode; ending connection");
        return false;
    }
    true
}

fn verdict_frame(verdict: &Verdict) -> ControlFrame {
    ControlFrame::Blacklisted {
        kind: verdict.action.to_owned(),
        msg: verdict.message.clone(),
        status_code: verdict.status_code,
    }
}

async fn send_frame(socket: &mut WebSocket, frame: &ControlFrame) -> bool {
    let Ok(text) = serde_json::to_string(frame) else {
        return true;
    };
    socket.send(Message::Text(text.into())).await.is_ok()
}

fn header_map_to_pairs(headers: &HeaderMap) -> std::collections::BTreeMap<String, String> {
    headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_owned(), v.to_owned()))
        })
        .collect()
}
