pub mod close_code;
pub mod commands;
pub mod dispatcher;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::response::Response;
use bytes::Bytes;
use futures_util::stream::SplitSink;
use futures_util::{Sink, SinkExt, StreamExt};

use crate::auth::{extract_token, AuthError};
use crate::payload::PayloadRef;
use crate::session::{Session, SessionRef, WsSession};
use crate::state::GatewayState;

pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(45);
/// Silence after which a client is considered gone.
pub const HEARTBEAT_TIMEOUT: Duration = Duration::from_secs(90);
/// Longest a single outbound frame may wait on a client that stopped reading.
pub const WRITE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug)]
enum WriteError<E> {
    Stalled(Duration),
    Sink(E),
}

pub async fn ws_upgrade(
    ws: WebSocketUpgrade,
    State(state): State<GatewayState>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    let token = extract_token(&headers, &query);
    ws.on_upgrade(move |socket| handle_socket(socket, state, token))
}

async fn handle_socket(socket: WebSocket, state: GatewayState, token: Result<String, AuthError>) {
    let (mut ws_sink, mut ws_stream) = socket.split();

    let token = match token {
        Ok(token) => token,
        Err(e) => {
            tracing::debug!("rejecting connection: {e}");
            send_close(&mut ws_sink, close_code::INVALID_TOKEN, &e.to_string()).await;
            return;
        }
    };
    let uid = match state.auth.authenticate(&token).await {
        Ok(uid) => uid,
        Err(e) => {
            tracing::debug!("authentication failed: {e}");
            send_close(&mut ws_sink, close_code::AUTH_FAILED, &e.to_string()).await;
            return;
        }
    };

    let (session, mut outbound) = WsSession::new(state.ids.next_id(), uid, token);
    let session_ref: SessionRef = session.clone();

    let gids = state.directory.list_group_ids(uid).await;
    state.groups.sub_groups(&session_ref, &gids).await;
    state.sessions.add(Arc::clone(&session_ref)).await;
    tracing::info!("session opened {:?} groups={:?}", session, gids);

    let closed = session.closed_token();
    let mut last_seen = tokio::time::Instant::now();
    let mut heartbeat_interval = tokio::time::interval(HEARTBEAT_INTERVAL);

    loop {
        tokio::select! {
            _ = closed.cancelled() => {
                send_close(&mut ws_sink, close_code::SESSION_CLOSED, "session closed").await;
                break;
            }
            // Payloads queued by the dispatcher; the reference is released
            // once the frame is written.
            Some(payload) = outbound.recv() => {
                match send_within(&mut ws_sink, to_message(&payload), WRITE_TIMEOUT).await {
                    Ok(()) => {}
                    Err(WriteError::Stalled(limit)) => {
                        tracing::warn!(
                            "{:?} stopped reading for {limit:?}, dropping it",
                            session
                        );
                        break;
                    }
                    Err(WriteError::Sink(e)) => {
                        tracing::debug!("write to {:?} failed: {e}", session);
                        break;
                    }
                }
            }
            _ = heartbeat_interval.tick() => {
                if last_seen.elapsed() > HEARTBEAT_TIMEOUT {
                    let reason = "session timed out";
                    send_close(&mut ws_sink, close_code::SESSION_TIMED_OUT, reason).await;
                    break;
                }
                if ws_sink.send(Message::Ping(Bytes::new())).await.is_err() {
                    break;
                }
            }
            msg = ws_stream.next() => {
                match msg {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        tracing::debug!("read from {:?} failed: {e}", session);
                        break;
                    }
                    Some(Ok(Message::Text(text))) => {
                        last_seen = tokio::time::Instant::now();
                        tracing::debug!(
                            "ignoring {} byte client frame from {:?}",
                            text.len(),
                            session
                        );
                    }
                    Some(Ok(_)) => {
                        last_seen = tokio::time::Instant::now();
                    }
                }
            }
        }
    }

    session.close();
    state.sessions.remove(&session_ref).await;
    state.groups.unsub_all(&session_ref).await;
    // Anything still queued is released with the receiver
    drop(outbound);
    tracing::info!("session closed {:?}", session);
}

/// Bounded write, so a stalled client cannot hold the loop away from its
/// close and heartbeat branches.
async fn send_within<S>(
    sink: &mut S,
    msg: Message,
    limit: Duration,
) -> Result<(), WriteError<S::Error>>
where
    S: Sink<Message> + Unpin,
{
    match tokio::time::timeout(limit, sink.send(msg)).await {
        Ok(result) => result.map_err(WriteError::Sink),
        Err(_) => Err(WriteError::Stalled(limit)),
    }
}

fn to_message(payload: &PayloadRef) -> Message {
    let bytes = payload.bytes();
    match std::str::from_utf8(bytes) {
        Ok(text) => Message::Text(text.into()),
        Err(_) => Message::Binary(bytes.clone()),
    }
}

async fn send_close(ws_sink: &mut SplitSink<WebSocket, Message>, code: u16, reason: &str) {
    let frame = CloseFrame {
        code,
        reason: reason.into(),
    };
    let _ = ws_sink.send(Message::Close(Some(frame))).await;
}
