use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use futures_util::stream::SplitStream;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use super::LinkRequest;
use crate::state::LogicState;

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

pub async fn link_upgrade(ws: WebSocketUpgrade, State(state): State<LogicState>) -> Response {
    ws.on_upgrade(move |socket| handle_link(socket, state))
}

async fn handle_link(socket: WebSocket, state: LogicState) {
    let (mut ws_sink, mut ws_stream) = socket.split();

    let request = match tokio::time::timeout(HANDSHAKE_TIMEOUT, read_request(&mut ws_stream)).await
    {
        Ok(Some(request)) => request,
        Ok(None) => return,
        Err(_) => {
            tracing::warn!("link handshake timed out");
            return;
        }
    };

    let (tx, mut rx) = mpsc::channel(state.link_buffer);
    let registration = state
        .hub
        .register(request.name.clone(), request.hostname.clone(), tx);

    loop {
        tokio::select! {
            _ = registration.cancel.cancelled() => {
                let _ = ws_sink.send(Message::Close(None)).await;
                break;
            }
            frame = rx.recv() => {
                let Some(frame) = frame else { break };
                if let Err(e) = ws_sink.send(Message::Text(frame)).await {
                    tracing::warn!("link {} write failed: {e}", request.name);
                    break;
                }
            }
            msg = ws_stream.next() => {
                match msg {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        tracing::debug!("link {} read failed: {e}", request.name);
                        break;
                    }
                    _ => {}
                }
            }
        }
    }

    // Removes the link from the hub via its cancellation watcher
    registration.cancel.cancel();
}

async fn read_request(ws_stream: &mut SplitStream<WebSocket>) -> Option<LinkRequest> {
    while let Some(msg) = ws_stream.next().await {
        match msg {
            Ok(Message::Text(text)) => {
                return match serde_json::from_str::<LinkRequest>(text.as_str()) {
                    Ok(request) => Some(request),
                    Err(e) => {
                        tracing::warn!("invalid link request: {e}");
                        None
                    }
                };
            }
            Ok(Message::Close(_)) | Err(_) => return None,
            Ok(_) => {}
        }
    }
    None
}
