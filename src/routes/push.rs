use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::Json;
use data_encoding::BASE64;
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::link::hub::LinkInfo;
use crate::link::{Command, PacketKind, PacketMixin};
use crate::state::LogicState;

#[derive(Debug, Deserialize)]
pub struct PushRequest {
    pub kind: PacketKind,
    #[serde(default)]
    pub target_ids: Vec<i64>,
    pub payload: String,
    /// When set, `payload` is standard base64 and is decoded before sending.
    #[serde(default)]
    pub base64: bool,
}

#[derive(Debug, Serialize)]
pub struct PushResponse {
    pub links: usize,
}

pub async fn push(
    State(state): State<LogicState>,
    body: Result<Json<PushRequest>, JsonRejection>,
) -> Result<Json<PushResponse>, AppError> {
    let Json(req) = body?;

    if req.kind != PacketKind::All && req.target_ids.is_empty() {
        return Err(AppError::BadRequest(format!(
            "{:?} packets need at least one target id",
            req.kind
        )));
    }

    let payload = if req.base64 {
        BASE64
            .decode(req.payload.as_bytes())
            .map_err(|e| AppError::BadRequest(format!("payload is not valid base64: {e}")))?
    } else {
        req.payload.into_bytes()
    };

    let packet = PacketMixin {
        kind: req.kind,
        target_ids: req.target_ids,
        payload: payload.into(),
    };
    let links = state.hub.broadcast(packet);
    Ok(Json(PushResponse { links }))
}

pub async fn command(
    State(state): State<LogicState>,
    body: Result<Json<Command>, JsonRejection>,
) -> Result<Json<PushResponse>, AppError> {
    let Json(command) = body?;

    if command.kind.trim().is_empty() {
        return Err(AppError::BadRequest("command kind is required".to_string()));
    }

    let links = state.hub.send_command(command);
    Ok(Json(PushResponse { links }))
}

pub async fn list_links(State(state): State<LogicState>) -> Json<Vec<LinkInfo>> {
    Json(state.hub.links())
}
