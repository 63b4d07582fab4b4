pub mod push;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::link::LINK_PATH;
use crate::state::{GatewayState, LogicState};

/// Router of a logic node: the link endpoint gateways dial, plus the
/// ingress API that pushes into it.
pub fn logic_router(state: LogicState) -> Router {
    let api = Router::new()
        .route("/push", post(push::push))
        .route("/commands", post(push::command))
        .route("/links", get(push::list_links));

    Router::new()
        .route(LINK_PATH, get(crate::link::server::link_upgrade))
        .nest("/api/v1", api)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub fn gateway_router(state: GatewayState) -> Router {
    Router::new()
        .route("/ws", get(crate::gateway::ws_upgrade))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
