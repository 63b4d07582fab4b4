#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use chatlink::auth::TokenTableAuth;
use chatlink::directory::MemoryGroupDirectory;
use chatlink::link::GatewayLinkClient;
use chatlink::routes;
use chatlink::session::SequenceIdGenerator;
use chatlink::state::{GatewayState, LogicState};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

pub type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub const ALICE: (i64, &str) = (1, "alice-token");
pub const BOB: (i64, &str) = (2, "bob-token");

/// Binds a TCP listener on port 0, spawns the router, and returns the base URL.
pub async fn serve(app: axum::Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("ws://127.0.0.1:{}", addr.port())
}

/// Polls `cond` until it holds, failing the test after five seconds.
pub async fn wait_until(what: &str, cond: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !cond() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for {what}"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// A logic node serving `/link` and the ingress API.
pub struct LogicNode {
    pub state: LogicState,
    pub url: String,
}

impl LogicNode {
    pub async fn spawn() -> Self {
        let state = LogicState::new(64);
        let url = serve(routes::logic_router(state.clone())).await;
        Self { state, url }
    }

    /// A router sharing this node's hub, for `oneshot()` calls.
    pub fn router(&self) -> axum::Router {
        routes::logic_router(self.state.clone())
    }
}

/// A gateway node linked to one or more logic nodes.
pub struct GatewayNode {
    pub state: GatewayState,
    pub directory: Arc<MemoryGroupDirectory>,
    pub client: GatewayLinkClient,
    pub url: String,
}

impl GatewayNode {
    pub async fn spawn(logic_urls: &[String]) -> Self {
        let auth = TokenTableAuth::from_pairs([ALICE, BOB]);
        let directory = Arc::new(MemoryGroupDirectory::new());
        let state = GatewayState::new(
            Arc::new(auth),
            directory.clone(),
            Arc::new(SequenceIdGenerator::starting_after(0)),
        );

        let client = GatewayLinkClient::new("test-gw", logic_urls, Arc::new(state.dispatcher()));
        client.start();

        let url = serve(routes::gateway_router(state.clone())).await;
        Self {
            state,
            directory,
            client,
            url,
        }
    }

    pub async fn connect(&self, token: &str) -> WsClient {
        let mut req = format!("{}/ws", self.url).into_client_request().unwrap();
        req.headers_mut()
            .insert("Authorization", format!("Bearer {token}").parse().unwrap());
        let (ws, _) = connect_async(req).await.unwrap();
        ws
    }

    /// Connects and waits until the session is registered on this node.
    pub async fn connect_registered(&self, token: &str) -> WsClient {
        let before = self.state.sessions.len();
        let ws = self.connect(token).await;
        let sessions = Arc::clone(&self.state.sessions);
        wait_until("session registration", move || sessions.len() > before).await;
        ws
    }
}

impl Drop for GatewayNode {
    fn drop(&mut self) {
        self.client.stop();
    }
}

/// Next text frame, skipping pings. Fails the test after five seconds.
pub async fn next_text(ws: &mut WsClient) -> String {
    use futures_util::StreamExt;

    let deadline = Duration::from_secs(5);
    loop {
        let msg = tokio::time::timeout(deadline, ws.next())
            .await
            .expect("timed out waiting for a frame")
            .expect("stream ended")
            .expect("read failed");
        match msg {
            Message::Text(text) => return text.as_str().to_string(),
            Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("expected text frame, got {other:?}"),
        }
    }
}

/// Close code of the next close frame, skipping pings.
pub async fn next_close_code(ws: &mut WsClient) -> u16 {
    use futures_util::StreamExt;

    loop {
        let msg = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timed out waiting for close")
            .expect("stream ended")
            .expect("read failed");
        match msg {
            Message::Close(Some(frame)) => return u16::from(frame.code),
            Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("expected close frame, got {other:?}"),
        }
    }
}

/// Asserts nothing but pings arrive within `within`.
pub async fn assert_silent(ws: &mut WsClient, within: Duration) {
    use futures_util::StreamExt;

    let deadline = tokio::time::Instant::now() + within;
    loop {
        match tokio::time::timeout_at(deadline, ws.next()).await {
            Err(_) => return,
            Ok(Some(Ok(Message::Ping(_)))) | Ok(Some(Ok(Message::Pong(_)))) => continue,
            Ok(other) => panic!("expected silence, got {other:?}"),
        }
    }
}
