use std::convert::Infallible;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use rand::Rng;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use super::{LinkError, LinkRequest, LinkResponse, LinkStatus, LINK_PATH};
use crate::gateway::dispatcher::MessageDispatcher;

/// Consecutive identical failures after which the retry counter starts over.
pub const SKIP_REPEAT_ERROR_LOG_LIMIT: u32 = 16;
const RETRY_STEP: Duration = Duration::from_secs(10);
const MAX_RETRY_WAIT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Disconnected,
    Connecting,
    Linked,
    Backoff,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct RetryDecision {
    pub log: bool,
    pub wait: Duration,
}

/// Retry bookkeeping for one target.
#[derive(Debug, Default)]
pub(crate) struct RetryState {
    retry_count: u32,
    last_status: Option<LinkStatus>,
}

impl RetryState {
    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    pub fn on_message(&mut self) {
        self.retry_count = 0;
        self.last_status = Some(LinkStatus::Ok);
    }

    /// A repeat of the previous status is only logged on the first failure of
    /// a run; the counter wraps at [`SKIP_REPEAT_ERROR_LOG_LIMIT`] so a long
    /// outage still shows up periodically.
    pub fn on_error(&mut self, status: LinkStatus) -> RetryDecision {
        let log = self.last_status != Some(status) || self.retry_count == 0;
        self.last_status = Some(status);

        let wait = (RETRY_STEP * self.retry_count).min(MAX_RETRY_WAIT);
        self.retry_count += 1;
        if self.retry_count == SKIP_REPEAT_ERROR_LOG_LIMIT {
            self.retry_count = 0;
        }
        RetryDecision { log, wait }
    }
}

/// `<prefix>-<pid>.<random>`, so the logic tier can tell gateway processes
/// apart in its logs.
pub fn link_name(prefix: &str) -> String {
    let salt: u16 = rand::thread_rng().gen_range(0..32767);
    format!("{prefix}-{}.{salt}", std::process::id())
}

fn local_hostname() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "UnknownHost".to_string())
}

struct TargetSlot {
    target: String,
    state: Arc<watch::Sender<LinkState>>,
}

/// Keeps one link open to every configured logic node and feeds what arrives
/// into the local [`MessageDispatcher`].
pub struct GatewayLinkClient {
    name: String,
    hostname: String,
    targets: Vec<TargetSlot>,
    dispatcher: Arc<MessageDispatcher>,
    shutdown: CancellationToken,
    started: AtomicBool,
}

impl GatewayLinkClient {
    pub fn new(name_prefix: &str, targets: &[String], dispatcher: Arc<MessageDispatcher>) -> Self {
        let mut slots: Vec<TargetSlot> = Vec::new();
        for target in targets {
            if slots.iter().any(|s| &s.target == target) {
                continue;
            }
            let (state, _) = watch::channel(LinkState::Disconnected);
            slots.push(TargetSlot {
                target: target.clone(),
                state: Arc::new(state),
            });
        }

        Self {
            name: link_name(name_prefix),
            hostname: local_hostname(),
            targets: slots,
            dispatcher,
            shutdown: CancellationToken::new(),
            started: AtomicBool::new(false),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn targets(&self) -> Vec<String> {
        self.targets.iter().map(|s| s.target.clone()).collect()
    }

    /// Spawn one worker per target. A second call does nothing.
    pub fn start(&self) -> Vec<JoinHandle<()>> {
        if self.started.swap(true, Ordering::SeqCst) {
            tracing::warn!("link client {} already started", self.name);
            return Vec::new();
        }
        tracing::info!(
            "link client {} starting, targets {:?}",
            self.name,
            self.targets()
        );

        let request = LinkRequest {
            name: self.name.clone(),
            hostname: self.hostname.clone(),
        };
        self.targets
            .iter()
            .map(|slot| {
                let worker = LinkWorker {
                    target: slot.target.clone(),
                    url: format!("{}{LINK_PATH}", slot.target.trim_end_matches('/')),
                    request: request.clone(),
                    dispatcher: Arc::clone(&self.dispatcher),
                    retry: RetryState::default(),
                    state: Arc::clone(&slot.state),
                };
                tokio::spawn(worker.run(self.shutdown.clone()))
            })
            .collect()
    }

    pub fn stop(&self) {
        self.shutdown.cancel();
    }

    pub fn state(&self, target: &str) -> Option<LinkState> {
        self.slot(target).map(|s| *s.state.borrow())
    }

    pub fn watch_state(&self, target: &str) -> Option<watch::Receiver<LinkState>> {
        self.slot(target).map(|s| s.state.subscribe())
    }

    fn slot(&self, target: &str) -> Option<&TargetSlot> {
        self.targets.iter().find(|s| s.target == target)
    }
}

struct LinkWorker {
    target: String,
    url: String,
    request: LinkRequest,
    dispatcher: Arc<MessageDispatcher>,
    retry: RetryState,
    state: Arc<watch::Sender<LinkState>>,
}

impl LinkWorker {
    async fn run(mut self, shutdown: CancellationToken) {
        loop {
            if self.retry.retry_count() > 0 {
                tracing::info!(
                    "linking name={} target={} retry_count={}",
                    self.request.name,
                    self.target,
                    self.retry.retry_count()
                );
            } else {
                tracing::info!("linking name={} target={}", self.request.name, self.target);
            }
            self.state.send_replace(LinkState::Connecting);

            let err = tokio::select! {
                _ = shutdown.cancelled() => break,
                err = self.link_once() => err,
            };

            let status = err.status();
            let decision = self.retry.on_error(status);
            if decision.log {
                tracing::error!(
                    "link error target={} status={status}: {err}",
                    self.target
                );
            } else {
                tracing::debug!("link error target={} status={status} (repeat)", self.target);
            }

            self.state.send_replace(LinkState::Backoff);
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(decision.wait) => {}
            }
        }

        self.state.send_replace(LinkState::Disconnected);
        tracing::info!("link to {} stopped", self.target);
    }

    async fn link_once(&mut self) -> LinkError {
        match self.try_link().await {
            Err(e) => e,
            Ok(never) => match never {},
        }
    }

    async fn try_link(&mut self) -> Result<Infallible, LinkError> {
        let (ws, _) = connect_async(self.url.as_str())
            .await
            .map_err(LinkError::Connect)?;
        let (mut ws_sink, mut ws_stream) = ws.split();

        let hello = serde_json::to_string(&self.request)
            .map_err(|e| LinkError::Handshake(e.to_string()))?;
        ws_sink
            .send(Message::Text(hello.into()))
            .await
            .map_err(|e| LinkError::Handshake(e.to_string()))?;

        self.state.send_replace(LinkState::Linked);
        tracing::info!("linked to {}", self.target);

        loop {
            match ws_stream.next().await {
                Some(Ok(Message::Text(text))) => {
                    match serde_json::from_str::<LinkResponse>(text.as_str()) {
                        Ok(response) => {
                            self.retry.on_message();
                            self.dispatcher.process(response).await;
                        }
                        Err(e) => {
                            tracing::error!("unsupported link frame from {}: {e}", self.target);
                        }
                    }
                }
                Some(Ok(Message::Close(_))) | None => return Err(LinkError::Closed),
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(LinkError::Transport(e)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{GroupSubscriptionRegistry, SessionRegistry};
    use tokio::net::TcpListener;
    use tokio::sync::mpsc;
    use tokio::time::Instant;

    #[test]
    fn test_repeated_status_logged_once() {
        let mut retry = RetryState::default();
        assert!(retry.on_error(LinkStatus::Unavailable).log);
        assert!(!retry.on_error(LinkStatus::Unavailable).log);
    }

    #[test]
    fn test_changed_status_is_logged() {
        let mut retry = RetryState::default();
        assert!(retry.on_error(LinkStatus::Unavailable).log);
        assert!(!retry.on_error(LinkStatus::Unavailable).log);
        assert!(retry.on_error(LinkStatus::Internal).log);
        assert!(!retry.on_error(LinkStatus::Internal).log);
    }

    #[test]
    fn test_suppression_window_resets_every_sixteen_failures() {
        let mut retry = RetryState::default();
        let logged: Vec<bool> = (0..40)
            .map(|_| retry.on_error(LinkStatus::Unavailable).log)
            .collect();
        let positions: Vec<usize> = logged
            .iter()
            .enumerate()
            .filter(|(_, log)| **log)
            .map(|(i, _)| i)
            .collect();
        assert_eq!(positions, vec![0, 16, 32]);
    }

    #[test]
    fn test_wait_grows_by_ten_seconds_and_caps_at_sixty() {
        let mut retry = RetryState::default();
        let waits: Vec<u64> = (0..9)
            .map(|_| retry.on_error(LinkStatus::Unavailable).wait.as_secs())
            .collect();
        assert_eq!(waits, vec![0, 10, 20, 30, 40, 50, 60, 60, 60]);
    }

    #[test]
    fn test_message_resets_retry() {
        let mut retry = RetryState::default();
        retry.on_error(LinkStatus::Unavailable);
        retry.on_error(LinkStatus::Unavailable);
        assert_eq!(retry.retry_count(), 2);

        retry.on_message();
        assert_eq!(retry.retry_count(), 0);
        let decision = retry.on_error(LinkStatus::Unavailable);
        assert!(decision.log);
        assert_eq!(decision.wait, Duration::ZERO);
    }

    #[test]
    fn test_link_name_format() {
        let name = link_name("gw");
        let rest = name.strip_prefix("gw-").unwrap();
        let (pid, salt) = rest.split_once('.').unwrap();
        assert_eq!(pid.parse::<u32>().unwrap(), std::process::id());
        assert!(salt.parse::<u16>().unwrap() < 32767);
    }

    /// A listener that hangs up on every connection and reports when each
    /// attempt arrived on the (paused) tokio clock.
    async fn hang_up_listener() -> (String, mpsc::UnboundedReceiver<Instant>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let target = format!("ws://{}", listener.local_addr().unwrap());
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                drop(stream);
                if tx.send(Instant::now()).is_err() {
                    break;
                }
            }
        });
        (target, rx)
    }

    fn idle_dispatcher() -> Arc<MessageDispatcher> {
        Arc::new(MessageDispatcher::new(
            Arc::new(SessionRegistry::new()),
            Arc::new(GroupSubscriptionRegistry::new()),
        ))
    }

    #[tokio::test(start_paused = true)]
    async fn test_worker_waits_between_failed_attempts() {
        let (target, mut attempts) = hang_up_listener().await;
        let client = GatewayLinkClient::new("gw", &[target.clone()], idle_dispatcher());
        let workers = client.start();

        let first = attempts.recv().await.unwrap();
        let second = attempts.recv().await.unwrap();
        let third = attempts.recv().await.unwrap();

        // retry 0 reconnects at once, retry 1 sleeps 10s
        assert!(second - first < RETRY_STEP);
        assert!(third - second >= RETRY_STEP);
        assert!(third - second < RETRY_STEP * 2);

        client.stop();
        for worker in workers {
            worker.await.unwrap();
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_interrupts_backoff() {
        let (target, mut attempts) = hang_up_listener().await;
        let client = GatewayLinkClient::new("gw", &[target.clone()], idle_dispatcher());
        let mut state = client.watch_state(&target).unwrap();
        let workers = client.start();

        attempts.recv().await.unwrap();
        attempts.recv().await.unwrap();
        // The second failure parks the worker in a 10s backoff.
        state.wait_for(|s| *s == LinkState::Backoff).await.unwrap();
        assert_eq!(client.state(&target), Some(LinkState::Backoff));
        assert!(attempts.try_recv().is_err());

        let stopped_at = Instant::now();
        client.stop();
        state
            .wait_for(|s| *s == LinkState::Disconnected)
            .await
            .unwrap();
        assert!(stopped_at.elapsed() < RETRY_STEP);

        for worker in workers {
            worker.await.unwrap();
        }
        assert!(attempts.try_recv().is_err());
    }
}
