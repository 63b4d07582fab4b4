use std::fmt;
use std::sync::Arc;

use dashmap::DashSet;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::{SendError, Session};
use crate::payload::PayloadRef;

/// Session backed by a WebSocket connection task.
///
/// Payloads are queued on an unbounded channel that the connection task
/// drains in order; a payload's reference is released once the frame has
/// been written or the queue is torn down.
pub struct WsSession {
    session_id: u64,
    uid: i64,
    token: String,
    groups: DashSet<i64>,
    tx: mpsc::UnboundedSender<PayloadRef>,
    closed: CancellationToken,
}

impl WsSession {
    pub fn new(
        session_id: u64,
        uid: i64,
        token: String,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<PayloadRef>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let session = Arc::new(Self {
            session_id,
            uid,
            token,
            groups: DashSet::new(),
            tx,
            closed: CancellationToken::new(),
        });
        (session, rx)
    }

    /// Resolves when [`Session::close`] has been called.
    pub fn closed_token(&self) -> CancellationToken {
        self.closed.clone()
    }
}

impl Session for WsSession {
    fn session_id(&self) -> u64 {
        self.session_id
    }

    fn uid(&self) -> i64 {
        self.uid
    }

    fn token(&self) -> &str {
        &self.token
    }

    fn is_closed(&self) -> bool {
        self.closed.is_cancelled() || self.tx.is_closed()
    }

    fn subscribed_group_ids(&self) -> &DashSet<i64> {
        &self.groups
    }

    fn send(&self, payload: PayloadRef) -> Result<(), SendError> {
        if self.closed.is_cancelled() {
            return Err(SendError::Closed(self.session_id));
        }
        self.tx
            .send(payload)
            .map_err(|_| SendError::Closed(self.session_id))
    }

    fn close(&self) {
        self.closed.cancel();
    }
}

impl fmt::Debug for WsSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("session_id", &self.session_id)
            .field("uid", &self.uid)
            .finish()
    }
}
