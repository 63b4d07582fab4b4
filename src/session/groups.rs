use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot};

use super::{same_session, SessionRef};

enum GroupOp {
    Sub(SessionRef, Vec<i64>, oneshot::Sender<()>),
    Unsub(SessionRef, Vec<i64>, oneshot::Sender<()>),
}

/// Reverse index from group id to the sessions subscribed to it.
///
/// The writer task is the only place that touches either the buckets or a
/// session's `subscribed_group_ids`, so the two never disagree.
pub struct GroupSubscriptionRegistry {
    groups: Arc<DashMap<i64, Vec<SessionRef>>>,
    ops: mpsc::UnboundedSender<GroupOp>,
}

impl GroupSubscriptionRegistry {
    /// Must be called inside a tokio runtime; spawns the writer task.
    pub fn new() -> Self {
        let groups = Arc::new(DashMap::new());
        let (ops, rx) = mpsc::unbounded_channel();
        tokio::spawn(run_writer(Arc::clone(&groups), rx));
        Self { groups, ops }
    }

    pub async fn sub_groups(&self, session: &SessionRef, gids: &[i64]) {
        if gids.is_empty() {
            return;
        }
        let (done, wait) = oneshot::channel();
        self.submit(GroupOp::Sub(Arc::clone(session), gids.to_vec(), done));
        let _ = wait.await;
    }

    pub async fn unsub_groups(&self, session: &SessionRef, gids: &[i64]) {
        if gids.is_empty() {
            return;
        }
        let (done, wait) = oneshot::channel();
        self.submit(GroupOp::Unsub(Arc::clone(session), gids.to_vec(), done));
        let _ = wait.await;
    }

    /// Leave every group the session is currently in.
    pub async fn unsub_all(&self, session: &SessionRef) {
        let gids: Vec<i64> = session.subscribed_group_ids().iter().map(|g| *g).collect();
        self.unsub_groups(session, &gids).await;
    }

    pub fn find_by_group_id(&self, gid: i64) -> Vec<SessionRef> {
        self.groups
            .get(&gid)
            .map(|bucket| bucket.clone())
            .unwrap_or_default()
    }

    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    fn submit(&self, op: GroupOp) {
        if self.ops.send(op).is_err() {
            tracing::error!("group registry writer has stopped, mutation dropped");
        }
    }
}

fn subscribe(groups: &DashMap<i64, Vec<SessionRef>>, session: &SessionRef, gids: &[i64]) {
    for &gid in gids {
        let mut bucket = groups.entry(gid).or_default();
        if !bucket.iter().any(|s| same_session(s, session)) {
            bucket.push(Arc::clone(session));
        }
        session.subscribed_group_ids().insert(gid);
    }
}

fn unsubscribe(groups: &DashMap<i64, Vec<SessionRef>>, session: &SessionRef, gids: &[i64]) {
    for &gid in gids {
        session.subscribed_group_ids().remove(&gid);
        if let Some(mut bucket) = groups.get_mut(&gid) {
            bucket.retain(|s| !same_session(s, session));
        }
        groups.remove_if(&gid, |_, bucket| bucket.is_empty());
    }
}

async fn run_writer(
    groups: Arc<DashMap<i64, Vec<SessionRef>>>,
    mut rx: mpsc::UnboundedReceiver<GroupOp>,
) {
    while let Some(op) = rx.recv().await {
        match op {
            GroupOp::Sub(session, gids, done) => {
                subscribe(&groups, &session, &gids);
                let _ = done.send(());
            }
            GroupOp::Unsub(session, gids, done) => {
                unsubscribe(&groups, &session, &gids);
                let _ = done.send(());
            }
        }
    }
}
