use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot};

use super::{same_session, SessionRef};

enum RegistryOp {
    Add(SessionRef, oneshot::Sender<()>),
    Remove(SessionRef, oneshot::Sender<()>),
    RemoveByUid(i64, oneshot::Sender<Vec<SessionRef>>),
}

#[derive(Default)]
struct Indexes {
    by_id: DashMap<u64, SessionRef>,
    by_uid: DashMap<i64, Vec<SessionRef>>,
}

impl Indexes {
    fn add(&self, session: SessionRef) {
        if self.by_id.contains_key(&session.session_id()) {
            return;
        }
        self.by_id.insert(session.session_id(), Arc::clone(&session));
        self.by_uid.entry(session.uid()).or_default().push(session);
    }

    fn remove(&self, session: &SessionRef) {
        if self.by_id.remove(&session.session_id()).is_none() {
            return;
        }
        let uid = session.uid();
        if let Some(mut bucket) = self.by_uid.get_mut(&uid) {
            bucket.retain(|s| !same_session(s, session));
        }
        self.by_uid.remove_if(&uid, |_, bucket| bucket.is_empty());
    }

    fn remove_by_uid(&self, uid: i64) -> Vec<SessionRef> {
        let Some((_, detached)) = self.by_uid.remove(&uid) else {
            return Vec::new();
        };
        for session in &detached {
            self.by_id.remove(&session.session_id());
        }
        detached
    }
}

/// Live sessions on this node, indexed by session id and by uid.
///
/// Mutations are funnelled through one writer task so both indexes move
/// together; lookups read the concurrent maps directly.
pub struct SessionRegistry {
    indexes: Arc<Indexes>,
    ops: mpsc::UnboundedSender<RegistryOp>,
}

impl SessionRegistry {
    /// Must be called inside a tokio runtime; spawns the writer task.
    pub fn new() -> Self {
        let indexes = Arc::new(Indexes::default());
        let (ops, rx) = mpsc::unbounded_channel();
        tokio::spawn(run_writer(Arc::clone(&indexes), rx));
        Self { indexes, ops }
    }

    pub async fn add(&self, session: SessionRef) {
        let (done, wait) = oneshot::channel();
        self.submit(RegistryOp::Add(session, done));
        let _ = wait.await;
    }

    pub async fn remove(&self, session: &SessionRef) {
        let (done, wait) = oneshot::channel();
        self.submit(RegistryOp::Remove(Arc::clone(session), done));
        let _ = wait.await;
    }

    /// Detach every session of `uid` in one step and hand them back.
    pub async fn remove_by_uid(&self, uid: i64) -> Vec<SessionRef> {
        let (reply, wait) = oneshot::channel();
        self.submit(RegistryOp::RemoveByUid(uid, reply));
        wait.await.unwrap_or_default()
    }

    pub fn find_by_uid(&self, uid: i64) -> Vec<SessionRef> {
        self.indexes
            .by_uid
            .get(&uid)
            .map(|bucket| bucket.clone())
            .unwrap_or_default()
    }

    pub fn all(&self) -> Vec<SessionRef> {
        self.indexes
            .by_id
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.indexes.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indexes.by_id.is_empty()
    }

    fn submit(&self, op: RegistryOp) {
        if self.ops.send(op).is_err() {
            tracing::error!("session registry writer has stopped, mutation dropped");
        }
    }
}

async fn run_writer(indexes: Arc<Indexes>, mut rx: mpsc::UnboundedReceiver<RegistryOp>) {
    while let Some(op) = rx.recv().await {
        match op {
            RegistryOp::Add(session, done) => {
                indexes.add(session);
                let _ = done.send(());
            }
            RegistryOp::Remove(session, done) => {
                indexes.remove(&session);
                let _ = done.send(());
            }
            RegistryOp::RemoveByUid(uid, reply) => {
                let _ = reply.send(indexes.remove_by_uid(uid));
            }
        }
    }
}
