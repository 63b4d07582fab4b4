pub mod groups;
pub mod id;
pub mod registry;
pub mod ws;

use std::fmt;
use std::sync::Arc;

use dashmap::DashSet;

use crate::payload::PayloadRef;

pub use groups::GroupSubscriptionRegistry;
pub use id::{SequenceIdGenerator, SessionIdGenerator, SnowflakeIdGenerator};
pub use registry::SessionRegistry;
pub use ws::WsSession;

pub type SessionRef = Arc<dyn Session>;

#[derive(Debug, thiserror::Error)]
pub enum SendError {
    #[error("session {0} is closed")]
    Closed(u64),
}

/// One authenticated client connection held by this gateway node.
pub trait Session: Send + Sync + fmt::Debug {
    fn session_id(&self) -> u64;

    fn uid(&self) -> i64;

    fn token(&self) -> &str;

    fn is_closed(&self) -> bool;

    /// Group ids this session is subscribed to. Only the group registry's
    /// writer task mutates it.
    fn subscribed_group_ids(&self) -> &DashSet<i64>;

    /// Queue a payload for delivery. Returns once the payload is queued, not
    /// once it has been written.
    fn send(&self, payload: PayloadRef) -> Result<(), SendError>;

    fn close(&self);
}

/// Session ids are unique per process, so buckets compare by id.
pub(crate) fn same_session(a: &SessionRef, b: &SessionRef) -> bool {
    a.session_id() == b.session_id()
}
