use std::collections::HashMap;
use std::sync::Arc;

use crate::link::{Command, LinkResponse, PacketKind, PacketMixin};
use crate::payload::PayloadRef;
use crate::session::{GroupSubscriptionRegistry, SessionRef, SessionRegistry};

use super::commands::CommandHandler;

/// Resolves envelopes arriving over a link to the sessions held on this node
/// and hands each of them the payload.
pub struct MessageDispatcher {
    sessions: Arc<SessionRegistry>,
    groups: Arc<GroupSubscriptionRegistry>,
    handlers: HashMap<String, Arc<dyn CommandHandler>>,
}

impl MessageDispatcher {
    pub fn new(sessions: Arc<SessionRegistry>, groups: Arc<GroupSubscriptionRegistry>) -> Self {
        Self {
            sessions,
            groups,
            handlers: HashMap::new(),
        }
    }

    pub fn with_handler(mut self, handler: Arc<dyn CommandHandler>) -> Self {
        self.handlers.insert(handler.kind().to_string(), handler);
        self
    }

    pub fn sessions(&self) -> &Arc<SessionRegistry> {
        &self.sessions
    }

    pub fn groups(&self) -> &Arc<GroupSubscriptionRegistry> {
        &self.groups
    }

    pub async fn process(&self, response: LinkResponse) {
        match response {
            LinkResponse::PacketMixin(packet) => {
                self.process_packet(packet);
            }
            LinkResponse::Command(command) => self.process_command(command).await,
        }
    }

    /// Returns the number of sessions the payload was queued for.
    pub fn process_packet(&self, packet: PacketMixin) -> usize {
        let targets: Vec<SessionRef> = match packet.kind {
            PacketKind::User => packet
                .target_ids
                .iter()
                .flat_map(|uid| self.sessions.find_by_uid(*uid))
                .collect(),
            PacketKind::Group => packet
                .target_ids
                .iter()
                .flat_map(|gid| self.groups.find_by_group_id(*gid))
                .collect(),
            PacketKind::All => self.sessions.all(),
        };

        if targets.is_empty() {
            tracing::debug!(
                "no local sessions for {:?} {:?}",
                packet.kind,
                packet.target_ids
            );
            return 0;
        }
        fan_out(&targets, PayloadRef::new(packet.payload))
    }

    pub async fn process_command(&self, command: Command) {
        let Some(handler) = self.handlers.get(&command.kind) else {
            tracing::warn!("dropping command of unknown kind {:?}", command.kind);
            return;
        };
        tracing::debug!("handling command {:?}", command);
        if let Err(e) = handler.handle(&command).await {
            tracing::error!("command {} failed: {e}", command.kind);
        }
    }
}

/// Queue the payload on every target. A failing session is closed and
/// skipped; the rest still get their copy. The caller's reference is released
/// on return, the targets' references as their sends settle.
fn fan_out(targets: &[SessionRef], payload: PayloadRef) -> usize {
    let mut delivered = 0;
    for session in targets {
        if session.is_closed() {
            continue;
        }
        match session.send(payload.retain()) {
            Ok(()) => {
                delivered += 1;
                tracing::debug!("queued payload for {:?}", session);
            }
            Err(e) => {
                tracing::error!("failed to deliver to {:?}: {e}", session);
                session.close();
            }
        }
    }
    delivered
}
