use std::sync::Arc;

use crate::auth::AuthService;
use crate::directory::GroupDirectory;
use crate::gateway::commands::{KickUserHandler, SubGroupHandler, UnsubGroupHandler};
use crate::gateway::dispatcher::MessageDispatcher;
use crate::link::GatewayLinkHub;
use crate::session::{GroupSubscriptionRegistry, SessionIdGenerator, SessionRegistry};

/// State of a logic node: the hub of linked gateways.
#[derive(Clone)]
pub struct LogicState {
    pub hub: Arc<GatewayLinkHub>,
    /// Outbound frame buffer per link.
    pub link_buffer: usize,
}

impl LogicState {
    pub fn new(link_buffer: usize) -> Self {
        Self {
            hub: GatewayLinkHub::new(),
            link_buffer,
        }
    }
}

#[derive(Clone)]
pub struct GatewayState {
    pub sessions: Arc<SessionRegistry>,
    pub groups: Arc<GroupSubscriptionRegistry>,
    pub auth: Arc<dyn AuthService>,
    pub directory: Arc<dyn GroupDirectory>,
    pub ids: Arc<dyn SessionIdGenerator>,
}

impl GatewayState {
    pub fn new(
        auth: Arc<dyn AuthService>,
        directory: Arc<dyn GroupDirectory>,
        ids: Arc<dyn SessionIdGenerator>,
    ) -> Self {
        Self {
            sessions: Arc::new(SessionRegistry::new()),
            groups: Arc::new(GroupSubscriptionRegistry::new()),
            auth,
            directory,
            ids,
        }
    }

    /// A dispatcher over this node's registries with the built-in command
    /// handlers installed.
    pub fn dispatcher(&self) -> MessageDispatcher {
        let sub = SubGroupHandler::new(Arc::clone(&self.sessions), Arc::clone(&self.groups));
        let unsub = UnsubGroupHandler::new(Arc::clone(&self.sessions), Arc::clone(&self.groups));
        let kick = KickUserHandler::new(Arc::clone(&self.sessions), Arc::clone(&self.groups));
        MessageDispatcher::new(Arc::clone(&self.sessions), Arc::clone(&self.groups))
            .with_handler(Arc::new(sub))
            .with_handler(Arc::new(unsub))
            .with_handler(Arc::new(kick))
    }
}
