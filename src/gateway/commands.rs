use std::sync::Arc;

use async_trait::async_trait;

use crate::link::Command;
use crate::session::{GroupSubscriptionRegistry, SessionRegistry};

pub const SUB_GROUP: &str = "sub_group";
pub const UNSUB_GROUP: &str = "unsub_group";
pub const KICK_USER: &str = "kick_user";

#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("missing argument {0:?}")]
    MissingArg(&'static str),
    #[error("invalid argument {name:?}: {value:?}")]
    InvalidArg { name: &'static str, value: String },
}

/// Handles one kind of [`Command`] pushed down a link.
#[async_trait]
pub trait CommandHandler: Send + Sync {
    fn kind(&self) -> &'static str;

    async fn handle(&self, command: &Command) -> Result<(), CommandError>;
}

fn arg<'a>(command: &'a Command, name: &'static str) -> Result<&'a str, CommandError> {
    command
        .args
        .get(name)
        .map(String::as_str)
        .ok_or(CommandError::MissingArg(name))
}

fn parse_id(name: &'static str, value: &str) -> Result<i64, CommandError> {
    value.trim().parse().map_err(|_| CommandError::InvalidArg {
        name,
        value: value.to_string(),
    })
}

fn parse_id_list(name: &'static str, value: &str) -> Result<Vec<i64>, CommandError> {
    value
        .split(',')
        .filter(|part| !part.trim().is_empty())
        .map(|part| parse_id(name, part))
        .collect()
}

/// `sub_group {uid, gids}`: every local session of `uid` joins `gids`, so a
/// group joined mid-session is live without a reconnect.
pub struct SubGroupHandler {
    sessions: Arc<SessionRegistry>,
    groups: Arc<GroupSubscriptionRegistry>,
}

impl SubGroupHandler {
    pub fn new(sessions: Arc<SessionRegistry>, groups: Arc<GroupSubscriptionRegistry>) -> Self {
        Self { sessions, groups }
    }
}

#[async_trait]
impl CommandHandler for SubGroupHandler {
    fn kind(&self) -> &'static str {
        SUB_GROUP
    }

    async fn handle(&self, command: &Command) -> Result<(), CommandError> {
        let uid = parse_id("uid", arg(command, "uid")?)?;
        let gids = parse_id_list("gids", arg(command, "gids")?)?;

        for session in self.sessions.find_by_uid(uid) {
            tracing::debug!("{:?} joining groups {:?}", session, gids);
            self.groups.sub_groups(&session, &gids).await;
        }
        Ok(())
    }
}

/// `unsub_group {uid, gids}`: every local session of `uid` leaves `gids`.
pub struct UnsubGroupHandler {
    sessions: Arc<SessionRegistry>,
    groups: Arc<GroupSubscriptionRegistry>,
}

impl UnsubGroupHandler {
    pub fn new(sessions: Arc<SessionRegistry>, groups: Arc<GroupSubscriptionRegistry>) -> Self {
        Self { sessions, groups }
    }
}

#[async_trait]
impl CommandHandler for UnsubGroupHandler {
    fn kind(&self) -> &'static str {
        UNSUB_GROUP
    }

    async fn handle(&self, command: &Command) -> Result<(), CommandError> {
        let uid = parse_id("uid", arg(command, "uid")?)?;
        let gids = parse_id_list("gids", arg(command, "gids")?)?;

        for session in self.sessions.find_by_uid(uid) {
            tracing::debug!("{:?} leaving groups {:?}", session, gids);
            self.groups.unsub_groups(&session, &gids).await;
        }
        Ok(())
    }
}

/// `kick_user {uid}`: detach and close every local session of `uid`.
pub struct KickUserHandler {
    sessions: Arc<SessionRegistry>,
    groups: Arc<GroupSubscriptionRegistry>,
}

impl KickUserHandler {
    pub fn new(sessions: Arc<SessionRegistry>, groups: Arc<GroupSubscriptionRegistry>) -> Self {
        Self { sessions, groups }
    }
}

#[async_trait]
impl CommandHandler for KickUserHandler {
    fn kind(&self) -> &'static str {
        KICK_USER
    }

    async fn handle(&self, command: &Command) -> Result<(), CommandError> {
        let uid = parse_id("uid", arg(command, "uid")?)?;
        let detached = self.sessions.remove_by_uid(uid).await;
        if !detached.is_empty() {
            tracing::info!("kicking {} session(s) of uid {uid}", detached.len());
        }
        for session in detached {
            self.groups.unsub_all(&session).await;
            session.close();
        }
        Ok(())
    }
}
