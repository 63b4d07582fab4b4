use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use axum::extract::ws::Utf8Bytes;
use bytes::Bytes;
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;

use super::{Command, LinkResponse, PacketMixin};

/// One gateway stream accepted by this logic node.
struct GatewayLink {
    name: String,
    hostname: String,
    tx: mpsc::Sender<Utf8Bytes>,
    cancel: CancellationToken,
}

/// Handed back to the link server task that owns the stream. Cancelling the
/// token removes the link from the hub.
#[derive(Debug)]
pub struct LinkRegistration {
    pub id: u64,
    pub cancel: CancellationToken,
}

#[derive(Debug, Clone, Serialize)]
pub struct LinkInfo {
    pub id: u64,
    pub name: String,
    pub hostname: String,
}

/// Fan-out point of the logic tier.
///
/// Every envelope goes to every connected gateway; the gateways decide which
/// of their sessions, if any, it is for.
pub struct GatewayLinkHub {
    links: DashMap<u64, GatewayLink>,
    next_id: AtomicU64,
}

impl GatewayLinkHub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            links: DashMap::new(),
            next_id: AtomicU64::new(0),
        })
    }

    /// Add a link. The returned token doubles as the removal trigger: once it
    /// is cancelled the link is dropped from the hub without any polling.
    pub fn register(
        self: &Arc<Self>,
        name: String,
        hostname: String,
        tx: mpsc::Sender<Utf8Bytes>,
    ) -> LinkRegistration {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let cancel = CancellationToken::new();
        tracing::info!("gateway link registered id={id} name={name} hostname={hostname}");
        self.links.insert(
            id,
            GatewayLink {
                name,
                hostname,
                tx,
                cancel: cancel.clone(),
            },
        );

        let hub: Weak<Self> = Arc::downgrade(self);
        let watched = cancel.clone();
        tokio::spawn(async move {
            watched.cancelled().await;
            if let Some(hub) = hub.upgrade() {
                hub.remove(id);
            }
        });

        LinkRegistration { id, cancel }
    }

    /// Returns `false` when the link was already gone.
    pub fn remove(&self, id: u64) -> bool {
        match self.links.remove(&id) {
            Some((_, link)) => {
                link.cancel.cancel();
                tracing::info!(
                    "gateway link removed id={id} name={} hostname={}",
                    link.name,
                    link.hostname
                );
                true
            }
            None => false,
        }
    }

    pub fn broadcast(&self, packet: PacketMixin) -> usize {
        self.push(&LinkResponse::PacketMixin(packet))
    }

    pub fn send_command(&self, command: Command) -> usize {
        tracing::debug!("sending command kind={}", command.kind);
        self.push(&LinkResponse::Command(command))
    }

    pub fn send_to_user(&self, uids: Vec<i64>, payload: impl Into<Bytes>) -> usize {
        self.broadcast(PacketMixin::to_users(uids, payload))
    }

    pub fn send_to_group(&self, gids: Vec<i64>, payload: impl Into<Bytes>) -> usize {
        self.broadcast(PacketMixin::to_groups(gids, payload))
    }

    pub fn send_to_all(&self, payload: impl Into<Bytes>) -> usize {
        self.broadcast(PacketMixin::to_all(payload))
    }

    pub fn links(&self) -> Vec<LinkInfo> {
        let mut links: Vec<LinkInfo> = self
            .links
            .iter()
            .filter(|entry| !entry.value().cancel.is_cancelled())
            .map(|entry| LinkInfo {
                id: *entry.key(),
                name: entry.value().name.clone(),
                hostname: entry.value().hostname.clone(),
            })
            .collect();
        links.sort_by_key(|l| l.id);
        links
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    /// Cancel every link; their server tasks close the streams.
    pub fn shutdown(&self) {
        for entry in self.links.iter() {
            entry.value().cancel.cancel();
        }
    }

    /// Encode once, then hand the frame to each live link without waiting on
    /// any of them. Returns how many links accepted it.
    fn push(&self, frame: &LinkResponse) -> usize {
        let encoded = match serde_json::to_string(frame) {
            Ok(json) => Utf8Bytes::from(json),
            Err(e) => {
                tracing::error!("failed to encode link frame: {e}");
                return 0;
            }
        };

        let mut delivered = 0;
        let mut dead = Vec::new();
        for entry in self.links.iter() {
            let link = entry.value();
            if link.cancel.is_cancelled() {
                dead.push(*entry.key());
                continue;
            }
            match link.tx.try_send(encoded.clone()) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    tracing::warn!(
                        "gateway link {} ({}) is backed up, frame dropped",
                        entry.key(),
                        link.name
                    );
                }
                Err(TrySendError::Closed(_)) => {
                    link.cancel.cancel();
                    dead.push(*entry.key());
                }
            }
        }

        for id in dead {
            self.remove(id);
        }
        delivered
    }
}
