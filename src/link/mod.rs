//! The link protocol between the logic tier and gateway nodes.
//!
//! A gateway opens a WebSocket to `/link` on every logic node it is
//! configured with and sends a [`LinkRequest`] as its first frame. From then
//! on the logic node only pushes [`LinkResponse`] frames down the stream.

pub mod client;
pub mod hub;
pub mod server;
pub mod status;

use std::collections::BTreeMap;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

pub use client::{GatewayLinkClient, LinkState};
pub use hub::{GatewayLinkHub, LinkRegistration};
pub use status::{LinkError, LinkStatus};

pub const LINK_PATH: &str = "/link";

/// First frame sent by a gateway on a new link.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkRequest {
    pub name: String,
    pub hostname: String,
}

/// A frame pushed from the logic tier to a gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkResponse {
    PacketMixin(PacketMixin),
    Command(Command),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PacketKind {
    User,
    Group,
    All,
}

/// The routed unit. `payload` is opaque to every layer of this crate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PacketMixin {
    pub kind: PacketKind,
    #[serde(default)]
    pub target_ids: Vec<i64>,
    #[serde(with = "base64_bytes")]
    pub payload: Bytes,
}

impl PacketMixin {
    pub fn to_users(uids: Vec<i64>, payload: impl Into<Bytes>) -> Self {
        Self {
            kind: PacketKind::User,
            target_ids: uids,
            payload: payload.into(),
        }
    }

    pub fn to_groups(gids: Vec<i64>, payload: impl Into<Bytes>) -> Self {
        Self {
            kind: PacketKind::Group,
            target_ids: gids,
            payload: payload.into(),
        }
    }

    pub fn to_all(payload: impl Into<Bytes>) -> Self {
        Self {
            kind: PacketKind::All,
            target_ids: Vec::new(),
            payload: payload.into(),
        }
    }
}

/// Administrative instruction, routed by `kind` on the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Command {
    pub kind: String,
    #[serde(default)]
    pub args: BTreeMap<String, String>,
}

impl Command {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            args: BTreeMap::new(),
        }
    }

    pub fn arg(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.args.insert(key.into(), value.to_string());
        self
    }
}

mod base64_bytes {
    use bytes::Bytes;
    use data_encoding::BASE64;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &Bytes, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&BASE64.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Bytes, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        BASE64
            .decode(encoded.as_bytes())
            .map(Bytes::from)
            .map_err(serde::de::Error::custom)
    }
}
