use async_trait::async_trait;
use dashmap::DashMap;

/// Group membership lookups, consulted when a session connects so it starts
/// out subscribed to the user's groups.
#[async_trait]
pub trait GroupDirectory: Send + Sync {
    async fn list_group_ids(&self, uid: i64) -> Vec<i64>;
}

#[derive(Default)]
pub struct MemoryGroupDirectory {
    members: DashMap<i64, Vec<i64>>,
}

impl MemoryGroupDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn join(&self, uid: i64, gid: i64) {
        let mut gids = self.members.entry(uid).or_default();
        if !gids.contains(&gid) {
            gids.push(gid);
        }
    }
}

#[async_trait]
impl GroupDirectory for MemoryGroupDirectory {
    async fn list_group_ids(&self, uid: i64) -> Vec<i64> {
        self.members
            .get(&uid)
            .map(|gids| gids.clone())
            .unwrap_or_default()
    }
}
