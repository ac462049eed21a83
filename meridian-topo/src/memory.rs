//! In-memory topology server.
//!
//! Backs tests and local development. State lives in async-guarded maps
//! and can be swapped mid-test, which is how resharding scenarios are
//! driven: point a keyspace at a new partitioning between two dispatches
//! and the router observes the change on its next resolution.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use meridian_core::{TabletAlias, TabletType};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use crate::replication::{ReplicationGraphStore, ReplicationUpdate, ShardReplication};
use crate::server::{EndPoint, SrvKeyspace, SrvTopoServer, TopoError, TopoResult};

/// In-memory implementation of [`SrvTopoServer`] and
/// [`ReplicationGraphStore`].
#[derive(Default)]
pub struct MemoryTopoServer {
    keyspaces: RwLock<HashMap<(String, String), SrvKeyspace>>,
    endpoints: RwLock<HashMap<(String, String, String, TabletType), Vec<EndPoint>>>,
    replication: RwLock<HashMap<(String, String, String), ShardReplication>>,
    tablets: RwLock<HashMap<TabletAlias, TabletType>>,
    srv_keyspace_reads: AtomicU64,
}

impl MemoryTopoServer {
    /// Creates an empty server.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs or replaces a keyspace's serving record.
    pub async fn set_srv_keyspace(&self, cell: &str, keyspace: &str, srv: SrvKeyspace) {
        self.keyspaces
            .write()
            .await
            .insert((cell.to_string(), keyspace.to_string()), srv);
    }

    /// Deletes a keyspace's serving record.
    pub async fn remove_srv_keyspace(&self, cell: &str, keyspace: &str) {
        self.keyspaces
            .write()
            .await
            .remove(&(cell.to_string(), keyspace.to_string()));
    }

    /// Installs the endpoint list for a shard.
    pub async fn set_end_points(
        &self,
        cell: &str,
        keyspace: &str,
        shard: &str,
        tablet_type: TabletType,
        endpoints: Vec<EndPoint>,
    ) {
        self.endpoints.write().await.insert(
            (
                cell.to_string(),
                keyspace.to_string(),
                shard.to_string(),
                tablet_type,
            ),
            endpoints,
        );
    }

    /// Registers a tablet's current type, for replication graph fixes.
    pub async fn set_tablet(&self, alias: TabletAlias, tablet_type: TabletType) {
        self.tablets.write().await.insert(alias, tablet_type);
    }

    /// Removes a tablet, as if it were deleted from the topology.
    pub async fn remove_tablet(&self, alias: &TabletAlias) {
        self.tablets.write().await.remove(alias);
    }

    /// Number of `get_srv_keyspace` reads served so far.
    #[must_use]
    pub fn srv_keyspace_reads(&self) -> u64 {
        self.srv_keyspace_reads.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl SrvTopoServer for MemoryTopoServer {
    async fn get_srv_keyspace(
        &self,
        ctx: &CancellationToken,
        cell: &str,
        keyspace: &str,
    ) -> TopoResult<SrvKeyspace> {
        if ctx.is_cancelled() {
            return Err(TopoError::Cancelled);
        }
        self.srv_keyspace_reads.fetch_add(1, Ordering::Relaxed);
        self.keyspaces
            .read()
            .await
            .get(&(cell.to_string(), keyspace.to_string()))
            .cloned()
            .ok_or_else(|| TopoError::KeyspaceNotFound {
                cell: cell.to_string(),
                keyspace: keyspace.to_string(),
            })
    }

    async fn get_end_points(
        &self,
        ctx: &CancellationToken,
        cell: &str,
        keyspace: &str,
        shard: &str,
        tablet_type: TabletType,
    ) -> TopoResult<Vec<EndPoint>> {
        if ctx.is_cancelled() {
            return Err(TopoError::Cancelled);
        }
        let key = (
            cell.to_string(),
            keyspace.to_string(),
            shard.to_string(),
            tablet_type,
        );
        let endpoints = self.endpoints.read().await.get(&key).cloned();
        match endpoints {
            Some(eps) if !eps.is_empty() => Ok(eps),
            _ => Err(TopoError::NoEndPoints {
                cell: cell.to_string(),
                keyspace: keyspace.to_string(),
                shard: shard.to_string(),
                tablet_type,
            }),
        }
    }
}

#[async_trait]
impl ReplicationGraphStore for MemoryTopoServer {
    async fn get_shard_replication(
        &self,
        cell: &str,
        keyspace: &str,
        shard: &str,
    ) -> TopoResult<ShardReplication> {
        let key = (cell.to_string(), keyspace.to_string(), shard.to_string());
        self.replication
            .read()
            .await
            .get(&key)
            .cloned()
            .ok_or_else(|| TopoError::NoNode(format!("{cell}/{keyspace}/{shard}")))
    }

    async fn create_shard_replication(
        &self,
        cell: &str,
        keyspace: &str,
        shard: &str,
        replication: ShardReplication,
    ) -> TopoResult<()> {
        let key = (cell.to_string(), keyspace.to_string(), shard.to_string());
        self.replication.write().await.insert(key, replication);
        Ok(())
    }

    async fn update_shard_replication_fields(
        &self,
        cell: &str,
        keyspace: &str,
        shard: &str,
        update: ReplicationUpdate,
    ) -> TopoResult<()> {
        let key = (cell.to_string(), keyspace.to_string(), shard.to_string());
        let mut map = self.replication.write().await;
        let replication = map
            .get_mut(&key)
            .ok_or_else(|| TopoError::NoNode(format!("{cell}/{keyspace}/{shard}")))?;
        update(replication)
    }

    async fn tablet_type(&self, alias: &TabletAlias) -> TopoResult<TabletType> {
        self.tablets
            .read()
            .await
            .get(alias)
            .copied()
            .ok_or_else(|| TopoError::TabletNotFound(alias.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::KeyspacePartition;

    #[tokio::test]
    async fn test_missing_keyspace() {
        let topo = MemoryTopoServer::new();
        let ctx = CancellationToken::new();

        let err = topo.get_srv_keyspace(&ctx, "zone1", "nope").await.unwrap_err();
        assert!(matches!(err, TopoError::KeyspaceNotFound { .. }));
    }

    #[tokio::test]
    async fn test_swap_partitioning_mid_flight() {
        let topo = MemoryTopoServer::new();
        let ctx = CancellationToken::new();

        let mut srv = SrvKeyspace::default();
        srv.partitions
            .insert(TabletType::Master, KeyspacePartition::from_shard_names(&["0"]));
        topo.set_srv_keyspace("zone1", "user", srv).await;

        let before = topo.get_srv_keyspace(&ctx, "zone1", "user").await.unwrap();
        assert_eq!(
            before.partition(TabletType::Master).unwrap().shard_references[0].name,
            "0"
        );

        let mut srv = SrvKeyspace::default();
        srv.partitions.insert(
            TabletType::Master,
            KeyspacePartition::from_shard_names(&["-80", "80-"]),
        );
        topo.set_srv_keyspace("zone1", "user", srv).await;

        let after = topo.get_srv_keyspace(&ctx, "zone1", "user").await.unwrap();
        assert_eq!(
            after.partition(TabletType::Master).unwrap().shard_references.len(),
            2
        );
        assert_eq!(topo.srv_keyspace_reads(), 2);
    }

    #[tokio::test]
    async fn test_cancelled_read() {
        let topo = MemoryTopoServer::new();
        let ctx = CancellationToken::new();
        ctx.cancel();

        let err = topo.get_srv_keyspace(&ctx, "zone1", "user").await.unwrap_err();
        assert!(matches!(err, TopoError::Cancelled));
    }

    #[tokio::test]
    async fn test_end_points_missing() {
        let topo = MemoryTopoServer::new();
        let ctx = CancellationToken::new();

        let err = topo
            .get_end_points(&ctx, "zone1", "user", "-80", TabletType::Master)
            .await
            .unwrap_err();
        assert!(matches!(err, TopoError::NoEndPoints { .. }));

        topo.set_end_points(
            "zone1",
            "user",
            "-80",
            TabletType::Master,
            vec![EndPoint::new(1, "host1", "grpc", 15001)],
        )
        .await;
        let eps = topo
            .get_end_points(&ctx, "zone1", "user", "-80", TabletType::Master)
            .await
            .unwrap();
        assert_eq!(eps.len(), 1);
        assert_eq!(eps[0].host, "host1");
    }
}
