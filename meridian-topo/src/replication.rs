//! Shard replication graph.
//!
//! Alongside the serving data, the topology keeps one `ShardReplication`
//! record per `(cell, keyspace, shard)` describing which tablet replicates
//! from which parent. Records exist only for tablets that have a parent;
//! losing the parent removes the record.

use async_trait::async_trait;
use meridian_core::{TabletAlias, TabletType};
use tracing::{info, warn};

use crate::server::{TopoError, TopoResult};

/// One replication relationship: `tablet` replicates from `parent`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicationLink {
    /// The replicating tablet.
    pub tablet: TabletAlias,
    /// The tablet it replicates from.
    pub parent: TabletAlias,
}

/// The replication relationships within one cell's copy of a shard.
///
/// A tablet appears in at most one link; it has at most one parent.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ShardReplication {
    /// Links, one per replicating tablet.
    pub replication_links: Vec<ReplicationLink>,
}

impl ShardReplication {
    /// Finds the link for a tablet.
    ///
    /// # Errors
    ///
    /// Fails with [`TopoError::NoNode`] if the tablet has no link.
    pub fn replication_link(&self, tablet: &TabletAlias) -> TopoResult<&ReplicationLink> {
        self.replication_links
            .iter()
            .find(|link| &link.tablet == tablet)
            .ok_or_else(|| TopoError::NoNode(tablet.to_string()))
    }
}

/// Mutation applied to a [`ShardReplication`] record under the store's
/// lock.
pub type ReplicationUpdate = Box<dyn FnOnce(&mut ShardReplication) -> TopoResult<()> + Send>;

/// Storage for replication graph records.
#[async_trait]
pub trait ReplicationGraphStore: Send + Sync {
    /// Reads the record for a shard in a cell.
    async fn get_shard_replication(
        &self,
        cell: &str,
        keyspace: &str,
        shard: &str,
    ) -> TopoResult<ShardReplication>;

    /// Creates the record for a shard in a cell.
    async fn create_shard_replication(
        &self,
        cell: &str,
        keyspace: &str,
        shard: &str,
        replication: ShardReplication,
    ) -> TopoResult<()>;

    /// Applies a mutation to an existing record.
    ///
    /// Fails with [`TopoError::NoNode`] if the record does not exist.
    async fn update_shard_replication_fields(
        &self,
        cell: &str,
        keyspace: &str,
        shard: &str,
        update: ReplicationUpdate,
    ) -> TopoResult<()>;

    /// Returns a tablet's current type.
    async fn tablet_type(&self, alias: &TabletAlias) -> TopoResult<TabletType>;
}

/// Records that `tablet` replicates from `parent`, creating the shard
/// record if needed. A `None` parent removes any existing entry: masters
/// carry no link.
///
/// # Errors
///
/// Fails if the store cannot be read or written.
pub async fn add_shard_replication_record(
    store: &dyn ReplicationGraphStore,
    keyspace: &str,
    shard: &str,
    tablet: TabletAlias,
    parent: Option<TabletAlias>,
) -> TopoResult<()> {
    let cell = tablet.cell.clone();
    let update = make_add_update(tablet, parent);
    let result = store
        .update_shard_replication_fields(&cell, keyspace, shard, update.0)
        .await;
    match result {
        Err(TopoError::NoNode(_)) => {
            // First record for this shard in this cell.
            store
                .create_shard_replication(&cell, keyspace, shard, ShardReplication::default())
                .await?;
            store
                .update_shard_replication_fields(&cell, keyspace, shard, update.1)
                .await
        }
        other => other,
    }
}

// The update may run twice (create-then-retry), so build it twice.
fn make_add_update(
    tablet: TabletAlias,
    parent: Option<TabletAlias>,
) -> (ReplicationUpdate, ReplicationUpdate) {
    let build = move |tablet: TabletAlias, parent: Option<TabletAlias>| -> ReplicationUpdate {
        Box::new(move |sr: &mut ShardReplication| {
            let mut links = Vec::with_capacity(sr.replication_links.len() + 1);
            let mut found = false;
            for link in sr.replication_links.drain(..) {
                if link.tablet == tablet {
                    if found {
                        warn!(tablet = %link.tablet, "dropping duplicate replication link");
                        continue;
                    }
                    found = true;
                    match &parent {
                        // No parent now: the record is removed.
                        None => continue,
                        Some(p) => links.push(ReplicationLink {
                            tablet: link.tablet,
                            parent: p.clone(),
                        }),
                    }
                } else {
                    links.push(link);
                }
            }
            if !found {
                if let Some(p) = &parent {
                    links.push(ReplicationLink {
                        tablet: tablet.clone(),
                        parent: p.clone(),
                    });
                }
            }
            sr.replication_links = links;
            Ok(())
        })
    };
    (
        build(tablet.clone(), parent.clone()),
        build(tablet, parent),
    )
}

/// Removes the replication record for a tablet.
///
/// # Errors
///
/// Fails if the shard record does not exist or cannot be written.
pub async fn remove_shard_replication_record(
    store: &dyn ReplicationGraphStore,
    keyspace: &str,
    shard: &str,
    tablet: &TabletAlias,
) -> TopoResult<()> {
    let tablet = tablet.clone();
    let cell = tablet.cell.clone();
    store
        .update_shard_replication_fields(
            &cell,
            keyspace,
            shard,
            Box::new(move |sr: &mut ShardReplication| {
                sr.replication_links.retain(|link| link.tablet != tablet);
                Ok(())
            }),
        )
        .await
}

/// Repairs the first problem found in a shard's replication record:
/// a link whose tablet no longer exists, or whose tablet is scrapped.
///
/// # Errors
///
/// Fails if the record cannot be read or the repair cannot be written.
pub async fn fix_shard_replication(
    store: &dyn ReplicationGraphStore,
    cell: &str,
    keyspace: &str,
    shard: &str,
) -> TopoResult<()> {
    let replication = store.get_shard_replication(cell, keyspace, shard).await?;

    for link in &replication.replication_links {
        match store.tablet_type(&link.tablet).await {
            Err(TopoError::TabletNotFound(_)) => {
                warn!(tablet = %link.tablet, "tablet in replication graph does not exist, removing");
                return remove_shard_replication_record(store, keyspace, shard, &link.tablet)
                    .await;
            }
            Err(err) => return Err(err),
            Ok(TabletType::Scrap) => {
                warn!(tablet = %link.tablet, "tablet in replication graph is scrapped, removing");
                return remove_shard_replication_record(store, keyspace, shard, &link.tablet)
                    .await;
            }
            Ok(_) => {}
        }
    }

    info!(cell, keyspace, shard, "replication graph is valid");
    Ok(())
}
