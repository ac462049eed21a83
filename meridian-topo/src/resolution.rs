//! Routing-key resolution.
//!
//! These operations turn routing keys into shard names by reading the
//! serving graph. Output is deterministic for a fixed topology: ids and
//! ranges contribute shards in first-appearance order, and the entity map
//! is grouped under sorted shard keys. The retry loop above compares
//! resolutions across calls, so unordered output would look like a
//! permanent reshard.

use std::collections::BTreeMap;

use meridian_core::{KeyRange, KeyspaceId, TabletType};
use tokio_util::sync::CancellationToken;

use crate::server::{KeyspacePartition, SrvTopoServer, TopoError, TopoResult};

/// Maps keyspace ids to the deduplicated list of shards covering them.
///
/// # Errors
///
/// Fails if the keyspace or partition is missing, or if any id falls
/// outside every shard.
pub async fn map_keyspace_ids_to_shards(
    topo: &dyn SrvTopoServer,
    ctx: &CancellationToken,
    cell: &str,
    keyspace: &str,
    tablet_type: TabletType,
    keyspace_ids: &[KeyspaceId],
) -> TopoResult<Vec<String>> {
    let partition = get_partition(topo, ctx, cell, keyspace, tablet_type).await?;

    let mut shards: Vec<String> = Vec::new();
    for id in keyspace_ids {
        let shard = partition
            .shard_references
            .iter()
            .find(|s| s.key_range.contains(id))
            .ok_or_else(|| TopoError::KeyspaceIdNotServed {
                keyspace: keyspace.to_string(),
                keyspace_id: id.clone(),
            })?;
        if !shards.contains(&shard.name) {
            shards.push(shard.name.clone());
        }
    }
    Ok(shards)
}

/// Maps key ranges to the deduplicated list of shards they intersect.
///
/// # Errors
///
/// Fails if the keyspace or partition is missing, or if any range
/// intersects no shard.
pub async fn map_key_ranges_to_shards(
    topo: &dyn SrvTopoServer,
    ctx: &CancellationToken,
    cell: &str,
    keyspace: &str,
    tablet_type: TabletType,
    key_ranges: &[KeyRange],
) -> TopoResult<Vec<String>> {
    let partition = get_partition(topo, ctx, cell, keyspace, tablet_type).await?;

    let mut shards: Vec<String> = Vec::new();
    for range in key_ranges {
        let mut matched = false;
        for shard in &partition.shard_references {
            if shard.key_range.intersects(range) {
                matched = true;
                if !shards.contains(&shard.name) {
                    shards.push(shard.name.clone());
                }
            }
        }
        if !matched {
            return Err(TopoError::KeyRangeNotServed {
                keyspace: keyspace.to_string(),
                key_range: range.clone(),
            });
        }
    }
    Ok(shards)
}

/// Groups an entity-value-to-keyspace-id map by target shard.
///
/// Returns shard name to the ids homed on that shard, ids sorted within
/// each shard so the grouping is deterministic.
///
/// # Errors
///
/// Fails if the keyspace or partition is missing, or if any id falls
/// outside every shard.
pub async fn map_entity_ids_to_shards(
    topo: &dyn SrvTopoServer,
    ctx: &CancellationToken,
    cell: &str,
    keyspace: &str,
    entity_keyspace_ids: &[KeyspaceId],
    tablet_type: TabletType,
) -> TopoResult<BTreeMap<String, Vec<KeyspaceId>>> {
    let partition = get_partition(topo, ctx, cell, keyspace, tablet_type).await?;

    let mut shard_map: BTreeMap<String, Vec<KeyspaceId>> = BTreeMap::new();
    for id in entity_keyspace_ids {
        let shard = partition
            .shard_references
            .iter()
            .find(|s| s.key_range.contains(id))
            .ok_or_else(|| TopoError::KeyspaceIdNotServed {
                keyspace: keyspace.to_string(),
                keyspace_id: id.clone(),
            })?;
        shard_map.entry(shard.name.clone()).or_default().push(id.clone());
    }
    for ids in shard_map.values_mut() {
        ids.sort();
    }
    Ok(shard_map)
}

/// Returns the keyspace this one is served from for the tablet type, or
/// the input name unchanged when no alias is installed.
///
/// # Errors
///
/// Fails if the keyspace record cannot be read.
pub async fn get_keyspace_alias(
    topo: &dyn SrvTopoServer,
    ctx: &CancellationToken,
    cell: &str,
    keyspace: &str,
    tablet_type: TabletType,
) -> TopoResult<String> {
    let srv = topo.get_srv_keyspace(ctx, cell, keyspace).await?;
    Ok(srv
        .served_from(tablet_type)
        .map_or_else(|| keyspace.to_string(), str::to_string))
}

async fn get_partition(
    topo: &dyn SrvTopoServer,
    ctx: &CancellationToken,
    cell: &str,
    keyspace: &str,
    tablet_type: TabletType,
) -> TopoResult<KeyspacePartition> {
    let srv = topo.get_srv_keyspace(ctx, cell, keyspace).await?;
    srv.partition(tablet_type)
        .cloned()
        .ok_or_else(|| TopoError::PartitionNotFound {
            keyspace: keyspace.to_string(),
            tablet_type,
        })
}
