//! The topology service contract.
//!
//! Implementations read the serving graph: which shards serve a keyspace
//! for each tablet type, which keyspace a renamed keyspace is served from,
//! and which endpoints serve a given shard. Reads may be cached; the
//! router's retry loop exists precisely because this data can go stale.

use std::collections::HashMap;

use async_trait::async_trait;
use meridian_core::{KeyRange, KeyspaceId, TabletAlias, TabletType};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Result type for topology operations.
pub type TopoResult<T> = Result<T, TopoError>;

/// Errors from topology reads and resolution.
#[derive(Debug, Clone, Error)]
pub enum TopoError {
    /// The keyspace has no record in this cell.
    #[error("keyspace {keyspace} not found in cell {cell}")]
    KeyspaceNotFound {
        /// The cell queried.
        cell: String,
        /// The missing keyspace.
        keyspace: String,
    },

    /// The keyspace serves no shards for the tablet type.
    #[error("keyspace {keyspace} has no partition for tablet type {tablet_type}")]
    PartitionNotFound {
        /// The keyspace queried.
        keyspace: String,
        /// The unserved tablet type.
        tablet_type: TabletType,
    },

    /// A keyspace id is covered by no shard.
    #[error("keyspace id {keyspace_id} is outside every shard of keyspace {keyspace}")]
    KeyspaceIdNotServed {
        /// The keyspace queried.
        keyspace: String,
        /// The uncovered id.
        keyspace_id: KeyspaceId,
    },

    /// A key range intersects no shard.
    #[error("key range {key_range} intersects no shard of keyspace {keyspace}")]
    KeyRangeNotServed {
        /// The keyspace queried.
        keyspace: String,
        /// The uncovered range.
        key_range: KeyRange,
    },

    /// No endpoints serve the shard for the tablet type.
    #[error("no endpoints for {keyspace}/{shard} ({tablet_type}) in cell {cell}")]
    NoEndPoints {
        /// The cell queried.
        cell: String,
        /// The keyspace queried.
        keyspace: String,
        /// The shard queried.
        shard: String,
        /// The unserved tablet type.
        tablet_type: TabletType,
    },

    /// A replication graph node does not exist.
    #[error("replication graph node not found: {0}")]
    NoNode(String),

    /// A tablet alias does not exist.
    #[error("tablet {0} not found")]
    TabletNotFound(TabletAlias),

    /// The request's context was cancelled.
    #[error("topology read cancelled")]
    Cancelled,

    /// The topology backend failed.
    #[error("topology backend error: {0}")]
    Backend(String),
}

/// One shard of a keyspace partitioning: its name and the key range it
/// covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardReference {
    /// The shard name, e.g. `"-80"`.
    pub name: String,
    /// The keyspace-id interval the shard covers.
    pub key_range: KeyRange,
}

impl ShardReference {
    /// Creates a shard reference whose range is parsed from the name.
    ///
    /// # Panics
    ///
    /// Panics if the name is not a hex range like `"-80"`.
    #[must_use]
    pub fn from_name(name: &str) -> Self {
        let key_range = KeyRange::from_shard_name(name)
            .unwrap_or_else(|| panic!("shard name {name} is not a hex range"));
        Self {
            name: name.to_string(),
            key_range,
        }
    }
}

/// The ordered shard set serving one tablet type.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct KeyspacePartition {
    /// Shards in topology order.
    pub shard_references: Vec<ShardReference>,
}

impl KeyspacePartition {
    /// Creates a partition from shard names, ranges parsed from the names.
    ///
    /// # Panics
    ///
    /// Panics if any name is not a hex range.
    #[must_use]
    pub fn from_shard_names(names: &[&str]) -> Self {
        Self {
            shard_references: names.iter().map(|n| ShardReference::from_name(n)).collect(),
        }
    }
}

/// A keyspace's serving record: per-tablet-type partitionings plus the
/// served-from aliases installed during vertical resharding.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SrvKeyspace {
    /// Serving shard sets by tablet type.
    pub partitions: HashMap<TabletType, KeyspacePartition>,
    /// Keyspace this one is served from, by tablet type. Clients keep
    /// addressing the old name; the topology reports the new one here.
    pub served_from: HashMap<TabletType, String>,
}

impl SrvKeyspace {
    /// Returns the partition serving the tablet type.
    #[must_use]
    pub fn partition(&self, tablet_type: TabletType) -> Option<&KeyspacePartition> {
        self.partitions.get(&tablet_type)
    }

    /// Returns the served-from keyspace for the tablet type, if any.
    #[must_use]
    pub fn served_from(&self, tablet_type: TabletType) -> Option<&str> {
        self.served_from.get(&tablet_type).map(String::as_str)
    }
}

/// A serving address for one tablet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndPoint {
    /// Cell-local tablet uid.
    pub uid: u32,
    /// Hostname or address.
    pub host: String,
    /// Named ports, e.g. `"grpc"`.
    pub port_map: HashMap<String, u16>,
}

impl EndPoint {
    /// Creates an endpoint with a single named port.
    pub fn new(uid: u32, host: impl Into<String>, port_name: &str, port: u16) -> Self {
        let mut port_map = HashMap::new();
        port_map.insert(port_name.to_string(), port);
        Self {
            uid,
            host: host.into(),
            port_map,
        }
    }
}

/// Read-only view of the serving graph.
///
/// Implementations must be safe to share across tasks; every method takes
/// the request's cancellation token and must return promptly with
/// [`TopoError::Cancelled`] once it fires.
#[async_trait]
pub trait SrvTopoServer: Send + Sync {
    /// Returns the serving record for a keyspace in a cell.
    async fn get_srv_keyspace(
        &self,
        ctx: &CancellationToken,
        cell: &str,
        keyspace: &str,
    ) -> TopoResult<SrvKeyspace>;

    /// Returns the endpoints serving a shard for a tablet type.
    async fn get_end_points(
        &self,
        ctx: &CancellationToken,
        cell: &str,
        keyspace: &str,
        shard: &str,
        tablet_type: TabletType,
    ) -> TopoResult<Vec<EndPoint>>;
}
