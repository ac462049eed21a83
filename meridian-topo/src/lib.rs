//! Meridian Topo - Topology service contract and shard resolution.
//!
//! The topology service owns the mapping from `(keyspace, tablet_type)` to
//! the serving set of shards, plus the served-from aliases that implement
//! vertical resharding. This crate provides:
//!
//! - [`SrvTopoServer`]: the read-only contract the router consumes
//! - The resolution operations mapping routing keys to shard names
//! - [`CachedTopoServer`]: a process-wide, read-mostly TTL cache
//! - The shard replication graph maintained alongside the serving data
//! - [`MemoryTopoServer`]: an in-memory server for tests
//!
//! Resolution output is deterministic for a fixed topology; the retry
//! loop above compares shard sets across resolutions, so `{A, B}` must
//! never come back as `{B, A}` for unchanged data.

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod cache;
mod memory;
mod replication;
mod resolution;
mod server;

pub use cache::{CachedTopoServer, TopoCacheConfig};
pub use memory::MemoryTopoServer;
pub use replication::{
    add_shard_replication_record, fix_shard_replication, remove_shard_replication_record,
    ReplicationGraphStore, ReplicationLink, ReplicationUpdate, ShardReplication,
};
pub use resolution::{
    get_keyspace_alias, map_entity_ids_to_shards, map_key_ranges_to_shards,
    map_keyspace_ids_to_shards,
};
pub use server::{
    EndPoint, KeyspacePartition, ShardReference, SrvKeyspace, SrvTopoServer, TopoError, TopoResult,
};
