//! Meridian Gate - Scatter-gather execution and topology-driven retry.
//!
//! The gate sits between deserialized client calls and the per-shard
//! tablet connections. A call flows through three layers:
//!
//! - [`Resolver`]: resolves routing keys to shards, dispatches, and
//!   re-resolves and retries when a retryable failure coincides with an
//!   observed resharding event
//! - [`ScatterConn`]: fans a query out across the resolved shards in
//!   parallel, aggregates rows and errors, and drives sequential
//!   best-effort commit and rollback
//! - [`ShardConn`]: one pooled connection per `(keyspace, shard,
//!   tablet_type)`, with lazy endpoint discovery and transparent retry of
//!   transient failures outside transactions
//!
//! [`SafeSession`] wraps the caller's session so parallel sub-calls can
//! enroll their shards in an open transaction without racing.
//!
//! # Transactions
//!
//! Within one transaction the set of participating shards only grows.
//! Commit and rollback walk the enrolled shards sequentially and
//! best-effort; there is no cross-shard atomicity here.

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod config;
mod error;
mod resolver;
mod safe_session;
mod scatter_conn;
mod shard_conn;
mod tablet_conn;
pub mod testing;

pub use config::{
    GateConfig, CALL_TIMEOUT_DEFAULT, RETRY_COUNT_DEFAULT, RETRY_DELAY_DEFAULT,
};
pub use error::{GateError, GateResult, ScatterError, ShardError, TabletError, TabletResult};
pub use resolver::{
    build_entity_ids, insert_sql_clause, shards_equal, EntityIdsQuery, KeyRangeBatchQuery,
    KeyRangeQuery, KeyspaceIdBatchQuery, KeyspaceIdQuery, Resolver,
};
pub use safe_session::SafeSession;
pub use scatter_conn::ScatterConn;
pub use shard_conn::ShardConn;
pub use tablet_conn::{TabletConn, TabletDialer};
