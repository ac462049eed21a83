//! The per-tablet RPC seam.
//!
//! `TabletConn` is the contract the gate consumes; a production
//! implementation speaks the tablet's RPC protocol, while tests plug in
//! the scripted double from [`crate::testing`]. Every method takes the
//! request's cancellation token and must return promptly with a
//! `Cancelled` error once it fires.

use std::sync::Arc;

use async_trait::async_trait;
use meridian_core::{BoundQuery, QueryResult, QueryResultList};
use meridian_topo::EndPoint;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::TabletResult;

/// One connection to one tablet.
#[async_trait]
pub trait TabletConn: Send + Sync {
    /// Executes a query, inside the given transaction if any.
    async fn execute(
        &self,
        ctx: &CancellationToken,
        query: &BoundQuery,
        transaction_id: Option<i64>,
    ) -> TabletResult<QueryResult>;

    /// Executes a batch of queries, one result per query in input order.
    async fn execute_batch(
        &self,
        ctx: &CancellationToken,
        queries: &[BoundQuery],
        transaction_id: Option<i64>,
    ) -> TabletResult<QueryResultList>;

    /// Starts a streaming query. Chunks arrive on the returned channel in
    /// the order the tablet delivers them; the first error ends the
    /// stream.
    async fn stream_execute(
        &self,
        ctx: &CancellationToken,
        query: &BoundQuery,
    ) -> TabletResult<mpsc::Receiver<TabletResult<QueryResult>>>;

    /// Opens a transaction, returning its id.
    async fn begin(&self, ctx: &CancellationToken) -> TabletResult<i64>;

    /// Commits a transaction.
    async fn commit(&self, ctx: &CancellationToken, transaction_id: i64) -> TabletResult<()>;

    /// Rolls back a transaction.
    async fn rollback(&self, ctx: &CancellationToken, transaction_id: i64) -> TabletResult<()>;

    /// The endpoint this connection is bound to.
    fn end_point(&self) -> &EndPoint;

    /// Releases the connection. Further calls are undefined.
    async fn close(&self);
}

/// Opens [`TabletConn`]s to endpoints discovered in the topology.
#[async_trait]
pub trait TabletDialer: Send + Sync {
    /// Connects to a tablet serving `keyspace`/`shard` at `end_point`.
    async fn dial(
        &self,
        ctx: &CancellationToken,
        end_point: &EndPoint,
        keyspace: &str,
        shard: &str,
    ) -> TabletResult<Arc<dyn TabletConn>>;
}
