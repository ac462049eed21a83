//! Pooled per-shard connection.
//!
//! One `ShardConn` exists per `(keyspace, shard, tablet_type)` and
//! outlives individual calls. The connection underneath is opened lazily:
//! endpoints come from the topology, one is picked at random, and the
//! dialed connection is kept until a failure discards it.
//!
//! Transient failures (`Retry`) are retried transparently up to
//! `retry_count` times with `retry_delay` between attempts - never inside
//! a transaction, because the server-side transaction state died with the
//! failed connection.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use meridian_core::{BoundQuery, QueryResult, QueryResultList, TabletErrorCode, TabletType};
use meridian_topo::{SrvTopoServer, TopoError};
use rand::Rng;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::config::GateConfig;
use crate::error::{TabletError, TabletResult};
use crate::tablet_conn::{TabletConn, TabletDialer};

/// A pooled connection to whichever tablet currently serves one shard.
pub struct ShardConn {
    topo: Arc<dyn SrvTopoServer>,
    dialer: Arc<dyn TabletDialer>,
    cell: String,
    keyspace: String,
    shard: String,
    tablet_type: TabletType,
    retry_delay: Duration,
    retry_count: usize,
    timeout: Duration,
    conn: Mutex<Option<Arc<dyn TabletConn>>>,
}

impl ShardConn {
    /// Creates a shard connection. No endpoint is contacted until the
    /// first call.
    pub fn new(
        topo: Arc<dyn SrvTopoServer>,
        dialer: Arc<dyn TabletDialer>,
        keyspace: impl Into<String>,
        shard: impl Into<String>,
        tablet_type: TabletType,
        config: &GateConfig,
    ) -> Self {
        Self {
            topo,
            dialer,
            cell: config.cell.clone(),
            keyspace: keyspace.into(),
            shard: shard.into(),
            tablet_type,
            retry_delay: config.retry_delay,
            retry_count: config.retry_count,
            timeout: config.timeout,
            conn: Mutex::new(None),
        }
    }

    /// The keyspace this connection serves.
    #[must_use]
    pub fn keyspace(&self) -> &str {
        &self.keyspace
    }

    /// The shard this connection serves.
    #[must_use]
    pub fn shard(&self) -> &str {
        &self.shard
    }

    /// The tablet type this connection targets.
    #[must_use]
    pub const fn tablet_type(&self) -> TabletType {
        self.tablet_type
    }

    /// Executes a query on the shard.
    ///
    /// # Errors
    ///
    /// Returns the tablet's error after retries are exhausted.
    pub async fn execute(
        &self,
        ctx: &CancellationToken,
        query: &BoundQuery,
        transaction_id: Option<i64>,
    ) -> TabletResult<QueryResult> {
        self.with_retry(ctx, transaction_id.is_some(), |conn| async move {
            conn.execute(ctx, query, transaction_id).await
        })
        .await
    }

    /// Executes a batch of queries on the shard.
    ///
    /// # Errors
    ///
    /// Returns the tablet's error after retries are exhausted.
    pub async fn execute_batch(
        &self,
        ctx: &CancellationToken,
        queries: &[BoundQuery],
        transaction_id: Option<i64>,
    ) -> TabletResult<QueryResultList> {
        self.with_retry(ctx, transaction_id.is_some(), |conn| async move {
            conn.execute_batch(ctx, queries, transaction_id).await
        })
        .await
    }

    /// Starts a streaming query on the shard. Only the initiation is
    /// retried; a stream that breaks mid-flight surfaces its error.
    ///
    /// # Errors
    ///
    /// Returns the tablet's error after retries are exhausted.
    pub async fn stream_execute(
        &self,
        ctx: &CancellationToken,
        query: &BoundQuery,
    ) -> TabletResult<mpsc::Receiver<TabletResult<QueryResult>>> {
        self.with_retry(ctx, false, |conn| async move {
            conn.stream_execute(ctx, query).await
        })
        .await
    }

    /// Opens a transaction on the shard, returning its id.
    ///
    /// # Errors
    ///
    /// Returns the tablet's error after retries are exhausted. Retrying a
    /// failed begin is safe: no transaction id was handed out yet.
    pub async fn begin(&self, ctx: &CancellationToken) -> TabletResult<i64> {
        self.with_retry(ctx, false, |conn| async move { conn.begin(ctx).await })
            .await
    }

    /// Commits a transaction on the shard. Never retried.
    ///
    /// # Errors
    ///
    /// Returns the tablet's error.
    pub async fn commit(&self, ctx: &CancellationToken, transaction_id: i64) -> TabletResult<()> {
        self.with_retry(ctx, true, |conn| async move {
            conn.commit(ctx, transaction_id).await
        })
        .await
    }

    /// Rolls back a transaction on the shard. Never retried.
    ///
    /// # Errors
    ///
    /// Returns the tablet's error.
    pub async fn rollback(&self, ctx: &CancellationToken, transaction_id: i64) -> TabletResult<()> {
        self.with_retry(ctx, true, |conn| async move {
            conn.rollback(ctx, transaction_id).await
        })
        .await
    }

    async fn with_retry<T, F, Fut>(
        &self,
        ctx: &CancellationToken,
        in_transaction: bool,
        op: F,
    ) -> TabletResult<T>
    where
        F: Fn(Arc<dyn TabletConn>) -> Fut,
        Fut: Future<Output = TabletResult<T>>,
    {
        let attempts = if in_transaction {
            1
        } else {
            self.retry_count + 1
        };
        let mut last_error = TabletError::retry("no attempt made");

        for attempt in 0..attempts {
            if ctx.is_cancelled() {
                return Err(TabletError::cancelled());
            }
            if attempt > 0 {
                warn!(
                    keyspace = %self.keyspace,
                    shard = %self.shard,
                    attempt,
                    error = %last_error,
                    "retrying shard call"
                );
                tokio::time::sleep(self.retry_delay).await;
            }

            let conn = match self.get_conn(ctx).await {
                Ok(conn) => conn,
                Err(err) if err.code.is_retriable() && !in_transaction => {
                    last_error = err;
                    continue;
                }
                Err(err) => return Err(err),
            };

            let outcome = tokio::select! {
                () = ctx.cancelled() => return Err(TabletError::cancelled()),
                timed = tokio::time::timeout(self.timeout, op(conn)) => match timed {
                    Ok(outcome) => outcome,
                    Err(_) => {
                        // State of the in-flight call is unknown; the
                        // connection cannot be trusted again.
                        self.discard_conn().await;
                        return Err(TabletError::fatal(format!(
                            "call to {}/{} timed out after {:?}",
                            self.keyspace, self.shard, self.timeout
                        )));
                    }
                },
            };

            match outcome {
                Ok(value) => return Ok(value),
                Err(err) if err.code.is_retriable() => {
                    self.discard_conn().await;
                    if in_transaction {
                        return Err(err);
                    }
                    last_error = err;
                }
                Err(err) => return Err(err),
            }
        }
        Err(last_error)
    }

    /// Returns the live connection, dialing one if needed. The lock is
    /// held across the dial so concurrent callers share one connection.
    async fn get_conn(&self, ctx: &CancellationToken) -> TabletResult<Arc<dyn TabletConn>> {
        let mut guard = self.conn.lock().await;
        if let Some(conn) = guard.as_ref() {
            return Ok(conn.clone());
        }

        let end_points = self
            .topo
            .get_end_points(ctx, &self.cell, &self.keyspace, &self.shard, self.tablet_type)
            .await
            .map_err(|err| match err {
                TopoError::Cancelled => TabletError::cancelled(),
                other => TabletError::retry(format!("endpoint lookup failed: {other}")),
            })?;

        if end_points.is_empty() {
            return Err(TabletError::retry(format!(
                "no endpoints for {}/{}",
                self.keyspace, self.shard
            )));
        }
        let pick = rand::thread_rng().gen_range(0..end_points.len());
        let conn = self
            .dialer
            .dial(ctx, &end_points[pick], &self.keyspace, &self.shard)
            .await?;
        *guard = Some(conn.clone());
        Ok(conn)
    }

    async fn discard_conn(&self) {
        let conn = self.conn.lock().await.take();
        if let Some(conn) = conn {
            conn.close().await;
        }
    }
}
