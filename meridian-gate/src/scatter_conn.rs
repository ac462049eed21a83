//! Fan-out executor.
//!
//! `ScatterConn` dispatches one query to every resolved shard in
//! parallel, waits for all of them, and folds the per-shard outcomes into
//! one result or one collapsed error. Aggregation iterates the
//! caller-supplied shard list, so a given input produces a deterministic
//! row order regardless of completion order.
//!
//! Inside a transaction each sub-call first enrolls its shard in the
//! session (find-or-begin, serialized under the session lock) and carries
//! the shard's transaction id. Commit and rollback walk the enrolled
//! shards sequentially, best-effort.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use futures::future::join_all;
use meridian_core::{
    BindVariables, BoundQuery, Field, QueryResult, QueryResultList, ShardSession, TabletType,
};
use meridian_topo::SrvTopoServer;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::config::GateConfig;
use crate::error::{GateError, GateResult, ScatterError, ShardError, TabletError};
use crate::safe_session::SafeSession;
use crate::shard_conn::ShardConn;
use crate::tablet_conn::TabletDialer;

/// Parallel dispatcher over pooled shard connections.
pub struct ScatterConn {
    topo: Arc<dyn SrvTopoServer>,
    dialer: Arc<dyn TabletDialer>,
    config: GateConfig,
    pool: Mutex<HashMap<(String, String, TabletType), Arc<ShardConn>>>,
}

impl ScatterConn {
    /// Creates a scatter dispatcher.
    pub fn new(
        topo: Arc<dyn SrvTopoServer>,
        dialer: Arc<dyn TabletDialer>,
        config: GateConfig,
    ) -> Self {
        Self {
            topo,
            dialer,
            config,
            pool: Mutex::new(HashMap::new()),
        }
    }

    /// The topology server queries are routed against.
    #[must_use]
    pub fn topo(&self) -> &Arc<dyn SrvTopoServer> {
        &self.topo
    }

    /// The cell this dispatcher routes within.
    #[must_use]
    pub fn cell(&self) -> &str {
        &self.config.cell
    }

    /// Executes one query on every listed shard and aggregates.
    ///
    /// # Errors
    ///
    /// Returns the collapsed per-shard failures, or a schema-mismatch
    /// error if shards disagree on fields.
    #[allow(clippy::too_many_arguments)]
    pub async fn execute(
        &self,
        ctx: &CancellationToken,
        sql: &str,
        bind_variables: &BindVariables,
        keyspace: &str,
        shards: &[String],
        tablet_type: TabletType,
        session: &SafeSession,
    ) -> GateResult<QueryResult> {
        let outcomes = join_all(shards.iter().map(|shard| {
            let query = BoundQuery::new(sql, bind_variables.clone());
            async move {
                self.execute_shard(ctx, keyspace, shard, tablet_type, session, query)
                    .await
            }
        }))
        .await;

        let mut aggregate = QueryResult::new();
        let mut errors = Vec::new();
        let mut successes = Vec::new();
        for (shard, outcome) in shards.iter().zip(outcomes) {
            match outcome {
                Ok(result) => successes.push((shard, result)),
                Err(err) => errors.push(err),
            }
        }
        if !errors.is_empty() {
            return Err(ScatterError::aggregate(errors).into());
        }
        for (shard, result) in successes {
            check_fields(&aggregate.fields, &result.fields, shard)?;
            aggregate.merge(result);
        }
        Ok(aggregate)
    }

    /// Executes a batch of queries on every listed shard and aggregates
    /// per input query.
    ///
    /// # Errors
    ///
    /// Returns the collapsed per-shard failures, a schema-mismatch error,
    /// or a shape error if a shard returns the wrong result count.
    pub async fn execute_batch(
        &self,
        ctx: &CancellationToken,
        queries: &[BoundQuery],
        keyspace: &str,
        shards: &[String],
        tablet_type: TabletType,
        session: &SafeSession,
    ) -> GateResult<QueryResultList> {
        let outcomes = join_all(shards.iter().map(|shard| async move {
            let conn = self.get_connection(keyspace, shard, tablet_type);
            let attribute = |error| ShardError {
                keyspace: keyspace.to_string(),
                shard: shard.to_string(),
                tablet_type,
                error,
            };
            let transaction_id = self
                .update_session(ctx, &conn, session)
                .await
                .map_err(attribute)?;
            conn.execute_batch(ctx, queries, transaction_id)
                .await
                .map_err(attribute)
        }))
        .await;

        let mut aggregate = QueryResultList::with_len(queries.len());
        let mut errors = Vec::new();
        let mut successes = Vec::new();
        for (shard, outcome) in shards.iter().zip(outcomes) {
            match outcome {
                Ok(result) => successes.push((shard, result)),
                Err(err) => errors.push(err),
            }
        }
        if !errors.is_empty() {
            return Err(ScatterError::aggregate(errors).into());
        }
        for (shard, result) in successes {
            if result.list.len() != queries.len() {
                return Err(GateError::BatchShapeMismatch {
                    shard: shard.clone(),
                    expected: queries.len(),
                    got: result.list.len(),
                });
            }
            for (slot, shard_result) in aggregate.list.iter_mut().zip(result.list) {
                check_fields(&slot.fields, &shard_result.fields, shard)?;
                slot.merge(shard_result);
            }
        }
        Ok(aggregate)
    }

    /// Executes a per-shard rewritten query on every listed shard and
    /// aggregates. `sqls` and `bind_variables` are keyed by shard.
    ///
    /// # Errors
    ///
    /// Returns the collapsed per-shard failures or a schema-mismatch
    /// error.
    #[allow(clippy::too_many_arguments)]
    pub async fn execute_entity_ids(
        &self,
        ctx: &CancellationToken,
        shards: &[String],
        sqls: &HashMap<String, String>,
        bind_variables: &HashMap<String, BindVariables>,
        keyspace: &str,
        tablet_type: TabletType,
        session: &SafeSession,
    ) -> GateResult<QueryResult> {
        let outcomes = join_all(shards.iter().map(|shard| async move {
            let query = match (sqls.get(shard), bind_variables.get(shard)) {
                (Some(sql), Some(binds)) => BoundQuery::new(sql.clone(), binds.clone()),
                _ => {
                    return Err(ShardError {
                        keyspace: keyspace.to_string(),
                        shard: shard.to_string(),
                        tablet_type,
                        error: TabletError::fatal("no rewritten query for shard"),
                    })
                }
            };
            self.execute_shard(ctx, keyspace, shard, tablet_type, session, query)
                .await
        }))
        .await;

        let mut aggregate = QueryResult::new();
        let mut errors = Vec::new();
        let mut successes = Vec::new();
        for (shard, outcome) in shards.iter().zip(outcomes) {
            match outcome {
                Ok(result) => successes.push((shard, result)),
                Err(err) => errors.push(err),
            }
        }
        if !errors.is_empty() {
            return Err(ScatterError::aggregate(errors).into());
        }
        for (shard, result) in successes {
            check_fields(&aggregate.fields, &result.fields, shard)?;
            aggregate.merge(result);
        }
        Ok(aggregate)
    }

    /// Streams one query's results to the caller's sink, shard by shard.
    ///
    /// Chunks pass through in the order each tablet delivers them; the
    /// first error ends the stream. Multi-shard restriction is enforced
    /// by the resolver above, not here.
    ///
    /// # Errors
    ///
    /// Returns the first per-shard failure, or `StreamSinkClosed` if the
    /// caller went away.
    #[allow(clippy::too_many_arguments)]
    pub async fn stream_execute(
        &self,
        ctx: &CancellationToken,
        sql: &str,
        bind_variables: &BindVariables,
        keyspace: &str,
        shards: &[String],
        tablet_type: TabletType,
        sink: &mpsc::Sender<QueryResult>,
    ) -> GateResult<()> {
        let query = BoundQuery::new(sql, bind_variables.clone());
        for shard in shards {
            let conn = self.get_connection(keyspace, shard, tablet_type);
            let attribute = |error| ShardError {
                keyspace: keyspace.to_string(),
                shard: shard.to_string(),
                tablet_type,
                error,
            };
            let mut chunks = conn
                .stream_execute(ctx, &query)
                .await
                .map_err(|e| ScatterError::aggregate(vec![attribute(e)]))?;

            loop {
                let chunk = tokio::select! {
                    () = ctx.cancelled() => {
                        return Err(ScatterError::aggregate(vec![attribute(
                            TabletError::cancelled(),
                        )])
                        .into())
                    }
                    chunk = chunks.recv() => chunk,
                };
                match chunk {
                    None => break,
                    Some(Ok(result)) => sink
                        .send(result)
                        .await
                        .map_err(|_| GateError::StreamSinkClosed)?,
                    Some(Err(error)) => {
                        return Err(ScatterError::aggregate(vec![attribute(error)]).into())
                    }
                }
            }
        }
        Ok(())
    }

    /// Commits the session's transaction shard by shard, sequentially.
    ///
    /// A per-shard failure is logged and commit continues with the
    /// remaining shards; the first failure is returned. The session's
    /// shard set is cleared unconditionally.
    ///
    /// # Errors
    ///
    /// Fails if no transaction is open, or with the first per-shard
    /// commit failure.
    pub async fn commit(&self, ctx: &CancellationToken, session: &SafeSession) -> GateResult<()> {
        if !session.in_transaction().await {
            return Err(GateError::NotInTransaction);
        }
        let mut first_error = None;
        for shard_session in session.snapshot().await.shard_sessions {
            let conn = self.get_connection(
                &shard_session.keyspace,
                &shard_session.shard,
                shard_session.tablet_type,
            );
            if let Err(error) = conn.commit(ctx, shard_session.transaction_id).await {
                warn!(
                    keyspace = %shard_session.keyspace,
                    shard = %shard_session.shard,
                    %error,
                    "commit failed, continuing with remaining shards"
                );
                if first_error.is_none() {
                    first_error = Some(ShardError {
                        keyspace: shard_session.keyspace.clone(),
                        shard: shard_session.shard.clone(),
                        tablet_type: shard_session.tablet_type,
                        error,
                    });
                }
            }
        }
        session.reset().await;
        first_error.map_or(Ok(()), |err| Err(ScatterError::aggregate(vec![err]).into()))
    }

    /// Rolls back the session's transaction shard by shard, sequentially,
    /// tolerating per-shard failures. The session's shard set is cleared
    /// unconditionally.
    ///
    /// # Errors
    ///
    /// Fails with the first per-shard rollback failure.
    pub async fn rollback(&self, ctx: &CancellationToken, session: &SafeSession) -> GateResult<()> {
        let mut first_error = None;
        for shard_session in session.snapshot().await.shard_sessions {
            let conn = self.get_connection(
                &shard_session.keyspace,
                &shard_session.shard,
                shard_session.tablet_type,
            );
            if let Err(error) = conn.rollback(ctx, shard_session.transaction_id).await {
                warn!(
                    keyspace = %shard_session.keyspace,
                    shard = %shard_session.shard,
                    %error,
                    "rollback failed, continuing with remaining shards"
                );
                if first_error.is_none() {
                    first_error = Some(ShardError {
                        keyspace: shard_session.keyspace.clone(),
                        shard: shard_session.shard.clone(),
                        tablet_type: shard_session.tablet_type,
                        error,
                    });
                }
            }
        }
        session.reset().await;
        first_error.map_or(Ok(()), |err| Err(ScatterError::aggregate(vec![err]).into()))
    }

    async fn execute_shard(
        &self,
        ctx: &CancellationToken,
        keyspace: &str,
        shard: &str,
        tablet_type: TabletType,
        session: &SafeSession,
        query: BoundQuery,
    ) -> Result<QueryResult, ShardError> {
        let conn = self.get_connection(keyspace, shard, tablet_type);
        let attribute = |error| ShardError {
            keyspace: keyspace.to_string(),
            shard: shard.to_string(),
            tablet_type,
            error,
        };
        let transaction_id = self
            .update_session(ctx, &conn, session)
            .await
            .map_err(attribute)?;
        conn.execute(ctx, &query, transaction_id)
            .await
            .map_err(attribute)
    }

    /// Returns the shard's transaction id, opening and enrolling one on
    /// first contact. Holds the session lock across the whole
    /// find-or-begin sequence so concurrent sub-calls cannot open two
    /// transactions on the same backend.
    async fn update_session(
        &self,
        ctx: &CancellationToken,
        conn: &ShardConn,
        session: &SafeSession,
    ) -> Result<Option<i64>, TabletError> {
        let mut guard = session.lock().await;
        if !guard.in_transaction {
            return Ok(None);
        }
        if let Some(transaction_id) = guard.find(conn.keyspace(), conn.shard(), conn.tablet_type())
        {
            return Ok(Some(transaction_id));
        }
        let transaction_id = conn.begin(ctx).await?;
        guard
            .append(ShardSession {
                keyspace: conn.keyspace().to_string(),
                shard: conn.shard().to_string(),
                tablet_type: conn.tablet_type(),
                transaction_id,
            })
            .map_err(|err| TabletError::fatal(err.to_string()))?;
        Ok(Some(transaction_id))
    }

    fn get_connection(&self, keyspace: &str, shard: &str, tablet_type: TabletType) -> Arc<ShardConn> {
        let key = (keyspace.to_string(), shard.to_string(), tablet_type);
        let mut pool = self.pool.lock().expect("shard conn pool poisoned");
        pool.entry(key)
            .or_insert_with(|| {
                Arc::new(ShardConn::new(
                    self.topo.clone(),
                    self.dialer.clone(),
                    keyspace,
                    shard,
                    tablet_type,
                    &self.config,
                ))
            })
            .clone()
    }
}

fn check_fields(existing: &[Field], incoming: &[Field], shard: &str) -> GateResult<()> {
    if !existing.is_empty() && !incoming.is_empty() && existing != incoming {
        return Err(GateError::FieldsMismatch {
            shard: shard.to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeDialer, FakeTablet};
    use meridian_core::{BindValue, Field, Session};
    use meridian_topo::{EndPoint, MemoryTopoServer};

    struct Fixture {
        scatter: ScatterConn,
        tablets: Vec<Arc<FakeTablet>>,
    }

    async fn fixture(shards: &[&str]) -> Fixture {
        let topo = Arc::new(MemoryTopoServer::new());
        let dialer = Arc::new(FakeDialer::new());
        let mut tablets = Vec::new();
        for (i, shard) in shards.iter().enumerate() {
            let uid = u32::try_from(i).unwrap() + 1;
            topo.set_end_points(
                "zone1",
                "user",
                shard,
                TabletType::Master,
                vec![EndPoint::new(uid, format!("host{uid}"), "grpc", 15000)],
            )
            .await;
            let tablet = FakeTablet::new("user", shard, uid);
            dialer.register(tablet.clone());
            tablets.push(tablet);
        }
        let config = GateConfig::fast_for_testing("zone1").with_retry_count(0);
        Fixture {
            scatter: ScatterConn::new(topo, dialer, config),
            tablets,
        }
    }

    fn row_result(values: &[i64]) -> QueryResult {
        QueryResult {
            fields: vec![Field::new("id", 8)],
            rows_affected: values.len() as u64,
            insert_id: 0,
            rows: values.iter().map(|v| vec![BindValue::Int(*v)]).collect(),
        }
    }

    fn shard_names(shards: &[&str]) -> Vec<String> {
        shards.iter().map(|s| (*s).to_string()).collect()
    }

    #[tokio::test]
    async fn test_rows_concatenate_in_shard_order() {
        let fix = fixture(&["-80", "80-"]).await;
        fix.tablets[0].set_default_result(row_result(&[1, 2]));
        fix.tablets[1].set_default_result(row_result(&[3, 4]));
        let ctx = CancellationToken::new();

        let result = fix
            .scatter
            .execute(
                &ctx,
                "select id from t",
                &BindVariables::new(),
                "user",
                &shard_names(&["-80", "80-"]),
                TabletType::Master,
                &SafeSession::default(),
            )
            .await
            .unwrap();

        assert_eq!(result.rows_affected, 4);
        let ids: Vec<_> = result.rows.iter().map(|r| r[0].clone()).collect();
        assert_eq!(
            ids,
            vec![
                BindValue::Int(1),
                BindValue::Int(2),
                BindValue::Int(3),
                BindValue::Int(4)
            ]
        );
    }

    #[tokio::test]
    async fn test_mixed_errors_collapse_to_most_severe() {
        let fix = fixture(&["-80", "80-"]).await;
        fix.tablets[0].push_execute_result(Err(TabletError::retry("reset")));
        fix.tablets[1].push_execute_result(Err(TabletError::new(
            meridian_core::TabletErrorCode::TxPoolFull,
            "pool full",
        )));
        let ctx = CancellationToken::new();

        let err = fix
            .scatter
            .execute(
                &ctx,
                "select id from t",
                &BindVariables::new(),
                "user",
                &shard_names(&["-80", "80-"]),
                TabletType::Master,
                &SafeSession::default(),
            )
            .await
            .unwrap_err();

        let GateError::Scatter(scatter) = err else {
            panic!("expected scatter error, got {err}");
        };
        assert_eq!(scatter.code, meridian_core::TabletErrorCode::TxPoolFull);
        assert_eq!(scatter.shard_errors.len(), 2);
        assert!(!GateError::Scatter(scatter).is_retry());
    }

    #[tokio::test]
    async fn test_one_shard_error_does_not_short_circuit() {
        let fix = fixture(&["-80", "80-"]).await;
        fix.tablets[0].push_execute_result(Err(TabletError::retry("reset")));
        fix.tablets[1].set_default_result(row_result(&[1]));
        let ctx = CancellationToken::new();

        let err = fix
            .scatter
            .execute(
                &ctx,
                "select id from t",
                &BindVariables::new(),
                "user",
                &shard_names(&["-80", "80-"]),
                TabletType::Master,
                &SafeSession::default(),
            )
            .await
            .unwrap_err();

        assert!(err.is_retry());
        // The healthy shard was still dispatched to.
        assert_eq!(fix.tablets[1].execute_count(), 1);
    }

    #[tokio::test]
    async fn test_fields_mismatch_is_fatal() {
        let fix = fixture(&["-80", "80-"]).await;
        fix.tablets[0].set_default_result(row_result(&[1]));
        let mut other = row_result(&[2]);
        other.fields = vec![Field::new("name", 253)];
        fix.tablets[1].set_default_result(other);
        let ctx = CancellationToken::new();

        let err = fix
            .scatter
            .execute(
                &ctx,
                "select id from t",
                &BindVariables::new(),
                "user",
                &shard_names(&["-80", "80-"]),
                TabletType::Master,
                &SafeSession::default(),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, GateError::FieldsMismatch { shard } if shard == "80-"));
    }

    #[tokio::test]
    async fn test_batch_preserves_query_order() {
        let fix = fixture(&["-80", "80-"]).await;
        let mut list = QueryResultList::default();
        list.list.push(row_result(&[1]));
        list.list.push(row_result(&[10]));
        fix.tablets[0].push_batch_result(Ok(list));
        let mut list = QueryResultList::default();
        list.list.push(row_result(&[2]));
        list.list.push(row_result(&[20]));
        fix.tablets[1].push_batch_result(Ok(list));
        let ctx = CancellationToken::new();

        let queries = vec![
            BoundQuery::new("select id from a", BindVariables::new()),
            BoundQuery::new("select id from b", BindVariables::new()),
        ];
        let results = fix
            .scatter
            .execute_batch(
                &ctx,
                &queries,
                "user",
                &shard_names(&["-80", "80-"]),
                TabletType::Master,
                &SafeSession::default(),
            )
            .await
            .unwrap();

        assert_eq!(results.list.len(), 2);
        // Query 0 gathers shard results in shard order.
        assert_eq!(
            results.list[0].rows,
            vec![vec![BindValue::Int(1)], vec![BindValue::Int(2)]]
        );
        assert_eq!(
            results.list[1].rows,
            vec![vec![BindValue::Int(10)], vec![BindValue::Int(20)]]
        );
    }

    #[tokio::test]
    async fn test_batch_shape_mismatch() {
        let fix = fixture(&["-80"]).await;
        let mut list = QueryResultList::default();
        list.list.push(row_result(&[1]));
        fix.tablets[0].push_batch_result(Ok(list));
        let ctx = CancellationToken::new();

        let queries = vec![
            BoundQuery::new("select id from a", BindVariables::new()),
            BoundQuery::new("select id from b", BindVariables::new()),
        ];
        let err = fix
            .scatter
            .execute_batch(
                &ctx,
                &queries,
                "user",
                &shard_names(&["-80"]),
                TabletType::Master,
                &SafeSession::default(),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, GateError::BatchShapeMismatch { expected: 2, got: 1, .. }));
    }

    #[tokio::test]
    async fn test_transaction_enrolls_each_shard_once() {
        let fix = fixture(&["-80", "80-"]).await;
        let session = SafeSession::new(Session::in_transaction());
        let ctx = CancellationToken::new();
        let shards = shard_names(&["-80", "80-"]);

        fix.scatter
            .execute(
                &ctx,
                "update t set a=1",
                &BindVariables::new(),
                "user",
                &shards,
                TabletType::Master,
                &session,
            )
            .await
            .unwrap();
        // Second dispatch reuses the recorded transaction ids.
        fix.scatter
            .execute(
                &ctx,
                "update t set b=2",
                &BindVariables::new(),
                "user",
                &shards,
                TabletType::Master,
                &session,
            )
            .await
            .unwrap();

        assert_eq!(fix.tablets[0].begin_count(), 1);
        assert_eq!(fix.tablets[1].begin_count(), 1);
        let snapshot = session.snapshot().await;
        assert_eq!(snapshot.shard_sessions.len(), 2);

        // Every execute carried the shard's transaction id.
        for tablet in &fix.tablets {
            for (_, transaction_id) in tablet.executed() {
                assert!(transaction_id.is_some());
            }
        }
    }

    #[tokio::test]
    async fn test_commit_is_best_effort_and_sequential() {
        let fix = fixture(&["-80", "80-"]).await;
        let session = SafeSession::new(Session::in_transaction());
        let ctx = CancellationToken::new();

        // Enroll both shards deterministically, one dispatch per shard.
        for shard in ["-80", "80-"] {
            fix.scatter
                .execute(
                    &ctx,
                    "update t set a=1",
                    &BindVariables::new(),
                    "user",
                    &shard_names(&[shard]),
                    TabletType::Master,
                    &session,
                )
                .await
                .unwrap();
        }
        fix.tablets[0].set_commit_error(TabletError::fatal("disk full"));

        let err = fix.scatter.commit(&ctx, &session).await.unwrap_err();

        // The failure on the first shard did not stop the second commit.
        assert_eq!(fix.tablets[0].committed().len(), 0);
        assert_eq!(fix.tablets[1].committed().len(), 1);
        let GateError::Scatter(scatter) = err else {
            panic!("expected scatter error");
        };
        assert_eq!(scatter.shard_errors[0].shard, "-80");
        // The session is cleared no matter what.
        let snapshot = session.snapshot().await;
        assert!(!snapshot.in_transaction);
        assert!(snapshot.shard_sessions.is_empty());
    }

    #[tokio::test]
    async fn test_commit_outside_transaction() {
        let fix = fixture(&["-80"]).await;
        let ctx = CancellationToken::new();

        let err = fix
            .scatter
            .commit(&ctx, &SafeSession::default())
            .await
            .unwrap_err();
        assert!(matches!(err, GateError::NotInTransaction));
    }

    #[tokio::test]
    async fn test_rollback_clears_session() {
        let fix = fixture(&["-80"]).await;
        let session = SafeSession::new(Session::in_transaction());
        let ctx = CancellationToken::new();

        fix.scatter
            .execute(
                &ctx,
                "update t set a=1",
                &BindVariables::new(),
                "user",
                &shard_names(&["-80"]),
                TabletType::Master,
                &session,
            )
            .await
            .unwrap();

        fix.scatter.rollback(&ctx, &session).await.unwrap();

        assert_eq!(fix.tablets[0].rolled_back().len(), 1);
        assert!(session.snapshot().await.shard_sessions.is_empty());
    }

    #[tokio::test]
    async fn test_transactional_subcall_does_not_retry() {
        let fix = fixture(&["-80"]).await;
        // Even with internal retries configured, a transactional sub-call
        // must not retry transparently.
        let topo = fix.scatter.topo().clone();
        let dialer = Arc::new(FakeDialer::new());
        let tablet = FakeTablet::new("user", "-80", 9);
        tablet.push_execute_result(Err(TabletError::retry("reset")));
        dialer.register(tablet.clone());
        let scatter = ScatterConn::new(topo, dialer, GateConfig::fast_for_testing("zone1"));

        let session = SafeSession::new(Session::in_transaction());
        let ctx = CancellationToken::new();

        let err = scatter
            .execute(
                &ctx,
                "update t set a=1",
                &BindVariables::new(),
                "user",
                &shard_names(&["-80"]),
                TabletType::Master,
                &session,
            )
            .await
            .unwrap_err();

        assert!(err.is_retry());
        assert_eq!(tablet.execute_count(), 1);
    }

    #[tokio::test]
    async fn test_stream_passes_chunks_through() {
        let fix = fixture(&["-80"]).await;
        fix.tablets[0].push_stream(vec![Ok(row_result(&[1])), Ok(row_result(&[2]))]);
        let ctx = CancellationToken::new();
        let (tx, mut rx) = mpsc::channel(8);

        fix.scatter
            .stream_execute(
                &ctx,
                "select id from t",
                &BindVariables::new(),
                "user",
                &shard_names(&["-80"]),
                TabletType::Master,
                &tx,
            )
            .await
            .unwrap();
        drop(tx);

        let mut chunks = Vec::new();
        while let Some(chunk) = rx.recv().await {
            chunks.push(chunk);
        }
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].rows, vec![vec![BindValue::Int(1)]]);
    }

    #[tokio::test]
    async fn test_stream_propagates_first_error() {
        let fix = fixture(&["-80"]).await;
        fix.tablets[0].push_stream(vec![
            Ok(row_result(&[1])),
            Err(TabletError::fatal("stream broke")),
        ]);
        let ctx = CancellationToken::new();
        let (tx, mut rx) = mpsc::channel(8);

        let err = fix
            .scatter
            .stream_execute(
                &ctx,
                "select id from t",
                &BindVariables::new(),
                "user",
                &shard_names(&["-80"]),
                TabletType::Master,
                &tx,
            )
            .await
            .unwrap_err();
        drop(tx);

        let GateError::Scatter(scatter) = err else {
            panic!("expected scatter error");
        };
        assert_eq!(scatter.code, meridian_core::TabletErrorCode::Fatal);
        // The chunk before the error was delivered.
        assert!(rx.recv().await.is_some());
        assert!(rx.recv().await.is_none());
    }
}
