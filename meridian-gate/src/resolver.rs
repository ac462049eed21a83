//! The re-resolve-and-retry orchestrator.
//!
//! The resolver maps routing keys to shards, dispatches through
//! [`ScatterConn`], and inspects failures: a collapsed all-shards-`Retry`
//! error triggers a fresh resolution, and the dispatch is re-issued only
//! if the topology observably moved - the keyspace gained a served-from
//! alias (vertical resharding) or the shard set changed (horizontal
//! resharding). A `Retry` with no observable change surfaces to the
//! caller; there is nothing different to retry against.
//!
//! The loop is unbounded by design and terminates because resharding
//! events are finite. It never re-dispatches inside a transaction:
//! already-committed sub-shards cannot be un-committed.
//!
//! Streaming skips the loop entirely and requires the keys to resolve to
//! exactly one shard, since nothing here can merge-sort streams.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use meridian_core::{
    BindVariables, BoundQuery, KeyRange, KeyspaceId, QueryResult, QueryResultList, TabletType,
};
use meridian_topo::{
    get_keyspace_alias, map_entity_ids_to_shards, map_key_ranges_to_shards,
    map_keyspace_ids_to_shards, SrvTopoServer,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::GateConfig;
use crate::error::{GateError, GateResult};
use crate::safe_session::SafeSession;
use crate::scatter_conn::ScatterConn;
use crate::tablet_conn::TabletDialer;

/// A non-streaming or streaming query addressed by keyspace ids.
#[derive(Debug, Clone)]
pub struct KeyspaceIdQuery {
    /// The SQL text.
    pub sql: String,
    /// Bind variables for `sql`.
    pub bind_variables: BindVariables,
    /// The addressed keyspace.
    pub keyspace: String,
    /// The tablet type to route to.
    pub tablet_type: TabletType,
    /// Routing keys; one id homes on exactly one shard.
    pub keyspace_ids: Vec<KeyspaceId>,
}

/// A non-streaming or streaming query addressed by key ranges.
#[derive(Debug, Clone)]
pub struct KeyRangeQuery {
    /// The SQL text.
    pub sql: String,
    /// Bind variables for `sql`.
    pub bind_variables: BindVariables,
    /// The addressed keyspace.
    pub keyspace: String,
    /// The tablet type to route to.
    pub tablet_type: TabletType,
    /// Routing keys; one range may span several shards.
    pub key_ranges: Vec<KeyRange>,
}

/// A batch of queries addressed by keyspace ids.
#[derive(Debug, Clone)]
pub struct KeyspaceIdBatchQuery {
    /// The queries, dispatched together to every resolved shard.
    pub queries: Vec<BoundQuery>,
    /// The addressed keyspace.
    pub keyspace: String,
    /// The tablet type to route to.
    pub tablet_type: TabletType,
    /// Routing keys.
    pub keyspace_ids: Vec<KeyspaceId>,
}

/// A batch of queries addressed by key ranges.
#[derive(Debug, Clone)]
pub struct KeyRangeBatchQuery {
    /// The queries, dispatched together to every resolved shard.
    pub queries: Vec<BoundQuery>,
    /// The addressed keyspace.
    pub keyspace: String,
    /// The tablet type to route to.
    pub tablet_type: TabletType,
    /// Routing keys.
    pub key_ranges: Vec<KeyRange>,
}

/// A query addressed by per-entity keyspace ids.
///
/// Each shard receives the SQL with an `entity_column IN (...)` predicate
/// spliced in, restricted to the entities homed on that shard.
#[derive(Debug, Clone)]
pub struct EntityIdsQuery {
    /// The SQL text, without the entity predicate.
    pub sql: String,
    /// Bind variables for `sql`.
    pub bind_variables: BindVariables,
    /// The addressed keyspace.
    pub keyspace: String,
    /// The tablet type to route to.
    pub tablet_type: TabletType,
    /// Column the entity predicate is built over.
    pub entity_column_name: String,
    /// Application entity value to the id of the row's home shard.
    pub entity_keyspace_id_map: HashMap<String, KeyspaceId>,
}

/// The routing keys of one request, held for re-resolution.
enum RoutingKeys<'a> {
    KeyspaceIds(&'a [KeyspaceId]),
    KeyRanges(&'a [KeyRange]),
}

/// Topology-aware front door for query dispatch.
pub struct Resolver {
    scatter_conn: ScatterConn,
}

impl Resolver {
    /// Creates a resolver; all parameters pass through to the scatter
    /// layer it wraps.
    pub fn new(
        topo: Arc<dyn SrvTopoServer>,
        dialer: Arc<dyn TabletDialer>,
        config: GateConfig,
    ) -> Self {
        Self {
            scatter_conn: ScatterConn::new(topo, dialer, config),
        }
    }

    /// The scatter layer underneath.
    #[must_use]
    pub const fn scatter_conn(&self) -> &ScatterConn {
        &self.scatter_conn
    }

    /// Executes a query on the shards owning the given keyspace ids.
    ///
    /// # Errors
    ///
    /// Resolution errors surface verbatim; dispatch errors surface after
    /// the re-resolve loop declines to retry.
    pub async fn execute_keyspace_ids(
        &self,
        ctx: &CancellationToken,
        query: &KeyspaceIdQuery,
        session: &SafeSession,
    ) -> GateResult<QueryResult> {
        self.execute(
            ctx,
            &query.sql,
            &query.bind_variables,
            &query.keyspace,
            query.tablet_type,
            session,
            &RoutingKeys::KeyspaceIds(&query.keyspace_ids),
        )
        .await
    }

    /// Executes a query on the shards intersecting the given key ranges.
    ///
    /// # Errors
    ///
    /// Resolution errors surface verbatim; dispatch errors surface after
    /// the re-resolve loop declines to retry.
    pub async fn execute_key_ranges(
        &self,
        ctx: &CancellationToken,
        query: &KeyRangeQuery,
        session: &SafeSession,
    ) -> GateResult<QueryResult> {
        self.execute(
            ctx,
            &query.sql,
            &query.bind_variables,
            &query.keyspace,
            query.tablet_type,
            session,
            &RoutingKeys::KeyRanges(&query.key_ranges),
        )
        .await
    }

    /// Executes a batch on the shards owning the given keyspace ids.
    ///
    /// # Errors
    ///
    /// Resolution errors surface verbatim; dispatch errors surface after
    /// the re-resolve loop declines to retry.
    pub async fn execute_batch_keyspace_ids(
        &self,
        ctx: &CancellationToken,
        query: &KeyspaceIdBatchQuery,
        session: &SafeSession,
    ) -> GateResult<QueryResultList> {
        self.execute_batch(
            ctx,
            &query.queries,
            &query.keyspace,
            query.tablet_type,
            session,
            &RoutingKeys::KeyspaceIds(&query.keyspace_ids),
        )
        .await
    }

    /// Executes a batch on the shards intersecting the given key ranges.
    ///
    /// # Errors
    ///
    /// Resolution errors surface verbatim; dispatch errors surface after
    /// the re-resolve loop declines to retry.
    pub async fn execute_batch_key_ranges(
        &self,
        ctx: &CancellationToken,
        query: &KeyRangeBatchQuery,
        session: &SafeSession,
    ) -> GateResult<QueryResultList> {
        self.execute_batch(
            ctx,
            &query.queries,
            &query.keyspace,
            query.tablet_type,
            session,
            &RoutingKeys::KeyRanges(&query.key_ranges),
        )
        .await
    }

    /// Executes a query with a per-shard entity predicate spliced in.
    ///
    /// # Errors
    ///
    /// Resolution errors surface verbatim; dispatch errors surface after
    /// the re-resolve loop declines to retry.
    pub async fn execute_entity_ids(
        &self,
        ctx: &CancellationToken,
        query: &EntityIdsQuery,
        session: &SafeSession,
    ) -> GateResult<QueryResult> {
        let mut keyspace = query.keyspace.clone();
        let entity_ids: Vec<KeyspaceId> = query.entity_keyspace_id_map.values().cloned().collect();

        let shard_map = self
            .resolve_entity_map(ctx, &keyspace, query.tablet_type, &entity_ids)
            .await?;
        let (mut shards, mut sqls, mut bind_variables) = build_entity_ids(
            &shard_map,
            &query.sql,
            &query.entity_column_name,
            &query.bind_variables,
        );

        loop {
            let result = self
                .scatter_conn
                .execute_entity_ids(
                    ctx,
                    &shards,
                    &sqls,
                    &bind_variables,
                    &keyspace,
                    query.tablet_type,
                    session,
                )
                .await;

            match result {
                Err(err) if err.is_retry() => {
                    // Committed sub-shards cannot be retried safely.
                    if session.in_transaction().await {
                        return Err(err);
                    }
                    let mut resharded = self
                        .check_keyspace_alias(ctx, &mut keyspace, query.tablet_type)
                        .await;
                    let new_shard_map = self
                        .resolve_entity_map(ctx, &keyspace, query.tablet_type, &entity_ids)
                        .await?;
                    let (new_shards, new_sqls, new_bind_variables) = build_entity_ids(
                        &new_shard_map,
                        &query.sql,
                        &query.entity_column_name,
                        &query.bind_variables,
                    );
                    if !shards_equal(&new_shards, &shards) {
                        shards = new_shards;
                        sqls = new_sqls;
                        bind_variables = new_bind_variables;
                        resharded = true;
                    }
                    if resharded {
                        info!(%keyspace, "entity query rerouted after resharding");
                        continue;
                    }
                    return Err(err);
                }
                other => return other,
            }
        }
    }

    /// Streams a query's results from the single shard owning the given
    /// keyspace ids.
    ///
    /// # Errors
    ///
    /// Fails without dispatching if the keys resolve to more than one
    /// shard; there is no retry loop for streams.
    pub async fn stream_execute_keyspace_ids(
        &self,
        ctx: &CancellationToken,
        query: &KeyspaceIdQuery,
        sink: &mpsc::Sender<QueryResult>,
    ) -> GateResult<()> {
        self.stream_execute(
            ctx,
            &query.sql,
            &query.bind_variables,
            &query.keyspace,
            query.tablet_type,
            &RoutingKeys::KeyspaceIds(&query.keyspace_ids),
            sink,
        )
        .await
    }

    /// Streams a query's results from the single shard intersecting the
    /// given key ranges.
    ///
    /// # Errors
    ///
    /// Fails without dispatching if the keys resolve to more than one
    /// shard; there is no retry loop for streams.
    pub async fn stream_execute_key_ranges(
        &self,
        ctx: &CancellationToken,
        query: &KeyRangeQuery,
        sink: &mpsc::Sender<QueryResult>,
    ) -> GateResult<()> {
        self.stream_execute(
            ctx,
            &query.sql,
            &query.bind_variables,
            &query.keyspace,
            query.tablet_type,
            &RoutingKeys::KeyRanges(&query.key_ranges),
            sink,
        )
        .await
    }

    /// Commits the session's transaction.
    ///
    /// # Errors
    ///
    /// Fails if no transaction is open, or with the first per-shard
    /// commit failure.
    pub async fn commit(&self, ctx: &CancellationToken, session: &SafeSession) -> GateResult<()> {
        self.scatter_conn.commit(ctx, session).await
    }

    /// Rolls back the session's transaction.
    ///
    /// # Errors
    ///
    /// Fails with the first per-shard rollback failure.
    pub async fn rollback(&self, ctx: &CancellationToken, session: &SafeSession) -> GateResult<()> {
        self.scatter_conn.rollback(ctx, session).await
    }

    #[allow(clippy::too_many_arguments)]
    async fn execute(
        &self,
        ctx: &CancellationToken,
        sql: &str,
        bind_variables: &BindVariables,
        keyspace: &str,
        tablet_type: TabletType,
        session: &SafeSession,
        keys: &RoutingKeys<'_>,
    ) -> GateResult<QueryResult> {
        let mut keyspace = keyspace.to_string();
        let mut shards = self.resolve_shards(ctx, &keyspace, tablet_type, keys).await?;
        loop {
            let result = self
                .scatter_conn
                .execute(
                    ctx,
                    sql,
                    bind_variables,
                    &keyspace,
                    &shards,
                    tablet_type,
                    session,
                )
                .await;

            match result {
                Err(err) if err.is_retry() => {
                    // Committed sub-shards cannot be retried safely.
                    if session.in_transaction().await {
                        return Err(err);
                    }
                    if self
                        .reresolve(ctx, &mut keyspace, tablet_type, keys, &mut shards)
                        .await?
                    {
                        continue;
                    }
                    return Err(err);
                }
                other => return other,
            }
        }
    }

    async fn execute_batch(
        &self,
        ctx: &CancellationToken,
        queries: &[BoundQuery],
        keyspace: &str,
        tablet_type: TabletType,
        session: &SafeSession,
        keys: &RoutingKeys<'_>,
    ) -> GateResult<QueryResultList> {
        let mut keyspace = keyspace.to_string();
        let mut shards = self.resolve_shards(ctx, &keyspace, tablet_type, keys).await?;
        loop {
            let result = self
                .scatter_conn
                .execute_batch(ctx, queries, &keyspace, &shards, tablet_type, session)
                .await;

            match result {
                Err(err) if err.is_retry() => {
                    // Committed sub-shards cannot be retried safely.
                    if session.in_transaction().await {
                        return Err(err);
                    }
                    if self
                        .reresolve(ctx, &mut keyspace, tablet_type, keys, &mut shards)
                        .await?
                    {
                        continue;
                    }
                    return Err(err);
                }
                other => return other,
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn stream_execute(
        &self,
        ctx: &CancellationToken,
        sql: &str,
        bind_variables: &BindVariables,
        keyspace: &str,
        tablet_type: TabletType,
        keys: &RoutingKeys<'_>,
        sink: &mpsc::Sender<QueryResult>,
    ) -> GateResult<()> {
        let shards = self.resolve_shards(ctx, keyspace, tablet_type, keys).await?;
        if shards.len() != 1 {
            return Err(GateError::StreamOnMultipleShards(shards.len()));
        }
        self.scatter_conn
            .stream_execute(ctx, sql, bind_variables, keyspace, &shards, tablet_type, sink)
            .await
    }

    /// Re-resolves after a retryable dispatch failure. Returns true if
    /// the topology observably moved, making a retry worthwhile.
    async fn reresolve(
        &self,
        ctx: &CancellationToken,
        keyspace: &mut String,
        tablet_type: TabletType,
        keys: &RoutingKeys<'_>,
        shards: &mut Vec<String>,
    ) -> GateResult<bool> {
        let mut resharded = self.check_keyspace_alias(ctx, keyspace, tablet_type).await;
        let new_shards = self.resolve_shards(ctx, keyspace, tablet_type, keys).await?;
        if !shards_equal(&new_shards, shards) {
            info!(
                keyspace = %keyspace,
                from = ?shards,
                to = ?new_shards,
                "shard set changed, rerouting"
            );
            *shards = new_shards;
            resharded = true;
        }
        Ok(resharded)
    }

    /// Follows the served-from alias, rewriting `keyspace` in place.
    /// Returns true if the keyspace moved. Lookup failures are ignored:
    /// the alias check is best-effort on top of an already-failed
    /// dispatch.
    async fn check_keyspace_alias(
        &self,
        ctx: &CancellationToken,
        keyspace: &mut String,
        tablet_type: TabletType,
    ) -> bool {
        let topo = self.scatter_conn.topo().as_ref();
        if let Ok(new_keyspace) =
            get_keyspace_alias(topo, ctx, self.scatter_conn.cell(), keyspace, tablet_type).await
        {
            if new_keyspace != *keyspace {
                info!(from = %keyspace, to = %new_keyspace, "keyspace moved, rerouting");
                *keyspace = new_keyspace;
                return true;
            }
        }
        false
    }

    async fn resolve_shards(
        &self,
        ctx: &CancellationToken,
        keyspace: &str,
        tablet_type: TabletType,
        keys: &RoutingKeys<'_>,
    ) -> GateResult<Vec<String>> {
        let topo = self.scatter_conn.topo().as_ref();
        let cell = self.scatter_conn.cell();
        let shards = match keys {
            RoutingKeys::KeyspaceIds(ids) => {
                map_keyspace_ids_to_shards(topo, ctx, cell, keyspace, tablet_type, ids).await?
            }
            RoutingKeys::KeyRanges(ranges) => {
                map_key_ranges_to_shards(topo, ctx, cell, keyspace, tablet_type, ranges).await?
            }
        };
        Ok(shards)
    }

    async fn resolve_entity_map(
        &self,
        ctx: &CancellationToken,
        keyspace: &str,
        tablet_type: TabletType,
        entity_ids: &[KeyspaceId],
    ) -> GateResult<BTreeMap<String, Vec<KeyspaceId>>> {
        let topo = self.scatter_conn.topo().as_ref();
        let cell = self.scatter_conn.cell();
        Ok(map_entity_ids_to_shards(topo, ctx, cell, keyspace, entity_ids, tablet_type).await?)
    }
}

/// Multiset equality on shard name lists: `{A, B}` equals `{B, A}`.
#[must_use]
pub fn shards_equal(a: &[String], b: &[String]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut a = a.to_vec();
    let mut b = b.to_vec();
    a.sort();
    b.sort();
    a == b
}

/// Builds the per-shard rewritten queries for an entity-ids dispatch.
///
/// For each shard, the bind variables are cloned and extended with
/// `<entity_column>0, <entity_column>1, ...` bound to the shard's
/// keyspace ids, and the SQL gains an
/// `<entity_column> in (:<entity_column>0, ...)` predicate via
/// [`insert_sql_clause`]. Shards iterate in sorted order, so the output
/// is deterministic.
#[must_use]
pub fn build_entity_ids(
    shard_map: &BTreeMap<String, Vec<KeyspaceId>>,
    sql: &str,
    entity_column_name: &str,
    bind_variables: &BindVariables,
) -> (
    Vec<String>,
    HashMap<String, String>,
    HashMap<String, BindVariables>,
) {
    let mut shards = Vec::with_capacity(shard_map.len());
    let mut sqls = HashMap::new();
    let mut shard_bind_variables = HashMap::new();

    for (shard, ids) in shard_map {
        let mut binds = bind_variables.clone();
        let mut clause = String::from(entity_column_name);
        clause.push_str(" in (");
        for (i, id) in ids.iter().enumerate() {
            let name = format!("{entity_column_name}{i}");
            if i > 0 {
                clause.push_str(", ");
            }
            clause.push(':');
            clause.push_str(&name);
            binds.insert(name, id.clone().into());
        }
        clause.push(')');

        shards.push(shard.clone());
        sqls.insert(shard.clone(), insert_sql_clause(sql, &clause));
        shard_bind_variables.insert(shard.clone(), binds);
    }
    (shards, sqls, shard_bind_variables)
}

/// Splices a predicate into a SQL string.
///
/// The clause lands before the leftmost of ` group by`, ` order by`,
/// ` limit`, ` for update` (scanned case-insensitively, each requiring a
/// leading space), or at the end of the string. It is prefixed with
/// ` and ` when the SQL already contains `where`, ` where ` otherwise.
///
/// This is a textual heuristic, not a parser: a keyword inside a string
/// literal or sub-query will fool it.
#[must_use]
pub fn insert_sql_clause(query_sql: &str, clause: &str) -> String {
    let mut idx = query_sql.len();
    for keyword in [" group by", " order by", " limit", " for update"] {
        if let Some(found) = find_ignore_ascii_case(query_sql, keyword) {
            if found > 0 && found < idx {
                idx = found;
            }
        }
    }
    let prefix = if find_ignore_ascii_case(query_sql, "where").is_some() {
        " and "
    } else {
        " where "
    };

    let mut out = String::with_capacity(query_sql.len() + prefix.len() + clause.len());
    out.push_str(&query_sql[..idx]);
    out.push_str(prefix);
    out.push_str(clause);
    out.push_str(&query_sql[idx..]);
    out
}

fn find_ignore_ascii_case(haystack: &str, needle: &str) -> Option<usize> {
    let haystack = haystack.as_bytes();
    let needle = needle.as_bytes();
    if needle.len() > haystack.len() {
        return None;
    }
    haystack
        .windows(needle.len())
        .position(|window| window.eq_ignore_ascii_case(needle))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kid(byte: u8) -> KeyspaceId {
        KeyspaceId::new(vec![byte])
    }

    #[test]
    fn test_shards_equal_is_multiset_equality() {
        let a = vec!["-80".to_string(), "80-".to_string()];
        let b = vec!["80-".to_string(), "-80".to_string()];
        let c = vec!["-80".to_string()];
        let d = vec!["-80".to_string(), "-80".to_string()];

        assert!(shards_equal(&a, &b));
        assert!(shards_equal(&a, &a));
        assert!(!shards_equal(&a, &c));
        assert!(!shards_equal(&a, &d));
        assert!(shards_equal(&[], &[]));
    }

    #[test]
    fn test_insert_clause_before_order_by_and_limit() {
        let out = insert_sql_clause(
            "SELECT * FROM t WHERE a=1 ORDER BY b LIMIT 10",
            "id in (:e0,:e1)",
        );
        assert_eq!(
            out,
            "SELECT * FROM t WHERE a=1 and id in (:e0,:e1) ORDER BY b LIMIT 10"
        );
    }

    #[test]
    fn test_insert_clause_no_where() {
        let out = insert_sql_clause("select * from t", "id in (:e0)");
        assert_eq!(out, "select * from t where id in (:e0)");
    }

    #[test]
    fn test_insert_clause_group_by() {
        let out = insert_sql_clause("select a, count(*) from t group by a", "id in (:e0)");
        assert_eq!(out, "select a, count(*) from t where id in (:e0) group by a");
    }

    #[test]
    fn test_insert_clause_for_update() {
        let out = insert_sql_clause("select * from t where a=1 for update", "id = :e0");
        assert_eq!(out, "select * from t where a=1 and id = :e0 for update");
    }

    #[test]
    fn test_insert_clause_plain_where() {
        let out = insert_sql_clause("select * from t where a=1", "id in (:e0)");
        assert_eq!(out, "select * from t where a=1 and id in (:e0)");
    }

    #[test]
    fn test_insert_clause_twice_keeps_order() {
        let once = insert_sql_clause("select * from t order by b", "a = :a0");
        let twice = insert_sql_clause(&once, "c = :c0");

        assert_eq!(
            twice,
            "select * from t where a = :a0 and c = :c0 order by b"
        );
        // Each clause appears exactly once.
        assert_eq!(twice.matches("a = :a0").count(), 1);
        assert_eq!(twice.matches("c = :c0").count(), 1);
    }

    #[test]
    fn test_build_entity_ids_rewrites_per_shard() {
        let mut shard_map = BTreeMap::new();
        shard_map.insert("-80".to_string(), vec![kid(0x10), kid(0x20)]);
        shard_map.insert("80-".to_string(), vec![kid(0x90)]);
        let mut binds = BindVariables::new();
        binds.insert("a".to_string(), 1_i64.into());

        let (shards, sqls, bind_variables) =
            build_entity_ids(&shard_map, "select * from t where a = :a", "uid", &binds);

        assert_eq!(shards, vec!["-80".to_string(), "80-".to_string()]);
        assert_eq!(
            sqls["-80"],
            "select * from t where a = :a and uid in (:uid0, :uid1)"
        );
        assert_eq!(sqls["80-"], "select * from t where a = :a and uid in (:uid0)");

        let low = &bind_variables["-80"];
        assert_eq!(low["uid0"], kid(0x10).into());
        assert_eq!(low["uid1"], kid(0x20).into());
        assert_eq!(low["a"], 1_i64.into());
        let high = &bind_variables["80-"];
        assert_eq!(high["uid0"], kid(0x90).into());
        assert!(!high.contains_key("uid1"));
    }

    #[test]
    fn test_build_entity_ids_regroups_to_input() {
        let mut shard_map = BTreeMap::new();
        shard_map.insert("-80".to_string(), vec![kid(0x10), kid(0x20)]);
        shard_map.insert("80-".to_string(), vec![kid(0x90), kid(0xa0)]);

        let (shards, _, bind_variables) =
            build_entity_ids(&shard_map, "select * from t", "uid", &BindVariables::new());

        // Re-group the emitted bind variables by shard and compare with
        // the input map.
        let mut regrouped: BTreeMap<String, Vec<KeyspaceId>> = BTreeMap::new();
        for shard in &shards {
            let binds = &bind_variables[shard];
            let mut ids: Vec<KeyspaceId> = Vec::new();
            let mut i = 0;
            while let Some(value) = binds.get(&format!("uid{i}")) {
                let meridian_core::BindValue::Bytes(bytes) = value else {
                    panic!("entity binds must be bytes");
                };
                ids.push(KeyspaceId::new(bytes.clone()));
                i += 1;
            }
            ids.sort();
            regrouped.insert(shard.clone(), ids);
        }
        assert_eq!(regrouped, shard_map);
    }

    #[test]
    fn test_leading_keyword_is_not_a_splice_point() {
        // A keyword at position zero has no leading space in front of
        // anything; the splice falls through to the end.
        let out = insert_sql_clause(" limit 5", "id = :e0");
        assert_eq!(out, " limit 5 where id = :e0");
    }
}
