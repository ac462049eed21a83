//! Scripted doubles for the tablet seam.
//!
//! [`FakeTablet`] implements [`TabletConn`] with scripted responses and
//! call recording; [`FakeDialer`] hands out registered fakes keyed by
//! `(keyspace, shard)`. Together they let tests drive the full resolver
//! and scatter stack without a network.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use meridian_core::{BoundQuery, QueryResult, QueryResultList};
use meridian_topo::EndPoint;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::{TabletError, TabletResult};
use crate::tablet_conn::{TabletConn, TabletDialer};

#[derive(Default)]
struct Script {
    execute_results: VecDeque<TabletResult<QueryResult>>,
    batch_results: VecDeque<TabletResult<QueryResultList>>,
    streams: VecDeque<Vec<TabletResult<QueryResult>>>,
    default_result: QueryResult,
    commit_error: Option<TabletError>,
    rollback_error: Option<TabletError>,
    executed: Vec<(BoundQuery, Option<i64>)>,
    committed: Vec<i64>,
    rolled_back: Vec<i64>,
}

/// A scripted tablet.
///
/// Execute calls consume queued results first and fall back to the
/// default result. Every call is recorded for assertions.
pub struct FakeTablet {
    keyspace: String,
    shard: String,
    end_point: EndPoint,
    script: Mutex<Script>,
    execute_calls: AtomicUsize,
    begin_calls: AtomicUsize,
    stream_calls: AtomicUsize,
    next_transaction_id: AtomicI64,
}

impl FakeTablet {
    /// Creates a fake tablet for a shard.
    #[must_use]
    pub fn new(keyspace: &str, shard: &str, uid: u32) -> Arc<Self> {
        Arc::new(Self {
            keyspace: keyspace.to_string(),
            shard: shard.to_string(),
            end_point: EndPoint::new(uid, format!("{keyspace}.{shard}"), "grpc", 15000),
            script: Mutex::new(Script::default()),
            execute_calls: AtomicUsize::new(0),
            begin_calls: AtomicUsize::new(0),
            stream_calls: AtomicUsize::new(0),
            next_transaction_id: AtomicI64::new(i64::from(uid) * 100),
        })
    }

    /// The keyspace this fake serves.
    #[must_use]
    pub fn keyspace(&self) -> &str {
        &self.keyspace
    }

    /// The shard this fake serves.
    #[must_use]
    pub fn shard(&self) -> &str {
        &self.shard
    }

    /// Sets the result returned when no queued result is left.
    pub fn set_default_result(&self, result: QueryResult) {
        self.script.lock().expect("fake tablet poisoned").default_result = result;
    }

    /// Queues one execute outcome.
    pub fn push_execute_result(&self, result: TabletResult<QueryResult>) {
        self.script
            .lock()
            .expect("fake tablet poisoned")
            .execute_results
            .push_back(result);
    }

    /// Queues one batch outcome.
    pub fn push_batch_result(&self, result: TabletResult<QueryResultList>) {
        self.script
            .lock()
            .expect("fake tablet poisoned")
            .batch_results
            .push_back(result);
    }

    /// Queues the chunk sequence for one streaming call.
    pub fn push_stream(&self, chunks: Vec<TabletResult<QueryResult>>) {
        self.script
            .lock()
            .expect("fake tablet poisoned")
            .streams
            .push_back(chunks);
    }

    /// Makes every commit fail with the given error.
    pub fn set_commit_error(&self, error: TabletError) {
        self.script.lock().expect("fake tablet poisoned").commit_error = Some(error);
    }

    /// Makes every rollback fail with the given error.
    pub fn set_rollback_error(&self, error: TabletError) {
        self.script.lock().expect("fake tablet poisoned").rollback_error = Some(error);
    }

    /// Number of execute calls served.
    #[must_use]
    pub fn execute_count(&self) -> usize {
        self.execute_calls.load(Ordering::Relaxed)
    }

    /// Number of begin calls served.
    #[must_use]
    pub fn begin_count(&self) -> usize {
        self.begin_calls.load(Ordering::Relaxed)
    }

    /// Number of streaming calls served.
    #[must_use]
    pub fn stream_count(&self) -> usize {
        self.stream_calls.load(Ordering::Relaxed)
    }

    /// The queries executed so far, with their transaction ids.
    #[must_use]
    pub fn executed(&self) -> Vec<(BoundQuery, Option<i64>)> {
        self.script.lock().expect("fake tablet poisoned").executed.clone()
    }

    /// Transaction ids committed successfully.
    #[must_use]
    pub fn committed(&self) -> Vec<i64> {
        self.script.lock().expect("fake tablet poisoned").committed.clone()
    }

    /// Transaction ids rolled back successfully.
    #[must_use]
    pub fn rolled_back(&self) -> Vec<i64> {
        self.script.lock().expect("fake tablet poisoned").rolled_back.clone()
    }
}

#[async_trait]
impl TabletConn for FakeTablet {
    async fn execute(
        &self,
        ctx: &CancellationToken,
        query: &BoundQuery,
        transaction_id: Option<i64>,
    ) -> TabletResult<QueryResult> {
        if ctx.is_cancelled() {
            return Err(TabletError::cancelled());
        }
        self.execute_calls.fetch_add(1, Ordering::Relaxed);
        let mut script = self.script.lock().expect("fake tablet poisoned");
        script.executed.push((query.clone(), transaction_id));
        match script.execute_results.pop_front() {
            Some(result) => result,
            None => Ok(script.default_result.clone()),
        }
    }

    async fn execute_batch(
        &self,
        ctx: &CancellationToken,
        queries: &[BoundQuery],
        transaction_id: Option<i64>,
    ) -> TabletResult<QueryResultList> {
        if ctx.is_cancelled() {
            return Err(TabletError::cancelled());
        }
        let mut script = self.script.lock().expect("fake tablet poisoned");
        for query in queries {
            script.executed.push((query.clone(), transaction_id));
        }
        match script.batch_results.pop_front() {
            Some(result) => result,
            None => Ok(QueryResultList {
                list: vec![script.default_result.clone(); queries.len()],
            }),
        }
    }

    async fn stream_execute(
        &self,
        ctx: &CancellationToken,
        query: &BoundQuery,
    ) -> TabletResult<mpsc::Receiver<TabletResult<QueryResult>>> {
        if ctx.is_cancelled() {
            return Err(TabletError::cancelled());
        }
        self.stream_calls.fetch_add(1, Ordering::Relaxed);
        let chunks = {
            let mut script = self.script.lock().expect("fake tablet poisoned");
            script.executed.push((query.clone(), None));
            match script.streams.pop_front() {
                Some(chunks) => chunks,
                None => vec![Ok(script.default_result.clone())],
            }
        };
        let (tx, rx) = mpsc::channel(chunks.len().max(1));
        for chunk in chunks {
            tx.try_send(chunk).expect("stream channel sized to fit");
        }
        Ok(rx)
    }

    async fn begin(&self, ctx: &CancellationToken) -> TabletResult<i64> {
        if ctx.is_cancelled() {
            return Err(TabletError::cancelled());
        }
        self.begin_calls.fetch_add(1, Ordering::Relaxed);
        Ok(self.next_transaction_id.fetch_add(1, Ordering::Relaxed))
    }

    async fn commit(&self, ctx: &CancellationToken, transaction_id: i64) -> TabletResult<()> {
        if ctx.is_cancelled() {
            return Err(TabletError::cancelled());
        }
        let mut script = self.script.lock().expect("fake tablet poisoned");
        if let Some(error) = script.commit_error.clone() {
            return Err(error);
        }
        script.committed.push(transaction_id);
        Ok(())
    }

    async fn rollback(&self, ctx: &CancellationToken, transaction_id: i64) -> TabletResult<()> {
        if ctx.is_cancelled() {
            return Err(TabletError::cancelled());
        }
        let mut script = self.script.lock().expect("fake tablet poisoned");
        if let Some(error) = script.rollback_error.clone() {
            return Err(error);
        }
        script.rolled_back.push(transaction_id);
        Ok(())
    }

    fn end_point(&self) -> &EndPoint {
        &self.end_point
    }

    async fn close(&self) {}
}

/// Hands out registered [`FakeTablet`]s by `(keyspace, shard)`.
#[derive(Default)]
pub struct FakeDialer {
    tablets: Mutex<HashMap<(String, String), Arc<FakeTablet>>>,
    dial_errors: Mutex<VecDeque<TabletError>>,
    dial_calls: AtomicUsize,
}

impl FakeDialer {
    /// Creates an empty dialer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a tablet under its keyspace and shard.
    pub fn register(&self, tablet: Arc<FakeTablet>) {
        self.tablets.lock().expect("fake dialer poisoned").insert(
            (tablet.keyspace().to_string(), tablet.shard().to_string()),
            tablet,
        );
    }

    /// Queues a dial failure, consumed by the next dial.
    pub fn push_dial_error(&self, error: TabletError) {
        self.dial_errors
            .lock()
            .expect("fake dialer poisoned")
            .push_back(error);
    }

    /// Number of dial attempts, including failed ones.
    #[must_use]
    pub fn dial_count(&self) -> usize {
        self.dial_calls.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl TabletDialer for FakeDialer {
    async fn dial(
        &self,
        ctx: &CancellationToken,
        _end_point: &EndPoint,
        keyspace: &str,
        shard: &str,
    ) -> TabletResult<Arc<dyn TabletConn>> {
        if ctx.is_cancelled() {
            return Err(TabletError::cancelled());
        }
        self.dial_calls.fetch_add(1, Ordering::Relaxed);
        if let Some(error) = self
            .dial_errors
            .lock()
            .expect("fake dialer poisoned")
            .pop_front()
        {
            return Err(error);
        }
        let tablet = self
            .tablets
            .lock()
            .expect("fake dialer poisoned")
            .get(&(keyspace.to_string(), shard.to_string()))
            .cloned();
        tablet
            .map(|t| t as Arc<dyn TabletConn>)
            .ok_or_else(|| TabletError::fatal(format!("no tablet registered for {keyspace}/{shard}")))
    }
}
