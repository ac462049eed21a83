//! Concurrency-safe session wrapper.
//!
//! Parallel fan-out sub-calls from one dispatch all touch the same
//! caller-owned session. `SafeSession` serializes that access; in
//! particular the scatter layer holds the lock across its find-or-begin
//! sequence so two sub-calls can never open two transactions on the same
//! backend.

use std::sync::Arc;

use meridian_core::{DuplicateShardSession, Session, ShardSession, TabletType};
use tokio::sync::{Mutex, MutexGuard};

/// Shared handle to one caller-owned [`Session`].
///
/// Cloning shares the underlying session; the RPC layer keeps one clone
/// for the lifetime of the client's transaction and passes another into
/// each call.
#[derive(Clone, Default)]
pub struct SafeSession {
    inner: Arc<Mutex<Session>>,
}

impl SafeSession {
    /// Wraps a session.
    #[must_use]
    pub fn new(session: Session) -> Self {
        Self {
            inner: Arc::new(Mutex::new(session)),
        }
    }

    /// True while the session's transaction is open.
    pub async fn in_transaction(&self) -> bool {
        self.inner.lock().await.in_transaction
    }

    /// Looks up the transaction handle recorded for a backend.
    pub async fn find(&self, keyspace: &str, shard: &str, tablet_type: TabletType) -> Option<i64> {
        self.inner.lock().await.find(keyspace, shard, tablet_type)
    }

    /// Enrolls a backend in the transaction.
    ///
    /// # Errors
    ///
    /// Fails if the backend is already enrolled; see [`Session::append`].
    pub async fn append(&self, shard_session: ShardSession) -> Result<(), DuplicateShardSession> {
        self.inner.lock().await.append(shard_session)
    }

    /// Clears the transaction. Used after commit or rollback.
    pub async fn reset(&self) {
        self.inner.lock().await.reset();
    }

    /// Copies the current session state, e.g. for the wire.
    pub async fn snapshot(&self) -> Session {
        self.inner.lock().await.clone()
    }

    /// Locks the session for a compound read-modify sequence.
    pub(crate) async fn lock(&self) -> MutexGuard<'_, Session> {
        self.inner.lock().await
    }
}
