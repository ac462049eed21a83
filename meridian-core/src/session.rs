//! Session wire shape.
//!
//! A session is the only mutable state crossing the RPC boundary. It
//! records whether a transaction is open and which backends have joined
//! it, keyed by `(keyspace, shard, tablet_type)`.
//!
//! Invariant: within one transaction the shard-session set grows
//! monotonically, one entry per backend; commit and rollback clear it.

use std::fmt;

use crate::types::TabletType;

/// One backend enrolled in the session's transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardSession {
    /// Keyspace of the enrolled backend.
    pub keyspace: String,
    /// Shard name of the enrolled backend.
    pub shard: String,
    /// Tablet type the transaction was opened against.
    pub tablet_type: TabletType,
    /// The backend's transaction handle.
    pub transaction_id: i64,
}

/// Transactional state carried by the client on every call.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Session {
    /// True while a transaction is open.
    pub in_transaction: bool,
    /// Backends enrolled in the open transaction.
    pub shard_sessions: Vec<ShardSession>,
}

impl Session {
    /// Creates a session with an open transaction and no enrolled shards.
    #[must_use]
    pub const fn in_transaction() -> Self {
        Self {
            in_transaction: true,
            shard_sessions: Vec::new(),
        }
    }

    /// Looks up the transaction handle recorded for a backend.
    #[must_use]
    pub fn find(&self, keyspace: &str, shard: &str, tablet_type: TabletType) -> Option<i64> {
        self.shard_sessions
            .iter()
            .find(|s| s.keyspace == keyspace && s.shard == shard && s.tablet_type == tablet_type)
            .map(|s| s.transaction_id)
    }

    /// Enrolls a backend in the transaction.
    ///
    /// # Errors
    ///
    /// Fails if an entry already exists for the same
    /// `(keyspace, shard, tablet_type)`. Two transactions on one backend
    /// means the scatter layer lost track of the session; surfacing the
    /// duplicate here catches that logic error.
    pub fn append(&mut self, shard_session: ShardSession) -> Result<(), DuplicateShardSession> {
        if self
            .find(
                &shard_session.keyspace,
                &shard_session.shard,
                shard_session.tablet_type,
            )
            .is_some()
        {
            return Err(DuplicateShardSession {
                keyspace: shard_session.keyspace,
                shard: shard_session.shard,
                tablet_type: shard_session.tablet_type,
            });
        }
        self.shard_sessions.push(shard_session);
        Ok(())
    }

    /// Clears the transaction. Used after commit or rollback.
    pub fn reset(&mut self) {
        self.in_transaction = false;
        self.shard_sessions.clear();
    }
}

/// A backend was enrolled twice in one transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DuplicateShardSession {
    /// Keyspace of the doubly-enrolled backend.
    pub keyspace: String,
    /// Shard of the doubly-enrolled backend.
    pub shard: String,
    /// Tablet type of the doubly-enrolled backend.
    pub tablet_type: TabletType,
}

impl fmt::Display for DuplicateShardSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "shard session already exists for {}/{} ({})",
            self.keyspace, self.shard, self.tablet_type
        )
    }
}

impl std::error::Error for DuplicateShardSession {}

#[cfg(test)]
mod tests {
    use super::*;

    fn shard_session(shard: &str, txid: i64) -> ShardSession {
        ShardSession {
            keyspace: "user".to_string(),
            shard: shard.to_string(),
            tablet_type: TabletType::Master,
            transaction_id: txid,
        }
    }

    #[test]
    fn test_find_after_append() {
        let mut session = Session::in_transaction();
        session.append(shard_session("-80", 7)).unwrap();

        assert_eq!(session.find("user", "-80", TabletType::Master), Some(7));
        assert_eq!(session.find("user", "80-", TabletType::Master), None);
        assert_eq!(session.find("user", "-80", TabletType::Replica), None);
    }

    #[test]
    fn test_append_rejects_duplicate_triple() {
        let mut session = Session::in_transaction();
        session.append(shard_session("-80", 7)).unwrap();

        // Same triple with a different transaction id is a logic error.
        let err = session.append(shard_session("-80", 8)).unwrap_err();
        assert_eq!(err.shard, "-80");
        assert_eq!(session.shard_sessions.len(), 1);
        assert_eq!(session.find("user", "-80", TabletType::Master), Some(7));
    }

    #[test]
    fn test_distinct_tablet_types_coexist() {
        let mut session = Session::in_transaction();
        session.append(shard_session("-80", 7)).unwrap();

        let mut batch = shard_session("-80", 9);
        batch.tablet_type = TabletType::Batch;
        session.append(batch).unwrap();

        assert_eq!(session.shard_sessions.len(), 2);
    }

    #[test]
    fn test_reset_clears_transaction() {
        let mut session = Session::in_transaction();
        session.append(shard_session("-80", 7)).unwrap();
        session.append(shard_session("80-", 8)).unwrap();

        session.reset();

        // Not-in-transaction sessions carry no shard sessions.
        assert!(!session.in_transaction);
        assert!(session.shard_sessions.is_empty());
    }
}
