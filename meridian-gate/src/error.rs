//! Gate error types.
//!
//! Per-shard failures carry a [`TabletErrorCode`]; the scatter layer
//! collapses them into one [`ScatterError`] whose code is the most severe
//! seen. Because `Retry` ranks lowest, a collapsed error is retryable
//! only when every shard failed with `Retry` - a mixed batch must not be
//! re-issued, since its non-retryable sub-operations already took effect.

use std::fmt;

use meridian_core::{DuplicateShardSession, TabletErrorCode, TabletType};
use meridian_topo::TopoError;
use thiserror::Error;

/// Result type for gate operations.
pub type GateResult<T> = Result<T, GateError>;

/// Result type for tablet RPCs.
pub type TabletResult<T> = Result<T, TabletError>;

/// A failure reported by one tablet RPC.
#[derive(Debug, Clone, Error)]
#[error("{code}: {message}")]
pub struct TabletError {
    /// The failure's code.
    pub code: TabletErrorCode,
    /// Human-readable detail.
    pub message: String,
}

impl TabletError {
    /// Creates a tablet error.
    pub fn new(code: TabletErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Creates a transient failure.
    pub fn retry(message: impl Into<String>) -> Self {
        Self::new(TabletErrorCode::Retry, message)
    }

    /// Creates an unrecoverable failure.
    pub fn fatal(message: impl Into<String>) -> Self {
        Self::new(TabletErrorCode::Fatal, message)
    }

    /// Creates a cancellation failure.
    #[must_use]
    pub fn cancelled() -> Self {
        Self::new(TabletErrorCode::Cancelled, "request cancelled")
    }
}

/// A tablet failure attributed to the shard it came from.
#[derive(Debug, Clone, Error)]
#[error("{keyspace}/{shard} ({tablet_type}): {error}")]
pub struct ShardError {
    /// Keyspace of the failing shard.
    pub keyspace: String,
    /// The failing shard.
    pub shard: String,
    /// Tablet type the call targeted.
    pub tablet_type: TabletType,
    /// The underlying tablet failure.
    pub error: TabletError,
}

/// One or more per-shard failures collapsed into a single error.
#[derive(Debug, Clone)]
pub struct ScatterError {
    /// Most severe code among the shard errors.
    pub code: TabletErrorCode,
    /// The individual failures, in shard-iteration order.
    pub shard_errors: Vec<ShardError>,
}

impl ScatterError {
    /// Collapses per-shard failures, taking the most severe code.
    #[must_use]
    pub fn aggregate(shard_errors: Vec<ShardError>) -> Self {
        let code = shard_errors
            .iter()
            .fold(TabletErrorCode::Ok, |acc, e| acc.most_severe(e.error.code));
        Self { code, shard_errors }
    }
}

impl fmt::Display for ScatterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} on {} shard(s):", self.code, self.shard_errors.len())?;
        for err in &self.shard_errors {
            write!(f, " [{err}]")?;
        }
        Ok(())
    }
}

impl std::error::Error for ScatterError {}

/// Errors returned by the gate's public operations.
#[derive(Debug, Error)]
pub enum GateError {
    /// Routing-key resolution failed; surfaced verbatim, never retried.
    #[error(transparent)]
    Topo(#[from] TopoError),

    /// One or more shards failed during dispatch.
    #[error(transparent)]
    Scatter(#[from] ScatterError),

    /// The scatter layer tried to enroll a backend twice.
    #[error(transparent)]
    Session(#[from] DuplicateShardSession),

    /// A streaming query resolved to more than one shard.
    #[error("resolved to more than one shard: {0}")]
    StreamOnMultipleShards(usize),

    /// Shards disagreed on result schema.
    #[error("field schema mismatch on shard {shard}")]
    FieldsMismatch {
        /// The disagreeing shard.
        shard: String,
    },

    /// A shard returned the wrong number of batch results.
    #[error("shard {shard} returned {got} batch results, expected {expected}")]
    BatchShapeMismatch {
        /// The misbehaving shard.
        shard: String,
        /// Number of queries sent.
        expected: usize,
        /// Number of results received.
        got: usize,
    },

    /// Commit was requested outside a transaction.
    #[error("cannot commit: not in transaction")]
    NotInTransaction,

    /// The caller's stream sink was dropped mid-stream.
    #[error("stream consumer went away")]
    StreamSinkClosed,
}

impl GateError {
    /// True if this is a collapsed all-shards-retryable failure, the only
    /// kind the re-resolve loop acts on.
    #[must_use]
    pub fn is_retry(&self) -> bool {
        matches!(self, Self::Scatter(e) if e.code == TabletErrorCode::Retry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shard_error(shard: &str, code: TabletErrorCode) -> ShardError {
        ShardError {
            keyspace: "user".to_string(),
            shard: shard.to_string(),
            tablet_type: TabletType::Master,
            error: TabletError::new(code, "boom"),
        }
    }

    #[test]
    fn test_aggregate_all_retry_stays_retry() {
        let err = ScatterError::aggregate(vec![
            shard_error("-80", TabletErrorCode::Retry),
            shard_error("80-", TabletErrorCode::Retry),
        ]);
        assert_eq!(err.code, TabletErrorCode::Retry);
        assert!(GateError::from(err).is_retry());
    }

    #[test]
    fn test_aggregate_mixed_is_not_retryable() {
        let err = ScatterError::aggregate(vec![
            shard_error("-80", TabletErrorCode::Retry),
            shard_error("80-", TabletErrorCode::TxPoolFull),
        ]);
        assert_eq!(err.code, TabletErrorCode::TxPoolFull);
        assert!(!GateError::from(err).is_retry());
    }

    #[test]
    fn test_aggregate_takes_most_severe() {
        let err = ScatterError::aggregate(vec![
            shard_error("-80", TabletErrorCode::TxPoolFull),
            shard_error("40-80", TabletErrorCode::Fatal),
            shard_error("80-", TabletErrorCode::Retry),
        ]);
        assert_eq!(err.code, TabletErrorCode::Fatal);
        assert_eq!(err.shard_errors.len(), 3);
    }

    #[test]
    fn test_display_lists_shards() {
        let err = ScatterError::aggregate(vec![shard_error("-80", TabletErrorCode::Retry)]);
        let text = err.to_string();
        assert!(text.contains("retry"));
        assert!(text.contains("user/-80"));
    }
}
