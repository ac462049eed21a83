//! The closed set of backend error codes.
//!
//! Every failure a tablet can report maps into one of these codes. The
//! scatter layer collapses multi-shard failures by taking the most severe
//! code seen, so the set carries a total severity order.

use std::fmt;

/// Error code attached to every backend failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TabletErrorCode {
    /// No error.
    Ok,
    /// Transient failure; safe to retry outside a transaction.
    Retry,
    /// The tablet is not serving this shard right now.
    NotServing,
    /// The tablet's transaction pool is exhausted.
    TxPoolFull,
    /// The request's context was cancelled.
    Cancelled,
    /// Unrecoverable failure.
    Fatal,
}

impl TabletErrorCode {
    /// Severity rank used when collapsing multi-shard errors.
    ///
    /// `Retry` is the least severe real failure, so a max-severity fold
    /// yields `Retry` only when every shard failed with `Retry`.
    #[must_use]
    pub const fn severity(self) -> u8 {
        match self {
            Self::Ok => 0,
            Self::Retry => 1,
            Self::NotServing => 2,
            Self::TxPoolFull => 3,
            Self::Cancelled => 4,
            Self::Fatal => 5,
        }
    }

    /// Returns the more severe of two codes.
    #[must_use]
    pub fn most_severe(self, other: Self) -> Self {
        if other.severity() > self.severity() {
            other
        } else {
            self
        }
    }

    /// True if a failed connection carrying this code may be transparently
    /// redialed and retried.
    #[must_use]
    pub const fn is_retriable(self) -> bool {
        matches!(self, Self::Retry)
    }
}

impl fmt::Display for TabletErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Ok => "ok",
            Self::Retry => "retry",
            Self::NotServing => "not_serving",
            Self::TxPoolFull => "tx_pool_full",
            Self::Cancelled => "cancelled",
            Self::Fatal => "fatal",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_total_order() {
        let codes = [
            TabletErrorCode::Ok,
            TabletErrorCode::Retry,
            TabletErrorCode::NotServing,
            TabletErrorCode::TxPoolFull,
            TabletErrorCode::Cancelled,
            TabletErrorCode::Fatal,
        ];
        for pair in codes.windows(2) {
            assert!(pair[0].severity() < pair[1].severity());
        }
    }

    #[test]
    fn test_most_severe() {
        assert_eq!(
            TabletErrorCode::Retry.most_severe(TabletErrorCode::TxPoolFull),
            TabletErrorCode::TxPoolFull
        );
        assert_eq!(
            TabletErrorCode::Fatal.most_severe(TabletErrorCode::Retry),
            TabletErrorCode::Fatal
        );
        // A fold over all-retry stays retry.
        assert_eq!(
            TabletErrorCode::Retry.most_severe(TabletErrorCode::Retry),
            TabletErrorCode::Retry
        );
    }

    #[test]
    fn test_only_retry_is_retriable() {
        assert!(TabletErrorCode::Retry.is_retriable());
        assert!(!TabletErrorCode::Fatal.is_retriable());
        assert!(!TabletErrorCode::TxPoolFull.is_retriable());
        assert!(!TabletErrorCode::Cancelled.is_retriable());
    }
}
