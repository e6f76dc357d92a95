use thiserror::Error;

use crate::common::types::{Rid, TxnId};
use crate::transaction::wal::LogManagerError;

/// Why a transaction was aborted by the concurrency layer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortReason {
    /// Lock requested after the shrinking phase began
    LockOnShrinking,
    /// Shared lock requested under READ_UNCOMMITTED
    SharedOnReadUncommitted,
    /// A second upgrade was requested on the same queue
    UpgradeConflict,
    /// Chosen as deadlock victim by the cycle detector
    Deadlock,
}

impl std::fmt::Display for AbortReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AbortReason::LockOnShrinking => "lock acquired while shrinking",
            AbortReason::SharedOnReadUncommitted => "shared lock under read-uncommitted",
            AbortReason::UpgradeConflict => "concurrent lock upgrade",
            AbortReason::Deadlock => "deadlock victim",
        };
        f.write_str(s)
    }
}

#[derive(Error, Debug)]
pub enum TransactionError {
    /// Structured abort signal; the caller must release resources and unwind
    #[error("Transaction {txn_id} aborted: {reason}")]
    Aborted { txn_id: TxnId, reason: AbortReason },

    #[error("Transaction {txn_id} does not hold a lock on {rid}")]
    LockNotHeld { txn_id: TxnId, rid: Rid },

    #[error("Transaction {0} is already committed or aborted")]
    InvalidState(TxnId),

    #[error("Transaction {0} not found")]
    NotFound(TxnId),

    #[error("WAL error: {0}")]
    Log(#[from] LogManagerError),
}

pub type Result<T> = std::result::Result<T, TransactionError>;
