use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use parking_lot::Mutex;

use crate::common::types::TxnId;
use crate::transaction::error::{Result, TransactionError};
use crate::transaction::lock_manager::LockManager;
use crate::transaction::transaction::{IsolationLevel, Transaction, TransactionState};
use crate::transaction::wal::{LogManager, LogRecord};

/// Creates transactions and drives them to their terminal state. Strict 2PL:
/// every lock a transaction holds is released here, after the terminal state
/// is decided, never earlier.
pub struct TransactionManager {
    next_txn_id: AtomicU32,
    lock_manager: Arc<LockManager>,
    log_manager: Arc<LogManager>,
    active: Mutex<HashMap<TxnId, Arc<Transaction>>>,
}

impl TransactionManager {
    pub fn new(lock_manager: Arc<LockManager>, log_manager: Arc<LogManager>) -> Self {
        Self {
            next_txn_id: AtomicU32::new(1),
            lock_manager,
            log_manager,
            active: Mutex::new(HashMap::new()),
        }
    }

    /// Start a transaction and write its BEGIN record
    pub fn begin(&self, isolation_level: IsolationLevel) -> Result<Arc<Transaction>> {
        let txn_id = self.next_txn_id.fetch_add(1, Ordering::SeqCst);
        let txn = Arc::new(Transaction::new(txn_id, isolation_level));

        let mut record = LogRecord::new_begin(txn_id);
        let lsn = self.log_manager.append(&mut record)?;
        txn.set_prev_lsn(lsn);

        self.active.lock().insert(txn_id, txn.clone());
        Ok(txn)
    }

    /// Commit: COMMIT record forced to disk, then locks released
    pub fn commit(&self, txn: &Arc<Transaction>) -> Result<()> {
        match txn.state() {
            TransactionState::Committed | TransactionState::Aborted => {
                return Err(TransactionError::InvalidState(txn.id()));
            }
            _ => {}
        }

        let mut record = LogRecord::new_commit(txn.id(), txn.prev_lsn());
        let lsn = self.log_manager.append(&mut record)?;
        txn.set_prev_lsn(lsn);
        self.log_manager.flush()?;

        txn.set_state(TransactionState::Committed);
        self.release_all_locks(txn);
        self.active.lock().remove(&txn.id());
        Ok(())
    }

    /// Abort: ABORT record written, locks released, waiters notified.
    /// Undo of the transaction's data pages happens in the recovery layer.
    pub fn abort(&self, txn: &Arc<Transaction>) -> Result<()> {
        if txn.state() == TransactionState::Committed {
            return Err(TransactionError::InvalidState(txn.id()));
        }

        let mut record = LogRecord::new_abort(txn.id(), txn.prev_lsn());
        let lsn = self.log_manager.append(&mut record)?;
        txn.set_prev_lsn(lsn);

        txn.set_state(TransactionState::Aborted);
        self.release_all_locks(txn);
        self.active.lock().remove(&txn.id());
        Ok(())
    }

    pub fn get_transaction(&self, txn_id: TxnId) -> Option<Arc<Transaction>> {
        self.active.lock().get(&txn_id).cloned()
    }

    pub fn active_transaction_ids(&self) -> Vec<TxnId> {
        let mut ids: Vec<TxnId> = self.active.lock().keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    fn release_all_locks(&self, txn: &Arc<Transaction>) {
        let (shared, exclusive) = txn.held_locks();
        for rid in shared.into_iter().chain(exclusive) {
            // A rid missing from the table means the lock was already torn
            // down with its queue; nothing left to release
            let _ = self.lock_manager.unlock(txn, rid);
        }
    }
}
