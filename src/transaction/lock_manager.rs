use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;
use log::debug;
use parking_lot::{Condvar, Mutex};

use crate::common::types::{Rid, TxnId};
use crate::transaction::error::{AbortReason, TransactionError};
use crate::transaction::transaction::{IsolationLevel, Transaction, TransactionState};

/// Lock manager tuning knobs
#[derive(Debug, Clone)]
pub struct LockManagerConfig {
    /// Sleep between deadlock-detector ticks
    pub detection_interval: Duration,
    /// Run the background detector at all
    pub enable_cycle_detection: bool,
}

impl Default for LockManagerConfig {
    fn default() -> Self {
        Self {
            detection_interval: Duration::from_millis(50),
            enable_cycle_detection: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    Shared,
    Exclusive,
}

struct LockRequest {
    txn: Arc<Transaction>,
    mode: LockMode,
    granted: bool,
}

/// FIFO queue of requests for one rid, plus grant-state summaries.
/// Compatibility is tracked with counters rather than queue rescans:
/// `writing` while an exclusive holder exists, `shared_count` holders in
/// shared mode, `upgrading` while one shared holder waits to become
/// exclusive.
struct LockRequestQueue {
    queue: VecDeque<LockRequest>,
    shared_count: usize,
    writing: bool,
    upgrading: bool,
    cv: Arc<Condvar>,
}

impl LockRequestQueue {
    fn new() -> Self {
        Self {
            queue: VecDeque::new(),
            shared_count: 0,
            writing: false,
            upgrading: false,
            cv: Arc::new(Condvar::new()),
        }
    }

    fn position_of(&self, txn_id: TxnId) -> Option<usize> {
        self.queue.iter().position(|r| r.txn.id() == txn_id)
    }
}

type LockTable = HashMap<Rid, LockRequestQueue>;

/// Row-level S/X lock manager enforcing strict two-phase locking with
/// background deadlock detection. One latch serializes the lock table;
/// per-rid condition variables deliver grants.
pub struct LockManager {
    latch: Arc<Mutex<LockTable>>,
    enable_cycle_detection: Arc<AtomicBool>,
    detector: Mutex<Option<JoinHandle<()>>>,
}

impl LockManager {
    pub fn new() -> Arc<Self> {
        Self::with_config(LockManagerConfig::default())
    }

    pub fn with_config(config: LockManagerConfig) -> Arc<Self> {
        let latch = Arc::new(Mutex::new(LockTable::new()));
        let enable = Arc::new(AtomicBool::new(config.enable_cycle_detection));

        let manager = Arc::new(Self {
            latch: latch.clone(),
            enable_cycle_detection: enable.clone(),
            detector: Mutex::new(None),
        });

        if config.enable_cycle_detection {
            let interval = config.detection_interval;
            let handle = std::thread::Builder::new()
                .name("deadlock-detector".into())
                .spawn(move || {
                    while enable.load(Ordering::SeqCst) {
                        std::thread::sleep(interval);
                        if !enable.load(Ordering::SeqCst) {
                            break;
                        }
                        let mut table = latch.lock();
                        Self::run_detection(&mut table);
                    }
                })
                .expect("failed to spawn deadlock detector");
            *manager.detector.lock() = Some(handle);
        }

        manager
    }

    /// Acquire a shared lock on `rid`, blocking until compatible or aborted
    pub fn lock_shared(&self, txn: &Arc<Transaction>, rid: Rid) -> Result<(), TransactionError> {
        if txn.isolation_level() == IsolationLevel::ReadUncommitted {
            txn.set_state(TransactionState::Aborted);
            return Err(TransactionError::Aborted {
                txn_id: txn.id(),
                reason: AbortReason::SharedOnReadUncommitted,
            });
        }
        self.check_growing(txn)?;

        if txn.is_shared_locked(&rid) || txn.is_exclusive_locked(&rid) {
            return Ok(());
        }

        let mut table = self.latch.lock();
        table.entry(rid).or_insert_with(LockRequestQueue::new).queue.push_back(LockRequest {
            txn: txn.clone(),
            mode: LockMode::Shared,
            granted: false,
        });

        loop {
            let queue = table.get_mut(&rid).expect("lock queue vanished");
            if txn.state() == TransactionState::Aborted || !(queue.writing || queue.upgrading) {
                break;
            }
            let cv = queue.cv.clone();
            cv.wait(&mut table);
        }

        let queue = table.get_mut(&rid).expect("lock queue vanished");
        self.check_not_aborted(txn, queue)?;

        let pos = queue.position_of(txn.id()).expect("own lock request vanished");
        queue.queue[pos].granted = true;
        queue.shared_count += 1;
        txn.add_shared_lock(rid);

        Ok(())
    }

    /// Acquire an exclusive lock on `rid`
    pub fn lock_exclusive(&self, txn: &Arc<Transaction>, rid: Rid) -> Result<(), TransactionError> {
        self.check_growing(txn)?;

        if txn.is_exclusive_locked(&rid) {
            return Ok(());
        }

        let mut table = self.latch.lock();
        table.entry(rid).or_insert_with(LockRequestQueue::new).queue.push_back(LockRequest {
            txn: txn.clone(),
            mode: LockMode::Exclusive,
            granted: false,
        });

        loop {
            let queue = table.get_mut(&rid).expect("lock queue vanished");
            if txn.state() == TransactionState::Aborted
                || !(queue.writing || queue.shared_count > 0)
            {
                break;
            }
            let cv = queue.cv.clone();
            cv.wait(&mut table);
        }

        let queue = table.get_mut(&rid).expect("lock queue vanished");
        self.check_not_aborted(txn, queue)?;

        let pos = queue.position_of(txn.id()).expect("own lock request vanished");
        queue.queue[pos].granted = true;
        queue.writing = true;
        txn.add_exclusive_lock(rid);

        Ok(())
    }

    /// Upgrade an already-held shared lock to exclusive. At most one upgrade
    /// may be pending per queue.
    pub fn lock_upgrade(&self, txn: &Arc<Transaction>, rid: Rid) -> Result<(), TransactionError> {
        self.check_growing(txn)?;

        if !txn.is_shared_locked(&rid) {
            return Err(TransactionError::LockNotHeld {
                txn_id: txn.id(),
                rid,
            });
        }

        let mut table = self.latch.lock();
        {
            let queue = table.get_mut(&rid).expect("lock queue vanished");
            if queue.upgrading {
                txn.set_state(TransactionState::Aborted);
                return Err(TransactionError::Aborted {
                    txn_id: txn.id(),
                    reason: AbortReason::UpgradeConflict,
                });
            }
            queue.upgrading = true;
        }

        loop {
            let queue = table.get_mut(&rid).expect("lock queue vanished");
            if txn.state() == TransactionState::Aborted
                || !(queue.shared_count > 1 || queue.writing)
            {
                break;
            }
            let cv = queue.cv.clone();
            cv.wait(&mut table);
        }

        let queue = table.get_mut(&rid).expect("lock queue vanished");
        if txn.state() == TransactionState::Aborted {
            queue.upgrading = false;
            if let Some(pos) = queue.position_of(txn.id()) {
                queue.queue.remove(pos);
            }
            return Err(TransactionError::Aborted {
                txn_id: txn.id(),
                reason: AbortReason::Deadlock,
            });
        }

        let pos = queue.position_of(txn.id()).expect("own lock request vanished");
        queue.queue[pos].mode = LockMode::Exclusive;
        queue.queue[pos].granted = true;
        queue.upgrading = false;
        queue.writing = true;
        queue.shared_count -= 1;

        txn.remove_shared_lock(&rid);
        txn.add_exclusive_lock(rid);

        Ok(())
    }

    /// Release a held lock. The first unlock of a GROWING transaction moves
    /// it to SHRINKING, except shared unlocks under READ_COMMITTED.
    pub fn unlock(&self, txn: &Arc<Transaction>, rid: Rid) -> Result<(), TransactionError> {
        let mut table = self.latch.lock();

        if !txn.is_shared_locked(&rid) && !txn.is_exclusive_locked(&rid) {
            return Err(TransactionError::LockNotHeld {
                txn_id: txn.id(),
                rid,
            });
        }

        let queue = table.get_mut(&rid).expect("lock queue vanished");
        let pos = queue.position_of(txn.id()).expect("own lock request vanished");
        let mode = queue.queue[pos].mode;
        queue.queue.remove(pos);

        let shared_under_read_committed =
            mode == LockMode::Shared && txn.isolation_level() == IsolationLevel::ReadCommitted;
        if !shared_under_read_committed && txn.state() == TransactionState::Growing {
            txn.set_state(TransactionState::Shrinking);
        }

        match mode {
            LockMode::Shared => {
                txn.remove_shared_lock(&rid);
                queue.shared_count -= 1;
                if queue.shared_count == 0 {
                    queue.cv.notify_all();
                }
            }
            LockMode::Exclusive => {
                txn.remove_exclusive_lock(&rid);
                queue.writing = false;
                queue.cv.notify_all();
            }
        }

        Ok(())
    }

    /// Lock acquisition is only legal while growing
    fn check_growing(&self, txn: &Arc<Transaction>) -> Result<(), TransactionError> {
        match txn.state() {
            TransactionState::Growing => Ok(()),
            TransactionState::Shrinking => {
                txn.set_state(TransactionState::Aborted);
                Err(TransactionError::Aborted {
                    txn_id: txn.id(),
                    reason: AbortReason::LockOnShrinking,
                })
            }
            TransactionState::Aborted => Err(TransactionError::Aborted {
                txn_id: txn.id(),
                reason: AbortReason::Deadlock,
            }),
            TransactionState::Committed => Err(TransactionError::InvalidState(txn.id())),
        }
    }

    /// A waiter that wakes up aborted was chosen as deadlock victim: drop
    /// its request and surface the abort
    fn check_not_aborted(
        &self,
        txn: &Arc<Transaction>,
        queue: &mut LockRequestQueue,
    ) -> Result<(), TransactionError> {
        if txn.state() == TransactionState::Aborted {
            if let Some(pos) = queue.position_of(txn.id()) {
                queue.queue.remove(pos);
            }
            return Err(TransactionError::Aborted {
                txn_id: txn.id(),
                reason: AbortReason::Deadlock,
            });
        }
        Ok(())
    }

    /// One detector tick: rebuild the wait-for graph from the lock table and
    /// abort the youngest member of each cycle until none remain.
    fn run_detection(table: &mut LockTable) {
        // waiting request -> every granted request on the same rid
        let mut waits_for: BTreeMap<TxnId, Vec<TxnId>> = BTreeMap::new();
        let mut handles: HashMap<TxnId, Arc<Transaction>> = HashMap::new();
        let mut waiting_on: HashMap<TxnId, Rid> = HashMap::new();

        for (rid, queue) in table.iter() {
            for waiter in queue.queue.iter().filter(|r| !r.granted) {
                if waiter.txn.state() == TransactionState::Aborted {
                    continue;
                }
                waiting_on.insert(waiter.txn.id(), *rid);
                handles.insert(waiter.txn.id(), waiter.txn.clone());
                for holder in queue.queue.iter().filter(|r| r.granted) {
                    if holder.txn.state() == TransactionState::Aborted {
                        continue;
                    }
                    waits_for
                        .entry(waiter.txn.id())
                        .or_default()
                        .push(holder.txn.id());
                }
            }
        }
        for edges in waits_for.values_mut() {
            edges.sort_unstable();
            edges.dedup();
        }

        while let Some(victim_id) = Self::find_cycle_victim(&waits_for) {
            debug!("deadlock detected, aborting txn {}", victim_id);
            if let Some(txn) = handles.get(&victim_id) {
                txn.set_state(TransactionState::Aborted);
            }

            waits_for.remove(&victim_id);
            for edges in waits_for.values_mut() {
                edges.retain(|&t| t != victim_id);
            }

            // Wake the victim so it observes its aborted state
            if let Some(rid) = waiting_on.get(&victim_id) {
                if let Some(queue) = table.get(rid) {
                    queue.cv.notify_all();
                }
            }
        }
    }

    /// DFS in ascending txn-id order; the first back-edge closes a cycle and
    /// its youngest (largest id) member is the victim
    fn find_cycle_victim(waits_for: &BTreeMap<TxnId, Vec<TxnId>>) -> Option<TxnId> {
        fn dfs(
            node: TxnId,
            waits_for: &BTreeMap<TxnId, Vec<TxnId>>,
            path: &mut Vec<TxnId>,
        ) -> Option<TxnId> {
            if let Some(at) = path.iter().position(|&t| t == node) {
                return path[at..].iter().copied().max();
            }
            let edges = waits_for.get(&node)?;
            path.push(node);
            for &next in edges {
                if let Some(victim) = dfs(next, waits_for, path) {
                    return Some(victim);
                }
            }
            path.pop();
            None
        }

        let mut path = Vec::new();
        for &start in waits_for.keys() {
            if let Some(victim) = dfs(start, waits_for, &mut path) {
                return Some(victim);
            }
            path.clear();
        }
        None
    }

    /// Current wait-for edges, for inspection in tests
    pub fn wait_for_edges(&self) -> Vec<(TxnId, TxnId)> {
        let table = self.latch.lock();
        let mut edges = Vec::new();
        for queue in table.values() {
            for waiter in queue.queue.iter().filter(|r| !r.granted) {
                for holder in queue.queue.iter().filter(|r| r.granted) {
                    edges.push((waiter.txn.id(), holder.txn.id()));
                }
            }
        }
        edges.sort_unstable();
        edges
    }
}

impl Drop for LockManager {
    fn drop(&mut self) {
        self.enable_cycle_detection.store(false, Ordering::SeqCst);
        if let Some(handle) = self.detector.lock().take() {
            let _ = handle.join();
        }
    }
}
