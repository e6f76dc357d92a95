use std::sync::Arc;
use parking_lot::Mutex;
use thiserror::Error;

use crate::common::types::{Lsn, INVALID_LSN};
use crate::storage::disk::{DiskManager, DiskManagerError};
use crate::transaction::wal::log_record::LogRecord;

#[derive(Error, Debug)]
pub enum LogManagerError {
    #[error("Disk manager error: {0}")]
    DiskError(#[from] DiskManagerError),
}

/// Log manager tuning knobs
#[derive(Debug, Clone)]
pub struct LogManagerConfig {
    /// In-memory buffer size; filling it triggers a flush
    pub buffer_capacity: usize,
}

impl Default for LogManagerConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: 16 * 1024,
        }
    }
}

struct LogState {
    buffer: Vec<u8>,
    next_lsn: Lsn,
    /// Highest LSN serialized into the buffer
    buffered_lsn: Lsn,
    /// Highest LSN guaranteed on disk
    persistent_lsn: Lsn,
}

/// Append-only WAL front end. Records gather in an in-memory buffer and
/// reach the disk manager's log file when the buffer fills or a caller
/// forces a flush (commit does).
pub struct LogManager {
    config: LogManagerConfig,
    disk_manager: Arc<DiskManager>,
    state: Mutex<LogState>,
}

impl LogManager {
    pub fn new(disk_manager: Arc<DiskManager>) -> Self {
        Self::with_config(LogManagerConfig::default(), disk_manager)
    }

    pub fn with_config(config: LogManagerConfig, disk_manager: Arc<DiskManager>) -> Self {
        Self {
            config,
            disk_manager,
            state: Mutex::new(LogState {
                buffer: Vec::new(),
                next_lsn: 0,
                buffered_lsn: INVALID_LSN,
                persistent_lsn: INVALID_LSN,
            }),
        }
    }

    /// Assign the next LSN to `record` and buffer its serialized form.
    /// Returns the assigned LSN.
    pub fn append(&self, record: &mut LogRecord) -> Result<Lsn, LogManagerError> {
        let mut state = self.state.lock();

        record.lsn = state.next_lsn;
        state.next_lsn += 1;
        let lsn = record.lsn;

        if state.buffer.len() + record.size() > self.config.buffer_capacity {
            self.flush_locked(&mut state)?;
        }
        let mut buffer = std::mem::take(&mut state.buffer);
        record.serialize(&mut buffer);
        state.buffer = buffer;
        state.buffered_lsn = lsn;

        Ok(lsn)
    }

    /// Force everything buffered onto disk (group commit degenerates to this)
    pub fn flush(&self) -> Result<(), LogManagerError> {
        let mut state = self.state.lock();
        self.flush_locked(&mut state)
    }

    /// Highest LSN known durable
    pub fn persistent_lsn(&self) -> Lsn {
        self.state.lock().persistent_lsn
    }

    pub fn next_lsn(&self) -> Lsn {
        self.state.lock().next_lsn
    }

    fn flush_locked(&self, state: &mut LogState) -> Result<(), LogManagerError> {
        if state.buffer.is_empty() {
            return Ok(());
        }
        self.disk_manager.write_log(&state.buffer)?;
        state.buffer.clear();
        state.persistent_lsn = state.buffered_lsn;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::wal::log_record::{LogRecord, LogRecordType};
    use tempfile::NamedTempFile;

    fn test_log_manager() -> (LogManager, NamedTempFile) {
        let file = NamedTempFile::new().unwrap();
        let disk = Arc::new(DiskManager::new(file.path()).unwrap());
        (LogManager::new(disk), file)
    }

    #[test]
    fn test_lsn_assignment_is_monotone() {
        let (log_manager, _file) = test_log_manager();

        let mut begin = LogRecord::new_begin(1);
        let mut commit = LogRecord::new_commit(1, 0);

        assert_eq!(log_manager.append(&mut begin).unwrap(), 0);
        assert_eq!(log_manager.append(&mut commit).unwrap(), 1);
        assert_eq!(log_manager.next_lsn(), 2);
    }

    #[test]
    fn test_flush_round_trips_records() {
        let (log_manager, _file) = test_log_manager();
        let disk = log_manager.disk_manager.clone();

        let mut begin = LogRecord::new_begin(3);
        let begin_lsn = log_manager.append(&mut begin).unwrap();
        let mut commit = LogRecord::new_commit(3, begin_lsn);
        log_manager.append(&mut commit).unwrap();

        assert_eq!(log_manager.persistent_lsn(), INVALID_LSN);
        log_manager.flush().unwrap();
        assert_eq!(log_manager.persistent_lsn(), 1);

        let mut buf = vec![0u8; 64];
        let read = disk.read_log(&mut buf, 0).unwrap();
        assert_eq!(read, 40);

        let (first, consumed) = LogRecord::deserialize(&buf[..read]).unwrap();
        assert_eq!(first.record_type, LogRecordType::Begin);
        assert_eq!(first.lsn, 0);
        assert_eq!(first.txn_id, 3);

        let (second, _) = LogRecord::deserialize(&buf[consumed..read]).unwrap();
        assert_eq!(second.record_type, LogRecordType::Commit);
        assert_eq!(second.prev_lsn, 0);
    }

    #[test]
    fn test_buffer_full_triggers_flush() {
        let file = NamedTempFile::new().unwrap();
        let disk = Arc::new(DiskManager::new(file.path()).unwrap());
        let log_manager = LogManager::with_config(
            LogManagerConfig {
                buffer_capacity: 64,
            },
            disk,
        );

        // Four 20-byte records overflow a 64-byte buffer
        for _ in 0..4 {
            let mut record = LogRecord::new_begin(9);
            log_manager.append(&mut record).unwrap();
        }
        assert!(log_manager.persistent_lsn() >= 2);
    }
}
