use std::sync::Arc;
use anyhow::Result;
use tempfile::NamedTempFile;

use quarzdb::storage::buffer::{BufferPoolConfig, BufferPoolManager, ReplacerPolicy};
use quarzdb::transaction::wal::LogManager;
use quarzdb::transaction::{LockManager, LockManagerConfig, TransactionManager};

// Create a temporary database file for testing
#[allow(dead_code)]
pub fn create_temp_db_file() -> Result<(NamedTempFile, String)> {
    let file = NamedTempFile::new()?;
    let path = file.path().to_str().unwrap().to_string();
    Ok((file, path))
}

// Create a buffer pool manager with a temporary database
#[allow(dead_code)]
pub fn create_test_buffer_pool(pool_size: usize) -> Result<(Arc<BufferPoolManager>, NamedTempFile)> {
    let (file, path) = create_temp_db_file()?;
    let buffer_pool = Arc::new(BufferPoolManager::new(pool_size, path)?);
    Ok((buffer_pool, file))
}

// Buffer pool using the clock replacement policy
#[allow(dead_code)]
pub fn create_clock_buffer_pool(
    pool_size: usize,
) -> Result<(Arc<BufferPoolManager>, NamedTempFile)> {
    let (file, path) = create_temp_db_file()?;
    let config = BufferPoolConfig {
        pool_size,
        replacer: ReplacerPolicy::Clock,
    };
    let buffer_pool = Arc::new(BufferPoolManager::with_config(config, path)?);
    Ok((buffer_pool, file))
}

// Lock manager plus transaction manager over a throwaway WAL. The detector
// interval is short so deadlock tests finish quickly.
#[allow(dead_code)]
pub fn create_test_txn_managers() -> Result<(Arc<LockManager>, Arc<TransactionManager>, NamedTempFile)> {
    let (file, path) = create_temp_db_file()?;
    let disk = Arc::new(quarzdb::storage::disk::DiskManager::new(path)?);
    let log_manager = Arc::new(LogManager::new(disk));

    let lock_manager = LockManager::with_config(LockManagerConfig {
        detection_interval: std::time::Duration::from_millis(20),
        enable_cycle_detection: true,
    });
    let txn_manager = Arc::new(TransactionManager::new(lock_manager.clone(), log_manager));
    Ok((lock_manager, txn_manager, file))
}
