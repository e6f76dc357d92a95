// Export public modules
pub mod common;
pub mod storage;
pub mod index;
pub mod transaction;

// Re-export key items for convenient access
pub use storage::buffer::{BufferPoolManager, ParallelBufferPoolManager, BufferPoolError};
pub use storage::disk::DiskManager;
pub use index::btree::BPlusTree;
pub use index::hash::ExtendibleHashTable;
pub use transaction::{LockManager, TransactionManager, Transaction, IsolationLevel};
