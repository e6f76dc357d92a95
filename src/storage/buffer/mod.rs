pub mod error;
pub mod manager;
pub mod parallel;
pub mod replacer;

pub use error::BufferPoolError;
pub use manager::{BufferPoolManager, BufferPoolConfig};
pub use parallel::ParallelBufferPoolManager;
pub use replacer::{Replacer, ReplacerPolicy, LruReplacer, ClockReplacer};
