pub mod error;
pub mod directory;
pub mod bucket;
pub mod table;

pub use error::HashTableError;
pub use directory::{HashDirectory, DIRECTORY_ARRAY_SIZE, MAX_DEPTH};
pub use bucket::HashBucket;
pub use table::{ExtendibleHashTable, KeyHasher, DefaultKeyHasher};
