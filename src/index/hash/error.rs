use thiserror::Error;

use crate::storage::buffer::BufferPoolError;

#[derive(Error, Debug)]
pub enum HashTableError {
    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Invalid page format")]
    InvalidPageFormat,

    #[error("Index name too long: {0}")]
    IndexNameTooLong(String),

    #[error("Buffer pool error: {0}")]
    BufferPoolError(#[from] BufferPoolError),
}
