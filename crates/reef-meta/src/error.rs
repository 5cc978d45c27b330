//! Errors of the admin metadata store.

/// Why a [`MetaStore`](crate::MetaStore) read or write failed.
#[derive(Debug, thiserror::Error)]
pub enum MetaError {
    /// The storage engine refused the operation.
    #[error("metadata store: {0}")]
    Fjall(#[from] fjall::Error),

    /// Opening the store directory failed.
    #[error("metadata store directory: {0}")]
    Io(#[from] std::io::Error),

    /// A record could not be encoded or decoded.
    #[error("metadata record encoding: {0}")]
    Encoding(#[from] postcard::Error),

    /// A stored key or value has an unexpected shape.
    #[error("corrupt record in {keyspace}: {detail}")]
    Corrupt {
        /// Keyspace holding the record.
        keyspace: &'static str,
        /// What was wrong.
        detail: String,
    },
}
