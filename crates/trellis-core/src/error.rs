//! Error types for Trellis Core

use thiserror::Error;

/// Result type alias using the Trellis error
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types for the record storage kernel
#[derive(Error, Debug)]
pub enum Error {
    /// I/O errors from store files or the command log
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A record was missing, not in use, or structurally inconsistent
    /// (chain neighbour does not reference the node, id wider than its field, ...)
    #[error("Invalid record: {0}")]
    InvalidRecord(String),

    /// Operation invoked in the wrong transaction state, or a mutation
    /// attempted through a read-only transaction
    #[error("Illegal state: {0}")]
    IllegalState(String),

    /// Commit attempted with a transaction id that does not directly follow
    /// the last committed one
    #[error("Ordering violation: expected tx {expected}, got tx {actual}")]
    OrderingViolation {
        /// The transaction id the store expected next
        expected: u64,
        /// The transaction id that was offered
        actual: u64,
    },

    /// Lock acquisition timed out
    #[error("Lock timeout: {0}")]
    LockTimeout(String),

    /// Storage-related errors (mapping, id files, metadata)
    #[error("Storage error: {0}")]
    Storage(String),

    /// Command log framing or serialization errors
    #[error("Command log error: {0}")]
    Log(String),

    /// A property value that cannot be encoded or decoded
    #[error("Property error: {0}")]
    Property(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Create an invalid record error
    pub fn invalid_record(msg: impl Into<String>) -> Self {
        Self::InvalidRecord(msg.into())
    }

    /// Create an illegal state error
    pub fn illegal_state(msg: impl Into<String>) -> Self {
        Self::IllegalState(msg.into())
    }

    /// Create a storage error
    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    /// Create a command log error
    pub fn log(msg: impl Into<String>) -> Self {
        Self::Log(msg.into())
    }

    /// Create a property error
    pub fn property(msg: impl Into<String>) -> Self {
        Self::Property(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Errors after which the store may hold a partially applied transaction
    /// and must go through recovery before further use.
    pub fn requires_recovery(&self) -> bool {
        matches!(self, Error::Io(_) | Error::Storage(_))
    }
}

impl From<bincode::Error> for Error {
    fn from(err: bincode::Error) -> Self {
        Error::Log(format!("serialization failed: {}", err))
    }
}
