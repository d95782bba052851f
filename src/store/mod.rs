pub mod hashfile;

pub use hashfile::{HashFile, StoreOptions};

use thiserror::Error;

/// Disposition of a `put` against an existing key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Fail with `Exists` when the key is already present.
    Insert,
    /// Fail with `NotFound` when the key is absent.
    Modify,
    /// Store unconditionally.
    Replace,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("key not found")]
    NotFound,
    #[error("key already exists")]
    Exists,
    #[error("timed out waiting for the store lock")]
    LockTimeout,
    #[error("store is busy")]
    Busy,
    #[error("corrupt store file: {0}")]
    Corrupt(String),
    #[error("store is read-only")]
    ReadOnly,
    #[error("io error: {0}")]
    Io(String),
    #[error("invalid store operation: {0}")]
    Invalid(String),
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        StoreError::Io(err.to_string())
    }
}
