//! Unified error type for leofile.
//!
//! Every fallible operation in the container engine reports through this
//! enum. Soft anomalies never surface here; they are recorded by
//! [`crate::leo::Diagnostics`] instead.
use thiserror::Error;

/// Main error type for leofile operations.
#[derive(Error, Debug)]
pub enum Error {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed container: bad magic, unreadable header, cyclic chain,
    /// header-declared locations outside the file, or a closed container.
    #[error("Invalid format: {0}")]
    InvalidFormat(String),

    /// Named storage is absent from the directory
    #[error("Storage not found: {0}")]
    StorageNotFound(String),

    /// Layout the engine refuses to interpret, such as record reads that
    /// fall outside a mini-sector backed stream.
    #[error("Unsupported layout: {0}")]
    UnsupportedLayout(String),

    /// The write pass computed a layout that does not add up
    #[error("Inconsistent layout: {0}")]
    InconsistentLayout(String),
}

/// Result type for leofile operations.
pub type Result<T> = std::result::Result<T, Error>;
