//! Error types shared by every varstore crate.
//!
//! Each variant corresponds to one of the engine's stable error kinds and
//! carries a negative `i32` code ([`StoreError::code`]) matching the
//! original C API's return convention. All fallible internal paths
//! propagate these with `?`; nothing is retried silently.

use std::io;

/// Convenience alias used across the workspace.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Engine error kinds.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// OS-level file error (open/read/write/truncate/fsync).
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// The database or WAL file is structurally inconsistent, or the
    /// handle was poisoned by a failed checkpoint.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// The caller supplied an argument the engine cannot honour
    /// (stride of zero, out-of-range offset, bad page size, ...).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// `new_var` with a name that is already in the directory.
    #[error("variable already exists: {name}")]
    AlreadyExists {
        /// The offending variable name.
        name: String,
    },

    /// Lookup or delete of a name that is not in the directory.
    #[error("no such variable: {name}")]
    DoesntExist {
        /// The requested variable name.
        name: String,
    },

    /// Arithmetic overflow while computing byte offsets.
    #[error("offset arithmetic overflowed: {0}")]
    Overflow(String),

    /// Allocation failure.
    #[error("out of memory")]
    NoMem,

    /// A second `begin_txn` while a transaction is already open.
    #[error("a transaction is already open")]
    Busy,
}

impl StoreError {
    /// Shorthand for an [`StoreError::InvalidState`] with a formatted message.
    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self::InvalidState(msg.into())
    }

    /// Shorthand for an [`StoreError::InvalidArgument`] with a formatted message.
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// Stable negative code for this error kind.
    ///
    /// These values mirror the original engine's C return codes and must
    /// not be renumbered.
    #[must_use]
    pub const fn code(&self) -> i32 {
        match self {
            Self::Io(_) => -1,
            Self::InvalidState(_) => -2,
            Self::InvalidArgument(_) => -3,
            Self::AlreadyExists { .. } => -4,
            Self::DoesntExist { .. } => -5,
            Self::Overflow(_) => -6,
            Self::NoMem => -7,
            Self::Busy => -8,
        }
    }
}
