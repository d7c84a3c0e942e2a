//! Write-ahead log for the varstore pager.
//!
//! The log is a flat sequence of frames `{pgno: u64 LE, payload: page_size
//! bytes}`. A frame whose page number is [`WAL_SENTINEL`] is a commit
//! marker and carries no payload. An empty file is a valid, quiescent log.
//!
//! During a transaction every page write is appended here instead of going
//! to the database file; an in-memory shadow index maps each page number to
//! its latest frame so reads inside the transaction observe their own
//! writes. Commit appends the marker, and checkpointing applies the shadow
//! to the database file before the log is truncated.
//!
//! [`WAL_SENTINEL`]: varstore_types::WAL_SENTINEL

mod log;

pub use log::{RecoverySummary, Wal};
