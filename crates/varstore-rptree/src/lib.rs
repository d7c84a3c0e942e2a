//! The rope: a B+-tree-shaped page tree keyed by cumulative byte offset,
//! one per variable, plus the strided kernel that turns
//! `{bstart, stride, nelems}` requests into page-local transfers.
//!
//! Inner nodes hold running byte totals so any logical offset is located
//! in a single descent; leaves are data-list pages chained for forward
//! scans. Ordered insert and remove shift every downstream offset, which
//! is exactly what the cumulative keys make cheap: ancestors along the
//! descent path get a delta, nothing else moves.

pub mod kernel;
mod tree;

pub use kernel::{read_strided, remove_strided, write_strided};
pub use tree::RpTree;
