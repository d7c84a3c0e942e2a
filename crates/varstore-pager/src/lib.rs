//! Page I/O for varstore: the file-backed pager, the bounded buffer pool,
//! the fixed-offset page codec, and the composed transactional [`Pager`].
//!
//! Layering mirrors the on-disk reality: [`FilePager`] owns the database
//! file and its length invariant, [`BufferPool`] owns all page memory,
//! and [`Pager`] routes reads and dirty-page flushes between the pool,
//! the WAL and the file depending on transaction state.

pub mod buffer_pool;
pub mod file_pager;
pub mod page;
pub mod pager;

pub use buffer_pool::BufferPool;
pub use file_pager::FilePager;
pub use page::{
    DataListMut, DataListRef, HashLeafMut, HashLeafRef, HashPageMut, HashPageRef, InnerNodeMut,
    InnerNodeRef, LeafTuple,
};
pub use pager::{PageMut, PageRef, Pager, TxnId};
