//! varstore: an embedded, single-process storage engine for named
//! numeric arrays.
//!
//! Each variable is a mutable sequence of fixed-width elements stored in
//! a rope of fixed-size pages, addressable at byte granularity and
//! readable/writable at arbitrary strides. Data persists in a page-
//! organised database file fronted by a write-ahead log; mutating calls
//! are atomic and crash recovery converges on the last committed state.
//!
//! ```no_run
//! use varstore::{Store, Stride};
//!
//! # fn main() -> varstore::Result<()> {
//! let mut store = Store::open("data.db".as_ref(), "data.wal".as_ref())?;
//! let id = store.new_var(None, "samples")?;
//!
//! let samples: Vec<u8> = (0_i32..1000).flat_map(i32::to_le_bytes).collect();
//! store.insert(id, None, &samples, 0, 4, 1000)?;
//!
//! // Every tenth sample.
//! let stride = Stride { bstart: 0, stride: 10, nelems: 100 };
//! let mut decimated = vec![0_u8; 400];
//! store.read(id, &mut decimated, 4, stride)?;
//! # Ok(())
//! # }
//! ```

pub use varstore_core::{Store, StoreOptions, Txn};
pub use varstore_error::{Result, StoreError};
pub use varstore_types::Stride;
