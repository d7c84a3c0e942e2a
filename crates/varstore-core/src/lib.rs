//! The user-facing half of varstore: the hashed variable directory and
//! the [`Store`] handle that ties the pager, the ropes and the strided
//! kernel together behind the public API.

mod dir;
mod store;

pub use store::{Store, StoreOptions, Txn};
