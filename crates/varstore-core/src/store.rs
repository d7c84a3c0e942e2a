//! The public store handle.
//!
//! One [`Store`] owns one pager (one database/WAL pair). Mutating calls
//! taking `tx: None` run inside an implicit transaction committed before
//! return; with `tx: Some(..)` they join the caller's open transaction.
//! Any failure inside an open transaction marks it aborted. Besides the
//! `Result` each call returns, the handle stashes the last error message
//! for the [`Store::last_error`] accessor.

use std::path::Path;

use tracing::debug;
use varstore_error::{Result, StoreError};
use varstore_pager::{Pager, TxnId};
use varstore_rptree::{RpTree, read_strided, remove_strided, write_strided};
use varstore_types::{DbHeader, Stride};

use crate::dir;

/// Configuration consumed when a database is created; persisted in the
/// file header and fixed for the database's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreOptions {
    /// Page size in bytes (power of two, 512..=65536).
    pub page_size: u32,
    /// Buffer-pool frames (at least 2).
    pub pool_pages: u32,
}

impl Default for StoreOptions {
    fn default() -> Self {
        let header = DbHeader::default();
        Self {
            page_size: header.page_size,
            pool_pages: header.buffer_pool_len,
        }
    }
}

impl StoreOptions {
    fn to_header(self) -> DbHeader {
        DbHeader {
            page_size: self.page_size,
            buffer_pool_len: self.pool_pages,
        }
    }
}

/// An open transaction token. Obtained from [`Store::begin_txn`] and
/// consumed by [`Store::commit`] or [`Store::abort`].
#[derive(Debug)]
pub struct Txn {
    id: TxnId,
}

/// Handle to one varstore database.
pub struct Store {
    pager: Pager,
    last_error: Option<String>,
}

impl Store {
    /// Open (or create with default options) a database/WAL pair,
    /// running crash recovery first.
    pub fn open(db_path: &Path, wal_path: &Path) -> Result<Self> {
        Ok(Self {
            pager: Pager::open(db_path, wal_path, None)?,
            last_error: None,
        })
    }

    /// Open, creating the database with `options` if it does not exist.
    /// Options that disagree with an existing database's header are
    /// rejected.
    pub fn open_with(db_path: &Path, wal_path: &Path, options: StoreOptions) -> Result<Self> {
        Ok(Self {
            pager: Pager::open(db_path, wal_path, Some(options.to_header()))?,
            last_error: None,
        })
    }

    /// Close the handle. An open transaction is discarded, exactly as a
    /// crash before commit would discard it.
    pub fn close(mut self) -> Result<()> {
        self.pager.rollback_open()
    }

    /// Message of the most recent failed call, if any.
    #[must_use]
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Clear the stashed error message.
    pub fn reset_errors(&mut self) {
        self.last_error = None;
    }

    /// Begin the single open transaction.
    pub fn begin_txn(&mut self) -> Result<Txn> {
        let begun = self.pager.begin();
        self.stash(begun).map(|id| Txn { id })
    }

    /// Commit `txn`: its mutations become durable atomically.
    pub fn commit(&mut self, txn: Txn) -> Result<()> {
        let committed = self.pager.commit(txn.id);
        self.stash(committed)
    }

    /// Abort `txn`: its mutations are discarded.
    pub fn abort(&mut self, txn: Txn) -> Result<()> {
        let aborted = self.pager.abort(txn.id);
        self.stash(aborted)
    }

    /// Create a named variable; returns its stable id.
    pub fn new_var(&mut self, tx: Option<&Txn>, name: &str) -> Result<i64> {
        let created = self.mutate(tx, |pager| dir::create(pager, name));
        self.stash(created).map(|pg0| pg0 as i64)
    }

    /// Resolve a name to its variable id.
    pub fn get_var_id(&mut self, name: &str) -> Result<i64> {
        let found = dir::lookup(&mut self.pager, name);
        self.stash(found).map(|pg0| pg0 as i64)
    }

    /// Delete a named variable and free its pages.
    pub fn delete_var(&mut self, tx: Option<&Txn>, name: &str) -> Result<()> {
        let deleted = self.mutate(tx, |pager| {
            let pg0 = dir::remove(pager, name)?;
            RpTree::new(pg0).free_pages(pager)?;
            debug!(name, pg0, "variable deleted");
            Ok(())
        });
        self.stash(deleted)
    }

    /// Current byte length of a variable.
    pub fn fsize(&mut self, var_id: i64) -> Result<u64> {
        let sized = Self::tree_of(var_id).and_then(|tree| tree.total(&mut self.pager));
        self.stash(sized)
    }

    /// Insert `nelem` elements of `elem_size` bytes at byte offset
    /// `bofst`, shifting later bytes rightward. Returns the element
    /// count.
    pub fn insert(
        &mut self,
        var_id: i64,
        tx: Option<&Txn>,
        src: &[u8],
        bofst: u64,
        elem_size: u64,
        nelem: u64,
    ) -> Result<u64> {
        let inserted = Self::check_payload(src.len(), elem_size, nelem).and_then(|()| {
            let tree = Self::tree_of(var_id)?;
            if nelem == 0 {
                return Ok(0);
            }
            self.mutate(tx, |pager| {
                tree.insert(pager, bofst, src)?;
                Ok(nelem)
            })
        });
        self.stash(inserted)
    }

    /// Overwrite elements in place along `stride`. Returns the element
    /// count.
    pub fn write(
        &mut self,
        var_id: i64,
        tx: Option<&Txn>,
        src: &[u8],
        elem_size: u64,
        stride: Stride,
    ) -> Result<u64> {
        let tree = match self.stash(Self::tree_of(var_id)) {
            Ok(tree) => tree,
            Err(err) => return Err(err),
        };
        let written = self.mutate(tx, |pager| write_strided(pager, &tree, src, elem_size, stride));
        self.stash(written)
    }

    /// Gather elements along `stride` into `dst`. Returns the element
    /// count. Inside an open transaction this observes the
    /// transaction's own writes.
    pub fn read(
        &mut self,
        var_id: i64,
        dst: &mut [u8],
        elem_size: u64,
        stride: Stride,
    ) -> Result<u64> {
        let read = Self::tree_of(var_id)
            .and_then(|tree| read_strided(&mut self.pager, &tree, dst, elem_size, stride));
        self.stash(read)
    }

    /// Remove elements along `stride`, optionally collecting the removed
    /// bytes into `dst` in element order. Returns the element count.
    pub fn remove(
        &mut self,
        var_id: i64,
        tx: Option<&Txn>,
        mut dst: Option<&mut Vec<u8>>,
        elem_size: u64,
        stride: Stride,
    ) -> Result<u64> {
        let tree = match self.stash(Self::tree_of(var_id)) {
            Ok(tree) => tree,
            Err(err) => return Err(err),
        };
        let removed = self.mutate(tx, |pager| {
            remove_strided(pager, &tree, dst.as_mut().map(|v| &mut **v), elem_size, stride)
        });
        self.stash(removed)
    }

    /// Run `f` under the caller's transaction, or under an implicit one
    /// committed before return. A failure inside an explicit transaction
    /// marks it aborted; a failed implicit transaction is rolled back.
    fn mutate<T>(
        &mut self,
        tx: Option<&Txn>,
        f: impl FnOnce(&mut Pager) -> Result<T>,
    ) -> Result<T> {
        match tx {
            Some(txn) => {
                if self.pager.current_txn() != Some(txn.id) {
                    return Err(StoreError::invalid_state(
                        "transaction token does not match the open transaction",
                    ));
                }
                match f(&mut self.pager) {
                    Ok(value) => Ok(value),
                    Err(err) => {
                        self.pager.note_failure();
                        Err(err)
                    }
                }
            }
            None => {
                let id = self.pager.begin()?;
                match f(&mut self.pager) {
                    Ok(value) => {
                        self.pager.commit(id)?;
                        Ok(value)
                    }
                    Err(err) => {
                        // Roll back; the original failure is what the
                        // caller needs to see.
                        let _ = self.pager.abort(id);
                        Err(err)
                    }
                }
            }
        }
    }

    fn tree_of(var_id: i64) -> Result<RpTree> {
        if var_id <= 0 {
            return Err(StoreError::invalid_argument(format!(
                "variable id {var_id} is not a valid root page"
            )));
        }
        Ok(RpTree::new(var_id as u64))
    }

    fn check_payload(buf_len: usize, elem_size: u64, nelem: u64) -> Result<()> {
        if elem_size == 0 {
            return Err(StoreError::invalid_argument("element size must be non-zero"));
        }
        let expected = nelem
            .checked_mul(elem_size)
            .ok_or_else(|| StoreError::Overflow(format!("{nelem} elements of {elem_size} bytes")))?;
        if buf_len as u64 != expected {
            return Err(StoreError::invalid_argument(format!(
                "buffer holds {buf_len} bytes, call describes {expected}"
            )));
        }
        Ok(())
    }

    fn stash<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(err) = &result {
            self.last_error = Some(err.to_string());
        }
        result
    }
}
