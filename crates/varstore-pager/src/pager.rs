//! The composed pager: buffer pool + file pager + WAL under one
//! transactional surface.
//!
//! Reads and writes go through pooled frames. Dirty frames flush to the
//! WAL while a transaction is open and directly to the file otherwise.
//! Commit appends the marker, checkpoints the WAL into the file and
//! truncates it; a checkpoint failure after the marker poisons the pager
//! until reopen. Page handles ([`PageRef`] / [`PageMut`]) borrow the
//! pager mutably, so holding one across another pager call (anything
//! that could evict its frame) is a compile error.

use std::fs::OpenOptions;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use hashbrown::HashSet;
use tracing::{debug, error, warn};
use varstore_error::{Result, StoreError};
use varstore_types::{DbHeader, PageType, PageTypeMask};
use varstore_wal::{RecoverySummary, Wal};

use crate::buffer_pool::BufferPool;
use crate::file_pager::FilePager;
use crate::page::{
    self, DataListMut, DataListRef, HashLeafMut, HashLeafRef, HashPageMut, HashPageRef,
    InnerNodeMut, InnerNodeRef,
};

/// Token identifying the pager's open transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxnId(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// No transaction open.
    Idle,
    /// One transaction open; `aborted` is set when a failure inside it
    /// has made commit impossible.
    Open { id: TxnId, aborted: bool },
    /// A checkpoint failed after its commit marker became durable; only
    /// reopening recovers.
    Poisoned,
}

/// Immutable typed page handle borrowing the pager.
#[derive(Debug)]
pub struct PageRef<'a> {
    pgno: u64,
    ty: PageType,
    bytes: &'a [u8],
}

impl<'a> PageRef<'a> {
    /// Page number.
    #[must_use]
    pub fn pgno(&self) -> u64 {
        self.pgno
    }

    /// Decoded page type.
    #[must_use]
    pub fn page_type(&self) -> PageType {
        self.ty
    }

    /// View as a rope leaf.
    #[must_use]
    pub fn data_list(&self) -> DataListRef<'a> {
        debug_assert_eq!(self.ty, PageType::DataList);
        DataListRef::new(self.bytes)
    }

    /// View as a rope inner node.
    #[must_use]
    pub fn inner_node(&self) -> InnerNodeRef<'a> {
        debug_assert_eq!(self.ty, PageType::InnerNode);
        InnerNodeRef::new(self.bytes)
    }

    /// View as the directory root.
    #[must_use]
    pub fn hash_page(&self) -> HashPageRef<'a> {
        debug_assert_eq!(self.ty, PageType::HashPage);
        HashPageRef::new(self.bytes)
    }

    /// View as a directory bucket page.
    #[must_use]
    pub fn hash_leaf(&self) -> HashLeafRef<'a> {
        debug_assert_eq!(self.ty, PageType::HashLeaf);
        HashLeafRef::new(self.bytes)
    }
}

/// Mutable typed page handle borrowing the pager. Creating one marks the
/// underlying frame dirty.
pub struct PageMut<'a> {
    pgno: u64,
    ty: PageType,
    bytes: &'a mut [u8],
}

impl PageMut<'_> {
    /// Page number.
    #[must_use]
    pub fn pgno(&self) -> u64 {
        self.pgno
    }

    /// Decoded page type.
    #[must_use]
    pub fn page_type(&self) -> PageType {
        self.ty
    }

    /// Edit as a rope leaf.
    pub fn data_list_mut(&mut self) -> DataListMut<'_> {
        debug_assert_eq!(self.ty, PageType::DataList);
        DataListMut::new(self.bytes)
    }

    /// Edit as a rope inner node.
    pub fn inner_node_mut(&mut self) -> InnerNodeMut<'_> {
        debug_assert_eq!(self.ty, PageType::InnerNode);
        InnerNodeMut::new(self.bytes)
    }

    /// Edit as the directory root.
    pub fn hash_page_mut(&mut self) -> HashPageMut<'_> {
        debug_assert_eq!(self.ty, PageType::HashPage);
        HashPageMut::new(self.bytes)
    }

    /// Edit as a directory bucket page.
    pub fn hash_leaf_mut(&mut self) -> HashLeafMut<'_> {
        debug_assert_eq!(self.ty, PageType::HashLeaf);
        HashLeafMut::new(self.bytes)
    }
}

/// Single-writer transactional pager over one database/WAL file pair.
#[derive(Debug)]
pub struct Pager {
    file: FilePager,
    pool: BufferPool,
    wal: Wal,
    header: DbHeader,
    state: State,
    next_txn: u64,
    /// Pages freed by the open transaction; tombstoned only at commit.
    txn_freed: Vec<u64>,
    recovery: RecoverySummary,
}

impl Pager {
    /// Open (or create) the database and WAL pair, replaying any
    /// committed WAL frames first.
    ///
    /// `requested` configures a database being created; against an
    /// existing database it must match the stored header.
    pub fn open(db_path: &Path, wal_path: &Path, requested: Option<DbHeader>) -> Result<Self> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(db_path)?;
        let file_len = file.metadata()?.len();

        let header = if file_len == 0 {
            let header = requested.unwrap_or_default();
            header.validate()?;
            file.seek(SeekFrom::Start(0))?;
            file.write_all(&header.encode())?;
            file.sync_data()?;
            header
        } else {
            let mut bytes = [0_u8; 8];
            file.seek(SeekFrom::Start(0))?;
            file.read_exact(&mut bytes).map_err(|err| {
                StoreError::invalid_state(format!("database file shorter than its header: {err}"))
            })?;
            let header = DbHeader::decode(bytes)?;
            if let Some(req) = requested {
                if req != header {
                    return Err(StoreError::invalid_argument(format!(
                        "requested configuration (page_size={}, pool={}) disagrees with the \
                         database header (page_size={}, pool={})",
                        req.page_size, req.buffer_pool_len, header.page_size, header.buffer_pool_len
                    )));
                }
            }
            header
        };

        let mut fpager = FilePager::open(file, header.page_size)?;
        let mut wal = Wal::open(wal_path, header.page_size)?;
        let recovery = wal.recover(|pgno, payload| fpager.apply_frame(pgno, payload))?;
        if recovery.committed_groups > 0 {
            fpager.sync()?;
            debug!(
                groups = recovery.committed_groups,
                "applied committed WAL frames on open"
            );
        }

        let mut pager = Self {
            file: fpager,
            pool: BufferPool::new(header.page_size, header.buffer_pool_len),
            wal,
            header,
            state: State::Idle,
            next_txn: 1,
            txn_freed: Vec::new(),
            recovery,
        };

        // A fresh database gets its directory root as page 0.
        if pager.file.npages() == 0 {
            let pg0 = pager.allocate(PageType::HashPage)?;
            debug_assert_eq!(pg0, 0);
            pager.flush_all_dirty()?;
            pager.file.sync()?;
        }
        Ok(pager)
    }

    /// Stored configuration.
    #[must_use]
    pub fn header(&self) -> DbHeader {
        self.header
    }

    /// Page size in bytes.
    #[must_use]
    pub fn page_size(&self) -> usize {
        self.header.page_size as usize
    }

    /// What recovery found on open.
    #[must_use]
    pub fn recovery(&self) -> RecoverySummary {
        self.recovery
    }

    /// Number of pages in the database file.
    #[must_use]
    pub fn npages(&self) -> u64 {
        self.file.npages()
    }

    /// Whether a transaction is currently open.
    #[must_use]
    pub fn txn_is_open(&self) -> bool {
        matches!(self.state, State::Open { .. })
    }

    /// Token of the open transaction, if any.
    #[must_use]
    pub fn current_txn(&self) -> Option<TxnId> {
        match self.state {
            State::Open { id, .. } => Some(id),
            _ => None,
        }
    }

    /// Discard whatever transaction is open (close path).
    pub fn rollback_open(&mut self) -> Result<()> {
        if self.txn_is_open() {
            self.rollback_inner()?;
        }
        Ok(())
    }

    /// Begin the single open transaction.
    pub fn begin(&mut self) -> Result<TxnId> {
        match self.state {
            State::Poisoned => Err(Self::poisoned_error()),
            State::Open { .. } => Err(StoreError::Busy),
            State::Idle => {
                let id = TxnId(self.next_txn);
                self.next_txn += 1;
                self.state = State::Open { id, aborted: false };
                debug!(txn = id.0, "transaction open");
                Ok(id)
            }
        }
    }

    /// Mark the open transaction failed; commit will refuse and the
    /// changes will be discarded.
    pub fn note_failure(&mut self) {
        if let State::Open { id, .. } = self.state {
            self.state = State::Open { id, aborted: true };
        }
    }

    /// Commit: flush dirty frames to the WAL, make the marker durable,
    /// checkpoint into the database file, truncate the WAL.
    pub fn commit(&mut self, txn: TxnId) -> Result<()> {
        match self.state {
            State::Poisoned => return Err(Self::poisoned_error()),
            State::Idle => {
                return Err(StoreError::invalid_state("no transaction is open"));
            }
            State::Open { id, aborted } => {
                if id != txn {
                    return Err(StoreError::invalid_state("stale transaction token"));
                }
                if aborted {
                    self.rollback_inner()?;
                    return Err(StoreError::invalid_state(
                        "transaction was aborted by an earlier failure",
                    ));
                }
            }
        }

        // Everything up to the commit marker can still abort cleanly.
        if let Err(err) = self.flush_all_dirty() {
            warn!(%err, "flush to WAL failed; aborting transaction");
            self.rollback_inner()?;
            return Err(err);
        }
        if let Err(err) = self.wal.append_commit_marker() {
            warn!(%err, "commit marker write failed; aborting transaction");
            self.rollback_inner()?;
            return Err(err);
        }

        // The marker is durable: from here failure poisons the pager
        // (recovery on the next open will finish the job).
        let freed: HashSet<u64> = self.txn_freed.iter().copied().collect();
        let file = &mut self.file;
        let applied = self.wal.checkpoint(|pgno, payload| {
            if freed.contains(&pgno) {
                Ok(())
            } else {
                file.apply_frame(pgno, payload)
            }
        });
        let result = applied
            .and_then(|pages| {
                self.file.sync()?;
                Ok(pages)
            })
            .and_then(|pages| {
                self.wal.truncate()?;
                Ok(pages)
            });
        match result {
            Ok(pages) => {
                for pgno in std::mem::take(&mut self.txn_freed) {
                    self.pool.evict(pgno);
                    if !self.file.is_freed(pgno) {
                        self.file.free(pgno)?;
                    }
                }
                self.state = State::Idle;
                debug!(txn = txn.0, pages, "transaction committed");
                Ok(())
            }
            Err(err) => {
                error!(%err, "checkpoint failed after durable commit marker");
                self.state = State::Poisoned;
                Err(err)
            }
        }
    }

    /// Roll back the open transaction: drop its WAL frames, its pooled
    /// pages and its deferred frees.
    pub fn abort(&mut self, txn: TxnId) -> Result<()> {
        match self.state {
            State::Poisoned => Err(Self::poisoned_error()),
            State::Idle => Err(StoreError::invalid_state("no transaction is open")),
            State::Open { id, .. } => {
                if id != txn {
                    return Err(StoreError::invalid_state("stale transaction token"));
                }
                self.rollback_inner()?;
                debug!(txn = txn.0, "transaction aborted");
                Ok(())
            }
        }
    }

    /// Allocate a fresh page of type `ty`, zeroed, pooled and dirty.
    pub fn allocate(&mut self, ty: PageType) -> Result<u64> {
        self.ensure_usable()?;
        let pgno = self.file.allocate()?;
        self.make_room()?;
        let slot = self.pool.claim(pgno)?;
        let frame = self.pool.frame_mut(slot);
        page::init(frame.bytes_mut(), ty);
        frame.mark_dirty();
        Ok(pgno)
    }

    /// Free `pgno`. Inside a transaction the tombstone is deferred to
    /// commit so an abort restores the page.
    pub fn free(&mut self, pgno: u64) -> Result<()> {
        self.ensure_usable()?;
        self.pool.evict(pgno);
        if self.txn_is_open() {
            self.txn_freed.push(pgno);
            Ok(())
        } else {
            self.file.free(pgno)
        }
    }

    /// Fetch `pgno` for reading; its type tag must be in `mask`.
    pub fn view(&mut self, mask: PageTypeMask, pgno: u64) -> Result<PageRef<'_>> {
        self.ensure_usable()?;
        let slot = self.slot_of(pgno)?;
        let frame = self.pool.frame(slot);
        let ty = Self::expect_type(mask, pgno, frame.bytes())?;
        Ok(PageRef {
            pgno,
            ty,
            bytes: frame.bytes(),
        })
    }

    /// Fetch `pgno` for writing; marks the frame dirty.
    pub fn edit(&mut self, mask: PageTypeMask, pgno: u64) -> Result<PageMut<'_>> {
        self.ensure_usable()?;
        let slot = self.slot_of(pgno)?;
        let frame = self.pool.frame_mut(slot);
        let ty = Self::expect_type(mask, pgno, frame.bytes())?;
        frame.mark_dirty();
        Ok(PageMut {
            pgno,
            ty,
            bytes: frame.bytes_mut(),
        })
    }

    fn poisoned_error() -> StoreError {
        StoreError::invalid_state("pager poisoned by a failed checkpoint; reopen the database")
    }

    fn ensure_usable(&self) -> Result<()> {
        match self.state {
            State::Poisoned => Err(Self::poisoned_error()),
            State::Open { aborted: true, .. } => Err(StoreError::invalid_state(
                "transaction was aborted by an earlier failure",
            )),
            _ => Ok(()),
        }
    }

    fn expect_type(mask: PageTypeMask, pgno: u64, bytes: &[u8]) -> Result<PageType> {
        let ty = PageType::from_tag(bytes[0])?;
        if mask.accepts(ty) {
            Ok(ty)
        } else {
            Err(StoreError::invalid_state(format!(
                "page {pgno} has type {ty:?}, expected one of {mask:?}"
            )))
        }
    }

    /// Find (or load) the pool slot for `pgno`.
    fn slot_of(&mut self, pgno: u64) -> Result<usize> {
        if let Some(slot) = self.pool.get(pgno) {
            return Ok(slot);
        }
        if self.txn_freed.contains(&pgno) {
            return Err(StoreError::invalid_state(format!(
                "page {pgno} was freed by the open transaction"
            )));
        }
        self.make_room()?;
        let slot = self.pool.claim(pgno)?;
        // Disjoint borrows: the frame buffer fills from the WAL shadow
        // when the open transaction rewrote this page, else from the file.
        let frame = self.pool.frame_mut(slot);
        let in_shadow = self.wal.read_shadowed(pgno, frame.bytes_mut())?;
        if !in_shadow {
            if let Err(err) = self.file.read_page(pgno, frame.bytes_mut()) {
                self.pool.evict(pgno);
                return Err(err);
            }
        }
        Ok(slot)
    }

    /// Ensure the pool can claim a frame, evicting (with flush) the
    /// rotation candidate when full.
    fn make_room(&mut self) -> Result<()> {
        if self.pool.has_free_slot() {
            return Ok(());
        }
        let candidate = self
            .pool
            .evict_candidate()
            .ok_or_else(|| StoreError::invalid_state("full pool with no eviction candidate"))?;
        let slot = self
            .pool
            .get(candidate)
            .ok_or_else(|| StoreError::invalid_state("eviction candidate vanished"))?;
        self.flush_slot(slot)?;
        self.pool.evict(candidate);
        Ok(())
    }

    /// Flush one dirty frame: to the WAL inside a transaction, straight
    /// to the file otherwise.
    fn flush_slot(&mut self, slot: usize) -> Result<()> {
        let frame = self.pool.frame(slot);
        if !frame.is_dirty() {
            return Ok(());
        }
        let pgno = frame.pgno();
        let result = if self.txn_is_open() {
            self.wal.append_frame(pgno, self.pool.frame(slot).bytes())
        } else {
            self.file.write_page(pgno, self.pool.frame(slot).bytes())
        };
        match result {
            Ok(()) => {
                self.pool.frame_mut(slot).mark_clean();
                Ok(())
            }
            Err(err) => {
                self.note_failure();
                Err(err)
            }
        }
    }

    fn flush_all_dirty(&mut self) -> Result<()> {
        for slot in self.pool.dirty_slots() {
            self.flush_slot(slot)?;
        }
        Ok(())
    }

    fn rollback_inner(&mut self) -> Result<()> {
        if let Err(err) = self.wal.truncate() {
            error!(%err, "WAL truncate failed during rollback");
            self.state = State::Poisoned;
            return Err(err);
        }
        self.pool.clear();
        self.txn_freed.clear();
        self.state = State::Idle;
        Ok(())
    }
}
