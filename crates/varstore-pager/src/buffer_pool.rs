//! Bounded in-memory page frames with round-robin replacement.
//!
//! The pool is the only owner of page memory. Replacement is a rotating
//! index: claiming a frame takes the first free slot at or after the
//! index; when every slot is occupied the page under the index is the
//! eviction candidate. The policy is deliberately simple; the contract
//! is forward progress, not hit rate.

use varstore_error::{Result, StoreError};

/// One pooled page.
#[derive(Debug)]
pub struct Frame {
    pgno: u64,
    dirty: bool,
    buf: Box<[u8]>,
}

impl Frame {
    /// Page number this frame holds.
    #[must_use]
    pub fn pgno(&self) -> u64 {
        self.pgno
    }

    /// Whether the frame has writes not yet flushed through the pager.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Mark the frame dirty.
    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    /// Clear the dirty bit after a flush.
    pub fn mark_clean(&mut self) {
        self.dirty = false;
    }

    /// Page bytes.
    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        &self.buf
    }

    /// Mutable page bytes. Callers mark the frame dirty themselves;
    /// the pager's `edit` path does so before handing the buffer out.
    pub fn bytes_mut(&mut self) -> &mut [u8] {
        &mut self.buf
    }
}

/// Fixed-capacity page cache.
#[derive(Debug)]
pub struct BufferPool {
    frames: Vec<Option<Frame>>,
    page_size: usize,
    /// Rotation index for claim/eviction.
    idx: usize,
}

impl BufferPool {
    /// Create a pool of `len` frames of `page_size` bytes each.
    #[must_use]
    pub fn new(page_size: u32, len: u32) -> Self {
        let mut frames = Vec::with_capacity(len as usize);
        frames.resize_with(len as usize, || None);
        Self {
            frames,
            page_size: page_size as usize,
            idx: 0,
        }
    }

    /// Number of slots.
    #[must_use]
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    /// Whether the pool holds no pages at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.frames.iter().all(Option::is_none)
    }

    /// Slot currently holding `pgno`, if any.
    #[must_use]
    pub fn get(&self, pgno: u64) -> Option<usize> {
        self.frames
            .iter()
            .position(|f| f.as_ref().is_some_and(|frame| frame.pgno == pgno))
    }

    /// Borrow the frame in `slot`.
    #[must_use]
    pub fn frame(&self, slot: usize) -> &Frame {
        self.frames[slot].as_ref().expect("slot holds a frame")
    }

    /// Mutably borrow the frame in `slot`.
    pub fn frame_mut(&mut self, slot: usize) -> &mut Frame {
        self.frames[slot].as_mut().expect("slot holds a frame")
    }

    /// Whether a claim would succeed without an eviction.
    #[must_use]
    pub fn has_free_slot(&self) -> bool {
        self.frames.iter().any(Option::is_none)
    }

    /// Page occupying the rotation slot; the page the caller must flush
    /// and [`BufferPool::evict`] before claiming when the pool is full.
    #[must_use]
    pub fn evict_candidate(&self) -> Option<u64> {
        self.frames[self.idx].as_ref().map(|f| f.pgno)
    }

    /// Claim a free frame for `pgno`, zero-filled and clean.
    ///
    /// Walks the rotation index to the first free slot. Fails when the
    /// pool is full (the caller evicts first) or when the page is already
    /// pooled (at most one frame per page).
    pub fn claim(&mut self, pgno: u64) -> Result<usize> {
        if self.get(pgno).is_some() {
            return Err(StoreError::invalid_state(format!(
                "page {pgno} is already in the buffer pool"
            )));
        }
        for _ in 0..self.frames.len() {
            let slot = self.idx;
            self.idx = (self.idx + 1) % self.frames.len();
            if self.frames[slot].is_none() {
                self.frames[slot] = Some(Frame {
                    pgno,
                    dirty: false,
                    buf: vec![0_u8; self.page_size].into_boxed_slice(),
                });
                return Ok(slot);
            }
        }
        Err(StoreError::invalid_state(
            "buffer pool is full; evict before claiming",
        ))
    }

    /// Drop the frame holding `pgno`, returning it (pool-only; the file
    /// is not touched).
    pub fn evict(&mut self, pgno: u64) -> Option<Frame> {
        let slot = self.get(pgno)?;
        self.frames[slot].take()
    }

    /// Drop every frame (transaction abort path).
    pub fn clear(&mut self) {
        for frame in &mut self.frames {
            *frame = None;
        }
    }

    /// Slots currently holding dirty frames.
    #[must_use]
    pub fn dirty_slots(&self) -> Vec<usize> {
        self.frames
            .iter()
            .enumerate()
            .filter_map(|(i, f)| f.as_ref().is_some_and(Frame::is_dirty).then_some(i))
            .collect()
    }
}
