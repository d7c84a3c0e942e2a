//! The stride descriptor: a regular arithmetic progression of byte offsets.

use varstore_error::{Result, StoreError};

/// `{bstart, stride, nelems}` addressing for strided reads/writes/removes.
///
/// Element `i` (for `0 <= i < nelems`) lives at byte offset
/// `bstart + i * stride * elem_size`. A stride of 1 is contiguous.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stride {
    /// Starting byte offset.
    pub bstart: u64,
    /// Distance between consecutive elements, in units of elements.
    pub stride: u64,
    /// Number of elements addressed.
    pub nelems: u64,
}

impl Stride {
    /// Contiguous run of `nelems` elements starting at byte `bstart`.
    #[must_use]
    pub const fn contiguous(bstart: u64, nelems: u64) -> Self {
        Self {
            bstart,
            stride: 1,
            nelems,
        }
    }

    /// Whether consecutive elements are adjacent in the byte stream.
    #[must_use]
    pub const fn is_contiguous(&self) -> bool {
        self.stride == 1
    }

    /// Byte offset of element `i`, checked against overflow.
    pub fn offset_of(&self, i: u64, elem_size: u64) -> Result<u64> {
        let step = self
            .stride
            .checked_mul(elem_size)
            .and_then(|s| s.checked_mul(i))
            .ok_or_else(|| Self::overflow(self, elem_size))?;
        self.bstart
            .checked_add(step)
            .ok_or_else(|| Self::overflow(self, elem_size))
    }

    /// One past the last byte this stride touches, i.e.
    /// `bstart + (nelems - 1) * stride * elem_size + elem_size`.
    ///
    /// Validates the descriptor: `stride == 0` or `elem_size == 0` is
    /// `InvalidArgument`, arithmetic wrap is `Overflow`. `nelems == 0`
    /// yields `bstart` (an empty span).
    pub fn end(&self, elem_size: u64) -> Result<u64> {
        if self.stride == 0 {
            return Err(StoreError::invalid_argument("stride must be non-zero"));
        }
        if elem_size == 0 {
            return Err(StoreError::invalid_argument("element size must be non-zero"));
        }
        if self.nelems == 0 {
            return Ok(self.bstart);
        }
        let last = self.offset_of(self.nelems - 1, elem_size)?;
        last.checked_add(elem_size)
            .ok_or_else(|| Self::overflow(self, elem_size))
    }

    /// Total number of bytes transferred (`nelems * elem_size`), checked.
    pub fn payload_bytes(&self, elem_size: u64) -> Result<u64> {
        self.nelems
            .checked_mul(elem_size)
            .ok_or_else(|| Self::overflow(self, elem_size))
    }

    fn overflow(stride: &Self, elem_size: u64) -> StoreError {
        StoreError::Overflow(format!(
            "bstart={} stride={} nelems={} elem_size={elem_size}",
            stride.bstart, stride.stride, stride.nelems
        ))
    }
}
