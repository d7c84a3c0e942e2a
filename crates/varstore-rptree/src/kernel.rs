//! The strided kernel: front door for read/write/remove requests.
//!
//! A `{bstart, stride, nelems}` descriptor is validated once (zero
//! stride, overflow, span past end), then either handed to the rope's
//! contiguous bulk path or driven element by element. The element loop
//! keeps a cursor on the current leaf so consecutive elements that land
//! in the same leaf cost one descent, not one per element.

use varstore_error::{Result, StoreError};
use varstore_pager::Pager;
use varstore_types::{PageTypeMask, Stride};

use crate::tree::RpTree;

const LEAF: PageTypeMask = PageTypeMask::DATA_LIST;

/// Cursor over the leaf that held the last transferred byte.
#[derive(Debug, Clone, Copy)]
struct LeafCursor {
    pgno: u64,
    /// Logical byte offset of the leaf's first byte.
    start: u64,
    fill: u64,
    next: u64,
}

/// Gather `stride.nelems` elements of `elem_size` bytes into `dst`.
/// Returns the element count.
pub fn read_strided(
    pager: &mut Pager,
    tree: &RpTree,
    dst: &mut [u8],
    elem_size: u64,
    stride: Stride,
) -> Result<u64> {
    let span_end = stride.end(elem_size)?;
    check_buffer(dst.len(), &stride, elem_size)?;
    if stride.nelems == 0 {
        return Ok(0);
    }
    check_in_bounds(pager, tree, span_end)?;

    if stride.is_contiguous() {
        tree.read_at(pager, stride.bstart, dst)?;
        return Ok(stride.nelems);
    }

    let w = elem_size as usize;
    let mut cursor = None;
    for i in 0..stride.nelems {
        let mut at = stride.offset_of(i, elem_size)?;
        let mut out_at = (i as usize) * w;
        let mut remaining = w;
        while remaining > 0 {
            let cur = position_cursor(pager, tree, &mut cursor, at)?;
            let leaf_off = (at - cur.start) as usize;
            let take = ((cur.fill as usize) - leaf_off).min(remaining);
            let leaf_page = pager.view(LEAF, cur.pgno)?;
            dst[out_at..out_at + take]
                .copy_from_slice(&leaf_page.data_list().payload()[leaf_off..leaf_off + take]);
            at += take as u64;
            out_at += take;
            remaining -= take;
        }
    }
    Ok(stride.nelems)
}

/// Scatter `stride.nelems` elements of `elem_size` bytes from `src` over
/// existing bytes. In-place: no structural change, the whole span must
/// already exist. Returns the element count.
pub fn write_strided(
    pager: &mut Pager,
    tree: &RpTree,
    src: &[u8],
    elem_size: u64,
    stride: Stride,
) -> Result<u64> {
    let span_end = stride.end(elem_size)?;
    check_buffer(src.len(), &stride, elem_size)?;
    if stride.nelems == 0 {
        return Ok(0);
    }
    check_in_bounds(pager, tree, span_end)?;

    if stride.is_contiguous() {
        tree.write_at(pager, stride.bstart, src)?;
        return Ok(stride.nelems);
    }

    let w = elem_size as usize;
    let mut cursor = None;
    for i in 0..stride.nelems {
        let mut at = stride.offset_of(i, elem_size)?;
        let mut src_at = (i as usize) * w;
        let mut remaining = w;
        while remaining > 0 {
            let cur = position_cursor(pager, tree, &mut cursor, at)?;
            let leaf_off = (at - cur.start) as usize;
            let take = ((cur.fill as usize) - leaf_off).min(remaining);
            let mut leaf_page = pager.edit(LEAF, cur.pgno)?;
            leaf_page.data_list_mut().payload_mut()[leaf_off..leaf_off + take]
                .copy_from_slice(&src[src_at..src_at + take]);
            at += take as u64;
            src_at += take;
            remaining -= take;
        }
    }
    Ok(stride.nelems)
}

/// Remove `stride.nelems` elements, optionally collecting the removed
/// bytes in element order. Contiguous removes slice the range in one
/// pass; strided removes go element-wise, compacting as they go.
/// Returns the element count.
pub fn remove_strided(
    pager: &mut Pager,
    tree: &RpTree,
    mut dst: Option<&mut Vec<u8>>,
    elem_size: u64,
    stride: Stride,
) -> Result<u64> {
    let span_end = stride.end(elem_size)?;
    if stride.nelems == 0 {
        return Ok(0);
    }
    check_in_bounds(pager, tree, span_end)?;

    if stride.is_contiguous() {
        let nbytes = stride.payload_bytes(elem_size)?;
        tree.remove(pager, stride.bstart, nbytes, dst.as_mut().map(|v| &mut **v))?;
        return Ok(stride.nelems);
    }

    for i in 0..stride.nelems {
        // Each earlier removal shifted this element left by one width.
        let original = stride.offset_of(i, elem_size)?;
        let shifted = original - i * elem_size;
        tree.remove(pager, shifted, elem_size, dst.as_mut().map(|v| &mut **v))?;
    }
    Ok(stride.nelems)
}

fn check_buffer(buf_len: usize, stride: &Stride, elem_size: u64) -> Result<()> {
    let expected = stride.payload_bytes(elem_size)?;
    if buf_len as u64 == expected {
        Ok(())
    } else {
        Err(StoreError::invalid_argument(format!(
            "buffer holds {buf_len} bytes, stride transfers {expected}"
        )))
    }
}

fn check_in_bounds(pager: &mut Pager, tree: &RpTree, span_end: u64) -> Result<()> {
    let total = tree.total(pager)?;
    if span_end > total {
        Err(StoreError::invalid_argument(format!(
            "stride reaches byte {span_end}, variable holds {total}"
        )))
    } else {
        Ok(())
    }
}

/// Return a cursor whose leaf covers logical byte `at`, reusing or
/// chain-advancing the previous cursor when possible.
fn position_cursor(
    pager: &mut Pager,
    tree: &RpTree,
    cursor: &mut Option<LeafCursor>,
    at: u64,
) -> Result<LeafCursor> {
    if let Some(cur) = *cursor {
        if at >= cur.start && at < cur.start + cur.fill {
            return Ok(cur);
        }
        // Common stride pattern: the next element starts exactly where
        // this leaf ends. One pointer hop beats a fresh descent.
        if at == cur.start + cur.fill && cur.next != 0 {
            let leaf_page = pager.view(LEAF, cur.next)?;
            let dl = leaf_page.data_list();
            let hopped = LeafCursor {
                pgno: cur.next,
                start: cur.start + cur.fill,
                fill: dl.fill() as u64,
                next: dl.next(),
            };
            if at < hopped.start + hopped.fill {
                *cursor = Some(hopped);
                return Ok(hopped);
            }
        }
    }
    let (pos, _) = tree.locate(pager, at)?;
    let leaf_page = pager.view(LEAF, pos.pgno)?;
    let dl = leaf_page.data_list();
    let fill = dl.fill() as u64;
    let fresh = LeafCursor {
        pgno: pos.pgno,
        start: at - pos.offset as u64,
        fill,
        next: dl.next(),
    };
    if (pos.offset as u64) >= fill {
        return Err(StoreError::invalid_state(format!(
            "leaf {} shorter than its cumulative key claims",
            pos.pgno
        )));
    }
    *cursor = Some(fresh);
    Ok(fresh)
}
