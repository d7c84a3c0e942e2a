//! Fixed-offset accessors over raw page buffers.
//!
//! One view type per page kind, in read and write flavours. Views never
//! allocate and never copy; they decode fields at fixed offsets. The tag
//! byte is validated by the pager before a view is produced; structural
//! invariants (offsets in range, monotone keys) are validated by the
//! specific readers that depend on them.
//!
//! All multi-byte fields are little-endian.

use varstore_error::{Result, StoreError};
use varstore_types::PageType;

// Data-list layout.
const DL_NEXT: usize = 1;
const DL_LEN_NUM: usize = 9;
const DL_LEN_DENOM: usize = 11;
/// First payload byte of a data-list page.
pub const DL_DATA: usize = 13;

// Inner-node layout.
const IN_NKEYS: usize = 1;
const IN_CHILDREN: usize = 3;

// Hash-page layout.
const HP_LEN: usize = 1;
const HP_BUCKETS: usize = 5;

// Hash-leaf layout.
const HL_NEXT: usize = 1;
const HL_NVALUES: usize = 9;
const HL_OFFSETS: usize = 11;

fn read_u16(buf: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([buf[at], buf[at + 1]])
}

fn read_u32(buf: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]])
}

fn read_u64(buf: &[u8], at: usize) -> u64 {
    let mut bytes = [0_u8; 8];
    bytes.copy_from_slice(&buf[at..at + 8]);
    u64::from_le_bytes(bytes)
}

fn write_u16(buf: &mut [u8], at: usize, value: u16) {
    buf[at..at + 2].copy_from_slice(&value.to_le_bytes());
}

fn write_u32(buf: &mut [u8], at: usize, value: u32) {
    buf[at..at + 4].copy_from_slice(&value.to_le_bytes());
}

fn write_u64(buf: &mut [u8], at: usize, value: u64) {
    buf[at..at + 8].copy_from_slice(&value.to_le_bytes());
}

/// Zero a fresh page buffer and stamp its type tag (plus any
/// type-specific setup, like the hash-page bucket count).
pub fn init(buf: &mut [u8], ty: PageType) {
    buf.fill(0);
    buf[0] = ty.tag();
    match ty {
        PageType::HashPage => {
            let buckets = (buf.len() - HP_BUCKETS) / 8;
            write_u32(buf, HP_LEN, buckets as u32);
        }
        PageType::DataList => {
            // len_denom starts at 1: whole-byte fill.
            write_u16(buf, DL_LEN_DENOM, 1);
        }
        PageType::InnerNode | PageType::HashLeaf => {}
    }
}

/// Payload capacity of a data-list page of `page_size` bytes.
#[must_use]
pub const fn data_list_capacity(page_size: usize) -> usize {
    page_size - DL_DATA
}

/// Maximum child count of an inner node of `page_size` bytes.
#[must_use]
pub const fn inner_node_capacity(page_size: usize) -> usize {
    (page_size - 11) / 16
}

// ---------------------------------------------------------------------------
// Data-list
// ---------------------------------------------------------------------------

/// Read view of a rope leaf.
pub struct DataListRef<'a> {
    buf: &'a [u8],
}

impl<'a> DataListRef<'a> {
    pub(crate) fn new(buf: &'a [u8]) -> Self {
        debug_assert_eq!(buf[0], PageType::DataList.tag());
        Self { buf }
    }

    /// Next leaf page number, 0 when this is the last leaf.
    #[must_use]
    pub fn next(&self) -> u64 {
        read_u64(self.buf, DL_NEXT)
    }

    /// Current fill in bytes.
    ///
    /// `len_denom` exists for sub-byte element widths; this engine stores
    /// whole bytes only, so the denominator is always 1 and the numerator
    /// is the byte count.
    #[must_use]
    pub fn fill(&self) -> usize {
        usize::from(read_u16(self.buf, DL_LEN_NUM))
    }

    /// Fill denominator (always 1 here; kept for the on-disk format).
    #[must_use]
    pub fn fill_denom(&self) -> u16 {
        read_u16(self.buf, DL_LEN_DENOM)
    }

    /// Payload capacity in bytes.
    #[must_use]
    pub fn capacity(&self) -> usize {
        data_list_capacity(self.buf.len())
    }

    /// The occupied payload bytes.
    #[must_use]
    pub fn payload(&self) -> &'a [u8] {
        &self.buf[DL_DATA..DL_DATA + self.fill()]
    }
}

/// Write view of a rope leaf.
pub struct DataListMut<'a> {
    buf: &'a mut [u8],
}

impl<'a> DataListMut<'a> {
    pub(crate) fn new(buf: &'a mut [u8]) -> Self {
        debug_assert_eq!(buf[0], PageType::DataList.tag());
        Self { buf }
    }

    /// Next leaf page number, 0 when this is the last leaf.
    #[must_use]
    pub fn next(&self) -> u64 {
        read_u64(self.buf, DL_NEXT)
    }

    /// Current fill in bytes.
    #[must_use]
    pub fn fill(&self) -> usize {
        usize::from(read_u16(self.buf, DL_LEN_NUM))
    }

    /// Payload capacity in bytes.
    #[must_use]
    pub fn capacity(&self) -> usize {
        data_list_capacity(self.buf.len())
    }

    /// Point this leaf at its successor (0 for none).
    pub fn set_next(&mut self, next: u64) {
        write_u64(self.buf, DL_NEXT, next);
    }

    /// Set the fill to `bytes` whole bytes.
    pub fn set_fill(&mut self, bytes: usize) {
        debug_assert!(bytes <= self.capacity());
        write_u16(self.buf, DL_LEN_NUM, bytes as u16);
        write_u16(self.buf, DL_LEN_DENOM, 1);
    }

    /// The full payload region, occupied or not.
    pub fn payload_mut(&mut self) -> &mut [u8] {
        &mut self.buf[DL_DATA..]
    }

    /// Shift payload bytes `[from..fill)` to start at `to`, as in an
    /// in-leaf insert or remove. Fill is not changed here.
    pub fn shift_payload(&mut self, from: usize, to: usize, len: usize) {
        let payload = self.payload_mut();
        payload.copy_within(from..from + len, to);
    }
}

// ---------------------------------------------------------------------------
// Inner node
// ---------------------------------------------------------------------------

/// Read view of a rope inner node.
///
/// `keys[i]` is the cumulative byte count of children `0..=i`; children
/// are page numbers of the next level down. The on-disk child array has
/// one spare slot beyond the key capacity.
pub struct InnerNodeRef<'a> {
    buf: &'a [u8],
}

impl<'a> InnerNodeRef<'a> {
    pub(crate) fn new(buf: &'a [u8]) -> Self {
        debug_assert_eq!(buf[0], PageType::InnerNode.tag());
        Self { buf }
    }

    /// Number of children (== number of keys).
    #[must_use]
    pub fn nkeys(&self) -> usize {
        usize::from(read_u16(self.buf, IN_NKEYS))
    }

    /// Maximum child count for this page size.
    #[must_use]
    pub fn capacity(&self) -> usize {
        inner_node_capacity(self.buf.len())
    }

    /// Page number of child `i`.
    #[must_use]
    pub fn child(&self, i: usize) -> u64 {
        debug_assert!(i < self.nkeys());
        read_u64(self.buf, IN_CHILDREN + 8 * i)
    }

    /// Cumulative byte count through child `i`.
    #[must_use]
    pub fn key(&self, i: usize) -> u64 {
        debug_assert!(i < self.nkeys());
        read_u64(self.buf, self.keys_base() + 8 * i)
    }

    /// Total bytes under this node (`keys[nkeys-1]`, 0 for no children).
    #[must_use]
    pub fn total(&self) -> u64 {
        match self.nkeys() {
            0 => 0,
            n => self.key(n - 1),
        }
    }

    /// Bytes under child `i` alone.
    #[must_use]
    pub fn child_size(&self, i: usize) -> u64 {
        let end = self.key(i);
        let start = if i == 0 { 0 } else { self.key(i - 1) };
        end - start
    }

    /// Child to descend into for relative offset `rel`: the smallest `i`
    /// with `keys[i] > rel`, clamped to the last child so `rel == total`
    /// (append position) lands in the rightmost subtree. Returns the
    /// child index and the cumulative count preceding it.
    #[must_use]
    pub fn find_child(&self, rel: u64) -> (usize, u64) {
        let n = self.nkeys();
        debug_assert!(n > 0);
        let (mut lo, mut hi) = (0_usize, n);
        while lo < hi {
            let mid = (lo + hi) / 2;
            if self.key(mid) > rel {
                hi = mid;
            } else {
                lo = mid + 1;
            }
        }
        let idx = lo.min(n - 1);
        let start = if idx == 0 { 0 } else { self.key(idx - 1) };
        (idx, start)
    }

    /// Verify the strict monotonicity of the keys.
    pub fn check_keys(&self) -> Result<()> {
        for i in 1..self.nkeys() {
            if self.key(i) <= self.key(i - 1) {
                return Err(StoreError::invalid_state(format!(
                    "inner node keys not strictly increasing at index {i}"
                )));
            }
        }
        Ok(())
    }

    fn keys_base(&self) -> usize {
        IN_CHILDREN + 8 * (self.capacity() + 1)
    }
}

/// Write view of a rope inner node.
pub struct InnerNodeMut<'a> {
    buf: &'a mut [u8],
}

impl<'a> InnerNodeMut<'a> {
    pub(crate) fn new(buf: &'a mut [u8]) -> Self {
        debug_assert_eq!(buf[0], PageType::InnerNode.tag());
        Self { buf }
    }

    /// Read-only view over the same buffer.
    #[must_use]
    pub fn as_ref(&self) -> InnerNodeRef<'_> {
        InnerNodeRef { buf: self.buf }
    }

    /// Replace this node's children with `entries` of `(pgno, size)`,
    /// recomputing cumulative keys from `0`.
    pub fn set_entries(&mut self, entries: &[(u64, u64)]) {
        let capacity = inner_node_capacity(self.buf.len());
        debug_assert!(entries.len() <= capacity);
        write_u16(self.buf, IN_NKEYS, entries.len() as u16);
        let keys_base = IN_CHILDREN + 8 * (capacity + 1);
        let mut cum = 0_u64;
        for (i, &(pgno, size)) in entries.iter().enumerate() {
            cum += size;
            write_u64(self.buf, IN_CHILDREN + 8 * i, pgno);
            write_u64(self.buf, keys_base + 8 * i, cum);
        }
    }

    /// Add `delta` to every cumulative key from child `from` rightward
    /// (the key update after an insert or remove below child `from`).
    pub fn bump_keys_from(&mut self, from: usize, delta: i64) {
        let capacity = inner_node_capacity(self.buf.len());
        let keys_base = IN_CHILDREN + 8 * (capacity + 1);
        let nkeys = usize::from(read_u16(self.buf, IN_NKEYS));
        for i in from..nkeys {
            let at = keys_base + 8 * i;
            let key = read_u64(self.buf, at);
            write_u64(self.buf, at, key.wrapping_add_signed(delta));
        }
    }
}

// ---------------------------------------------------------------------------
// Hash page
// ---------------------------------------------------------------------------

/// Read view of the directory root (page 0).
pub struct HashPageRef<'a> {
    buf: &'a [u8],
}

impl<'a> HashPageRef<'a> {
    pub(crate) fn new(buf: &'a [u8]) -> Self {
        debug_assert_eq!(buf[0], PageType::HashPage.tag());
        Self { buf }
    }

    /// Number of buckets.
    #[must_use]
    pub fn len(&self) -> usize {
        read_u32(self.buf, HP_LEN) as usize
    }

    /// Whether the directory has no buckets (corrupt; a fresh hash page
    /// always derives its bucket count from the page size).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Chain head for bucket `i` (0 = empty bucket).
    #[must_use]
    pub fn bucket(&self, i: usize) -> u64 {
        debug_assert!(i < self.len());
        read_u64(self.buf, HP_BUCKETS + 8 * i)
    }
}

/// Write view of the directory root.
pub struct HashPageMut<'a> {
    buf: &'a mut [u8],
}

impl<'a> HashPageMut<'a> {
    pub(crate) fn new(buf: &'a mut [u8]) -> Self {
        debug_assert_eq!(buf[0], PageType::HashPage.tag());
        Self { buf }
    }

    /// Read-only view over the same buffer.
    #[must_use]
    pub fn as_ref(&self) -> HashPageRef<'_> {
        HashPageRef { buf: self.buf }
    }

    /// Set the chain head for bucket `i`.
    pub fn set_bucket(&mut self, i: usize, head: u64) {
        debug_assert!(i < self.as_ref().len());
        write_u64(self.buf, HP_BUCKETS + 8 * i, head);
    }
}

// ---------------------------------------------------------------------------
// Hash leaf
// ---------------------------------------------------------------------------

/// One decoded directory tuple, borrowing the page.
#[derive(Debug, PartialEq, Eq)]
pub struct LeafTuple<'a> {
    /// Variable name bytes.
    pub name: &'a [u8],
    /// Root page of the variable's rope.
    pub pg0: u64,
    /// Reserved annotation string (empty in this engine).
    pub tstr: &'a [u8],
}

impl LeafTuple<'_> {
    /// Encoded size of a tuple with these field lengths, including its
    /// offset-array slot.
    #[must_use]
    pub fn cost(name_len: usize, tstr_len: usize) -> usize {
        2 + 2 + name_len + 8 + 2 + tstr_len
    }
}

/// Read view of a directory bucket page.
pub struct HashLeafRef<'a> {
    buf: &'a [u8],
}

impl<'a> HashLeafRef<'a> {
    pub(crate) fn new(buf: &'a [u8]) -> Self {
        debug_assert_eq!(buf[0], PageType::HashLeaf.tag());
        Self { buf }
    }

    /// Next bucket page in the chain (0 = end).
    #[must_use]
    pub fn next(&self) -> u64 {
        read_u64(self.buf, HL_NEXT)
    }

    /// Number of tuples stored.
    #[must_use]
    pub fn nvalues(&self) -> usize {
        usize::from(read_u16(self.buf, HL_NVALUES))
    }

    /// Decode tuple `idx`, bounds-checking every field against the page.
    pub fn tuple(&self, idx: usize) -> Result<LeafTuple<'a>> {
        let nvalues = self.nvalues();
        if idx >= nvalues {
            return Err(StoreError::invalid_state(format!(
                "tuple index {idx} out of range ({nvalues} tuples)"
            )));
        }
        let page_len = self.buf.len();
        let slot_at = HL_OFFSETS + 2 * idx;
        if slot_at + 2 > page_len {
            return Err(StoreError::invalid_state(
                "tuple offset array overflows page",
            ));
        }
        let mut off = usize::from(read_u16(self.buf, slot_at));

        let bound = |off: usize, len: usize| -> Result<usize> {
            let end = off + len;
            if end > page_len {
                Err(StoreError::invalid_state(format!(
                    "malformed tuple {idx}: offset {end} overflows page ({page_len})"
                )))
            } else {
                Ok(end)
            }
        };

        bound(off, 2)?;
        let name_len = usize::from(read_u16(self.buf, off));
        off += 2;
        bound(off, name_len)?;
        let name = &self.buf[off..off + name_len];
        off += name_len;

        bound(off, 8)?;
        let pg0 = read_u64(self.buf, off);
        off += 8;

        bound(off, 2)?;
        let tstr_len = usize::from(read_u16(self.buf, off));
        off += 2;
        bound(off, tstr_len)?;
        let tstr = &self.buf[off..off + tstr_len];

        Ok(LeafTuple { name, pg0, tstr })
    }

    /// Whether a tuple of the given field lengths would fit alongside
    /// the current contents.
    pub fn fits(&self, name_len: usize, tstr_len: usize) -> Result<bool> {
        let nvalues = self.nvalues();
        let mut used = HL_OFFSETS + 2 * nvalues;
        for i in 0..nvalues {
            let t = self.tuple(i)?;
            used += LeafTuple::cost(t.name.len(), t.tstr.len()) - 2;
        }
        Ok(used + LeafTuple::cost(name_len, tstr_len) <= self.buf.len())
    }

    /// Decode every tuple into owned form (used when rebuilding a leaf).
    pub fn tuples_owned(&self) -> Result<Vec<(Vec<u8>, u64, Vec<u8>)>> {
        (0..self.nvalues())
            .map(|i| {
                let t = self.tuple(i)?;
                Ok((t.name.to_vec(), t.pg0, t.tstr.to_vec()))
            })
            .collect()
    }

    /// Find the tuple keyed by `name`.
    pub fn find(&self, name: &[u8]) -> Result<Option<(usize, u64)>> {
        for i in 0..self.nvalues() {
            let t = self.tuple(i)?;
            if t.name == name {
                return Ok(Some((i, t.pg0)));
            }
        }
        Ok(None)
    }
}

/// Write view of a directory bucket page.
pub struct HashLeafMut<'a> {
    buf: &'a mut [u8],
}

impl<'a> HashLeafMut<'a> {
    pub(crate) fn new(buf: &'a mut [u8]) -> Self {
        debug_assert_eq!(buf[0], PageType::HashLeaf.tag());
        Self { buf }
    }

    /// Read-only view over the same buffer.
    #[must_use]
    pub fn as_ref(&self) -> HashLeafRef<'_> {
        HashLeafRef { buf: self.buf }
    }

    /// Point this bucket page at its chain successor.
    pub fn set_next(&mut self, next: u64) {
        write_u64(self.buf, HL_NEXT, next);
    }

    /// Rewrite the page with `tuples`, packed in ascending offset order
    /// after the offsets array. The chain pointer is preserved.
    pub fn set_tuples(&mut self, tuples: &[(Vec<u8>, u64, Vec<u8>)]) -> Result<()> {
        let page_len = self.buf.len();
        let mut needed = HL_OFFSETS + 2 * tuples.len();
        for (name, _, tstr) in tuples {
            needed += LeafTuple::cost(name.len(), tstr.len()) - 2;
        }
        if needed > page_len {
            return Err(StoreError::invalid_state(format!(
                "directory tuples need {needed} bytes, page holds {page_len}"
            )));
        }

        // Clear everything after the chain pointer before repacking.
        self.buf[HL_NVALUES..].fill(0);
        write_u16(self.buf, HL_NVALUES, tuples.len() as u16);
        let mut off = HL_OFFSETS + 2 * tuples.len();
        for (i, (name, pg0, tstr)) in tuples.iter().enumerate() {
            write_u16(self.buf, HL_OFFSETS + 2 * i, off as u16);
            write_u16(self.buf, off, name.len() as u16);
            off += 2;
            self.buf[off..off + name.len()].copy_from_slice(name);
            off += name.len();
            write_u64(self.buf, off, *pg0);
            off += 8;
            write_u16(self.buf, off, tstr.len() as u16);
            off += 2;
            self.buf[off..off + tstr.len()].copy_from_slice(tstr);
            off += tstr.len();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: usize = 512;

    fn fresh(ty: PageType) -> Vec<u8> {
        let mut buf = vec![0xFF_u8; PAGE];
        init(&mut buf, ty);
        buf
    }

    #[test]
    fn test_init_stamps_tag_and_zeroes() {
        let buf = fresh(PageType::DataList);
        assert_eq!(buf[0], 1);
        assert!(buf[DL_DATA..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_data_list_fill_and_payload() {
        let mut buf = fresh(PageType::DataList);
        {
            let mut dl = DataListMut::new(&mut buf);
            assert_eq!(dl.capacity(), PAGE - DL_DATA);
            dl.set_next(42);
            dl.payload_mut()[..4].copy_from_slice(&[1, 2, 3, 4]);
            dl.set_fill(4);
        }
        let dl = DataListRef::new(&buf);
        assert_eq!(dl.next(), 42);
        assert_eq!(dl.fill(), 4);
        assert_eq!(dl.fill_denom(), 1);
        assert_eq!(dl.payload(), &[1, 2, 3, 4]);
    }

    #[test]
    fn test_data_list_shift_payload() {
        let mut buf = fresh(PageType::DataList);
        let mut dl = DataListMut::new(&mut buf);
        dl.payload_mut()[..6].copy_from_slice(b"abcdef");
        dl.set_fill(6);
        // Open a 2-byte hole at offset 2.
        dl.shift_payload(2, 4, 4);
        dl.payload_mut()[2..4].copy_from_slice(b"XY");
        dl.set_fill(8);
        let dl = DataListRef::new(&buf);
        assert_eq!(dl.payload(), b"abXYcdef");
    }

    #[test]
    fn test_inner_node_entries_and_search() {
        let mut buf = fresh(PageType::InnerNode);
        {
            let mut node = InnerNodeMut::new(&mut buf);
            node.set_entries(&[(10, 100), (11, 50), (12, 25)]);
        }
        let node = InnerNodeRef::new(&buf);
        assert_eq!(node.nkeys(), 3);
        assert_eq!(node.total(), 175);
        assert_eq!(node.child(1), 11);
        assert_eq!(node.key(0), 100);
        assert_eq!(node.key(1), 150);
        assert_eq!(node.child_size(1), 50);
        node.check_keys().unwrap();

        assert_eq!(node.find_child(0), (0, 0));
        assert_eq!(node.find_child(99), (0, 0));
        assert_eq!(node.find_child(100), (1, 100));
        assert_eq!(node.find_child(174), (2, 150));
        // Append position clamps into the last child.
        assert_eq!(node.find_child(175), (2, 150));
    }

    #[test]
    fn test_inner_node_bump_keys() {
        let mut buf = fresh(PageType::InnerNode);
        {
            let mut node = InnerNodeMut::new(&mut buf);
            node.set_entries(&[(1, 10), (2, 10), (3, 10)]);
            node.bump_keys_from(1, 5);
        }
        let node = InnerNodeRef::new(&buf);
        assert_eq!(node.key(0), 10);
        assert_eq!(node.key(1), 25);
        assert_eq!(node.key(2), 35);

        let mut buf2 = fresh(PageType::InnerNode);
        let mut node = InnerNodeMut::new(&mut buf2);
        node.set_entries(&[(1, 10), (2, 10)]);
        node.bump_keys_from(0, -4);
        assert_eq!(node.as_ref().key(0), 6);
        assert_eq!(node.as_ref().key(1), 16);
    }

    #[test]
    fn test_inner_node_capacity_matches_layout() {
        let capacity = inner_node_capacity(PAGE);
        // Children (capacity + 1 slots) and keys must both fit.
        assert!(IN_CHILDREN + 8 * (capacity + 1) + 8 * capacity <= PAGE);
        // And the next size up must not.
        assert!(IN_CHILDREN + 8 * (capacity + 2) + 8 * (capacity + 1) > PAGE);
    }

    #[test]
    fn test_non_monotone_keys_detected() {
        let mut buf = fresh(PageType::InnerNode);
        let mut node = InnerNodeMut::new(&mut buf);
        node.set_entries(&[(1, 10), (2, 0)]);
        assert!(node.as_ref().check_keys().is_err());
    }

    #[test]
    fn test_hash_page_buckets() {
        let mut buf = fresh(PageType::HashPage);
        {
            let mut hp = HashPageMut::new(&mut buf);
            let len = hp.as_ref().len();
            assert_eq!(len, (PAGE - HP_BUCKETS) / 8);
            hp.set_bucket(0, 77);
            hp.set_bucket(len - 1, 88);
        }
        let hp = HashPageRef::new(&buf);
        assert_eq!(hp.bucket(0), 77);
        assert_eq!(hp.bucket(hp.len() - 1), 88);
        assert_eq!(hp.bucket(1), 0);
    }

    #[test]
    fn test_hash_leaf_tuples_round_trip() {
        let mut buf = fresh(PageType::HashLeaf);
        let tuples = vec![
            (b"alpha".to_vec(), 3_u64, Vec::new()),
            (b"beta".to_vec(), 9_u64, b"i32".to_vec()),
        ];
        {
            let mut hl = HashLeafMut::new(&mut buf);
            hl.set_next(5);
            hl.set_tuples(&tuples).unwrap();
        }
        let hl = HashLeafRef::new(&buf);
        assert_eq!(hl.next(), 5);
        assert_eq!(hl.nvalues(), 2);
        let t0 = hl.tuple(0).unwrap();
        assert_eq!(t0.name, b"alpha");
        assert_eq!(t0.pg0, 3);
        assert_eq!(t0.tstr, b"");
        let t1 = hl.tuple(1).unwrap();
        assert_eq!(t1.name, b"beta");
        assert_eq!(t1.tstr, b"i32");

        assert_eq!(hl.find(b"beta").unwrap(), Some((1, 9)));
        assert_eq!(hl.find(b"gamma").unwrap(), None);
        assert_eq!(hl.tuples_owned().unwrap(), tuples);
    }

    #[test]
    fn test_hash_leaf_rewrite_preserves_next() {
        let mut buf = fresh(PageType::HashLeaf);
        let mut hl = HashLeafMut::new(&mut buf);
        hl.set_next(123);
        hl.set_tuples(&[(b"a".to_vec(), 1, Vec::new())]).unwrap();
        hl.set_tuples(&[]).unwrap();
        assert_eq!(hl.as_ref().next(), 123);
        assert_eq!(hl.as_ref().nvalues(), 0);
    }

    #[test]
    fn test_hash_leaf_malformed_offset_is_invalid_state() {
        let mut buf = fresh(PageType::HashLeaf);
        write_u16(&mut buf, HL_NVALUES, 1);
        // Offset points near the end so the name length field overflows.
        write_u16(&mut buf, HL_OFFSETS, (PAGE - 1) as u16);
        let hl = HashLeafRef::new(&buf);
        assert_eq!(hl.tuple(0).unwrap_err().code(), -2);
    }

    #[test]
    fn test_hash_leaf_truncated_name_is_invalid_state() {
        let mut buf = fresh(PageType::HashLeaf);
        write_u16(&mut buf, HL_NVALUES, 1);
        write_u16(&mut buf, HL_OFFSETS, HL_OFFSETS as u16 + 2);
        // Name length claims more bytes than the page holds.
        write_u16(&mut buf, HL_OFFSETS + 2, u16::MAX);
        let hl = HashLeafRef::new(&buf);
        assert!(hl.tuple(0).is_err());
    }

    #[test]
    fn test_hash_leaf_fits() {
        let mut buf = fresh(PageType::HashLeaf);
        let mut hl = HashLeafMut::new(&mut buf);
        assert!(hl.as_ref().fits(10, 0).unwrap());
        // Fill the page with one large tuple; nothing more fits.
        let big = vec![b'x'; PAGE - HL_OFFSETS - LeafTuple::cost(0, 0)];
        hl.set_tuples(&[(big, 1, Vec::new())]).unwrap();
        assert!(!hl.as_ref().fits(1, 0).unwrap());
    }
}
