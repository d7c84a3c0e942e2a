//! Rope tree operations: locate, insert, remove, bulk read/write.

use smallvec::SmallVec;
use tracing::debug;
use varstore_error::{Result, StoreError};
use varstore_types::{PageType, PageTypeMask};
use varstore_pager::{Pager, page};

const LEAF: PageTypeMask = PageTypeMask::DATA_LIST;
const NODE: PageTypeMask = PageTypeMask::INNER_NODE;
const ROPE: PageTypeMask = PageTypeMask::INNER_NODE.union(PageTypeMask::DATA_LIST);

/// Descent depth bound; a deeper path means a corrupt (cyclic) tree.
const MAX_DEPTH: usize = 64;

/// One ancestor recorded during a descent.
#[derive(Debug, Clone, Copy)]
pub(crate) struct PathEntry {
    pgno: u64,
    child_idx: usize,
}

type Path = SmallVec<[PathEntry; 8]>;

/// Leaf position of a logical byte offset.
#[derive(Debug, Clone, Copy)]
pub(crate) struct LeafPos {
    pub(crate) pgno: u64,
    /// Byte offset inside the leaf payload.
    pub(crate) offset: usize,
}

/// A variable's rope, identified by its stable root page.
///
/// The root is always an inner node and its page number never changes:
/// growth redistributes into fresh children below it, so the number
/// doubles as the variable's external id.
#[derive(Debug, Clone, Copy)]
pub struct RpTree {
    root: u64,
}

impl RpTree {
    /// Wrap an existing rope root.
    #[must_use]
    pub fn new(root: u64) -> Self {
        Self { root }
    }

    /// Root page number.
    #[must_use]
    pub fn root(&self) -> u64 {
        self.root
    }

    /// Allocate an empty rope: a root inner node over one empty leaf.
    pub fn create(pager: &mut Pager) -> Result<Self> {
        let leaf = pager.allocate(PageType::DataList)?;
        let root = pager.allocate(PageType::InnerNode)?;
        let mut node_page = pager.edit(NODE, root)?;
        node_page.inner_node_mut().set_entries(&[(leaf, 0)]);
        debug!(root, leaf, "created rope");
        Ok(Self { root })
    }

    /// Logical byte length of the variable.
    pub fn total(&self, pager: &mut Pager) -> Result<u64> {
        Ok(pager.view(NODE, self.root)?.inner_node().total())
    }

    /// Insert `data` at byte offset `b`, shifting everything at and after
    /// `b` rightward. `b == total` appends; `b > total` is rejected.
    pub fn insert(&self, pager: &mut Pager, b: u64, data: &[u8]) -> Result<()> {
        let total = self.total(pager)?;
        if b > total {
            return Err(StoreError::invalid_argument(format!(
                "insert offset {b} past end of variable ({total} bytes)"
            )));
        }
        if data.is_empty() {
            return Ok(());
        }

        let cap = page::data_list_capacity(pager.page_size());
        let (leaf, path) = self.locate(pager, b)?;
        let fill = pager.view(LEAF, leaf.pgno)?.data_list().fill();
        debug_assert!(leaf.offset <= fill);

        // Fast path: the located leaf has room.
        if fill + data.len() <= cap {
            let mut leaf_page = pager.edit(LEAF, leaf.pgno)?;
            let mut dl = leaf_page.data_list_mut();
            dl.shift_payload(leaf.offset, leaf.offset + data.len(), fill - leaf.offset);
            dl.payload_mut()[leaf.offset..leaf.offset + data.len()].copy_from_slice(data);
            dl.set_fill(fill + data.len());
            drop(leaf_page);
            return self.bump_path(pager, &path, data.len() as i64);
        }

        // Boundary case: inserting exactly between two leaves, and the
        // one ending at `b` still has room.
        if leaf.offset == 0 && b > 0 {
            let (prev, prev_path) = self.locate(pager, b - 1)?;
            let prev_fill = pager.view(LEAF, prev.pgno)?.data_list().fill();
            debug_assert_eq!(prev.offset + 1, prev_fill);
            if prev_fill + data.len() <= cap {
                let mut leaf_page = pager.edit(LEAF, prev.pgno)?;
                let mut dl = leaf_page.data_list_mut();
                dl.payload_mut()[prev_fill..prev_fill + data.len()].copy_from_slice(data);
                dl.set_fill(prev_fill + data.len());
                drop(leaf_page);
                return self.bump_path(pager, &prev_path, data.len() as i64);
            }
        }

        self.insert_split(pager, data, leaf, &path)
    }

    /// Remove `nbytes` starting at byte `b`, optionally collecting the
    /// removed bytes. The suffix that started at `b + nbytes` ends up
    /// starting at `b`.
    pub fn remove(
        &self,
        pager: &mut Pager,
        b: u64,
        nbytes: u64,
        mut dst: Option<&mut Vec<u8>>,
    ) -> Result<()> {
        let total = self.total(pager)?;
        let end = b
            .checked_add(nbytes)
            .ok_or_else(|| StoreError::Overflow(format!("remove span at {b} + {nbytes}")))?;
        if end > total {
            return Err(StoreError::invalid_argument(format!(
                "remove range [{b}, {end}) past end of variable ({total} bytes)"
            )));
        }

        let mut remaining = nbytes;
        while remaining > 0 {
            let (leaf, path) = self.locate(pager, b)?;
            let leaf_page = pager.view(LEAF, leaf.pgno)?;
            let dl = leaf_page.data_list();
            let fill = dl.fill();
            let off = leaf.offset;
            if off >= fill {
                return Err(StoreError::invalid_state(format!(
                    "leaf {} shorter than its cumulative key claims",
                    leaf.pgno
                )));
            }
            let take = ((fill - off) as u64).min(remaining) as usize;
            if let Some(out) = dst.as_mut() {
                out.extend_from_slice(&dl.payload()[off..off + take]);
            }
            drop(leaf_page);

            if take == fill {
                // Whole leaf emptied (off == 0): unlink and drop it.
                self.drop_leaf(pager, b, leaf.pgno, &path, take as u64)?;
            } else {
                let mut leaf_page = pager.edit(LEAF, leaf.pgno)?;
                let mut d = leaf_page.data_list_mut();
                d.shift_payload(off + take, off, fill - off - take);
                d.set_fill(fill - take);
                drop(leaf_page);
                self.bump_path(pager, &path, -(take as i64))?;
            }
            remaining -= take as u64;
        }
        Ok(())
    }

    /// Contiguous gather of `out.len()` bytes starting at `b`.
    ///
    /// Random access descends once, then follows leaf next-pointers.
    pub fn read_at(&self, pager: &mut Pager, b: u64, out: &mut [u8]) -> Result<()> {
        if out.is_empty() {
            return Ok(());
        }
        self.check_span(pager, b, out.len() as u64)?;
        let (leaf, _) = self.locate(pager, b)?;
        let mut pgno = leaf.pgno;
        let mut off = leaf.offset;
        let mut copied = 0;
        let mut hops = 0_u64;
        while copied < out.len() {
            if pgno == 0 {
                return Err(StoreError::invalid_state(
                    "leaf chain ended before the variable's full length",
                ));
            }
            hops += 1;
            if hops > pager.npages() {
                return Err(StoreError::invalid_state("cycle in leaf chain"));
            }
            let leaf_page = pager.view(LEAF, pgno)?;
            let dl = leaf_page.data_list();
            let take = (dl.fill() - off).min(out.len() - copied);
            out[copied..copied + take].copy_from_slice(&dl.payload()[off..off + take]);
            pgno = dl.next();
            copied += take;
            off = 0;
        }
        Ok(())
    }

    /// Contiguous in-place scatter of `data` starting at `b`. No
    /// structural change; the span must already exist.
    pub fn write_at(&self, pager: &mut Pager, b: u64, data: &[u8]) -> Result<()> {
        if data.is_empty() {
            return Ok(());
        }
        self.check_span(pager, b, data.len() as u64)?;
        let (leaf, _) = self.locate(pager, b)?;
        let mut pgno = leaf.pgno;
        let mut off = leaf.offset;
        let mut copied = 0;
        let mut hops = 0_u64;
        while copied < data.len() {
            if pgno == 0 {
                return Err(StoreError::invalid_state(
                    "leaf chain ended before the variable's full length",
                ));
            }
            hops += 1;
            if hops > pager.npages() {
                return Err(StoreError::invalid_state("cycle in leaf chain"));
            }
            let mut leaf_page = pager.edit(LEAF, pgno)?;
            let mut dl = leaf_page.data_list_mut();
            let fill = dl.fill();
            let take = (fill - off).min(data.len() - copied);
            dl.payload_mut()[off..off + take].copy_from_slice(&data[copied..copied + take]);
            pgno = dl.next();
            copied += take;
            off = 0;
        }
        Ok(())
    }

    /// Free every page of this rope (variable deletion).
    pub fn free_pages(&self, pager: &mut Pager) -> Result<()> {
        let mut stack = vec![self.root];
        while let Some(pgno) = stack.pop() {
            let rope_page = pager.view(ROPE, pgno)?;
            if rope_page.page_type() == PageType::InnerNode {
                let node = rope_page.inner_node();
                for i in 0..node.nkeys() {
                    stack.push(node.child(i));
                }
            }
            drop(rope_page);
            pager.free(pgno)?;
        }
        Ok(())
    }

    /// Walk the whole rope checking structural invariants; returns the
    /// logical size. Useful for tests and corruption triage.
    pub fn validate(&self, pager: &mut Pager) -> Result<u64> {
        let mut leaves = Vec::new();
        let total = self.validate_subtree(pager, self.root, 0, &mut leaves)?;
        // Leaves must chain left-to-right in key order.
        for window in leaves.windows(2) {
            let next = pager.view(LEAF, window[0])?.data_list().next();
            if next != window[1] {
                return Err(StoreError::invalid_state(format!(
                    "leaf {} chains to {next}, expected {}",
                    window[0], window[1]
                )));
            }
        }
        let leaf_sum: u64 = {
            let mut sum = 0;
            for &pgno in &leaves {
                sum += pager.view(LEAF, pgno)?.data_list().fill() as u64;
            }
            sum
        };
        if leaf_sum != total {
            return Err(StoreError::invalid_state(format!(
                "leaf fills sum to {leaf_sum}, root claims {total}"
            )));
        }
        Ok(total)
    }

    fn validate_subtree(
        &self,
        pager: &mut Pager,
        pgno: u64,
        depth: usize,
        leaves: &mut Vec<u64>,
    ) -> Result<u64> {
        if depth > MAX_DEPTH {
            return Err(StoreError::invalid_state("rope deeper than the depth bound"));
        }
        let rope_page = pager.view(ROPE, pgno)?;
        match rope_page.page_type() {
            PageType::DataList => {
                let fill = rope_page.data_list().fill() as u64;
                leaves.push(pgno);
                Ok(fill)
            }
            _ => {
                let node = rope_page.inner_node();
                node.check_keys()?;
                let nkeys = node.nkeys();
                let entries: Vec<(u64, u64)> =
                    (0..nkeys).map(|i| (node.child(i), node.child_size(i))).collect();
                let claimed = node.total();
                drop(rope_page);
                let mut sum = 0;
                for (child, size) in entries {
                    let child_total = self.validate_subtree(pager, child, depth + 1, leaves)?;
                    if child_total != size {
                        return Err(StoreError::invalid_state(format!(
                            "child {child} holds {child_total} bytes, parent key says {size}"
                        )));
                    }
                    sum += child_total;
                }
                if sum != claimed {
                    return Err(StoreError::invalid_state(format!(
                        "node {pgno} children sum to {sum}, node claims {claimed}"
                    )));
                }
                Ok(sum)
            }
        }
    }

    /// Descend to the leaf holding logical offset `b`, recording the
    /// ancestor stack. `b == total` clamps into the rightmost leaf (the
    /// append position).
    pub(crate) fn locate(&self, pager: &mut Pager, b: u64) -> Result<(LeafPos, Path)> {
        let mut pgno = self.root;
        let mut rel = b;
        let mut path = Path::new();
        loop {
            if path.len() > MAX_DEPTH {
                return Err(StoreError::invalid_state("rope deeper than the depth bound"));
            }
            let rope_page = pager.view(ROPE, pgno)?;
            match rope_page.page_type() {
                PageType::DataList => {
                    return Ok((
                        LeafPos {
                            pgno,
                            offset: rel as usize,
                        },
                        path,
                    ));
                }
                _ => {
                    let node = rope_page.inner_node();
                    if node.nkeys() == 0 {
                        return Err(StoreError::invalid_state(format!(
                            "inner node {pgno} has no children"
                        )));
                    }
                    let (idx, start) = node.find_child(rel);
                    let child = node.child(idx);
                    path.push(PathEntry {
                        pgno,
                        child_idx: idx,
                    });
                    rel -= start;
                    pgno = child;
                }
            }
        }
    }

    fn check_span(&self, pager: &mut Pager, b: u64, len: u64) -> Result<()> {
        let total = self.total(pager)?;
        let end = b
            .checked_add(len)
            .ok_or_else(|| StoreError::Overflow(format!("span at {b} + {len}")))?;
        if end > total {
            return Err(StoreError::invalid_argument(format!(
                "byte range [{b}, {end}) past end of variable ({total} bytes)"
            )));
        }
        Ok(())
    }

    /// Add `delta` to the cumulative keys at and right of the descent
    /// path, at every recorded ancestor.
    fn bump_path(&self, pager: &mut Pager, path: &[PathEntry], delta: i64) -> Result<()> {
        for entry in path {
            let mut node_page = pager.edit(NODE, entry.pgno)?;
            node_page.inner_node_mut().bump_keys_from(entry.child_idx, delta);
        }
        Ok(())
    }

    /// Split-based insert: the located leaf keeps its prefix, fresh
    /// leaves take the new data and the displaced tail, and the parent
    /// levels absorb the new children (splitting upward as needed).
    fn insert_split(
        &self,
        pager: &mut Pager,
        data: &[u8],
        leaf: LeafPos,
        path: &[PathEntry],
    ) -> Result<()> {
        let cap = page::data_list_capacity(pager.page_size());
        let off = leaf.offset;
        let (old_next, tail) = {
            let leaf_page = pager.view(LEAF, leaf.pgno)?;
            let dl = leaf_page.data_list();
            (dl.next(), dl.payload()[off..].to_vec())
        };

        // Bytes that no longer fit where they were: the new data plus the
        // displaced tail of the original leaf.
        let mut rest = Vec::with_capacity(data.len() + tail.len());
        rest.extend_from_slice(data);
        rest.extend_from_slice(&tail);

        // Top the original leaf up to capacity, then chain full leaves.
        let take0 = (cap - off).min(rest.len());
        let chunks: Vec<&[u8]> = rest[take0..].chunks(cap).collect();
        debug_assert!(!chunks.is_empty(), "split reached with a fitting insert");

        let mut new_leaves: Vec<(u64, u64)> = Vec::with_capacity(chunks.len());
        for chunk in &chunks {
            new_leaves.push((pager.allocate(PageType::DataList)?, chunk.len() as u64));
        }

        {
            let mut leaf_page = pager.edit(LEAF, leaf.pgno)?;
            let mut dl = leaf_page.data_list_mut();
            dl.payload_mut()[off..off + take0].copy_from_slice(&rest[..take0]);
            dl.set_fill(off + take0);
            dl.set_next(new_leaves.first().map_or(old_next, |&(pgno, _)| pgno));
        }
        for (i, chunk) in chunks.iter().enumerate() {
            let (pgno, _) = new_leaves[i];
            let next = new_leaves.get(i + 1).map_or(old_next, |&(p, _)| p);
            let mut leaf_page = pager.edit(LEAF, pgno)?;
            let mut dl = leaf_page.data_list_mut();
            dl.payload_mut()[..chunk.len()].copy_from_slice(chunk);
            dl.set_fill(chunk.len());
            dl.set_next(next);
        }

        let mut replacements = Vec::with_capacity(1 + new_leaves.len());
        replacements.push((leaf.pgno, (off + take0) as u64));
        replacements.extend_from_slice(&new_leaves);
        debug!(
            leaf = leaf.pgno,
            new = new_leaves.len(),
            bytes = data.len(),
            "leaf split"
        );
        self.rebuild_upward(pager, path, replacements, data.len() as i64)
    }

    /// Unlink an emptied leaf from the chain and from its ancestors.
    fn drop_leaf(
        &self,
        pager: &mut Pager,
        b: u64,
        leaf_pgno: u64,
        path: &[PathEntry],
        size: u64,
    ) -> Result<()> {
        let next = pager.view(LEAF, leaf_pgno)?.data_list().next();
        if b > 0 {
            let (prev, _) = self.locate(pager, b - 1)?;
            let mut prev_page = pager.edit(LEAF, prev.pgno)?;
            prev_page.data_list_mut().set_next(next);
        }
        pager.free(leaf_pgno)?;
        self.rebuild_upward(pager, path, Vec::new(), -(size as i64))
    }

    /// Replace the child on the descent path with `replacements`
    /// (possibly none), splitting or collapsing ancestors as required
    /// and shifting the cumulative keys above by `delta`.
    fn rebuild_upward(
        &self,
        pager: &mut Pager,
        path: &[PathEntry],
        mut replacements: Vec<(u64, u64)>,
        delta: i64,
    ) -> Result<()> {
        let node_cap = page::inner_node_capacity(pager.page_size());
        let mut level = path.len();
        while level > 0 {
            level -= 1;
            let entry = path[level];
            let mut entries = self.node_entries(pager, entry.pgno)?;
            entries.splice(entry.child_idx..=entry.child_idx, replacements.iter().copied());

            if entries.is_empty() {
                // Subtree vanished. The root never vanishes: it reverts
                // to a single empty leaf.
                if level == 0 {
                    let fresh = pager.allocate(PageType::DataList)?;
                    let mut node_page = pager.edit(NODE, entry.pgno)?;
                    node_page.inner_node_mut().set_entries(&[(fresh, 0)]);
                    return Ok(());
                }
                pager.free(entry.pgno)?;
                replacements = Vec::new();
                continue;
            }

            if entries.len() <= node_cap {
                let mut node_page = pager.edit(NODE, entry.pgno)?;
                node_page.inner_node_mut().set_entries(&entries);
                drop(node_page);
                return self.bump_path(pager, &path[..level], delta);
            }

            if level == 0 {
                // The root overflowed. Its page number is the variable's
                // id, so pack the entries into fresh levels beneath it.
                let mut list = entries;
                while list.len() > node_cap {
                    let mut packed = Vec::with_capacity(list.len().div_ceil(node_cap));
                    for group in balanced_chunks(&list, node_cap) {
                        let pgno = pager.allocate(PageType::InnerNode)?;
                        let size: u64 = group.iter().map(|&(_, s)| s).sum();
                        let mut node_page = pager.edit(NODE, pgno)?;
                        node_page.inner_node_mut().set_entries(group);
                        drop(node_page);
                        packed.push((pgno, size));
                    }
                    list = packed;
                }
                let mut node_page = pager.edit(NODE, entry.pgno)?;
                node_page.inner_node_mut().set_entries(&list);
                debug!(root = entry.pgno, "rope grew in height");
                return Ok(());
            }

            // Interior overflow: split into sibling nodes, reusing this
            // page for the first group, and push the list up a level.
            let groups = balanced_chunks(&entries, node_cap);
            let mut node_list = Vec::with_capacity(groups.len());
            for (i, group) in groups.iter().enumerate() {
                let pgno = if i == 0 {
                    entry.pgno
                } else {
                    pager.allocate(PageType::InnerNode)?
                };
                let size: u64 = group.iter().map(|&(_, s)| s).sum();
                let mut node_page = pager.edit(NODE, pgno)?;
                node_page.inner_node_mut().set_entries(group);
                drop(node_page);
                node_list.push((pgno, size));
            }
            replacements = node_list;
        }
        Err(StoreError::invalid_state(
            "rope descent path exhausted during rebuild",
        ))
    }

    fn node_entries(&self, pager: &mut Pager, pgno: u64) -> Result<Vec<(u64, u64)>> {
        let node_page = pager.view(NODE, pgno)?;
        let node = node_page.inner_node();
        Ok((0..node.nkeys())
            .map(|i| (node.child(i), node.child_size(i)))
            .collect())
    }
}

/// Partition `entries` into the fewest groups of at most `cap`, sized as
/// evenly as possible (no runt last group).
fn balanced_chunks<T>(entries: &[T], cap: usize) -> Vec<&[T]> {
    let ngroups = entries.len().div_ceil(cap);
    let base = entries.len() / ngroups;
    let rem = entries.len() % ngroups;
    let mut out = Vec::with_capacity(ngroups);
    let mut at = 0;
    for g in 0..ngroups {
        let take = base + usize::from(g < rem);
        out.push(&entries[at..at + take]);
        at += take;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use varstore_types::DbHeader;

    // Small pages force splits early: leaf capacity 499 bytes, inner
    // capacity 31 children.
    const HEADER: DbHeader = DbHeader {
        page_size: 512,
        buffer_pool_len: 8,
    };

    fn open(dir: &TempDir) -> Pager {
        Pager::open(
            &dir.path().join("t.db"),
            &dir.path().join("t.wal"),
            Some(HEADER),
        )
        .unwrap()
    }

    fn bytes(range: std::ops::Range<u32>) -> Vec<u8> {
        range.flat_map(u32::to_le_bytes).collect()
    }

    fn read_all(tree: &RpTree, pager: &mut Pager) -> Vec<u8> {
        let total = tree.total(pager).unwrap();
        let mut out = vec![0_u8; total as usize];
        tree.read_at(pager, 0, &mut out).unwrap();
        out
    }

    #[test]
    fn test_create_is_empty_and_valid() {
        let dir = TempDir::new().unwrap();
        let mut pager = open(&dir);
        let tree = RpTree::create(&mut pager).unwrap();
        assert_eq!(tree.total(&mut pager).unwrap(), 0);
        assert_eq!(tree.validate(&mut pager).unwrap(), 0);
    }

    #[test]
    fn test_insert_within_one_leaf() {
        let dir = TempDir::new().unwrap();
        let mut pager = open(&dir);
        let tree = RpTree::create(&mut pager).unwrap();
        tree.insert(&mut pager, 0, b"hello world").unwrap();
        assert_eq!(tree.total(&mut pager).unwrap(), 11);
        assert_eq!(read_all(&tree, &mut pager), b"hello world");
        tree.validate(&mut pager).unwrap();
    }

    #[test]
    fn test_insert_middle_within_leaf() {
        let dir = TempDir::new().unwrap();
        let mut pager = open(&dir);
        let tree = RpTree::create(&mut pager).unwrap();
        tree.insert(&mut pager, 0, b"helloworld").unwrap();
        tree.insert(&mut pager, 5, b", ").unwrap();
        assert_eq!(read_all(&tree, &mut pager), b"hello, world");
        tree.validate(&mut pager).unwrap();
    }

    #[test]
    fn test_append_grows_across_leaves() {
        let dir = TempDir::new().unwrap();
        let mut pager = open(&dir);
        let tree = RpTree::create(&mut pager).unwrap();
        // ~8 KiB in 1 KiB appends: a fan of leaves under one root.
        let mut expected = Vec::new();
        for i in 0_u32..8 {
            let chunk = vec![i as u8; 1024];
            let at = tree.total(&mut pager).unwrap();
            tree.insert(&mut pager, at, &chunk).unwrap();
            expected.extend_from_slice(&chunk);
        }
        assert_eq!(tree.total(&mut pager).unwrap(), expected.len() as u64);
        assert_eq!(read_all(&tree, &mut pager), expected);
        tree.validate(&mut pager).unwrap();
    }

    #[test]
    fn test_large_insert_grows_height() {
        let dir = TempDir::new().unwrap();
        let mut pager = open(&dir);
        let tree = RpTree::create(&mut pager).unwrap();
        // 20000 ints = 80 KB >> 31 children * 499 bytes, so the root
        // must have packed at least one extra level.
        let data = bytes(0..20000);
        tree.insert(&mut pager, 0, &data).unwrap();
        assert_eq!(tree.total(&mut pager).unwrap(), data.len() as u64);
        assert_eq!(read_all(&tree, &mut pager), data);
        tree.validate(&mut pager).unwrap();
        // Root page number is unchanged by the growth.
        let root_page = pager.view(PageTypeMask::INNER_NODE, tree.root()).unwrap();
        assert!(root_page.inner_node().nkeys() > 1);
    }

    #[test]
    fn test_insert_in_middle_shifts_suffix() {
        let dir = TempDir::new().unwrap();
        let mut pager = open(&dir);
        let tree = RpTree::create(&mut pager).unwrap();
        let base = bytes(0..5000);
        tree.insert(&mut pager, 0, &base).unwrap();

        let wedge = bytes(90000..91000);
        tree.insert(&mut pager, 2500 * 4, &wedge).unwrap();

        let mut expected = base[..10000].to_vec();
        expected.extend_from_slice(&wedge);
        expected.extend_from_slice(&base[10000..]);
        assert_eq!(read_all(&tree, &mut pager), expected);
        tree.validate(&mut pager).unwrap();
    }

    #[test]
    fn test_insert_past_end_rejected() {
        let dir = TempDir::new().unwrap();
        let mut pager = open(&dir);
        let tree = RpTree::create(&mut pager).unwrap();
        tree.insert(&mut pager, 0, b"abc").unwrap();
        let err = tree.insert(&mut pager, 4, b"x").unwrap_err();
        assert_eq!(err.code(), -3);
        // Exactly at the end is an append.
        tree.insert(&mut pager, 3, b"def").unwrap();
        assert_eq!(read_all(&tree, &mut pager), b"abcdef");
    }

    #[test]
    fn test_empty_insert_is_noop() {
        let dir = TempDir::new().unwrap();
        let mut pager = open(&dir);
        let tree = RpTree::create(&mut pager).unwrap();
        tree.insert(&mut pager, 0, &[]).unwrap();
        assert_eq!(tree.total(&mut pager).unwrap(), 0);
    }

    #[test]
    fn test_boundary_insert_uses_prior_leaf() {
        let dir = TempDir::new().unwrap();
        let mut pager = open(&dir);
        let tree = RpTree::create(&mut pager).unwrap();
        let cap = page::data_list_capacity(pager.page_size());

        // Two full-ish leaves, then carve room in the first one.
        tree.insert(&mut pager, 0, &vec![1_u8; cap]).unwrap();
        tree.insert(&mut pager, cap as u64, &vec![2_u8; cap]).unwrap();
        tree.remove(&mut pager, 10, 20, None).unwrap();

        // Insert at the (now shifted) boundary between the two leaves.
        let boundary = (cap - 20) as u64;
        tree.insert(&mut pager, boundary, &[9_u8; 5]).unwrap();

        let all = read_all(&tree, &mut pager);
        assert_eq!(&all[boundary as usize..boundary as usize + 5], &[9_u8; 5]);
        assert_eq!(all.len(), 2 * cap - 20 + 5);
        tree.validate(&mut pager).unwrap();
    }

    #[test]
    fn test_write_at_overwrites_in_place() {
        let dir = TempDir::new().unwrap();
        let mut pager = open(&dir);
        let tree = RpTree::create(&mut pager).unwrap();
        let data = bytes(0..2000);
        tree.insert(&mut pager, 0, &data).unwrap();

        let patch = bytes(77000..77100);
        tree.write_at(&mut pager, 1000, &patch).unwrap();

        let mut expected = data.clone();
        expected[1000..1400].copy_from_slice(&patch);
        assert_eq!(read_all(&tree, &mut pager), expected);
        tree.validate(&mut pager).unwrap();
    }

    #[test]
    fn test_write_past_end_rejected() {
        let dir = TempDir::new().unwrap();
        let mut pager = open(&dir);
        let tree = RpTree::create(&mut pager).unwrap();
        tree.insert(&mut pager, 0, &[0_u8; 100]).unwrap();
        assert_eq!(
            tree.write_at(&mut pager, 96, &[1_u8; 5]).unwrap_err().code(),
            -3
        );
        assert_eq!(
            tree.read_at(&mut pager, 0, &mut [0_u8; 101]).unwrap_err().code(),
            -3
        );
    }

    #[test]
    fn test_remove_contiguous_middle() {
        let dir = TempDir::new().unwrap();
        let mut pager = open(&dir);
        let tree = RpTree::create(&mut pager).unwrap();
        let data = bytes(0..3000);
        tree.insert(&mut pager, 0, &data).unwrap();

        let mut removed = Vec::new();
        tree.remove(&mut pager, 4000, 4000, Some(&mut removed)).unwrap();

        assert_eq!(removed, &data[4000..8000]);
        let mut expected = data[..4000].to_vec();
        expected.extend_from_slice(&data[8000..]);
        assert_eq!(read_all(&tree, &mut pager), expected);
        tree.validate(&mut pager).unwrap();
    }

    #[test]
    fn test_remove_spanning_many_leaves() {
        let dir = TempDir::new().unwrap();
        let mut pager = open(&dir);
        let tree = RpTree::create(&mut pager).unwrap();
        let data = bytes(0..5000);
        tree.insert(&mut pager, 0, &data).unwrap();

        // Remove 10 KB from the middle: whole leaves plus partials.
        tree.remove(&mut pager, 5000, 10000, None).unwrap();
        let mut expected = data[..5000].to_vec();
        expected.extend_from_slice(&data[15000..]);
        assert_eq!(read_all(&tree, &mut pager), expected);
        tree.validate(&mut pager).unwrap();
    }

    #[test]
    fn test_remove_everything_resets_to_empty() {
        let dir = TempDir::new().unwrap();
        let mut pager = open(&dir);
        let tree = RpTree::create(&mut pager).unwrap();
        let data = bytes(0..4000);
        tree.insert(&mut pager, 0, &data).unwrap();
        tree.remove(&mut pager, 0, data.len() as u64, None).unwrap();
        assert_eq!(tree.total(&mut pager).unwrap(), 0);
        tree.validate(&mut pager).unwrap();
        // The emptied rope accepts new data.
        tree.insert(&mut pager, 0, b"again").unwrap();
        assert_eq!(read_all(&tree, &mut pager), b"again");
    }

    #[test]
    fn test_remove_past_end_rejected() {
        let dir = TempDir::new().unwrap();
        let mut pager = open(&dir);
        let tree = RpTree::create(&mut pager).unwrap();
        tree.insert(&mut pager, 0, &[0_u8; 10]).unwrap();
        assert_eq!(tree.remove(&mut pager, 5, 6, None).unwrap_err().code(), -3);
    }

    #[test]
    fn test_interleaved_inserts_and_removes_stay_valid() {
        let dir = TempDir::new().unwrap();
        let mut pager = open(&dir);
        let tree = RpTree::create(&mut pager).unwrap();
        let mut model: Vec<u8> = Vec::new();

        let ops: [(bool, u64, u32); 12] = [
            (true, 0, 1200),
            (true, 600, 800),
            (false, 100, 300),
            (true, 0, 500),
            (false, 1500, 600),
            (true, 900, 2000),
            (false, 0, 100),
            (true, 3000, 700),
            (false, 2000, 1500),
            (true, 1000, 50),
            (false, 500, 500),
            (true, 2000, 10),
        ];
        let mut seed = 1_u8;
        for (is_insert, at, len) in ops {
            if is_insert {
                let chunk: Vec<u8> = (0..len).map(|i| seed.wrapping_add(i as u8)).collect();
                seed = seed.wrapping_add(17);
                tree.insert(&mut pager, at, &chunk).unwrap();
                model.splice(at as usize..at as usize, chunk);
            } else {
                tree.remove(&mut pager, at, u64::from(len), None).unwrap();
                model.drain(at as usize..(at + u64::from(len)) as usize);
            }
            assert_eq!(tree.validate(&mut pager).unwrap(), model.len() as u64);
            assert_eq!(read_all(&tree, &mut pager), model);
        }
    }

    #[test]
    fn test_free_pages_tombstones_whole_rope() {
        let dir = TempDir::new().unwrap();
        let mut pager = open(&dir);
        let tree = RpTree::create(&mut pager).unwrap();
        tree.insert(&mut pager, 0, &bytes(0..2000)).unwrap();
        tree.free_pages(&mut pager).unwrap();
        assert!(pager.view(PageTypeMask::INNER_NODE, tree.root()).is_err());
    }
}
