//! Property tests for the rope's round-trip laws.

use proptest::prelude::*;
use tempfile::TempDir;
use varstore_pager::Pager;
use varstore_rptree::{RpTree, read_strided, remove_strided, write_strided};
use varstore_types::{DbHeader, Stride};

const HEADER: DbHeader = DbHeader {
    page_size: 512,
    buffer_pool_len: 8,
};

fn fresh_rope(dir: &TempDir) -> (Pager, RpTree) {
    let mut pager = Pager::open(
        &dir.path().join("p.db"),
        &dir.path().join("p.wal"),
        Some(HEADER),
    )
    .unwrap();
    let tree = RpTree::create(&mut pager).unwrap();
    (pager, tree)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    /// Any sequence of contiguous inserts reads back as the model built
    /// by splicing the same chunks at the same offsets.
    #[test]
    fn contiguous_inserts_read_back_in_order(
        chunks in prop::collection::vec((0_u16..2048, 1_usize..700, any::<u8>()), 1..12)
    ) {
        let dir = TempDir::new().unwrap();
        let (mut pager, tree) = fresh_rope(&dir);
        let mut model: Vec<u8> = Vec::new();

        for (at_raw, len, seed) in chunks {
            let at = u64::from(at_raw) % (model.len() as u64 + 1);
            let chunk: Vec<u8> = (0..len).map(|i| seed.wrapping_add(i as u8)).collect();
            tree.insert(&mut pager, at, &chunk).unwrap();
            model.splice(at as usize..at as usize, chunk);
        }

        prop_assert_eq!(tree.validate(&mut pager).unwrap(), model.len() as u64);
        let mut out = vec![0_u8; model.len()];
        tree.read_at(&mut pager, 0, &mut out).unwrap();
        prop_assert_eq!(out, model);
    }

    /// `write(stride)` then `read(stride)` over the same descriptor
    /// returns the written buffer bit-exactly.
    #[test]
    fn strided_write_read_is_identity(
        elems in 64_u64..600,
        bstart_e in 0_u64..16,
        stride in 1_u64..9,
        seed in any::<u8>(),
    ) {
        let w = 4_u64;
        let dir = TempDir::new().unwrap();
        let (mut pager, tree) = fresh_rope(&dir);
        let base: Vec<u8> = (0..elems * w).map(|i| (i % 251) as u8).collect();
        tree.insert(&mut pager, 0, &base).unwrap();

        // Largest nelems that stays inside the variable.
        let avail = elems.saturating_sub(bstart_e);
        let nelems = if avail == 0 { 0 } else { 1 + (avail - 1) / stride };
        let descriptor = Stride { bstart: bstart_e * w, stride, nelems };

        let payload: Vec<u8> = (0..nelems * w).map(|i| seed.wrapping_add(i as u8)).collect();
        let wrote = write_strided(&mut pager, &tree, &payload, w, descriptor).unwrap();
        prop_assert_eq!(wrote, nelems);

        let mut got = vec![0_u8; payload.len()];
        let read = read_strided(&mut pager, &tree, &mut got, w, descriptor).unwrap();
        prop_assert_eq!(read, nelems);
        prop_assert_eq!(got, payload);
        tree.validate(&mut pager).unwrap();
    }

    /// Removing `n` contiguous elements shrinks the variable by `n * w`
    /// and the suffix slides into place.
    #[test]
    fn contiguous_remove_shifts_suffix(
        elems in 32_u64..500,
        cut_at in 0_u64..32,
        cut_len in 1_u64..64,
    ) {
        let w = 4_u64;
        let dir = TempDir::new().unwrap();
        let (mut pager, tree) = fresh_rope(&dir);
        let base: Vec<u8> = (0..(elems * w) as u32).flat_map(|i| [i as u8]).collect();
        tree.insert(&mut pager, 0, &base).unwrap();

        let cut_at = cut_at.min(elems - 1);
        let cut_len = cut_len.min(elems - cut_at);
        let descriptor = Stride::contiguous(cut_at * w, cut_len);

        let mut removed = Vec::new();
        remove_strided(&mut pager, &tree, Some(&mut removed), w, descriptor).unwrap();

        let cut_bytes = (cut_at * w) as usize..((cut_at + cut_len) * w) as usize;
        prop_assert_eq!(&removed[..], &base[cut_bytes.clone()]);

        let total = tree.total(&mut pager).unwrap();
        prop_assert_eq!(total, (elems - cut_len) * w);

        let mut rest = vec![0_u8; total as usize];
        tree.read_at(&mut pager, 0, &mut rest).unwrap();
        let mut expected = base.clone();
        expected.drain(cut_bytes);
        prop_assert_eq!(rest, expected);
        tree.validate(&mut pager).unwrap();
    }
}
