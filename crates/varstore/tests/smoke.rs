//! Smoke test over the facade's re-exported surface: everything a user
//! touches must be reachable from the `varstore` crate alone.

use tempfile::TempDir;
use varstore::{Store, StoreError, StoreOptions, Stride};

fn ints(range: std::ops::Range<i32>) -> Vec<u8> {
    range.flat_map(i32::to_le_bytes).collect()
}

#[test]
fn end_to_end_through_the_facade() {
    let dir = TempDir::new().unwrap();
    let db = dir.path().join("smoke.db");
    let wal = dir.path().join("smoke.wal");

    {
        let mut store = Store::open_with(
            &db,
            &wal,
            StoreOptions {
                page_size: 2048,
                pool_pages: 16,
            },
        )
        .unwrap();
        let id = store.new_var(None, "samples").unwrap();
        store.insert(id, None, &ints(0..5_000), 0, 4, 5_000).unwrap();

        // Transactional update, decimated read, then commit.
        let txn = store.begin_txn().unwrap();
        let comb = Stride {
            bstart: 0,
            stride: 10,
            nelems: 500,
        };
        store
            .write(id, Some(&txn), &ints(-500..0), 4, comb)
            .unwrap();
        let mut decimated = vec![0_u8; 500 * 4];
        store.read(id, &mut decimated, 4, comb).unwrap();
        assert_eq!(decimated, ints(-500..0));
        store.commit(txn).unwrap();
        store.close().unwrap();
    }

    let mut store = Store::open(&db, &wal).unwrap();
    let id = store.get_var_id("samples").unwrap();
    assert_eq!(store.fsize(id).unwrap(), 20_000);

    let mut all = vec![0_u8; 20_000];
    store.read(id, &mut all, 4, Stride::contiguous(0, 5_000)).unwrap();
    let values: Vec<i32> = all
        .chunks_exact(4)
        .map(|c| i32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect();
    for (i, &v) in values.iter().enumerate() {
        let expected = if i % 10 == 0 && i / 10 < 500 {
            -500 + (i / 10) as i32
        } else {
            i as i32
        };
        assert_eq!(v, expected, "element {i}");
    }

    // Error surface is re-exported too.
    let err = store.get_var_id("missing").unwrap_err();
    assert!(matches!(err, StoreError::DoesntExist { .. }));
    assert_eq!(err.code(), -5);
    assert!(store.last_error().is_some());
}
