//! Direct page I/O against the database file.
//!
//! No caching happens here; every byte of page memory lives in the
//! buffer pool. The file length invariant is `header + page_size * npages`
//! at all times, and page numbers are allocated monotonically by growing
//! the file one page at a time.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};

use hashbrown::HashSet;
use tracing::{error, warn};
use varstore_error::{Result, StoreError};
use varstore_types::DB_HEADER_LEN;

/// Pager that reads and writes fixed-size pages directly from the file.
#[derive(Debug)]
pub struct FilePager {
    file: File,
    page_size: u64,
    npages: u64,
    /// Tombstones for freed pages. Pages are never reclaimed (the file
    /// does not shrink and numbers are not reissued); the set only guards
    /// against reads or writes through a stale page number.
    freed: HashSet<u64>,
}

impl FilePager {
    /// Wrap an open database file whose header has already been written.
    ///
    /// Verifies the length invariant and derives the page count from it.
    pub fn open(file: File, page_size: u32) -> Result<Self> {
        let page_size = u64::from(page_size);
        let size = file.metadata()?.len();
        if size < DB_HEADER_LEN {
            error!(size, "database file shorter than its header");
            return Err(StoreError::invalid_state(
                "database file shorter than its header",
            ));
        }
        if (size - DB_HEADER_LEN) % page_size != 0 {
            error!(
                size,
                page_size, "database file length is not header + whole pages"
            );
            return Err(StoreError::invalid_state(format!(
                "database file length {size} is not header + a multiple of {page_size}"
            )));
        }
        Ok(Self {
            file,
            page_size,
            npages: (size - DB_HEADER_LEN) / page_size,
            freed: HashSet::new(),
        })
    }

    /// Number of pages currently in the file.
    #[must_use]
    pub fn npages(&self) -> u64 {
        self.npages
    }

    /// Extend the file by one page and return the new page number.
    pub fn allocate(&mut self) -> Result<u64> {
        let pgno = self.npages;
        let new_len = DB_HEADER_LEN + self.page_size * (pgno + 1);
        self.file.set_len(new_len)?;
        self.npages = pgno + 1;
        Ok(pgno)
    }

    /// Read page `pgno` into `buf`.
    pub fn read_page(&mut self, pgno: u64, buf: &mut [u8]) -> Result<()> {
        self.check_live(pgno)?;
        self.check_buf(buf.len())?;
        self.file.seek(SeekFrom::Start(self.offset_of(pgno)))?;
        self.file.read_exact(buf).map_err(|err| {
            warn!(pgno, %err, "short read inside a page");
            StoreError::invalid_state(format!("short read of page {pgno}: {err}"))
        })
    }

    /// Write exactly one page at `pgno`.
    pub fn write_page(&mut self, pgno: u64, buf: &[u8]) -> Result<()> {
        self.check_live(pgno)?;
        self.check_buf(buf.len())?;
        self.file.seek(SeekFrom::Start(self.offset_of(pgno)))?;
        self.file.write_all(buf)?;
        Ok(())
    }

    /// Write a recovered or checkpointed WAL frame, growing the page
    /// count when the frame addresses a page past the current end (the
    /// crash may have happened before the allocation reached the file).
    pub fn apply_frame(&mut self, pgno: u64, buf: &[u8]) -> Result<()> {
        self.check_buf(buf.len())?;
        if self.freed.contains(&pgno) {
            return Err(StoreError::invalid_state(format!(
                "WAL frame addresses freed page {pgno}"
            )));
        }
        if pgno >= self.npages {
            self.file
                .set_len(DB_HEADER_LEN + self.page_size * (pgno + 1))?;
            self.npages = pgno + 1;
        }
        self.file.seek(SeekFrom::Start(self.offset_of(pgno)))?;
        self.file.write_all(buf)?;
        Ok(())
    }

    /// Tombstone `pgno`.
    ///
    /// Freed pages are not reclaimed; this only makes later access through
    /// the number an error instead of silent reuse.
    pub fn free(&mut self, pgno: u64) -> Result<()> {
        self.check_live(pgno)?;
        self.freed.insert(pgno);
        Ok(())
    }

    /// Whether `pgno` has been freed.
    #[must_use]
    pub fn is_freed(&self, pgno: u64) -> bool {
        self.freed.contains(&pgno)
    }

    /// Flush file contents to stable storage.
    pub fn sync(&mut self) -> Result<()> {
        self.file.sync_data()?;
        Ok(())
    }

    fn offset_of(&self, pgno: u64) -> u64 {
        DB_HEADER_LEN + pgno * self.page_size
    }

    fn check_live(&self, pgno: u64) -> Result<()> {
        if pgno >= self.npages {
            return Err(StoreError::invalid_state(format!(
                "page {pgno} is past the end of the file ({} pages)",
                self.npages
            )));
        }
        if self.freed.contains(&pgno) {
            return Err(StoreError::invalid_state(format!("page {pgno} was freed")));
        }
        Ok(())
    }

    fn check_buf(&self, len: usize) -> Result<()> {
        if len as u64 == self.page_size {
            Ok(())
        } else {
            Err(StoreError::invalid_state(format!(
                "page buffer is {len} bytes, page size is {}",
                self.page_size
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::OpenOptions;
    use tempfile::TempDir;

    const PAGE: u32 = 2048;

    fn db_file(dir: &TempDir, initial_len: u64) -> File {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(dir.path().join("test.db"))
            .unwrap();
        file.set_len(initial_len).unwrap();
        file
    }

    #[test]
    fn test_open_rejects_short_file() {
        let dir = TempDir::new().unwrap();
        let err = FilePager::open(db_file(&dir, 7), PAGE).unwrap_err();
        assert_eq!(err.code(), -2);
    }

    #[test]
    fn test_open_rejects_partial_page() {
        let dir = TempDir::new().unwrap();
        let len = DB_HEADER_LEN + u64::from(PAGE) / 2;
        let err = FilePager::open(db_file(&dir, len), PAGE).unwrap_err();
        assert_eq!(err.code(), -2);
    }

    #[test]
    fn test_open_counts_pages() {
        let dir = TempDir::new().unwrap();
        let pager = FilePager::open(db_file(&dir, DB_HEADER_LEN), PAGE).unwrap();
        assert_eq!(pager.npages(), 0);

        let len = DB_HEADER_LEN + 3 * u64::from(PAGE);
        let pager = FilePager::open(db_file(&dir, len), PAGE).unwrap();
        assert_eq!(pager.npages(), 3);
    }

    #[test]
    fn test_allocate_is_monotone_and_grows_file() {
        let dir = TempDir::new().unwrap();
        let mut pager = FilePager::open(db_file(&dir, DB_HEADER_LEN), PAGE).unwrap();
        for expected in 0_u64..3 {
            assert_eq!(pager.allocate().unwrap(), expected);
            assert_eq!(pager.npages(), expected + 1);
        }
        let meta_len = pager.file.metadata().unwrap().len();
        assert_eq!(meta_len, DB_HEADER_LEN + 3 * u64::from(PAGE));
    }

    #[test]
    fn test_write_then_read_round_trip() {
        let dir = TempDir::new().unwrap();
        let mut pager = FilePager::open(db_file(&dir, DB_HEADER_LEN), PAGE).unwrap();
        let pgno = pager.allocate().unwrap();

        let data: Vec<u8> = (0..PAGE).map(|i| i as u8).collect();
        pager.write_page(pgno, &data).unwrap();

        let mut read_back = vec![0xFF_u8; PAGE as usize];
        pager.read_page(pgno, &mut read_back).unwrap();
        assert_eq!(read_back, data);
    }

    #[test]
    fn test_out_of_range_page_rejected() {
        let dir = TempDir::new().unwrap();
        let mut pager = FilePager::open(db_file(&dir, DB_HEADER_LEN), PAGE).unwrap();
        let mut buf = vec![0_u8; PAGE as usize];
        assert_eq!(pager.read_page(0, &mut buf).unwrap_err().code(), -2);
        assert_eq!(pager.write_page(5, &buf).unwrap_err().code(), -2);
    }

    #[test]
    fn test_freed_page_is_tombstoned() {
        let dir = TempDir::new().unwrap();
        let mut pager = FilePager::open(db_file(&dir, DB_HEADER_LEN), PAGE).unwrap();
        let a = pager.allocate().unwrap();
        let b = pager.allocate().unwrap();
        pager.free(a).unwrap();

        assert!(pager.is_freed(a));
        assert!(!pager.is_freed(b));

        let mut buf = vec![0_u8; PAGE as usize];
        assert_eq!(pager.read_page(a, &mut buf).unwrap_err().code(), -2);
        assert_eq!(pager.write_page(a, &buf).unwrap_err().code(), -2);

        // Freed numbers are never reissued.
        assert_eq!(pager.allocate().unwrap(), b + 1);
    }

    #[test]
    fn test_apply_frame_extends_file() {
        let dir = TempDir::new().unwrap();
        let mut pager = FilePager::open(db_file(&dir, DB_HEADER_LEN), PAGE).unwrap();
        let frame = vec![0xAB_u8; PAGE as usize];
        pager.apply_frame(4, &frame).unwrap();
        assert_eq!(pager.npages(), 5);

        let mut read_back = vec![0_u8; PAGE as usize];
        pager.read_page(4, &mut read_back).unwrap();
        assert_eq!(read_back, frame);
        // Intervening pages exist and read as zeroes.
        pager.read_page(2, &mut read_back).unwrap();
        assert_eq!(read_back, vec![0_u8; PAGE as usize]);
    }

    #[test]
    fn test_wrong_buffer_size_rejected() {
        let dir = TempDir::new().unwrap();
        let mut pager = FilePager::open(db_file(&dir, DB_HEADER_LEN), PAGE).unwrap();
        let pgno = pager.allocate().unwrap();
        let mut small = vec![0_u8; 16];
        assert!(pager.read_page(pgno, &mut small).is_err());
        assert!(pager.write_page(pgno, &small).is_err());
    }
}
