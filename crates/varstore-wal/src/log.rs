//! The append-only log file and its recovery scan.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use hashbrown::HashMap;
use tracing::{debug, warn};
use varstore_error::{Result, StoreError};
use varstore_types::WAL_SENTINEL;

const PGNO_LEN: u64 = 8;

/// What a recovery scan found and did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecoverySummary {
    /// Committed transaction groups applied to the database file.
    pub committed_groups: u64,
    /// Distinct pages written while applying those groups.
    pub applied_pages: u64,
    /// Frames discarded because no commit marker followed them.
    pub discarded_frames: u64,
}

/// Append-only write-ahead log bound to one pager instance.
#[derive(Debug)]
pub struct Wal {
    file: File,
    page_size: u64,
    /// Current append position (bytes).
    len: u64,
    /// Page number -> byte offset of the latest payload for that page.
    shadow: HashMap<u64, u64>,
}

impl Wal {
    /// Open (or create) the log file.
    ///
    /// The caller is expected to run [`Wal::recover`] immediately after
    /// opening and before any runtime use; until then the in-memory state
    /// treats the log as unscanned.
    pub fn open(path: &Path, page_size: u32) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        let len = file.metadata()?.len();
        Ok(Self {
            file,
            page_size: u64::from(page_size),
            len,
            shadow: HashMap::new(),
        })
    }

    /// Whether the log holds no frames.
    #[must_use]
    pub fn is_quiescent(&self) -> bool {
        self.len == 0
    }

    /// Whether `pgno` has a frame in the current in-flight group.
    #[must_use]
    pub fn shadows(&self, pgno: u64) -> bool {
        self.shadow.contains_key(&pgno)
    }

    /// Replay committed groups into the database file via `apply`, discard
    /// any trailing uncommitted frames, and truncate the log.
    ///
    /// `apply` receives `(pgno, payload)` for the latest frame of every
    /// page in each committed group, group by group in commit order.
    /// Replaying the same log twice produces the same file state. If
    /// `apply` fails the log is left untouched so a later open can retry.
    pub fn recover<F>(&mut self, mut apply: F) -> Result<RecoverySummary>
    where
        F: FnMut(u64, &[u8]) -> Result<()>,
    {
        let mut summary = RecoverySummary::default();
        let mut group: HashMap<u64, u64> = HashMap::new();
        let mut pos = 0_u64;
        let end = self.len;
        let mut payload = vec![0_u8; self.page_size as usize];

        while pos < end {
            if end - pos < PGNO_LEN {
                summary.discarded_frames += 1;
                warn!(tail = end - pos, "discarding torn frame header at WAL tail");
                break;
            }
            let mut pgno_bytes = [0_u8; 8];
            self.read_at(pos, &mut pgno_bytes)?;
            let pgno = u64::from_le_bytes(pgno_bytes);
            pos += PGNO_LEN;

            if pgno == WAL_SENTINEL {
                // Commit boundary: everything buffered is durable.
                summary.committed_groups += 1;
                summary.applied_pages += group.len() as u64;
                for (&page, &offset) in &group {
                    self.read_at(offset, &mut payload)?;
                    apply(page, &payload)?;
                }
                group.clear();
                continue;
            }

            if end - pos < self.page_size {
                summary.discarded_frames += group.len() as u64 + 1;
                warn!(pgno, "discarding torn frame payload at WAL tail");
                group.clear();
                break;
            }
            group.insert(pgno, pos);
            pos += self.page_size;
        }

        if !group.is_empty() {
            // EOF without a marker: incomplete transaction.
            summary.discarded_frames += group.len() as u64;
            warn!(
                frames = group.len(),
                "discarding uncommitted WAL frames from interrupted transaction"
            );
        }

        self.truncate()?;
        debug!(
            groups = summary.committed_groups,
            pages = summary.applied_pages,
            discarded = summary.discarded_frames,
            "WAL recovery complete"
        );
        Ok(summary)
    }

    /// Append a page frame for the open transaction.
    ///
    /// Later appends for the same page shadow earlier ones; reads through
    /// [`Wal::read_shadowed`] always observe the latest.
    pub fn append_frame(&mut self, pgno: u64, payload: &[u8]) -> Result<()> {
        if pgno == WAL_SENTINEL {
            return Err(StoreError::invalid_argument(
                "page number collides with the commit marker sentinel",
            ));
        }
        if payload.len() as u64 != self.page_size {
            return Err(StoreError::invalid_state(format!(
                "WAL frame payload is {} bytes, page size is {}",
                payload.len(),
                self.page_size
            )));
        }
        let frame_start = self.len;
        self.write_at(frame_start, &pgno.to_le_bytes())?;
        self.write_at(frame_start + PGNO_LEN, payload)?;
        self.len = frame_start + PGNO_LEN + self.page_size;
        self.shadow.insert(pgno, frame_start + PGNO_LEN);
        debug!(pgno, offset = frame_start, "appended WAL frame");
        Ok(())
    }

    /// Append the commit marker and flush the log to stable storage.
    pub fn append_commit_marker(&mut self) -> Result<()> {
        self.write_at(self.len, &WAL_SENTINEL.to_le_bytes())?;
        self.len += PGNO_LEN;
        self.file.sync_data()?;
        debug!(len = self.len, "WAL commit marker durable");
        Ok(())
    }

    /// Read the latest shadowed payload for `pgno` into `buf`.
    ///
    /// Returns `false` (leaving `buf` untouched) when the page has no
    /// frame in the current group.
    pub fn read_shadowed(&mut self, pgno: u64, buf: &mut [u8]) -> Result<bool> {
        let Some(&offset) = self.shadow.get(&pgno) else {
            return Ok(false);
        };
        if buf.len() as u64 != self.page_size {
            return Err(StoreError::invalid_state(format!(
                "shadow read buffer is {} bytes, page size is {}",
                buf.len(),
                self.page_size
            )));
        }
        self.read_at(offset, buf)?;
        Ok(true)
    }

    /// Apply the current group's latest frames via `apply` (checkpoint).
    ///
    /// The log is **not** truncated here: the caller truncates only after
    /// every frame applied and the database file is durable.
    pub fn checkpoint<F>(&mut self, mut apply: F) -> Result<u64>
    where
        F: FnMut(u64, &[u8]) -> Result<()>,
    {
        let mut payload = vec![0_u8; self.page_size as usize];
        let offsets: Vec<(u64, u64)> = self.shadow.iter().map(|(&p, &o)| (p, o)).collect();
        for (pgno, offset) in &offsets {
            self.read_at(*offset, &mut payload)?;
            apply(*pgno, &payload)?;
        }
        Ok(offsets.len() as u64)
    }

    /// Drop all frames and the shadow index; the log returns to the
    /// quiescent state.
    pub fn truncate(&mut self) -> Result<()> {
        self.file.set_len(0)?;
        self.file.sync_data()?;
        self.len = 0;
        self.shadow.clear();
        Ok(())
    }

    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<()> {
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.read_exact(buf).map_err(|err| {
            StoreError::invalid_state(format!("short WAL read at offset {offset}: {err}"))
        })
    }

    fn write_at(&mut self, offset: u64, buf: &[u8]) -> Result<()> {
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(buf)?;
        Ok(())
    }
}
