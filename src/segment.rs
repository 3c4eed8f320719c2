//! One record file plus one `Index`: append, positional read, crash
//! recovery, rollover bookkeeping.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};

use log::{info, warn};

use crate::binio;
use crate::error::{Error, Result};
use crate::index::{Index, IndexEntry, ENTRY_LEN};

/// Fixed per-record prefix width. A checksum field is anticipated but
/// not currently emitted; adding one is a per-segment format decision,
/// not something that varies within a segment.
pub const SEGMENT_HEADER_SIZE: usize = binio::U32_LEN;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryOutcome {
    Recovered,
    Truncated,
    Empty,
}

pub struct Segment {
    dir: PathBuf,
    base_offset: u64,
    max_size: u64,
    record_file: File,
    index: Index,
    /// -1 means "no record has been published yet".
    published_offset: AtomicI64,
    published_size: AtomicU64,
    sealed: AtomicBool,
}

impl Segment {
    pub fn record_path(dir: &Path, base_offset: u64) -> PathBuf {
        dir.join(format!("{base_offset}.log"))
    }

    pub fn index_path(dir: &Path, base_offset: u64) -> PathBuf {
        dir.join(format!("{base_offset}.index"))
    }

    /// Creates a brand new, empty Active segment.
    pub fn create_active(dir: &Path, base_offset: u64, max_size: u64) -> Result<Self> {
        let record_file = OpenOptions::new()
            .create_new(true)
            .read(true)
            .write(true)
            .open(Self::record_path(dir, base_offset))?;
        let index = Index::create_active(Self::index_path(dir, base_offset))?;
        Ok(Self {
            dir: dir.to_path_buf(),
            base_offset,
            max_size,
            record_file,
            index,
            published_offset: AtomicI64::new(-1),
            published_size: AtomicU64::new(0),
            sealed: AtomicBool::new(false),
        })
    }

    /// Opens an existing record file as the Active segment, replaying
    /// and truncating it per the crash-recovery protocol (4.3.1).
    /// Returns the recovered segment, its recovery outcome, and (only
    /// when `Truncated`) the number of bytes discarded from the torn
    /// tail.
    pub fn open_active_with_recovery(
        dir: &Path,
        base_offset: u64,
        max_size: u64,
    ) -> Result<(Self, RecoveryOutcome, Option<u64>)> {
        let record_path = Self::record_path(dir, base_offset);
        let record_file = OpenOptions::new().read(true).write(true).open(&record_path)?;
        let file_len = record_file.metadata()?.len();

        if file_len == 0 {
            let index = Index::rebuild_active(Self::index_path(dir, base_offset))?;
            let segment = Self {
                dir: dir.to_path_buf(),
                base_offset,
                max_size,
                record_file,
                index,
                published_offset: AtomicI64::new(-1),
                published_size: AtomicU64::new(0),
                sealed: AtomicBool::new(false),
            };
            return Ok((segment, RecoveryOutcome::Empty, None));
        }

        let scan = scan_records(&record_file, base_offset, file_len)?;
        let discarded = file_len - scan.end_position;
        if scan.torn {
            record_file.set_len(scan.end_position)?;
            record_file.sync_all()?;
        }

        let index = Index::rebuild_active(Self::index_path(dir, base_offset))?;
        for entry in &scan.entries {
            index.append(*entry)?;
        }

        let published_offset = scan.entries.last().map(|e| e.offset as i64).unwrap_or(-1);
        let segment = Self {
            dir: dir.to_path_buf(),
            base_offset,
            max_size,
            record_file,
            index,
            published_offset: AtomicI64::new(published_offset),
            published_size: AtomicU64::new(scan.end_position),
            sealed: AtomicBool::new(false),
        };

        if scan.torn {
            Ok((segment, RecoveryOutcome::Truncated, Some(discarded)))
        } else {
            Ok((segment, RecoveryOutcome::Recovered, None))
        }
    }

    /// Opens a previously sealed (non-last) segment. `published_offset`
    /// is supplied by the caller (`Log::open` derives it from the
    /// following segment's `base_offset - 1`) so that opening a
    /// historical segment never needs to know anything the directory
    /// listing didn't already establish.
    pub fn open_sealed(
        dir: &Path,
        base_offset: u64,
        max_size: u64,
        published_offset: u64,
    ) -> Result<Self> {
        let record_path = Self::record_path(dir, base_offset);
        let record_file = OpenOptions::new().read(true).write(true).open(&record_path)?;
        let file_len = record_file.metadata()?.len();
        let index_path = Self::index_path(dir, base_offset);

        let index = match Index::open_sealed(&index_path, base_offset, published_offset) {
            Ok(index) => index,
            Err(_) => {
                warn!(
                    "segment {base_offset}: index failed validation, rebuilding from record file"
                );
                let scan = scan_records(&record_file, base_offset, file_len)?;
                if scan.torn {
                    return Err(Error::Corrupt(
                        "sealed segment has a torn record; only the last segment may be truncated",
                    ));
                }
                Index::write_sealed(&index_path, &scan.entries)?
            }
        };

        let segment = Self {
            dir: dir.to_path_buf(),
            base_offset,
            max_size,
            record_file,
            index,
            published_offset: AtomicI64::new(published_offset as i64),
            published_size: AtomicU64::new(file_len),
            sealed: AtomicBool::new(true),
        };

        if let Err(e) = segment.verify_sealed_tail() {
            warn!("segment {base_offset}: sealed tail verification failed: {e}");
            return Err(e);
        }

        Ok(segment)
    }

    /// Cheap consistency check: walks from the index entry nearest
    /// `published_offset` forward and confirms the last record ends
    /// exactly at `published_size`, without replaying the whole file.
    fn verify_sealed_tail(&self) -> Result<()> {
        let published_offset = match self.published_offset() {
            Some(o) => o,
            None => return Ok(()),
        };
        let pos = self.file_position(published_offset)?;
        let len = self.read_len_prefix(pos)?;
        let end = pos + SEGMENT_HEADER_SIZE as u64 + len as u64;
        if end != self.published_size() {
            return Err(Error::Corrupt("sealed segment's last record does not end at its file length"));
        }
        Ok(())
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn base_offset(&self) -> u64 {
        self.base_offset
    }

    pub fn max_size(&self) -> u64 {
        self.max_size
    }

    pub fn published_offset(&self) -> Option<u64> {
        let v = self.published_offset.load(Ordering::Acquire);
        if v < 0 {
            None
        } else {
            Some(v as u64)
        }
    }

    pub fn published_size(&self) -> u64 {
        self.published_size.load(Ordering::Acquire)
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed.load(Ordering::Acquire)
    }

    pub fn is_full(&self) -> bool {
        self.published_size() >= self.max_size
    }

    /// Writes `len:u32-LE || payload`, records the new index entry,
    /// and publishes `published_offset` then `published_size` with
    /// release ordering. Writer-only; not safe for concurrent writers.
    pub fn append(&self, payload: &[u8]) -> Result<u64> {
        if self.is_sealed() {
            return Err(Error::BadArgument("cannot append to a sealed segment"));
        }

        let file_position = self.published_size.load(Ordering::Acquire);
        let record_len = SEGMENT_HEADER_SIZE as u64 + payload.len() as u64;
        let end_position = file_position
            .checked_add(record_len)
            .ok_or(Error::Overflow)?;
        if file_position == 0 && record_len > self.max_size {
            // Even a brand new segment can't hold this record. Rolling
            // over would just recreate the same empty segment and fail
            // to create it again, so this is terminal rather than `Full`.
            return Err(Error::BadArgument(
                "record is larger than max_size and can never fit in any segment",
            ));
        }
        if end_position > self.max_size {
            return Err(Error::Full);
        }
        if end_position > u32::MAX as u64 {
            return Err(Error::Overflow);
        }

        let mut framed = Vec::with_capacity(record_len as usize);
        framed.extend_from_slice(&binio::encode_u32_le(payload.len() as u32));
        framed.extend_from_slice(payload);
        binio::write_all_at(&self.record_file, &framed, file_position)?;

        let offset = match self.published_offset.load(Ordering::Acquire) {
            -1 => self.base_offset,
            last => last as u64 + 1,
        };
        self.index.append(IndexEntry {
            offset,
            file_position: file_position as u32,
        })?;

        self.published_offset.store(offset as i64, Ordering::Release);
        self.published_size.store(end_position, Ordering::Release);
        Ok(offset)
    }

    /// Returns a contiguous slice of the record file starting at the
    /// file position of `start_offset`, containing whole records only,
    /// bounded by `max_bytes` and by `published_size`.
    pub fn read(&self, start_offset: u64, max_bytes: usize) -> Result<Vec<u8>> {
        let published_offset = match self.published_offset() {
            Some(v) => v,
            None => return Ok(Vec::new()),
        };
        if start_offset > published_offset || max_bytes == 0 {
            return Ok(Vec::new());
        }

        let published_size = self.published_size();
        let p0 = self.file_position(start_offset)?;
        if p0 >= published_size {
            return Ok(Vec::new());
        }

        let cap = p0.saturating_add(max_bytes as u64).min(published_size);
        let mut p1 = p0;
        loop {
            if p1 + SEGMENT_HEADER_SIZE as u64 > published_size {
                break;
            }
            let len = self.read_len_prefix(p1)?;
            let next = p1 + SEGMENT_HEADER_SIZE as u64 + len as u64;
            if next > cap {
                break;
            }
            p1 = next;
        }

        if p1 == p0 {
            return Ok(Vec::new());
        }

        let mut buf = vec![0u8; (p1 - p0) as usize];
        binio::read_exact_at(&self.record_file, &mut buf, p0)?;
        Ok(buf)
    }

    /// Flushes the record file to durable storage without sealing the
    /// segment. Used by `Log::close`, which stops admitting new
    /// operations but leaves the segment Active for a subsequent
    /// reopen to recover from.
    pub fn flush(&self) -> Result<()> {
        self.record_file.sync_all()?;
        Ok(())
    }

    /// Transitions Active -> Sealed. Idempotent.
    pub fn seal(&self) -> Result<()> {
        if self.sealed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.record_file.sync_all()?;
        self.index.seal()?;
        Ok(())
    }

    fn read_len_prefix(&self, pos: u64) -> Result<u32> {
        let mut buf = [0u8; SEGMENT_HEADER_SIZE];
        binio::read_exact_at(&self.record_file, &mut buf, pos)?;
        Ok(binio::decode_u32_le(&buf))
    }

    /// Locates the file position of `offset` by consulting the index
    /// for the nearest entry at or before it, then walking forward one
    /// record at a time.
    fn file_position(&self, offset: u64) -> Result<u64> {
        let (mut cur_offset, mut cur_pos) = match self.index.closest(offset) {
            Some(e) => (e.offset, e.file_position as u64),
            None => (self.base_offset, 0u64),
        };
        while cur_offset < offset {
            let len = self.read_len_prefix(cur_pos)?;
            cur_pos += SEGMENT_HEADER_SIZE as u64 + len as u64;
            cur_offset += 1;
        }
        Ok(cur_pos)
    }
}

struct ScanResult {
    entries: Vec<IndexEntry>,
    end_position: u64,
    torn: bool,
}

/// Replays a record file from position 0, stopping at the first
/// length prefix that cannot be fully read or whose payload would
/// exceed the file's remaining bytes.
fn scan_records(file: &File, base_offset: u64, file_len: u64) -> Result<ScanResult> {
    let mut entries = Vec::new();
    let mut pos = 0u64;
    let mut i = 0u64;
    loop {
        if pos + SEGMENT_HEADER_SIZE as u64 > file_len {
            let torn = pos != file_len;
            return Ok(ScanResult {
                entries,
                end_position: pos,
                torn,
            });
        }
        let mut len_buf = [0u8; SEGMENT_HEADER_SIZE];
        let n = binio::read_at_best_effort(file, &mut len_buf, pos)?;
        if n < SEGMENT_HEADER_SIZE {
            return Ok(ScanResult {
                entries,
                end_position: pos,
                torn: true,
            });
        }
        let len = binio::decode_u32_le(&len_buf) as u64;
        let record_len = SEGMENT_HEADER_SIZE as u64 + len;
        if pos + record_len > file_len {
            return Ok(ScanResult {
                entries,
                end_position: pos,
                torn: true,
            });
        }
        entries.push(IndexEntry {
            offset: base_offset + i,
            file_position: pos as u32,
        });
        pos += record_len;
        i += 1;
    }
}

pub fn log_recovery_outcome(base_offset: u64, outcome: RecoveryOutcome, discarded_bytes: Option<u64>) {
    match outcome {
        RecoveryOutcome::Recovered => info!("segment {base_offset} recovered cleanly"),
        RecoveryOutcome::Empty => info!("segment {base_offset} is empty"),
        RecoveryOutcome::Truncated => warn!(
            "segment {base_offset} recovered with a truncated tail ({} bytes discarded)",
            discarded_bytes.unwrap_or(0)
        ),
    }
}

const _: () = assert!(ENTRY_LEN == 12);
