//! Ordered collection of sealed segments plus one active segment:
//! routes reads, rolls over when the active segment is full, and
//! recovers the directory's state on open.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use log::info;

use crate::error::{Error, Result};
use crate::segment::{log_recovery_outcome, RecoveryOutcome, Segment};

pub struct Log {
    dir: PathBuf,
    max_segment_size: u64,
    sealed: RwLock<Vec<Arc<Segment>>>,
    active: RwLock<Arc<Segment>>,
    started: AtomicBool,
}

impl Log {
    /// Creates the directory if absent, lists `*.log` files, and opens
    /// every segment in ascending base-offset order, recovering the
    /// last one as Active. Does not transition the log to Open; call
    /// `start()` before `append`/`fetch`.
    pub fn open(dir: impl AsRef<Path>, max_segment_size: u64) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;

        let mut base_offsets = discover_segment_bases(&dir)?;
        base_offsets.sort_unstable();

        if base_offsets.is_empty() {
            let active = Segment::create_active(&dir, 0, max_segment_size)?;
            return Ok(Self {
                dir,
                max_segment_size,
                sealed: RwLock::new(Vec::new()),
                active: RwLock::new(Arc::new(active)),
                started: AtomicBool::new(false),
            });
        }

        let mut sealed = Vec::with_capacity(base_offsets.len() - 1);
        for (i, &base) in base_offsets.iter().enumerate() {
            let is_last = i + 1 == base_offsets.len();
            if !is_last {
                let next_base = base_offsets[i + 1];
                let segment = Segment::open_sealed(&dir, base, max_segment_size, next_base - 1)?;
                sealed.push(Arc::new(segment));
            } else {
                let (segment, outcome, discarded) =
                    Segment::open_active_with_recovery(&dir, base, max_segment_size)?;
                log_recovery_outcome(base, outcome, discarded);
                return Ok(Self {
                    dir,
                    max_segment_size,
                    sealed: RwLock::new(sealed),
                    active: RwLock::new(Arc::new(segment)),
                    started: AtomicBool::new(false),
                });
            }
        }
        unreachable!("loop above always returns on the last segment")
    }

    /// Transitions the log to Open. Appends and fetches return
    /// `NotStarted` before this is called.
    pub fn start(&self) {
        self.started.store(true, Ordering::Release);
    }

    /// Flushes the active segment and transitions the log out of
    /// Open, so subsequent `append`/`fetch` calls observe `NotStarted`.
    pub fn close(&self) -> Result<()> {
        self.started.store(false, Ordering::Release);
        let active = self.active_segment();
        active.flush()
    }

    fn ensure_started(&self) -> Result<()> {
        if !self.started.load(Ordering::Acquire) {
            return Err(Error::NotStarted);
        }
        Ok(())
    }

    fn active_segment(&self) -> Arc<Segment> {
        self.active.read().unwrap().clone()
    }

    /// The highest offset ever made visible in this log, or `None` if
    /// nothing has been appended yet. Falls back to the last sealed
    /// segment's published offset when the active segment is a fresh,
    /// empty segment just installed by `rollover` — otherwise this
    /// would regress to `None` right after an append that fills a
    /// segment, even though the just-sealed records are still visible
    /// via `fetch`.
    pub fn published_offset(&self) -> Option<u64> {
        if let Some(offset) = self.active_segment().published_offset() {
            return Some(offset);
        }
        self.sealed.read().unwrap().last().and_then(|s| s.published_offset())
    }

    /// Appends `data` on the active segment, rolling over first if it
    /// turns out to be full.
    pub fn append(&self, data: &[u8]) -> Result<u64> {
        self.ensure_started()?;
        loop {
            let active = self.active_segment();
            match active.append(data) {
                Ok(offset) => {
                    if active.is_full() {
                        self.rollover()?;
                    }
                    return Ok(offset);
                }
                Err(Error::Full) => {
                    self.rollover()?;
                    continue;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Reads starting at `start`, spanning into later segments as
    /// needed, until `max_bytes` is exhausted or the log's published
    /// frontier is reached. Returns whatever is available, possibly
    /// empty.
    pub fn fetch(&self, start: u64, max_bytes: usize) -> Result<Vec<u8>> {
        self.ensure_started()?;
        let mut out = Vec::new();
        let mut offset = start;
        let mut remaining = max_bytes;

        while remaining > 0 {
            let segment = match self.find_segment(offset) {
                Some(s) => s,
                None => break,
            };
            let segment_published = match segment.published_offset() {
                Some(p) => p,
                None => break,
            };
            if offset > segment_published {
                break;
            }

            let chunk = segment.read(offset, remaining)?;
            if chunk.is_empty() {
                break;
            }
            let record_count = count_records(&chunk);
            let last_offset_in_chunk = offset + record_count as u64 - 1;

            remaining -= chunk.len();
            out.extend_from_slice(&chunk);

            if last_offset_in_chunk >= segment_published {
                offset = segment_published + 1;
            } else {
                break;
            }
        }

        Ok(out)
    }

    /// Under a shared lock on the sealed list, loads the active
    /// segment; if the sealed list is empty or `active.base_offset <=
    /// offset`, returns active. Otherwise linear-scans the (ordered)
    /// sealed list.
    ///
    /// The sealed-list read guard is held across the active-segment
    /// read so that a caller who observes the post-rollover active
    /// segment is guaranteed to also observe the just-sealed segment
    /// in the sealed list (see `rollover`).
    fn find_segment(&self, offset: u64) -> Option<Arc<Segment>> {
        let sealed = self.sealed.read().unwrap();
        let active = self.active.read().unwrap().clone();

        if sealed.is_empty() || active.base_offset() <= offset {
            return Some(active);
        }
        if offset < sealed[0].base_offset() {
            return None;
        }
        let mut chosen = &sealed[0];
        for segment in sealed.iter() {
            if segment.base_offset() <= offset {
                chosen = segment;
            } else {
                break;
            }
        }
        Some(chosen.clone())
    }

    /// Seals the active segment, creates a new Active segment, appends
    /// the old one to the sealed list, then swaps the active reference.
    /// Only ever called by the single writer.
    fn rollover(&self) -> Result<()> {
        let old = self.active_segment();
        old.seal()?;
        let new_base = old.published_offset().map(|p| p + 1).unwrap_or(old.base_offset());
        let new_active = Arc::new(Segment::create_active(&self.dir, new_base, self.max_segment_size)?);

        info!(
            "rollover: segment {} sealed, new active segment {}",
            old.base_offset(),
            new_base
        );

        {
            let mut sealed = self.sealed.write().unwrap();
            sealed.push(old);
        }
        {
            let mut active = self.active.write().unwrap();
            *active = new_active;
        }
        Ok(())
    }
}

fn count_records(chunk: &[u8]) -> usize {
    use crate::segment::SEGMENT_HEADER_SIZE;
    let mut pos = 0usize;
    let mut count = 0usize;
    while pos + SEGMENT_HEADER_SIZE <= chunk.len() {
        let len = u32::from_le_bytes(chunk[pos..pos + SEGMENT_HEADER_SIZE].try_into().unwrap()) as usize;
        pos += SEGMENT_HEADER_SIZE + len;
        count += 1;
    }
    count
}

fn discover_segment_bases(dir: &Path) -> Result<Vec<u64>> {
    let mut bases = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("log") {
            continue;
        }
        if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
            if let Ok(base) = stem.parse::<u64>() {
                bases.push(base);
            }
        }
    }
    Ok(bases)
}
