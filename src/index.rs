//! Per-segment sparse offset -> file-position index.
//!
//! Active indexes are backed by a plain file plus an in-memory mirror
//! vector that readers search without touching disk. Sealed indexes
//! are memory-mapped read-only and the mirror is dropped; readers then
//! binary-search the mapping directly.

use std::fs::{File, OpenOptions};
use std::path::PathBuf;
use std::sync::RwLock;

use memmap2::Mmap;

use crate::binio;
use crate::error::{Error, Result};

pub const ENTRY_LEN: usize = 12;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexEntry {
    pub offset: u64,
    pub file_position: u32,
}

fn decode_entry(buf: &[u8]) -> IndexEntry {
    IndexEntry {
        offset: binio::decode_u64_le(&buf[0..8]),
        file_position: binio::decode_u32_le(&buf[8..12]),
    }
}

fn encode_entry(entry: IndexEntry) -> [u8; ENTRY_LEN] {
    let mut buf = [0u8; ENTRY_LEN];
    buf[0..8].copy_from_slice(&binio::encode_u64_le(entry.offset));
    buf[8..12].copy_from_slice(&binio::encode_u32_le(entry.file_position));
    buf
}

struct Active {
    file: File,
    mirror: Vec<IndexEntry>,
}

struct Sealed {
    // `None` for an empty index: mmap requires a nonzero-length file.
    mmap: Option<Mmap>,
}

enum State {
    Active(Active),
    Sealed(Sealed),
}

pub struct Index {
    path: PathBuf,
    state: RwLock<State>,
}

impl Index {
    /// Creates a brand new, empty Active index file.
    pub fn create_active(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let file = OpenOptions::new()
            .create(true)
            .truncate(true)
            .read(true)
            .write(true)
            .open(&path)?;
        Ok(Self {
            path,
            state: RwLock::new(State::Active(Active {
                file,
                mirror: Vec::new(),
            })),
        })
    }

    /// Truncates (or creates) the index file and starts an empty
    /// Active index, used when a segment's index must be rebuilt from
    /// a record-file replay.
    pub fn rebuild_active(path: impl Into<PathBuf>) -> Result<Self> {
        Self::create_active(path)
    }

    /// Opens an on-disk index as Sealed, validating it cheaply without
    /// replaying the record file: size must be a multiple of
    /// `ENTRY_LEN`, entries must be strictly monotonic in both offset
    /// and file position, and every entry's offset must lie in
    /// `[base_offset, published_offset]`.
    pub fn open_sealed(path: impl Into<PathBuf>, base_offset: u64, published_offset: u64) -> Result<Self> {
        let path = path.into();
        let file = File::open(&path)?;
        let len = file.metadata()?.len();
        if len % ENTRY_LEN as u64 != 0 {
            return Err(Error::Corrupt("index size is not a multiple of entry width"));
        }
        let mmap = if len == 0 {
            None
        } else {
            Some(unsafe { Mmap::map(&file)? })
        };

        if let Some(m) = &mmap {
            let count = m.len() / ENTRY_LEN;
            let mut prev: Option<IndexEntry> = None;
            for i in 0..count {
                let entry = decode_entry(&m[i * ENTRY_LEN..(i + 1) * ENTRY_LEN]);
                if entry.offset < base_offset || entry.offset > published_offset {
                    return Err(Error::Corrupt("index entry outside segment's offset range"));
                }
                if let Some(p) = prev {
                    if entry.offset <= p.offset || entry.file_position <= p.file_position {
                        return Err(Error::Corrupt("index entries are not strictly monotonic"));
                    }
                }
                prev = Some(entry);
            }
        }

        Ok(Self {
            path,
            state: RwLock::new(State::Sealed(Sealed { mmap })),
        })
    }

    /// Writes `entries` to a fresh index file and opens it Sealed,
    /// used after a full record-file replay rebuilds a historical
    /// segment's index from scratch.
    pub fn write_sealed(path: impl Into<PathBuf>, entries: &[IndexEntry]) -> Result<Self> {
        let path = path.into();
        let file = OpenOptions::new()
            .create(true)
            .truncate(true)
            .read(true)
            .write(true)
            .open(&path)?;
        let mut offset = 0u64;
        for entry in entries {
            let bytes = encode_entry(*entry);
            binio::write_all_at(&file, &bytes, offset)?;
            offset += ENTRY_LEN as u64;
        }
        file.sync_all()?;
        drop(file);
        Self::open_sealed(path, entries.first().map(|e| e.offset).unwrap_or(0), entries.last().map(|e| e.offset).unwrap_or(0))
    }

    /// Appends one entry. Fails if `entry.offset` is not strictly
    /// greater than the last appended offset, or if the index is
    /// Sealed.
    pub fn append(&self, entry: IndexEntry) -> Result<()> {
        let mut guard = self.state.write().unwrap();
        match &mut *guard {
            State::Sealed(_) => Err(Error::BadArgument("cannot append to a sealed index")),
            State::Active(active) => {
                if let Some(last) = active.mirror.last() {
                    if entry.offset <= last.offset {
                        return Err(Error::BadArgument(
                            "index entry offset must be strictly increasing",
                        ));
                    }
                }
                let bytes = encode_entry(entry);
                let pos = (active.mirror.len() * ENTRY_LEN) as u64;
                binio::write_all_at(&active.file, &bytes, pos)?;
                active.mirror.push(entry);
                Ok(())
            }
        }
    }

    /// Returns the entry with the greatest `offset <= target`, or
    /// `None` if the index holds no such entry.
    pub fn closest(&self, target: u64) -> Option<IndexEntry> {
        let guard = self.state.read().unwrap();
        match &*guard {
            State::Active(active) => closest_in_slice(&active.mirror, target),
            State::Sealed(sealed) => match &sealed.mmap {
                None => None,
                Some(m) => closest_in_mmap(m, target),
            },
        }
    }

    /// Transitions Active -> Sealed: flushes the file, memory-maps it
    /// read-only, and drops the in-memory mirror. Idempotent.
    pub fn seal(&self) -> Result<()> {
        let mut guard = self.state.write().unwrap();
        if matches!(&*guard, State::Sealed(_)) {
            return Ok(());
        }
        if let State::Active(active) = &*guard {
            active.file.sync_all()?;
        }
        let file = File::open(&self.path)?;
        let len = file.metadata()?.len();
        let mmap = if len == 0 {
            None
        } else {
            Some(unsafe { Mmap::map(&file)? })
        };
        *guard = State::Sealed(Sealed { mmap });
        Ok(())
    }
}

fn closest_in_slice(entries: &[IndexEntry], target: u64) -> Option<IndexEntry> {
    let idx = entries.partition_point(|e| e.offset <= target);
    if idx == 0 {
        None
    } else {
        Some(entries[idx - 1])
    }
}

fn closest_in_mmap(mmap: &[u8], target: u64) -> Option<IndexEntry> {
    let count = mmap.len() / ENTRY_LEN;
    let mut lo = 0usize;
    let mut hi = count;
    while lo < hi {
        let mid = lo + (hi - lo) / 2;
        let entry = decode_entry(&mmap[mid * ENTRY_LEN..(mid + 1) * ENTRY_LEN]);
        if entry.offset <= target {
            lo = mid + 1;
        } else {
            hi = mid;
        }
    }
    if lo == 0 {
        None
    } else {
        Some(decode_entry(&mmap[(lo - 1) * ENTRY_LEN..lo * ENTRY_LEN]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn active_append_and_closest() {
        let dir = tempdir().unwrap();
        let index = Index::create_active(dir.path().join("0.index")).unwrap();
        assert!(index.closest(0).is_none());

        index
            .append(IndexEntry {
                offset: 0,
                file_position: 0,
            })
            .unwrap();
        index
            .append(IndexEntry {
                offset: 4,
                file_position: 40,
            })
            .unwrap();

        assert_eq!(
            index.closest(0),
            Some(IndexEntry {
                offset: 0,
                file_position: 0
            })
        );
        assert_eq!(
            index.closest(2),
            Some(IndexEntry {
                offset: 0,
                file_position: 0
            })
        );
        assert_eq!(
            index.closest(4),
            Some(IndexEntry {
                offset: 4,
                file_position: 40
            })
        );
        assert_eq!(
            index.closest(100),
            Some(IndexEntry {
                offset: 4,
                file_position: 40
            })
        );
    }

    #[test]
    fn append_rejects_non_monotonic_offset() {
        let dir = tempdir().unwrap();
        let index = Index::create_active(dir.path().join("0.index")).unwrap();
        index
            .append(IndexEntry {
                offset: 9,
                file_position: 0,
            })
            .unwrap();
        let err = index
            .append(IndexEntry {
                offset: 5,
                file_position: 8,
            })
            .unwrap_err();
        assert!(matches!(err, Error::BadArgument(_)));
    }

    #[test]
    fn append_rejects_sealed_index() {
        let dir = tempdir().unwrap();
        let index = Index::create_active(dir.path().join("0.index")).unwrap();
        index
            .append(IndexEntry {
                offset: 0,
                file_position: 0,
            })
            .unwrap();
        index.seal().unwrap();
        let err = index
            .append(IndexEntry {
                offset: 1,
                file_position: 12,
            })
            .unwrap_err();
        assert!(matches!(err, Error::BadArgument(_)));
    }

    #[test]
    fn sealed_roundtrip_via_mmap() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("0.index");
        let index = Index::create_active(&path).unwrap();
        for i in 0..10u64 {
            index
                .append(IndexEntry {
                    offset: i,
                    file_position: (i * 8) as u32,
                })
                .unwrap();
        }
        index.seal().unwrap();

        let reopened = Index::open_sealed(&path, 0, 9).unwrap();
        assert_eq!(
            reopened.closest(7),
            Some(IndexEntry {
                offset: 7,
                file_position: 56
            })
        );
    }

    #[test]
    fn open_sealed_rejects_non_multiple_of_entry_len() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("0.index");
        std::fs::write(&path, [0u8; 13]).unwrap();
        assert!(Index::open_sealed(&path, 0, 0).is_err());
    }
}
