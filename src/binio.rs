//! Little-endian primitive encode/decode and interrupt-safe positional I/O.
//!
//! All reads use `pread` (`FileExt::read_at`) and all writes use `pwrite`
//! (`FileExt::write_at`) so the file's own cursor is never touched; the
//! writer and any number of concurrent readers can operate on the same
//! `File` without coordinating a shared position.

use std::fs::File;
use std::io::ErrorKind;
use std::os::unix::fs::FileExt;

use crate::error::Result;

pub const U32_LEN: usize = 4;
pub const U64_LEN: usize = 8;

/// Reads at most `buf.len()` bytes starting at `offset`, retrying on
/// `Interrupted`. Returns the number of bytes actually read, which is
/// less than `buf.len()` only at end of file.
pub fn read_at_best_effort(file: &File, buf: &mut [u8], offset: u64) -> Result<usize> {
    let mut total = 0usize;
    while total < buf.len() {
        match file.read_at(&mut buf[total..], offset + total as u64) {
            Ok(0) => break,
            Ok(n) => total += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(total)
}

/// Reads exactly `buf.len()` bytes starting at `offset`. A short read
/// (clean EOF or otherwise) is reported as `UnexpectedEof`.
pub fn read_exact_at(file: &File, buf: &mut [u8], offset: u64) -> Result<()> {
    let n = read_at_best_effort(file, buf, offset)?;
    if n != buf.len() {
        return Err(std::io::Error::new(ErrorKind::UnexpectedEof, "short read").into());
    }
    Ok(())
}

/// Writes all of `buf` starting at `offset`, retrying on short writes
/// and `Interrupted`.
pub fn write_all_at(file: &File, buf: &[u8], offset: u64) -> Result<()> {
    let mut total = 0usize;
    while total < buf.len() {
        match file.write_at(&buf[total..], offset + total as u64) {
            Ok(0) => {
                return Err(
                    std::io::Error::new(ErrorKind::WriteZero, "write_at wrote zero bytes").into(),
                )
            }
            Ok(n) => total += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

pub fn encode_u32_le(v: u32) -> [u8; U32_LEN] {
    v.to_le_bytes()
}

pub fn decode_u32_le(buf: &[u8]) -> u32 {
    u32::from_le_bytes(buf[..U32_LEN].try_into().unwrap())
}

pub fn encode_u64_le(v: u64) -> [u8; U64_LEN] {
    v.to_le_bytes()
}

pub fn decode_u64_le(buf: &[u8]) -> u64 {
    u64::from_le_bytes(buf[..U64_LEN].try_into().unwrap())
}
