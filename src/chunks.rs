/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Splitting a version's byte stream into fixed-size, indexed chunks, and placing chunks back into a
//! pre-sized file.
//!
//! Both ends of a transfer use the same arithmetic: chunk `i` covers the bytes
//! `[i * CHUNK_SIZE, min((i + 1) * CHUNK_SIZE, size))`. The receiver sizes its destination file to the
//! final length before any chunk arrives, so chunks can be placed in any order and the file is always
//! a zero-gapped image of the eventual artifact.

use std::{
    fs::File,
    io::{self, Read, Seek, SeekFrom, Write},
};

use crate::types::data_types::ChunkIndex;

/// Size of every chunk except possibly the last: 1 MiB.
pub const CHUNK_SIZE: u64 = 1024 * 1024;

/// Largest stream that can be transferred: one whose chunk indices all fit in a [`ChunkIndex`].
pub const MAX_STREAM_SIZE: u64 = u32::MAX as u64 * CHUNK_SIZE;

/// Number of chunks a byte stream of `size` bytes is split into, i.e., `ceil(size / CHUNK_SIZE)`.
/// Returns `None` if `size` exceeds [`MAX_STREAM_SIZE`].
pub fn chunk_count(size: u64) -> Option<u32> {
    u32::try_from(size.div_ceil(CHUNK_SIZE)).ok()
}

/// Byte offset of the chunk at `index`.
pub fn chunk_offset(index: ChunkIndex) -> u64 {
    index.int() as u64 * CHUNK_SIZE
}

/// Length in bytes of the chunk at `index` in a stream of `size` bytes. Returns `None` if the stream
/// has no chunk at `index`.
pub fn chunk_len(index: ChunkIndex, size: u64) -> Option<u64> {
    if index.int() >= chunk_count(size)? {
        return None;
    }
    Some((size - chunk_offset(index)).min(CHUNK_SIZE))
}

/// All the chunk indices of a stream of `size` bytes, in order. Empty if `size` exceeds
/// [`MAX_STREAM_SIZE`], so callers check [`chunk_count`] first.
pub fn indices(size: u64) -> impl Iterator<Item = ChunkIndex> {
    (0..chunk_count(size).unwrap_or(0)).map(ChunkIndex::new)
}

/// Split an in-memory byte stream into `(index, bytes)` pairs.
pub fn split(data: &[u8]) -> impl Iterator<Item = (ChunkIndex, &[u8])> {
    data.chunks(CHUNK_SIZE as usize)
        .enumerate()
        .map(|(i, bytes)| (ChunkIndex::new(i as u32), bytes))
}

/// Read the chunk at `index` out of `source`, a file holding a stream of `size` bytes.
///
/// Used by the sender both on the first pass and when re-sending chunks the receiver reports missing.
pub fn read_chunk(source: &mut File, index: ChunkIndex, size: u64) -> io::Result<Vec<u8>> {
    let len = chunk_len(index, size).ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("chunk {} is out of range for a stream of {} bytes", index, size),
        )
    })?;
    let mut buf = vec![0u8; len as usize];
    source.seek(SeekFrom::Start(chunk_offset(index)))?;
    source.read_exact(&mut buf)?;
    Ok(buf)
}

/// Size `file` to exactly `size` bytes. Any bytes not yet written read back as zero.
pub fn preallocate(file: &File, size: u64) -> io::Result<()> {
    file.set_len(size)
}

/// Write `bytes` at the offset of the chunk at `index`.
pub fn place(file: &mut File, index: ChunkIndex, bytes: &[u8]) -> io::Result<()> {
    file.seek(SeekFrom::Start(chunk_offset(index)))?;
    file.write_all(bytes)
}
