/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Cryptographic primitives.
//!
//! Chunk checksums and whole-version digests are SHA256 hashes provided by the [`sha2`] crate. Nothing
//! in this crate signs or encrypts: the channel is unauthenticated, and digests only detect corruption.

use std::{
    fs::File,
    io::{self, Read},
    path::Path,
};

use super::data_types::CryptoHash;

// re-exports below.
pub use sha2::Digest;
pub use sha2::Sha256 as CryptoHasher;

/// Hash an in-memory byte slice, e.g., the payload of a single chunk.
pub fn digest(bytes: &[u8]) -> CryptoHash {
    let mut hasher = CryptoHasher::new();
    hasher.update(bytes);
    CryptoHash::new(hasher.finalize().into())
}

/// Hash the whole contents of the file at `path`, streaming it in bounded reads.
pub fn digest_file(path: &Path) -> io::Result<CryptoHash> {
    let mut file = File::open(path)?;
    let mut hasher = CryptoHasher::new();
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(CryptoHash::new(hasher.finalize().into()))
}
