/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

use std::{
    fs,
    path::Path,
    sync::atomic::{AtomicU32, Ordering},
};

use borsh::{BorshDeserialize, BorshSerialize};
use standby_rs::external::{DiffEngine, ExternalToolError};

/// Patch format of [`SpliceDiff`]: resize the old file to `new_len`, then overwrite it with `bytes` at
/// `offset`.
#[derive(BorshSerialize, BorshDeserialize)]
pub(crate) struct Splice {
    pub(crate) new_len: u64,
    pub(crate) offset: u64,
    pub(crate) bytes: Vec<u8>,
}

impl Splice {
    pub(crate) fn encode(&self) -> Vec<u8> {
        self.try_to_vec().unwrap()
    }

    pub(crate) fn apply_to(&self, old: &[u8]) -> Vec<u8> {
        let mut new = old.to_vec();
        new.resize(self.new_len as usize, 0);
        let offset = self.offset as usize;
        new[offset..offset + self.bytes.len()].copy_from_slice(&self.bytes);
        new
    }
}

/// A [`DiffEngine`] that stores everything after the first differing byte. Small to reason about in
/// tests, and exact.
pub(crate) struct SpliceDiff;

impl DiffEngine for SpliceDiff {
    fn diff(&self, old: &Path, new: &Path, patch: &Path) -> Result<(), ExternalToolError> {
        let old = fs::read(old)?;
        let new = fs::read(new)?;
        let offset = old
            .iter()
            .zip(&new)
            .position(|(a, b)| a != b)
            .unwrap_or_else(|| old.len().min(new.len()));
        let splice = Splice {
            new_len: new.len() as u64,
            offset: offset as u64,
            bytes: new[offset..].to_vec(),
        };
        fs::write(patch, splice.encode())?;
        Ok(())
    }

    fn apply(&self, old: &Path, patch: &Path, new: &Path) -> Result<(), ExternalToolError> {
        let splice = Splice::try_from_slice(&fs::read(patch)?)?;
        fs::write(new, splice.apply_to(&fs::read(old)?))?;
        Ok(())
    }
}

/// A [`SpliceDiff`] whose next `failures` applications fail, leaving a partial output behind.
pub(crate) struct FlakyDiff {
    failures: AtomicU32,
}

impl FlakyDiff {
    pub(crate) fn failing(failures: u32) -> Self {
        Self {
            failures: AtomicU32::new(failures),
        }
    }
}

impl DiffEngine for FlakyDiff {
    fn diff(&self, old: &Path, new: &Path, patch: &Path) -> Result<(), ExternalToolError> {
        SpliceDiff.diff(old, new, patch)
    }

    fn apply(&self, old: &Path, patch: &Path, new: &Path) -> Result<(), ExternalToolError> {
        let failing = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if failing {
            fs::write(new, b"partial")?;
            return Err(ExternalToolError::Failed {
                command: "splice".to_string(),
                code: Some(1),
                stderr: "corrupt patch".to_string(),
            });
        }
        SpliceDiff.apply(old, patch, new)
    }
}
