/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The binary diff engine used to compute and apply incremental versions.

use std::{
    path::{Path, PathBuf},
    process::Command,
};

use super::tool::{run_tool, ExternalToolError};

/// A binary delta algorithm over files.
///
/// Implementations must satisfy `apply(old, diff(old, new)) == new` byte for byte.
pub trait DiffEngine: Send + Sync + 'static {
    /// Write to `patch` a delta that turns `old` into `new`.
    fn diff(&self, old: &Path, new: &Path, patch: &Path) -> Result<(), ExternalToolError>;

    /// Write to `new` the result of applying `patch` to `old`.
    fn apply(&self, old: &Path, patch: &Path, new: &Path) -> Result<(), ExternalToolError>;
}

/// [`DiffEngine`] backed by the `bsdiff` and `bspatch` command-line tools.
#[derive(Clone, Debug)]
pub struct BsdiffEngine {
    bsdiff: PathBuf,
    bspatch: PathBuf,
}

impl BsdiffEngine {
    /// Use `bsdiff` and `bspatch` found on `PATH`.
    pub fn new() -> Self {
        Self {
            bsdiff: PathBuf::from("bsdiff"),
            bspatch: PathBuf::from("bspatch"),
        }
    }

    /// Use the tools at the given paths.
    pub fn with_binaries(bsdiff: impl Into<PathBuf>, bspatch: impl Into<PathBuf>) -> Self {
        Self {
            bsdiff: bsdiff.into(),
            bspatch: bspatch.into(),
        }
    }
}

impl Default for BsdiffEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl DiffEngine for BsdiffEngine {
    fn diff(&self, old: &Path, new: &Path, patch: &Path) -> Result<(), ExternalToolError> {
        let mut command = Command::new(&self.bsdiff);
        command.arg(old).arg(new).arg(patch);
        run_tool(command).map(|_| ())
    }

    fn apply(&self, old: &Path, patch: &Path, new: &Path) -> Result<(), ExternalToolError> {
        // bspatch takes its arguments as: oldfile newfile patchfile.
        let mut command = Command::new(&self.bspatch);
        command.arg(old).arg(new).arg(patch);
        run_tool(command).map(|_| ())
    }
}
