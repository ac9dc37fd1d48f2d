/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Layout of the recovery node's data directory.
//!
//! ```text
//! <data_dir>/img_<artifact>_<version>        full artifact of a version that reached Ready
//! <data_dir>/img_<artifact>_<version>.part   full artifact being received (version 0) or reconstructed
//! <data_dir>/diff_<artifact>_<version>       received diff of version against version - 1
//! ```
//!
//! A full artifact only ever appears under its final name through [`ArtifactStore::commit`], a rename
//! within the directory. A `.part` file left behind by a crash is never taken for a durable version.

use std::{
    collections::HashMap,
    fs::{self, File, OpenOptions},
    io,
    path::{Path, PathBuf},
};

use crate::{
    chunks,
    types::data_types::{ArtifactId, Version},
};

/// Which files survive once a diff version has been applied.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RetentionPolicy {
    /// Keep the full artifact of version 0 even after later versions have been reconstructed.
    pub keep_base_snapshot: bool,

    /// Keep every received diff after it has been applied.
    pub keep_diffs: bool,
}

impl RetentionPolicy {
    /// Keep only the latest full reconstruction.
    pub const LATEST_ONLY: RetentionPolicy = RetentionPolicy {
        keep_base_snapshot: false,
        keep_diffs: false,
    };

    /// Whether the full artifact of `version` should be kept once a newer full artifact exists.
    pub fn keeps_superseded(&self, version: Version) -> bool {
        version.is_base() && self.keep_base_snapshot
    }
}

/// File naming and housekeeping inside a data directory.
#[derive(Clone, Debug)]
pub struct ArtifactStore {
    data_dir: PathBuf,
}

impl ArtifactStore {
    /// Use `data_dir`, creating it if it does not exist.
    pub fn open(data_dir: impl Into<PathBuf>) -> io::Result<Self> {
        let data_dir = data_dir.into();
        fs::create_dir_all(&data_dir)?;
        Ok(Self { data_dir })
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Path of the full artifact of `version`.
    pub fn full_path(&self, artifact: ArtifactId, version: Version) -> PathBuf {
        self.data_dir.join(format!("img_{}_{}", artifact, version))
    }

    /// Path of the diff that turns `version - 1` into `version`.
    pub fn diff_path(&self, artifact: ArtifactId, version: Version) -> PathBuf {
        self.data_dir.join(format!("diff_{}_{}", artifact, version))
    }

    /// Path the full artifact of `version` is written to before it is committed.
    pub fn staging_path(&self, artifact: ArtifactId, version: Version) -> PathBuf {
        self.data_dir
            .join(format!("img_{}_{}{}", artifact, version, STAGING_SUFFIX))
    }

    /// Path the byte stream of `version` is received into: the staged full artifact for version 0, the
    /// diff otherwise.
    pub fn incoming_path(&self, artifact: ArtifactId, version: Version) -> PathBuf {
        if version.is_base() {
            self.staging_path(artifact, version)
        } else {
            self.diff_path(artifact, version)
        }
    }

    /// Create (or truncate) the incoming file of `version` and size it to `size` zero bytes.
    pub fn create_incoming(
        &self,
        artifact: ArtifactId,
        version: Version,
        size: u64,
    ) -> io::Result<File> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(self.incoming_path(artifact, version))?;
        chunks::preallocate(&file, size)?;
        Ok(file)
    }

    /// Reopen the incoming file of `version` for rewriting, keeping its contents.
    pub fn reopen_incoming(&self, artifact: ArtifactId, version: Version) -> io::Result<File> {
        OpenOptions::new()
            .read(true)
            .write(true)
            .open(self.incoming_path(artifact, version))
    }

    /// Move the staged full artifact of `version` to its final name, making it visible to discovery.
    pub fn commit(&self, artifact: ArtifactId, version: Version) -> io::Result<()> {
        fs::rename(
            self.staging_path(artifact, version),
            self.full_path(artifact, version),
        )
    }

    /// Delete the file at `path`. A file that does not exist counts as deleted.
    pub fn remove(&self, path: &Path) -> io::Result<()> {
        match fs::remove_file(path) {
            Err(err) if err.kind() != io::ErrorKind::NotFound => Err(err),
            _ => Ok(()),
        }
    }

    /// Delete the files that `policy` does not retain once `version` (a diff version) has been
    /// reconstructed into a full artifact.
    pub fn apply_retention(
        &self,
        policy: RetentionPolicy,
        artifact: ArtifactId,
        version: Version,
    ) -> io::Result<()> {
        if let Some(prev) = version.prev() {
            if !policy.keeps_superseded(prev) {
                self.remove(&self.full_path(artifact, prev))?;
            }
        }
        if !policy.keep_diffs {
            self.remove(&self.diff_path(artifact, version))?;
        }
        Ok(())
    }

    /// Find the newest full artifact of every artifact in the data directory.
    pub fn discover(&self) -> io::Result<HashMap<ArtifactId, Version>> {
        let mut latest: HashMap<ArtifactId, Version> = HashMap::new();
        for entry in fs::read_dir(&self.data_dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let name = entry.file_name();
            if let Some((artifact, version)) = name.to_str().and_then(parse_full_name) {
                let newest = latest.entry(artifact).or_insert(version);
                if version > *newest {
                    *newest = version;
                }
            }
        }
        Ok(latest)
    }
}

const STAGING_SUFFIX: &str = ".part";

/// Parse `img_<artifact>_<version>`. Staged names do not parse.
fn parse_full_name(name: &str) -> Option<(ArtifactId, Version)> {
    if name.ends_with(STAGING_SUFFIX) {
        return None;
    }
    let rest = name.strip_prefix("img_")?;
    let (artifact, version) = rest.split_once('_')?;
    Some((
        ArtifactId::new(artifact.parse().ok()?),
        Version::new(version.parse().ok()?),
    ))
}
