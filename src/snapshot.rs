/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Producing the byte stream of each backup version on the primary node.
//!
//! Version 0 is a full archive of the workload's container. Every later version is a binary diff
//! between the archive of that version and the archive of the version before it, so only the diff
//! crosses the network.

use std::{
    fs, io,
    path::{Path, PathBuf},
    sync::Arc,
};

use crate::{
    external::{ContainerRuntime, DiffEngine, ExternalToolError, ImageRef},
    transfer::store::RetentionPolicy,
    types::data_types::Version,
};

/// Something that can produce the stream of every version, in order.
pub trait SnapshotSource {
    /// Produce the stream of `version` and return the path of the file holding it.
    ///
    /// Called with versions `0, 1, 2, ...` in order. `prepare(v)` is only called after `v - 1` has been
    /// confirmed durable on the recovery node.
    fn prepare(&mut self, version: Version) -> Result<PathBuf, SnapshotError>;

    /// Called once `version` is durable on the recovery node, so that local files only needed for
    /// sending it can be removed.
    fn release(&mut self, version: Version) -> Result<(), SnapshotError>;
}

/// [`SnapshotSource`] that commits a running container, saves it as an archive, and diffs successive
/// archives.
pub struct ContainerSnapshotSource {
    runtime: Arc<dyn ContainerRuntime>,
    diff_engine: Arc<dyn DiffEngine>,
    container: String,
    image_name: String,
    work_dir: PathBuf,
    retention: RetentionPolicy,
}

impl ContainerSnapshotSource {
    /// Snapshot `container` into images named `image_name:<version>`, keeping archives and diffs in
    /// `work_dir` (created if missing).
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        diff_engine: Arc<dyn DiffEngine>,
        container: impl Into<String>,
        image_name: impl Into<String>,
        work_dir: impl Into<PathBuf>,
        retention: RetentionPolicy,
    ) -> Result<Self, SnapshotError> {
        let work_dir = work_dir.into();
        fs::create_dir_all(&work_dir)?;
        Ok(Self {
            runtime,
            diff_engine,
            container: container.into(),
            image_name: image_name.into(),
            work_dir,
            retention,
        })
    }

    pub fn archive_path(&self, version: Version) -> PathBuf {
        self.work_dir.join(format!("img_{}", version))
    }

    pub fn diff_path(&self, version: Version) -> PathBuf {
        self.work_dir.join(format!("diff_{}", version))
    }

    fn image(&self, version: Version) -> ImageRef {
        ImageRef::tagged(&self.image_name, version)
    }
}

impl SnapshotSource for ContainerSnapshotSource {
    fn prepare(&mut self, version: Version) -> Result<PathBuf, SnapshotError> {
        let image = self.image(version);
        self.runtime.commit(&self.container, &image)?;

        let archive = self.archive_path(version);
        self.runtime.save(&image, &archive)?;

        let prev = match version.prev() {
            Some(prev) => prev,
            None => return Ok(archive),
        };

        let diff = self.diff_path(version);
        self.diff_engine
            .diff(&self.archive_path(prev), &archive, &diff)?;

        self.runtime.remove_image(&self.image(prev))?;
        if !self.retention.keeps_superseded(prev) {
            remove_if_exists(&self.archive_path(prev))?;
        }

        log::debug!(
            "Prepared version {} of container {} as {}",
            version,
            self.container,
            diff.display()
        );
        Ok(diff)
    }

    fn release(&mut self, version: Version) -> Result<(), SnapshotError> {
        if !version.is_base() && !self.retention.keep_diffs {
            remove_if_exists(&self.diff_path(version))?;
        }
        Ok(())
    }
}

fn remove_if_exists(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(err) if err.kind() != io::ErrorKind::NotFound => Err(err),
        _ => Ok(()),
    }
}

/// Enumerates the ways preparing a version can fail.
#[derive(Debug)]
pub enum SnapshotError {
    /// See [`ExternalToolError`].
    Tool(ExternalToolError),

    Io(io::Error),
}

impl From<ExternalToolError> for SnapshotError {
    fn from(value: ExternalToolError) -> Self {
        SnapshotError::Tool(value)
    }
}

impl From<io::Error> for SnapshotError {
    fn from(value: io::Error) -> Self {
        SnapshotError::Io(value)
    }
}
