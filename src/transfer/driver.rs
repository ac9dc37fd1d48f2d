/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The periodic backup loop of the primary node.

use crate::{
    config::BackupDriverConfiguration,
    networking::Transport,
    retry::{CancellationToken, RetryError},
    snapshot::SnapshotSource,
    types::data_types::Version,
};

use super::client::{TransferClient, TransferError};

/// Produces versions `0, 1, 2, ...` with a [`SnapshotSource`] and transfers each of them with a
/// [`TransferClient`], never starting a version before the previous one is durable.
pub struct BackupDriver<S: SnapshotSource, T: Transport> {
    source: S,
    client: TransferClient<T>,
    configuration: BackupDriverConfiguration,
    cancellation: CancellationToken,
}

impl<S: SnapshotSource, T: Transport> BackupDriver<S, T> {
    pub fn new(
        source: S,
        client: TransferClient<T>,
        configuration: BackupDriverConfiguration,
        cancellation: CancellationToken,
    ) -> Self {
        Self {
            source,
            client,
            configuration,
            cancellation,
        }
    }

    /// Back up versions until cancelled, until `max_versions` versions are durable, or until a version
    /// fails for good.
    ///
    /// A driver always starts a fresh version chain at version 0. If the server already holds versions
    /// of the artifact, this returns `Err(TransferError::AlreadyBackedUp)` before taking any snapshot.
    ///
    /// Returns the number of versions that were made durable.
    pub fn run(&mut self) -> Result<u64, TransferError> {
        match self.client.remote_status() {
            Ok(status) => {
                if let Some(current) = status.current_version {
                    log::error!(
                        "Artifact {} is already at version {} on the server",
                        self.client.artifact(),
                        current
                    );
                    return Err(TransferError::AlreadyBackedUp { current });
                }
            }
            Err(TransferError::Retry(RetryError::Cancelled)) => return Ok(0),
            Err(err) => return Err(err),
        }

        let mut version = Version::BASE;
        loop {
            if let Some(max_versions) = self.configuration.max_versions {
                if version.int() >= max_versions {
                    return Ok(version.int());
                }
            }

            match self.backup_version(version) {
                Ok(()) => log::info!(
                    "Version {} of artifact {} is durable",
                    version,
                    self.client.artifact()
                ),
                Err(TransferError::Retry(RetryError::Cancelled)) => return Ok(version.int()),
                Err(err) => return Err(err),
            }
            version = version.next();

            if self.cancellation.sleep(self.configuration.backup_interval).is_err() {
                return Ok(version.int());
            }
        }
    }

    /// Produce, transfer, and release one version. A version the server rolled back is sent again, up
    /// to `max_version_attempts` times.
    pub fn backup_version(&mut self, version: Version) -> Result<(), TransferError> {
        let path = self.source.prepare(version)?;

        let mut attempts = 1;
        loop {
            match self.client.transfer_version(version, &path) {
                Ok(()) => break,
                Err(TransferError::RemoteAborted { .. })
                    if attempts < self.configuration.max_version_attempts =>
                {
                    log::warn!(
                        "Version {} of artifact {} was rolled back by the server, sending it again",
                        version,
                        self.client.artifact()
                    );
                    attempts += 1;
                }
                Err(err) => return Err(err),
            }
        }

        self.source.release(version)?;
        Ok(())
    }
}
