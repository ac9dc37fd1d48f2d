/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The sending side of the version transfer protocol, run on the primary node.
//!
//! [`TransferClient::transfer_version`] drives one version to durability:
//! 1. Announce the version (size and digest) until the server accepts it.
//! 2. Send every chunk once. Chunks that fail to arrive are not retried immediately.
//! 3. Ask the server which chunks are still missing and resend exactly those, until none are.
//! 4. Poll the server's status until the version is `Ready`.
//!
//! Every loop backs off according to the configured [`RetryPolicy`](crate::retry::RetryPolicy) and
//! observes the client's [`CancellationToken`].

use std::{
    fs::{self, File},
    io,
    path::Path,
    sync::mpsc::Sender,
    time::SystemTime,
};

use crate::{
    chunks,
    config::TransferClientConfiguration,
    events::*,
    networking::{messages::ArtifactStatus, RecovererStub, RpcError, Transport},
    retry::{CancellationToken, RetryError},
    snapshot::SnapshotError,
    types::{
        crypto_primitives::digest_file,
        data_types::{ArtifactId, ChunkIndex, CryptoHash, Phase, Status, Version},
    },
};

/// What the server reported once no chunks of a version were missing.
enum Confirmation {
    Ready,
    /// The server is receiving the version again, because the whole file did not match its digest.
    Receiving,
}

pub struct TransferClient<T: Transport> {
    stub: RecovererStub<T>,
    configuration: TransferClientConfiguration,
    cancellation: CancellationToken,
    event_publisher: Option<Sender<Event>>,
}

impl<T: Transport> TransferClient<T> {
    pub fn new(
        transport: T,
        configuration: TransferClientConfiguration,
        cancellation: CancellationToken,
        event_publisher: Option<Sender<Event>>,
    ) -> Self {
        Self {
            stub: RecovererStub::new(transport),
            configuration,
            cancellation,
            event_publisher,
        }
    }

    pub fn artifact(&self) -> ArtifactId {
        self.configuration.artifact
    }

    /// Get a mutable reference to the underlying RPC stub.
    pub fn stub_mut(&mut self) -> &mut RecovererStub<T> {
        &mut self.stub
    }

    /// Ask the server what it holds of this client's artifact, retrying transport failures.
    pub fn remote_status(&mut self) -> Result<ArtifactStatus, TransferError> {
        let artifact = self.artifact();
        let mut backoff = self.configuration.retry.backoff();
        loop {
            self.cancellation.check()?;
            match self.stub.query_status(artifact) {
                Ok(status) => return Ok(status),
                Err(RpcError::Transport(err)) => {
                    log::warn!(
                        "Failed to query the status of artifact {}: {:?}",
                        artifact,
                        err
                    );
                    backoff.wait(&self.cancellation)?;
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    /// Transfer the file at `path` as `version` and return once the server reports it `Ready`.
    ///
    /// Returns `Err(TransferError::RemoteAborted)` if the server rolled the version back; the caller
    /// may transfer the same version again.
    pub fn transfer_version(&mut self, version: Version, path: &Path) -> Result<(), TransferError> {
        let size = fs::metadata(path)?.len();
        let chunk_count = chunks::chunk_count(size).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{} is too large to transfer ({} bytes)", path.display(), size),
            )
        })?;
        let digest = digest_file(path)?;
        let mut source = File::open(path)?;

        self.announce(version, size, chunk_count, digest)?;

        for index in chunks::indices(size) {
            self.cancellation.check()?;
            let data = chunks::read_chunk(&mut source, index, size)?;
            self.send_chunk(version, index, data);
        }

        let mut rounds = self.configuration.retry.backoff();
        loop {
            self.fill_gaps(version, &mut source, size)?;
            match self.confirm(version)? {
                Confirmation::Ready => return Ok(()),
                Confirmation::Receiving => rounds.wait(&self.cancellation)?,
            }
        }
    }

    fn announce(
        &mut self,
        version: Version,
        size: u64,
        chunk_count: u32,
        digest: CryptoHash,
    ) -> Result<(), TransferError> {
        let artifact = self.artifact();
        let mut backoff = self.configuration.retry.backoff();
        loop {
            self.cancellation.check()?;
            let accepted = match self.stub.announce_version(artifact, version, size, digest) {
                Ok(Status::Ok) => true,
                // An earlier attempt may have been accepted even though its reply was lost.
                Ok(Status::NotReady) => self.already_announced(version),
                Err(RpcError::Transport(err)) => {
                    log::warn!(
                        "Failed to announce version {} of artifact {}: {:?}",
                        version,
                        artifact,
                        err
                    );
                    false
                }
                Err(err) => return Err(err.into()),
            };

            if accepted {
                Event::AnnounceVersion(AnnounceVersionEvent {
                    timestamp: SystemTime::now(),
                    artifact,
                    version,
                    size,
                    chunk_count,
                })
                .publish(&self.event_publisher);
                return Ok(());
            }

            backoff.wait(&self.cancellation)?;
        }
    }

    fn already_announced(&mut self, version: Version) -> bool {
        let artifact = self.artifact();
        matches!(
            self.stub.query_status(artifact),
            Ok(status) if status.current_version == Some(version) && status.phase != Phase::Stored
        )
    }

    /// Send one chunk. Failures are logged and left for gap filling.
    fn send_chunk(&mut self, version: Version, index: ChunkIndex, data: Vec<u8>) {
        let artifact = self.artifact();
        match self.stub.put_chunk(artifact, version, index, data) {
            Ok(Status::Ok) => (),
            Ok(Status::NotReady) => log::debug!(
                "Chunk {} of artifact {} version {} was refused",
                index,
                artifact,
                version
            ),
            Err(err) => log::warn!(
                "Failed to send chunk {} of artifact {} version {}: {:?}",
                index,
                artifact,
                version,
                err
            ),
        }
    }

    /// Resend whatever the server reports missing until nothing is. Rounds that do not shrink the
    /// missing set count against the retry ceiling.
    fn fill_gaps(
        &mut self,
        version: Version,
        source: &mut File,
        size: u64,
    ) -> Result<(), TransferError> {
        let artifact = self.artifact();
        let mut backoff = self.configuration.retry.backoff();
        let mut last_missing: Option<usize> = None;
        loop {
            self.cancellation.check()?;
            let missing = match self.stub.query_missing(artifact) {
                Ok(missing) => missing,
                Err(RpcError::Transport(err)) => {
                    log::warn!(
                        "Failed to query missing chunks of artifact {}: {:?}",
                        artifact,
                        err
                    );
                    backoff.wait(&self.cancellation)?;
                    continue;
                }
                Err(err) => return Err(err.into()),
            };

            if missing.is_empty() {
                return Ok(());
            }
            if last_missing.map_or(false, |last| missing.len() >= last) {
                backoff.wait(&self.cancellation)?;
            }
            last_missing = Some(missing.len());

            Event::FillGaps(FillGapsEvent {
                timestamp: SystemTime::now(),
                artifact,
                version,
                missing: missing.len(),
            })
            .publish(&self.event_publisher);

            for index in missing {
                self.cancellation.check()?;
                let data = chunks::read_chunk(source, index, size)?;
                self.send_chunk(version, index, data);
            }
        }
    }

    /// Wait until the server has finished `version`.
    fn confirm(&mut self, version: Version) -> Result<Confirmation, TransferError> {
        let artifact = self.artifact();
        let mut backoff = self.configuration.retry.backoff();
        loop {
            self.cancellation.check()?;
            let status = match self.stub.query_status(artifact) {
                Ok(status) => status,
                Err(RpcError::Transport(err)) => {
                    log::warn!(
                        "Failed to query the status of artifact {}: {:?}",
                        artifact,
                        err
                    );
                    backoff.wait(&self.cancellation)?;
                    continue;
                }
                Err(err) => return Err(err.into()),
            };

            match status.current_version {
                Some(current) if current == version => match status.phase {
                    Phase::Ready => {
                        Event::ConfirmVersion(ConfirmVersionEvent {
                            timestamp: SystemTime::now(),
                            artifact,
                            version,
                        })
                        .publish(&self.event_publisher);
                        return Ok(Confirmation::Ready);
                    }
                    Phase::Receiving => return Ok(Confirmation::Receiving),
                    Phase::Stored => self
                        .cancellation
                        .sleep(self.configuration.status_poll_interval)?,
                },
                Some(current) if current > version => {
                    log::warn!(
                        "Artifact {} is already at version {}, past version {}",
                        artifact,
                        current,
                        version
                    );
                    return Ok(Confirmation::Ready);
                }
                _ => return Err(TransferError::RemoteAborted { version }),
            }
        }
    }
}

/// Enumerates the ways backing up a version can fail.
#[derive(Debug)]
pub enum TransferError {
    /// The local file of the version could not be read.
    Io(io::Error),

    /// The server answered with a response that does not belong to the request.
    Rpc(RpcError),

    /// A retry loop hit its ceiling, or the transfer was cancelled.
    Retry(RetryError),

    /// The server rolled `version` back after receiving it.
    RemoteAborted { version: Version },

    /// The version could not be produced.
    Snapshot(SnapshotError),

    /// The server already holds versions of the artifact, up to `current`, so a new version chain
    /// cannot start. Clear the recovery node's data directory or back up under another artifact id.
    AlreadyBackedUp { current: Version },
}

impl From<io::Error> for TransferError {
    fn from(value: io::Error) -> Self {
        TransferError::Io(value)
    }
}

impl From<RpcError> for TransferError {
    fn from(value: RpcError) -> Self {
        TransferError::Rpc(value)
    }
}

impl From<RetryError> for TransferError {
    fn from(value: RetryError) -> Self {
        TransferError::Retry(value)
    }
}

impl From<SnapshotError> for TransferError {
    fn from(value: SnapshotError) -> Self {
        TransferError::Snapshot(value)
    }
}
