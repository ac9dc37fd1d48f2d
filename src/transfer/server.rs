/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The receiving side of the version transfer protocol, run on the recovery node.
//!
//! ## Artifact lifecycle
//!
//! The server tracks, for every artifact it has heard of, the latest version it accepted and the phase
//! that version is in:
//!
//! ```text
//! Ready --AnnounceVersion(v = current + 1)--> Receiving --last pending chunk--> Stored --patch--> Ready
//! ```
//!
//! Version 0 is received directly as the full artifact. Every later version is received as a diff
//! against the previous full artifact, and the completion step applies it to reconstruct the new full
//! artifact. Either way the full artifact is written under a staging name and only renamed to its
//! final name once it is complete, so a restarted server never discovers a half-written version. If
//! the patch or the rename fails, the version is rolled back: the current version returns to `v - 1`
//! and the client is expected to send `v` again.
//!
//! ## Concurrency
//!
//! Requests for one artifact serialize on that artifact's mutex, so completion (which includes the
//! patch step) runs while holding it. Requests for different artifacts proceed in parallel.

use std::{
    collections::{BTreeSet, HashMap},
    fs::File,
    io,
    sync::{mpsc::Sender, Arc, Mutex, RwLock},
    time::SystemTime,
};

use crate::{
    chunks,
    config::TransferServerConfiguration,
    events::*,
    external::{ContainerRuntime, DiffEngine},
    networking::{
        messages::{AnnounceVersion, ArtifactStatus, PutChunk},
        RecoveryService,
    },
    recovery::FailoverOrchestrator,
    types::{
        crypto_primitives::{digest, digest_file},
        data_types::{ArtifactId, ChunkIndex, CryptoHash, Phase, Status, Version},
    },
};

use super::store::{ArtifactStore, RetentionPolicy};

/// Server-side state of one artifact.
struct Artifact {
    /// `None` until version 0 has been announced.
    current_version: Option<Version>,
    phase: Phase,
    in_flight: Option<InFlight>,
}

impl Artifact {
    fn new() -> Self {
        Self {
            current_version: None,
            phase: Phase::Ready,
            in_flight: None,
        }
    }

    fn expected_version(&self) -> Version {
        self.current_version
            .map_or(Version::BASE, |version| version.next())
    }
}

/// The version currently being received.
struct InFlight {
    version: Version,
    size: u64,
    digest: CryptoHash,
    file: File,
    pending: BTreeSet<ChunkIndex>,
}

/// A [`RecoveryService`] that stores incoming versions in a data directory and launches them on
/// request.
pub struct TransferServer {
    store: ArtifactStore,
    retention: RetentionPolicy,
    diff_engine: Arc<dyn DiffEngine>,
    orchestrator: FailoverOrchestrator,
    artifacts: RwLock<HashMap<ArtifactId, Arc<Mutex<Artifact>>>>,
    event_publisher: Option<Sender<Event>>,
}

impl TransferServer {
    /// Open the data directory named in `configuration` and pick up every full artifact already in it:
    /// each artifact starts out `Ready` at the newest version found.
    pub fn new(
        configuration: TransferServerConfiguration,
        runtime: Arc<dyn ContainerRuntime>,
        diff_engine: Arc<dyn DiffEngine>,
        event_publisher: Option<Sender<Event>>,
    ) -> io::Result<Self> {
        let store = ArtifactStore::open(configuration.data_dir)?;

        let mut artifacts = HashMap::new();
        for (artifact, version) in store.discover()? {
            log::info!(
                "Found artifact {} at version {} in {}",
                artifact,
                version,
                store.data_dir().display()
            );
            let mut record = Artifact::new();
            record.current_version = Some(version);
            artifacts.insert(artifact, Arc::new(Mutex::new(record)));
        }

        Ok(Self {
            store,
            retention: configuration.retention,
            diff_engine,
            orchestrator: FailoverOrchestrator::new(
                runtime,
                configuration.recovery,
                event_publisher.clone(),
            ),
            artifacts: RwLock::new(artifacts),
            event_publisher,
        })
    }

    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }

    pub fn orchestrator(&self) -> &FailoverOrchestrator {
        &self.orchestrator
    }

    fn existing(&self, artifact: ArtifactId) -> Option<Arc<Mutex<Artifact>>> {
        self.artifacts.read().unwrap().get(&artifact).cloned()
    }

    fn get_or_insert(&self, artifact: ArtifactId) -> Arc<Mutex<Artifact>> {
        if let Some(record) = self.existing(artifact) {
            return record;
        }
        Arc::clone(
            self.artifacts
                .write()
                .unwrap()
                .entry(artifact)
                .or_insert_with(|| Arc::new(Mutex::new(Artifact::new()))),
        )
    }

    fn reject(
        &self,
        artifact: ArtifactId,
        version: Version,
        index: ChunkIndex,
        reason: RejectReason,
    ) -> Status {
        Event::RejectChunk(RejectChunkEvent {
            timestamp: SystemTime::now(),
            artifact,
            version,
            index,
            reason,
        })
        .publish(&self.event_publisher);
        Status::NotReady
    }

    /// Run the completion step of the in-flight version. Only acts while the artifact is `Receiving`.
    fn complete(&self, id: ArtifactId, artifact: &mut Artifact) {
        if artifact.phase != Phase::Receiving {
            return;
        }
        let in_flight = match artifact.in_flight.take() {
            Some(in_flight) => in_flight,
            None => return,
        };
        let InFlight {
            version,
            size,
            digest: expected,
            file,
            ..
        } = in_flight;

        if let Err(err) = file.sync_all() {
            log::warn!("Failed to sync artifact {} version {}: {}", id, version, err);
        }
        drop(file);

        match digest_file(&self.store.incoming_path(id, version)) {
            Ok(actual) if actual == expected => (),
            Ok(_) if size > 0 => {
                log::warn!(
                    "Artifact {} version {} does not match its announced digest, receiving it again",
                    id,
                    version
                );
                match self.store.reopen_incoming(id, version) {
                    Ok(file) => {
                        artifact.in_flight = Some(InFlight {
                            version,
                            size,
                            digest: expected,
                            file,
                            pending: chunks::indices(size).collect(),
                        });
                        return;
                    }
                    Err(err) => {
                        log::error!(
                            "Failed to reopen artifact {} version {}: {}",
                            id,
                            version,
                            err
                        );
                        return self.abort(id, artifact, version);
                    }
                }
            }
            Ok(_) => {
                log::error!(
                    "Empty artifact {} version {} does not match its announced digest",
                    id,
                    version
                );
                return self.abort(id, artifact, version);
            }
            Err(err) => {
                log::error!(
                    "Failed to hash artifact {} version {}: {}",
                    id,
                    version,
                    err
                );
                return self.abort(id, artifact, version);
            }
        }

        artifact.phase = Phase::Stored;

        if let Some(prev) = version.prev() {
            let applied = self.diff_engine.apply(
                &self.store.full_path(id, prev),
                &self.store.diff_path(id, version),
                &self.store.staging_path(id, version),
            );
            if let Err(err) = applied {
                log::error!(
                    "Failed to apply diff of artifact {} version {}: {}",
                    id,
                    version,
                    err
                );
                return self.abort(id, artifact, version);
            }
        }

        if let Err(err) = self.store.commit(id, version) {
            log::error!(
                "Failed to commit artifact {} version {}: {}",
                id,
                version,
                err
            );
            return self.abort(id, artifact, version);
        }

        if !version.is_base() {
            if let Err(err) = self.store.apply_retention(self.retention, id, version) {
                log::warn!(
                    "Failed to clean up superseded files of artifact {}: {}",
                    id,
                    err
                );
            }
        }

        artifact.phase = Phase::Ready;
        Event::CompleteTransfer(CompleteTransferEvent {
            timestamp: SystemTime::now(),
            artifact: id,
            version,
            digest: expected,
        })
        .publish(&self.event_publisher);
    }

    /// Roll `version` back: remove what was received or produced for it and return to `version - 1`.
    fn abort(&self, id: ArtifactId, artifact: &mut Artifact, version: Version) {
        for path in [
            self.store.incoming_path(id, version),
            self.store.staging_path(id, version),
        ] {
            if let Err(err) = self.store.remove(&path) {
                log::warn!("Failed to remove {}: {}", path.display(), err);
            }
        }

        artifact.in_flight = None;
        artifact.current_version = version.prev();
        artifact.phase = Phase::Ready;

        Event::AbortTransfer(AbortTransferEvent {
            timestamp: SystemTime::now(),
            artifact: id,
            version,
        })
        .publish(&self.event_publisher);
    }
}

impl RecoveryService for TransferServer {
    fn announce_version(&self, request: AnnounceVersion) -> Status {
        let AnnounceVersion {
            artifact: id,
            version,
            size,
            digest,
        } = request;

        let record = self.get_or_insert(id);
        let mut guard = record.lock().unwrap();
        let artifact = &mut *guard;

        if artifact.phase != Phase::Ready || version != artifact.expected_version() {
            log::debug!(
                "Refusing announcement of artifact {} version {}: current {:?}, {:?}",
                id,
                version,
                artifact.current_version,
                artifact.phase
            );
            return Status::NotReady;
        }

        let chunk_count = match chunks::chunk_count(size) {
            Some(chunk_count) => chunk_count,
            None => {
                log::warn!(
                    "Refusing announcement of artifact {} version {}: {} bytes is too large",
                    id,
                    version,
                    size
                );
                return Status::NotReady;
            }
        };

        let file = match self.store.create_incoming(id, version, size) {
            Ok(file) => file,
            Err(err) => {
                log::error!(
                    "Failed to create the file for artifact {} version {}: {}",
                    id,
                    version,
                    err
                );
                return Status::NotReady;
            }
        };

        let pending: BTreeSet<ChunkIndex> = chunks::indices(size).collect();
        artifact.current_version = Some(version);
        artifact.phase = Phase::Receiving;
        artifact.in_flight = Some(InFlight {
            version,
            size,
            digest,
            file,
            pending,
        });

        Event::StartTransfer(StartTransferEvent {
            timestamp: SystemTime::now(),
            artifact: id,
            version,
            size,
            chunk_count,
        })
        .publish(&self.event_publisher);

        if chunk_count == 0 {
            self.complete(id, artifact);
        }

        Status::Ok
    }

    fn query_missing(&self, artifact: ArtifactId) -> Vec<ChunkIndex> {
        let record = match self.existing(artifact) {
            Some(record) => record,
            None => return Vec::new(),
        };
        let artifact = record.lock().unwrap();
        match (&artifact.phase, &artifact.in_flight) {
            (Phase::Receiving, Some(in_flight)) => in_flight.pending.iter().copied().collect(),
            _ => Vec::new(),
        }
    }

    fn put_chunk(&self, request: PutChunk) -> Status {
        let PutChunk {
            artifact: id,
            version,
            index,
            data,
            checksum,
        } = request;

        let record = match self.existing(id) {
            Some(record) => record,
            None => return self.reject(id, version, index, RejectReason::NotInFlight),
        };
        let mut guard = record.lock().unwrap();
        let artifact = &mut *guard;

        let in_flight = match artifact.in_flight.as_mut() {
            Some(in_flight) if in_flight.version == version && artifact.phase == Phase::Receiving => {
                in_flight
            }
            _ => return self.reject(id, version, index, RejectReason::NotInFlight),
        };

        let expected_len = match chunks::chunk_len(index, in_flight.size) {
            Some(len) => len,
            None => return self.reject(id, version, index, RejectReason::OutOfRange),
        };
        if data.len() as u64 != expected_len {
            return self.reject(id, version, index, RejectReason::LengthMismatch);
        }
        if digest(&data) != checksum {
            return self.reject(id, version, index, RejectReason::ChecksumMismatch);
        }

        if let Err(err) = chunks::place(&mut in_flight.file, index, &data) {
            log::error!(
                "Failed to write chunk {} of artifact {} version {}: {}",
                index,
                id,
                version,
                err
            );
            return Status::NotReady;
        }

        if in_flight.pending.remove(&index) && in_flight.pending.is_empty() {
            self.complete(id, artifact);
        }

        Status::Ok
    }

    fn trigger_recovery(&self, artifact: ArtifactId) -> Status {
        match self.query_status(artifact).durable_version() {
            Some(version) => {
                self.orchestrator
                    .recover(artifact, version, self.store.full_path(artifact, version));
            }
            None => log::warn!(
                "Asked to recover artifact {}, which has no durable version",
                artifact
            ),
        }
        Status::Ok
    }

    fn query_status(&self, artifact: ArtifactId) -> ArtifactStatus {
        match self.existing(artifact) {
            Some(record) => {
                let record = record.lock().unwrap();
                ArtifactStatus {
                    current_version: record.current_version,
                    phase: record.phase,
                }
            }
            None => ArtifactStatus::unknown(),
        }
    }
}
