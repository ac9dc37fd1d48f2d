/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Tests of the version transfer protocol: a [`TransferClient`] (or a raw [`RecovererStub`]) talking to
//! a [`TransferServer`] through in-process transports, some of which lose or tamper with messages.

use std::{
    fs,
    path::PathBuf,
    sync::{mpsc, Arc},
    thread,
    time::Duration,
};

use log::LevelFilter;
use standby_rs::{
    chunks::{self, CHUNK_SIZE},
    config::{BackupDriverConfiguration, TransferClientConfiguration, TransferServerConfiguration},
    events::{Event, RejectReason},
    external::DiffEngine,
    networking::{
        messages::{ArtifactStatus, Request},
        RecovererStub, RecoveryService, Transport,
    },
    retry::{CancellationToken, RetryError, RetryPolicy},
    snapshot::{ContainerSnapshotSource, SnapshotError, SnapshotSource},
    transfer::{BackupDriver, RetentionPolicy, TransferClient, TransferError, TransferServer},
    types::{
        crypto_primitives::digest,
        data_types::{ArtifactId, ChunkIndex, Phase, Status, Version},
    },
};

mod common;

use common::{
    diff::{FlakyDiff, Splice, SpliceDiff},
    fs::{patterned_bytes, ScratchDir},
    logging::setup_logger,
    network::{LocalTransport, LossyTransport, RecordingService, TamperingTransport},
    runtime::{FakeRuntime, RuntimeCall},
};

fn fast_retry() -> RetryPolicy {
    RetryPolicy::builder()
        .initial_delay(Duration::from_millis(1))
        .max_delay(Duration::from_millis(20))
        .max_attempts(Some(200))
        .jitter(false)
        .build()
}

fn new_server(
    data_dir: &ScratchDir,
    diff_engine: Arc<dyn DiffEngine>,
    event_publisher: Option<mpsc::Sender<Event>>,
) -> Arc<TransferServer> {
    Arc::new(
        TransferServer::new(
            TransferServerConfiguration::builder()
                .data_dir(data_dir.path())
                .build(),
            Arc::new(FakeRuntime::default()),
            diff_engine,
            event_publisher,
        )
        .unwrap(),
    )
}

fn new_client<T: Transport>(transport: T, artifact: u32) -> TransferClient<T> {
    TransferClient::new(
        transport,
        TransferClientConfiguration::builder()
            .artifact(ArtifactId::new(artifact))
            .retry(fast_retry())
            .status_poll_interval(Duration::from_millis(5))
            .build(),
        CancellationToken::new(),
        None,
    )
}

fn ready_at(version: u64) -> ArtifactStatus {
    ArtifactStatus {
        current_version: Some(Version::new(version)),
        phase: Phase::Ready,
    }
}

fn completed_versions(event_subscriber: &mpsc::Receiver<Event>) -> Vec<Version> {
    event_subscriber
        .try_iter()
        .filter_map(|event| match event {
            Event::CompleteTransfer(complete_transfer_event) => Some(complete_transfer_event.version),
            _ => None,
        })
        .collect()
}

/// Backs up a 5 MiB base version and a 2 KiB diff of artifact 7, and checks that the recovery node ends
/// up with exactly the reconstructed second version.
#[test]
fn base_and_diff_versions_are_reconstructed_test() {
    setup_logger(LevelFilter::Debug);

    // 1. Start a server and a client connected to it.
    let data_dir = ScratchDir::new("e2e_server");
    let work_dir = ScratchDir::new("e2e_client");
    let server = new_server(&data_dir, Arc::new(SpliceDiff), None);
    let mut client = new_client(LocalTransport::new(Arc::clone(&server)), 7);
    let artifact = ArtifactId::new(7);

    // 2. Transfer version 0: five full chunks.
    let base = patterned_bytes(5_242_880, 0);
    assert_eq!(chunks::chunk_count(base.len() as u64), Some(5));
    let base_path = work_dir.write("img_0", &base);
    client.transfer_version(Version::BASE, &base_path).unwrap();

    assert_eq!(server.query_status(artifact), ready_at(0));
    let stored_base = server.store().full_path(artifact, Version::BASE);
    assert_eq!(fs::read(&stored_base).unwrap(), base);

    // 3. Transfer version 1 as a 2048-byte diff.
    let splice = Splice {
        new_len: base.len() as u64,
        offset: 3_000_000,
        bytes: patterned_bytes(2028, 9),
    };
    let patch = splice.encode();
    assert_eq!(patch.len(), 2048);
    let diff_path = work_dir.write("diff_1", &patch);
    client.transfer_version(Version::new(1), &diff_path).unwrap();

    // 4. The server holds only the reconstruction of version 1.
    assert_eq!(server.query_status(artifact), ready_at(1));
    assert_eq!(
        fs::read(server.store().full_path(artifact, Version::new(1))).unwrap(),
        splice.apply_to(&base)
    );
    assert!(!stored_base.exists());
    assert!(!server.store().diff_path(artifact, Version::new(1)).exists());
}

#[test]
fn missing_chunks_are_reported_until_received_test() {
    setup_logger(LevelFilter::Debug);

    let data_dir = ScratchDir::new("missing_server");
    let server = new_server(&data_dir, Arc::new(SpliceDiff), None);
    let mut stub = RecovererStub::new(LocalTransport::new(Arc::clone(&server)));
    let artifact = ArtifactId::new(7);

    let data = patterned_bytes(5 * CHUNK_SIZE as usize, 3);
    assert_eq!(
        stub.announce_version(artifact, Version::BASE, data.len() as u64, digest(&data))
            .unwrap(),
        Status::Ok
    );

    // Send chunks 0, 1, and 2 of 5.
    for (index, bytes) in chunks::split(&data).take(3) {
        assert_eq!(
            stub.put_chunk(artifact, Version::BASE, index, bytes.to_vec())
                .unwrap(),
            Status::Ok
        );
    }
    assert_eq!(
        stub.query_missing(artifact).unwrap(),
        vec![ChunkIndex::new(3), ChunkIndex::new(4)]
    );
    assert_eq!(
        stub.query_status(artifact).unwrap(),
        ArtifactStatus {
            current_version: Some(Version::BASE),
            phase: Phase::Receiving,
        }
    );

    // Re-sending an accepted chunk is harmless.
    let (index, bytes) = chunks::split(&data).next().unwrap();
    assert_eq!(
        stub.put_chunk(artifact, Version::BASE, index, bytes.to_vec())
            .unwrap(),
        Status::Ok
    );
    assert_eq!(stub.query_missing(artifact).unwrap().len(), 2);

    // Send chunks 3 and 4.
    for (index, bytes) in chunks::split(&data).skip(3) {
        stub.put_chunk(artifact, Version::BASE, index, bytes.to_vec())
            .unwrap();
    }
    assert!(stub.query_missing(artifact).unwrap().is_empty());
    assert_eq!(stub.query_status(artifact).unwrap(), ready_at(0));
    assert_eq!(
        fs::read(server.store().full_path(artifact, Version::BASE)).unwrap(),
        data
    );
}

#[test]
fn announcements_out_of_order_are_refused_test() {
    setup_logger(LevelFilter::Debug);

    let data_dir = ScratchDir::new("announce_server");
    let server = new_server(&data_dir, Arc::new(SpliceDiff), None);
    let mut stub = RecovererStub::new(LocalTransport::new(Arc::clone(&server)));
    let artifact = ArtifactId::new(3);

    let data = patterned_bytes(CHUNK_SIZE as usize + 10, 1);
    let size = data.len() as u64;
    let hash = digest(&data);

    // Version 1 cannot come before version 0.
    assert_eq!(
        stub.announce_version(artifact, Version::new(1), size, hash)
            .unwrap(),
        Status::NotReady
    );
    assert_eq!(stub.query_status(artifact).unwrap().current_version, None);

    assert_eq!(
        stub.announce_version(artifact, Version::BASE, size, hash)
            .unwrap(),
        Status::Ok
    );
    let receiving = stub.query_status(artifact).unwrap();
    let missing = stub.query_missing(artifact).unwrap();

    // Neither a repeated nor a next announcement changes anything while version 0 is in flight.
    for version in [Version::BASE, Version::new(1)] {
        assert_eq!(
            stub.announce_version(artifact, version, size, hash).unwrap(),
            Status::NotReady
        );
        assert_eq!(stub.query_status(artifact).unwrap(), receiving);
        assert_eq!(stub.query_missing(artifact).unwrap(), missing);
    }

    // Chunks for the wrong version, outside the stream, or of the wrong length are refused.
    let first = data[..CHUNK_SIZE as usize].to_vec();
    assert_eq!(
        stub.put_chunk(artifact, Version::new(1), ChunkIndex::new(0), first.clone())
            .unwrap(),
        Status::NotReady
    );
    assert_eq!(
        stub.put_chunk(artifact, Version::BASE, ChunkIndex::new(2), vec![0; 10])
            .unwrap(),
        Status::NotReady
    );
    assert_eq!(
        stub.put_chunk(artifact, Version::BASE, ChunkIndex::new(1), vec![0; 11])
            .unwrap(),
        Status::NotReady
    );
    assert_eq!(stub.query_missing(artifact).unwrap(), missing);
}

#[test]
fn empty_version_completes_on_announcement_test() {
    let data_dir = ScratchDir::new("empty_server");
    let server = new_server(&data_dir, Arc::new(SpliceDiff), None);
    let mut stub = RecovererStub::new(LocalTransport::new(Arc::clone(&server)));
    let artifact = ArtifactId::new(4);

    assert_eq!(
        stub.announce_version(artifact, Version::BASE, 0, digest(&[]))
            .unwrap(),
        Status::Ok
    );
    assert_eq!(stub.query_status(artifact).unwrap(), ready_at(0));
    assert!(stub.query_missing(artifact).unwrap().is_empty());
}

/// Several senders deliver the chunks of one version at the same time. The version completes exactly
/// once, and every chunk ends up in place.
#[test]
fn concurrent_chunks_complete_the_version_once_test() {
    setup_logger(LevelFilter::Debug);

    let data_dir = ScratchDir::new("concurrent_server");
    let (event_publisher, event_subscriber) = mpsc::channel();
    let server = new_server(&data_dir, Arc::new(SpliceDiff), Some(event_publisher));
    let artifact = ArtifactId::new(9);

    let data = Arc::new(patterned_bytes(6 * CHUNK_SIZE as usize + 100, 8));
    let mut stub = RecovererStub::new(LocalTransport::new(Arc::clone(&server)));
    assert_eq!(
        stub.announce_version(artifact, Version::BASE, data.len() as u64, digest(&data))
            .unwrap(),
        Status::Ok
    );

    // 1. Four senders each send every chunk, starting at different chunks.
    let senders: Vec<_> = (0..4)
        .map(|sender| {
            let server = Arc::clone(&server);
            let data = Arc::clone(&data);
            thread::spawn(move || {
                let mut stub = RecovererStub::new(LocalTransport::new(server));
                let pieces: Vec<(ChunkIndex, &[u8])> = chunks::split(&data).collect();
                for i in 0..pieces.len() {
                    let (index, bytes) = pieces[(i + 2 * sender) % pieces.len()];
                    stub.put_chunk(artifact, Version::BASE, index, bytes.to_vec())
                        .unwrap();
                }
            })
        })
        .collect();
    for sender in senders {
        sender.join().unwrap();
    }

    // 2. One completion, and the stored artifact is exactly the data sent.
    assert_eq!(completed_versions(&event_subscriber), vec![Version::BASE]);
    assert_eq!(server.query_status(artifact), ready_at(0));
    assert_eq!(
        fs::read(server.store().full_path(artifact, Version::BASE)).unwrap(),
        *data
    );
}

#[test]
fn chunk_after_completion_is_refused_test() {
    setup_logger(LevelFilter::Debug);

    let data_dir = ScratchDir::new("late_chunk_server");
    let (event_publisher, event_subscriber) = mpsc::channel();
    let server = new_server(&data_dir, Arc::new(SpliceDiff), Some(event_publisher));
    let mut stub = RecovererStub::new(LocalTransport::new(Arc::clone(&server)));
    let artifact = ArtifactId::new(6);

    let data = patterned_bytes(2 * CHUNK_SIZE as usize + 7, 6);
    stub.announce_version(artifact, Version::BASE, data.len() as u64, digest(&data))
        .unwrap();
    for (index, bytes) in chunks::split(&data) {
        stub.put_chunk(artifact, Version::BASE, index, bytes.to_vec())
            .unwrap();
    }
    assert_eq!(completed_versions(&event_subscriber), vec![Version::BASE]);

    // A late copy of chunk 0, with different contents, changes nothing.
    let late = vec![0; CHUNK_SIZE as usize];
    assert_eq!(
        stub.put_chunk(artifact, Version::BASE, ChunkIndex::new(0), late)
            .unwrap(),
        Status::NotReady
    );

    let events: Vec<Event> = event_subscriber.try_iter().collect();
    assert_eq!(events.len(), 1);
    assert!(matches!(
        &events[0],
        Event::RejectChunk(reject_chunk_event)
            if reject_chunk_event.reason == RejectReason::NotInFlight
    ));
    assert_eq!(server.query_status(artifact), ready_at(0));
    assert_eq!(
        fs::read(server.store().full_path(artifact, Version::BASE)).unwrap(),
        data
    );
}

/// Every chunk passes its own checksum, but the file they add up to does not match the announced digest.
#[test]
fn whole_file_digest_mismatch_reopens_every_chunk_test() {
    setup_logger(LevelFilter::Debug);

    let data_dir = ScratchDir::new("digest_server");
    let (event_publisher, event_subscriber) = mpsc::channel();
    let server = new_server(&data_dir, Arc::new(SpliceDiff), Some(event_publisher));
    let mut stub = RecovererStub::new(LocalTransport::new(Arc::clone(&server)));
    let artifact = ArtifactId::new(12);

    let data = patterned_bytes(3 * CHUNK_SIZE as usize + 1, 12);
    stub.announce_version(artifact, Version::BASE, data.len() as u64, digest(b"other"))
        .unwrap();
    for (index, bytes) in chunks::split(&data) {
        assert_eq!(
            stub.put_chunk(artifact, Version::BASE, index, bytes.to_vec())
                .unwrap(),
            Status::Ok
        );
    }

    // 1. Nothing completed, and every chunk is pending again.
    assert!(completed_versions(&event_subscriber).is_empty());
    assert_eq!(
        stub.query_status(artifact).unwrap(),
        ArtifactStatus {
            current_version: Some(Version::BASE),
            phase: Phase::Receiving,
        }
    );
    assert_eq!(
        stub.query_missing(artifact).unwrap(),
        (0..4).map(ChunkIndex::new).collect::<Vec<_>>()
    );
    assert!(!server.store().full_path(artifact, Version::BASE).exists());

    // 2. The reopened version still accepts chunks.
    let (index, bytes) = chunks::split(&data).next().unwrap();
    assert_eq!(
        stub.put_chunk(artifact, Version::BASE, index, bytes.to_vec())
            .unwrap(),
        Status::Ok
    );
    assert_eq!(stub.query_missing(artifact).unwrap().len(), 3);
}

/// Chunk 1 is replaced in transit, checksum included, so only the whole-file digest can catch it. The
/// client sends the version again and the server ends up with the right bytes.
#[test]
fn chunk_replaced_in_transit_is_received_again_test() {
    setup_logger(LevelFilter::Debug);

    let data_dir = ScratchDir::new("replaced_server");
    let work_dir = ScratchDir::new("replaced_client");
    let (event_publisher, event_subscriber) = mpsc::channel();
    let server = new_server(&data_dir, Arc::new(SpliceDiff), Some(event_publisher));

    let mut replaced = false;
    let transport = TamperingTransport::new(
        LocalTransport::new(Arc::clone(&server)),
        move |request: &mut Request| {
            if let Request::PutChunk(put_chunk) = request {
                if put_chunk.index == ChunkIndex::new(1) && !replaced {
                    put_chunk.data.iter_mut().for_each(|byte| *byte = 0);
                    put_chunk.checksum = digest(&put_chunk.data);
                    replaced = true;
                }
            }
        },
    );
    let mut client = new_client(transport, 13);

    let data = patterned_bytes(3 * CHUNK_SIZE as usize + 99, 13);
    let path = work_dir.write("img_0", &data);
    client.transfer_version(Version::BASE, &path).unwrap();

    let artifact = ArtifactId::new(13);
    assert_eq!(server.query_status(artifact), ready_at(0));
    assert_eq!(
        fs::read(server.store().full_path(artifact, Version::BASE)).unwrap(),
        data
    );
    assert_eq!(completed_versions(&event_subscriber), vec![Version::BASE]);
}

#[test]
fn empty_version_with_wrong_digest_is_rolled_back_test() {
    setup_logger(LevelFilter::Debug);

    let data_dir = ScratchDir::new("empty_digest_server");
    let (event_publisher, event_subscriber) = mpsc::channel();
    let server = new_server(&data_dir, Arc::new(SpliceDiff), Some(event_publisher));
    let mut stub = RecovererStub::new(LocalTransport::new(Arc::clone(&server)));
    let artifact = ArtifactId::new(14);

    assert_eq!(
        stub.announce_version(artifact, Version::BASE, 0, digest(b"not empty"))
            .unwrap(),
        Status::Ok
    );
    assert_eq!(stub.query_status(artifact).unwrap(), ArtifactStatus::unknown());
    assert!(event_subscriber
        .try_iter()
        .any(|event| matches!(event, Event::AbortTransfer(abort) if abort.version == Version::BASE)));
    assert!(!server.store().full_path(artifact, Version::BASE).exists());
    assert!(!server.store().staging_path(artifact, Version::BASE).exists());

    // The version can be announced again, correctly this time.
    assert_eq!(
        stub.announce_version(artifact, Version::BASE, 0, digest(&[]))
            .unwrap(),
        Status::Ok
    );
    assert_eq!(stub.query_status(artifact).unwrap(), ready_at(0));
}

#[test]
fn oversized_announcement_is_refused_test() {
    let data_dir = ScratchDir::new("oversized_server");
    let server = new_server(&data_dir, Arc::new(SpliceDiff), None);
    let mut stub = RecovererStub::new(LocalTransport::new(Arc::clone(&server)));
    let artifact = ArtifactId::new(15);

    for size in [chunks::MAX_STREAM_SIZE + 1, u64::MAX] {
        assert_eq!(
            stub.announce_version(artifact, Version::BASE, size, digest(&[]))
                .unwrap(),
            Status::NotReady
        );
    }
    assert_eq!(stub.query_status(artifact).unwrap(), ArtifactStatus::unknown());
    assert!(stub.query_missing(artifact).unwrap().is_empty());
    assert!(!server.store().incoming_path(artifact, Version::BASE).exists());
}

/// Corrupts chunk 2 on its first trip. The server must refuse it, and the client must fill the gap.
#[test]
fn corrupted_chunk_is_refused_and_refilled_test() {
    setup_logger(LevelFilter::Debug);

    let data_dir = ScratchDir::new("corrupt_server");
    let work_dir = ScratchDir::new("corrupt_client");
    let (event_publisher, event_subscriber) = mpsc::channel();
    let server = new_server(&data_dir, Arc::new(SpliceDiff), Some(event_publisher));

    let mut corrupted = false;
    let transport = TamperingTransport::new(
        LocalTransport::new(Arc::clone(&server)),
        move |request: &mut Request| {
            if let Request::PutChunk(put_chunk) = request {
                if put_chunk.index == ChunkIndex::new(2) && !corrupted {
                    put_chunk.data[0] ^= 0xff;
                    corrupted = true;
                }
            }
        },
    );
    let mut client = new_client(transport, 5);

    let data = patterned_bytes(3 * CHUNK_SIZE as usize + 512, 5);
    let path = work_dir.write("img_0", &data);
    client.transfer_version(Version::BASE, &path).unwrap();

    let artifact = ArtifactId::new(5);
    assert_eq!(server.query_status(artifact), ready_at(0));
    assert_eq!(
        fs::read(server.store().full_path(artifact, Version::BASE)).unwrap(),
        data
    );

    let rejections: Vec<(ChunkIndex, RejectReason)> = event_subscriber
        .try_iter()
        .filter_map(|event| match event {
            Event::RejectChunk(reject_chunk_event) => {
                Some((reject_chunk_event.index, reject_chunk_event.reason))
            }
            _ => None,
        })
        .collect();
    assert_eq!(
        rejections,
        vec![(ChunkIndex::new(2), RejectReason::ChecksumMismatch)]
    );
}

/// Loses every third message, alternately on the way to the server and on the way back.
#[test]
fn lossy_transport_converges_test() {
    setup_logger(LevelFilter::Debug);

    let data_dir = ScratchDir::new("lossy_server");
    let work_dir = ScratchDir::new("lossy_client");
    let server = new_server(&data_dir, Arc::new(SpliceDiff), None);
    let mut client = new_client(
        LossyTransport::new(LocalTransport::new(Arc::clone(&server)), 3),
        9,
    );
    let artifact = ArtifactId::new(9);

    let base = patterned_bytes(4 * CHUNK_SIZE as usize + 17, 2);
    let base_path = work_dir.write("img_0", &base);
    client.transfer_version(Version::BASE, &base_path).unwrap();
    assert_eq!(server.query_status(artifact), ready_at(0));

    let splice = Splice {
        new_len: base.len() as u64 + 100,
        offset: 2 * CHUNK_SIZE - 50,
        bytes: patterned_bytes(CHUNK_SIZE as usize + 1000, 8),
    };
    let diff_path = work_dir.write("diff_1", &splice.encode());
    client.transfer_version(Version::new(1), &diff_path).unwrap();

    assert_eq!(server.query_status(artifact), ready_at(1));
    assert_eq!(
        fs::read(server.store().full_path(artifact, Version::new(1))).unwrap(),
        splice.apply_to(&base)
    );
}

#[test]
fn failed_patch_rolls_the_version_back_test() {
    setup_logger(LevelFilter::Debug);

    let data_dir = ScratchDir::new("rollback_server");
    let work_dir = ScratchDir::new("rollback_client");
    let (event_publisher, event_subscriber) = mpsc::channel();
    let server = new_server(
        &data_dir,
        Arc::new(FlakyDiff::failing(1)),
        Some(event_publisher),
    );
    let mut client = new_client(LocalTransport::new(Arc::clone(&server)), 7);
    let artifact = ArtifactId::new(7);

    let base = patterned_bytes(CHUNK_SIZE as usize * 2, 4);
    client
        .transfer_version(Version::BASE, &work_dir.write("img_0", &base))
        .unwrap();

    let splice = Splice {
        new_len: base.len() as u64,
        offset: 10,
        bytes: vec![7; 64],
    };
    let diff_path = work_dir.write("diff_1", &splice.encode());

    // 1. The first attempt is rolled back by the server.
    match client.transfer_version(Version::new(1), &diff_path) {
        Err(TransferError::RemoteAborted { version }) => assert_eq!(version, Version::new(1)),
        other => panic!("expected a rollback, got {:?}", other),
    }
    assert_eq!(server.query_status(artifact), ready_at(0));
    assert!(server.store().full_path(artifact, Version::BASE).exists());
    assert!(!server.store().full_path(artifact, Version::new(1)).exists());
    assert!(!server.store().diff_path(artifact, Version::new(1)).exists());
    assert!(!server.store().staging_path(artifact, Version::new(1)).exists());
    assert!(event_subscriber
        .try_iter()
        .any(|event| matches!(event, Event::AbortTransfer(abort) if abort.version == Version::new(1))));

    // 2. Sending the same version again succeeds.
    client.transfer_version(Version::new(1), &diff_path).unwrap();
    assert_eq!(server.query_status(artifact), ready_at(1));
    assert_eq!(
        fs::read(server.store().full_path(artifact, Version::new(1))).unwrap(),
        splice.apply_to(&base)
    );
}

#[test]
fn retry_ceiling_ends_the_announcement_test() {
    let mut client = TransferClient::new(
        LocalTransport::new(Arc::new(RecordingService::default())),
        TransferClientConfiguration::builder()
            .artifact(ArtifactId::new(1))
            .retry(
                RetryPolicy::builder()
                    .initial_delay(Duration::from_millis(1))
                    .max_attempts(Some(3))
                    .jitter(false)
                    .build(),
            )
            .build(),
        CancellationToken::new(),
        None,
    );
    let work_dir = ScratchDir::new("ceiling_client");
    let path = work_dir.write("img_0", b"never accepted");

    match client.transfer_version(Version::BASE, &path) {
        Err(TransferError::Retry(RetryError::Exhausted { attempts })) => assert_eq!(attempts, 3),
        other => panic!("expected the retry ceiling, got {:?}", other),
    }
}

/// Wraps a [`ContainerSnapshotSource`] and changes the container's contents before each version.
struct EvolvingContainer {
    runtime: Arc<FakeRuntime>,
    inner: ContainerSnapshotSource,
}

impl EvolvingContainer {
    fn contents(version: Version) -> Vec<u8> {
        let mut contents = patterned_bytes(1_500_000, 6);
        let start = 100_000 * version.int() as usize;
        contents[start..start + 500].fill(version.int() as u8 + 1);
        contents
    }
}

impl SnapshotSource for EvolvingContainer {
    fn prepare(&mut self, version: Version) -> Result<PathBuf, SnapshotError> {
        self.runtime.set_container(Self::contents(version));
        self.inner.prepare(version)
    }

    fn release(&mut self, version: Version) -> Result<(), SnapshotError> {
        self.inner.release(version)
    }
}

/// Runs the backup driver for three versions against a server whose first patch attempt fails.
#[test]
fn backup_driver_resends_rolled_back_versions_test() {
    setup_logger(LevelFilter::Debug);

    // 1. Set up the recovery node.
    let data_dir = ScratchDir::new("driver_server");
    let server = new_server(&data_dir, Arc::new(FlakyDiff::failing(1)), None);

    // 2. Set up the primary node: a container snapshotted into images named kvrunning:<version>.
    let work_dir = ScratchDir::new("driver_client");
    let runtime = Arc::new(FakeRuntime::default());
    let source = EvolvingContainer {
        runtime: Arc::clone(&runtime),
        inner: ContainerSnapshotSource::new(
            runtime.clone(),
            Arc::new(SpliceDiff),
            "web",
            "kvrunning",
            work_dir.path(),
            RetentionPolicy::LATEST_ONLY,
        )
        .unwrap(),
    };
    let cancellation = CancellationToken::new();
    let mut driver = BackupDriver::new(
        source,
        new_client(LocalTransport::new(Arc::clone(&server)), 2),
        BackupDriverConfiguration::builder()
            .max_versions(Some(3))
            .build(),
        cancellation,
    );

    // 3. Run it to completion.
    assert_eq!(driver.run().unwrap(), 3);

    let artifact = ArtifactId::new(2);
    assert_eq!(server.query_status(artifact), ready_at(2));
    assert_eq!(
        fs::read(server.store().full_path(artifact, Version::new(2))).unwrap(),
        EvolvingContainer::contents(Version::new(2))
    );

    // 4. Superseded images and files are gone on the primary node.
    let removed: Vec<String> = runtime
        .calls()
        .into_iter()
        .filter_map(|call| match call {
            RuntimeCall::RemoveImage { image } => Some(image.to_string()),
            _ => None,
        })
        .collect();
    assert_eq!(removed, vec!["kvrunning:0", "kvrunning:1"]);
    let mut local_files: Vec<String> = fs::read_dir(work_dir.path())
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    local_files.sort();
    assert_eq!(local_files, vec!["img_2"]);
}

#[test]
fn cancelled_driver_stops_before_sending_test() {
    let data_dir = ScratchDir::new("cancel_server");
    let work_dir = ScratchDir::new("cancel_client");
    let server = new_server(&data_dir, Arc::new(SpliceDiff), None);
    let runtime = Arc::new(FakeRuntime::default());
    let cancellation = CancellationToken::new();
    cancellation.cancel();

    let mut driver = BackupDriver::new(
        ContainerSnapshotSource::new(
            runtime,
            Arc::new(SpliceDiff),
            "web",
            "kvrunning",
            work_dir.path(),
            RetentionPolicy::LATEST_ONLY,
        )
        .unwrap(),
        TransferClient::new(
            LocalTransport::new(Arc::clone(&server)),
            TransferClientConfiguration::builder()
                .artifact(ArtifactId::new(2))
                .build(),
            cancellation.clone(),
            None,
        ),
        BackupDriverConfiguration::default(),
        cancellation,
    );

    assert_eq!(driver.run().unwrap(), 0);
    assert_eq!(
        server.query_status(ArtifactId::new(2)),
        ArtifactStatus::unknown()
    );
}

/// A driver only starts a version chain on a server that holds nothing of its artifact.
#[test]
fn driver_refuses_an_artifact_the_server_already_holds_test() {
    setup_logger(LevelFilter::Debug);

    let data_dir = ScratchDir::new("holding_server");
    let work_dir = ScratchDir::new("holding_client");
    let server = new_server(&data_dir, Arc::new(SpliceDiff), None);

    // 1. An earlier run left version 0 of artifact 2 on the server.
    new_client(LocalTransport::new(Arc::clone(&server)), 2)
        .transfer_version(Version::BASE, &work_dir.write("earlier", b"earlier run"))
        .unwrap();

    // 2. A new driver for the same artifact stops before taking a snapshot.
    let runtime = Arc::new(FakeRuntime::default());
    let mut driver = BackupDriver::new(
        ContainerSnapshotSource::new(
            runtime.clone(),
            Arc::new(SpliceDiff),
            "web",
            "kvrunning",
            work_dir.path(),
            RetentionPolicy::LATEST_ONLY,
        )
        .unwrap(),
        new_client(LocalTransport::new(Arc::clone(&server)), 2),
        BackupDriverConfiguration::default(),
        CancellationToken::new(),
    );

    match driver.run() {
        Err(TransferError::AlreadyBackedUp { current }) => assert_eq!(current, Version::BASE),
        other => panic!("expected a refusal, got {:?}", other),
    }
    assert!(runtime.calls().is_empty());
    assert_eq!(server.query_status(ArtifactId::new(2)), ready_at(0));
}
