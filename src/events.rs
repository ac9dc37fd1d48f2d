/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Definitions of the events emitted by standby-rs components, for event handling and logging.
//!
//! An event for a given action indicates that the action has been completed. Components publish events
//! on an optional [`Sender<Event>`]; the [event bus](crate::event_bus) dispatches them to registered
//! handlers, including the default loggers defined in [`crate::logging`].

use std::sync::mpsc::Sender;
use std::time::SystemTime;

use crate::external::ImageRef;
use crate::types::data_types::{ArtifactId, ChunkIndex, CryptoHash, NodeId, Version};

pub enum Event {
    // Events emitted by the transfer server.
    StartTransfer(StartTransferEvent),
    RejectChunk(RejectChunkEvent),
    CompleteTransfer(CompleteTransferEvent),
    AbortTransfer(AbortTransferEvent),
    LaunchRecovery(LaunchRecoveryEvent),
    // Events emitted by the transfer client.
    AnnounceVersion(AnnounceVersionEvent),
    FillGaps(FillGapsEvent),
    ConfirmVersion(ConfirmVersionEvent),
    // Events emitted by the heartbeat monitor.
    ProbeFailure(ProbeFailureEvent),
    NodeRecovered(NodeRecoveredEvent),
    TriggerRecovery(TriggerRecoveryEvent),
}

impl Event {
    /// Publish this event on `event_publisher`, if there is one. Events published after the event bus
    /// stopped are dropped.
    pub(crate) fn publish(self, event_publisher: &Option<Sender<Event>>) {
        if let Some(event_publisher) = event_publisher {
            let _ = event_publisher.send(self);
        }
    }
}

/// The server accepted an announcement and is now receiving `version` of `artifact`.
pub struct StartTransferEvent {
    pub timestamp: SystemTime,
    pub artifact: ArtifactId,
    pub version: Version,
    pub size: u64,
    pub chunk_count: u32,
}

/// The server refused a chunk of the in-flight version.
pub struct RejectChunkEvent {
    pub timestamp: SystemTime,
    pub artifact: ArtifactId,
    pub version: Version,
    pub index: ChunkIndex,
    pub reason: RejectReason,
}

/// Why a chunk was refused.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RejectReason {
    /// The chunk does not belong to the version currently being received.
    NotInFlight,
    /// The index lies outside the announced stream.
    OutOfRange,
    /// The payload length differs from the length of the chunk at that index.
    LengthMismatch,
    /// The payload does not hash to the chunk's checksum.
    ChecksumMismatch,
}

/// `version` of `artifact` is fully durable on the server.
pub struct CompleteTransferEvent {
    pub timestamp: SystemTime,
    pub artifact: ArtifactId,
    pub version: Version,
    pub digest: CryptoHash,
}

/// The server rolled `version` of `artifact` back after its completion step failed.
pub struct AbortTransferEvent {
    pub timestamp: SystemTime,
    pub artifact: ArtifactId,
    pub version: Version,
}

/// The server launched `version` of `artifact` as a failed-over workload.
pub struct LaunchRecoveryEvent {
    pub timestamp: SystemTime,
    pub artifact: ArtifactId,
    pub version: Version,
    pub image: ImageRef,
}

/// The client's announcement of `version` of `artifact` was accepted.
pub struct AnnounceVersionEvent {
    pub timestamp: SystemTime,
    pub artifact: ArtifactId,
    pub version: Version,
    pub size: u64,
    pub chunk_count: u32,
}

/// The client re-sent `missing` chunks that the server reported missing.
pub struct FillGapsEvent {
    pub timestamp: SystemTime,
    pub artifact: ArtifactId,
    pub version: Version,
    pub missing: usize,
}

/// The client observed `version` of `artifact` as ready on the server.
pub struct ConfirmVersionEvent {
    pub timestamp: SystemTime,
    pub artifact: ArtifactId,
    pub version: Version,
}

/// A liveness probe of `node` failed.
pub struct ProbeFailureEvent {
    pub timestamp: SystemTime,
    pub node: NodeId,
    pub consecutive_failures: u32,
}

/// `node` answered a liveness probe after failing at least one.
pub struct NodeRecoveredEvent {
    pub timestamp: SystemTime,
    pub node: NodeId,
}

/// The monitor asked `target` to take over the workload of `node`.
pub struct TriggerRecoveryEvent {
    pub timestamp: SystemTime,
    pub node: NodeId,
    pub target: NodeId,
}
