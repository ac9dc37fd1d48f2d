/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Exhaustive enumerations around every request and response exchanged with a recovery node.

use borsh::{BorshDeserialize, BorshSerialize};

use crate::types::data_types::{ArtifactId, ChunkIndex, CryptoHash, Phase, Status, Version};

/// All request variants a recovery node serves.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub enum Request {
    /// See: [`AnnounceVersion`].
    AnnounceVersion(AnnounceVersion),

    /// See: [`QueryMissing`].
    QueryMissing(QueryMissing),

    /// See: [`PutChunk`].
    PutChunk(PutChunk),

    /// Liveness probe. Always answered with [`Status::Ok`].
    KeepAlive,

    /// See: [`TriggerRecovery`].
    TriggerRecovery(TriggerRecovery),

    /// See: [`QueryStatus`].
    QueryStatus(QueryStatus),
}

impl Request {
    /// Name of the request variant, for logging.
    pub fn name(&self) -> &'static str {
        match self {
            Request::AnnounceVersion(_) => "AnnounceVersion",
            Request::QueryMissing(_) => "QueryMissing",
            Request::PutChunk(_) => "PutChunk",
            Request::KeepAlive => "KeepAlive",
            Request::TriggerRecovery(_) => "TriggerRecovery",
            Request::QueryStatus(_) => "QueryStatus",
        }
    }
}

/// Announce that `version` of `artifact`, `size` bytes long with the given `digest`, is about to be sent.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct AnnounceVersion {
    pub artifact: ArtifactId,
    pub version: Version,
    pub size: u64,
    pub digest: CryptoHash,
}

impl From<AnnounceVersion> for Request {
    fn from(value: AnnounceVersion) -> Self {
        Request::AnnounceVersion(value)
    }
}

/// Ask which chunks of the in-flight version of `artifact` have not been received yet.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct QueryMissing {
    pub artifact: ArtifactId,
}

impl From<QueryMissing> for Request {
    fn from(value: QueryMissing) -> Self {
        Request::QueryMissing(value)
    }
}

/// One chunk of the in-flight version. `checksum` is the SHA256 of `data`.
#[derive(Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct PutChunk {
    pub artifact: ArtifactId,
    pub version: Version,
    pub index: ChunkIndex,
    pub data: Vec<u8>,
    pub checksum: CryptoHash,
}

impl std::fmt::Debug for PutChunk {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PutChunk")
            .field("artifact", &self.artifact)
            .field("version", &self.version)
            .field("index", &self.index)
            .field("len", &self.data.len())
            .finish()
    }
}

impl From<PutChunk> for Request {
    fn from(value: PutChunk) -> Self {
        Request::PutChunk(value)
    }
}

/// Ask the node to fail `artifact` over onto itself.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct TriggerRecovery {
    pub artifact: ArtifactId,
}

impl From<TriggerRecovery> for Request {
    fn from(value: TriggerRecovery) -> Self {
        Request::TriggerRecovery(value)
    }
}

/// Ask for the current version and phase of `artifact`.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct QueryStatus {
    pub artifact: ArtifactId,
}

impl From<QueryStatus> for Request {
    fn from(value: QueryStatus) -> Self {
        Request::QueryStatus(value)
    }
}

/// All response variants.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub enum Response {
    /// Reply to `AnnounceVersion`, `PutChunk`, `KeepAlive`, and `TriggerRecovery`.
    Status(Status),

    /// Reply to `QueryMissing`: the indices still pending, in ascending order.
    Missing(Vec<ChunkIndex>),

    /// Reply to `QueryStatus`.
    ArtifactStatus(ArtifactStatus),
}

/// Snapshot of an artifact's lifecycle state on the recovery node.
///
/// `current_version` is `None` if no version of the artifact was ever announced.
#[derive(Clone, Copy, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct ArtifactStatus {
    pub current_version: Option<Version>,
    pub phase: Phase,
}

impl ArtifactStatus {
    /// Status of an artifact the node has never heard of.
    pub const fn unknown() -> Self {
        Self {
            current_version: None,
            phase: Phase::Ready,
        }
    }

    /// The latest version that is fully durable: the current version if the artifact is `Ready`, otherwise
    /// the one before it, since an in-flight version does not count until its transfer completes.
    pub fn durable_version(&self) -> Option<Version> {
        match self.phase {
            Phase::Ready => self.current_version,
            Phase::Receiving | Phase::Stored => self.current_version.and_then(|v| v.prev()),
        }
    }
}

impl From<Status> for Response {
    fn from(value: Status) -> Self {
        Response::Status(value)
    }
}

impl From<ArtifactStatus> for Response {
    fn from(value: ArtifactStatus) -> Self {
        Response::ArtifactStatus(value)
    }
}
