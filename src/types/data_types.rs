/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Types that exist only to store numbers and bytes, and do not have any major "active" behavior.

use std::{
    fmt::{self, Debug, Display, Formatter},
    hash::Hash,
    ops::Add,
};

use borsh::{BorshDeserialize, BorshSerialize};

/// Number that identifies a backup lineage (an "artifact").
///
/// The heartbeat monitor uses the id of a monitored node as the id of the artifact that node backs up,
/// so `ArtifactId::new(3)` is the backup of node 3.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, BorshDeserialize, BorshSerialize)]
pub struct ArtifactId(u32);

impl ArtifactId {
    /// Create a new `ArtifactId` with an `int` value.
    pub const fn new(int: u32) -> Self {
        Self(int)
    }

    /// Get the `u32` value of this `ArtifactId`.
    pub const fn int(&self) -> u32 {
        self.0
    }
}

impl Display for ArtifactId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

impl Debug for ArtifactId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Debug::fmt(&self.0, f)
    }
}

/// Position of a version in an artifact's history.
///
/// Version 0 is always a full snapshot. Every later version `v` travels as a diff against `v - 1`.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, BorshDeserialize, BorshSerialize)]
pub struct Version(u64);

impl Version {
    /// The version of the first, full snapshot of every artifact.
    pub const BASE: Version = Version(0);

    /// Create a new `Version` with an `int` value.
    pub const fn new(int: u64) -> Self {
        Self(int)
    }

    /// Get the `u64` value of this `Version`.
    pub const fn int(&self) -> u64 {
        self.0
    }

    /// Whether this version carries a full snapshot rather than a diff.
    pub const fn is_base(&self) -> bool {
        self.0 == 0
    }

    /// Get the version before this one, or `None` for the base version.
    pub fn prev(&self) -> Option<Version> {
        self.0.checked_sub(1).map(Version)
    }

    /// Get the version after this one.
    pub fn next(&self) -> Version {
        Version(self.0 + 1)
    }
}

impl Add<u64> for Version {
    type Output = Version;
    fn add(self, rhs: u64) -> Self::Output {
        Version(self.0 + rhs)
    }
}

impl Display for Version {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

impl Debug for Version {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Debug::fmt(&self.0, f)
    }
}

/// Zero-based index of a chunk within a version's byte stream.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, BorshDeserialize, BorshSerialize)]
pub struct ChunkIndex(u32);

impl ChunkIndex {
    /// Create a new `ChunkIndex` with an `int` value.
    pub const fn new(int: u32) -> Self {
        Self(int)
    }

    /// Get the `u32` value of this `ChunkIndex`.
    pub const fn int(&self) -> u32 {
        self.0
    }
}

impl Display for ChunkIndex {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

impl Debug for ChunkIndex {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Debug::fmt(&self.0, f)
    }
}

/// 1-based position of a node in the monitor's cluster configuration.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, BorshDeserialize, BorshSerialize)]
pub struct NodeId(u32);

impl NodeId {
    /// Create a new `NodeId` with an `int` value.
    pub const fn new(int: u32) -> Self {
        Self(int)
    }

    /// Get the `u32` value of this `NodeId`.
    pub const fn int(&self) -> u32 {
        self.0
    }

    /// The artifact that this node backs up.
    pub const fn artifact(&self) -> ArtifactId {
        ArtifactId::new(self.0)
    }
}

impl Display for NodeId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

impl Debug for NodeId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Debug::fmt(&self.0, f)
    }
}

/// 32-byte SHA256 digest, used both as the checksum of a single chunk and as the digest of a whole
/// version's byte stream.
#[derive(Clone, Copy, PartialEq, Eq, Hash, BorshDeserialize, BorshSerialize)]
pub struct CryptoHash([u8; 32]);

impl CryptoHash {
    /// Create a new `CryptoHash` wrapping `bytes`.
    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Get the inner `[u8; 32]` value of this `CryptoHash`.
    pub const fn bytes(&self) -> [u8; 32] {
        self.0
    }
}

impl Debug for CryptoHash {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Lifecycle phase of an artifact's current (or just-completed) version on the transfer server.
///
/// ```text
/// Ready --announce--> Receiving --last chunk--> Stored --patch applied--> Ready
/// ```
///
/// `Stored` is only observable while the patch step of a diff version is running.
#[derive(Clone, Copy, Debug, PartialEq, Eq, BorshDeserialize, BorshSerialize)]
pub enum Phase {
    Ready,
    Receiving,
    Stored,
}

/// Reply status of the transfer server's RPCs.
///
/// On the wire the two statuses carry the numeric codes `8` and `9` (see [`Status::code`]).
#[derive(Clone, Copy, Debug, PartialEq, Eq, BorshDeserialize, BorshSerialize)]
pub enum Status {
    /// The request was accepted.
    Ok,

    /// The artifact is not in a state that allows the request. Callers retry.
    NotReady,
}

impl Status {
    pub const OK_CODE: u32 = 8;
    pub const NOT_READY_CODE: u32 = 9;

    /// Get the numeric status code of this `Status`.
    pub const fn code(&self) -> u32 {
        match self {
            Status::Ok => Self::OK_CODE,
            Status::NotReady => Self::NOT_READY_CODE,
        }
    }

    /// Interpret a numeric status code. Unknown codes yield `None`.
    pub const fn from_code(code: u32) -> Option<Status> {
        match code {
            Self::OK_CODE => Some(Status::Ok),
            Self::NOT_READY_CODE => Some(Status::NotReady),
            _ => None,
        }
    }

    pub const fn is_ok(&self) -> bool {
        matches!(self, Status::Ok)
    }
}

impl Display for Status {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.code(), f)
    }
}

/// Host and container port pair that a recovered workload is published on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PortMapping {
    pub host: u16,
    pub container: u16,
}

impl PortMapping {
    pub const fn new(host: u16, container: u16) -> Self {
        Self { host, container }
    }
}

impl Display for PortMapping {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.container)
    }
}
