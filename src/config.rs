/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Configuration of every standby-rs component, and parsing of the monitor's cluster file.
//!
//! Component configurations are built with the builder pattern, for example:
//!
//! ```ignore
//! let configuration =
//!     TransferServerConfiguration::builder()
//!     .data_dir("/var/lib/standby")
//!     .retention(RetentionPolicy::LATEST_ONLY)
//!     .build()
//! ```
//!
//! ## Cluster file
//!
//! The heartbeat monitor reads its node list from a line-oriented text file. The first line holds the
//! number of nodes `n`, followed by `n` lines of `<address> <recovery target id>`:
//!
//! ```text
//! 2
//! 10.0.0.1:50051 2
//! 10.0.0.2:50051 1
//! ```
//!
//! Node ids are the 1-based positions of these lines, so in the example above node 1 fails over onto
//! node 2 and vice versa.

use std::{fs, io, path::Path, path::PathBuf, time::Duration};

use typed_builder::TypedBuilder;

use crate::{
    retry::RetryPolicy,
    transfer::store::RetentionPolicy,
    types::data_types::{ArtifactId, NodeId, PortMapping},
};

/// Configuration of a [`TransferServer`](crate::transfer::server::TransferServer).
#[derive(Clone, Debug, TypedBuilder)]
pub struct TransferServerConfiguration {
    /// Directory holding received diffs and reconstructed full artifacts.
    #[builder(setter(into))]
    pub data_dir: PathBuf,

    /// Which superseded files to keep after a diff version has been applied.
    #[builder(default = RetentionPolicy::LATEST_ONLY)]
    pub retention: RetentionPolicy,

    /// How failed-over workloads are launched.
    #[builder(default)]
    pub recovery: RecoveryConfiguration,
}

/// How the [`FailoverOrchestrator`](crate::recovery::FailoverOrchestrator) launches a recovered image.
#[derive(Clone, Debug, TypedBuilder)]
pub struct RecoveryConfiguration {
    /// Name of the launched container.
    #[builder(default = String::from("serv_recv"), setter(into))]
    pub container_name: String,

    /// Port mapping the recovered workload is published on.
    #[builder(default = PortMapping::new(4000, 8000))]
    pub port_mapping: PortMapping,

    /// Command run inside the recovered container.
    #[builder(default = vec![
        String::from("manage.py"),
        String::from("runserver"),
        String::from("0.0.0.0:8000"),
    ])]
    pub command: Vec<String>,
}

impl Default for RecoveryConfiguration {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// Configuration of a [`TransferClient`](crate::transfer::client::TransferClient).
#[derive(Clone, Debug, TypedBuilder)]
pub struct TransferClientConfiguration {
    /// The artifact this client backs up.
    pub artifact: ArtifactId,

    /// Backoff and retry ceiling applied to announcements, queries, and gap-fill rounds.
    #[builder(default)]
    pub retry: RetryPolicy,

    /// How long to wait between two status queries while waiting for the server to finish a version.
    #[builder(default = Duration::from_millis(100))]
    pub status_poll_interval: Duration,
}

/// Configuration of a [`BackupDriver`](crate::transfer::driver::BackupDriver).
#[derive(Clone, Debug, TypedBuilder)]
pub struct BackupDriverConfiguration {
    /// Pause between the end of one version and the start of the next.
    #[builder(default = Duration::ZERO)]
    pub backup_interval: Duration,

    /// Stop after this many versions. `None` runs until cancelled.
    #[builder(default)]
    pub max_versions: Option<u64>,

    /// How many times the same version is re-sent after the server rolled it back.
    #[builder(default = 3)]
    pub max_version_attempts: u32,
}

impl Default for BackupDriverConfiguration {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// When the heartbeat monitor asks a recovery target to take over.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TriggerMode {
    /// Once per failure episode: after the threshold is first crossed, not again until the node has
    /// answered a probe.
    EdgeTriggered,

    /// In every cycle in which the node's consecutive failures are at or above the threshold.
    EveryCycle,
}

/// Configuration of a [`HeartbeatMonitor`](crate::heartbeat::HeartbeatMonitor).
#[derive(Clone, Debug, TypedBuilder)]
pub struct MonitorConfiguration {
    /// Time between the start of two poll cycles.
    #[builder(default = Duration::from_secs(1))]
    pub interval: Duration,

    /// Consecutive failed probes after which a node counts as down.
    #[builder(default = 3)]
    pub failure_threshold: u32,

    #[builder(default = TriggerMode::EdgeTriggered)]
    pub trigger_mode: TriggerMode,
}

impl Default for MonitorConfiguration {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// One line of the cluster file.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NodeEntry {
    pub id: NodeId,
    pub address: String,
    pub recovery_target: NodeId,
}

/// The parsed cluster file.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClusterConfig {
    pub nodes: Vec<NodeEntry>,
}

impl ClusterConfig {
    /// Read and parse the cluster file at `path`.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        Self::parse(&fs::read_to_string(path)?)
    }

    /// Parse the contents of a cluster file. Blank lines are ignored.
    pub fn parse(contents: &str) -> Result<Self, ConfigError> {
        let mut lines = contents
            .lines()
            .enumerate()
            .map(|(i, line)| (i + 1, line.trim()))
            .filter(|(_, line)| !line.is_empty());

        let declared: usize = match lines.next() {
            Some((_, line)) => line
                .parse()
                .map_err(|_| ConfigError::InvalidNodeCount(line.to_string()))?,
            None => return Err(ConfigError::MissingNodeCount),
        };

        let mut nodes = Vec::with_capacity(declared);
        for (line_no, line) in lines {
            let mut fields = line.split_whitespace();
            let invalid = || ConfigError::InvalidLine {
                line_no,
                line: line.to_string(),
            };
            let address = fields.next().ok_or_else(invalid)?;
            let target: u32 = fields
                .next()
                .and_then(|field| field.parse().ok())
                .ok_or_else(invalid)?;
            if fields.next().is_some() {
                return Err(invalid());
            }

            nodes.push(NodeEntry {
                id: NodeId::new(nodes.len() as u32 + 1),
                address: address.to_string(),
                recovery_target: NodeId::new(target),
            });
        }

        if nodes.len() != declared {
            return Err(ConfigError::NodeCountMismatch {
                declared,
                found: nodes.len(),
            });
        }

        for node in &nodes {
            let target = node.recovery_target.int() as usize;
            if target == 0 || target > nodes.len() {
                return Err(ConfigError::UnknownRecoveryTarget {
                    node: node.id,
                    target: node.recovery_target,
                });
            }
        }

        Ok(Self { nodes })
    }
}

/// Enumerates the ways reading the cluster file can fail.
#[derive(Debug)]
pub enum ConfigError {
    Io(io::Error),

    /// The file holds no lines at all.
    MissingNodeCount,

    /// The first line is not a non-negative integer.
    InvalidNodeCount(String),

    /// A node line is not `<address> <recovery target id>`.
    InvalidLine { line_no: usize, line: String },

    /// The number of node lines differs from the declared count.
    NodeCountMismatch { declared: usize, found: usize },

    /// A node names a recovery target that is not in the file.
    UnknownRecoveryTarget { node: NodeId, target: NodeId },
}

impl From<io::Error> for ConfigError {
    fn from(value: io::Error) -> Self {
        ConfigError::Io(value)
    }
}
