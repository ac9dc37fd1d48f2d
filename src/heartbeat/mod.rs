/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Failure detection for a static cluster of primary nodes.
//!
//! The [`HeartbeatMonitor`] probes every node with `KeepAlive` once per interval. A node whose probe
//! fails (or times out) `failure_threshold` cycles in a row counts as down, and the monitor asks the
//! node's recovery target to launch the latest durable version of the node's artifact (the artifact id
//! of a node is its node id).
//!
//! How often a down node triggers a recovery depends on the [`TriggerMode`](crate::config::TriggerMode):
//! once per failure episode (the default), or in every cycle the node stays down.

pub mod monitor;

pub use monitor::{CycleReport, HeartbeatMonitor, NodeRecord};
