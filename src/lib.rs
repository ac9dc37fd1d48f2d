/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Versioned container backup over a resumable chunked transfer protocol, with heartbeat-driven
//! failover.
//!
//! A standby-rs deployment has three roles:
//! 1. On every primary node, a [`BackupDriver`](transfer::BackupDriver) repeatedly snapshots the
//!    workload's container and ships each version to the node's recovery target with a
//!    [`TransferClient`](transfer::TransferClient). Version 0 is a full archive, every later version a
//!    binary diff against its predecessor.
//! 2. On every recovery node, a [`TransferServer`](transfer::TransferServer) receives versions,
//!    reconstructs full archives, and launches the latest durable one when asked to.
//! 3. A [`HeartbeatMonitor`](heartbeat::HeartbeatMonitor) probes every primary node and, once one has
//!    failed enough consecutive probes, asks its recovery target to take over.
//!
//! All three talk through the RPCs defined in [`networking`], over any
//! [`Transport`](networking::Transport). Components report what they do by publishing
//! [events](events), which an [event bus](event_bus) hands to registered handlers and, optionally,
//! to the [default loggers](logging).

pub mod chunks;

pub mod config;

pub mod event_bus;

pub mod events;

pub mod external;

pub mod heartbeat;

pub mod logging;

pub mod networking;

pub mod recovery;

pub mod retry;

pub mod snapshot;

pub mod transfer;

pub mod types;
