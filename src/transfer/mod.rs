/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The resumable, chunked version transfer protocol.
//!
//! The [client](client) on the primary node announces a version, streams it in fixed-size
//! [chunks](crate::chunks), and fills whatever gaps the [server](server) on the recovery node reports
//! until the version is durable there. The [driver](driver) repeats this for every version produced
//! by a [`SnapshotSource`](crate::snapshot::SnapshotSource).

pub mod client;

pub mod driver;

pub mod server;

pub mod store;

pub use client::{TransferClient, TransferError};
pub use driver::BackupDriver;
pub use server::TransferServer;
pub use store::{ArtifactStore, RetentionPolicy};
