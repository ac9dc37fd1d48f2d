/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Pluggable request-response networking between controllers, monitors, and recovery nodes.

pub mod network;

pub mod messages;

pub mod receiving;

pub mod sending;

pub mod tcp;

pub use network::{Transport, TransportError};
pub use receiving::{dispatch, RecoveryService, RpcServer};
pub use sending::{RecovererStub, RpcError};
pub use tcp::{TcpTransport, TcpTransportConfiguration};
