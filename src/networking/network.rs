/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

use std::io;

use super::messages::{Request, Response};

/// A blocking, request-response channel to a single recovery node.
///
/// standby-rs ships a TCP implementation in [`TcpTransport`](super::tcp::TcpTransport). Library users
/// (and tests) can provide their own, for example one that dispatches straight into an in-process
/// [`RecoveryService`](super::receiving::RecoveryService).
///
/// Implementations must not retry on their own: retry policy belongs to the caller, which treats every
/// `Err` as a transient failure (the transfer client) or as a failed liveness probe (the heartbeat
/// monitor).
pub trait Transport: Send {
    /// Send `request` and block until the response arrives, the call times out, or the channel fails.
    fn call(&mut self, request: Request) -> Result<Response, TransportError>;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn call(&mut self, request: Request) -> Result<Response, TransportError> {
        (**self).call(request)
    }
}

/// Enumerates the ways a [`Transport::call`] can fail.
#[derive(Debug)]
pub enum TransportError {
    /// The peer could not be reached, or the connection broke while the call was in progress.
    Io(io::Error),

    /// The peer did not answer within the transport's timeout.
    Timeout,

    /// A frame could not be decoded, or announced a length above the frame limit.
    Malformed,
}

impl From<io::Error> for TransportError {
    fn from(value: io::Error) -> Self {
        match value.kind() {
            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TransportError::Timeout,
            io::ErrorKind::InvalidData => TransportError::Malformed,
            _ => TransportError::Io(value),
        }
    }
}
