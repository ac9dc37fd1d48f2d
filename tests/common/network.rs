/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

use std::{
    io,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
};

use borsh::{BorshDeserialize, BorshSerialize};
use standby_rs::{
    networking::{
        dispatch,
        messages::{AnnounceVersion, ArtifactStatus, PutChunk, Request, Response},
        RecoveryService, Transport, TransportError,
    },
    types::data_types::{ArtifactId, ChunkIndex, Status},
};

/// A [`Transport`] that serves calls with an in-process [`RecoveryService`]. Requests and responses are
/// borsh-encoded and decoded on the way, like they would be on the wire.
pub(crate) struct LocalTransport<S: RecoveryService> {
    service: Arc<S>,
}

impl<S: RecoveryService> LocalTransport<S> {
    pub(crate) fn new(service: Arc<S>) -> Self {
        Self { service }
    }
}

impl<S: RecoveryService> Transport for LocalTransport<S> {
    fn call(&mut self, request: Request) -> Result<Response, TransportError> {
        let request = round_trip(&request)?;
        let response = dispatch(self.service.as_ref(), request);
        round_trip(&response)
    }
}

fn round_trip<M: BorshSerialize + BorshDeserialize>(msg: &M) -> Result<M, TransportError> {
    let bytes = msg.try_to_vec().map_err(|_| TransportError::Malformed)?;
    M::try_from_slice(&bytes).map_err(|_| TransportError::Malformed)
}

/// Wraps a [`Transport`] and fails every `every`-th call with a timeout. Alternately, the failed call
/// is dropped before it reaches the peer, or after the peer handled it (losing only the response).
pub(crate) struct LossyTransport<T: Transport> {
    inner: T,
    every: u64,
    calls: u64,
}

impl<T: Transport> LossyTransport<T> {
    pub(crate) fn new(inner: T, every: u64) -> Self {
        Self {
            inner,
            every,
            calls: 0,
        }
    }
}

impl<T: Transport> Transport for LossyTransport<T> {
    fn call(&mut self, request: Request) -> Result<Response, TransportError> {
        self.calls += 1;
        if self.calls % self.every != 0 {
            return self.inner.call(request);
        }
        if (self.calls / self.every) % 2 == 0 {
            let _ = self.inner.call(request);
        }
        Err(TransportError::Timeout)
    }
}

/// Wraps a [`Transport`] and lets a closure modify every request before it is sent.
pub(crate) struct TamperingTransport<T: Transport, F: FnMut(&mut Request) + Send> {
    inner: T,
    tamper: F,
}

impl<T: Transport, F: FnMut(&mut Request) + Send> TamperingTransport<T, F> {
    pub(crate) fn new(inner: T, tamper: F) -> Self {
        Self { inner, tamper }
    }
}

impl<T: Transport, F: FnMut(&mut Request) + Send> Transport for TamperingTransport<T, F> {
    fn call(&mut self, mut request: Request) -> Result<Response, TransportError> {
        (self.tamper)(&mut request);
        self.inner.call(request)
    }
}

/// Wraps a [`Transport`] and refuses every call while its switch is off.
pub(crate) struct SwitchedTransport<T: Transport> {
    inner: T,
    up: Arc<AtomicBool>,
}

impl<T: Transport> SwitchedTransport<T> {
    /// Returns the transport and its switch, initially on.
    pub(crate) fn new(inner: T) -> (Self, Arc<AtomicBool>) {
        let up = Arc::new(AtomicBool::new(true));
        (
            Self {
                inner,
                up: Arc::clone(&up),
            },
            up,
        )
    }
}

impl<T: Transport> Transport for SwitchedTransport<T> {
    fn call(&mut self, request: Request) -> Result<Response, TransportError> {
        if self.up.load(Ordering::SeqCst) {
            self.inner.call(request)
        } else {
            Err(TransportError::Io(io::Error::from(
                io::ErrorKind::ConnectionRefused,
            )))
        }
    }
}

/// A [`RecoveryService`] that only answers liveness probes and records recovery triggers.
#[derive(Default)]
pub(crate) struct RecordingService {
    triggered: Mutex<Vec<ArtifactId>>,
}

impl RecordingService {
    pub(crate) fn triggered(&self) -> Vec<ArtifactId> {
        self.triggered.lock().unwrap().clone()
    }
}

impl RecoveryService for RecordingService {
    fn announce_version(&self, _: AnnounceVersion) -> Status {
        Status::NotReady
    }

    fn query_missing(&self, _: ArtifactId) -> Vec<ChunkIndex> {
        Vec::new()
    }

    fn put_chunk(&self, _: PutChunk) -> Status {
        Status::NotReady
    }

    fn trigger_recovery(&self, artifact: ArtifactId) -> Status {
        self.triggered.lock().unwrap().push(artifact);
        Status::Ok
    }

    fn query_status(&self, _: ArtifactId) -> ArtifactStatus {
        ArtifactStatus::unknown()
    }
}
