/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Typed client handle for calling a recovery node's RPCs over a [`Transport`].

use crate::types::{
    crypto_primitives::digest,
    data_types::{ArtifactId, ChunkIndex, CryptoHash, Status, Version},
};

use super::{
    messages::{
        AnnounceVersion, ArtifactStatus, PutChunk, QueryMissing, QueryStatus, Request, Response,
        TriggerRecovery,
    },
    network::{Transport, TransportError},
};

/// Handle for calling the RPCs of one recovery node.
///
/// Every method sends exactly one request and checks that the response variant matches it.
pub struct RecovererStub<T: Transport> {
    transport: T,
}

impl<T: Transport> RecovererStub<T> {
    pub fn new(transport: T) -> Self {
        Self { transport }
    }

    pub fn announce_version(
        &mut self,
        artifact: ArtifactId,
        version: Version,
        size: u64,
        digest: CryptoHash,
    ) -> Result<Status, RpcError> {
        self.call_for_status(AnnounceVersion {
            artifact,
            version,
            size,
            digest,
        })
    }

    pub fn query_missing(&mut self, artifact: ArtifactId) -> Result<Vec<ChunkIndex>, RpcError> {
        match self.transport.call(QueryMissing { artifact }.into())? {
            Response::Missing(indices) => Ok(indices),
            other => Err(RpcError::UnexpectedResponse(other)),
        }
    }

    /// Send one chunk. The checksum is computed here from `data`.
    pub fn put_chunk(
        &mut self,
        artifact: ArtifactId,
        version: Version,
        index: ChunkIndex,
        data: Vec<u8>,
    ) -> Result<Status, RpcError> {
        let checksum = digest(&data);
        self.call_for_status(PutChunk {
            artifact,
            version,
            index,
            data,
            checksum,
        })
    }

    pub fn keep_alive(&mut self) -> Result<Status, RpcError> {
        self.call_for_status(Request::KeepAlive)
    }

    pub fn trigger_recovery(&mut self, artifact: ArtifactId) -> Result<Status, RpcError> {
        self.call_for_status(TriggerRecovery { artifact })
    }

    pub fn query_status(&mut self, artifact: ArtifactId) -> Result<ArtifactStatus, RpcError> {
        match self.transport.call(QueryStatus { artifact }.into())? {
            Response::ArtifactStatus(status) => Ok(status),
            other => Err(RpcError::UnexpectedResponse(other)),
        }
    }

    /// Get a mutable reference to the underlying transport.
    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    fn call_for_status<R: Into<Request>>(&mut self, request: R) -> Result<Status, RpcError> {
        match self.transport.call(request.into())? {
            Response::Status(status) => Ok(status),
            other => Err(RpcError::UnexpectedResponse(other)),
        }
    }
}

/// Enumerates the ways a call through a [`RecovererStub`] can fail.
#[derive(Debug)]
pub enum RpcError {
    /// See [`TransportError`].
    Transport(TransportError),

    /// The peer answered with a response variant that does not belong to the request.
    UnexpectedResponse(Response),
}

impl From<TransportError> for RpcError {
    fn from(value: TransportError) -> Self {
        RpcError::Transport(value)
    }
}
