/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Serving a recovery node's RPCs.
//!
//! The [`RpcServer`] accepts TCP connections on one thread and serves every connection on a thread of
//! its own. Each connection carries a sequence of request frames, each answered by exactly one response
//! frame. Requests are handed to a [`RecoveryService`] through [`dispatch`], which is also what
//! in-process transports call directly.

use std::{
    io,
    net::{SocketAddr, TcpListener, TcpStream},
    sync::{
        atomic::{AtomicBool, Ordering},
        mpsc::{Receiver, TryRecvError},
        Arc,
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use crate::types::data_types::{ArtifactId, ChunkIndex, Status};

use super::{
    messages::{AnnounceVersion, ArtifactStatus, PutChunk, Request, Response},
    tcp::{read_frame, write_frame},
};

/// The RPCs a recovery node serves.
///
/// Implementations must be safe to call from many connection threads at once.
pub trait RecoveryService: Send + Sync + 'static {
    fn announce_version(&self, request: AnnounceVersion) -> Status;

    fn query_missing(&self, artifact: ArtifactId) -> Vec<ChunkIndex>;

    fn put_chunk(&self, request: PutChunk) -> Status;

    fn keep_alive(&self) -> Status {
        Status::Ok
    }

    fn trigger_recovery(&self, artifact: ArtifactId) -> Status;

    fn query_status(&self, artifact: ArtifactId) -> ArtifactStatus;
}

/// Route `request` to the matching method of `service` and wrap its result in a [`Response`].
pub fn dispatch<S: RecoveryService + ?Sized>(service: &S, request: Request) -> Response {
    match request {
        Request::AnnounceVersion(request) => service.announce_version(request).into(),
        Request::QueryMissing(request) => Response::Missing(service.query_missing(request.artifact)),
        Request::PutChunk(request) => service.put_chunk(request).into(),
        Request::KeepAlive => service.keep_alive().into(),
        Request::TriggerRecovery(request) => service.trigger_recovery(request.artifact).into(),
        Request::QueryStatus(request) => service.query_status(request.artifact).into(),
    }
}

/// How often the acceptor and connection threads check the shutdown flag while idle.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// TCP front-end for a [`RecoveryService`].
pub struct RpcServer<S: RecoveryService> {
    listener: TcpListener,
    service: Arc<S>,
    shutdown_signal: Receiver<()>,
}

impl<S: RecoveryService> RpcServer<S> {
    /// Bind a listener on `addr`. The server starts serving once [`start`](Self::start) is called, and
    /// stops once a message is sent on (or the sender of) `shutdown_signal` is dropped.
    pub fn bind(
        addr: impl std::net::ToSocketAddrs,
        service: Arc<S>,
        shutdown_signal: Receiver<()>,
    ) -> io::Result<Self> {
        let listener = TcpListener::bind(addr)?;
        listener.set_nonblocking(true)?;
        Ok(Self {
            listener,
            service,
            shutdown_signal,
        })
    }

    /// The address the server is listening on. Useful when bound to port 0.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn start(self) -> JoinHandle<()> {
        thread::spawn(move || {
            let stopping = Arc::new(AtomicBool::new(false));
            let mut connections: Vec<JoinHandle<()>> = Vec::new();

            loop {
                match self.shutdown_signal.try_recv() {
                    Ok(()) | Err(TryRecvError::Disconnected) => break,
                    Err(TryRecvError::Empty) => (),
                }

                match self.listener.accept() {
                    Ok((stream, peer)) => {
                        log::debug!("Accepted connection from {}", peer);
                        let service = Arc::clone(&self.service);
                        let stopping = Arc::clone(&stopping);
                        connections.push(thread::spawn(move || {
                            if let Err(err) = serve_connection(stream, service.as_ref(), &stopping) {
                                log::debug!("Connection from {} closed: {}", peer, err);
                            }
                        }));
                    }
                    Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                        thread::sleep(POLL_INTERVAL)
                    }
                    Err(err) => log::warn!("Failed to accept a connection: {}", err),
                }

                connections.retain(|handle| !handle.is_finished());
            }

            stopping.store(true, Ordering::SeqCst);
            for handle in connections {
                let _ = handle.join();
            }
        })
    }
}

/// Serve requests on `stream` until the peer disconnects, an I/O error occurs, or `stopping` is set.
fn serve_connection<S: RecoveryService + ?Sized>(
    mut stream: TcpStream,
    service: &S,
    stopping: &AtomicBool,
) -> io::Result<()> {
    stream.set_nonblocking(false)?;
    stream.set_nodelay(true)?;
    stream.set_read_timeout(Some(POLL_INTERVAL))?;

    loop {
        if stopping.load(Ordering::SeqCst) {
            return Ok(());
        }

        // Wait for the first byte of the next frame without consuming it, so that a read timeout between
        // frames never leaves a half-read length prefix behind.
        let mut probe = [0u8; 1];
        match stream.peek(&mut probe) {
            Ok(0) => return Ok(()),
            Ok(_) => (),
            Err(err)
                if err.kind() == io::ErrorKind::WouldBlock
                    || err.kind() == io::ErrorKind::TimedOut =>
            {
                continue
            }
            Err(err) => return Err(err),
        }

        // A frame has started: give its remainder a generous deadline.
        stream.set_read_timeout(Some(Duration::from_secs(30)))?;
        let request: Request = match read_frame(&mut stream)? {
            Some(request) => request,
            None => return Ok(()),
        };
        stream.set_read_timeout(Some(POLL_INTERVAL))?;

        let response = dispatch(service, request);
        write_frame(&mut stream, &response)?;
    }
}
