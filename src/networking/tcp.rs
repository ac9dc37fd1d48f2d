/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Length-prefixed borsh frames over TCP, and a [`Transport`] built on them.
//!
//! ## Frame format
//!
//! ```text
//! +----------------------+---------------------------+
//! | len: u32 (LE)        | borsh(Request | Response) |
//! +----------------------+---------------------------+
//! ```
//!
//! Frames longer than [`MAX_FRAME_LEN`] are rejected before their body is read.

use std::{
    io::{self, Read, Write},
    net::{SocketAddr, TcpStream, ToSocketAddrs},
    time::Duration,
};

use borsh::{BorshDeserialize, BorshSerialize};
use typed_builder::TypedBuilder;

use crate::chunks::CHUNK_SIZE;

use super::{
    messages::{Request, Response},
    network::{Transport, TransportError},
};

/// Largest accepted frame: 2 MiB plus 64 KiB. A `PutChunk` carrying a full chunk needs a little over
/// 1 MiB, so every valid request fits with room to spare.
pub const MAX_FRAME_LEN: u32 = (2 * CHUNK_SIZE + 64 * 1024) as u32;

/// Serialize `msg` and write it to `writer` as one frame.
pub fn write_frame<W: Write, M: BorshSerialize>(writer: &mut W, msg: &M) -> io::Result<()> {
    let body = msg.try_to_vec()?;
    if body.len() > MAX_FRAME_LEN as usize {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("frame of {} bytes exceeds the frame limit", body.len()),
        ));
    }
    writer.write_all(&(body.len() as u32).to_le_bytes())?;
    writer.write_all(&body)?;
    writer.flush()
}

/// Read one frame from `reader` and deserialize it.
///
/// Returns `Ok(None)` if the peer closed the connection cleanly before the first byte of the frame.
pub fn read_frame<R: Read, M: BorshDeserialize>(reader: &mut R) -> io::Result<Option<M>> {
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf) {
        Ok(()) => (),
        Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(err) => return Err(err),
    }

    let len = u32::from_le_bytes(len_buf);
    if len > MAX_FRAME_LEN {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("peer announced a frame of {} bytes", len),
        ));
    }

    let mut body = vec![0u8; len as usize];
    reader.read_exact(&mut body)?;
    M::try_from_slice(&body).map(Some)
}

/// Timeouts applied to every connection made by a [`TcpTransport`].
#[derive(Clone, Copy, Debug, TypedBuilder)]
pub struct TcpTransportConfiguration {
    #[builder(default = Duration::from_secs(1))]
    pub connect_timeout: Duration,
    #[builder(default = Duration::from_secs(5))]
    pub read_timeout: Duration,
    #[builder(default = Duration::from_secs(5))]
    pub write_timeout: Duration,
}

impl Default for TcpTransportConfiguration {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// [`Transport`] that keeps one TCP connection to the peer open and re-establishes it lazily.
///
/// A connection that fails mid-call is dropped, and the next call dials again. The address is resolved
/// on every dial so that peers given by host name can move.
pub struct TcpTransport {
    addr: String,
    config: TcpTransportConfiguration,
    stream: Option<TcpStream>,
}

impl TcpTransport {
    pub fn new(addr: impl Into<String>, config: TcpTransportConfiguration) -> Self {
        Self {
            addr: addr.into(),
            config,
            stream: None,
        }
    }

    /// The address this transport dials.
    pub fn addr(&self) -> &str {
        &self.addr
    }

    fn connect(&self) -> io::Result<TcpStream> {
        let addrs: Vec<SocketAddr> = self.addr.to_socket_addrs()?.collect();
        let mut last_err = io::Error::new(
            io::ErrorKind::AddrNotAvailable,
            format!("{} did not resolve to any address", self.addr),
        );
        for addr in addrs {
            match TcpStream::connect_timeout(&addr, self.config.connect_timeout) {
                Ok(stream) => {
                    stream.set_read_timeout(Some(self.config.read_timeout))?;
                    stream.set_write_timeout(Some(self.config.write_timeout))?;
                    stream.set_nodelay(true)?;
                    return Ok(stream);
                }
                Err(err) => last_err = err,
            }
        }
        Err(last_err)
    }

    fn exchange(stream: &mut TcpStream, request: &Request) -> io::Result<Response> {
        write_frame(stream, request)?;
        read_frame(stream)?.ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::ConnectionAborted,
                "peer closed the connection before responding",
            )
        })
    }
}

impl Transport for TcpTransport {
    fn call(&mut self, request: Request) -> Result<Response, TransportError> {
        let mut stream = match self.stream.take() {
            Some(stream) => stream,
            None => self.connect()?,
        };

        match Self::exchange(&mut stream, &request) {
            Ok(response) => {
                self.stream = Some(stream);
                Ok(response)
            }
            Err(err) => {
                log::debug!("{} to {} failed: {}", request.name(), self.addr, err);
                Err(err.into())
            }
        }
    }
}
