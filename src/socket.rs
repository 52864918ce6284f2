//! # Summary
//!
//! This module abstracts over connections to clients, the master, and slaves.
//!
//! Every message is a bincode payload preceded by its length as a 4-byte
//! big-endian integer, the same framing as a length-delimited codec.
//! Connections are plain blocking `std::net::TcpStream`s: one request and
//! one reply per connection, with an optional per-operation timeout.

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

use crate::error::{KvError, Result};

/// Largest frame accepted from a peer.
pub const MAX_FRAME: usize = 8 * 1024 * 1024;

/// Serializes `message` and writes it as a single frame.
pub fn send<W, T>(writer: &mut W, message: &T) -> Result<()>
where W: Write,
      T: serde::Serialize,
{
    let payload = bincode::serialize(message)?;
    if payload.len() > MAX_FRAME {
        return Err(KvError::Parser)
    }
    let length = (payload.len() as u32).to_be_bytes();
    writer.write_all(&length)
        .and_then(|_| writer.write_all(&payload))
        .and_then(|_| writer.flush())
        .map_err(|error| KvError::from_io(&error))
}

/// Reads a single frame and deserializes it.
pub fn recv<R, T>(reader: &mut R) -> Result<T>
where R: Read,
      T: serde::de::DeserializeOwned,
{
    let mut length = [0u8; 4];
    reader.read_exact(&mut length)
        .map_err(|error| KvError::from_io(&error))?;
    let length = u32::from_be_bytes(length) as usize;
    if length > MAX_FRAME {
        return Err(KvError::Parser)
    }
    let mut payload = vec![0u8; length];
    reader.read_exact(&mut payload)
        .map_err(|error| KvError::from_io(&error))?;
    Ok(bincode::deserialize(&payload)?)
}

/// Resolves `host:port` to the first usable address.
pub fn resolve(host: &str, port: u16) -> Result<SocketAddr> {
    (host, port).to_socket_addrs()
        .map_err(|_| KvError::CouldNotCreateSocket)?
        .next()
        .ok_or(KvError::CouldNotCreateSocket)
}

/// Opens a connection, applying `timeout` to the connect itself
/// and to every subsequent read and write.
pub fn connect(addr: SocketAddr, timeout: Option<Duration>) -> Result<TcpStream> {
    let stream = match timeout {
    | Some(timeout) => TcpStream::connect_timeout(&addr, timeout),
    | None => TcpStream::connect(addr),
    };
    let stream = stream.map_err(|error| match KvError::from_io(&error) {
        | KvError::SocketTimeout => KvError::SocketTimeout,
        | _ => KvError::CouldNotConnect,
    })?;
    set_timeout(&stream, timeout)?;
    Ok(stream)
}

/// Applies `timeout` to reads and writes on `stream`.
pub fn set_timeout(stream: &TcpStream, timeout: Option<Duration>) -> Result<()> {
    stream.set_read_timeout(timeout)
        .and_then(|_| stream.set_write_timeout(timeout))
        .map_err(|_| KvError::CouldNotCreateSocket)
}

/// Sends `request` over a fresh connection and waits for one reply.
pub fn request<T, R>(addr: SocketAddr, request: &T, timeout: Option<Duration>) -> Result<R>
where T: serde::Serialize,
      R: serde::de::DeserializeOwned,
{
    let mut stream = connect(addr, timeout)?;
    send(&mut stream, request)?;
    recv(&mut stream)
}
