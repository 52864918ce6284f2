//! # Summary
//!
//! This module defines the error taxonomy shared by the coordinator,
//! participants, and clients. The `Display` string of each variant is
//! exactly what travels on the wire inside `Resp` and `Abort` messages,
//! so an error raised on a slave can be reconstructed on the client.

use std::io;

pub const SUCCESS: &str = "Success";

quick_error! {
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum KvError {
        InvalidKey {
            display("Data Error: Invalid key")
        }
        InvalidValue {
            display("Data Error: Invalid value")
        }
        OversizedKey {
            display("Oversized key")
        }
        OversizedValue {
            display("Oversized value")
        }
        NoSuchKey {
            display("Data Error: Key does not exist")
        }
        CouldNotCreateSocket {
            display("Network Error: Could not create socket")
        }
        CouldNotConnect {
            display("Network Error: Could not connect")
        }
        SocketTimeout {
            display("Network Error: Socket timeout")
        }
        InvalidFormat {
            display("Unknown Error: Message format incorrect")
        }
        Parser {
            display("Unknown Error: Error parsing message")
        }
        Storage(msg: String) {
            display("Storage Error: {}", msg)
        }
        ShuttingDown {
            display("Server Error: Shutting down")
        }
        CouldNotSpawn(msg: String) {
            display("Server Error: Could not spawn worker: {}", msg)
        }
        // Error string reported by a remote peer that matches no known variant
        Remote(msg: String) {
            display("{}", msg)
        }
    }
}

pub type Result<T> = std::result::Result<T, KvError>;

impl KvError {
    /// Reconstructs an error from its wire representation.
    pub fn from_message(msg: &str) -> Self {
        let known = [
            KvError::InvalidKey,
            KvError::InvalidValue,
            KvError::OversizedKey,
            KvError::OversizedValue,
            KvError::NoSuchKey,
            KvError::CouldNotCreateSocket,
            KvError::CouldNotConnect,
            KvError::SocketTimeout,
            KvError::InvalidFormat,
            KvError::Parser,
            KvError::ShuttingDown,
        ];
        known.iter()
            .find(|error| error.to_string() == msg)
            .cloned()
            .unwrap_or_else(|| KvError::Remote(msg.to_string()))
    }

    /// Classifies an I/O error raised while talking to a peer.
    pub fn from_io(error: &io::Error) -> Self {
        match error.kind() {
        | io::ErrorKind::WouldBlock
        | io::ErrorKind::TimedOut => KvError::SocketTimeout,
        | io::ErrorKind::UnexpectedEof
        | io::ErrorKind::InvalidData => KvError::Parser,
        | _ => KvError::CouldNotConnect,
        }
    }
}

impl From<bincode::Error> for KvError {
    fn from(error: bincode::Error) -> Self {
        match *error {
        | bincode::ErrorKind::Io(ref error) => KvError::from_io(error),
        | _ => KvError::Parser,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_strings_map_back_to_variants() {
        for error in &[KvError::InvalidKey, KvError::NoSuchKey, KvError::OversizedValue] {
            assert_eq!(KvError::from_message(&error.to_string()), *error);
        }
    }

    #[test]
    fn unknown_strings_become_remote() {
        let error = KvError::from_message("disk on fire");
        assert_eq!(error, KvError::Remote("disk on fire".to_string()));
        assert_eq!(error.to_string(), "disk on fire");
    }

    #[test]
    fn spawn_failure_is_a_server_error() {
        let error = KvError::CouldNotSpawn("out of threads".to_string());
        assert_eq!(error.to_string(), "Server Error: Could not spawn worker: out of threads");
        assert_eq!(KvError::from_message(&error.to_string()), KvError::Remote(error.to_string()));
    }

    #[test]
    fn timeouts_are_classified() {
        let error = io::Error::new(io::ErrorKind::WouldBlock, "read timed out");
        assert_eq!(KvError::from_io(&error), KvError::SocketTimeout);
        let error = io::Error::new(io::ErrorKind::ConnectionRefused, "refused");
        assert_eq!(KvError::from_io(&error), KvError::CouldNotConnect);
    }
}
