use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;

use serde_derive::{Deserialize, Serialize};

use crate::error::{KvError, Result};
use crate::socket;

/// Identity and address of a slave server. Equality is by `id` alone.
#[derive(Serialize, Deserialize)]
#[derive(Clone, Debug, Derivative)]
#[derivative(PartialEq, Eq, Hash)]
pub struct ReplicaInfo {
    id: u64,
    #[derivative(PartialEq = "ignore", Hash = "ignore")]
    host: String,
    #[derivative(PartialEq = "ignore", Hash = "ignore")]
    port: u16,
}

impl ReplicaInfo {
    /// Fails with `InvalidFormat` if `host` is not a valid hostname.
    pub fn new<H: Into<String>>(id: u64, host: H, port: u16) -> Result<Self> {
        let host = host.into();
        if !is_valid_host(&host) {
            return Err(KvError::InvalidFormat)
        }
        Ok(ReplicaInfo { id, host, port })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn addr(&self) -> Result<SocketAddr> {
        socket::resolve(&self.host, self.port)
    }
}

/// Labels of ASCII letters and digits separated by single `-` or `.`.
fn is_valid_host(host: &str) -> bool {
    let mut chars = host.chars();
    match chars.next() {
    | Some(c) if c.is_ascii_alphanumeric() => (),
    | _ => return false,
    }
    let mut punctuated = false;
    for c in chars {
        match c {
        | c if c.is_ascii_alphanumeric() => punctuated = false,
        | '-' | '.' if !punctuated => punctuated = true,
        | _ => return false,
        }
    }
    true
}

impl FromStr for ReplicaInfo {
    type Err = KvError;

    /// Parses `<id>@<host>:<port>`.
    fn from_str(s: &str) -> Result<Self> {
        let mut iter = s.splitn(2, '@');
        let id = iter.next()
            .and_then(|id| id.parse::<u64>().ok())
            .ok_or(KvError::InvalidFormat)?;
        let mut iter = iter.next()
            .ok_or(KvError::InvalidFormat)?
            .splitn(2, ':');
        let host = iter.next().ok_or(KvError::InvalidFormat)?;
        let port = iter.next()
            .and_then(|port| port.parse::<u16>().ok())
            .ok_or(KvError::InvalidFormat)?;
        ReplicaInfo::new(id, host, port)
    }
}

impl fmt::Display for ReplicaInfo {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(fmt, "{}@{}:{}", self.id, self.host, self.port)
    }
}
