use std::net::SocketAddr;
use std::time::Duration;

use crate::error::{KvError, Result, SUCCESS};
use crate::message::Message;
use crate::socket;

/// Blocking client for the master's client port. Each request opens its
/// own connection.
#[derive(Clone, Debug)]
pub struct KvClient {
    addr: SocketAddr,
    timeout: Option<Duration>,
}

impl KvClient {
    pub fn new(host: &str, port: u16) -> Result<Self> {
        socket::resolve(host, port).map(KvClient::from_addr)
    }

    pub fn from_addr(addr: SocketAddr) -> Self {
        KvClient { addr, timeout: None }
    }

    /// Applies `timeout` to every request. Writes can block for as long as
    /// the master takes to reach both replicas, so there is none by default.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn put(&self, key: &str, value: &str) -> Result<()> {
        check_key(key)?;
        if value.is_empty() {
            return Err(KvError::InvalidValue)
        }
        let request = Message::Put { key: key.to_string(), value: value.to_string() };
        expect_success(self.request(&request)?)
    }

    pub fn get(&self, key: &str) -> Result<String> {
        check_key(key)?;
        match self.request(&Message::Get { key: key.to_string() })? {
        | Message::Resp { value: Some(value), .. } => Ok(value),
        | Message::Resp { msg: Some(msg), .. } => Err(KvError::from_message(&msg)),
        | _ => Err(KvError::InvalidFormat),
        }
    }

    pub fn del(&self, key: &str) -> Result<()> {
        check_key(key)?;
        expect_success(self.request(&Message::Del { key: key.to_string() })?)
    }

    fn request(&self, request: &Message) -> Result<Message> {
        trace!("sending {} to {}", request.kind(), self.addr);
        socket::request(self.addr, request, self.timeout)
    }
}

fn check_key(key: &str) -> Result<()> {
    if key.is_empty() { Err(KvError::InvalidKey) } else { Ok(()) }
}

fn expect_success(reply: Message) -> Result<()> {
    match reply {
    | Message::Resp { msg: Some(ref msg), .. } if msg == SUCCESS => Ok(()),
    | Message::Resp { msg: Some(msg), .. } => Err(KvError::from_message(&msg)),
    | _ => Err(KvError::InvalidFormat),
    }
}
