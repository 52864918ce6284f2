//! # Summary
//!
//! Builders for the master and slave processes. Each starts from the
//! defaults below, is adjusted with `with_*` methods, and is started with
//! `run`, which returns a handle to the running server. Dropping the handle
//! shuts the server down.

use std::path::PathBuf;
use std::time::Duration;

use crate::cache::{self, Cache};
use crate::coordinator::{self, Coordinator, TcpTransport};
use crate::error::Result;
use crate::participant::Participant;
use crate::pool::Pool;
use crate::ring::Ring;
use crate::socket;
use crate::thread::master::MasterServer;
use crate::thread::slave::SlaveServer;

pub const DEFAULT_CLIENT_PORT: u16 = 8080;
pub const DEFAULT_REGISTRATION_PORT: u16 = 9090;
pub const DEFAULT_WORKERS: usize = 4;

#[derive(Clone, Debug)]
pub struct MasterConfig {
    /// Number of slaves that must register before clients are served
    slaves: usize,

    /// Address to bind both listeners on
    host: String,

    /// Port for client requests
    client_port: u16,

    /// Port for slave registration
    registration_port: u16,

    /// Worker threads for each of the client and registration pools
    workers: usize,

    /// Per-attempt timeout for replica requests
    timeout: Duration,

    /// Base delay between phase-2 retries
    backoff: Duration,

    /// Cache shards
    shards: usize,

    /// Entries per cache shard
    capacity: usize,
}

impl MasterConfig {
    pub fn new(slaves: usize) -> Self {
        MasterConfig {
            slaves,
            host: "0.0.0.0".to_string(),
            client_port: DEFAULT_CLIENT_PORT,
            registration_port: DEFAULT_REGISTRATION_PORT,
            workers: DEFAULT_WORKERS,
            timeout: coordinator::DEFAULT_TIMEOUT,
            backoff: coordinator::DEFAULT_BACKOFF,
            shards: cache::DEFAULT_SHARDS,
            capacity: cache::DEFAULT_CAPACITY,
        }
    }

    pub fn with_host<H: Into<String>>(mut self, host: H) -> Self {
        self.host = host.into();
        self
    }

    pub fn with_client_port(mut self, port: u16) -> Self {
        self.client_port = port;
        self
    }

    pub fn with_registration_port(mut self, port: u16) -> Self {
        self.registration_port = port;
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    /// Zero dimensions are raised to one.
    pub fn with_cache(mut self, shards: usize, capacity: usize) -> Self {
        self.shards = shards.max(1);
        self.capacity = capacity.max(1);
        self
    }

    pub fn run(self) -> Result<MasterServer> {
        let client_addr = socket::resolve(&self.host, self.client_port)?;
        let registration_addr = socket::resolve(&self.host, self.registration_port)?;

        let coordinator = Coordinator::new(
                Ring::new(self.slaves),
                Cache::new(self.shards, self.capacity),
                TcpTransport,
            )
            .with_timeout(self.timeout)
            .with_backoff(self.backoff);

        let pool = Pool::new("master", self.workers)?;
        let registrations = Pool::new("master-registration", self.workers)?;

        info!(
            "starting master for {} slaves with {}x{} cache",
            self.slaves,
            self.shards,
            self.capacity,
        );

        MasterServer::start(
            coordinator,
            pool,
            registrations,
            client_addr,
            registration_addr,
            self.timeout,
        )
    }
}

#[derive(Clone, Debug)]
pub struct SlaveConfig {
    /// Unique slave ID, which is also its ring position
    id: u64,

    /// Participant log file
    log: PathBuf,

    /// Hostname to bind and advertise
    host: String,

    /// Port to listen on, or 0 for any
    port: u16,

    /// Master hostname
    master_host: String,

    /// Master registration port
    master_port: u16,

    /// Worker threads
    workers: usize,

    /// Per-operation socket timeout
    timeout: Duration,
}

impl SlaveConfig {
    pub fn new<P: Into<PathBuf>>(id: u64, log: P) -> Self {
        SlaveConfig {
            id,
            log: log.into(),
            host: "localhost".to_string(),
            port: 0,
            master_host: "localhost".to_string(),
            master_port: DEFAULT_REGISTRATION_PORT,
            workers: DEFAULT_WORKERS,
            timeout: coordinator::DEFAULT_TIMEOUT,
        }
    }

    pub fn with_host<H: Into<String>>(mut self, host: H) -> Self {
        self.host = host.into();
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_master<H: Into<String>>(mut self, host: H, port: u16) -> Self {
        self.master_host = host.into();
        self.master_port = port;
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Recovers the participant log and starts listening. The caller is
    /// responsible for registering with the master.
    pub fn run(self) -> Result<SlaveServer> {
        let addr = socket::resolve(&self.host, self.port)?;
        let master = socket::resolve(&self.master_host, self.master_port)?;
        let participant = Participant::open(self.id, &self.log)?;
        let pool = Pool::new(format!("slave-{}", self.id), self.workers)?;
        SlaveServer::start(participant, pool, &self.host, addr, master, self.timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn master_defaults() {
        let config = MasterConfig::new(2);
        assert_eq!(config.client_port, 8080);
        assert_eq!(config.registration_port, 9090);
        assert_eq!(config.timeout, Duration::from_millis(3000));
        assert_eq!((config.shards, config.capacity), (100, 10));
        assert_eq!(MasterConfig::new(2).with_cache(0, 0).capacity, 1);
    }

    #[test]
    fn master_binds_ephemeral_ports() {
        let mut master = MasterConfig::new(1)
            .with_host("127.0.0.1")
            .with_client_port(0)
            .with_registration_port(0)
            .run()
            .unwrap();
        assert_ne!(master.client_addr(), master.registration_addr());
        assert!(!master.coordinator().ring().is_registered());
        master.shutdown();
    }

    #[test]
    fn slave_advertises_bound_port() {
        let dir = tempfile::tempdir().unwrap();
        let slave = SlaveConfig::new(3, dir.path().join("3.log"))
            .with_host("127.0.0.1")
            .run()
            .unwrap();
        assert_eq!(slave.info().id(), 3);
        assert_eq!(slave.info().port(), slave.addr().port());
        assert_eq!(slave.info().host(), "127.0.0.1");
    }
}
