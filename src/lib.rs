#[macro_use] extern crate derivative;
#[macro_use] extern crate log;
#[macro_use] extern crate quick_error;

pub mod cache;
pub mod client;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod message;
pub mod participant;
pub mod pool;
pub mod replica;
pub mod ring;
pub mod socket;
pub mod storage;
pub mod store;
pub mod thread;

pub use crate::cache::Cache;
pub use crate::client::KvClient;
pub use crate::config::{MasterConfig, SlaveConfig};
pub use crate::coordinator::{Coordinator, TcpTransport, Transport};
pub use crate::error::{KvError, Result};
pub use crate::message::Message;
pub use crate::participant::Participant;
pub use crate::replica::ReplicaInfo;
pub use crate::ring::Ring;
pub use crate::thread::master::MasterServer;
pub use crate::thread::slave::SlaveServer;
