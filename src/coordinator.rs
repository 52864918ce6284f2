//! # Summary
//!
//! This module implements the master's side of two-phase commit.
//!
//! A write runs entirely on the calling worker while holding the transaction
//! mutex, so at most one transaction is in flight across the replica set:
//!
//! 1. Phase 1 proposes the write to the key's primary and to the primary's
//!    ring successor in parallel. A reply other than `Ready`, including a
//!    timeout or a refused connection, counts as an abort vote.
//! 2. The decision is `Commit` iff both replicas voted `Ready`. A commit is
//!    written through to the cache under the key's shard lock before any
//!    replica learns it.
//! 3. Phase 2 delivers the decision to the primary, then to its successor,
//!    each resolved again from the ring. Delivery is retried with jittered
//!    backoff until the replica acknowledges. Only `stop` ends it early.
//!
//! Replicas are reached through a [`Transport`], so the protocol can be
//! exercised without sockets.

use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use rand::Rng;

use crate::cache::Cache;
use crate::error::{KvError, Result};
use crate::message::Message;
use crate::replica::ReplicaInfo;
use crate::ring::Ring;
use crate::socket;
use crate::store;

/// Per-attempt deadline for every request sent to a replica.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(3000);

/// Base delay between phase-2 delivery attempts.
pub const DEFAULT_BACKOFF: Duration = Duration::from_millis(100);

/// One request and one reply exchanged with a replica.
pub trait Transport: Send + Sync {
    fn send(&self, replica: &ReplicaInfo, message: &Message, timeout: Option<Duration>) -> Result<Message>;
}

/// Opens a fresh TCP connection per request.
#[derive(Copy, Clone, Debug, Default)]
pub struct TcpTransport;

impl Transport for TcpTransport {
    fn send(&self, replica: &ReplicaInfo, message: &Message, timeout: Option<Duration>) -> Result<Message> {
        socket::request(replica.addr()?, message, timeout)
    }
}

#[derive(Derivative)]
#[derivative(Debug)]
pub struct Coordinator<T = TcpTransport> {
    /// Replica placement
    #[derivative(Debug = "ignore")]
    ring: Ring,

    /// Read cache, updated on commit
    cache: Cache,

    #[derivative(Debug = "ignore")]
    transport: T,

    /// Per-attempt replica deadline
    timeout: Duration,

    /// Base delay between phase-2 attempts
    backoff: Duration,

    /// Set at shutdown to cancel phase-2 delivery
    stopped: AtomicBool,

    /// Serializes whole transactions
    #[derivative(Debug = "ignore")]
    transaction: Mutex<()>,
}

impl<T: Transport> Coordinator<T> {
    pub fn new(ring: Ring, cache: Cache, transport: T) -> Self {
        Coordinator {
            ring,
            cache,
            transport,
            timeout: DEFAULT_TIMEOUT,
            backoff: DEFAULT_BACKOFF,
            stopped: AtomicBool::new(false),
            transaction: Mutex::new(()),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn ring(&self) -> &Ring {
        &self.ring
    }

    pub fn cache(&self) -> &Cache {
        &self.cache
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Cancels every phase-2 retry loop, now and in the future.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    pub fn handle_put(&self, key: String, value: String) -> Result<()> {
        store::check_key(&key)?;
        store::check_value(&value)?;
        self.transact(&key, Message::Put { key: key.clone(), value })
    }

    pub fn handle_del(&self, key: String) -> Result<()> {
        store::check_key(&key)?;
        self.transact(&key, Message::Del { key: key.clone() })
    }

    /// Serves a read from the cache, else from the primary, else from
    /// its successor. Misses are not cached.
    pub fn handle_get(&self, key: String) -> Result<String> {
        store::check_key(&key)?;

        if let Some(value) = self.cache.lock(&key).get(&key) {
            trace!("cache hit for {:?}", key);
            return Ok(value)
        }

        let (primary, secondary) = self.ring.replicas(&key)
            .ok_or(KvError::NoSuchKey)?;

        let request = Message::Get { key };
        let replicas = if primary == secondary { vec![primary] } else { vec![primary, secondary] };
        for replica in &replicas {
            match self.transport.send(replica, &request, Some(self.timeout)) {
            // Not cached: a DEL committing between this read and a fill
            // would leave the deleted value in the cache.
            | Ok(Message::Resp { value: Some(value), .. }) => return Ok(value),
            | Ok(reply) => debug!("replica {} missed GET with {:?}", replica, reply),
            | Err(error) => warn!("replica {} failed GET: {}", replica, error),
            }
        }

        Err(KvError::NoSuchKey)
    }

    fn transact(&self, key: &str, request: Message) -> Result<()> {
        let _transaction = self.transaction.lock();

        let (primary, secondary) = self.ring.replicas(key)
            .ok_or(KvError::CouldNotConnect)?;

        debug!("proposing {} {:?} to {} and {}", request.kind(), key, primary, secondary);

        let outcome = if primary == secondary {
            self.vote(&primary, &request)
        } else {
            let (primary_vote, secondary_vote) = thread::scope(|scope| {
                let secondary_vote = scope.spawn(|| self.vote(&secondary, &request));
                let primary_vote = self.vote(&primary, &request);
                let secondary_vote = secondary_vote.join()
                    .unwrap_or(Err(KvError::CouldNotConnect));
                (primary_vote, secondary_vote)
            });
            primary_vote.and(secondary_vote)
        };

        let decision = match &outcome {
        | Ok(()) => {
            let mut shard = self.cache.lock(key);
            match &request {
            | Message::Put { key, value } => shard.put(key, value),
            | Message::Del { key } => shard.del(key),
            | _ => (),
            }
            info!("committing {} {:?}", request.kind(), key);
            Message::Commit
        }
        | Err(error) => {
            info!("aborting {} {:?}: {}", request.kind(), key, error);
            Message::Abort { msg: None }
        }
        };

        // Replicas are looked up again: a registration between phases may
        // route the decision to a different replica than the one that voted.
        let primary = self.ring.owner(key).unwrap_or(primary);
        self.deliver(&primary, &decision)?;
        let secondary = self.ring.successor(&primary).unwrap_or(secondary);
        if secondary != primary {
            self.deliver(&secondary, &decision)?;
        }

        outcome
    }

    /// Phase-1 vote of `replica`. Any failure is an abort.
    fn vote(&self, replica: &ReplicaInfo, request: &Message) -> Result<()> {
        let vote = match self.transport.send(replica, request, Some(self.timeout)) {
        | Ok(Message::Ready) => Ok(()),
        | Ok(Message::Abort { msg: Some(msg) })
        | Ok(Message::Resp { msg: Some(msg), .. }) => Err(KvError::from_message(&msg)),
        | Ok(_) => Err(KvError::InvalidFormat),
        | Err(error) => Err(error),
        };
        match &vote {
        | Ok(()) => trace!("replica {} voted READY", replica),
        | Err(error) => debug!("replica {} voted ABORT: {}", replica, error),
        }
        vote
    }

    /// Sends `decision` to `replica` until it is acknowledged.
    fn deliver(&self, replica: &ReplicaInfo, decision: &Message) -> Result<()> {
        let mut attempts = 0usize;
        loop {
            if self.is_stopped() {
                warn!("abandoning {} to {} after {} attempts", decision.kind(), replica, attempts);
                return Err(KvError::ShuttingDown)
            }

            // A restarted replica may have registered a new address
            let replica = self.ring.get(replica.id()).unwrap_or_else(|| replica.clone());

            attempts += 1;
            match self.transport.send(&replica, decision, Some(self.timeout)) {
            | Ok(Message::Ack) => {
                debug!("replica {} acknowledged {}", replica, decision.kind());
                return Ok(())
            }
            | Ok(reply) => warn!("replica {} replied {} to {}", replica, reply.kind(), decision.kind()),
            | Err(error) => warn!("retrying {} to {}: {}", decision.kind(), replica, error),
            }

            let base = self.backoff.as_millis() as u64;
            let jitter = rand::thread_rng().gen_range(0..=base);
            thread::sleep(Duration::from_millis(base + jitter));
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    use pretty_assertions::assert_eq;

    use super::*;

    type Reply = Box<dyn Fn(u64, &Message) -> Result<Message> + Send + Sync>;

    struct Mock {
        reply: Reply,
        sent: Mutex<Vec<(u64, Message)>>,
    }

    impl Mock {
        fn new<F>(reply: F) -> Self
        where F: Fn(u64, &Message) -> Result<Message> + Send + Sync + 'static
        {
            Mock { reply: Box::new(reply), sent: Mutex::new(Vec::new()) }
        }

        fn sent(&self) -> Vec<(u64, Message)> {
            self.sent.lock().clone()
        }

        fn sent_to(&self, id: u64) -> Vec<Message> {
            self.sent().into_iter()
                .filter(|(to, _)| *to == id)
                .map(|(_, message)| message)
                .collect()
        }
    }

    impl Transport for Mock {
        fn send(&self, replica: &ReplicaInfo, message: &Message, _: Option<Duration>) -> Result<Message> {
            self.sent.lock().push((replica.id(), message.clone()));
            (self.reply)(replica.id(), message)
        }
    }

    /// Ready to every proposal, Ack to every decision.
    fn cooperative(_: u64, message: &Message) -> Result<Message> {
        match message {
        | Message::Put { .. } | Message::Del { .. } => Ok(Message::Ready),
        | Message::Commit | Message::Abort { .. } => Ok(Message::Ack),
        | _ => Ok(Message::error(&KvError::NoSuchKey)),
        }
    }

    fn ring() -> Ring {
        let ring = Ring::new(2);
        ring.register(ReplicaInfo::new(10, "localhost", 1).unwrap());
        ring.register(ReplicaInfo::new(20, "localhost", 2).unwrap());
        ring
    }

    /// Primary and secondary ids for "sup".
    fn owners() -> (u64, u64) {
        let (primary, secondary) = ring().replicas("sup").unwrap();
        (primary.id(), secondary.id())
    }

    fn coordinator(mock: Mock) -> Coordinator<Mock> {
        Coordinator::new(ring(), Cache::new(4, 4), mock)
            .with_backoff(Duration::from_millis(1))
    }

    fn put(key: &str, value: &str) -> Message {
        Message::Put { key: key.to_string(), value: value.to_string() }
    }

    #[test]
    fn commit_updates_cache_and_reaches_both_replicas() {
        let (primary, secondary) = owners();
        let coordinator = coordinator(Mock::new(cooperative));
        assert_eq!(coordinator.handle_put("sup".to_string(), "dawg".to_string()), Ok(()));
        assert_eq!(coordinator.cache().lock("sup").get("sup").as_deref(), Some("dawg"));

        for id in &[primary, secondary] {
            assert_eq!(coordinator.transport().sent_to(*id), vec![put("sup", "dawg"), Message::Commit]);
        }

        let decisions = coordinator.transport().sent()
            .into_iter()
            .filter(|(_, message)| *message == Message::Commit)
            .map(|(id, _)| id)
            .collect::<Vec<_>>();
        assert_eq!(decisions, vec![primary, secondary]);
    }

    #[test]
    fn abort_vote_leaves_cache_untouched() {
        let mock = Mock::new(|id, message| match message {
            | Message::Put { .. } if id == 20 => Ok(Message::vote_abort(&KvError::OversizedValue)),
            | message => cooperative(id, message),
        });
        let coordinator = coordinator(mock);
        assert_eq!(
            coordinator.handle_put("sup".to_string(), "dawg".to_string()),
            Err(KvError::OversizedValue),
        );
        assert!(coordinator.cache().is_empty());
        for id in &[10, 20] {
            assert_eq!(
                coordinator.transport().sent_to(*id),
                vec![put("sup", "dawg"), Message::Abort { msg: None }],
            );
        }
    }

    #[test]
    fn primary_error_is_reported_first() {
        let (primary, _) = owners();
        let mock = Mock::new(move |id, message| match message {
            | Message::Put { .. } if id == primary => Ok(Message::vote_abort(&KvError::OversizedKey)),
            | Message::Put { .. } => Ok(Message::vote_abort(&KvError::OversizedValue)),
            | message => cooperative(id, message),
        });
        let coordinator = coordinator(mock);
        assert_eq!(
            coordinator.handle_put("sup".to_string(), "dawg".to_string()),
            Err(KvError::OversizedKey),
        );
    }

    #[test]
    fn unreachable_replica_aborts_and_phase_two_retries_until_ack() {
        let failures = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&failures);
        let mock = Mock::new(move |id, message| match message {
            | Message::Put { .. } if id == 10 => Err(KvError::CouldNotConnect),
            | Message::Abort { .. } if id == 10 && counter.fetch_add(1, Ordering::SeqCst) < 3 => {
                Err(KvError::SocketTimeout)
            }
            | message => cooperative(id, message),
        });
        let coordinator = coordinator(mock);
        assert_eq!(
            coordinator.handle_put("sup".to_string(), "dawg".to_string()),
            Err(KvError::CouldNotConnect),
        );
        assert_eq!(failures.load(Ordering::SeqCst), 4);
        let aborts = coordinator.transport().sent_to(10)
            .into_iter()
            .filter(|message| *message == Message::Abort { msg: None })
            .count();
        assert_eq!(aborts, 4);
    }

    #[test]
    fn stop_cancels_phase_two() {
        let mock = Mock::new(|id, message| match message {
            | Message::Commit => Err(KvError::CouldNotConnect),
            | message => cooperative(id, message),
        });
        let coordinator = coordinator(mock);
        let coordinator = Arc::new(coordinator);
        let stopper = {
            let coordinator = Arc::clone(&coordinator);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(50));
                coordinator.stop();
            })
        };
        assert_eq!(
            coordinator.handle_put("sup".to_string(), "dawg".to_string()),
            Err(KvError::ShuttingDown),
        );
        stopper.join().unwrap();
    }

    #[test]
    fn committed_del_evicts_cached_value() {
        let coordinator = coordinator(Mock::new(cooperative));
        coordinator.handle_put("sup".to_string(), "dawg".to_string()).unwrap();
        coordinator.handle_del("sup".to_string()).unwrap();
        assert_eq!(coordinator.cache().lock("sup").get("sup"), None);
    }

    #[test]
    fn invalid_requests_never_reach_replicas() {
        let coordinator = coordinator(Mock::new(cooperative));
        assert_eq!(coordinator.handle_put("".to_string(), "v".to_string()), Err(KvError::InvalidKey));
        assert_eq!(coordinator.handle_put("k".to_string(), "".to_string()), Err(KvError::InvalidValue));
        assert_eq!(coordinator.handle_del("".to_string()), Err(KvError::InvalidKey));
        assert_eq!(coordinator.handle_get("".to_string()), Err(KvError::InvalidKey));
        assert!(coordinator.transport().sent().is_empty());
    }

    #[test]
    fn get_prefers_cache() {
        let coordinator = coordinator(Mock::new(cooperative));
        coordinator.cache().lock("sup").put("sup", "dawg");
        assert_eq!(coordinator.handle_get("sup".to_string()), Ok("dawg".to_string()));
        assert!(coordinator.transport().sent().is_empty());
    }

    #[test]
    fn get_falls_back_to_successor() {
        let (primary, secondary) = owners();
        let mock = Mock::new(move |id, message| match message {
            | Message::Get { key } if id == secondary => Ok(Message::value(key.clone(), "dawg".to_string())),
            | message => cooperative(id, message),
        });
        let coordinator = coordinator(mock);
        assert_eq!(coordinator.handle_get("sup".to_string()), Ok("dawg".to_string()));
        let asked = coordinator.transport().sent()
            .into_iter()
            .map(|(id, _)| id)
            .collect::<Vec<_>>();
        assert_eq!(asked, vec![primary, secondary]);
        assert!(coordinator.cache().is_empty());
    }

    #[test]
    fn get_misses_everywhere() {
        let coordinator = coordinator(Mock::new(cooperative));
        assert_eq!(coordinator.handle_get("sup".to_string()), Err(KvError::NoSuchKey));
    }

    #[test]
    fn single_replica_ring_proposes_once() {
        let ring = Ring::new(1);
        ring.register(ReplicaInfo::new(5, "localhost", 1).unwrap());
        let coordinator = Coordinator::new(ring, Cache::default(), Mock::new(cooperative));
        coordinator.handle_put("sup".to_string(), "dawg".to_string()).unwrap();
        assert_eq!(coordinator.transport().sent_to(5), vec![put("sup", "dawg"), Message::Commit]);
    }
}
