//! # Summary
//!
//! This module implements the consistent-hash ring that maps keys to
//! slave replicas. Replicas are placed on the ring at their own id,
//! and a key belongs to the first replica strictly after its hash,
//! wrapping around at the end. The second copy of a key lives on that
//! replica's ring successor.
//!
//! The ring also owns the registration barrier: client requests that
//! arrive before every expected slave has registered block until the
//! ring fills up.

use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use crate::replica::ReplicaInfo;

const SEED: u64 = 1_125_899_906_842_597;

/// Stable 64-bit string hash, identical on master and slaves.
pub fn hash64(key: &str) -> u64 {
    key.encode_utf16()
        .fold(SEED, |hash, c| hash.wrapping_mul(31).wrapping_add(u64::from(c)))
}

/// Thread-safe handle to the shared ring. All clones see the same ring.
#[derive(Clone)]
pub struct Ring(Arc<Inner>);

struct Inner {
    state: Mutex<State>,
    registered: Condvar,
}

struct State {
    /// Replicas ordered by unsigned id
    replicas: BTreeMap<u64, ReplicaInfo>,

    /// Number of replicas expected to register
    target: usize,

    /// Set once `target` replicas have registered
    full: bool,

    /// Set at shutdown to release blocked waiters
    closed: bool,
}

impl Ring {
    /// Creates an empty ring expecting `target` replicas.
    pub fn new(target: usize) -> Self {
        Ring(Arc::new(Inner {
            state: Mutex::new(State {
                replicas: BTreeMap::new(),
                target,
                full: target == 0,
                closed: false,
            }),
            registered: Condvar::new(),
        }))
    }

    /// Adds `replica` to the ring, replacing any entry with the same id.
    /// New ids are dropped once the ring is full. Returns whether the
    /// registration was accepted.
    pub fn register(&self, replica: ReplicaInfo) -> bool {
        let mut state = self.0.state.lock();
        let id = replica.id();
        let accepted = state.replicas.contains_key(&id)
            || state.replicas.len() < state.target;

        if accepted {
            info!("registered replica {}", replica);
            state.replicas.insert(id, replica);
        } else {
            warn!("dropping registration of {}: ring is full", replica);
        }

        if !state.full && state.replicas.len() >= state.target {
            info!("all {} replicas registered", state.target);
            state.full = true;
            self.0.registered.notify_all();
        }

        accepted
    }

    /// Replica with the smallest id strictly greater than `hash64(key)`,
    /// wrapping to the smallest id.
    pub fn owner(&self, key: &str) -> Option<ReplicaInfo> {
        let state = self.0.state.lock();
        state.after(hash64(key))
    }

    /// Replica with the smallest id strictly greater than `replica`'s id,
    /// wrapping to the smallest id.
    pub fn successor(&self, replica: &ReplicaInfo) -> Option<ReplicaInfo> {
        let state = self.0.state.lock();
        state.after(replica.id())
    }

    /// Primary owner of `key` and its successor, read under one lock.
    pub fn replicas(&self, key: &str) -> Option<(ReplicaInfo, ReplicaInfo)> {
        let state = self.0.state.lock();
        let primary = state.after(hash64(key))?;
        let secondary = state.after(primary.id())?;
        Some((primary, secondary))
    }

    pub fn get(&self, id: u64) -> Option<ReplicaInfo> {
        self.0.state.lock().replicas.get(&id).cloned()
    }

    pub fn len(&self) -> usize {
        self.0.state.lock().replicas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_registered(&self) -> bool {
        self.0.state.lock().full
    }

    /// Blocks until every expected replica has registered. Returns `false`
    /// if the ring was closed first.
    pub fn wait_registered(&self) -> bool {
        let mut state = self.0.state.lock();
        while !state.full && !state.closed {
            self.0.registered.wait(&mut state);
        }
        state.full
    }

    /// Releases all waiters without completing registration.
    pub fn close(&self) {
        let mut state = self.0.state.lock();
        state.closed = true;
        self.0.registered.notify_all();
    }
}

impl State {
    fn after(&self, position: u64) -> Option<ReplicaInfo> {
        self.replicas
            .range((Bound::Excluded(position), Bound::Unbounded))
            .next()
            .or_else(|| self.replicas.iter().next())
            .map(|(_, replica)| replica.clone())
    }
}
