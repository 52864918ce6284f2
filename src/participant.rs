//! # Summary
//!
//! This module defines the `Participant`, the slave side of two-phase
//! commit. Each proposal is appended to the participant log and synced
//! *before* it is validated, so the log always reflects what the master
//! proposed, including proposals this slave votes to abort. Decisions are
//! appended only when a proposal is pending, and a commit is applied to the
//! store only once its decision is durable.
//!
//! On open, the log is replayed into a fresh store. A trailing proposal with
//! no decision is in doubt: the participant keeps it pending and waits for
//! the master to redeliver the decision.

use std::path::Path;

use parking_lot::{Mutex, RwLock};
use serde_derive::{Deserialize, Serialize};

use crate::error::KvError;
use crate::message::Message;
use crate::storage::Log;
use crate::store::{self, Store};

#[derive(Serialize, Deserialize)]
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Record {
    Put { key: String, value: String },
    Del { key: String },
    Commit,
    Abort,
}

impl Record {
    pub fn is_decision(&self) -> bool {
        match self {
        | Record::Commit | Record::Abort => true,
        | Record::Put { .. } | Record::Del { .. } => false,
        }
    }
}

#[derive(Debug)]
pub struct Participant {
    /// Unique slave ID
    id: u64,

    /// Durable record of proposals and decisions
    log: Mutex<Log<Record>>,

    /// Committed key-value pairs
    store: RwLock<Store>,
}

impl Participant {
    /// Opens the log at `path`, rebuilding the store from committed records.
    pub fn open<P: AsRef<Path>>(id: u64, path: P) -> crate::Result<Self> {
        let log = Log::open(path)?;
        let store = rebuild(log.records());
        if let Some(record) = log.last().filter(|record| !record.is_decision()) {
            info!("slave {} recovered in-doubt transaction {:?}", id, record);
        }
        info!("slave {} recovered {} keys from {}", id, store.len(), log.path().display());
        Ok(Participant {
            id,
            log: Mutex::new(log),
            store: RwLock::new(store),
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Handles one request from the master and produces the reply.
    pub fn handle(&self, message: Message) -> Message {
        trace!("slave {} received {:?}", self.id, message);
        match message {
        | Message::Put { key, value } => self.propose(Record::Put { key, value }),
        | Message::Del { key } => self.propose(Record::Del { key }),
        | Message::Get { key } => self.get(key),
        | Message::Commit => self.decide(Record::Commit),
        | Message::Abort { .. } => self.decide(Record::Abort),
        | message => {
            warn!("slave {} received unexpected {}", self.id, message.kind());
            Message::error(&KvError::InvalidFormat)
        }
        }
    }

    /// Pending proposal whose decision has not been learned.
    pub fn in_doubt(&self) -> Option<Record> {
        self.log.lock()
            .last()
            .filter(|record| !record.is_decision())
            .cloned()
    }

    /// Reads a committed value.
    pub fn value(&self, key: &str) -> crate::Result<String> {
        self.store.read().get(key)
    }

    /// Number of records in the log.
    pub fn log_len(&self) -> usize {
        self.log.lock().len()
    }

    fn get(&self, key: String) -> Message {
        match self.store.read().get(&key) {
        | Ok(value) => Message::value(key, value),
        | Err(error) => Message::error(&error),
        }
    }

    /// Phase 1: log the proposal, then vote.
    fn propose(&self, record: Record) -> Message {
        let mut log = self.log.lock();

        // The master never proposes again before delivering a decision,
        // so a stale pending record can only be left over from a lost master.
        if let Some(stale) = log.last().filter(|record| !record.is_decision()).cloned() {
            warn!("slave {} superseding in-doubt {:?}", self.id, stale);
            if let Err(error) = log.append(Record::Abort) {
                return Message::vote_abort(&error)
            }
        }

        if let Err(error) = log.append(record.clone()) {
            error!("slave {} failed to log proposal: {}", self.id, error);
            return Message::vote_abort(&error)
        }

        let vote = match &record {
        | Record::Put { key, value } => {
            store::check_key(key).and_then(|_| store::check_value(value))
        }
        | Record::Del { key } => {
            store::check_key(key).and_then(|_| {
                if self.store.read().contains(key) { Ok(()) } else { Err(KvError::NoSuchKey) }
            })
        }
        | Record::Commit | Record::Abort => Err(KvError::InvalidFormat),
        };

        match vote {
        | Ok(()) => {
            debug!("slave {} votes READY on {:?}", self.id, record);
            Message::Ready
        }
        | Err(error) => {
            debug!("slave {} votes ABORT on {:?}: {}", self.id, record, error);
            Message::vote_abort(&error)
        }
        }
    }

    /// Phase 2: log the decision if a proposal is pending, then apply it.
    fn decide(&self, decision: Record) -> Message {
        let mut log = self.log.lock();

        let pending = match log.last() {
        | Some(record) if !record.is_decision() => record.clone(),
        | _ => {
            debug!("slave {} has nothing pending for {:?}", self.id, decision);
            return Message::Ack
        }
        };

        if let Err(error) = log.append(decision.clone()) {
            error!("slave {} failed to log decision: {}", self.id, error);
            return Message::error(&error)
        }

        if decision == Record::Commit {
            apply(&mut self.store.write(), pending);
        }

        debug!("slave {} acknowledged {:?}", self.id, decision);
        Message::Ack
    }
}

fn apply(store: &mut Store, record: Record) {
    let applied = match record {
    | Record::Put { key, value } => store.put(key, value),
    | Record::Del { key } => store.del(&key),
    | Record::Commit | Record::Abort => Ok(()),
    };
    if let Err(error) = applied {
        warn!("committed record could not be applied: {}", error);
    }
}

/// Replays every committed proposal in `records`.
fn rebuild(records: &[Record]) -> Store {
    let mut store = Store::default();
    let mut pending = None;
    for record in records {
        match record {
        | Record::Put { .. } | Record::Del { .. } => pending = Some(record.clone()),
        | Record::Commit => {
            if let Some(record) = pending.take() {
                apply(&mut store, record);
            }
        }
        | Record::Abort => pending = None,
        }
    }
    store
}
