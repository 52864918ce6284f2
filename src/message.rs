use serde_derive::{Deserialize, Serialize};

use crate::error::{KvError, SUCCESS};

/// Every message exchanged between clients, the master, and slaves.
#[derive(Serialize, Deserialize)]
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Message {
    /// Client write, or phase-1 proposal to a replica
    Put { key: String, value: String },

    /// Client read, or direct read from a replica
    Get { key: String },

    /// Client delete, or phase-1 proposal to a replica
    Del { key: String },

    /// Phase-1 vote to commit
    Ready,

    /// Phase-1 vote to abort (with a reason), or phase-2 abort decision
    Abort { msg: Option<String> },

    /// Phase-2 commit decision
    Commit,

    /// Acknowledgment of a phase-2 decision
    Ack,

    /// Generic response carrying a value or an error message
    Resp {
        key: Option<String>,
        value: Option<String>,
        msg: Option<String>,
    },

    /// Slave registration, carrying `<id>@<host>:<port>`
    Register(String),
}

impl Message {
    pub fn success() -> Self {
        Message::Resp {
            key: None,
            value: None,
            msg: Some(SUCCESS.to_string()),
        }
    }

    pub fn error(error: &KvError) -> Self {
        Message::Resp {
            key: None,
            value: None,
            msg: Some(error.to_string()),
        }
    }

    pub fn value(key: String, value: String) -> Self {
        Message::Resp {
            key: Some(key),
            value: Some(value),
            msg: None,
        }
    }

    pub fn vote_abort(error: &KvError) -> Self {
        Message::Abort { msg: Some(error.to_string()) }
    }

    /// Short discriminator used in log lines.
    pub fn kind(&self) -> &'static str {
        match self {
        | Message::Put { .. } => "PUT",
        | Message::Get { .. } => "GET",
        | Message::Del { .. } => "DEL",
        | Message::Ready => "READY",
        | Message::Abort { .. } => "ABORT",
        | Message::Commit => "COMMIT",
        | Message::Ack => "ACK",
        | Message::Resp { .. } => "RESP",
        | Message::Register(_) => "REGISTER",
        }
    }
}
