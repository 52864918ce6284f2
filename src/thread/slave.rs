//! # Summary
//!
//! A slave process serves its [`Participant`] on one listener. Each
//! connection carries one request from the master and gets one reply.
//! Before the master can route to it, the slave must [`register`] its
//! advertised address.
//!
//! [`register`]: SlaveServer::register

use std::net::{SocketAddr, TcpStream};
use std::sync::Arc;
use std::time::Duration;

use crate::error::{KvError, Result};
use crate::message::Message;
use crate::participant::Participant;
use crate::pool::Pool;
use crate::replica::ReplicaInfo;
use crate::socket;
use crate::thread::listener::Listener;
use crate::thread::master::registration_reply;

#[derive(Debug)]
pub struct SlaveServer {
    /// Address advertised to the master
    info: ReplicaInfo,

    /// Master registration address
    master: SocketAddr,

    /// Per-operation socket deadline
    timeout: Duration,

    participant: Arc<Participant>,
    pool: Arc<Pool>,
    listener: Listener,
}

impl SlaveServer {
    /// Binds `addr` and starts serving `participant`. The advertised port is
    /// the bound port, so `addr` may use port 0.
    pub fn start(
        participant: Participant,
        pool: Pool,
        host: &str,
        addr: SocketAddr,
        master: SocketAddr,
        timeout: Duration,
    ) -> Result<Self> {
        let participant = Arc::new(participant);
        let pool = Arc::new(pool);

        let listener = {
            let participant = Arc::clone(&participant);
            let pool = Arc::clone(&pool);
            let name = format!("slave-{}", participant.id());
            Listener::spawn(&name, addr, move |stream| {
                let participant = Arc::clone(&participant);
                if let Err(error) = pool.submit(move || serve(&participant, stream, timeout)) {
                    warn!("dropping master connection: {}", error);
                }
            })?
        };

        let info = ReplicaInfo::new(participant.id(), host, listener.addr().port())?;
        Ok(SlaveServer { info, master, timeout, participant, pool, listener })
    }

    /// Registers with the master. Fails with `InvalidFormat` unless the
    /// master confirms this exact registration.
    pub fn register(&self) -> Result<()> {
        let request = Message::Register(self.info.to_string());
        let expected = registration_reply(&self.info);
        match socket::request(self.master, &request, Some(self.timeout))? {
        | Message::Resp { msg: Some(ref msg), .. } if *msg == expected => {
            info!("registered {} with master at {}", self.info, self.master);
            Ok(())
        }
        | reply => {
            warn!("unexpected registration reply {:?}", reply);
            Err(KvError::InvalidFormat)
        }
        }
    }

    pub fn info(&self) -> &ReplicaInfo {
        &self.info
    }

    pub fn addr(&self) -> SocketAddr {
        self.listener.addr()
    }

    pub fn participant(&self) -> &Participant {
        &self.participant
    }

    pub fn shutdown(&mut self) {
        self.listener.shutdown();
        self.pool.shutdown();
    }
}

impl Drop for SlaveServer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn serve(participant: &Participant, mut stream: TcpStream, timeout: Duration) {
    let request = socket::set_timeout(&stream, Some(timeout))
        .and_then(|_| socket::recv::<_, Message>(&mut stream));

    let reply = match request {
    | Ok(request) => participant.handle(request),
    | Err(error) => {
        debug!("slave {} could not read request: {}", participant.id(), error);
        Message::error(&error)
    }
    };

    if let Err(error) = socket::send(&mut stream, &reply) {
        debug!("slave {} could not reply: {}", participant.id(), error);
    }
}
