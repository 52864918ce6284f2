//! # Summary
//!
//! The master process runs two listeners:
//!
//! - the registration listener, which queues each slave connection on its
//!   own worker pool and adds the slave to the ring;
//! - the client listener, which queues each connection on the client pool.
//!
//! The pools are separate so that clients blocked on the registration
//! barrier never hold the workers registration needs.
//!
//! A client job first waits for the ring to fill up, then reads one request,
//! dispatches it to the [`Coordinator`], and writes one reply.

use std::net::{SocketAddr, TcpStream};
use std::sync::Arc;
use std::time::Duration;

use crate::coordinator::{Coordinator, TcpTransport, Transport};
use crate::error::{KvError, Result};
use crate::message::Message;
use crate::pool::Pool;
use crate::replica::ReplicaInfo;
use crate::ring::Ring;
use crate::socket;
use crate::thread::listener::Listener;

/// Reply sent to a slave whose registration was parsed.
pub fn registration_reply(replica: &ReplicaInfo) -> String {
    format!("Successfully registered {}", replica)
}

#[derive(Derivative)]
#[derivative(Debug)]
pub struct MasterServer<T: Transport + 'static = TcpTransport> {
    #[derivative(Debug = "ignore")]
    coordinator: Arc<Coordinator<T>>,
    pool: Arc<Pool>,
    registrations: Arc<Pool>,
    client: Listener,
    registration: Listener,
}

impl<T: Transport + 'static> MasterServer<T> {
    /// Binds both listeners and starts serving.
    pub fn start(
        coordinator: Coordinator<T>,
        pool: Pool,
        registrations: Pool,
        client_addr: SocketAddr,
        registration_addr: SocketAddr,
        timeout: Duration,
    ) -> Result<Self> {
        let coordinator = Arc::new(coordinator);
        let pool = Arc::new(pool);
        let registrations = Arc::new(registrations);

        let registration = {
            let ring = coordinator.ring().clone();
            let registrations = Arc::clone(&registrations);
            Listener::spawn("master-registration", registration_addr, move |stream| {
                let ring = ring.clone();
                let job = move || serve_registration(&ring, stream, timeout);
                if let Err(error) = registrations.submit(job) {
                    warn!("dropping registration connection: {}", error);
                }
            })?
        };

        let client = {
            let coordinator = Arc::clone(&coordinator);
            let pool = Arc::clone(&pool);
            Listener::spawn("master-client", client_addr, move |stream| {
                let coordinator = Arc::clone(&coordinator);
                if let Err(error) = pool.submit(move || serve_client(&coordinator, stream, timeout)) {
                    warn!("dropping client connection: {}", error);
                }
            })?
        };

        Ok(MasterServer { coordinator, pool, registrations, client, registration })
    }

    pub fn client_addr(&self) -> SocketAddr {
        self.client.addr()
    }

    pub fn registration_addr(&self) -> SocketAddr {
        self.registration.addr()
    }

    pub fn coordinator(&self) -> &Coordinator<T> {
        &self.coordinator
    }

    /// Stops accepting, cancels pending phase-2 deliveries, releases
    /// requests waiting for registration, and joins the workers.
    pub fn shutdown(&mut self) {
        self.coordinator.stop();
        self.coordinator.ring().close();
        self.registration.shutdown();
        self.client.shutdown();
        self.registrations.shutdown();
        self.pool.shutdown();
    }
}

impl<T: Transport + 'static> Drop for MasterServer<T> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn serve_registration(ring: &Ring, mut stream: TcpStream, timeout: Duration) {
    let reply = socket::set_timeout(&stream, Some(timeout))
        .and_then(|_| socket::recv::<_, Message>(&mut stream))
        .and_then(|request| match request {
            | Message::Register(info) => info.parse::<ReplicaInfo>(),
            | _ => Err(KvError::InvalidFormat),
        })
        .map(|replica| {
            ring.register(replica.clone());
            Message::Resp {
                key: None,
                value: None,
                msg: Some(registration_reply(&replica)),
            }
        })
        .unwrap_or_else(|error| {
            warn!("rejected registration: {}", error);
            Message::error(&error)
        });

    if let Err(error) = socket::send(&mut stream, &reply) {
        warn!("could not reply to registration: {}", error);
    }
}

fn serve_client<T: Transport>(coordinator: &Coordinator<T>, mut stream: TcpStream, timeout: Duration) {
    let request = socket::set_timeout(&stream, Some(timeout))
        .and_then(|_| socket::recv::<_, Message>(&mut stream));

    let reply = match request {
    | Ok(request) if coordinator.ring().wait_registered() => handle(coordinator, request),
    | Ok(_) => Message::error(&KvError::ShuttingDown),
    | Err(error) => Message::error(&error),
    };

    if let Err(error) = socket::send(&mut stream, &reply) {
        debug!("could not reply to client: {}", error);
    }
}

/// Dispatches one client request.
pub fn handle<T: Transport>(coordinator: &Coordinator<T>, request: Message) -> Message {
    trace!("client request {:?}", request);
    let reply = match request {
    | Message::Put { key, value } => coordinator.handle_put(key, value).map(|_| Message::success()),
    | Message::Del { key } => coordinator.handle_del(key).map(|_| Message::success()),
    | Message::Get { key } => {
        coordinator.handle_get(key.clone()).map(|value| Message::value(key, value))
    }
    | request => {
        warn!("unexpected {} from client", request.kind());
        Err(KvError::InvalidFormat)
    }
    };
    reply.unwrap_or_else(|error| Message::error(&error))
}
