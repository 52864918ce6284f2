use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::error::{KvError, Result};

/// Pause after a failed `accept`, so a persistent error such as running out
/// of file descriptors does not spin the loop.
pub const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

/// Accept loop on a dedicated thread, handing each connection to `handler`.
#[derive(Debug)]
pub struct Listener {
    name: String,
    addr: SocketAddr,
    stopped: Arc<AtomicBool>,
    handle: Option<thread::JoinHandle<()>>,
}

impl Listener {
    pub fn spawn<F>(name: &str, addr: SocketAddr, mut handler: F) -> Result<Self>
    where F: FnMut(TcpStream) + Send + 'static
    {
        let listener = TcpListener::bind(addr)
            .map_err(|_| KvError::CouldNotCreateSocket)?;
        let addr = listener.local_addr()
            .map_err(|_| KvError::CouldNotCreateSocket)?;
        let stopped = Arc::new(AtomicBool::new(false));

        let handle = {
            let stopped = Arc::clone(&stopped);
            let name = name.to_string();
            thread::Builder::new()
                .name(name.clone())
                .spawn(move || {
                    info!("{} listening on {}", name, addr);
                    accept(&name, listener.incoming(), &stopped, &mut handler);
                    info!("{} stopped", name);
                })
                .map_err(|_| KvError::CouldNotCreateSocket)?
        };

        Ok(Listener {
            name: name.to_string(),
            addr,
            stopped,
            handle: Some(handle),
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Stops accepting and joins the accept thread.
    pub fn shutdown(&mut self) {
        let handle = match self.handle.take() {
        | Some(handle) => handle,
        | None => return,
        };

        self.stopped.store(true, Ordering::SeqCst);

        // Unblock `accept` with a throwaway connection
        let mut wake = self.addr;
        if wake.ip().is_unspecified() {
            wake.set_ip(match wake.ip() {
            | IpAddr::V4(_) => IpAddr::V4(Ipv4Addr::LOCALHOST),
            | IpAddr::V6(_) => IpAddr::V6(Ipv6Addr::LOCALHOST),
            });
        }
        if let Err(error) = TcpStream::connect(wake) {
            warn!("{} could not wake accept loop: {}", self.name, error);
        }

        handle.join().ok();
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn accept<I, F>(name: &str, incoming: I, stopped: &AtomicBool, handler: &mut F)
where I: Iterator<Item = io::Result<TcpStream>>,
      F: FnMut(TcpStream),
{
    for stream in incoming {
        if stopped.load(Ordering::SeqCst) { break }
        match stream {
        | Ok(stream) => handler(stream),
        | Err(error) => {
            warn!("{} failed to accept: {}", name, error);
            thread::sleep(ACCEPT_BACKOFF);
        }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc;
    use std::time::Instant;

    use super::*;

    #[test]
    fn accepts_until_shutdown() {
        let (tx, rx) = mpsc::channel();
        let mut listener = Listener::spawn("test", "127.0.0.1:0".parse().unwrap(), move |stream| {
            tx.send(stream.peer_addr().is_ok()).ok();
        }).unwrap();

        TcpStream::connect(listener.addr()).unwrap();
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)), Ok(true));

        listener.shutdown();
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
    }

    #[test]
    fn unspecified_address_still_shuts_down() {
        let mut listener = Listener::spawn("any", "0.0.0.0:0".parse().unwrap(), drop).unwrap();
        assert!(listener.addr().port() != 0);
        listener.shutdown();
        listener.shutdown();
    }

    #[test]
    fn accept_errors_back_off() {
        let errors = (0..3)
            .map(|_| Err::<TcpStream, _>(io::Error::new(io::ErrorKind::Other, "too many open files")));
        let stopped = AtomicBool::new(false);
        let mut accepted = 0;
        let start = Instant::now();
        accept("errors", errors, &stopped, &mut |_: TcpStream| accepted += 1);
        assert!(start.elapsed() >= ACCEPT_BACKOFF * 3);
        assert_eq!(accepted, 0);
    }
}
