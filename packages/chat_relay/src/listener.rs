use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::net::{TcpListener, UdpSocket};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::config::Protocol;
use crate::connection::Connection;
use crate::error::{ChatError, Result};
use crate::protocol::READ_BUFFER_SIZE;

/// Listening socket for either transport.
pub enum Listener {
    Tcp(TcpListener),
    Udp(UdpListener),
}

impl Listener {
    pub async fn bind(protocol: Protocol, addr: &str) -> Result<Self> {
        let bind_err = |source| ChatError::Bind {
            protocol,
            addr: addr.to_string(),
            source,
        };
        match protocol {
            Protocol::Tcp => Ok(Listener::Tcp(
                TcpListener::bind(addr).await.map_err(bind_err)?,
            )),
            Protocol::Udp => {
                let socket = UdpSocket::bind(addr).await.map_err(bind_err)?;
                Ok(Listener::Udp(UdpListener::new(socket)))
            }
        }
    }

    pub fn protocol(&self) -> Protocol {
        match self {
            Listener::Tcp(_) => Protocol::Tcp,
            Listener::Udp(_) => Protocol::Udp,
        }
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        match self {
            Listener::Tcp(listener) => listener.local_addr(),
            Listener::Udp(listener) => listener.socket.local_addr(),
        }
    }

    /// Wait for the next client connection.
    pub async fn accept(&mut self) -> io::Result<Connection> {
        match self {
            Listener::Tcp(listener) => {
                let (stream, peer) = listener.accept().await?;
                Ok(Connection::tcp(stream, peer))
            }
            Listener::Udp(listener) => listener.incoming.recv().await.ok_or_else(|| {
                io::Error::new(io::ErrorKind::BrokenPipe, "udp receive loop stopped")
            }),
        }
    }
}

/// Datagrams buffered per peer before further ones are dropped.
pub(crate) const PEER_QUEUE_DATAGRAMS: usize = 64;

const MAX_RECV_BACKOFF: Duration = Duration::from_secs(1);

type PeerMap = HashMap<SocketAddr, (u64, mpsc::Sender<Vec<u8>>)>;
type PeerTable = Arc<Mutex<PeerMap>>;

fn lock_peers(peers: &PeerTable) -> MutexGuard<'_, PeerMap> {
    peers.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Turns one datagram socket into per-peer pseudo-connections.
///
/// The first datagram from an unknown peer opens a [`Connection`]; later
/// datagrams from that peer are routed to it. Empty datagrams only open a
/// connection and are never delivered as data.
pub struct UdpListener {
    socket: Arc<UdpSocket>,
    incoming: mpsc::UnboundedReceiver<Connection>,
    receive_loop: JoinHandle<()>,
}

impl UdpListener {
    fn new(socket: UdpSocket) -> Self {
        let socket = Arc::new(socket);
        let (incoming_tx, incoming) = mpsc::unbounded_channel();
        let receive_loop = tokio::spawn(receive_loop(socket.clone(), incoming_tx));
        Self {
            socket,
            incoming,
            receive_loop,
        }
    }
}

impl Drop for UdpListener {
    fn drop(&mut self) {
        self.receive_loop.abort();
    }
}

async fn receive_loop(socket: Arc<UdpSocket>, incoming: mpsc::UnboundedSender<Connection>) {
    let peers: PeerTable = Arc::new(Mutex::new(HashMap::new()));
    let mut next_lease: u64 = 0;
    let mut failures: u32 = 0;
    let mut buf = vec![0u8; READ_BUFFER_SIZE];

    loop {
        let (n, peer) = match socket.recv_from(&mut buf).await {
            Ok(received) => {
                failures = 0;
                received
            }
            Err(e) => {
                // ICMP port-unreachable from a vanished client surfaces here
                // on some platforms; the socket itself is still usable.
                debug!("UDP receive error: {}", e);
                tokio::time::sleep(recv_backoff(failures)).await;
                failures = failures.saturating_add(1);
                continue;
            }
        };
        let mut datagram = buf[..n].to_vec();

        if let Some((_, tx)) = lock_peers(&peers).get(&peer) {
            if datagram.is_empty() {
                continue;
            }
            match tx.try_send(datagram) {
                Ok(()) => continue,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    debug!(peer = %peer, "Peer queue full, dropping datagram");
                    continue;
                }
                Err(mpsc::error::TrySendError::Closed(returned)) => datagram = returned,
            }
        }

        // Unknown peer, or its previous connection is gone.
        next_lease += 1;
        let id = next_lease;
        let (tx, rx) = mpsc::channel(PEER_QUEUE_DATAGRAMS);
        if !datagram.is_empty() {
            let _ = tx.try_send(datagram);
        }
        lock_peers(&peers).insert(peer, (id, tx));

        let lease = PeerLease {
            peer,
            id,
            peers: peers.clone(),
        };
        let conn = Connection::from_udp(socket.clone(), peer, rx, lease);
        if incoming.send(conn).is_err() {
            warn!("UDP listener dropped, stopping receive loop");
            break;
        }
    }
}

/// No pause after an isolated error, then doubling up to one second.
fn recv_backoff(failures: u32) -> Duration {
    if failures == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(10)
        .saturating_mul(1u32 << failures.min(8))
        .min(MAX_RECV_BACKOFF)
}

/// Keeps a peer routed to its connection; dropping it forgets the peer so the
/// next datagram opens a fresh connection.
pub(crate) struct PeerLease {
    peer: SocketAddr,
    id: u64,
    peers: PeerTable,
}

impl Drop for PeerLease {
    fn drop(&mut self) {
        let mut table = lock_peers(&self.peers);
        if table.get(&self.peer).is_some_and(|(id, _)| *id == self.id) {
            table.remove(&self.peer);
        }
    }
}
