use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpStream, UdpSocket};
use tokio::sync::{Mutex, mpsc};
use tracing::debug;

use crate::listener::PeerLease;

/// A client connection, owned by exactly one connection worker.
///
/// The read side never leaves the worker. Other parts of the server only ever
/// get a [`ConnectionWriter`], which can write lines but cannot close the
/// connection.
pub struct Connection {
    peer: SocketAddr,
    reader: ReadSide,
    writer: ConnectionWriter,
}

enum ReadSide {
    Tcp(OwnedReadHalf),
    Udp {
        datagrams: mpsc::Receiver<Vec<u8>>,
        _lease: PeerLease,
    },
}

/// Cloneable, non-owning write handle to a [`Connection`].
#[derive(Clone)]
pub struct ConnectionWriter {
    peer: SocketAddr,
    sink: WriteSide,
}

#[derive(Clone)]
enum WriteSide {
    Tcp(Arc<Mutex<OwnedWriteHalf>>),
    Udp(Arc<UdpSocket>),
}

impl Connection {
    pub fn from_tcp(stream: TcpStream) -> io::Result<Self> {
        let peer = stream.peer_addr()?;
        Ok(Self::tcp(stream, peer))
    }

    /// For freshly accepted streams, whose peer address is already known.
    pub(crate) fn tcp(stream: TcpStream, peer: SocketAddr) -> Self {
        let (read, write) = stream.into_split();
        Self {
            peer,
            reader: ReadSide::Tcp(read),
            writer: ConnectionWriter {
                peer,
                sink: WriteSide::Tcp(Arc::new(Mutex::new(write))),
            },
        }
    }

    pub(crate) fn from_udp(
        socket: Arc<UdpSocket>,
        peer: SocketAddr,
        datagrams: mpsc::Receiver<Vec<u8>>,
        lease: PeerLease,
    ) -> Self {
        Self {
            peer,
            reader: ReadSide::Udp {
                datagrams,
                _lease: lease,
            },
            writer: ConnectionWriter {
                peer,
                sink: WriteSide::Udp(socket),
            },
        }
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    pub fn writer(&self) -> ConnectionWriter {
        self.writer.clone()
    }

    /// Read the next chunk. `Ok(0)` means the peer is gone.
    ///
    /// For UDP every datagram is one chunk; oversized datagrams are truncated
    /// to `buf`.
    pub async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match &mut self.reader {
            ReadSide::Tcp(read) => read.read(buf).await,
            ReadSide::Udp { datagrams, .. } => match datagrams.recv().await {
                Some(datagram) => {
                    let n = datagram.len().min(buf.len());
                    buf[..n].copy_from_slice(&datagram[..n]);
                    Ok(n)
                }
                None => Ok(0),
            },
        }
    }

    pub async fn write_line(&self, line: &str) -> io::Result<()> {
        self.writer.write_line(line).await
    }

    /// Close the connection. Taking `self` makes a second close impossible.
    pub async fn close(self) {
        if let Err(e) = self.writer.shutdown().await {
            debug!(peer = %self.peer, "Error while closing connection: {}", e);
        }
        debug!(peer = %self.peer, "Connection closed");
    }
}

impl ConnectionWriter {
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    /// Write `line` followed by a newline.
    pub async fn write_line(&self, line: &str) -> io::Result<()> {
        let mut bytes = Vec::with_capacity(line.len() + 1);
        bytes.extend_from_slice(line.as_bytes());
        bytes.push(b'\n');

        match &self.sink {
            WriteSide::Tcp(write) => {
                let mut write = write.lock().await;
                write.write_all(&bytes).await?;
                write.flush().await
            }
            WriteSide::Udp(socket) => socket.send_to(&bytes, self.peer).await.map(|_| ()),
        }
    }

    /// Like [`write_line`](Self::write_line), but gives up after `limit`.
    ///
    /// A write that stalls (the peer stopped reading) shuts the connection's
    /// write side down, so later writes fail at once instead of stalling too.
    pub async fn write_line_within(&self, line: &str, limit: Duration) -> io::Result<()> {
        match tokio::time::timeout(limit, self.write_line(line)).await {
            Ok(result) => result,
            Err(_) => {
                if let Err(e) = self.shutdown().await {
                    debug!(peer = %self.peer, "Error while cutting off stalled peer: {}", e);
                }
                Err(io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("write stalled for {limit:?}, peer cut off"),
                ))
            }
        }
    }

    async fn shutdown(&self) -> io::Result<()> {
        match &self.sink {
            WriteSide::Tcp(write) => write.lock().await.shutdown().await,
            // Nothing to tear down on a shared datagram socket; dropping the
            // read side releases the peer.
            WriteSide::Udp(_) => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::tcp_pair;
    use tokio::io::{AsyncBufReadExt, BufReader};

    #[tokio::test]
    async fn write_line_appends_newline() {
        let (conn, client) = tcp_pair().await;
        conn.write_line("hello").await.unwrap();

        let mut lines = BufReader::new(client).lines();
        assert_eq!(lines.next_line().await.unwrap().as_deref(), Some("hello"));
    }

    #[tokio::test]
    async fn read_returns_zero_on_peer_close() {
        let (mut conn, client) = tcp_pair().await;
        drop(client);

        let mut buf = [0u8; 16];
        assert_eq!(conn.read(&mut buf).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn stalled_write_times_out_and_cuts_off_peer() {
        let (conn, _client_never_reads) = tcp_pair().await;
        let writer = conn.writer();
        let line = "x".repeat(64 * 1024);

        let limit = Duration::from_millis(200);
        let stalled = tokio::time::timeout(Duration::from_secs(30), async {
            loop {
                if let Err(e) = writer.write_line_within(&line, limit).await {
                    break e;
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(stalled.kind(), io::ErrorKind::TimedOut);

        // Cut off: the next write fails immediately rather than waiting.
        let next = tokio::time::timeout(limit, writer.write_line("late")).await;
        assert!(matches!(next, Ok(Err(_))));
    }

    #[tokio::test]
    async fn close_sends_eof_to_peer() {
        let (conn, mut client) = tcp_pair().await;
        let writer = conn.writer();
        conn.close().await;

        let mut buf = Vec::new();
        client.read_to_end(&mut buf).await.unwrap();
        assert!(buf.is_empty());

        // Handles that outlive the connection fail instead of writing.
        assert!(writer.write_line("late").await.is_err());
    }
}
