use tokio::net::{TcpListener, TcpStream};

use crate::connection::Connection;

/// Server-side [`Connection`] plus the client socket on the other end.
pub async fn tcp_pair() -> (Connection, TcpStream) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (client, accepted) = tokio::join!(TcpStream::connect(addr), listener.accept());
    let (server, _) = accepted.unwrap();
    (Connection::from_tcp(server).unwrap(), client.unwrap())
}
