use anyhow::{Context, Result};
use chat_relay::Protocol;
use chat_relay::protocol::{EXIT_COMMAND, READ_BUFFER_SIZE};
use std::io::BufRead;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpStream, UdpSocket, lookup_host};
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::config::ClientFileConfig;

const CLEAR_COMMAND: &str = ".clear";
const CLEAR_SCREEN: &str = "\x1b[2J\x1b[1;1H";

/// What a line typed at the terminal asks for.
#[derive(Debug, PartialEq, Eq)]
enum Input<'a> {
    Clear,
    Exit,
    Blank,
    Message(&'a str),
}

impl<'a> Input<'a> {
    fn parse(line: &'a str) -> Self {
        match line.trim() {
            "" => Input::Blank,
            CLEAR_COMMAND => Input::Clear,
            EXIT_COMMAND => Input::Exit,
            _ => Input::Message(line),
        }
    }
}

enum LinkReader {
    Tcp(OwnedReadHalf),
    Udp(Arc<UdpSocket>),
}

enum LinkWriter {
    Tcp(OwnedWriteHalf),
    Udp(Arc<UdpSocket>),
}

impl LinkReader {
    async fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match self {
            LinkReader::Tcp(read) => read.read(buf).await,
            LinkReader::Udp(socket) => socket.recv(buf).await,
        }
    }
}

impl LinkWriter {
    async fn send_line(&mut self, line: &str) -> std::io::Result<()> {
        let bytes = format!("{line}\n");
        match self {
            LinkWriter::Tcp(write) => write.write_all(bytes.as_bytes()).await,
            LinkWriter::Udp(socket) => socket.send(bytes.as_bytes()).await.map(|_| ()),
        }
    }
}

async fn connect(protocol: Protocol, addr: &str) -> Result<(LinkReader, LinkWriter)> {
    match protocol {
        Protocol::Tcp => {
            let stream = TcpStream::connect(addr)
                .await
                .with_context(|| format!("Failed to connect to {addr}"))?;
            let (read, write) = stream.into_split();
            Ok((LinkReader::Tcp(read), LinkWriter::Tcp(write)))
        }
        Protocol::Udp => {
            let server: SocketAddr = lookup_host(addr)
                .await
                .with_context(|| format!("Failed to resolve {addr}"))?
                .next()
                .with_context(|| format!("No address found for {addr}"))?;
            let local = if server.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };
            let socket = UdpSocket::bind(local).await.context("Failed to bind UDP socket")?;
            socket
                .connect(server)
                .await
                .with_context(|| format!("Failed to connect to {addr}"))?;
            // The server only learns about us from our first datagram.
            socket.send(&[]).await.context("Failed to reach server")?;
            let socket = Arc::new(socket);
            Ok((LinkReader::Udp(socket.clone()), LinkWriter::Udp(socket)))
        }
    }
}

/// Blocking stdin reader on its own thread; the runtime never waits on it.
fn spawn_stdin_reader() -> mpsc::UnboundedReceiver<std::io::Result<String>> {
    let (tx, rx) = mpsc::unbounded_channel();
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            if tx.send(line).is_err() {
                break;
            }
        }
    });
    rx
}

/// Relay stdin to the server and the server to stdout until either side ends.
pub async fn run(config: ClientFileConfig) -> Result<()> {
    let addr = config.server_addr();
    let (mut reader, mut writer) = connect(config.protocol, &addr).await?;
    info!(protocol = %config.protocol, addr = %addr, "Connected");

    let mut input = spawn_stdin_reader();
    let mut stdout = tokio::io::stdout();
    let mut buf = [0u8; READ_BUFFER_SIZE];

    loop {
        tokio::select! {
            read = reader.read(&mut buf) => {
                let n = read.context("Lost connection to server")?;
                if n == 0 {
                    info!("Server closed the connection");
                    return Ok(());
                }
                stdout.write_all(&buf[..n]).await?;
                stdout.flush().await?;
            }
            line = input.recv() => {
                let line = match line {
                    Some(line) => line.context("Failed to read stdin")?,
                    // End of input counts as leaving.
                    None => EXIT_COMMAND.to_string(),
                };
                match Input::parse(&line) {
                    Input::Blank => {}
                    Input::Clear => {
                        stdout.write_all(CLEAR_SCREEN.as_bytes()).await?;
                        stdout.flush().await?;
                    }
                    Input::Exit => {
                        writer.send_line(EXIT_COMMAND).await.context("Failed to send")?;
                        debug!("Left the chat");
                        return Ok(());
                    }
                    Input::Message(text) => {
                        writer.send_line(text).await.context("Failed to send")?;
                    }
                }
            }
        }
    }
}
