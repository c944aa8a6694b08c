use std::collections::VecDeque;
use std::io;
use std::sync::Arc;
use tokio::sync::OwnedSemaphorePermit;
use tracing::{debug, info, warn};

use crate::connection::Connection;
use crate::error::is_disconnect;
use crate::protocol::{self, EXIT_COMMAND, NameError, READ_BUFFER_SIZE, split_lines, validate_name};
use crate::server::ServerContext;

/// How a worker's session ended.
#[derive(Debug)]
enum Exit {
    /// Client sent `.exit`
    Left,
    /// Peer closed the stream
    Disconnected,
    ReadFailed(io::Error),
    WriteFailed(io::Error),
    /// Server is shutting down
    Shutdown,
}

/// Per-client task: naming handshake, then the read loop.
///
/// `AwaitingName → Named → Active → Closed`. The worker owns its connection
/// and closes it exactly once, whichever way the session ends.
pub(crate) struct ConnectionWorker {
    ctx: Arc<ServerContext>,
    conn: Connection,
    admission: OwnedSemaphorePermit,
    /// Set while this worker holds a registry entry
    name: Option<String>,
    pending: VecDeque<String>,
}

impl ConnectionWorker {
    pub(crate) fn new(
        ctx: Arc<ServerContext>,
        conn: Connection,
        admission: OwnedSemaphorePermit,
    ) -> Self {
        Self {
            ctx,
            conn,
            admission,
            name: None,
            pending: VecDeque::new(),
        }
    }

    pub(crate) async fn run(mut self) {
        let peer = self.conn.peer_addr();
        let disconnect = self.ctx.disconnect_token().clone();

        let exit = tokio::select! {
            exit = self.serve() => exit,
            _ = disconnect.cancelled() => Exit::Shutdown,
        };

        match &exit {
            Exit::ReadFailed(e) | Exit::WriteFailed(e) if !is_disconnect(e) => {
                warn!(peer = %peer, "Connection error: {}", e)
            }
            _ => debug!(peer = %peer, ?exit, "Session ended"),
        }

        // Still registered means the session ended without `.exit`.
        if let Some(name) = self.name.take() {
            self.ctx.registry().unregister(&name).await;
            if !matches!(exit, Exit::Shutdown) {
                let _ = self.ctx.broadcast().send(protocol::left(&name)).await;
            }
            info!(peer = %peer, name = %name, "User disconnected");
        }

        let Self {
            conn, admission, ..
        } = self;
        drop(admission);
        conn.close().await;
    }

    async fn serve(&mut self) -> Exit {
        let name = match self.handshake().await {
            Ok(name) => name,
            Err(exit) => return exit,
        };

        info!(peer = %self.conn.peer_addr(), name = %name, "User joined the chat");
        if let Err(exit) = self.enqueue(protocol::joined(&name)).await {
            return exit;
        }

        loop {
            let line = match self.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) => return Exit::Disconnected,
                Err(e) => return Exit::ReadFailed(e),
            };
            if line.is_empty() {
                continue;
            }

            if line == EXIT_COMMAND {
                if let Err(exit) = self.enqueue(protocol::left(&name)).await {
                    return exit;
                }
                self.ctx.registry().unregister(&name).await;
                self.name = None;
                info!(peer = %self.conn.peer_addr(), name = %name, "User left the chat");
                return Exit::Left;
            }

            if let Err(exit) = self.enqueue(protocol::chat_line(&name, &line)).await {
                return exit;
            }
        }
    }

    /// Prompt until the client picks a valid, free name, then register it.
    async fn handshake(&mut self) -> Result<String, Exit> {
        loop {
            self.reply(&protocol::name_prompt()).await?;

            let raw = match self.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) => return Err(Exit::Disconnected),
                Err(e) => return Err(Exit::ReadFailed(e)),
            };
            // Leaving before picking a name is not a name.
            if raw == EXIT_COMMAND {
                return Err(Exit::Left);
            }

            let rejection = match validate_name(&raw) {
                Ok(name) => {
                    // Registration is the uniqueness check; no separate lookup.
                    if self.ctx.registry().register(name, self.conn.writer()).await {
                        self.name = Some(name.to_string());
                        return Ok(name.to_string());
                    }
                    NameError::Taken
                }
                Err(e) => e,
            };

            debug!(peer = %self.conn.peer_addr(), "Name refused: {}", rejection);
            self.reply(&protocol::name_rejected(&rejection)).await?;
        }
    }

    /// Next trimmed line from the client; `None` once the peer is gone.
    async fn next_line(&mut self) -> io::Result<Option<String>> {
        let mut buf = [0u8; READ_BUFFER_SIZE];
        loop {
            if let Some(line) = self.pending.pop_front() {
                return Ok(Some(line));
            }
            let n = self.conn.read(&mut buf).await?;
            if n == 0 {
                return Ok(None);
            }
            self.pending.extend(split_lines(&buf[..n]));
        }
    }

    /// Write to this client only (never broadcast).
    async fn reply(&self, text: &str) -> Result<(), Exit> {
        self.conn.write_line(text).await.map_err(Exit::WriteFailed)
    }

    async fn enqueue(&self, message: String) -> Result<(), Exit> {
        if self.ctx.broadcast().send(message).await.is_ok() {
            return Ok(());
        }
        // The bus only closes during shutdown. Stay connected so the final
        // notice can still reach this client, and unwind once told to.
        self.ctx.disconnect_token().cancelled().await;
        Err(Exit::Shutdown)
    }
}
