use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::connection::Connection;
use crate::error::ChatError;
use crate::listener::Listener;
use crate::protocol;
use crate::server::ServerContext;
use crate::worker::ConnectionWorker;

/// Accept loop with capacity-based admission.
///
/// Each admitted connection holds one permit for as long as its worker runs,
/// so the count covers clients still in the naming handshake too.
pub(crate) struct Acceptor {
    ctx: Arc<ServerContext>,
    listener: Listener,
    admissions: Arc<Semaphore>,
    stop: CancellationToken,
}

impl Acceptor {
    pub(crate) fn new(ctx: Arc<ServerContext>, listener: Listener, stop: CancellationToken) -> Self {
        let admissions = Arc::new(Semaphore::new(ctx.config().max_users));
        Self {
            ctx,
            listener,
            admissions,
            stop,
        }
    }

    /// Runs until `stop` is cancelled or accepting fails. The listener is
    /// closed when this returns.
    pub(crate) async fn run(mut self) {
        loop {
            let conn = tokio::select! {
                _ = self.stop.cancelled() => {
                    info!("Listener closed");
                    break;
                }
                accepted = self.listener.accept() => match accepted {
                    Ok(conn) => conn,
                    Err(e) => {
                        error!("{}; no new clients will be admitted", ChatError::Accept(e));
                        break;
                    }
                },
            };
            self.admit(conn);
        }
    }

    fn admit(&self, conn: Connection) {
        let peer = conn.peer_addr();

        if self.ctx.disconnect_token().is_cancelled() {
            debug!(peer = %peer, "Dropping connection accepted during shutdown");
            self.ctx.tasks().spawn(conn.close());
            return;
        }

        match self.admissions.clone().try_acquire_owned() {
            Ok(permit) => {
                info!(peer = %peer, "Client connected");
                let worker = ConnectionWorker::new(self.ctx.clone(), conn, permit);
                self.ctx.tasks().spawn(worker.run());
            }
            Err(_) => {
                warn!(
                    peer = %peer,
                    max_users = self.ctx.config().max_users,
                    "Chat is full, rejecting client"
                );
                self.ctx.tasks().spawn(reject(self.ctx.clone(), conn));
            }
        }
    }
}

/// Tell an over-capacity client why, keep it open for the grace period, close.
async fn reject(ctx: Arc<ServerContext>, conn: Connection) {
    let config = ctx.config();
    let notice = protocol::chat_full(config.max_users, config.reject_grace);
    if let Err(e) = conn.write_line(&notice).await {
        debug!(peer = %conn.peer_addr(), "Failed to send rejection: {}", e);
    }

    tokio::select! {
        _ = tokio::time::sleep(config.reject_grace) => {}
        _ = ctx.disconnect_token().cancelled() => {}
    }
    conn.close().await;
}
