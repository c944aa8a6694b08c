use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::info;

use crate::acceptor::Acceptor;
use crate::broadcast::{BroadcastQueue, BroadcastReceiver, Broadcaster};
use crate::config::ServerConfig;
use crate::error::Result;
use crate::listener::Listener;
use crate::registry::Registry;
use crate::shutdown::ShutdownCoordinator;

/// Shared state handed to every task of a running server.
pub struct ServerContext {
    config: ServerConfig,
    registry: Registry,
    broadcast: BroadcastQueue,
    /// Connection workers and rejection tasks
    tasks: TaskTracker,
    /// Cancelled once the final broadcast has gone out
    disconnect: CancellationToken,
}

impl ServerContext {
    /// Create the context along with the consuming end of its broadcast bus.
    pub fn new(config: ServerConfig) -> (Arc<Self>, BroadcastReceiver) {
        let (broadcast, messages) = BroadcastQueue::channel();
        let ctx = Arc::new(Self {
            config,
            registry: Registry::new(),
            broadcast,
            tasks: TaskTracker::new(),
            disconnect: CancellationToken::new(),
        });
        (ctx, messages)
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn broadcast(&self) -> &BroadcastQueue {
        &self.broadcast
    }

    pub(crate) fn tasks(&self) -> &TaskTracker {
        &self.tasks
    }

    pub fn disconnect_token(&self) -> &CancellationToken {
        &self.disconnect
    }
}

/// A bound, not yet running chat server.
pub struct ChatServer {
    ctx: Arc<ServerContext>,
    listener: Listener,
    messages: BroadcastReceiver,
}

impl ChatServer {
    /// Bind the listener for `config.protocol` on `config.bind_addr()`.
    pub async fn bind(config: ServerConfig) -> Result<Self> {
        let listener = Listener::bind(config.protocol, &config.bind_addr()).await?;
        let (ctx, messages) = ServerContext::new(config);
        Ok(Self {
            ctx,
            listener,
            messages,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn context(&self) -> &Arc<ServerContext> {
        &self.ctx
    }

    /// Serve clients until `shutdown` resolves, then tear everything down.
    ///
    /// Returns once every task the server started has finished or the
    /// shutdown grace period has run out.
    pub async fn run<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let Self {
            ctx,
            listener,
            messages,
        } = self;

        info!(
            protocol = %listener.protocol(),
            addr = %listener.local_addr()?,
            max_users = ctx.config().max_users,
            "Chat server listening"
        );

        let broadcaster = tokio::spawn(Broadcaster::new(ctx.clone(), messages).run());
        let stop_accepting = CancellationToken::new();
        let acceptor = tokio::spawn(
            Acceptor::new(ctx.clone(), listener, stop_accepting.clone()).run(),
        );

        shutdown.await;

        ShutdownCoordinator {
            ctx,
            broadcaster,
            acceptor,
            stop_accepting,
        }
        .run()
        .await;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Protocol;
    use std::time::Duration;
    use tokio::sync::oneshot;
    use tokio::time::timeout;

    fn local_config() -> ServerConfig {
        ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            protocol: Protocol::Tcp,
            shutdown_grace: Duration::from_millis(200),
            ..Default::default()
        }
    }

    fn assert_spawnable<F: Future + Send + 'static>(_: &F) {}

    #[tokio::test]
    async fn run_can_be_spawned_and_stopped() {
        let server = ChatServer::bind(local_config()).await.unwrap();
        assert_ne!(server.local_addr().unwrap().port(), 0);

        let (stop, stopped) = oneshot::channel::<()>();
        let running = server.run(async {
            let _ = stopped.await;
        });
        assert_spawnable(&running);

        let handle = tokio::spawn(running);
        stop.send(()).unwrap();
        timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }
}
