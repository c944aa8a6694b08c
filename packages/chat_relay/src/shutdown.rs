use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::protocol;
use crate::server::ServerContext;

/// Ordered teardown once the interrupt arrives:
///
/// 1. enqueue the shutdown notice
/// 2. close the broadcast bus
/// 3. let the broadcaster drain, then disconnect every worker and wait for
///    them to unwind (each wait bounded by the shutdown grace period)
/// 4. close the listener and wait for the acceptor to exit
pub(crate) struct ShutdownCoordinator {
    pub(crate) ctx: Arc<ServerContext>,
    pub(crate) broadcaster: JoinHandle<usize>,
    pub(crate) acceptor: JoinHandle<()>,
    pub(crate) stop_accepting: CancellationToken,
}

impl ShutdownCoordinator {
    pub(crate) async fn run(self) {
        let Self {
            ctx,
            mut broadcaster,
            acceptor,
            stop_accepting,
        } = self;
        let grace = ctx.config().shutdown_grace;

        let users = ctx.registry().names().await;
        info!(?users, "Shutting down chat server...");

        if let Err(e) = ctx.broadcast().send(protocol::shutting_down(grace)).await {
            warn!("Could not enqueue shutdown notice: {}", e);
        }
        ctx.broadcast().close().await;

        match timeout(grace, &mut broadcaster).await {
            Ok(Ok(processed)) => debug!(processed, "Broadcast queue drained"),
            Ok(Err(e)) => error!("Broadcaster task failed: {}", e),
            Err(_) => {
                warn!(?grace, "Broadcast queue not drained within grace period");
                broadcaster.abort();
            }
        }

        ctx.disconnect_token().cancel();
        ctx.tasks().close();
        if timeout(grace, ctx.tasks().wait()).await.is_err() {
            warn!(
                remaining = ctx.tasks().len(),
                "Connection workers still running after grace period"
            );
        }

        stop_accepting.cancel();
        if let Err(e) = acceptor.await {
            error!("Acceptor task failed: {}", e);
        }

        info!("Chat server stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use std::time::Duration;
    use tokio::sync::oneshot;

    const STEP: Duration = Duration::from_secs(5);

    fn short_grace() -> ServerConfig {
        ServerConfig {
            shutdown_grace: Duration::from_millis(100),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn stuck_broadcaster_is_aborted_after_grace() {
        let (ctx, _bus) = ServerContext::new(short_grace());
        let (alive, stopped) = oneshot::channel::<()>();
        // Never drains; the sender drops only when the task is torn down.
        let broadcaster = tokio::spawn(async move {
            let _alive = alive;
            std::future::pending::<usize>().await
        });
        let stop_accepting = CancellationToken::new();
        let acceptor = tokio::spawn({
            let stop = stop_accepting.clone();
            async move { stop.cancelled().await }
        });

        timeout(
            STEP,
            ShutdownCoordinator {
                ctx: ctx.clone(),
                broadcaster,
                acceptor,
                stop_accepting,
            }
            .run(),
        )
        .await
        .unwrap();

        assert!(timeout(STEP, stopped).await.unwrap().is_err());
        assert!(ctx.disconnect_token().is_cancelled());
        assert!(ctx.broadcast().is_closed().await);
    }

    #[tokio::test]
    async fn notice_is_enqueued_before_the_bus_closes() {
        let (ctx, mut bus) = ServerContext::new(short_grace());
        let broadcaster = tokio::spawn(async { 0usize });
        let stop_accepting = CancellationToken::new();
        let acceptor = tokio::spawn(async {});

        ShutdownCoordinator {
            ctx: ctx.clone(),
            broadcaster,
            acceptor,
            stop_accepting: stop_accepting.clone(),
        }
        .run()
        .await;

        assert_eq!(
            bus.recv().await,
            Some(protocol::shutting_down(Duration::from_millis(100)))
        );
        assert_eq!(bus.recv().await, None);
        assert!(stop_accepting.is_cancelled());
    }
}
