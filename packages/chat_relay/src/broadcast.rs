use futures::future::join_all;
use std::io;
use std::sync::Arc;
use tokio::sync::{RwLock, mpsc};
use tracing::{debug, info, warn};

use crate::error::{ChatError, Result, is_disconnect};
use crate::server::ServerContext;

/// Producer side of the broadcast bus.
///
/// Unbounded: producers never wait on slow recipients, and memory grows
/// instead. The queue owns the only sender, so [`close`](Self::close) really
/// ends the stream for the consumer, and every send is checked.
pub struct BroadcastQueue {
    tx: RwLock<Option<mpsc::UnboundedSender<String>>>,
}

pub type BroadcastReceiver = mpsc::UnboundedReceiver<String>;

impl BroadcastQueue {
    pub fn channel() -> (Self, BroadcastReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                tx: RwLock::new(Some(tx)),
            },
            rx,
        )
    }

    /// Enqueue one already-formatted line.
    pub async fn send(&self, message: impl Into<String>) -> Result<()> {
        match self.tx.read().await.as_ref() {
            Some(tx) => tx
                .send(message.into())
                .map_err(|_| ChatError::ChannelClosed),
            None => Err(ChatError::ChannelClosed),
        }
    }

    /// Close the bus. Returns `false` if it was already closed.
    pub async fn close(&self) -> bool {
        self.tx.write().await.take().is_some()
    }

    pub async fn is_closed(&self) -> bool {
        self.tx.read().await.is_none()
    }
}

/// Sole consumer of the broadcast bus.
pub struct Broadcaster {
    ctx: Arc<ServerContext>,
    messages: BroadcastReceiver,
}

impl Broadcaster {
    pub fn new(ctx: Arc<ServerContext>, messages: BroadcastReceiver) -> Self {
        Self { ctx, messages }
    }

    /// Fan every message out to everyone registered when it is dequeued.
    ///
    /// Runs until the bus is closed and drained; returns how many messages were
    /// processed. A failed write to one recipient is logged and skipped.
    pub async fn run(mut self) -> usize {
        let mut processed = 0;

        while let Some(message) = self.messages.recv().await {
            let recipients = self.ctx.registry().snapshot().await;
            debug!(recipients = recipients.len(), "Broadcasting: {}", message);

            let message = &message;
            let limit = self.ctx.config().write_timeout;
            let writes = recipients.iter().map(|(name, conn)| async move {
                (name, conn.write_line_within(message, limit).await)
            });
            for (name, result) in join_all(writes).await {
                match result {
                    Ok(()) => {}
                    Err(e) if is_disconnect(&e) => {
                        debug!(name = %name, "Recipient gone while broadcasting: {}", e)
                    }
                    Err(e) if e.kind() == io::ErrorKind::TimedOut => {
                        warn!(name = %name, "Recipient too slow, cut off: {}", e)
                    }
                    Err(e) => warn!(name = %name, "Failed to deliver message: {}", e),
                }
            }
            processed += 1;
        }

        info!(processed, "Broadcast channel closed, broadcaster stopped");
        processed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use crate::test_helpers::tcp_pair;
    use std::time::Duration;
    use tokio::io::{AsyncBufReadExt, BufReader};
    use tokio::time::timeout;

    const STEP: Duration = Duration::from_secs(5);

    #[tokio::test]
    async fn send_after_close_is_rejected() {
        let (queue, mut rx) = BroadcastQueue::channel();
        queue.send("first").await.unwrap();

        assert!(queue.close().await);
        assert!(!queue.close().await);
        assert!(queue.is_closed().await);
        assert!(matches!(
            queue.send("late").await,
            Err(ChatError::ChannelClosed)
        ));

        // Queued messages survive the close; then the stream ends.
        assert_eq!(rx.recv().await.as_deref(), Some("first"));
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test]
    async fn broadcaster_delivers_in_order_and_stops_when_drained() {
        let (ctx, rx) = ServerContext::new(ServerConfig::default());
        let (alice, alice_client) = tcp_pair().await;
        let (bob, bob_client) = tcp_pair().await;
        ctx.registry().register("alice", alice.writer()).await;
        ctx.registry().register("bob", bob.writer()).await;

        for i in 0..3 {
            ctx.broadcast().send(format!("msg {i}")).await.unwrap();
        }
        ctx.broadcast().close().await;

        let processed = timeout(STEP, Broadcaster::new(ctx.clone(), rx).run())
            .await
            .unwrap();
        assert_eq!(processed, 3);

        for client in [alice_client, bob_client] {
            let mut lines = BufReader::new(client).lines();
            for i in 0..3 {
                let line = timeout(STEP, lines.next_line()).await.unwrap().unwrap();
                assert_eq!(line, Some(format!("msg {i}")));
            }
        }
    }

    #[tokio::test]
    async fn failed_recipient_does_not_block_others() {
        let (ctx, rx) = ServerContext::new(ServerConfig::default());
        let (good, good_client) = tcp_pair().await;
        let (broken, _broken_client) = tcp_pair().await;

        ctx.registry().register("good", good.writer()).await;
        ctx.registry().register("broken", broken.writer()).await;
        // Registry still holds a handle, but the socket is shut down.
        broken.close().await;

        ctx.broadcast().send("one").await.unwrap();
        ctx.broadcast().send("two").await.unwrap();
        ctx.broadcast().close().await;
        timeout(STEP, Broadcaster::new(ctx.clone(), rx).run())
            .await
            .unwrap();

        let mut lines = BufReader::new(good_client).lines();
        for expected in ["one", "two"] {
            let line = timeout(STEP, lines.next_line()).await.unwrap().unwrap();
            assert_eq!(line.as_deref(), Some(expected));
        }
    }

    #[tokio::test]
    async fn recipient_that_stops_reading_does_not_stall_others() {
        const MESSAGES: usize = 5_000;

        let config = ServerConfig {
            write_timeout: Duration::from_millis(200),
            ..Default::default()
        };
        let (ctx, rx) = ServerContext::new(config);
        let (fast, fast_client) = tcp_pair().await;
        let (slow, _slow_client_never_reads) = tcp_pair().await;
        ctx.registry().register("fast", fast.writer()).await;
        ctx.registry().register("slow", slow.writer()).await;

        let reader = tokio::spawn(async move {
            let mut lines = BufReader::new(fast_client).lines();
            let mut received = 0;
            while received < MESSAGES {
                match lines.next_line().await.unwrap() {
                    Some(_) => received += 1,
                    None => break,
                }
            }
            received
        });

        // Far more than the socket buffers of a peer that never reads.
        let line = "x".repeat(4096);
        for _ in 0..MESSAGES {
            ctx.broadcast().send(line.clone()).await.unwrap();
        }
        ctx.broadcast().close().await;

        let processed = timeout(Duration::from_secs(30), Broadcaster::new(ctx.clone(), rx).run())
            .await
            .expect("broadcaster stalled on a slow recipient");
        assert_eq!(processed, MESSAGES);
        assert_eq!(timeout(STEP, reader).await.unwrap().unwrap(), MESSAGES);
    }

    #[tokio::test]
    async fn unregistered_connection_misses_later_messages() {
        let (ctx, rx) = ServerContext::new(ServerConfig::default());
        let (stay, stay_client) = tcp_pair().await;
        let (leave, leave_client) = tcp_pair().await;
        ctx.registry().register("stay", stay.writer()).await;
        ctx.registry().register("leave", leave.writer()).await;

        let broadcaster = tokio::spawn(Broadcaster::new(ctx.clone(), rx).run());

        ctx.broadcast().send("before").await.unwrap();
        let mut stay_lines = BufReader::new(stay_client).lines();
        let mut leave_lines = BufReader::new(leave_client).lines();
        assert_eq!(
            timeout(STEP, stay_lines.next_line()).await.unwrap().unwrap().as_deref(),
            Some("before")
        );
        assert_eq!(
            timeout(STEP, leave_lines.next_line()).await.unwrap().unwrap().as_deref(),
            Some("before")
        );

        ctx.registry().unregister("leave").await;
        ctx.broadcast().send("after").await.unwrap();
        assert_eq!(
            timeout(STEP, stay_lines.next_line()).await.unwrap().unwrap().as_deref(),
            Some("after")
        );

        ctx.broadcast().close().await;
        timeout(STEP, broadcaster).await.unwrap().unwrap();

        // Nothing else was written to the departed connection.
        leave.close().await;
        assert_eq!(
            timeout(STEP, leave_lines.next_line()).await.unwrap().unwrap(),
            None
        );
    }
}
