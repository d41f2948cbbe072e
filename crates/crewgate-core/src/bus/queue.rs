//! The inbound/outbound message bus connecting channels and the brokers.
//!
//! Channels publish to `inbound`; the broker manager consumes and fans out
//! to per-room queues; the agent loop's replies land on `outbound`, which
//! the channel side drains.

use super::envelope::MessageEnvelope;
use tokio::sync::mpsc;

/// Bounded inbound and outbound queues of envelopes.
pub struct Bus {
    inbound_tx: mpsc::Sender<MessageEnvelope>,
    inbound_rx: tokio::sync::Mutex<mpsc::Receiver<MessageEnvelope>>,
    outbound_tx: mpsc::Sender<MessageEnvelope>,
    outbound_rx: tokio::sync::Mutex<mpsc::Receiver<MessageEnvelope>>,
}

impl Bus {
    pub fn new(buffer_size: usize) -> Self {
        let (inbound_tx, inbound_rx) = mpsc::channel(buffer_size);
        let (outbound_tx, outbound_rx) = mpsc::channel(buffer_size);

        Bus {
            inbound_tx,
            inbound_rx: tokio::sync::Mutex::new(inbound_rx),
            outbound_tx,
            outbound_rx: tokio::sync::Mutex::new(outbound_rx),
        }
    }

    pub async fn publish_inbound(
        &self,
        env: MessageEnvelope,
    ) -> Result<(), mpsc::error::SendError<MessageEnvelope>> {
        self.inbound_tx.send(env).await
    }

    /// Dequeue the next inbound envelope. Returns `None` once all senders
    /// are dropped.
    pub async fn consume_inbound(&self) -> Option<MessageEnvelope> {
        let mut rx = self.inbound_rx.lock().await;
        rx.recv().await
    }

    pub async fn publish_outbound(
        &self,
        env: MessageEnvelope,
    ) -> Result<(), mpsc::error::SendError<MessageEnvelope>> {
        self.outbound_tx.send(env).await
    }

    pub async fn consume_outbound(&self) -> Option<MessageEnvelope> {
        let mut rx = self.outbound_rx.lock().await;
        rx.recv().await
    }

    /// Try to dequeue an outbound envelope without waiting. Used when
    /// draining on shutdown.
    pub fn try_consume_outbound(&self) -> Option<MessageEnvelope> {
        self.outbound_rx.try_lock().ok()?.try_recv().ok()
    }

    /// Cloneable sender for channel adapters.
    pub fn inbound_sender(&self) -> mpsc::Sender<MessageEnvelope> {
        self.inbound_tx.clone()
    }

    /// Cloneable sender for the agent side.
    pub fn outbound_sender(&self) -> mpsc::Sender<MessageEnvelope> {
        self.outbound_tx.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_inbound_flow() {
        let bus = Bus::new(8);
        bus.publish_inbound(MessageEnvelope::inbound("telegram", "u1", "c1", "Hello!"))
            .await
            .unwrap();
        let got = bus.consume_inbound().await.unwrap();
        assert_eq!(got.channel, "telegram");
        assert_eq!(got.content, "Hello!");
    }

    #[tokio::test]
    async fn test_outbound_flow() {
        let bus = Bus::new(8);
        bus.publish_outbound(MessageEnvelope::outbound("discord", "c42", "general", "reply"))
            .await
            .unwrap();
        let got = bus.consume_outbound().await.unwrap();
        assert_eq!(got.chat_id, "c42");
        assert_eq!(got.content, "reply");
    }

    #[tokio::test]
    async fn test_fifo_ordering() {
        let bus = Bus::new(8);
        for i in 1..=3 {
            bus.publish_inbound(MessageEnvelope::inbound("cli", "u", "d", format!("m{i}")))
                .await
                .unwrap();
        }
        assert_eq!(bus.consume_inbound().await.unwrap().content, "m1");
        assert_eq!(bus.consume_inbound().await.unwrap().content, "m2");
        assert_eq!(bus.consume_inbound().await.unwrap().content, "m3");
    }

    #[tokio::test]
    async fn test_concurrent_publishers() {
        let bus = Arc::new(Bus::new(8));
        let b1 = bus.clone();
        let b2 = bus.clone();
        let h1 = tokio::spawn(async move {
            b1.publish_inbound(MessageEnvelope::inbound("telegram", "u1", "c1", "a"))
                .await
                .unwrap();
        });
        let h2 = tokio::spawn(async move {
            b2.publish_inbound(MessageEnvelope::inbound("slack", "u2", "c2", "b"))
                .await
                .unwrap();
        });
        h1.await.unwrap();
        h2.await.unwrap();

        let r1 = bus.consume_inbound().await.unwrap();
        let r2 = bus.consume_inbound().await.unwrap();
        let channels = [r1.channel.as_str(), r2.channel.as_str()];
        assert!(channels.contains(&"telegram"));
        assert!(channels.contains(&"slack"));
    }

    #[tokio::test]
    async fn test_try_consume_outbound_empty() {
        let bus = Bus::new(4);
        assert!(bus.try_consume_outbound().is_none());
        bus.publish_outbound(MessageEnvelope::outbound("cli", "d", "general", "x"))
            .await
            .unwrap();
        assert!(bus.try_consume_outbound().is_some());
    }
}
