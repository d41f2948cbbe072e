//! Per-room brokers — one serialized consumer per room.
//!
//! The manager drains the bus, normalizes each envelope's room id, and hands
//! it to that room's broker. Each broker owns a FIFO queue and a single
//! worker, so processing within a room is strictly serial while rooms run
//! concurrently. This is what lets rooms, sessions, and per-room memory be
//! written without locks.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::envelope::MessageEnvelope;
use super::queue::Bus;
use crate::rooms::manager::RoomManager;

/// Per-call queue depth of a single room's broker.
const ROOM_QUEUE_DEPTH: usize = 64;

/// Processes one envelope for a room, returning the reply to publish.
///
/// The agent loop implements this. Errors are reported to the origin chat as
/// a short error sentence by the broker.
#[async_trait]
pub trait RoomProcessor: Send + Sync {
    async fn process(&self, env: MessageEnvelope) -> anyhow::Result<Option<MessageEnvelope>>;
}

/// Cooperative cancellation flag for a room.
///
/// `/stop` raises it; the invoker and multi-bot fan-out consult it. The
/// current LLM call is never force-killed — the flag only prevents further
/// work from starting and pending announcements from publishing.
#[derive(Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Re-arm the room for new work after a `/stop` has been reported.
    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Handle to one room's serialized queue.
pub struct RoomBroker {
    tx: mpsc::Sender<MessageEnvelope>,
    worker: JoinHandle<()>,
    cancel: CancelFlag,
}

impl RoomBroker {
    fn spawn(
        room_id: String,
        processor: Arc<dyn RoomProcessor>,
        bus: Arc<Bus>,
    ) -> Self {
        let (tx, mut rx) = mpsc::channel::<MessageEnvelope>(ROOM_QUEUE_DEPTH);
        let cancel = CancelFlag::default();

        let worker = tokio::spawn(async move {
            // Strictly serial: the reply for envelope k is published before
            // envelope k+1 is dequeued.
            while let Some(env) = rx.recv().await {
                let origin_channel = env.channel.clone();
                let origin_chat = env.chat_id.clone();
                match processor.process(env).await {
                    Ok(Some(reply)) => {
                        if let Err(e) = bus.publish_outbound(reply).await {
                            error!(room_id = %room_id, error = %e, "failed to publish reply");
                        }
                    }
                    Ok(None) => {
                        debug!(room_id = %room_id, "processor produced no reply");
                    }
                    Err(e) => {
                        error!(room_id = %room_id, error = %e, "message processing error");
                        let err_env = MessageEnvelope::outbound(
                            &origin_channel,
                            &origin_chat,
                            &room_id,
                            format!("I ran into an error handling that: {e}"),
                        );
                        let _ = bus.publish_outbound(err_env).await;
                    }
                }
            }
            info!(room_id = %room_id, "room broker drained and stopped");
        });

        RoomBroker { tx, worker, cancel }
    }
}

/// Creates and owns at most one broker per room id.
pub struct RoomBrokerManager {
    processor: Arc<dyn RoomProcessor>,
    rooms: Arc<RoomManager>,
    bus: Arc<Bus>,
    brokers: Mutex<HashMap<String, RoomBroker>>,
    accepting: AtomicBool,
}

impl RoomBrokerManager {
    pub fn new(processor: Arc<dyn RoomProcessor>, rooms: Arc<RoomManager>, bus: Arc<Bus>) -> Self {
        Self {
            processor,
            rooms,
            bus,
            brokers: Mutex::new(HashMap::new()),
            accepting: AtomicBool::new(true),
        }
    }

    /// Drain the bus until the inbound side closes or `shutdown` is called.
    pub async fn run(self: &Arc<Self>) {
        info!("room broker manager started");
        while self.accepting.load(Ordering::SeqCst) {
            match self.bus.consume_inbound().await {
                Some(env) => {
                    if let Err(e) = self.ingest(env).await {
                        warn!(error = %e, "failed to ingest envelope");
                    }
                }
                None => break,
            }
        }
        info!("room broker manager intake closed");
    }

    /// Normalize the room id and enqueue onto that room's broker.
    ///
    /// Invariant: every envelope past this point has a non-empty `room_id`.
    pub async fn ingest(&self, mut env: MessageEnvelope) -> anyhow::Result<()> {
        if env.room_id.is_empty() {
            env.room_id = self.resolve_room(&env);
        }

        let room_id = env.room_id.clone();
        let tx = {
            let mut brokers = self.brokers.lock().await;
            let broker = brokers.entry(room_id.clone()).or_insert_with(|| {
                debug!(room_id = %room_id, "creating room broker");
                RoomBroker::spawn(room_id.clone(), self.processor.clone(), self.bus.clone())
            });
            broker.tx.clone()
        };

        // Send outside the lock so a full room queue only backpressures
        // that room's producers.
        tx.send(env)
            .await
            .map_err(|_| anyhow::anyhow!("room broker for '{room_id}' is gone"))
    }

    fn resolve_room(&self, env: &MessageEnvelope) -> String {
        // System announcements carry their origin conversation in chat_id;
        // re-resolve it so an announcement for a since-unmapped chat lands
        // in general rather than a dead room.
        if env.is_system() {
            if let Some((channel, chat_id)) = env.origin() {
                return self.rooms.auto_join_to_general(channel, chat_id);
            }
        }
        self.rooms.auto_join_to_general(&env.channel, &env.chat_id)
    }

    /// The cancellation flag for a room, creating its broker if needed.
    pub async fn cancel_flag(&self, room_id: &str) -> CancelFlag {
        let mut brokers = self.brokers.lock().await;
        let broker = brokers.entry(room_id.to_string()).or_insert_with(|| {
            RoomBroker::spawn(room_id.to_string(), self.processor.clone(), self.bus.clone())
        });
        broker.cancel.clone()
    }

    /// Raise the cancellation flag for a room. Returns false when the room
    /// has no broker yet.
    pub async fn cancel_room(&self, room_id: &str) -> bool {
        let brokers = self.brokers.lock().await;
        match brokers.get(room_id) {
            Some(b) => {
                b.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Stop accepting new work, let in-flight messages complete, and wait
    /// for every room worker to drain.
    pub async fn shutdown(&self) {
        self.accepting.store(false, Ordering::SeqCst);
        let mut brokers = self.brokers.lock().await;
        let drained: Vec<(String, RoomBroker)> = brokers.drain().collect();
        drop(brokers);

        for (room_id, broker) in drained {
            drop(broker.tx); // close the queue; worker exits after draining
            if let Err(e) = broker.worker.await {
                warn!(room_id = %room_id, error = %e, "room worker did not stop cleanly");
            }
        }
        info!("all room brokers stopped");
    }

    pub async fn active_rooms(&self) -> Vec<String> {
        let brokers = self.brokers.lock().await;
        let mut ids: Vec<String> = brokers.keys().cloned().collect();
        ids.sort();
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    /// Echoes content back, tracking concurrent entries to prove per-room
    /// serialization.
    struct EchoProcessor {
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
        delay_ms: u64,
    }

    impl EchoProcessor {
        fn new(delay_ms: u64) -> Self {
            Self {
                in_flight: AtomicUsize::new(0),
                max_in_flight: AtomicUsize::new(0),
                delay_ms,
            }
        }
    }

    #[async_trait]
    impl RoomProcessor for EchoProcessor {
        async fn process(&self, env: MessageEnvelope) -> anyhow::Result<Option<MessageEnvelope>> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(self.delay_ms)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            assert!(!env.room_id.is_empty(), "broker must normalize room_id");
            Ok(Some(MessageEnvelope::outbound(
                &env.channel,
                &env.chat_id,
                &env.room_id,
                format!("echo: {}", env.content),
            )))
        }
    }

    fn test_rooms() -> (Arc<RoomManager>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let rooms = Arc::new(RoomManager::new(dir.path().to_path_buf()).unwrap());
        (rooms, dir)
    }

    #[tokio::test]
    async fn test_ingest_resolves_room_and_replies() {
        let (rooms, _dir) = test_rooms();
        let bus = Arc::new(Bus::new(16));
        let mgr = Arc::new(RoomBrokerManager::new(
            Arc::new(EchoProcessor::new(0)),
            rooms,
            bus.clone(),
        ));

        mgr.ingest(MessageEnvelope::inbound("cli", "user", "direct", "Hello!"))
            .await
            .unwrap();

        let reply = bus.consume_outbound().await.unwrap();
        assert_eq!(reply.content, "echo: Hello!");
        assert_eq!(reply.room_id, "general");
    }

    #[tokio::test]
    async fn test_per_room_serialization() {
        let (rooms, _dir) = test_rooms();
        let bus = Arc::new(Bus::new(16));
        let processor = Arc::new(EchoProcessor::new(20));
        let mgr = Arc::new(RoomBrokerManager::new(processor.clone(), rooms, bus.clone()));

        // Same room: three messages must process one at a time.
        for i in 0..3 {
            let mut env = MessageEnvelope::inbound("cli", "user", "direct", format!("m{i}"));
            env.room_id = "general".into();
            mgr.ingest(env).await.unwrap();
        }

        let r1 = bus.consume_outbound().await.unwrap();
        let r2 = bus.consume_outbound().await.unwrap();
        let r3 = bus.consume_outbound().await.unwrap();
        assert_eq!(r1.content, "echo: m0");
        assert_eq!(r2.content, "echo: m1");
        assert_eq!(r3.content, "echo: m2");
        assert_eq!(processor.max_in_flight.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cross_room_concurrency() {
        let (rooms, _dir) = test_rooms();
        rooms.create_room("alpha", crate::rooms::room::RoomType::Project, None, false)
            .unwrap();
        let bus = Arc::new(Bus::new(16));
        let processor = Arc::new(EchoProcessor::new(30));
        let mgr = Arc::new(RoomBrokerManager::new(processor.clone(), rooms, bus.clone()));

        let mut a = MessageEnvelope::inbound("cli", "u", "d1", "one");
        a.room_id = "general".into();
        let mut b = MessageEnvelope::inbound("cli", "u", "d2", "two");
        b.room_id = "alpha".into();
        mgr.ingest(a).await.unwrap();
        mgr.ingest(b).await.unwrap();

        let _ = bus.consume_outbound().await.unwrap();
        let _ = bus.consume_outbound().await.unwrap();
        // Two rooms, overlapping work.
        assert!(processor.max_in_flight.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test]
    async fn test_system_envelope_resolves_via_origin() {
        let (rooms, _dir) = test_rooms();
        rooms.join_channel_to_room("telegram", "chat7", "general").unwrap();
        let bus = Arc::new(Bus::new(16));
        let mgr = Arc::new(RoomBrokerManager::new(
            Arc::new(EchoProcessor::new(0)),
            rooms,
            bus.clone(),
        ));

        let env = MessageEnvelope::system_announcement("researcher", "telegram", "chat7", "", "done");
        mgr.ingest(env).await.unwrap();
        let reply = bus.consume_outbound().await.unwrap();
        assert_eq!(reply.room_id, "general");
    }

    #[tokio::test]
    async fn test_cancel_flag_round_trip() {
        let (rooms, _dir) = test_rooms();
        let bus = Arc::new(Bus::new(4));
        let mgr = Arc::new(RoomBrokerManager::new(
            Arc::new(EchoProcessor::new(0)),
            rooms,
            bus,
        ));

        assert!(!mgr.cancel_room("general").await);
        let flag = mgr.cancel_flag("general").await;
        assert!(!flag.is_cancelled());
        assert!(mgr.cancel_room("general").await);
        assert!(flag.is_cancelled());
        flag.reset();
        assert!(!flag.is_cancelled());
    }

    #[tokio::test]
    async fn test_shutdown_drains_in_flight() {
        let (rooms, _dir) = test_rooms();
        let bus = Arc::new(Bus::new(16));
        let mgr = Arc::new(RoomBrokerManager::new(
            Arc::new(EchoProcessor::new(10)),
            rooms,
            bus.clone(),
        ));

        let mut env = MessageEnvelope::inbound("cli", "u", "d", "last words");
        env.room_id = "general".into();
        mgr.ingest(env).await.unwrap();
        mgr.shutdown().await;

        // The in-flight message completed before shutdown returned.
        let reply = bus.try_consume_outbound().expect("reply should be drained");
        assert_eq!(reply.content, "echo: last words");
    }
}
