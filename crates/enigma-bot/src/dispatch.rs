//! Per-user ordered dispatch of inbound messages.
//!
//! Every user gets a bounded queue served by a single worker task, so one
//! user's messages are handled strictly in arrival order while different
//! users are handled in parallel. A worker that stays idle for
//! `idle_timeout` retires and is recreated by the next message.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, warn};

use crate::engine::{ConversationEngine, Incoming, Outbound};
use crate::error::BotResult;
use crate::messages::keys;

/// Outbound side of the messaging platform.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send a text message; `rich` enables Markdown formatting.
    async fn send_text(&self, chat_id: i64, text: &str, rich: bool) -> BotResult<()>;

    /// Forward an existing message unchanged.
    async fn forward_message(
        &self,
        from_chat_id: i64,
        message_id: i64,
        to_chat_id: i64,
    ) -> BotResult<()>;
}

/// Carry out `outbound` in order. Failures are logged and skipped.
pub async fn deliver(transport: &dyn Transport, outbound: &[Outbound]) {
    for action in outbound {
        let result = match action {
            Outbound::Text {
                chat_id,
                text,
                rich,
            } => transport.send_text(*chat_id, text, *rich).await,
            Outbound::Forward {
                from_chat_id,
                message_id,
                to_chat_id,
            } => {
                transport
                    .forward_message(*from_chat_id, *message_id, *to_chat_id)
                    .await
            }
        };
        if let Err(err) = result {
            warn!(error = %err, ?action, "delivery failed");
        }
    }
}

/// Routes inbound messages to per-user workers.
#[derive(Clone)]
pub struct Dispatcher {
    engine: Arc<ConversationEngine>,
    transport: Arc<dyn Transport>,
    queues: Arc<DashMap<i64, mpsc::Sender<Incoming>>>,
    queue_capacity: usize,
    idle_timeout: Duration,
}

impl Dispatcher {
    pub fn new(engine: Arc<ConversationEngine>, transport: Arc<dyn Transport>) -> Self {
        Self {
            engine,
            transport,
            queues: Arc::new(DashMap::new()),
            queue_capacity: 32,
            idle_timeout: Duration::from_secs(60),
        }
    }

    /// How long a worker waits for its next message before retiring.
    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    /// Messages buffered per user before `submit` starts refusing.
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity.max(1);
        self
    }

    /// Number of users with a live worker.
    pub fn active_workers(&self) -> usize {
        self.queues.len()
    }

    /// Queue `incoming` behind the sender's earlier messages.
    ///
    /// Never waits: when the sender's queue is full the message is refused
    /// with a short reply, so a flood from one user cannot hold up the
    /// caller's intake for everyone else. Returns whether the message was
    /// queued.
    pub fn submit(&self, incoming: Incoming) -> bool {
        let user_id = incoming.profile.platform_id;
        let mut pending = incoming;

        // A second round only happens when the first worker had died.
        for _ in 0..2 {
            let sent = {
                let queue = self
                    .queues
                    .entry(user_id)
                    .or_insert_with(|| self.spawn_worker(user_id));
                queue.try_send(pending)
            };
            match sent {
                Ok(()) => return true,
                Err(TrySendError::Full(back)) => {
                    self.refuse(back);
                    return false;
                }
                Err(TrySendError::Closed(back)) => pending = back,
            }
            self.queues.remove_if(&user_id, |_, queue| queue.is_closed());
        }

        warn!(user_id, "no worker accepted the message, dropping it");
        false
    }

    /// Tell the sender their message was not taken.
    fn refuse(&self, incoming: Incoming) {
        warn!(
            user_id = incoming.profile.platform_id,
            capacity = self.queue_capacity,
            "queue full, message refused"
        );
        let reply = Outbound::Text {
            chat_id: incoming.chat_id,
            text: self.engine.messages().get(keys::SLOW_DOWN),
            rich: false,
        };
        let transport = Arc::clone(&self.transport);
        tokio::spawn(async move {
            deliver(transport.as_ref(), &[reply]).await;
        });
    }

    fn spawn_worker(&self, user_id: i64) -> mpsc::Sender<Incoming> {
        let (tx, mut rx) = mpsc::channel::<Incoming>(self.queue_capacity);
        let engine = Arc::clone(&self.engine);
        let transport = Arc::clone(&self.transport);
        let queues = Arc::clone(&self.queues);
        let idle_timeout = self.idle_timeout;

        tokio::spawn(async move {
            debug!(user_id, "worker started");
            loop {
                match tokio::time::timeout(idle_timeout, rx.recv()).await {
                    Ok(Some(incoming)) => {
                        let outbound = engine.handle(&incoming).await;
                        deliver(transport.as_ref(), &outbound).await;
                    }
                    Ok(None) => break,
                    Err(_) => {
                        // Retire only with an empty queue; the check runs under
                        // the map's shard lock, which `submit` also holds when
                        // enqueuing.
                        let retired = queues
                            .remove_if(&user_id, |_, queue| queue.capacity() == queue.max_capacity())
                            .is_some();
                        if retired {
                            rx.close();
                            while let Ok(incoming) = rx.try_recv() {
                                let outbound = engine.handle(&incoming).await;
                                deliver(transport.as_ref(), &outbound).await;
                            }
                            break;
                        }
                    }
                }
            }
            debug!(user_id, "worker stopped");
        });

        tx
    }
}
