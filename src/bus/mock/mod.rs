//! In-memory broker for tests.
//!
//! Behaves like a single RabbitMQ vhost reached through the default exchange:
//! publishing to an undeclared queue drops the message, deliveries stay
//! in flight until acked or requeued. A requeued delivery goes to the tail of
//! its queue so later messages stay reachable. Severing the connections
//! returns every in-flight delivery to the head of its queue marked as
//! redelivered.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use futures::stream;
use tokio::sync::Notify;
use tracing::debug;

use super::consumer::Settlement;
use super::{
    Acknowledger, BrokerChannel, BrokerSession, BusError, ConsumedMessage, Connector,
    DeliveryStream, Result,
};

/// Counters for every operation the broker has seen.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BrokerStats {
    pub connection_attempts: usize,
    pub channels_opened: usize,
    pub queue_declares: usize,
    pub publishes: usize,
    pub unroutable: usize,
    pub acks: usize,
    pub requeues: usize,
}

/// A message that reached a queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedMessage {
    pub queue: String,
    pub body: Vec<u8>,
    pub persistent: bool,
}

/// Record of how a delivery was settled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettledDelivery {
    pub delivery_tag: u64,
    pub body: Vec<u8>,
    pub outcome: Settlement,
}

#[derive(Debug, Clone)]
struct StoredMessage {
    body: Vec<u8>,
    redelivered: bool,
}

struct InFlight {
    queue: String,
    session: u64,
    message: StoredMessage,
}

#[derive(Default)]
struct BrokerState {
    queues: HashMap<String, VecDeque<StoredMessage>>,
    in_flight: HashMap<u64, InFlight>,
    live_sessions: HashSet<u64>,
    next_session: u64,
    next_tag: u64,
    refuse_remaining: usize,
    refuse_all: bool,
    fail_publish: bool,
    stats: BrokerStats,
    published: Vec<PublishedMessage>,
    settled: Vec<SettledDelivery>,
}

impl BrokerState {
    /// Put the session's unsettled deliveries back at the head of their queues.
    fn return_in_flight(&mut self, session: Option<u64>) {
        let mut tags: Vec<u64> = self
            .in_flight
            .iter()
            .filter(|(_, f)| session.map_or(true, |s| f.session == s))
            .map(|(tag, _)| *tag)
            .collect();
        // Newest first so push_front restores delivery order.
        tags.sort_unstable_by(|a, b| b.cmp(a));

        for tag in tags {
            if let Some(InFlight {
                queue, mut message, ..
            }) = self.in_flight.remove(&tag)
            {
                message.redelivered = true;
                self.queues.entry(queue).or_default().push_front(message);
            }
        }
    }
}

struct Inner {
    state: Mutex<BrokerState>,
    notify: Notify,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, BrokerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_live(&self, session: u64) -> bool {
        self.lock().live_sessions.contains(&session)
    }
}

/// In-memory broker. Cloning shares the same broker.
#[derive(Clone)]
pub struct InMemoryBroker {
    inner: Arc<Inner>,
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(BrokerState::default()),
                notify: Notify::new(),
            }),
        }
    }

    /// Refuse the next `count` connection attempts.
    pub async fn refuse_connections(&self, count: usize) {
        self.inner.lock().refuse_remaining = count;
    }

    /// Refuse every connection attempt until switched off.
    pub async fn refuse_all_connections(&self, refuse: bool) {
        self.inner.lock().refuse_all = refuse;
    }

    pub async fn set_fail_on_publish(&self, fail: bool) {
        self.inner.lock().fail_publish = fail;
    }

    /// Drop every open connection, as a broker restart or network fault would.
    pub async fn sever_connections(&self) {
        {
            let mut state = self.inner.lock();
            state.live_sessions.clear();
            state.return_in_flight(None);
        }
        self.inner.notify.notify_waiters();
    }

    /// Place a raw body on `queue`, declaring it if needed.
    pub async fn enqueue(&self, queue: &str, body: impl Into<Vec<u8>>) {
        {
            let mut state = self.inner.lock();
            state
                .queues
                .entry(queue.to_string())
                .or_default()
                .push_back(StoredMessage {
                    body: body.into(),
                    redelivered: false,
                });
        }
        self.inner.notify.notify_waiters();
    }

    pub async fn is_declared(&self, queue: &str) -> bool {
        self.inner.lock().queues.contains_key(queue)
    }

    /// Messages ready for delivery on `queue`.
    pub async fn queue_depth(&self, queue: &str) -> usize {
        self.inner.lock().queues.get(queue).map_or(0, VecDeque::len)
    }

    /// Deliveries handed out but not yet settled.
    pub async fn in_flight(&self) -> usize {
        self.inner.lock().in_flight.len()
    }

    pub async fn open_sessions(&self) -> usize {
        self.inner.lock().live_sessions.len()
    }

    pub async fn stats(&self) -> BrokerStats {
        self.inner.lock().stats.clone()
    }

    pub async fn published(&self) -> Vec<PublishedMessage> {
        self.inner.lock().published.clone()
    }

    pub async fn settled(&self) -> Vec<SettledDelivery> {
        self.inner.lock().settled.clone()
    }
}

#[async_trait]
impl Connector for InMemoryBroker {
    async fn connect(&self) -> Result<Box<dyn BrokerSession>> {
        let mut state = self.inner.lock();
        state.stats.connection_attempts += 1;

        if state.refuse_all {
            return Err(BusError::Connection("connection refused".to_string()));
        }
        if state.refuse_remaining > 0 {
            state.refuse_remaining -= 1;
            return Err(BusError::Connection("connection refused".to_string()));
        }

        state.next_session += 1;
        let id = state.next_session;
        state.live_sessions.insert(id);

        Ok(Box::new(InMemorySession {
            inner: Arc::clone(&self.inner),
            id,
        }))
    }

    fn endpoint(&self) -> String {
        "memory://broker".to_string()
    }
}

struct InMemorySession {
    inner: Arc<Inner>,
    id: u64,
}

#[async_trait]
impl BrokerSession for InMemorySession {
    fn is_connected(&self) -> bool {
        self.inner.is_live(self.id)
    }

    async fn open_channel(&self) -> Result<Box<dyn BrokerChannel>> {
        let mut state = self.inner.lock();
        if !state.live_sessions.contains(&self.id) {
            return Err(BusError::Channel("connection is closed".to_string()));
        }
        state.stats.channels_opened += 1;

        Ok(Box::new(InMemoryChannel {
            inner: Arc::clone(&self.inner),
            session: self.id,
            closed: AtomicBool::new(false),
        }))
    }

    async fn close(&self) -> Result<()> {
        {
            let mut state = self.inner.lock();
            state.live_sessions.remove(&self.id);
            state.return_in_flight(Some(self.id));
        }
        self.inner.notify.notify_waiters();
        Ok(())
    }
}

struct InMemoryChannel {
    inner: Arc<Inner>,
    session: u64,
    closed: AtomicBool,
}

impl InMemoryChannel {
    fn ensure_open(&self, state: &BrokerState) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) || !state.live_sessions.contains(&self.session) {
            return Err(BusError::Channel("channel is closed".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl BrokerChannel for InMemoryChannel {
    async fn declare_queue(&self, queue: &str) -> Result<()> {
        let mut state = self.inner.lock();
        self.ensure_open(&state)?;
        state.stats.queue_declares += 1;
        state.queues.entry(queue.to_string()).or_default();
        Ok(())
    }

    async fn publish_persistent(&self, queue: &str, payload: &[u8]) -> Result<()> {
        {
            let mut state = self.inner.lock();
            self.ensure_open(&state)?;
            state.stats.publishes += 1;

            if state.fail_publish {
                return Err(BusError::Publish("mock publish failure".to_string()));
            }

            let Some(messages) = state.queues.get_mut(queue) else {
                state.stats.unroutable += 1;
                debug!(queue = %queue, "Dropping unroutable message");
                return Ok(());
            };
            messages.push_back(StoredMessage {
                body: payload.to_vec(),
                redelivered: false,
            });
            state.published.push(PublishedMessage {
                queue: queue.to_string(),
                body: payload.to_vec(),
                persistent: true,
            });
        }
        self.inner.notify.notify_waiters();
        Ok(())
    }

    async fn consume(&self, queue: &str, _consumer_tag: &str) -> Result<DeliveryStream> {
        {
            let state = self.inner.lock();
            self.ensure_open(&state)?;
            if !state.queues.contains_key(queue) {
                return Err(BusError::Subscribe(format!("no queue '{}'", queue)));
            }
        }

        let inner = Arc::clone(&self.inner);
        let session = self.session;
        let queue = queue.to_string();

        let deliveries = stream::unfold(false, move |faulted| {
            let inner = Arc::clone(&inner);
            let queue = queue.clone();
            async move {
                if faulted {
                    return None;
                }
                loop {
                    let notified = inner.notify.notified();
                    tokio::pin!(notified);
                    notified.as_mut().enable();

                    match next_delivery(&inner, session, &queue) {
                        Next::Closed => {
                            let fault = BusError::Connection("connection closed".to_string());
                            return Some((Err(fault), true));
                        }
                        Next::Message(message) => return Some((Ok(message), false)),
                        Next::Empty => notified.await,
                    }
                }
            }
        });

        Ok(Box::pin(deliveries))
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

enum Next {
    Closed,
    Empty,
    Message(ConsumedMessage),
}

/// Hand out the head of `queue`, keeping it in flight until settled.
fn next_delivery(inner: &Arc<Inner>, session: u64, queue: &str) -> Next {
    let mut state = inner.lock();
    if !state.live_sessions.contains(&session) {
        return Next::Closed;
    }

    let Some(message) = state.queues.get_mut(queue).and_then(VecDeque::pop_front) else {
        return Next::Empty;
    };

    state.next_tag += 1;
    let tag = state.next_tag;
    let delivered = ConsumedMessage::new(
        message.body.clone(),
        message.redelivered,
        Box::new(InMemoryAcker {
            inner: Arc::clone(inner),
            tag,
        }),
    );
    state.in_flight.insert(
        tag,
        InFlight {
            queue: queue.to_string(),
            session,
            message,
        },
    );

    Next::Message(delivered)
}

struct InMemoryAcker {
    inner: Arc<Inner>,
    tag: u64,
}

impl InMemoryAcker {
    fn settle(&self, requeue: bool) -> Result<()> {
        let mut state = self.inner.lock();
        let unknown = || BusError::Settle(format!("unknown delivery tag {}", self.tag));

        let session = state.in_flight.get(&self.tag).ok_or_else(unknown)?.session;
        if !state.live_sessions.contains(&session) {
            return Err(BusError::Settle("channel is closed".to_string()));
        }
        let InFlight {
            queue, mut message, ..
        } = state.in_flight.remove(&self.tag).ok_or_else(unknown)?;

        let outcome = if requeue {
            Settlement::Requeued
        } else {
            Settlement::Acked
        };
        state.settled.push(SettledDelivery {
            delivery_tag: self.tag,
            body: message.body.clone(),
            outcome,
        });

        if requeue {
            state.stats.requeues += 1;
            message.redelivered = true;
            state.queues.entry(queue).or_default().push_back(message);
        } else {
            state.stats.acks += 1;
        }
        Ok(())
    }
}

#[async_trait]
impl Acknowledger for InMemoryAcker {
    async fn ack(&self) -> Result<()> {
        self.settle(false)
    }

    async fn requeue(&self) -> Result<()> {
        self.settle(true)?;
        self.inner.notify.notify_waiters();
        Ok(())
    }
}
