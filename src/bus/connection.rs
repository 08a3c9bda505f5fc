//! Broker connection manager.
//!
//! Owns the single long-lived broker connection of a process. Publishers and
//! consumers never hold on to a "connected" assumption: they ask
//! [`BrokerConnectionManager::current`] (or `is_usable`) right before use, and
//! that call re-probes the underlying connection. Only the manager writes the
//! connection slot.
//!
//! Reconnection never gives up. `connect` retries with a fixed delay until it
//! succeeds or `close` is called.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use backon::{BackoffBuilder, ConstantBuilder};
use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{BrokerSession, BusError, Connector, Result, RECONNECT_DELAY};

/// Lifecycle of the managed connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Closing,
}

/// Single-writer, multi-reader handle to the broker connection.
pub struct BrokerConnectionManager {
    connector: Arc<dyn Connector>,
    retry_delay: Duration,
    session: RwLock<Option<Arc<dyn BrokerSession>>>,
    /// Serializes connection attempts so concurrent callers share one connection.
    connect_lock: Mutex<()>,
    state: watch::Sender<ConnectionState>,
    shutdown: watch::Sender<bool>,
}

impl BrokerConnectionManager {
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let (shutdown, _) = watch::channel(false);
        Self {
            connector,
            retry_delay: RECONNECT_DELAY,
            session: RwLock::new(None),
            connect_lock: Mutex::new(()),
            state,
            shutdown,
        }
    }

    /// Override the delay between reconnect attempts.
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn retry_delay(&self) -> Duration {
        self.retry_delay
    }

    /// Last recorded lifecycle state. Does not probe the connection.
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Observe lifecycle transitions.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Receiver that flips to `true` once `close` has been called.
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    pub fn is_shutting_down(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Whether the connection can be used right now.
    ///
    /// Advisory only: the connection may drop between this check and its use.
    pub async fn is_usable(&self) -> bool {
        self.current().await.is_some()
    }

    /// The live session, if any. Re-probes it and records a broker-side drop.
    pub async fn current(&self) -> Option<Arc<dyn BrokerSession>> {
        if self.state() != ConnectionState::Connected {
            return None;
        }

        let session = self.session.read().await.clone()?;
        if session.is_connected() {
            return Some(session);
        }

        self.forget(&session).await;
        None
    }

    /// Make a single connection attempt, reusing a live session if there is one.
    pub async fn try_connect(&self) -> Result<Arc<dyn BrokerSession>> {
        if self.is_shutting_down() {
            return Err(BusError::ShuttingDown);
        }

        let _guard = self.connect_lock.lock().await;
        if let Some(session) = self.current().await {
            return Ok(session);
        }

        self.set_state(ConnectionState::Connecting);
        info!(endpoint = %self.connector.endpoint(), "Connecting to broker");

        let session: Arc<dyn BrokerSession> = match self.connector.connect().await {
            Ok(session) => Arc::from(session),
            Err(e) => {
                self.set_state(ConnectionState::Disconnected);
                return Err(e);
            }
        };

        // close() flips the flag before taking the slot, so checking under the
        // slot lock leaves no window for a session to outlive close().
        let mut slot = self.session.write().await;
        if self.is_shutting_down() {
            drop(slot);
            if let Err(e) = session.close().await {
                debug!(error = %e, "Failed to close connection opened during shutdown");
            }
            self.set_state(ConnectionState::Disconnected);
            return Err(BusError::ShuttingDown);
        }

        *slot = Some(Arc::clone(&session));
        self.set_state(ConnectionState::Connected);
        drop(slot);
        info!(endpoint = %self.connector.endpoint(), "Connected to broker");

        Ok(session)
    }

    /// Connect, retrying with a fixed delay until it works.
    ///
    /// The only error is [`BusError::ShuttingDown`], returned once `close` was called.
    pub async fn connect(&self) -> Result<Arc<dyn BrokerSession>> {
        let mut backoff = ConstantBuilder::default()
            .with_delay(self.retry_delay)
            .with_max_times(usize::MAX)
            .build();
        let mut attempt: u64 = 0;

        loop {
            attempt += 1;
            match self.try_connect().await {
                Ok(session) => return Ok(session),
                Err(BusError::ShuttingDown) => return Err(BusError::ShuttingDown),
                Err(e) => {
                    let delay = backoff.next().unwrap_or(self.retry_delay);
                    warn!(
                        attempt,
                        error = %e,
                        retry_in_ms = %delay.as_millis(),
                        endpoint = %self.connector.endpoint(),
                        "Broker connection failed, retrying"
                    );
                    if !self.pause(delay).await {
                        return Err(BusError::ShuttingDown);
                    }
                }
            }
        }
    }

    /// Drop `session` after a connection-level fault so the next `connect`
    /// opens a fresh one. No-op if a newer session already replaced it.
    pub async fn invalidate(&self, session: &Arc<dyn BrokerSession>) {
        if self.forget(session).await {
            if let Err(e) = session.close().await {
                debug!(error = %e, "Failed to close faulted connection");
            }
        }
    }

    /// Sleep for `delay` unless shutdown is requested first.
    ///
    /// Returns `false` when the caller should stop.
    pub async fn pause(&self, delay: Duration) -> bool {
        if self.is_shutting_down() {
            return false;
        }

        let mut shutdown = self.shutdown.subscribe();
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = shutdown.changed() => {}
        }

        !self.is_shutting_down()
    }

    /// Close the connection and stop all reconnect loops.
    pub async fn close(&self) {
        self.shutdown.send_replace(true);

        let session = {
            let mut slot = self.session.write().await;
            let session = slot.take();
            if session.is_some() {
                self.set_state(ConnectionState::Closing);
            }
            session
        };
        if let Some(session) = session {
            match session.close().await {
                Ok(()) => info!("Broker connection closed"),
                Err(e) => warn!(error = %e, "Broker connection did not close cleanly"),
            }
        }

        self.set_state(ConnectionState::Disconnected);
    }

    /// Run `work`, then close the connection whatever `work` returned.
    ///
    /// Dropping the returned future before it finishes still closes the
    /// connection, on a task spawned from the drop.
    pub async fn scoped<F>(self: &Arc<Self>, work: F) -> F::Output
    where
        F: Future,
    {
        let guard = CloseOnDrop(Some(Arc::clone(self)));
        let output = work.await;
        self.close().await;
        guard.disarm();
        output
    }

    /// Spawn the background task that keeps the connection up.
    ///
    /// The task re-probes every retry interval and reconnects after a drop.
    /// It exits when `close` is called.
    pub fn spawn_supervisor(self: &Arc<Self>) -> JoinHandle<()> {
        let manager = Arc::clone(self);
        tokio::spawn(async move { manager.supervise().await })
    }

    async fn supervise(&self) {
        info!(endpoint = %self.connector.endpoint(), "Broker connection supervisor started");

        loop {
            if !self.is_usable().await && self.connect().await.is_err() {
                break;
            }
            if !self.pause(self.retry_delay).await {
                break;
            }
        }

        info!("Broker connection supervisor stopped");
    }

    /// Clear the slot if it still holds `session`. Returns whether it did.
    async fn forget(&self, session: &Arc<dyn BrokerSession>) -> bool {
        let mut slot = self.session.write().await;
        let is_current = slot
            .as_ref()
            .is_some_and(|current| same_session(current, session));
        if !is_current {
            return false;
        }

        *slot = None;
        drop(slot);
        self.set_state(ConnectionState::Disconnected);
        warn!(endpoint = %self.connector.endpoint(), "Broker connection lost");
        true
    }

    fn set_state(&self, state: ConnectionState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            debug!(from = ?previous, to = ?state, "Broker connection state changed");
        }
    }
}

/// Closes the manager if dropped while still armed.
struct CloseOnDrop(Option<Arc<BrokerConnectionManager>>);

impl CloseOnDrop {
    fn disarm(mut self) {
        self.0 = None;
    }
}

impl Drop for CloseOnDrop {
    fn drop(&mut self) {
        let Some(manager) = self.0.take() else {
            return;
        };
        manager.shutdown.send_replace(true);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move { manager.close().await });
            }
            Err(_) => warn!("Scope dropped outside a runtime, broker connection left open"),
        }
    }
}

fn same_session(a: &Arc<dyn BrokerSession>, b: &Arc<dyn BrokerSession>) -> bool {
    std::ptr::eq(
        Arc::as_ptr(a) as *const (),
        Arc::as_ptr(b) as *const (),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::InMemoryBroker;
    use async_trait::async_trait;
    use tokio::sync::Notify;

    const FAST: Duration = Duration::from_millis(10);

    fn manager(broker: &InMemoryBroker) -> Arc<BrokerConnectionManager> {
        Arc::new(BrokerConnectionManager::new(Arc::new(broker.clone())).with_retry_delay(FAST))
    }

    #[tokio::test]
    async fn test_not_usable_before_connect() {
        let broker = InMemoryBroker::new();
        let manager = manager(&broker);

        assert!(!manager.is_usable().await);
        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert_eq!(broker.stats().await.connection_attempts, 0);
    }

    #[tokio::test]
    async fn test_try_connect_surfaces_failure() {
        let broker = InMemoryBroker::new();
        broker.refuse_connections(1).await;
        let manager = manager(&broker);

        let result = manager.try_connect().await;

        assert!(matches!(result, Err(BusError::Connection(_))));
        assert_eq!(manager.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_connect_retries_until_broker_accepts() {
        let broker = InMemoryBroker::new();
        broker.refuse_connections(3).await;
        let manager = manager(&broker);

        manager.connect().await.unwrap();

        assert!(manager.is_usable().await);
        assert_eq!(manager.state(), ConnectionState::Connected);
        assert_eq!(broker.stats().await.connection_attempts, 4);
    }

    #[tokio::test]
    async fn test_connect_reuses_live_session() {
        let broker = InMemoryBroker::new();
        let manager = manager(&broker);

        manager.connect().await.unwrap();
        manager.connect().await.unwrap();

        assert_eq!(broker.stats().await.connection_attempts, 1);
    }

    #[tokio::test]
    async fn test_broker_drop_is_noticed_on_next_probe() {
        let broker = InMemoryBroker::new();
        let manager = manager(&broker);
        manager.connect().await.unwrap();

        broker.sever_connections().await;

        // Recorded state is stale until someone probes.
        assert_eq!(manager.state(), ConnectionState::Connected);
        assert!(!manager.is_usable().await);
        assert_eq!(manager.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_invalidate_forces_fresh_connection() {
        let broker = InMemoryBroker::new();
        let manager = manager(&broker);
        let session = manager.connect().await.unwrap();

        manager.invalidate(&session).await;
        assert!(!manager.is_usable().await);

        manager.connect().await.unwrap();
        assert_eq!(broker.stats().await.connection_attempts, 2);
    }

    #[tokio::test]
    async fn test_close_stops_reconnecting() {
        let broker = InMemoryBroker::new();
        broker.refuse_all_connections(true).await;
        let manager = manager(&broker);

        let connecting = {
            let manager = Arc::clone(&manager);
            tokio::spawn(async move { manager.connect().await })
        };
        tokio::time::sleep(FAST * 3).await;
        manager.close().await;

        let result = tokio::time::timeout(Duration::from_secs(1), connecting)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(result, Err(BusError::ShuttingDown)));
        assert!(matches!(
            manager.try_connect().await,
            Err(BusError::ShuttingDown)
        ));
    }

    #[tokio::test]
    async fn test_scoped_closes_on_error_path() {
        let broker = InMemoryBroker::new();
        let manager = manager(&broker);
        manager.connect().await.unwrap();

        let result: std::result::Result<(), &str> =
            manager.scoped(async { Err("server crashed") }).await;

        assert!(result.is_err());
        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert!(manager.is_shutting_down());
        assert_eq!(broker.open_sessions().await, 0);
    }

    #[tokio::test]
    async fn test_dropped_scope_still_closes() {
        let broker = InMemoryBroker::new();
        let manager = manager(&broker);
        manager.connect().await.unwrap();
        let mut state = manager.watch_state();

        let result =
            tokio::time::timeout(FAST * 5, manager.scoped(std::future::pending::<()>())).await;

        assert!(result.is_err());
        assert!(manager.is_shutting_down());
        tokio::time::timeout(
            Duration::from_secs(1),
            state.wait_for(|s| *s == ConnectionState::Disconnected),
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(broker.open_sessions().await, 0);
    }

    /// Holds every connection attempt until released.
    struct GatedConnector {
        broker: InMemoryBroker,
        entered: Notify,
        release: Notify,
    }

    #[async_trait]
    impl Connector for GatedConnector {
        async fn connect(&self) -> Result<Box<dyn BrokerSession>> {
            self.entered.notify_one();
            self.release.notified().await;
            self.broker.connect().await
        }

        fn endpoint(&self) -> String {
            "gated://broker".to_string()
        }
    }

    #[tokio::test]
    async fn test_close_during_connect_leaves_no_session() {
        let broker = InMemoryBroker::new();
        let gate = Arc::new(GatedConnector {
            broker: broker.clone(),
            entered: Notify::new(),
            release: Notify::new(),
        });
        let manager = Arc::new(
            BrokerConnectionManager::new(Arc::clone(&gate) as Arc<dyn Connector>)
                .with_retry_delay(FAST),
        );
        let attempt = {
            let manager = Arc::clone(&manager);
            tokio::spawn(async move { manager.try_connect().await })
        };

        gate.entered.notified().await;
        manager.close().await;
        gate.release.notify_one();

        let result = attempt.await.unwrap();
        assert!(matches!(result, Err(BusError::ShuttingDown)));
        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert!(!manager.is_usable().await);
        assert_eq!(broker.open_sessions().await, 0);
    }

    #[tokio::test]
    async fn test_supervisor_reconnects_after_drop() {
        let broker = InMemoryBroker::new();
        let manager = manager(&broker);
        let supervisor = manager.spawn_supervisor();

        let mut state = manager.watch_state();
        tokio::time::timeout(
            Duration::from_secs(1),
            state.wait_for(|s| *s == ConnectionState::Connected),
        )
        .await
        .unwrap()
        .unwrap();

        broker.sever_connections().await;

        tokio::time::timeout(Duration::from_secs(1), async {
            while broker.stats().await.connection_attempts < 2 || !manager.is_usable().await {
                tokio::time::sleep(FAST).await;
            }
        })
        .await
        .unwrap();

        manager.close().await;
        tokio::time::timeout(Duration::from_secs(1), supervisor)
            .await
            .unwrap()
            .unwrap();
    }
}
