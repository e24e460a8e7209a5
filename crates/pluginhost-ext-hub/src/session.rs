//! Subscription session.
//!
//! A session owns at most one hub client. Inbound events flow through a
//! bounded channel into a consumer task that renders them, appends them to
//! a [`MessageLog`] and prints them. The foreground [`SubscriptionSession::monitor`]
//! loop only watches for cancellation and reconciles the connected flag
//! with the transport state.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{timeout, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::config::{HubConfig, STATUS_EVENT, SUBSCRIBE_METHOD};
use crate::error::HubError;
use crate::protocol::render_payload;
use crate::transport::{ConnectionState, HubClient, HubConnector, HubEvent};

/// Bounded log of rendered lines. Pushing past capacity evicts the oldest.
#[derive(Debug, Clone)]
pub struct MessageLog {
    lines: VecDeque<String>,
    capacity: usize,
}

impl MessageLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            lines: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, line: String) {
        if self.capacity == 0 {
            return;
        }
        while self.lines.len() >= self.capacity {
            self.lines.pop_front();
        }
        self.lines.push_back(line);
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Oldest first.
    pub fn lines(&self) -> Vec<String> {
        self.lines.iter().cloned().collect()
    }
}

/// Where operator-facing lines go.
pub trait ConsoleSink: Send + Sync {
    fn line(&self, text: &str);
}

/// Prints to stdout.
#[derive(Debug, Default, Clone, Copy)]
pub struct StdoutSink;

impl ConsoleSink for StdoutSink {
    fn line(&self, text: &str) {
        println!("{}", text);
    }
}

fn timestamp() -> String {
    chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string()
}

fn record(log: &Mutex<MessageLog>, sink: &dyn ConsoleSink, line: String) {
    sink.line(&line);
    log.lock().push(line);
}

/// One subscriber lifecycle against a hub.
pub struct SubscriptionSession {
    connector: Arc<dyn HubConnector>,
    config: HubConfig,
    client: Option<Box<dyn HubClient>>,
    connected: Arc<AtomicBool>,
    log: Arc<Mutex<MessageLog>>,
    sink: Arc<dyn ConsoleSink>,
    consumer: Option<JoinHandle<()>>,
}

impl SubscriptionSession {
    pub fn new(connector: Arc<dyn HubConnector>, config: HubConfig, sink: Arc<dyn ConsoleSink>) -> Self {
        let log = MessageLog::new(config.log_capacity);
        Self {
            connector,
            config,
            client: None,
            connected: Arc::new(AtomicBool::new(false)),
            log: Arc::new(Mutex::new(log)),
            sink,
            consumer: None,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Number of buffered lines.
    pub fn message_count(&self) -> usize {
        self.log.lock().len()
    }

    pub fn log_lines(&self) -> Vec<String> {
        self.log.lock().lines()
    }

    /// Open the connection and subscribe. Returns the operator-facing result.
    pub async fn connect(&mut self) -> String {
        if self.client.is_some() {
            return "Already connected to SignalR hub".to_string();
        }

        let (events_tx, events_rx) = mpsc::channel(self.config.channel_capacity);
        self.spawn_consumer(events_rx);

        let url = self.config.url.clone();
        tracing::debug!("Connecting to hub {}", url);

        let client = match timeout(
            self.config.connect_timeout,
            self.connector.connect(&url, events_tx),
        )
        .await
        {
            Ok(Ok(client)) => client,
            Ok(Err(e)) => {
                tracing::debug!("Hub connect failed: {}", e);
                self.stop_consumer();
                return format!("Error connecting to SignalR hub: {}", e);
            }
            Err(_) => {
                tracing::debug!("Hub connect timed out after {:?}", self.config.connect_timeout);
                self.stop_consumer();
                return format!(
                    "Failed to connect to SignalR hub. State: {}",
                    ConnectionState::Disconnected
                );
            }
        };

        self.connected.store(true, Ordering::SeqCst);
        record(
            &self.log,
            self.sink.as_ref(),
            format!("[{}] Connected to SignalR hub: {}", timestamp(), url),
        );

        let subscribed = match timeout(
            self.config.subscribe_timeout,
            client.invoke(SUBSCRIBE_METHOD, Vec::new()),
        )
        .await
        {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(HubError::Timeout(self.config.subscribe_timeout)),
        };
        let line = match subscribed {
            Ok(()) => format!("[{}] Subscribed to status updates", timestamp()),
            Err(e) => format!("[{}] Failed to subscribe: {}", timestamp(), e),
        };
        record(&self.log, self.sink.as_ref(), line);

        let connection_id = client.connection_id().unwrap_or_default();
        let state = client.state();
        self.client = Some(client);

        format!(
            "Successfully connected to SignalR hub at {}\nConnection ID: {}\nState: {}",
            url, connection_id, state
        )
    }

    /// Stop and release the connection. Returns the operator-facing result.
    pub async fn disconnect(&mut self) -> String {
        let Some(client) = self.client.take() else {
            return "Not connected to any SignalR hub".to_string();
        };

        close_client(
            client.as_ref(),
            self.config.stop_timeout,
            self.config.release_timeout,
        )
        .await;

        self.connected.store(false, Ordering::SeqCst);
        record(
            &self.log,
            self.sink.as_ref(),
            format!("[{}] Disconnected from SignalR hub", timestamp()),
        );
        "Successfully disconnected from SignalR hub".to_string()
    }

    /// Connect, then block until `cancel` fires, then disconnect.
    ///
    /// `start_listener` receives the token and is only called once the
    /// connection is up.
    pub async fn monitor<F>(&mut self, start_listener: F) -> String
    where
        F: FnOnce(CancellationToken),
    {
        self.sink.line("\n=== SignalR Hub Monitor ===");
        self.sink.line(&format!("Connecting to: {}", self.config.url));
        self.sink.line("Press 'q' and Enter to quit monitoring...\n");

        let result = self.connect().await;
        self.sink.line(&result);

        if !self.is_connected() {
            self.teardown();
            return "Failed to connect to SignalR hub. Monitoring cancelled.".to_string();
        }

        let cancel = CancellationToken::new();
        start_listener(cancel.clone());

        let mut poll = tokio::time::interval(self.config.poll_interval);
        poll.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = poll.tick() => self.reconcile(),
            }
        }

        self.sink.line("\nMonitoring stopped by user.");
        let _ = self.disconnect().await;
        let total = self.message_count();
        self.teardown();

        format!("Monitoring session completed. Total messages received: {}", total)
    }

    /// Align the connected flag with what the transport reports.
    ///
    /// No local reconnect is attempted; the transport's retry policy owns
    /// recovery.
    fn reconcile(&self) {
        let Some(client) = self.client.as_ref() else {
            return;
        };
        let transport_connected = client.state() == ConnectionState::Connected;
        let flagged = self.connected.load(Ordering::SeqCst);

        if flagged && !transport_connected {
            self.sink.line("Connection lost. Attempting to reconnect...");
            self.connected.store(false, Ordering::SeqCst);
        } else if !flagged && transport_connected {
            tracing::debug!("Transport reconnected without notification");
            self.connected.store(true, Ordering::SeqCst);
        }
    }

    fn spawn_consumer(&mut self, mut events: mpsc::Receiver<HubEvent>) {
        self.stop_consumer();

        let log = Arc::clone(&self.log);
        let sink = Arc::clone(&self.sink);
        let connected = Arc::clone(&self.connected);

        self.consumer = Some(tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                let line = match event {
                    HubEvent::Invocation { target, arguments } if target == STATUS_EVENT => format!(
                        "[{}] {}: {}",
                        timestamp(),
                        STATUS_EVENT,
                        render_payload(&arguments)
                    ),
                    HubEvent::Invocation { target, .. } => {
                        tracing::debug!("Ignoring hub event {}", target);
                        continue;
                    }
                    HubEvent::Reconnecting { error } => {
                        connected.store(false, Ordering::SeqCst);
                        format!(
                            "[{}] Reconnecting... ({})",
                            timestamp(),
                            error.unwrap_or_else(|| "no error".to_string())
                        )
                    }
                    HubEvent::Reconnected { connection_id } => {
                        connected.store(true, Ordering::SeqCst);
                        format!(
                            "[{}] Reconnected with ID: {}",
                            timestamp(),
                            connection_id.unwrap_or_default()
                        )
                    }
                    HubEvent::Closed { error } => {
                        connected.store(false, Ordering::SeqCst);
                        format!(
                            "[{}] Connection closed: {}",
                            timestamp(),
                            error.unwrap_or_else(|| "no error".to_string())
                        )
                    }
                };
                record(&log, sink.as_ref(), line);
            }
        }));
    }

    fn stop_consumer(&mut self) {
        if let Some(consumer) = self.consumer.take() {
            consumer.abort();
        }
    }

    /// Abort everything without waiting. Never fails.
    fn teardown(&mut self) {
        if let Some(client) = self.client.take() {
            client.abort();
        }
        self.stop_consumer();
        self.connected.store(false, Ordering::SeqCst);
    }
}

impl Drop for SubscriptionSession {
    /// A client still held here gets a bounded stop and release on the
    /// current runtime. Without a runtime it is aborted.
    fn drop(&mut self) {
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            if let Some(client) = self.client.take() {
                let stop_timeout = self.config.stop_timeout;
                let release_timeout = self.config.release_timeout;
                handle.spawn(async move {
                    close_client(client.as_ref(), stop_timeout, release_timeout).await;
                    client.abort();
                });
            }
        }
        self.teardown();
    }
}

/// Stop then release, each bounded. Failures are logged and swallowed.
async fn close_client(client: &dyn HubClient, stop_timeout: Duration, release_timeout: Duration) {
    match timeout(stop_timeout, client.stop()).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::debug!("Hub stop failed: {}", e),
        Err(_) => tracing::debug!("Hub stop timed out after {:?}", stop_timeout),
    }
    match timeout(release_timeout, client.release()).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::debug!("Hub release failed: {}", e),
        Err(_) => {
            tracing::debug!("Hub release timed out after {:?}", release_timeout);
            client.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HubResult;
    use async_trait::async_trait;
    use serde_json::{json, Value as JsonValue};
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct CapturedSink(Mutex<Vec<String>>);

    impl ConsoleSink for CapturedSink {
        fn line(&self, text: &str) {
            self.0.lock().push(text.to_string());
        }
    }

    impl CapturedSink {
        fn contains(&self, needle: &str) -> bool {
            self.0.lock().iter().any(|l| l.contains(needle))
        }
    }

    #[derive(Default)]
    struct FakeState {
        connects: AtomicUsize,
        stops: AtomicUsize,
        aborts: AtomicUsize,
        fail_connect: bool,
        fail_subscribe: bool,
        state: Mutex<Option<ConnectionState>>,
        events: Mutex<Option<mpsc::Sender<HubEvent>>>,
    }

    struct FakeConnector(Arc<FakeState>);

    struct FakeClient(Arc<FakeState>);

    #[async_trait]
    impl HubConnector for FakeConnector {
        async fn connect(&self, _url: &str, events: mpsc::Sender<HubEvent>) -> HubResult<Box<dyn HubClient>> {
            self.0.connects.fetch_add(1, Ordering::SeqCst);
            if self.0.fail_connect {
                return Err(HubError::ConnectionFailed("refused".to_string()));
            }
            *self.0.events.lock() = Some(events);
            *self.0.state.lock() = Some(ConnectionState::Connected);
            Ok(Box::new(FakeClient(Arc::clone(&self.0))))
        }
    }

    #[async_trait]
    impl HubClient for FakeClient {
        fn connection_id(&self) -> Option<String> {
            Some("fake-1".to_string())
        }

        fn state(&self) -> ConnectionState {
            (*self.0.state.lock()).unwrap_or(ConnectionState::Disconnected)
        }

        async fn invoke(&self, target: &str, _arguments: Vec<JsonValue>) -> HubResult<JsonValue> {
            if self.0.fail_subscribe {
                return Err(HubError::Invocation(format!("Method {} does not exist.", target)));
            }
            Ok(JsonValue::Null)
        }

        async fn stop(&self) -> HubResult<()> {
            self.0.stops.fetch_add(1, Ordering::SeqCst);
            *self.0.state.lock() = Some(ConnectionState::Disconnected);
            Ok(())
        }

        async fn release(&self) -> HubResult<()> {
            self.0.events.lock().take();
            Ok(())
        }

        fn abort(&self) {
            self.0.aborts.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn session(state: &Arc<FakeState>, config: HubConfig) -> (SubscriptionSession, Arc<CapturedSink>) {
        let sink = Arc::new(CapturedSink::default());
        let session = SubscriptionSession::new(
            Arc::new(FakeConnector(Arc::clone(state))),
            config,
            Arc::clone(&sink) as Arc<dyn ConsoleSink>,
        );
        (session, sink)
    }

    async fn wait_until(mut check: impl FnMut() -> bool) {
        for _ in 0..200 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached");
    }

    #[test]
    fn test_message_log_evicts_oldest() {
        let mut log = MessageLog::new(3);
        for i in 0..5 {
            log.push(i.to_string());
        }
        assert_eq!(log.lines(), vec!["2", "3", "4"]);
        assert_eq!(log.capacity(), 3);
    }

    #[tokio::test]
    async fn test_connect_twice_creates_one_transport() {
        let state = Arc::new(FakeState::default());
        let (mut session, _sink) = session(&state, HubConfig::default());

        let first = session.connect().await;
        assert!(first.starts_with("Successfully connected to SignalR hub at "));
        assert!(first.contains("Connection ID: fake-1"));
        assert!(first.ends_with("State: Connected"));

        assert_eq!(session.connect().await, "Already connected to SignalR hub");
        assert_eq!(state.connects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_disconnect_when_never_connected() {
        let state = Arc::new(FakeState::default());
        let (mut session, _sink) = session(&state, HubConfig::default());

        assert_eq!(session.disconnect().await, "Not connected to any SignalR hub");
        assert_eq!(state.stops.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_disconnect_after_connect() {
        let state = Arc::new(FakeState::default());
        let (mut session, _sink) = session(&state, HubConfig::default());

        session.connect().await;
        assert_eq!(session.disconnect().await, "Successfully disconnected from SignalR hub");
        assert!(!session.is_connected());
        assert_eq!(state.stops.load(Ordering::SeqCst), 1);
        assert!(session.log_lines().last().unwrap().ends_with("Disconnected from SignalR hub"));
        assert_eq!(session.disconnect().await, "Not connected to any SignalR hub");
    }

    #[tokio::test]
    async fn test_log_keeps_last_fifty_of_two_hundred() {
        let state = Arc::new(FakeState::default());
        let (mut session, sink) = session(&state, HubConfig::default());
        session.connect().await;

        let events = state.events.lock().clone().unwrap();
        for i in 0..200 {
            events
                .send(HubEvent::Invocation {
                    target: STATUS_EVENT.to_string(),
                    arguments: vec![json!(i.to_string())],
                })
                .await
                .unwrap();
        }

        wait_until(|| {
            session
                .log_lines()
                .last()
                .is_some_and(|l| l.ends_with("StatusUpdate: 199"))
        })
        .await;

        let lines = session.log_lines();
        assert_eq!(lines.len(), 50);
        assert!(lines[0].ends_with("StatusUpdate: 150"));
        assert!(sink.contains("StatusUpdate: 0"));
    }

    #[tokio::test]
    async fn test_other_events_are_not_buffered() {
        let state = Arc::new(FakeState::default());
        let (mut session, _sink) = session(&state, HubConfig::default());
        session.connect().await;
        let before = session.message_count();

        let events = state.events.lock().clone().unwrap();
        events
            .send(HubEvent::Invocation {
                target: "Unrelated".to_string(),
                arguments: vec![],
            })
            .await
            .unwrap();
        events
            .send(HubEvent::Invocation {
                target: STATUS_EVENT.to_string(),
                arguments: vec![json!({"status": "alive"})],
            })
            .await
            .unwrap();

        wait_until(|| session.message_count() == before + 1).await;
        assert!(session
            .log_lines()
            .last()
            .unwrap()
            .ends_with("StatusUpdate: {\"status\":\"alive\"}"));
    }

    #[tokio::test]
    async fn test_subscribe_failure_keeps_session_connected() {
        let state = Arc::new(FakeState {
            fail_subscribe: true,
            ..Default::default()
        });
        let (mut session, sink) = session(&state, HubConfig::default());

        let result = session.connect().await;
        assert!(result.ends_with("State: Connected"));
        assert!(session.is_connected());
        assert!(sink.contains("Failed to subscribe: Invocation failed: Method SubscribeToStatus does not exist."));
    }

    #[tokio::test]
    async fn test_lifecycle_events_update_flag() {
        let state = Arc::new(FakeState::default());
        let (mut session, sink) = session(&state, HubConfig::default());
        session.connect().await;
        let events = state.events.lock().clone().unwrap();

        events
            .send(HubEvent::Reconnecting {
                error: Some("socket reset".to_string()),
            })
            .await
            .unwrap();
        wait_until(|| sink.contains("Reconnecting... (socket reset)")).await;
        assert!(!session.is_connected());

        events
            .send(HubEvent::Reconnected {
                connection_id: Some("fake-2".to_string()),
            })
            .await
            .unwrap();
        wait_until(|| sink.contains("Reconnected with ID: fake-2")).await;
        assert!(session.is_connected());
    }

    #[tokio::test]
    async fn test_monitor_until_cancelled() {
        let state = Arc::new(FakeState::default());
        let (mut session, sink) = session(&state, HubConfig::default());

        let result = session.monitor(|cancel| cancel.cancel()).await;

        assert_eq!(
            result,
            "Monitoring session completed. Total messages received: 3"
        );
        assert!(sink.contains("=== SignalR Hub Monitor ==="));
        assert!(sink.contains("Monitoring stopped by user."));
        assert_eq!(state.stops.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_monitor_connect_failure_skips_listener() {
        let state = Arc::new(FakeState {
            fail_connect: true,
            ..Default::default()
        });
        let (mut session, sink) = session(&state, HubConfig::default());
        let mut listener_started = false;

        let result = session.monitor(|_| listener_started = true).await;

        assert_eq!(result, "Failed to connect to SignalR hub. Monitoring cancelled.");
        assert!(!listener_started);
        assert!(sink.contains("Error connecting to SignalR hub: Connection failed: refused"));
    }

    #[tokio::test]
    async fn test_monitor_reconciles_drift() {
        let state = Arc::new(FakeState::default());
        let config = HubConfig {
            poll_interval: Duration::from_millis(10),
            ..HubConfig::default()
        };
        let (mut session, sink) = session(&state, config);

        let drifting = Arc::clone(&state);
        let watcher = Arc::clone(&sink);
        let result = session
            .monitor(move |cancel| {
                tokio::spawn(async move {
                    *drifting.state.lock() = Some(ConnectionState::Reconnecting);
                    for _ in 0..200 {
                        if watcher.contains("Connection lost. Attempting to reconnect...") {
                            break;
                        }
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                    cancel.cancel();
                });
            })
            .await;

        assert!(result.starts_with("Monitoring session completed."));
        assert!(sink.contains("Connection lost. Attempting to reconnect..."));
    }

    #[tokio::test]
    async fn test_drop_stops_transport_on_runtime() {
        let state = Arc::new(FakeState::default());
        {
            let (mut session, _sink) = session(&state, HubConfig::default());
            session.connect().await;
        }
        wait_until(|| state.aborts.load(Ordering::SeqCst) == 1).await;
        assert_eq!(state.stops.load(Ordering::SeqCst), 1);
        assert!(state.events.lock().is_none());
    }

    #[test]
    fn test_drop_without_runtime_aborts_transport() {
        let state = Arc::new(FakeState::default());
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let (mut session, _sink) = session(&state, HubConfig::default());
        runtime.block_on(session.connect());
        drop(runtime);

        drop(session);
        assert_eq!(state.aborts.load(Ordering::SeqCst), 1);
        assert_eq!(state.stops.load(Ordering::SeqCst), 0);
    }
}
