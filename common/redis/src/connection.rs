use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch, Notify};
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

use crate::{Client, Connector, CustomRedisError, RetryPolicy};

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(2);
const DEFAULT_PING_INTERVAL: Duration = Duration::from_secs(1);

const METRIC_STORE_CONNECTED: &str = "store_connected";
const METRIC_CONNECTION_ATTEMPTS: &str = "store_connection_attempts_total";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Closing,
    Closed,
}

impl ConnectionState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => ConnectionState::Connecting,
            2 => ConnectionState::Connected,
            3 => ConnectionState::Closing,
            4 => ConnectionState::Closed,
            _ => ConnectionState::Disconnected,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            ConnectionState::Disconnected => 0,
            ConnectionState::Connecting => 1,
            ConnectionState::Connected => 2,
            ConnectionState::Closing => 3,
            ConnectionState::Closed => 4,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Closing => "closing",
            ConnectionState::Closed => "closed",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

enum Command {
    Close(oneshot::Sender<Result<(), CustomRedisError>>),
}

/// State visible to every handle. Only the event loop writes to it once started.
struct Shared {
    state: AtomicU8,
    attempts: AtomicU64,
    events: watch::Sender<ConnectionState>,
    client: RwLock<Option<Arc<dyn Client>>>,
    // Woken by callers whose command failed at the connection level
    suspect: Notify,
}

impl Shared {
    fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn publish(&self, state: ConnectionState) {
        let previous = ConnectionState::from_u8(self.state.swap(state.as_u8(), Ordering::AcqRel));
        if previous == state {
            return;
        }
        debug!(from = %previous, to = %state, "store connection state changed");
        let connected = if state == ConnectionState::Connected {
            1.0
        } else {
            0.0
        };
        metrics::gauge!(METRIC_STORE_CONNECTED).set(connected);
        self.events.send_replace(state);
    }

    fn current_client(&self) -> Option<Arc<dyn Client>> {
        match self.client.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn set_client(&self, client: Option<Arc<dyn Client>>) {
        match self.client.write() {
            Ok(mut guard) => *guard = client,
            Err(poisoned) => *poisoned.into_inner() = client,
        }
    }
}

/// One logical connection to the backing store, kept alive for the whole process.
///
/// A background event loop, started by [`connect`](StoreConnection::connect), owns the
/// connection: it opens it, pings it, reopens it after any failure following the
/// [`RetryPolicy`], and closes it on request. It is the only writer of the
/// [`ConnectionState`]; handles read it with a single atomic load.
///
/// Handles are cheap to clone and safe to share between request handlers: commands
/// go straight to the multiplexed client, the loop is not on the request path.
#[derive(Clone)]
pub struct StoreConnection {
    shared: Arc<Shared>,
    connector: Arc<dyn Connector>,
    retry_policy: RetryPolicy,
    connect_timeout: Duration,
    ping_interval: Duration,
    commands: mpsc::Sender<Command>,
    pending_loop: Arc<Mutex<Option<mpsc::Receiver<Command>>>>,
}

impl StoreConnection {
    pub fn new(connector: Arc<dyn Connector>, retry_policy: RetryPolicy) -> Self {
        let (commands, receiver) = mpsc::channel(4);
        let (events, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            shared: Arc::new(Shared {
                state: AtomicU8::new(ConnectionState::Disconnected.as_u8()),
                attempts: AtomicU64::new(0),
                events,
                client: RwLock::new(None),
                suspect: Notify::new(),
            }),
            connector,
            retry_policy,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            ping_interval: DEFAULT_PING_INTERVAL,
            commands,
            pending_loop: Arc::new(Mutex::new(Some(receiver))),
        }
    }

    /// Upper bound for a single connection attempt, and for each liveness ping.
    pub fn with_connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }

    /// How often an open connection is pinged. Must be non-zero.
    pub fn with_ping_interval(mut self, ping_interval: Duration) -> Self {
        self.ping_interval = ping_interval;
        self
    }

    /// Start the event loop and wait for the outcome of the first attempt.
    ///
    /// A failed first attempt is not an error: the loop keeps retrying in the background,
    /// and the process keeps answering liveness probes meanwhile. Returns whether the
    /// first attempt succeeded. Later calls only report the current connectivity.
    pub async fn connect(&self) -> bool {
        let Some(commands) = self.take_pending_loop() else {
            return self.is_connected();
        };

        let (first_attempt, first_outcome) = oneshot::channel();
        let event_loop = EventLoop {
            shared: self.shared.clone(),
            connector: self.connector.clone(),
            retry_policy: self.retry_policy,
            connect_timeout: self.connect_timeout,
            ping_interval: self.ping_interval,
        };
        tokio::spawn(event_loop.run(commands, first_attempt));

        first_outcome.await.unwrap_or(false)
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    /// Latest known connectivity. Never does I/O.
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Failed attempts since the last successful connection.
    pub fn attempts(&self) -> u64 {
        self.shared.attempts.load(Ordering::Relaxed)
    }

    /// Receive every state transition from now on.
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.shared.events.subscribe()
    }

    pub async fn lrange(
        &self,
        key: &str,
        start: isize,
        stop: isize,
    ) -> Result<Vec<String>, CustomRedisError> {
        let client = self.client()?;
        let result = client.lrange(key.to_owned(), start, stop).await;
        self.observe(&result);
        result
    }

    pub async fn rpush(&self, key: &str, value: String) -> Result<(), CustomRedisError> {
        let client = self.client()?;
        let result = client.rpush(key.to_owned(), value).await;
        self.observe(&result);
        result
    }

    /// Close the connection for good.
    ///
    /// Commands issued before this call are answered before the server closes the
    /// connection. An error means the store did not acknowledge the close; the
    /// connection is released and marked closed either way. Closing a connection that
    /// is down, or already closed, succeeds immediately.
    pub async fn close(&self) -> Result<(), CustomRedisError> {
        if let Some(receiver) = self.take_pending_loop() {
            // The loop never started, there is nothing to release
            drop(receiver);
            self.shared.publish(ConnectionState::Closed);
            return Ok(());
        }

        let (reply, response) = oneshot::channel();
        if self.commands.send(Command::Close(reply)).await.is_err() {
            return Ok(());
        }
        response.await.unwrap_or(Ok(()))
    }

    fn take_pending_loop(&self) -> Option<mpsc::Receiver<Command>> {
        match self.pending_loop.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        }
    }

    fn client(&self) -> Result<Arc<dyn Client>, CustomRedisError> {
        if !self.is_connected() {
            return Err(CustomRedisError::NotConnected);
        }
        self.shared
            .current_client()
            .ok_or(CustomRedisError::NotConnected)
    }

    fn observe<T>(&self, result: &Result<T, CustomRedisError>) {
        if let Err(err) = result {
            if err.is_connection_error() {
                debug!(error = %err, "store command failed at the connection level");
                self.shared.suspect.notify_one();
            }
        }
    }
}

impl health::ReadinessProbe for StoreConnection {
    fn is_ready(&self) -> bool {
        self.is_connected()
    }
}

enum Watch {
    Lost(CustomRedisError),
    // None when every handle was dropped
    Close(Option<oneshot::Sender<Result<(), CustomRedisError>>>),
}

struct EventLoop {
    shared: Arc<Shared>,
    connector: Arc<dyn Connector>,
    retry_policy: RetryPolicy,
    connect_timeout: Duration,
    ping_interval: Duration,
}

impl EventLoop {
    async fn run(
        self,
        mut commands: mpsc::Receiver<Command>,
        first_attempt: oneshot::Sender<bool>,
    ) {
        let mut first_attempt = Some(first_attempt);
        let mut attempt: u64 = 0;

        loop {
            attempt += 1;
            self.shared.publish(ConnectionState::Connecting);

            let outcome = tokio::select! {
                biased;

                command = commands.recv() => {
                    self.close_disconnected(command);
                    return;
                }
                outcome = timeout(self.connect_timeout, self.connector.connect()) => outcome,
            };

            let client = match outcome {
                Ok(Ok(client)) => Some(client),
                Ok(Err(err)) => {
                    warn!(attempt, error = %err, "failed to connect to store");
                    None
                }
                Err(_) => {
                    warn!(
                        attempt,
                        timeout_ms = self.connect_timeout.as_millis() as u64,
                        "timed out connecting to store"
                    );
                    None
                }
            };

            match client {
                Some(client) => {
                    info!(attempt, "connected to store");
                    metrics::counter!(METRIC_CONNECTION_ATTEMPTS, "result" => "success")
                        .increment(1);
                    self.shared.attempts.store(0, Ordering::Relaxed);
                    attempt = 0;
                    self.shared.set_client(Some(client.clone()));
                    self.shared.publish(ConnectionState::Connected);
                    if let Some(first) = first_attempt.take() {
                        drop(first.send(true));
                    }

                    match self.watch(&client, &mut commands).await {
                        Watch::Lost(err) => {
                            warn!(error = %err, "lost connection to store");
                            self.shared.publish(ConnectionState::Disconnected);
                            self.shared.set_client(None);
                        }
                        Watch::Close(reply) => {
                            self.close_connected(client, reply).await;
                            return;
                        }
                    }
                }
                None => {
                    metrics::counter!(METRIC_CONNECTION_ATTEMPTS, "result" => "failure")
                        .increment(1);
                    self.shared.attempts.store(attempt, Ordering::Relaxed);
                    self.shared.publish(ConnectionState::Disconnected);
                    if let Some(first) = first_attempt.take() {
                        drop(first.send(false));
                    }
                }
            }

            let delay = self.retry_policy.time_until_next_retry(attempt);
            debug!(
                attempt,
                delay_ms = delay.as_millis() as u64,
                "scheduling store reconnect"
            );
            tokio::select! {
                biased;

                command = commands.recv() => {
                    self.close_disconnected(command);
                    return;
                }
                _ = sleep(delay) => {}
            }
        }
    }

    /// Keep an open connection under watch until it fails or a close is requested.
    async fn watch(
        &self,
        client: &Arc<dyn Client>,
        commands: &mut mpsc::Receiver<Command>,
    ) -> Watch {
        loop {
            tokio::select! {
                biased;

                command = commands.recv() => {
                    return Watch::Close(command.map(|Command::Close(reply)| reply));
                }
                _ = self.shared.suspect.notified() => {
                    debug!("verifying store connection after a failed command");
                }
                _ = sleep(self.ping_interval) => {}
            }

            let ping = match timeout(self.connect_timeout, client.ping()).await {
                Ok(result) => result,
                Err(_) => Err(CustomRedisError::Timeout),
            };
            if let Err(err) = ping {
                return Watch::Lost(err);
            }
        }
    }

    fn close_disconnected(&self, command: Option<Command>) {
        self.shared.set_client(None);
        self.shared.publish(ConnectionState::Closed);
        info!("store connection closed while disconnected");
        if let Some(Command::Close(reply)) = command {
            drop(reply.send(Ok(())));
        }
    }

    async fn close_connected(
        &self,
        client: Arc<dyn Client>,
        reply: Option<oneshot::Sender<Result<(), CustomRedisError>>>,
    ) {
        self.shared.publish(ConnectionState::Closing);
        // Stop handing the client out, commands already issued hold their own reference
        self.shared.set_client(None);

        let result = client.quit().await;
        match &result {
            Ok(()) => info!("store connection closed"),
            Err(err) => warn!(error = %err, "store did not acknowledge connection close"),
        }

        self.shared.publish(ConnectionState::Closed);
        if let Some(reply) = reply {
            drop(reply.send(result));
        }
    }
}
