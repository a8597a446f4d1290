#![expect(
    clippy::module_name_repetitions,
    reason = "Connection types expose their domain in the name for clarity"
)]

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::{Duration, Instant};

use backoff::ExponentialBackoff;
use backoff::backoff::Backoff as _;
use futures::{SinkExt as _, StreamExt as _};
use serde::de::DeserializeOwned;
use tokio::net::TcpStream;
use tokio::sync::{Mutex, MutexGuard, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async_with_config};
use tokio_util::sync::{CancellationToken, DropGuard};

use super::config::{Config, WaitPolicy};
use super::error::WsError;
use super::traits::{EndpointSource, ResponseParser, validate_endpoint};
use crate::Result;
use crate::error::{Error, Kind};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Upper bound on a best-effort close handshake during teardown.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// Connection state tracking.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Not connected, and no attempt is underway
    Disconnected,
    /// Attempting to connect
    Connecting {
        /// Attempt number, starting at 1 after every successful connection
        attempt: u32,
    },
    /// Successfully connected
    Connected {
        /// When the connection was established
        since: Instant,
    },
    /// Waiting before the next attempt after a failure
    Reconnecting {
        /// Number of consecutive failed attempts so far
        attempt: u32,
    },
    /// The reconnection budget ran out; no further attempts will be made
    Exhausted {
        /// Number of consecutive failed attempts
        attempts: u32,
    },
    /// The client was stopped
    Stopped,
}

impl ConnectionState {
    /// Check if the connection is currently active.
    #[must_use]
    pub const fn is_connected(self) -> bool {
        matches!(self, Self::Connected { .. })
    }

    /// Check if the connection will never become active again.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Exhausted { .. } | Self::Stopped)
    }
}

/// Owns a single WebSocket connection, keeps it alive, and runs one
/// request/response exchange on it at a time.
///
/// A background supervisor task (spawned by [`ConnectionManager::start`])
/// connects whenever the socket slot is empty and retries failures according
/// to [`ReconnectConfig`](super::config::ReconnectConfig). Requests park on
/// the connection state until a socket is available, then hold the socket
/// lock for the whole send-then-receive cycle, so replies are paired with
/// requests purely by order.
///
/// Cloning is cheap and every clone drives the same connection. Dropping the
/// last clone stops the supervisor, just as [`ConnectionManager::stop`] would.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Shared>,
    /// Cancels `stopping` once every handle is gone. The supervisor only holds
    /// `Shared`, so it never keeps this alive.
    _cancel_on_drop: Arc<DropGuard>,
}

struct Shared {
    /// Where to connect, consulted on every attempt
    source: Box<dyn EndpointSource>,
    config: Config,
    /// The socket slot. Holding this lock is the request lock.
    socket: Mutex<Option<WsStream>>,
    /// Watch channel sender for state changes; doubles as the connection-ready gate
    state_tx: watch::Sender<ConnectionState>,
    /// Consecutive failed attempts since the last successful connection
    retry_count: AtomicU32,
    /// Set once by `stop`, never reset
    stopping: CancellationToken,
    supervisor: StdMutex<Option<JoinHandle<()>>>,
}

impl ConnectionManager {
    /// Create a connection manager. Nothing connects until [`Self::start`].
    #[must_use]
    pub fn new<S: EndpointSource>(source: S, config: Config) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        let stopping = CancellationToken::new();

        Self {
            _cancel_on_drop: Arc::new(stopping.clone().drop_guard()),
            inner: Arc::new(Shared {
                source: Box::new(source),
                config,
                socket: Mutex::new(None),
                state_tx,
                retry_count: AtomicU32::new(0),
                stopping,
                supervisor: StdMutex::new(None),
            }),
        }
    }

    /// Launch the supervisor unless one is already running.
    ///
    /// Returns immediately. Does nothing once the manager is stopped or has
    /// used up its reconnection budget. Must be called within a Tokio runtime.
    pub fn start(&self) {
        if self.inner.stopping.is_cancelled() || self.state().is_terminal() {
            #[cfg(feature = "tracing")]
            tracing::debug!(state = ?self.state(), "Not starting supervisor");
            return;
        }

        let mut slot = self
            .inner
            .supervisor
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if slot.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return;
        }

        let shared = Arc::clone(&self.inner);
        *slot = Some(tokio::spawn(async move {
            shared.supervise().await;
        }));
    }

    /// Send `payload` as one binary frame and parse the single reply frame.
    ///
    /// Parks until a connection is available according to the configured
    /// [`WaitPolicy`], then serializes with every other caller. A transport
    /// failure tears the socket down and restarts the supervisor before the
    /// error is returned; the request itself is never retried.
    pub async fn request<M, P>(
        &self,
        payload: &[u8],
        reply_timeout: Duration,
        parser: &P,
    ) -> Result<M>
    where
        M: DeserializeOwned,
        P: ResponseParser<M>,
    {
        if payload.is_empty() {
            return Err(Error::validation("payload must not be empty"));
        }

        loop {
            self.wait_until_connected().await?;

            let mut in_flight = InFlight {
                socket: self.inner.socket.lock().await,
                shared: &self.inner,
                settled: false,
            };
            let Some(ws) = in_flight.socket.as_mut() else {
                // Another caller tore the socket down between the gate and the lock
                in_flight.settled = true;
                drop(in_flight);
                if self.inner.config.wait_policy == WaitPolicy::FailFast {
                    return Err(Error::not_connected());
                }
                continue;
            };

            let outcome = exchange(ws, payload, reply_timeout).await;
            in_flight.settled = true;

            let bytes = match outcome {
                Ok(bytes) => bytes,
                Err(e) => {
                    if self.inner.should_reconnect(&e) {
                        self.inner.force_reconnect(&mut in_flight.socket, &e).await;
                        drop(in_flight);
                        self.start();
                    }
                    return Err(e);
                }
            };
            drop(in_flight);

            return parser.parse(&bytes).inspect_err(|e| {
                #[cfg(feature = "tracing")]
                tracing::warn!(error = %e, len = bytes.len(), "Failed to parse reply");
                #[cfg(not(feature = "tracing"))]
                let _ = &e;
            });
        }
    }

    /// Shut down for good.
    ///
    /// Signals the supervisor, closes the socket if present, and releases
    /// every parked caller with [`Kind::Stopped`]. An exchange already holding
    /// the socket finishes first. Calling this again is harmless.
    pub async fn stop(&self) {
        self.inner.stopping.cancel();

        let mut socket = self.inner.socket.lock().await;
        if let Some(ws) = socket.take() {
            close_quietly(ws).await;
        }
        self.inner.state_tx.send_replace(ConnectionState::Stopped);
        drop(socket);

        #[cfg(feature = "tracing")]
        tracing::debug!("Connection manager stopped");
    }

    /// Get the current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.inner.state_tx.borrow()
    }

    /// Subscribe to connection state changes.
    #[must_use]
    pub fn state_receiver(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_tx.subscribe()
    }

    /// Consecutive failed connection attempts since the last success.
    #[must_use]
    pub fn retry_count(&self) -> u32 {
        self.inner.retry_count.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.inner.stopping.is_cancelled()
    }

    async fn wait_until_connected(&self) -> Result<()> {
        let state = match self.inner.config.wait_policy {
            WaitPolicy::FailFast => self.state(),
            WaitPolicy::WaitForConnection => {
                let mut state_rx = self.inner.state_tx.subscribe();
                let state = state_rx
                    .wait_for(|state| state.is_connected() || state.is_terminal())
                    .await
                    .map_err(|_e| Error::stopped())?;
                *state
            }
        };

        match state {
            ConnectionState::Connected { .. } => Ok(()),
            ConnectionState::Exhausted { attempts } => {
                Err(Error::retry_budget_exhausted(attempts))
            }
            ConnectionState::Stopped => Err(Error::stopped()),
            _ => Err(Error::not_connected()),
        }
    }
}

impl Shared {
    /// Supervisor loop: connect while the slot is empty, idle while it is full.
    async fn supervise(self: Arc<Self>) {
        let mut reconnect = self.config.reconnect.clone();
        let mut backoff: ExponentialBackoff = reconnect.clone().into();

        loop {
            if self.stopping.is_cancelled() {
                break;
            }

            if self.state_tx.borrow().is_connected() {
                tokio::select! {
                    () = self.stopping.cancelled() => break,
                    () = sleep(self.config.poll_interval) => continue,
                }
            }

            if let Some(updated) = self.source.reconnect()
                && updated != reconnect
            {
                backoff = updated.clone().into();
                reconnect = updated;
            }

            let attempt = self.retry_count.load(Ordering::SeqCst).saturating_add(1);
            self.publish(ConnectionState::Connecting { attempt });

            let result = tokio::select! {
                () = self.stopping.cancelled() => break,
                result = self.connect() => result,
            };

            match result {
                Ok(ws) => {
                    let mut socket = self.socket.lock().await;
                    if self.stopping.is_cancelled() {
                        drop(socket);
                        close_quietly(ws).await;
                        break;
                    }
                    *socket = Some(ws);
                    self.retry_count.store(0, Ordering::SeqCst);
                    backoff.reset();
                    self.publish(ConnectionState::Connected {
                        since: Instant::now(),
                    });
                    drop(socket);

                    #[cfg(feature = "tracing")]
                    tracing::info!(attempt, "Connected");
                }
                Err(e) => {
                    let attempts = self
                        .retry_count
                        .fetch_add(1, Ordering::SeqCst)
                        .saturating_add(1);

                    if reconnect.is_exhausted(attempts) {
                        #[cfg(feature = "tracing")]
                        tracing::error!(attempts, error = %e, "Max retries reached, giving up");
                        #[cfg(not(feature = "tracing"))]
                        let _ = &e;
                        self.publish(ConnectionState::Exhausted { attempts });
                        break;
                    }

                    let delay = backoff.next_backoff().unwrap_or(reconnect.max_backoff);

                    #[cfg(feature = "tracing")]
                    tracing::warn!(attempts, ?delay, error = %e, "Unable to connect");
                    #[cfg(not(feature = "tracing"))]
                    let _ = &e;

                    self.publish(ConnectionState::Reconnecting { attempt: attempts });

                    tokio::select! {
                        () = self.stopping.cancelled() => break,
                        () = sleep(delay) => {}
                    }
                }
            }
        }
    }

    async fn connect(&self) -> Result<WsStream> {
        let endpoint = self.source.endpoint()?;
        let url = validate_endpoint(&endpoint)?;

        #[cfg(feature = "tracing")]
        tracing::info!(%url, "Connecting");

        let ws_config = WebSocketConfig::default()
            .max_message_size(self.config.max_message_size)
            .max_frame_size(self.config.max_message_size);

        let (ws_stream, _) = timeout(
            self.config.connect_timeout,
            connect_async_with_config(url.as_str(), Some(ws_config), false),
        )
        .await
        .map_err(|_e| WsError::Timeout(self.config.connect_timeout))?
        .map_err(WsError::Connect)?;

        Ok(ws_stream)
    }

    fn should_reconnect(&self, error: &Error) -> bool {
        match error.kind() {
            Kind::Connection => true,
            Kind::Timeout => self.config.reconnect_on_timeout,
            _ => false,
        }
    }

    /// Close and drop the current socket so the supervisor connects afresh.
    async fn force_reconnect(&self, socket: &mut Option<WsStream>, cause: &Error) {
        #[cfg(feature = "tracing")]
        tracing::warn!(error = %cause, "Socket seems broken, forcing reconnect");
        #[cfg(not(feature = "tracing"))]
        let _ = cause;

        if let Some(ws) = socket.take() {
            close_quietly(ws).await;
        }
        self.publish(ConnectionState::Disconnected);
    }

    /// Publish `state` unless the manager has already been stopped.
    fn publish(&self, state: ConnectionState) {
        self.state_tx.send_if_modified(|current| {
            if *current == ConnectionState::Stopped {
                return false;
            }
            *current = state;
            true
        });
    }
}

/// Holds the request lock for one exchange.
///
/// If the exchange future is dropped before it settles (for example by an
/// outer timeout), the reply may still be on the wire, so the socket is
/// discarded rather than handed to the next caller.
struct InFlight<'a> {
    socket: MutexGuard<'a, Option<WsStream>>,
    shared: &'a Shared,
    settled: bool,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if !self.settled && self.socket.take().is_some() {
            self.shared.publish(ConnectionState::Disconnected);

            #[cfg(feature = "tracing")]
            tracing::warn!("Request abandoned mid-exchange, discarding socket");
        }
    }
}

async fn exchange(ws: &mut WsStream, payload: &[u8], reply_timeout: Duration) -> Result<Vec<u8>> {
    ws.send(Message::binary(payload.to_vec()))
        .await
        .map_err(WsError::Connection)?;

    timeout(reply_timeout, next_reply(ws))
        .await
        .map_err(|_e| WsError::Timeout(reply_timeout))?
}

/// Read frames until one carries a reply body.
async fn next_reply(ws: &mut WsStream) -> Result<Vec<u8>> {
    loop {
        match ws.next().await {
            Some(Ok(Message::Text(text))) => return Ok(text.as_bytes().to_vec()),
            Some(Ok(Message::Binary(data))) => return Ok(data.to_vec()),
            Some(Ok(Message::Ping(_) | Message::Pong(_))) => {
                // Control frames; tungstenite answers pings on its own.
            }
            Some(Ok(Message::Close(_))) | None => return Err(WsError::ConnectionClosed.into()),
            Some(Ok(Message::Frame(_))) => {
                return Err(WsError::UnexpectedFrame("raw".to_owned()).into());
            }
            Some(Err(e)) => return Err(WsError::Connection(e).into()),
        }
    }
}

async fn close_quietly(mut ws: WsStream) {
    _ = timeout(CLOSE_TIMEOUT, ws.close(None)).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ws::config::{ReconnectConfig, RetryLimit};

    #[test]
    fn connected_is_not_terminal() {
        let state = ConnectionState::Connected {
            since: Instant::now(),
        };

        assert!(state.is_connected(), "connected");
        assert!(!state.is_terminal(), "connected is not terminal");
    }

    #[test]
    fn exhausted_and_stopped_are_terminal() {
        assert!(ConnectionState::Exhausted { attempts: 5 }.is_terminal(), "exhausted");
        assert!(ConnectionState::Stopped.is_terminal(), "stopped");
        assert!(!ConnectionState::Reconnecting { attempt: 1 }.is_terminal(), "reconnecting");
    }

    #[test]
    fn new_manager_is_idle() {
        let manager = ConnectionManager::new("ws://127.0.0.1:1/ws", Config::default());

        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert_eq!(manager.retry_count(), 0);
        assert!(!manager.is_stopped(), "not stopped before stop()");
    }

    #[tokio::test]
    async fn stop_before_start_is_terminal() {
        let manager = ConnectionManager::new("ws://127.0.0.1:1/ws", Config::default());

        manager.stop().await;
        manager.start();

        assert_eq!(manager.state(), ConnectionState::Stopped);
        assert!(manager.is_stopped(), "stopped");
    }

    #[tokio::test]
    async fn dropping_last_handle_cancels_supervisor() {
        let manager = ConnectionManager::new(
            "ws://127.0.0.1:1/ws",
            Config::builder()
                .reconnect(ReconnectConfig::fixed(
                    Duration::from_millis(10),
                    RetryLimit::Unlimited,
                ))
                .build(),
        );
        let shared = Arc::clone(&manager.inner);
        let clone = manager.clone();
        manager.start();

        drop(manager);
        assert!(!shared.stopping.is_cancelled(), "a live clone keeps the manager running");

        drop(clone);
        assert!(shared.stopping.is_cancelled(), "last handle should cancel the supervisor");

        let supervisor = shared
            .supervisor
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .unwrap();
        timeout(Duration::from_secs(1), supervisor)
            .await
            .expect("supervisor should exit after the last handle is dropped")
            .unwrap();
    }
}
