use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use tokio::sync::watch;

use crate::Result;
use crate::types::{Classification, JsonParser};
use crate::ws::config::Config;
use crate::ws::connection::ConnectionState;
use crate::ws::{ConnectionManager, EndpointSource};

/// Reply timeout used by [`Client::classify_default`].
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(3);

/// Endpoint of a wake-word service running on the local host.
pub const DEFAULT_ENDPOINT: &str = "ws://127.0.0.1:8001/ws";

/// Client for a remote wake-word classification service.
///
/// Keeps one WebSocket connection open in the background, reconnecting as
/// configured, and funnels every [`Client::classify`] call through it one at a
/// time.
///
/// # Examples
///
/// ```rust, no_run
/// use std::time::Duration;
///
/// use wakeword_client::Client;
/// use wakeword_client::ws::config::Config;
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     let client = Client::new("ws://10.10.10.124:8001/ws", Config::default());
///     client.start();
///
///     let audio = vec![0_u8; 2560];
///     let scores = client.classify(&audio, Duration::from_secs(3)).await?;
///     println!("{scores:?}");
///
///     client.stop().await;
///     Ok(())
/// }
/// ```
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    /// Stops its supervisor once the last client handle is dropped
    connection: ConnectionManager,
}

impl Default for Client {
    fn default() -> Self {
        Self::new(DEFAULT_ENDPOINT, Config::default())
    }
}

impl Client {
    /// Create a client for a fixed `endpoint`.
    #[must_use]
    pub fn new(endpoint: &str, config: Config) -> Self {
        Self::with_source(endpoint.to_owned(), config)
    }

    /// Create a client that asks `source` for the endpoint before every
    /// connection attempt.
    #[must_use]
    pub fn with_source<S: EndpointSource>(source: S, config: Config) -> Self {
        Self {
            inner: Arc::new(ClientInner {
                connection: ConnectionManager::new(source, config),
            }),
        }
    }

    /// Begin connecting in the background. Returns immediately.
    ///
    /// Calling this while a supervisor is already running does nothing.
    pub fn start(&self) {
        self.inner.connection.start();
    }

    /// Classify one chunk of audio.
    ///
    /// Waits for a connection (or fails fast, per
    /// [`WaitPolicy`](crate::ws::config::WaitPolicy)), sends `payload` as one
    /// binary frame, and waits up to `timeout` for the JSON reply.
    ///
    /// # Errors
    ///
    /// - [`Kind::Validation`](crate::error::Kind::Validation) for an empty payload
    /// - [`Kind::Connection`](crate::error::Kind::Connection) when the socket
    ///   fails mid-request; the client reconnects in the background
    /// - [`Kind::Timeout`](crate::error::Kind::Timeout) when no reply arrives in time
    /// - [`Kind::MalformedResponse`](crate::error::Kind::MalformedResponse) when
    ///   the reply is not a JSON object
    /// - [`Kind::RetryBudgetExhausted`](crate::error::Kind::RetryBudgetExhausted)
    ///   or [`Kind::Stopped`](crate::error::Kind::Stopped) when no connection
    ///   will ever become available
    pub async fn classify(&self, payload: &[u8], timeout: Duration) -> Result<Classification> {
        self.classify_as(payload, timeout).await
    }

    /// [`Client::classify`] with [`DEFAULT_REQUEST_TIMEOUT`].
    pub async fn classify_default(&self, payload: &[u8]) -> Result<Classification> {
        self.classify(payload, DEFAULT_REQUEST_TIMEOUT).await
    }

    /// Like [`Client::classify`], decoding the reply into `T`.
    pub async fn classify_as<T: DeserializeOwned>(
        &self,
        payload: &[u8],
        timeout: Duration,
    ) -> Result<T> {
        self.inner
            .connection
            .request(payload, timeout, &JsonParser)
            .await
    }

    /// Shut the client down. Safe to call more than once.
    pub async fn stop(&self) {
        self.inner.connection.stop().await;
    }

    /// Get the current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.inner.connection.state()
    }

    /// Subscribe to connection state changes.
    #[must_use]
    pub fn state_receiver(&self) -> watch::Receiver<ConnectionState> {
        self.inner.connection.state_receiver()
    }

    /// Consecutive failed connection attempts since the last success.
    #[must_use]
    pub fn retry_count(&self) -> u32 {
        self.inner.connection.retry_count()
    }

    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.inner.connection.is_stopped()
    }
}

#[cfg(test)]
mod tests {
    use tokio::time::timeout;

    use super::*;
    use crate::error::Kind;
    use crate::ws::config::{ReconnectConfig, RetryLimit};

    #[tokio::test]
    async fn empty_payload_is_rejected_without_waiting() {
        let client = Client::default();

        let err = client
            .classify(&[], Duration::from_millis(10))
            .await
            .unwrap_err();

        assert_eq!(err.kind(), Kind::Validation);
    }

    #[tokio::test]
    async fn dropping_last_handle_shuts_supervisor_down() {
        let config = Config::builder()
            .reconnect(ReconnectConfig::fixed(
                Duration::from_millis(10),
                RetryLimit::Unlimited,
            ))
            .build();
        let client = Client::new("ws://127.0.0.1:1/ws", config);
        let clone = client.clone();
        let mut state_rx = client.state_receiver();
        client.start();

        drop(client);
        assert!(!clone.is_stopped(), "a live clone keeps the client running");

        drop(clone);
        // The channel closes once the supervisor exits and releases the sender
        timeout(Duration::from_secs(1), async {
            while state_rx.changed().await.is_ok() {}
        })
        .await
        .expect("supervisor should exit after the last handle is dropped");
    }

    #[tokio::test]
    async fn stopped_client_rejects_requests() {
        let client = Client::default();
        client.stop().await;

        let err = client
            .classify(b"abc", Duration::from_millis(10))
            .await
            .unwrap_err();

        assert_eq!(err.kind(), Kind::Stopped);
    }
}
