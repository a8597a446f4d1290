#![allow(
    clippy::unwrap_used,
    clippy::missing_panics_doc,
    reason = "Do not need additional syntax for setting up tests"
)]
#![allow(
    unused,
    reason = "Each test binary uses a different subset of these helpers"
)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use futures_util::{SinkExt as _, StreamExt as _};
use serde_json::json;
use tokio::net::TcpListener;
use tokio::time::{sleep, timeout};
use tokio_tungstenite::tungstenite::Message;
use wakeword_client::Client;
use wakeword_client::ws::ConnectionState;

/// Payload that makes the server close the connection instead of replying.
pub const CLOSE: &[u8] = b"close";
/// Payload that makes the server reply with something that is not JSON.
pub const GARBAGE: &[u8] = b"garbage";
/// Payload that the server never replies to.
pub const SILENT: &[u8] = b"silent";
/// Prefix that makes the server wait [`SLOW_REPLY_DELAY`] before replying.
pub const SLOW_PREFIX: &[u8] = b"slow";

pub const SLOW_REPLY_DELAY: Duration = Duration::from_millis(150);

/// What the server saw, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    Received { len: usize, at: Instant },
    Replied { len: usize, at: Instant },
}

/// Mock classification server.
///
/// Replies to every binary frame with `{"result": <payload length>}`, except
/// for the special payloads above. Frames are read as soon as they arrive and
/// replies are written from separate tasks, so a client that interleaved
/// requests would show up in [`MockWsServer::events`].
pub struct MockWsServer {
    addr: SocketAddr,
    connections: Arc<AtomicUsize>,
    events: Arc<Mutex<Vec<Event>>>,
}

impl MockWsServer {
    /// Start a mock WebSocket server on a random port.
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let connections = Arc::new(AtomicUsize::new(0));
        let events = Arc::new(Mutex::new(Vec::new()));

        let accepted = Arc::clone(&connections);
        let log = Arc::clone(&events);
        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };

                let Ok(ws_stream) = tokio_tungstenite::accept_async(stream).await else {
                    continue;
                };
                accepted.fetch_add(1, Ordering::SeqCst);

                let (write, mut read) = ws_stream.split();
                let write = Arc::new(tokio::sync::Mutex::new(write));
                let log = Arc::clone(&log);

                tokio::spawn(async move {
                    while let Some(Ok(msg)) = read.next().await {
                        let Message::Binary(data) = msg else {
                            continue;
                        };
                        let payload = data.to_vec();
                        log.lock().unwrap().push(Event::Received {
                            len: payload.len(),
                            at: Instant::now(),
                        });

                        if payload == CLOSE {
                            drop(write.lock().await.send(Message::Close(None)).await);
                            break;
                        }
                        if payload == SILENT {
                            continue;
                        }

                        let write = Arc::clone(&write);
                        let log = Arc::clone(&log);
                        tokio::spawn(async move {
                            if payload.starts_with(SLOW_PREFIX) {
                                sleep(SLOW_REPLY_DELAY).await;
                            }
                            let reply = if payload == GARBAGE {
                                "definitely not json".to_owned()
                            } else {
                                json!({ "result": payload.len() }).to_string()
                            };
                            let mut write = write.lock().await;
                            // Logged before writing so it always precedes the next request
                            log.lock().unwrap().push(Event::Replied {
                                len: payload.len(),
                                at: Instant::now(),
                            });
                            drop(write.send(Message::Text(reply.into())).await);
                        });
                    }
                });
            }
        });

        Self {
            addr,
            connections,
            events,
        }
    }

    pub fn ws_url(&self) -> String {
        format!("ws://{}/ws", self.addr)
    }

    /// Number of WebSocket handshakes the server has completed.
    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }
}

/// A `ws://` URL nobody is listening on.
pub async fn unreachable_url() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("ws://{addr}/ws")
}

/// Wait until the client's state satisfies `predicate`, failing after `within`.
pub async fn wait_for_state<F>(client: &Client, within: Duration, predicate: F) -> ConnectionState
where
    F: FnMut(&ConnectionState) -> bool,
{
    let mut state_rx = client.state_receiver();
    let state = timeout(within, state_rx.wait_for(predicate))
        .await
        .expect("timed out waiting for connection state")
        .unwrap();
    *state
}

pub fn init_tracing() {
    drop(
        tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init(),
    );
}
