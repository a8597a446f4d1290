//! Core WebSocket infrastructure.
//!
//! This module provides a single-connection request/response transport that
//! keeps itself connected in the background.
//!
//! # Architecture
//!
//! - [`ConnectionManager`]: Owns the socket, runs the reconnection supervisor,
//!   and serializes request/response exchanges
//! - [`EndpointSource`]: Trait supplying the endpoint (and optionally the
//!   reconnection policy) before every connection attempt
//! - [`ResponseParser`]: Trait for decoding a reply frame
//!
//! # Example
//!
//! ```rust, no_run
//! use std::time::Duration;
//!
//! use wakeword_client::types::{Classification, JsonParser};
//! use wakeword_client::ws::ConnectionManager;
//! use wakeword_client::ws::config::Config;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let connection = ConnectionManager::new("ws://127.0.0.1:8001/ws", Config::default());
//!     connection.start();
//!
//!     let audio = vec![0_u8; 2560];
//!     let reply: Classification = connection
//!         .request(&audio, Duration::from_secs(3), &JsonParser::default())
//!         .await?;
//!     println!("{reply:?}");
//!
//!     connection.stop().await;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod connection;
pub mod error;
pub mod traits;

pub use connection::{ConnectionManager, ConnectionState};
#[expect(
    clippy::module_name_repetitions,
    reason = "WsError includes module name for clarity when used outside this module"
)]
pub use error::WsError;
pub use traits::*;
