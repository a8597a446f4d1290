//! Core traits for the connection's collaborators.

use serde::de::DeserializeOwned;
use url::Url;

use super::config::ReconnectConfig;
use super::error::WsError;

/// Supplies the endpoint to connect to.
///
/// Consulted once per connection attempt, so an implementation backed by a
/// live settings store lets a changed URL take effect on the next reconnect.
///
/// # Example
///
/// ```ignore
/// let source = || Ok::<_, Error>(settings.read().wake_url.clone());
/// let client = Client::with_source(source, Config::default());
/// ```
pub trait EndpointSource: Send + Sync + 'static {
    /// Current endpoint URL.
    fn endpoint(&self) -> crate::Result<String>;

    /// Replacement reconnection parameters, re-read before each attempt.
    ///
    /// `None` keeps the values the client was constructed with.
    fn reconnect(&self) -> Option<ReconnectConfig> {
        None
    }
}

impl EndpointSource for String {
    fn endpoint(&self) -> crate::Result<String> {
        Ok(self.clone())
    }
}

impl EndpointSource for &'static str {
    fn endpoint(&self) -> crate::Result<String> {
        Ok((*self).to_owned())
    }
}

impl<F> EndpointSource for F
where
    F: Fn() -> crate::Result<String> + Send + Sync + 'static,
{
    fn endpoint(&self) -> crate::Result<String> {
        self()
    }
}

/// Parses a reply frame into a value.
///
/// Implementations decide what counts as well-formed; failures surface to the
/// caller as [`crate::error::Kind::MalformedResponse`].
pub trait ResponseParser<M: DeserializeOwned>: Send + Sync + 'static {
    fn parse(&self, bytes: &[u8]) -> crate::Result<M>;
}

/// Checks that `endpoint` is an absolute `ws://` or `wss://` URL.
pub(crate) fn validate_endpoint(endpoint: &str) -> crate::Result<Url> {
    let url = Url::parse(endpoint)?;
    match url.scheme() {
        "ws" | "wss" if url.host().is_some() => Ok(url),
        "ws" | "wss" => Err(WsError::InvalidEndpoint(format!("{endpoint} has no host")).into()),
        scheme => Err(WsError::InvalidEndpoint(format!(
            "unsupported scheme `{scheme}` in {endpoint}"
        ))
        .into()),
    }
}
