use std::time::Duration;

use hyper::body::Incoming;
use hyper::{Request, Response};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::{TokioExecutor, TokioTimer};

use crate::body::ProxyBody;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

pub const DEFAULT_MAX_IDLE_PER_HOST: usize = 10;
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(90);

#[derive(Debug)]
pub enum UpstreamError {
    /// Dial failed: connection refused, unreachable, or DNS resolution error.
    Connect(String),
    /// The per-request deadline elapsed before response headers arrived.
    Timeout,
    /// The connection died mid-exchange (EOF before headers, reset, protocol error).
    Io(String),
}

impl std::fmt::Display for UpstreamError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UpstreamError::Connect(err) => write!(f, "connect failed: {err}"),
            UpstreamError::Timeout => write!(f, "request deadline exceeded"),
            UpstreamError::Io(err) => write!(f, "upstream i/o failed: {err}"),
        }
    }
}

impl std::error::Error for UpstreamError {}

impl UpstreamError {
    /// All current variants count as transport failures for passive health.
    pub fn is_transport(&self) -> bool {
        true
    }

    pub fn class(&self) -> &'static str {
        match self {
            UpstreamError::Connect(_) => "connect",
            UpstreamError::Timeout => "timeout",
            UpstreamError::Io(_) => "io",
        }
    }
}

/// Keep-alive HTTP client owned by a single backend, pooled per origin.
#[derive(Debug)]
pub struct UpstreamClient {
    client: Client<HttpConnector, ProxyBody>,
}

impl UpstreamClient {
    pub fn new(max_idle_per_host: usize, idle_timeout: Duration) -> Self {
        let mut connector = HttpConnector::new();
        connector.enforce_http(false);
        connector.set_connect_timeout(Some(CONNECT_TIMEOUT));

        let client = Client::builder(TokioExecutor::new())
            .pool_max_idle_per_host(max_idle_per_host)
            .pool_idle_timeout(idle_timeout)
            .pool_timer(TokioTimer::new())
            .build(connector);

        Self { client }
    }

    /// Dispatches `req`, bounded by `deadline`. The legacy client never
    /// follows redirects, so backend redirects pass through to the caller.
    pub async fn send(
        &self,
        req: Request<ProxyBody>,
        deadline: Duration,
    ) -> Result<Response<Incoming>, UpstreamError> {
        match tokio::time::timeout(deadline, self.client.request(req)).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(err)) => Err(classify(err)),
            Err(_) => Err(UpstreamError::Timeout),
        }
    }
}

impl Default for UpstreamClient {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_IDLE_PER_HOST, DEFAULT_IDLE_TIMEOUT)
    }
}

fn classify(err: hyper_util::client::legacy::Error) -> UpstreamError {
    if err.is_connect() {
        UpstreamError::Connect(err.to_string())
    } else {
        UpstreamError::Io(err.to_string())
    }
}
