pub mod fallback;
pub mod quic_listener;

pub use fallback::FallbackListener;
pub use quic_listener::QuicListener;

#[derive(Debug)]
pub enum ListenerError {
    /// Certificate or key could not be loaded or was rejected.
    Tls(String),
    /// The socket could not be bound.
    Bind(String),
    /// A listener parameter was out of range.
    Config(String),
}

impl std::fmt::Display for ListenerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ListenerError::Tls(err) => write!(f, "TLS setup failed: {err}"),
            ListenerError::Bind(err) => write!(f, "bind failed: {err}"),
            ListenerError::Config(err) => write!(f, "listener config invalid: {err}"),
        }
    }
}

impl std::error::Error for ListenerError {}
