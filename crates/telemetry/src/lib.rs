pub mod metrics;
pub mod server;

pub use metrics::Metrics;
pub use server::MetricsServer;
