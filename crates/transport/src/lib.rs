pub mod body;
pub mod upstream;

pub use body::{empty, full, BoxError, ProxyBody};
pub use upstream::{UpstreamClient, UpstreamError};
