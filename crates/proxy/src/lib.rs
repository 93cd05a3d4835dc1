pub mod handler;
pub mod router;

pub use handler::ProxyHandler;
pub use router::{RouteMatch, Router};
