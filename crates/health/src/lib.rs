pub mod checker;
pub mod state;

pub use checker::Checker;
pub use state::{HealthState, Transition};
