//! Real-time propagation of ledger changes to connected dashboards.

pub mod broadcaster;
pub mod events;

pub use broadcaster::{Broadcaster, Delivery, Observer};
pub use events::{Published, PushEvent};
