// Scheduler module: connector timers, job dispatch and lifecycle events

pub mod dispatch;
pub mod engine;
pub mod events;

pub use dispatch::ConnectorJobDispatcher;
pub use engine::ConnectorScheduler;
pub use events::{listen_for_events, ConnectorEvent};
