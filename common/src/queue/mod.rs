// Job queue: durable store, handler registry and the polling processor

pub mod memory;
pub mod processor;
pub mod registry;
pub mod store;

pub use memory::InMemoryJobQueueStore;
pub use processor::{
    CleanupSummary, ProcessorConfig, QueueProcessor, TickOutcome, TickSummary,
};
pub use registry::{HandlerRegistry, JobHandler};
pub use store::{JobFilter, JobQueueStore, DEFAULT_RETRY_DELAY};
