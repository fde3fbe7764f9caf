// Postgres implementations of the queue, execution log and connector stores

pub mod connector;
pub mod execution_log;
pub mod job_queue;
pub mod queries;

pub use connector::PgConnectorRepository;
pub use execution_log::PgExecutionLogStore;
pub use job_queue::PgJobQueueStore;
