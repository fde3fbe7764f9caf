// Common library for shared code across scheduler, worker, and API

pub mod config;
pub mod connector;
pub mod crypto;
pub mod db;
pub mod errors;
pub mod execution_log;
pub mod models;
pub mod queue;
pub mod schedule;
pub mod scheduler;
pub mod telemetry;
pub mod transport;
