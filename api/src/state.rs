use std::sync::Arc;

use common::db::DbPool;
use common::execution_log::ExecutionLogStore;
use common::queue::JobQueueStore;
use common::scheduler::ConnectorJobDispatcher;

/// Application state shared across all handlers
#[derive(Clone)]
pub struct AppState {
    pub queue: Arc<dyn JobQueueStore>,
    pub execution_logs: Arc<dyn ExecutionLogStore>,
    pub dispatcher: ConnectorJobDispatcher,
    /// Retry ceiling for jobs whose payload carries none
    pub default_max_retries: u32,
    pub db_pool: Option<DbPool>,
}

impl AppState {
    pub fn new(
        queue: Arc<dyn JobQueueStore>,
        execution_logs: Arc<dyn ExecutionLogStore>,
        dispatcher: ConnectorJobDispatcher,
        default_max_retries: u32,
    ) -> Self {
        Self {
            queue,
            execution_logs,
            dispatcher,
            default_max_retries,
            db_pool: None,
        }
    }

    pub fn with_db_pool(mut self, db_pool: DbPool) -> Self {
        self.db_pool = Some(db_pool);
        self
    }
}
