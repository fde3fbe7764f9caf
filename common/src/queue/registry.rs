// Job handler registry keyed by job name

use crate::models::QueueJob;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

/// Executes one claimed job. An error fails the job and lets the processor apply retry policy.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, job: &QueueJob) -> anyhow::Result<()>;
}

/// Handlers the processor dispatches to, one per job name
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn JobHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `name`, replacing any previous registration
    pub fn register(mut self, name: impl Into<String>, handler: Arc<dyn JobHandler>) -> Self {
        let name = name.into();
        tracing::debug!(job_name = %name, "Registered job handler");
        self.handlers.insert(name, handler);
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn JobHandler>> {
        self.handlers.get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.keys().cloned().collect();
        names.sort();
        names
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("handlers", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Noop;

    #[async_trait]
    impl JobHandler for Noop {
        async fn handle(&self, _job: &QueueJob) -> anyhow::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_lookup_by_name() {
        let registry = HandlerRegistry::new()
            .register("connector.import", Arc::new(Noop))
            .register("connector.export", Arc::new(Noop));

        assert!(registry.get("connector.import").is_some());
        assert!(registry.get("connector.unknown").is_none());
        assert_eq!(
            registry.names(),
            vec!["connector.export".to_string(), "connector.import".to_string()]
        );
    }
}
