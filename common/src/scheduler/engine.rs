// Connector scheduler: one cron timer task per enabled connector

use super::dispatch::ConnectorJobDispatcher;
use super::events::ConnectorEvent;
use crate::errors::{ConnectorError, ScheduleError};
use crate::schedule::ConnectorSchedule;
use chrono::Utc;
use chrono_tz::Tz;
use std::collections::HashMap;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{error, info, instrument, warn};

const TIMER_PREFIX: &str = "connector-";

/// Registry of live connector timers keyed by `connector-<id>`
pub struct ConnectorScheduler {
    dispatcher: ConnectorJobDispatcher,
    timezone: Tz,
    timers: Mutex<HashMap<String, JoinHandle<()>>>,
}

impl ConnectorScheduler {
    pub fn new(dispatcher: ConnectorJobDispatcher, timezone: Tz) -> Self {
        Self {
            dispatcher,
            timezone,
            timers: Mutex::new(HashMap::new()),
        }
    }

    pub fn timer_name(connector_id: i64) -> String {
        format!("{}{}", TIMER_PREFIX, connector_id)
    }

    pub fn dispatcher(&self) -> &ConnectorJobDispatcher {
        &self.dispatcher
    }

    /// Register timers for every enabled connector, returning how many were registered
    #[instrument(skip(self))]
    pub async fn initialize(&self) -> Result<usize, ConnectorError> {
        let connectors = self.dispatcher.connectors().find_enabled_connectors().await?;
        let mut registered = 0;
        for connector in &connectors {
            if self
                .add_schedule(connector.id, &connector.cron_schedule)
                .await
                .is_ok()
            {
                registered += 1;
            }
        }
        info!(
            registered,
            enabled = connectors.len(),
            "Connector schedules initialized"
        );
        Ok(registered)
    }

    /// Replace the connector's timer with one for `cron_expression`
    ///
    /// An unparseable expression is logged and leaves the connector without a timer.
    #[instrument(skip(self))]
    pub async fn add_schedule(
        &self,
        connector_id: i64,
        cron_expression: &str,
    ) -> Result<(), ScheduleError> {
        let name = Self::timer_name(connector_id);
        let mut timers = self.timers.lock().await;
        if let Some(existing) = timers.remove(&name) {
            existing.abort();
        }

        let schedule = ConnectorSchedule::parse(cron_expression, self.timezone).map_err(|e| {
            error!(timer = %name, error = %e, "Failed to schedule connector");
            e
        })?;

        let dispatcher = self.dispatcher.clone();
        let handle = tokio::spawn(run_timer(dispatcher, connector_id, schedule));
        timers.insert(name.clone(), handle);
        info!(timer = %name, cron = %cron_expression, timezone = %self.timezone, "Connector scheduled");
        Ok(())
    }

    /// Cancel the connector's timer; returns false when none was registered
    pub async fn remove_schedule(&self, connector_id: i64) -> bool {
        let name = Self::timer_name(connector_id);
        match self.timers.lock().await.remove(&name) {
            Some(handle) => {
                handle.abort();
                info!(timer = %name, "Connector schedule removed");
                true
            }
            None => false,
        }
    }

    /// Cancel every connector timer
    pub async fn clear_schedules(&self) -> usize {
        let mut timers = self.timers.lock().await;
        let names: Vec<String> = timers
            .keys()
            .filter(|name| name.starts_with(TIMER_PREFIX))
            .cloned()
            .collect();
        for name in &names {
            if let Some(handle) = timers.remove(name) {
                handle.abort();
            }
        }
        info!(removed = names.len(), "Connector schedules cleared");
        names.len()
    }

    /// Apply a connector lifecycle event
    #[instrument(skip(self))]
    pub async fn handle_event(&self, event: ConnectorEvent) {
        match event {
            ConnectorEvent::Created { connector_id } => {
                self.reschedule(connector_id).await;
            }
            ConnectorEvent::Updated { connector_id } => {
                self.remove_schedule(connector_id).await;
                self.reschedule(connector_id).await;
            }
            ConnectorEvent::Deleted {
                connector_id: Some(connector_id),
            } => {
                self.remove_schedule(connector_id).await;
            }
            ConnectorEvent::Deleted { connector_id: None } => {
                self.clear_schedules().await;
            }
        }
    }

    async fn reschedule(&self, connector_id: i64) {
        match self.dispatcher.connectors().find_connector(connector_id).await {
            Ok(connector) if connector.disabled => {
                info!(connector_id, "Connector disabled, not scheduling");
            }
            Ok(connector) => {
                // failures are already logged by add_schedule
                let _ = self
                    .add_schedule(connector.id, &connector.cron_schedule)
                    .await;
            }
            Err(e) => {
                warn!(connector_id, error = %e, "Failed to load connector for scheduling");
            }
        }
    }

    /// Names of the registered timers, sorted
    pub async fn active_schedules(&self) -> Vec<String> {
        let mut names: Vec<String> = self.timers.lock().await.keys().cloned().collect();
        names.sort();
        names
    }

    /// Abort every timer
    pub async fn shutdown(&self) {
        let mut timers = self.timers.lock().await;
        for (_, handle) in timers.drain() {
            handle.abort();
        }
        info!("Connector scheduler stopped");
    }
}

/// Fire `on_fire` at each cron occurrence until aborted
async fn run_timer(dispatcher: ConnectorJobDispatcher, connector_id: i64, schedule: ConnectorSchedule) {
    let mut reference = Utc::now();
    loop {
        let next = match schedule.next_after(reference) {
            Ok(next) => next,
            Err(e) => {
                error!(connector_id, error = %e, "Connector schedule has no further occurrences");
                return;
            }
        };
        let delay = (next - Utc::now()).to_std().unwrap_or_default();
        tokio::time::sleep(delay).await;

        match dispatcher.on_fire(connector_id).await {
            Ok(Some(job)) => {
                info!(connector_id, job_id = job.id, "Connector timer fired");
            }
            Ok(None) => {}
            Err(e) => {
                error!(connector_id, error = %e, "Connector timer failed to enqueue job");
            }
        }
        reference = std::cmp::max(Utc::now(), next);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connector::InMemoryConnectorSource;
    use crate::models::{
        ConnectorParameters, ConnectorSpecification, ConnectorType, Protocol, TriggerSource,
    };
    use crate::queue::InMemoryJobQueueStore;
    use std::sync::Arc;
    use std::time::Duration;

    fn connector(id: i64, cron: &str, disabled: bool) -> ConnectorSpecification {
        ConnectorSpecification {
            id,
            name: format!("connector {}", id),
            connector_type: ConnectorType::Import,
            protocol: Protocol::Ftp,
            host_name: "example.org".to_string(),
            port: None,
            username: "obs".to_string(),
            password: "pw".to_string(),
            timeout: 10,
            maximum_retries: 2,
            cron_schedule: cron.to_string(),
            disabled,
            entry_user_id: 1,
            parameters: ConnectorParameters::default(),
        }
    }

    fn scheduler() -> (
        ConnectorScheduler,
        Arc<InMemoryConnectorSource>,
        Arc<InMemoryJobQueueStore>,
    ) {
        let source = Arc::new(InMemoryConnectorSource::new());
        let queue = Arc::new(InMemoryJobQueueStore::new());
        let dispatcher = ConnectorJobDispatcher::new(source.clone(), queue.clone());
        (
            ConnectorScheduler::new(dispatcher, chrono_tz::UTC),
            source,
            queue,
        )
    }

    #[tokio::test]
    async fn test_add_twice_keeps_one_timer() {
        let (scheduler, _, _) = scheduler();
        scheduler.add_schedule(7, "0 2 * * *").await.unwrap();
        scheduler.add_schedule(7, "*/5 * * * *").await.unwrap();
        assert_eq!(scheduler.active_schedules().await, vec!["connector-7"]);

        assert!(scheduler.remove_schedule(7).await);
        scheduler.add_schedule(7, "0 2 * * *").await.unwrap();
        assert_eq!(scheduler.active_schedules().await.len(), 1);
        scheduler.shutdown().await;
    }

    #[tokio::test]
    async fn test_bad_cron_leaves_no_timer() {
        let (scheduler, _, _) = scheduler();
        scheduler.add_schedule(7, "0 2 * * *").await.unwrap();
        assert!(scheduler.add_schedule(7, "not a cron").await.is_err());
        assert!(scheduler.active_schedules().await.is_empty());
        assert!(!scheduler.remove_schedule(7).await);
    }

    #[tokio::test]
    async fn test_initialize_skips_disabled_and_invalid() {
        let (scheduler, source, _) = scheduler();
        source.upsert(connector(1, "0 2 * * *", false)).await;
        source.upsert(connector(2, "0 2 * * *", true)).await;
        source.upsert(connector(3, "61 * * * *", false)).await;
        source.upsert(connector(10, "0 0 * * 0", false)).await;

        assert_eq!(scheduler.initialize().await.unwrap(), 2);
        assert_eq!(
            scheduler.active_schedules().await,
            vec!["connector-1", "connector-10"]
        );
        scheduler.shutdown().await;
        assert!(scheduler.active_schedules().await.is_empty());
    }

    #[tokio::test]
    async fn test_lifecycle_events() {
        let (scheduler, source, _) = scheduler();
        source.upsert(connector(1, "0 2 * * *", false)).await;
        source.upsert(connector(2, "0 3 * * *", false)).await;

        scheduler
            .handle_event(ConnectorEvent::Created { connector_id: 1 })
            .await;
        scheduler
            .handle_event(ConnectorEvent::Created { connector_id: 2 })
            .await;
        assert_eq!(scheduler.active_schedules().await.len(), 2);

        source.upsert(connector(1, "0 2 * * *", true)).await;
        scheduler
            .handle_event(ConnectorEvent::Updated { connector_id: 1 })
            .await;
        assert_eq!(scheduler.active_schedules().await, vec!["connector-2"]);

        scheduler
            .handle_event(ConnectorEvent::Created { connector_id: 99 })
            .await;
        assert_eq!(scheduler.active_schedules().await.len(), 1);

        scheduler
            .handle_event(ConnectorEvent::Deleted { connector_id: None })
            .await;
        assert!(scheduler.active_schedules().await.is_empty());
    }

    #[tokio::test]
    async fn test_timer_enqueues_when_fired() {
        let (scheduler, source, queue) = scheduler();
        source.upsert(connector(5, "* * * * * *", false)).await;
        scheduler.add_schedule(5, "* * * * * *").await.unwrap();

        let mut jobs = Vec::new();
        for _ in 0..30 {
            tokio::time::sleep(Duration::from_millis(100)).await;
            jobs = queue.all_jobs().await;
            if !jobs.is_empty() {
                break;
            }
        }
        scheduler.shutdown().await;

        assert!(!jobs.is_empty());
        let payload: crate::models::ConnectorJobPayload =
            serde_json::from_value(jobs[0].payload.clone()).unwrap();
        assert_eq!(payload.connector_id, 5);
        assert_eq!(payload.triggered_by, TriggerSource::Schedule);
    }

    #[tokio::test]
    async fn test_disabled_at_fire_time_skips() {
        let (scheduler, source, queue) = scheduler();
        source.upsert(connector(5, "* * * * * *", true)).await;
        scheduler.add_schedule(5, "* * * * * *").await.unwrap();
        tokio::time::sleep(Duration::from_millis(1500)).await;
        scheduler.shutdown().await;
        assert!(queue.all_jobs().await.is_empty());
    }
}
