// Property-based tests for the job queue state machine

use chrono::{Duration as ChronoDuration, Utc};
use common::models::{JobStatus, NewJob, Pagination};
use common::queue::{InMemoryJobQueueStore, JobFilter, JobQueueStore};
use proptest::prelude::*;
use std::collections::HashSet;
use std::time::Duration;

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

fn new_job(offset_seconds: i64) -> NewJob {
    NewJob {
        name: "connector.import".to_string(),
        payload: serde_json::json!({"connectorId": 1}),
        scheduled_at: Utc::now() - ChronoDuration::seconds(offset_seconds),
        entry_user_id: 1,
    }
}

#[derive(Debug, Clone)]
enum Op {
    Claim,
    Finish,
    Fail,
    Retry(u32),
    Cancel,
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        Just(Op::Claim),
        Just(Op::Finish),
        Just(Op::Fail),
        (0u32..4).prop_map(Op::Retry),
        Just(Op::Cancel),
    ]
}

fn allowed(from: JobStatus, to: JobStatus) -> bool {
    use JobStatus::*;
    from == to
        || matches!(
            (from, to),
            (Pending, Processing)
                | (Processing, Finished)
                | (Processing, Failed)
                | (Failed, Pending)
                | (Pending, Cancelled)
                | (Processing, Cancelled)
        )
}

/// *For any* sequence of queue operations, a job only moves along the
/// documented transitions, attempts never decrease, and terminal states stay terminal.
#[test]
fn property_status_transitions_follow_state_machine() {
    proptest!(|(ops in prop::collection::vec(op(), 1..30))| {
        runtime().block_on(async {
            let store = InMemoryJobQueueStore::with_retry_delay(Duration::ZERO);
            let id = store.create_job(new_job(1)).await.unwrap().id;
            let mut previous = store.find_one(id).await.unwrap();

            for op in &ops {
                // Errors are the invalid-transition signal, not a state change
                let _ = match op {
                    Op::Claim => store.mark_as_processing(id).await.map(|_| ()),
                    Op::Finish => store.mark_as_finished(id).await.map(|_| ()),
                    Op::Fail => store.mark_as_failed(id, "boom").await.map(|_| ()),
                    Op::Retry(max) => store.retry_job(id, *max).await.map(|_| ()),
                    Op::Cancel => store.cancel_job(id).await.map(|_| ()),
                };

                let current = store.find_one(id).await.unwrap();
                prop_assert!(
                    allowed(previous.status, current.status),
                    "{:?} -> {:?} via {:?}", previous.status, current.status, op
                );
                prop_assert!(current.attempts >= previous.attempts);
                if matches!(previous.status, JobStatus::Finished | JobStatus::Cancelled) {
                    prop_assert_eq!(current.status, previous.status);
                }
                previous = current;
            }
            Ok(())
        })?;
    });
}

/// *For any* retry ceiling M ≥ 1, a job that always fails is attempted exactly M times.
#[test]
fn property_retry_ceiling_bounds_attempts() {
    proptest!(|(max_retries in 1u32..8)| {
        runtime().block_on(async {
            let store = InMemoryJobQueueStore::with_retry_delay(Duration::ZERO);
            let id = store.create_job(new_job(1)).await.unwrap().id;

            let mut runs = 0;
            loop {
                prop_assert!(store.mark_as_processing(id).await.unwrap());
                prop_assert!(store.mark_as_failed(id, "unreachable").await.unwrap());
                runs += 1;
                if !store.retry_job(id, max_retries).await.unwrap() {
                    break;
                }
                prop_assert!(runs <= max_retries);
            }

            let job = store.find_one(id).await.unwrap();
            prop_assert_eq!(runs, max_retries);
            prop_assert_eq!(job.attempts, max_retries as i32);
            prop_assert_eq!(job.status, JobStatus::Failed);
            Ok(())
        })?;
    });
}

/// *For any* set of due jobs, polling returns them oldest `scheduledAt` first,
/// and a second claim of the same job always loses.
#[test]
fn property_pending_jobs_are_ordered_and_claimed_once() {
    proptest!(|(offsets in prop::collection::vec(1i64..10_000, 1..20))| {
        runtime().block_on(async {
            let store = InMemoryJobQueueStore::new();
            for offset in &offsets {
                store.create_job(new_job(*offset)).await.unwrap();
            }

            let pending = store.get_pending_jobs(100).await.unwrap();
            prop_assert_eq!(pending.len(), offsets.len());
            for pair in pending.windows(2) {
                prop_assert!(pair[0].scheduled_at <= pair[1].scheduled_at);
            }

            for job in &pending {
                prop_assert!(store.mark_as_processing(job.id).await.unwrap());
                prop_assert!(!store.mark_as_processing(job.id).await.unwrap());
            }
            prop_assert!(store.get_pending_jobs(100).await.unwrap().is_empty());
            Ok(())
        })?;
    });
}

/// *For any* page size, walking the pages visits every job exactly once.
#[test]
fn property_pages_partition_the_job_list() {
    proptest!(|(count in 0usize..40, page_size in 1u32..15)| {
        runtime().block_on(async {
            let store = InMemoryJobQueueStore::new();
            for i in 0..count {
                store.create_job(new_job(i as i64)).await.unwrap();
            }

            let total = store.count(&JobFilter::default()).await.unwrap();
            prop_assert_eq!(total, count as u64);

            let mut seen = HashSet::new();
            let mut page = 1;
            loop {
                let filter = JobFilter {
                    pagination: Pagination::new(Some(page), Some(page_size)),
                    ..Default::default()
                };
                let jobs = store.find_all(&filter).await.unwrap();
                if jobs.is_empty() {
                    break;
                }
                prop_assert!(jobs.len() <= page_size as usize);
                for job in jobs {
                    prop_assert!(seen.insert(job.id), "job {} listed twice", job.id);
                }
                page += 1;
            }
            prop_assert_eq!(seen.len(), count);
            Ok(())
        })?;
    });
}
