//! Timetable — registered time-scheduled jobs.
//!
//! Applications can ask to be staged at a start time, on a recurring
//! interval, or both (start the recurrence at the given time). Each
//! registration owns one background task; cancelling a job aborts it.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::error::{SchedulerError, SchedulerResult};

/// A listable scheduled-job entry.
#[derive(Debug, Clone, Serialize)]
pub struct ScheduledTask {
    pub id: u64,
    pub name: String,
    pub start_time: String,
    pub time_schedule: String,
}

type JobFn = Arc<dyn Fn() -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

struct Job {
    task: ScheduledTask,
    handle: JoinHandle<()>,
}

/// Registry of time-scheduled jobs.
#[derive(Default)]
pub struct Timetable {
    jobs: Mutex<HashMap<u64, Job>>,
    next_id: AtomicU64,
}

impl Timetable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a job. With only a start time the job runs once; with only
    /// an interval it runs on every interval tick; with both, the
    /// recurrence begins at the start time.
    pub fn register(
        &self,
        name: &str,
        start_time: Option<DateTime<Utc>>,
        every: Option<Duration>,
        job: JobFn,
    ) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let task = ScheduledTask {
            id,
            name: name.to_string(),
            start_time: start_time.map(|t| t.to_rfc3339()).unwrap_or_default(),
            time_schedule: every.map(format_interval).unwrap_or_default(),
        };

        let handle = tokio::spawn(async move {
            if let Some(start) = start_time {
                let delay = (start - Utc::now()).to_std().unwrap_or(Duration::ZERO);
                tokio::time::sleep(delay).await;
                if every.is_none() {
                    job().await;
                    return;
                }
            }

            if let Some(interval) = every {
                loop {
                    tokio::time::sleep(interval).await;
                    job().await;
                }
            }
        });

        info!(id, name, "scheduled job registered");
        self.jobs
            .lock()
            .expect("timetable poisoned")
            .insert(id, Job { task, handle });
        id
    }

    /// Cancel a job by id, aborting its background task.
    pub fn cancel(&self, id: u64) -> bool {
        match self.jobs.lock().expect("timetable poisoned").remove(&id) {
            Some(job) => {
                job.handle.abort();
                debug!(id, "scheduled job cancelled");
                true
            }
            None => false,
        }
    }

    /// Every registered job, in id order.
    pub fn entries(&self) -> Vec<ScheduledTask> {
        let jobs = self.jobs.lock().expect("timetable poisoned");
        let mut tasks: Vec<_> = jobs.values().map(|j| j.task.clone()).collect();
        tasks.sort_by_key(|t| t.id);
        tasks
    }
}

/// Parse an RFC 3339 start time.
pub fn parse_start_time(value: &str) -> SchedulerResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|_| SchedulerError::InvalidStartTime(value.to_string()))
}

/// Parse an interval like `90s`, `15m` or `2h`.
pub fn parse_interval(value: &str) -> SchedulerResult<Duration> {
    let value = value.trim();
    let err = || SchedulerError::InvalidTimeSchedule(value.to_string());

    let (number, unit) = value.split_at(value.len().saturating_sub(1));
    let amount: u64 = number.parse().map_err(|_| err())?;
    if amount == 0 {
        return Err(err());
    }

    match unit {
        "s" => Ok(Duration::from_secs(amount)),
        "m" => Ok(Duration::from_secs(amount * 60)),
        "h" => Ok(Duration::from_secs(amount * 3600)),
        _ => Err(err()),
    }
}

fn format_interval(interval: Duration) -> String {
    let secs = interval.as_secs();
    if secs % 3600 == 0 {
        format!("{}h", secs / 3600)
    } else if secs % 60 == 0 {
        format!("{}m", secs / 60)
    } else {
        format!("{secs}s")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counter_job(counter: Arc<AtomicUsize>) -> JobFn {
        Arc::new(move || {
            let counter = counter.clone();
            Box::pin(async move {
                counter.fetch_add(1, Ordering::SeqCst);
            })
        })
    }

    #[test]
    fn parse_interval_accepts_units() {
        assert_eq!(parse_interval("90s").unwrap(), Duration::from_secs(90));
        assert_eq!(parse_interval("15m").unwrap(), Duration::from_secs(900));
        assert_eq!(parse_interval("2h").unwrap(), Duration::from_secs(7200));

        assert!(parse_interval("").is_err());
        assert!(parse_interval("10").is_err());
        assert!(parse_interval("0s").is_err());
        assert!(parse_interval("tens").is_err());
    }

    #[test]
    fn parse_start_time_requires_rfc3339() {
        assert!(parse_start_time("2026-08-01T10:00:00Z").is_ok());
        assert!(parse_start_time("tomorrow").is_err());
    }

    #[test]
    fn format_interval_round_trips() {
        for value in ["45s", "5m", "3h"] {
            assert_eq!(format_interval(parse_interval(value).unwrap()), value);
        }
    }

    #[tokio::test]
    async fn recurring_job_fires_until_cancelled() {
        let timetable = Timetable::new();
        let counter = Arc::new(AtomicUsize::new(0));

        let id = timetable.register(
            "tick",
            None,
            Some(Duration::from_millis(10)),
            counter_job(counter.clone()),
        );

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(counter.load(Ordering::SeqCst) >= 2);

        assert!(timetable.cancel(id));
        let after_cancel = counter.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(counter.load(Ordering::SeqCst), after_cancel);
    }

    #[tokio::test]
    async fn start_only_job_fires_once() {
        let timetable = Timetable::new();
        let counter = Arc::new(AtomicUsize::new(0));

        timetable.register(
            "once",
            Some(Utc::now()),
            None,
            counter_job(counter.clone()),
        );

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn entries_list_and_cancel() {
        let timetable = Timetable::new();
        let counter = Arc::new(AtomicUsize::new(0));

        let first = timetable.register(
            "a",
            None,
            Some(Duration::from_secs(3600)),
            counter_job(counter.clone()),
        );
        let second = timetable.register(
            "b",
            None,
            Some(Duration::from_secs(3600)),
            counter_job(counter),
        );

        let entries = timetable.entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].id, first);
        assert_eq!(entries[0].name, "a");
        assert_eq!(entries[1].time_schedule, "1h");

        assert!(timetable.cancel(second));
        assert!(!timetable.cancel(second));
        assert_eq!(timetable.entries().len(), 1);
    }
}
