//! Wall-clock job scheduler.
//!
//! Each job gets its own task: sleep until the next local fire time, run,
//! then derive the next fire time again from the clock. Different jobs run in
//! parallel; one job never overlaps itself.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::{DateTime, Datelike, Duration, FixedOffset, NaiveDate, NaiveTime, Utc, Weekday};
use serde_json::json;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::{
    config::SchedulerConfig,
    store::{Filter, Store, StoreError, rpc, tables},
    trending::TrendingScorer,
    utils::time::format_timestamp,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cadence {
    Daily { at: NaiveTime },
    Weekly { weekday: Weekday, at: NaiveTime },
}

fn at_local(date: NaiveDate, time: NaiveTime, offset: FixedOffset) -> DateTime<FixedOffset> {
    let utc = date.and_time(time) - Duration::seconds(offset.local_minus_utc() as i64);
    DateTime::from_naive_utc_and_offset(utc, offset)
}

/// First fire time strictly after `now`, in `now`'s offset.
pub fn next_fire(now: DateTime<FixedOffset>, cadence: Cadence) -> DateTime<FixedOffset> {
    let offset = *now.offset();
    let today = now.date_naive();
    match cadence {
        Cadence::Daily { at } => {
            let candidate = at_local(today, at, offset);
            if candidate > now {
                candidate
            } else {
                candidate + Duration::days(1)
            }
        }
        Cadence::Weekly { weekday, at } => {
            let ahead = (7 + weekday.num_days_from_monday() as i64
                - today.weekday().num_days_from_monday() as i64)
                % 7;
            let candidate = at_local(today + Duration::days(ahead), at, offset);
            if candidate > now {
                candidate
            } else {
                candidate + Duration::days(7)
            }
        }
    }
}

#[async_trait]
pub trait Job: Send + Sync {
    fn name(&self) -> &'static str;
    fn cadence(&self) -> Cadence;
    async fn run(&self, cancel: &CancellationToken) -> Result<(), StoreError>;
}

pub struct TrendingJob {
    scorer: TrendingScorer,
    at: NaiveTime,
}

impl TrendingJob {
    pub fn new(scorer: TrendingScorer, at: NaiveTime) -> Self {
        Self { scorer, at }
    }
}

#[async_trait]
impl Job for TrendingJob {
    fn name(&self) -> &'static str {
        "trending"
    }

    fn cadence(&self) -> Cadence {
        Cadence::Daily { at: self.at }
    }

    async fn run(&self, cancel: &CancellationToken) -> Result<(), StoreError> {
        let rescored = self.scorer.recompute(cancel).await?;
        info!(job = self.name(), rescored = ?rescored, "Hashtag scores recomputed");
        Ok(())
    }
}

/// Deletes read notifications past the retention window.
pub struct NotificationCleanupJob {
    store: Arc<dyn Store>,
    retention_days: i64,
    at: NaiveTime,
}

impl NotificationCleanupJob {
    pub fn new(store: Arc<dyn Store>, retention_days: i64, at: NaiveTime) -> Self {
        Self {
            store,
            retention_days,
            at,
        }
    }
}

#[async_trait]
impl Job for NotificationCleanupJob {
    fn name(&self) -> &'static str {
        "notification_cleanup"
    }

    fn cadence(&self) -> Cadence {
        Cadence::Daily { at: self.at }
    }

    async fn run(&self, cancel: &CancellationToken) -> Result<(), StoreError> {
        let cutoff = Utc::now() - Duration::days(self.retention_days);
        let filter = Filter::new()
            .is_bool("is_read", true)
            .lt("created_at", format_timestamp(&cutoff));
        let removed = self.store.delete(tables::NOTIFICATIONS, &filter, cancel).await?;
        info!(job = self.name(), removed = removed.len(), "Old notifications removed");
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DigestPeriod {
    Daily,
    Weekly,
}

impl DigestPeriod {
    pub fn as_str(&self) -> &'static str {
        match self {
            DigestPeriod::Daily => "daily",
            DigestPeriod::Weekly => "weekly",
        }
    }
}

/// Asks the store to queue digest emails; delivery happens elsewhere.
pub struct DigestJob {
    store: Arc<dyn Store>,
    period: DigestPeriod,
    at: NaiveTime,
}

impl DigestJob {
    pub fn new(store: Arc<dyn Store>, period: DigestPeriod, at: NaiveTime) -> Self {
        Self { store, period, at }
    }
}

#[async_trait]
impl Job for DigestJob {
    fn name(&self) -> &'static str {
        match self.period {
            DigestPeriod::Daily => "daily_digest",
            DigestPeriod::Weekly => "weekly_digest",
        }
    }

    fn cadence(&self) -> Cadence {
        match self.period {
            DigestPeriod::Daily => Cadence::Daily { at: self.at },
            DigestPeriod::Weekly => Cadence::Weekly {
                weekday: Weekday::Mon,
                at: self.at,
            },
        }
    }

    async fn run(&self, cancel: &CancellationToken) -> Result<(), StoreError> {
        let args = json!({ "period": self.period.as_str() });
        let queued = self.store.rpc(rpc::QUEUE_EMAIL_DIGESTS, args, cancel).await?;
        info!(job = self.name(), queued = %queued, "Digests queued");
        Ok(())
    }
}

pub struct Scheduler {
    jobs: Vec<Arc<dyn Job>>,
    offset: FixedOffset,
}

impl Scheduler {
    pub fn new(offset: FixedOffset) -> Self {
        Self {
            jobs: Vec::new(),
            offset,
        }
    }

    /// Cleanup, trending, and the daily and weekly digests at their
    /// configured local times.
    pub fn standard(
        config: &SchedulerConfig,
        offset: FixedOffset,
        store: Arc<dyn Store>,
        scorer: TrendingScorer,
    ) -> Self {
        Self::new(offset)
            .with_job(Arc::new(NotificationCleanupJob::new(
                store.clone(),
                config.notification_retention_days,
                config.cleanup_at,
            )))
            .with_job(Arc::new(TrendingJob::new(scorer, config.trending_at)))
            .with_job(Arc::new(DigestJob::new(
                store.clone(),
                DigestPeriod::Daily,
                config.digest_at,
            )))
            .with_job(Arc::new(DigestJob::new(store, DigestPeriod::Weekly, config.digest_at)))
    }

    pub fn with_job(mut self, job: Arc<dyn Job>) -> Self {
        self.jobs.push(job);
        self
    }

    /// Starts one task per job. Cancelling `cancel` stops them at their next
    /// wakeup and aborts a run in progress.
    pub fn spawn(self, cancel: CancellationToken) -> Vec<JoinHandle<()>> {
        self.jobs
            .into_iter()
            .map(|job| tokio::spawn(run_job(job, self.offset, cancel.clone())))
            .collect()
    }
}

async fn run_job(job: Arc<dyn Job>, offset: FixedOffset, cancel: CancellationToken) {
    loop {
        let now = Utc::now().with_timezone(&offset);
        let next = next_fire(now, job.cadence());
        let wait = (next - now).to_std().unwrap_or_default();
        info!(job = job.name(), next = %next, "Job scheduled");

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(wait) => {}
        }

        let started = Instant::now();
        info!(job = job.name(), "Job started");
        match job.run(&cancel).await {
            Ok(()) => info!(
                job = job.name(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Job finished"
            ),
            Err(StoreError::Cancelled) => break,
            Err(e) => error!(
                job = job.name(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                error = %e,
                "Job failed"
            ),
        }
    }
    info!(job = job.name(), "Job stopped");
}
