//! Metrics Collector Task
//!
//! Captures engagement counters for published posts at fixed offsets after
//! publication (1h, 6h, 24h, 72h, 168h). Each post carries a cursor,
//! `next_checkback_at`, pointing at its earliest unvisited offset. A tick
//! captures at most one offset per post, so a post that fell behind catches
//! up in order over consecutive ticks.
//!
//! Snapshots are unique per (post, offset); a duplicate insert is a no-op. A
//! failed fetch leaves the cursor where it is and the offset is tried again
//! next tick.

use async_trait::async_trait;
use chrono::Utc;
use futures::stream::{self, StreamExt};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::analytics::AnalyticsFetcher;
use crate::db::Database;
use crate::error::Result;
use crate::tasks::Task;
use crate::types::{Checkback, MetricsSnapshot, ScheduledPost};

const DEFAULT_CONCURRENCY: usize = 4;
const DEFAULT_BATCH_SIZE: usize = 200;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricsCycleReport {
    pub due: usize,
    pub captured: usize,
    /// Already captured by a concurrent collector
    pub duplicates: usize,
    pub fetch_failed: usize,
    /// Posts whose last offset has now been captured
    pub completed: usize,
    pub errors: usize,
}

impl std::fmt::Display for MetricsCycleReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "due={} captured={} duplicates={} fetch_failed={} completed={} errors={}",
            self.due, self.captured, self.duplicates, self.fetch_failed, self.completed, self.errors
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CheckbackOutcome {
    Captured { completed: bool },
    Duplicate { completed: bool },
    FetchFailed,
    /// Cursor was ahead of or behind the stored snapshots and has been corrected
    Realigned,
    StoreError,
}

pub struct MetricsCollectorTask {
    db: Database,
    fetcher: Arc<dyn AnalyticsFetcher>,
    concurrency: usize,
    batch_size: usize,
}

impl MetricsCollectorTask {
    pub fn new(db: Database, fetcher: Arc<dyn AnalyticsFetcher>) -> Self {
        Self {
            db,
            fetcher,
            concurrency: DEFAULT_CONCURRENCY,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub async fn run_cycle(&self) -> Result<MetricsCycleReport> {
        self.run_cycle_at(Utc::now().timestamp()).await
    }

    pub async fn run_cycle_at(&self, now: i64) -> Result<MetricsCycleReport> {
        let due = self.db.checkbacks_due(now, self.batch_size).await?;
        let mut report = MetricsCycleReport {
            due: due.len(),
            ..Default::default()
        };
        if due.is_empty() {
            return Ok(report);
        }

        let outcomes: Vec<CheckbackOutcome> = stream::iter(due)
            .map(|post| self.collect(post, now))
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        for outcome in outcomes {
            match outcome {
                CheckbackOutcome::Captured { completed } => {
                    report.captured += 1;
                    report.completed += usize::from(completed);
                }
                CheckbackOutcome::Duplicate { completed } => {
                    report.duplicates += 1;
                    report.completed += usize::from(completed);
                }
                CheckbackOutcome::FetchFailed => report.fetch_failed += 1,
                CheckbackOutcome::Realigned => {}
                CheckbackOutcome::StoreError => report.errors += 1,
            }
        }

        Ok(report)
    }

    async fn collect(&self, post: ScheduledPost, now: i64) -> CheckbackOutcome {
        let post_id = post.id.clone();
        match self.try_collect(post, now).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(post_id = %post_id, "Failed to record metrics checkback: {}", e);
                CheckbackOutcome::StoreError
            }
        }
    }

    async fn try_collect(&self, post: ScheduledPost, now: i64) -> Result<CheckbackOutcome> {
        let (Some(published_at), Some(external_id)) =
            (post.published_at, post.external_post_id.as_deref())
        else {
            warn!(post_id = %post.id, "Published post lacks publication data; clearing checkbacks");
            self.db.set_next_checkback(&post.id, None, now).await?;
            return Ok(CheckbackOutcome::Realigned);
        };

        let visited: BTreeSet<Checkback> = self
            .db
            .snapshots_for_post(&post.id)
            .await?
            .into_iter()
            .map(|s| s.checkback)
            .collect();

        let Some(checkback) = next_unvisited(&visited, None) else {
            self.db.set_next_checkback(&post.id, None, now).await?;
            return Ok(CheckbackOutcome::Realigned);
        };

        let due_at = checkback.due_at(published_at);
        if due_at > now {
            self.db.set_next_checkback(&post.id, Some(due_at), now).await?;
            return Ok(CheckbackOutcome::Realigned);
        }

        let report = match self.fetcher.fetch(external_id, post.platform).await {
            Ok(report) => report,
            Err(e) => {
                warn!(
                    post_id = %post.id,
                    platform = %post.platform,
                    checkback = checkback.label(),
                    "Analytics fetch failed: {}",
                    e
                );
                return Ok(CheckbackOutcome::FetchFailed);
            }
        };

        let snapshot = MetricsSnapshot::new(
            post.id.clone(),
            checkback,
            report.observed_at.unwrap_or(now),
            report.metrics,
        );
        let inserted = self.db.insert_snapshot(&snapshot).await?;

        let following = next_unvisited(&visited, Some(checkback));
        self.db
            .set_next_checkback(&post.id, following.map(|c| c.due_at(published_at)), now)
            .await?;
        let completed = following.is_none();

        if inserted {
            info!(
                post_id = %post.id,
                platform = %post.platform,
                checkback = checkback.label(),
                views = report.metrics.views,
                likes = report.metrics.likes,
                "Metrics snapshot captured"
            );
            Ok(CheckbackOutcome::Captured { completed })
        } else {
            debug!(post_id = %post.id, checkback = checkback.label(), "Snapshot already present");
            Ok(CheckbackOutcome::Duplicate { completed })
        }
    }
}

/// Earliest offset not in `visited`, strictly after `after` when given
fn next_unvisited(visited: &BTreeSet<Checkback>, after: Option<Checkback>) -> Option<Checkback> {
    Checkback::ALL
        .into_iter()
        .filter(|c| after.map_or(true, |a| *c > a))
        .find(|c| !visited.contains(c))
}

#[async_trait]
impl Task for MetricsCollectorTask {
    fn name(&self) -> &str {
        "metrics"
    }

    async fn tick(&self) -> Result<String> {
        Ok(self.run_cycle().await?.to_string())
    }
}
