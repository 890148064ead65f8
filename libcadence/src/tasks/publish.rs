//! Scheduled Publish Task
//!
//! Each cycle recovers abandoned claims, selects due posts, claims them one
//! by one, and publishes the claimed ones through a bounded worker pool.

use async_trait::async_trait;
use chrono::Utc;
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::db::Database;
use crate::error::Result;
use crate::platforms::{PublishRequest, PublishResult, Publisher};
use crate::retry::{RandomJitter, RetryPolicy};
use crate::tasks::reaper::StaleClaimReaper;
use crate::tasks::{settle_failure, shared_jitter, FailureOutcome, SharedJitter, Task};
use crate::types::{Checkback, ScheduledPost};

const DEFAULT_CONCURRENCY: usize = 4;
const DEFAULT_BATCH_SIZE: usize = 100;

/// Counts for one publish cycle
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PublishCycleReport {
    /// Abandoned claims recovered before selection
    pub reaped: usize,
    pub due: usize,
    pub published: usize,
    pub retrying: usize,
    pub failed: usize,
    /// Claimed by another worker first, or the claim was lost mid-flight
    pub skipped: usize,
    /// Posts whose row update failed
    pub errors: usize,
}

impl std::fmt::Display for PublishCycleReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "due={} published={} retrying={} failed={} skipped={} reaped={} errors={}",
            self.due,
            self.published,
            self.retrying,
            self.failed,
            self.skipped,
            self.reaped,
            self.errors
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PostOutcome {
    Published,
    Retrying,
    Failed,
    NotClaimed,
    ClaimLost,
    StoreError,
}

pub struct ScheduledPublishTask {
    db: Database,
    publisher: Arc<dyn Publisher>,
    policy: RetryPolicy,
    jitter: SharedJitter,
    stale_claim_timeout: Option<Duration>,
    concurrency: usize,
    batch_size: usize,
}

impl ScheduledPublishTask {
    pub fn new(db: Database, publisher: Arc<dyn Publisher>, policy: RetryPolicy) -> Self {
        Self {
            db,
            publisher,
            policy,
            jitter: shared_jitter(RandomJitter::from_entropy()),
            stale_claim_timeout: None,
            concurrency: DEFAULT_CONCURRENCY,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    pub fn with_jitter(mut self, jitter: SharedJitter) -> Self {
        self.jitter = jitter;
        self
    }

    /// Maximum publish calls in flight at once
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Maximum posts selected per cycle
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Reap claims older than `timeout` at the start of every cycle
    pub fn with_stale_claim_timeout(mut self, timeout: Duration) -> Self {
        self.stale_claim_timeout = Some(timeout);
        self
    }

    pub async fn run_cycle(&self) -> Result<PublishCycleReport> {
        self.run_cycle_at(Utc::now().timestamp()).await
    }

    pub async fn run_cycle_at(&self, now: i64) -> Result<PublishCycleReport> {
        let mut report = PublishCycleReport::default();

        if let Some(timeout) = self.stale_claim_timeout {
            let reaper = StaleClaimReaper::new(self.db.clone(), self.policy.clone(), timeout)
                .with_jitter(self.jitter.clone());
            match reaper.run_cycle_at(now).await {
                Ok(reaped) => report.reaped = reaped.recovered(),
                Err(e) => warn!("Stale claim recovery failed: {}", e),
            }
        }

        let due = self.db.due_posts(now, self.batch_size).await?;
        report.due = due.len();
        if due.is_empty() {
            debug!("No posts due");
            return Ok(report);
        }
        debug!(count = due.len(), "Posts due for publishing");

        let outcomes: Vec<PostOutcome> = stream::iter(due)
            .map(|post| self.process_post(post, now))
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        for outcome in outcomes {
            match outcome {
                PostOutcome::Published => report.published += 1,
                PostOutcome::Retrying => report.retrying += 1,
                PostOutcome::Failed => report.failed += 1,
                PostOutcome::NotClaimed | PostOutcome::ClaimLost => report.skipped += 1,
                PostOutcome::StoreError => report.errors += 1,
            }
        }

        Ok(report)
    }

    async fn process_post(&self, post: ScheduledPost, now: i64) -> PostOutcome {
        let post_id = post.id.clone();
        match self.try_process_post(post, now).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(post_id = %post_id, "Failed to record publish outcome: {}", e);
                PostOutcome::StoreError
            }
        }
    }

    async fn try_process_post(&self, post: ScheduledPost, now: i64) -> Result<PostOutcome> {
        let Some(claimed) = self.db.claim_post(&post.id, now).await? else {
            debug!(post_id = %post.id, "Post already claimed elsewhere");
            return Ok(PostOutcome::NotClaimed);
        };
        let claimed_at = claimed.claimed_at.unwrap_or(now);

        debug!(
            post_id = %claimed.id,
            platform = %claimed.platform,
            retry_count = claimed.retry_count,
            publisher = self.publisher.name(),
            "Publishing post"
        );

        match self.publisher.publish(&PublishRequest::from_post(&claimed)).await {
            PublishResult::Published { external_id } => {
                let first_checkback = Checkback::first().due_at(now);
                let applied = self
                    .db
                    .mark_published(&claimed.id, claimed_at, &external_id, now, first_checkback)
                    .await?;
                if applied {
                    info!(
                        post_id = %claimed.id,
                        platform = %claimed.platform,
                        external_post_id = %external_id,
                        retry_count = claimed.retry_count,
                        "Post published"
                    );
                    Ok(PostOutcome::Published)
                } else {
                    warn!(
                        post_id = %claimed.id,
                        external_post_id = %external_id,
                        "Published but claim was lost; row left to its new owner"
                    );
                    Ok(PostOutcome::ClaimLost)
                }
            }
            PublishResult::Failed(publish_error) => {
                let outcome = settle_failure(
                    &self.db,
                    &self.policy,
                    &self.jitter,
                    &claimed,
                    claimed_at,
                    &publish_error,
                    now,
                )
                .await?;
                Ok(match outcome {
                    FailureOutcome::Retrying => PostOutcome::Retrying,
                    FailureOutcome::Failed => PostOutcome::Failed,
                    FailureOutcome::ClaimLost => PostOutcome::ClaimLost,
                })
            }
        }
    }
}

#[async_trait]
impl Task for ScheduledPublishTask {
    fn name(&self) -> &str {
        "publish"
    }

    async fn tick(&self) -> Result<String> {
        Ok(self.run_cycle().await?.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PublishError;
    use crate::platforms::mock::MockPublisher;
    use crate::retry::ZeroJitter;
    use crate::types::{PostStatus, TargetPlatform};
    use tempfile::TempDir;

    const NOW: i64 = 1_760_443_200;

    async fn setup() -> (Database, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.db");
        let db = Database::new(db_path.to_str().unwrap()).await.unwrap();
        (db, temp_dir)
    }

    fn task(db: &Database, mock: &MockPublisher) -> ScheduledPublishTask {
        ScheduledPublishTask::new(
            db.clone(),
            Arc::new(mock.clone()),
            RetryPolicy {
                max_attempts: 3,
                ..Default::default()
            },
        )
        .with_jitter(shared_jitter(ZeroJitter))
    }

    async fn schedule(db: &Database, scheduled_at: i64) -> ScheduledPost {
        let post = ScheduledPost::new("hello".to_string(), TargetPlatform::Tiktok, scheduled_at);
        db.create_post(&post).await.unwrap();
        post
    }

    #[tokio::test]
    async fn test_empty_cycle() {
        let (db, _temp) = setup().await;
        let mock = MockPublisher::succeeding();
        let report = task(&db, &mock).run_cycle_at(NOW).await.unwrap();
        assert_eq!(report, PublishCycleReport::default());
        assert_eq!(mock.call_count(), 0);
    }

    #[tokio::test]
    async fn test_future_posts_are_left_alone() {
        let (db, _temp) = setup().await;
        let mock = MockPublisher::succeeding();
        let post = schedule(&db, NOW + 60).await;

        task(&db, &mock).run_cycle_at(NOW).await.unwrap();

        assert_eq!(mock.call_count(), 0);
        let stored = db.get_post(&post.id).await.unwrap().unwrap();
        assert_eq!(stored.status, PostStatus::Pending);
    }

    #[tokio::test]
    async fn test_transient_failure_schedules_retry() {
        let (db, _temp) = setup().await;
        let mock = MockPublisher::failing(PublishError::transient("connection reset"));
        let post = schedule(&db, NOW - 10).await;

        let report = task(&db, &mock).run_cycle_at(NOW).await.unwrap();
        assert_eq!(report.retrying, 1);

        let stored = db.get_post(&post.id).await.unwrap().unwrap();
        assert_eq!(stored.status, PostStatus::Retrying);
        assert_eq!(stored.retry_count, 1);
        assert_eq!(stored.next_retry_at, Some(NOW + 60));
        assert_eq!(stored.last_error.as_deref(), Some("transient: connection reset"));
        assert!(stored.claimed_at.is_none());
    }

    #[tokio::test]
    async fn test_retrying_post_waits_for_backoff() {
        let (db, _temp) = setup().await;
        let mock = MockPublisher::scripted(vec![PublishError::transient("503").into()]);
        let post = schedule(&db, NOW - 10).await;
        let task = task(&db, &mock);

        task.run_cycle_at(NOW).await.unwrap();
        task.run_cycle_at(NOW + 30).await.unwrap();
        assert_eq!(mock.call_count(), 1);

        task.run_cycle_at(NOW + 60).await.unwrap();
        assert_eq!(mock.call_count(), 2);
        let stored = db.get_post(&post.id).await.unwrap().unwrap();
        assert_eq!(stored.status, PostStatus::Published);
        assert_eq!(stored.retry_count, 1);
        assert_eq!(stored.published_at, Some(NOW + 60));
    }

    #[tokio::test]
    async fn test_not_implemented_fails_without_retry() {
        let (db, _temp) = setup().await;
        let mock = MockPublisher::failing(PublishError::not_implemented("pinterest"));
        let post = schedule(&db, NOW).await;

        let report = task(&db, &mock).run_cycle_at(NOW).await.unwrap();
        assert_eq!(report.failed, 1);

        let stored = db.get_post(&post.id).await.unwrap().unwrap();
        assert_eq!(stored.status, PostStatus::Failed);
        assert_eq!(stored.retry_count, 0);
    }

    #[tokio::test]
    async fn test_concurrency_bound_still_processes_everything() {
        let (db, _temp) = setup().await;
        let mock = MockPublisher::succeeding().with_delay(Duration::from_millis(10));
        for _ in 0..6 {
            schedule(&db, NOW - 1).await;
        }

        let report = task(&db, &mock)
            .with_concurrency(2)
            .run_cycle_at(NOW)
            .await
            .unwrap();
        assert_eq!(report.due, 6);
        assert_eq!(report.published, 6);
        assert_eq!(mock.call_count(), 6);
    }

    #[tokio::test]
    async fn test_batch_size_limits_selection() {
        let (db, _temp) = setup().await;
        let mock = MockPublisher::succeeding();
        for offset in 0..5 {
            schedule(&db, NOW - 100 + offset).await;
        }

        let report = task(&db, &mock)
            .with_batch_size(2)
            .run_cycle_at(NOW)
            .await
            .unwrap();
        assert_eq!(report.published, 2);
    }

    #[tokio::test]
    async fn test_report_display() {
        let report = PublishCycleReport {
            due: 3,
            published: 2,
            failed: 1,
            ..Default::default()
        };
        assert_eq!(
            report.to_string(),
            "due=3 published=2 retrying=0 failed=1 skipped=0 reaped=0 errors=0"
        );
    }
}
