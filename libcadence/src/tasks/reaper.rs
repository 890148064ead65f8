//! Recovery of abandoned publish claims
//!
//! A worker that dies between claiming a post and recording the outcome leaves
//! the row in `publishing`. Once the claim is older than the timeout it is
//! treated as a transient failure and goes through the normal retry path.

use async_trait::async_trait;
use chrono::Utc;
use std::time::Duration;
use tracing::{error, info};

use crate::db::Database;
use crate::error::{PublishError, Result};
use crate::retry::{RandomJitter, RetryPolicy};
use crate::tasks::{settle_failure, shared_jitter, FailureOutcome, SharedJitter, Task};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReapReport {
    pub stale: usize,
    pub retrying: usize,
    pub failed: usize,
    /// Finished by their original worker while being reaped
    pub claim_lost: usize,
    pub errors: usize,
}

impl ReapReport {
    pub fn recovered(&self) -> usize {
        self.retrying + self.failed
    }
}

impl std::fmt::Display for ReapReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "stale={} retrying={} failed={} claim_lost={} errors={}",
            self.stale, self.retrying, self.failed, self.claim_lost, self.errors
        )
    }
}

pub struct StaleClaimReaper {
    db: Database,
    policy: RetryPolicy,
    jitter: SharedJitter,
    timeout: Duration,
}

impl StaleClaimReaper {
    pub fn new(db: Database, policy: RetryPolicy, timeout: Duration) -> Self {
        Self {
            db,
            policy,
            jitter: shared_jitter(RandomJitter::from_entropy()),
            timeout,
        }
    }

    pub fn with_jitter(mut self, jitter: SharedJitter) -> Self {
        self.jitter = jitter;
        self
    }

    pub async fn run_cycle(&self) -> Result<ReapReport> {
        self.run_cycle_at(Utc::now().timestamp()).await
    }

    pub async fn run_cycle_at(&self, now: i64) -> Result<ReapReport> {
        let timeout = i64::try_from(self.timeout.as_secs()).unwrap_or(i64::MAX);
        let stale = self.db.stale_claims(now.saturating_sub(timeout)).await?;

        let mut report = ReapReport {
            stale: stale.len(),
            ..Default::default()
        };

        for post in stale {
            let Some(claimed_at) = post.claimed_at else {
                continue;
            };
            let abandoned = PublishError::transient(format!(
                "publish attempt abandoned (claim stale since {})",
                claimed_at
            ));

            let outcome = settle_failure(
                &self.db,
                &self.policy,
                &self.jitter,
                &post,
                claimed_at,
                &abandoned,
                now,
            )
            .await;
            match outcome {
                Ok(FailureOutcome::Retrying) => report.retrying += 1,
                Ok(FailureOutcome::Failed) => report.failed += 1,
                Ok(FailureOutcome::ClaimLost) => report.claim_lost += 1,
                Err(e) => {
                    error!(post_id = %post.id, "Failed to recover stale claim: {}", e);
                    report.errors += 1;
                }
            }
        }

        if report.stale > 0 {
            info!(
                stale = report.stale,
                recovered = report.recovered(),
                "Recovered abandoned publish claims"
            );
        }
        Ok(report)
    }
}

#[async_trait]
impl Task for StaleClaimReaper {
    fn name(&self) -> &str {
        "reaper"
    }

    async fn tick(&self) -> Result<String> {
        Ok(self.run_cycle().await?.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::ZeroJitter;
    use crate::types::{PostStatus, ScheduledPost, TargetPlatform};
    use tempfile::TempDir;

    const NOW: i64 = 1_760_443_200;
    const TIMEOUT: Duration = Duration::from_secs(1800);

    async fn setup() -> (Database, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.db");
        let db = Database::new(db_path.to_str().unwrap()).await.unwrap();
        (db, temp_dir)
    }

    fn reaper(db: &Database, max_attempts: u32) -> StaleClaimReaper {
        StaleClaimReaper::new(
            db.clone(),
            RetryPolicy {
                max_attempts,
                ..Default::default()
            },
            TIMEOUT,
        )
        .with_jitter(shared_jitter(ZeroJitter))
    }

    async fn claimed_post(db: &Database, claimed_at: i64) -> ScheduledPost {
        let post = ScheduledPost::new("x".to_string(), TargetPlatform::Youtube, claimed_at - 10);
        db.create_post(&post).await.unwrap();
        db.claim_post(&post.id, claimed_at).await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn test_fresh_claims_are_not_touched() {
        let (db, _temp) = setup().await;
        let post = claimed_post(&db, NOW - 60).await;

        let report = reaper(&db, 5).run_cycle_at(NOW).await.unwrap();
        assert_eq!(report.stale, 0);

        let stored = db.get_post(&post.id).await.unwrap().unwrap();
        assert_eq!(stored.status, PostStatus::Publishing);
    }

    #[tokio::test]
    async fn test_stale_claim_becomes_retrying() {
        let (db, _temp) = setup().await;
        let claimed_at = NOW - 3600;
        let post = claimed_post(&db, claimed_at).await;

        let report = reaper(&db, 5).run_cycle_at(NOW).await.unwrap();
        assert_eq!(report.stale, 1);
        assert_eq!(report.retrying, 1);

        let stored = db.get_post(&post.id).await.unwrap().unwrap();
        assert_eq!(stored.status, PostStatus::Retrying);
        assert_eq!(stored.retry_count, 1);
        assert_eq!(stored.next_retry_at, Some(NOW + 60));
        assert!(stored.claimed_at.is_none());
        assert!(stored
            .last_error
            .unwrap()
            .contains(&format!("claim stale since {}", claimed_at)));
    }

    #[tokio::test]
    async fn test_stale_claim_on_last_attempt_fails() {
        let (db, _temp) = setup().await;
        let post = claimed_post(&db, NOW - 3600).await;

        let report = reaper(&db, 1).run_cycle_at(NOW).await.unwrap();
        assert_eq!(report.failed, 1);

        let stored = db.get_post(&post.id).await.unwrap().unwrap();
        assert_eq!(stored.status, PostStatus::Failed);
        assert_eq!(stored.retry_count, 1);
    }

    #[tokio::test]
    async fn test_late_worker_cannot_overwrite_reaped_row() {
        let (db, _temp) = setup().await;
        let claimed_at = NOW - 3600;
        let post = claimed_post(&db, claimed_at).await;

        reaper(&db, 5).run_cycle_at(NOW).await.unwrap();

        let applied = db
            .mark_published(&post.id, claimed_at, "late-ext", NOW + 1, NOW + 3601)
            .await
            .unwrap();
        assert!(!applied);
        let stored = db.get_post(&post.id).await.unwrap().unwrap();
        assert_eq!(stored.status, PostStatus::Retrying);
        assert!(stored.external_post_id.is_none());
    }
}
