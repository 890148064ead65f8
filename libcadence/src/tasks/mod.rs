//! Background tasks driven by the [`Scheduler`](crate::scheduler::Scheduler)
//!
//! Each task runs one bounded cycle per tick. Cycles take `now` explicitly
//! through `run_cycle_at`; `run_cycle` uses the wall clock. Per-post failures
//! never abort a cycle: they become row updates and log events. Only store
//! errors on the cycle's own selection query surface as `Err`.

use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

use crate::db::Database;
use crate::error::{PublishError, Result};
use crate::retry::{JitterSource, RetryDecision, RetryPolicy};
use crate::types::ScheduledPost;

pub mod metrics;
pub mod publish;
pub mod reaper;

pub use metrics::{MetricsCollectorTask, MetricsCycleReport};
pub use publish::{PublishCycleReport, ScheduledPublishTask};
pub use reaper::{ReapReport, StaleClaimReaper};

/// Jitter source shared by the publish task and its reaper
pub type SharedJitter = Arc<Mutex<Box<dyn JitterSource>>>;

pub fn shared_jitter(source: impl JitterSource + 'static) -> SharedJitter {
    Arc::new(Mutex::new(Box::new(source)))
}

/// A unit of periodic work
#[async_trait]
pub trait Task: Send + Sync {
    fn name(&self) -> &str;

    /// Run one cycle against the wall clock. Returns a one-line summary for the log.
    async fn tick(&self) -> Result<String>;
}

/// Where a failed attempt left the post
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureOutcome {
    Retrying,
    Failed,
    /// The claim was no longer ours; the row was left alone
    ClaimLost,
}

/// Apply the retry policy to a failed attempt on a claimed post.
///
/// Used by the publish task for publisher failures and by the reaper for
/// abandoned claims, so both take the same path to `retrying` or `failed`.
pub(crate) async fn settle_failure(
    db: &Database,
    policy: &RetryPolicy,
    jitter: &SharedJitter,
    post: &ScheduledPost,
    claimed_at: i64,
    error: &PublishError,
    now: i64,
) -> Result<FailureOutcome> {
    let decision = {
        let mut source = jitter.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        policy.decide(post.retry_count, error, now, &mut **source)
    };
    let last_error = error.to_string();

    let (applied, outcome) = match decision {
        RetryDecision::Retry {
            retry_count,
            next_retry_at,
        } => {
            let applied = db
                .mark_retrying(&post.id, claimed_at, retry_count, next_retry_at, &last_error, now)
                .await?;
            if applied {
                info!(
                    post_id = %post.id,
                    platform = %post.platform,
                    retry_count,
                    next_retry_at,
                    classification = %error.classification,
                    "Publish attempt failed, retry scheduled"
                );
            }
            (applied, FailureOutcome::Retrying)
        }
        RetryDecision::Exhausted { retry_count } => {
            let applied = db
                .mark_failed(&post.id, claimed_at, retry_count, &last_error, now)
                .await?;
            if applied {
                warn!(
                    post_id = %post.id,
                    platform = %post.platform,
                    retry_count,
                    classification = %error.classification,
                    "Retry budget exhausted, post failed: {}",
                    error.message
                );
            }
            (applied, FailureOutcome::Failed)
        }
        RetryDecision::GiveUp => {
            let applied = db
                .mark_failed(&post.id, claimed_at, post.retry_count, &last_error, now)
                .await?;
            if applied {
                warn!(
                    post_id = %post.id,
                    platform = %post.platform,
                    retry_count = post.retry_count,
                    classification = %error.classification,
                    "Post failed permanently: {}",
                    error.message
                );
            }
            (applied, FailureOutcome::Failed)
        }
    };

    if applied {
        Ok(outcome)
    } else {
        warn!(post_id = %post.id, "Claim lost before failure could be recorded");
        Ok(FailureOutcome::ClaimLost)
    }
}
