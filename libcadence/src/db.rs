//! Post Store: SQLite persistence for scheduled posts and metrics snapshots
//!
//! Every status transition out of `publishing` is conditioned on the claim the
//! caller holds (`status = 'publishing' AND claimed_at = ?`), so a worker whose
//! claim was reaped can never overwrite the reaper's decision, and vice versa.

use sqlx::sqlite::{SqlitePool, SqliteRow};
use sqlx::Row;
use std::collections::BTreeMap;
use std::path::Path;

use crate::error::{DbError, Result};
use crate::types::{
    Checkback, MetricValues, MetricsSnapshot, PostStatus, ScheduledPost, TargetPlatform,
};

const POST_COLUMNS: &str = "id, content, media_urls, platform, scheduled_at, status, \
     external_post_id, retry_count, next_retry_at, last_error, claimed_at, \
     published_at, next_checkback_at, created_at, updated_at";

#[derive(Clone, Debug)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Open (creating if needed) the database at `db_path` and run migrations
    pub async fn new(db_path: &str) -> Result<Self> {
        let expanded_path = shellexpand::tilde(db_path).to_string();
        let path = Path::new(&expanded_path);

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(DbError::IoError)?;
        }

        // mode=rwc creates the file on first open
        let db_url = format!("sqlite://{}?mode=rwc", expanded_path.replace('\\', "/"));

        let pool = SqlitePool::connect(&db_url)
            .await
            .map_err(DbError::SqlxError)?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(DbError::MigrationError)?;

        Ok(Self { pool })
    }

    pub async fn create_post(&self, post: &ScheduledPost) -> Result<()> {
        let media_urls = serde_json::to_string(&post.media_urls).map_err(|e| DbError::CorruptRow {
            table: "scheduled_posts",
            reason: format!("media_urls not serializable: {}", e),
        })?;

        sqlx::query(
            r#"
            INSERT INTO scheduled_posts (
                id, content, media_urls, platform, scheduled_at, status,
                external_post_id, retry_count, next_retry_at, last_error, claimed_at,
                published_at, next_checkback_at, created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&post.id)
        .bind(&post.content)
        .bind(media_urls)
        .bind(post.platform.as_str())
        .bind(post.scheduled_at)
        .bind(post.status.as_str())
        .bind(&post.external_post_id)
        .bind(i64::from(post.retry_count))
        .bind(post.next_retry_at)
        .bind(&post.last_error)
        .bind(post.claimed_at)
        .bind(post.published_at)
        .bind(post.next_checkback_at)
        .bind(post.created_at)
        .bind(post.updated_at)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(())
    }

    pub async fn get_post(&self, post_id: &str) -> Result<Option<ScheduledPost>> {
        let query = format!("SELECT {} FROM scheduled_posts WHERE id = ?", POST_COLUMNS);
        let row = sqlx::query(&query)
            .bind(post_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;

        row.as_ref().map(post_from_row).transpose()
    }

    /// Posts ordered by scheduled time, optionally filtered by status
    pub async fn list_posts(
        &self,
        status: Option<PostStatus>,
        limit: usize,
    ) -> Result<Vec<ScheduledPost>> {
        let query = format!(
            r#"
            SELECT {} FROM scheduled_posts
            WHERE (?1 IS NULL OR status = ?1)
            ORDER BY scheduled_at ASC, created_at ASC
            LIMIT ?2
            "#,
            POST_COLUMNS
        );
        let rows = sqlx::query(&query)
            .bind(status.map(|s| s.as_str()))
            .bind(limit_param(limit))
            .fetch_all(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;

        rows.iter().map(post_from_row).collect()
    }

    /// Candidates for a publish cycle.
    ///
    /// `pending` posts are due at `scheduled_at`, `retrying` posts at `next_retry_at`.
    /// Selection does not claim; callers must still go through [`Database::claim_post`].
    pub async fn due_posts(&self, now: i64, limit: usize) -> Result<Vec<ScheduledPost>> {
        let query = format!(
            r#"
            SELECT {} FROM scheduled_posts
            WHERE (status = 'pending' AND scheduled_at <= ?1)
               OR (status = 'retrying' AND next_retry_at <= ?1)
            ORDER BY COALESCE(next_retry_at, scheduled_at) ASC
            LIMIT ?2
            "#,
            POST_COLUMNS
        );
        let rows = sqlx::query(&query)
            .bind(now)
            .bind(limit_param(limit))
            .fetch_all(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;

        rows.iter().map(post_from_row).collect()
    }

    /// Atomically move a due post from `pending`/`retrying` to `publishing`.
    ///
    /// The due condition is re-checked in the same statement, so a post that was
    /// moved back into backoff after selection is left alone. Returns `None` when
    /// another worker already holds the post or it is no longer due.
    pub async fn claim_post(&self, post_id: &str, now: i64) -> Result<Option<ScheduledPost>> {
        let query = format!(
            r#"
            UPDATE scheduled_posts
            SET status = 'publishing', claimed_at = ?1, updated_at = ?1
            WHERE id = ?2
              AND ((status = 'pending' AND scheduled_at <= ?1)
                OR (status = 'retrying' AND next_retry_at <= ?1))
            RETURNING {}
            "#,
            POST_COLUMNS
        );
        let row = sqlx::query(&query)
            .bind(now)
            .bind(post_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;

        row.as_ref().map(post_from_row).transpose()
    }

    /// `publishing -> published`. Returns `false` if the claim was lost.
    pub async fn mark_published(
        &self,
        post_id: &str,
        claimed_at: i64,
        external_post_id: &str,
        now: i64,
        next_checkback_at: i64,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE scheduled_posts
            SET status = 'published', external_post_id = ?, last_error = NULL,
                next_retry_at = NULL, claimed_at = NULL, published_at = ?,
                next_checkback_at = ?, updated_at = ?
            WHERE id = ? AND status = 'publishing' AND claimed_at = ?
            "#,
        )
        .bind(external_post_id)
        .bind(now)
        .bind(next_checkback_at)
        .bind(now)
        .bind(post_id)
        .bind(claimed_at)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(result.rows_affected() == 1)
    }

    /// `publishing -> retrying`. Returns `false` if the claim was lost.
    pub async fn mark_retrying(
        &self,
        post_id: &str,
        claimed_at: i64,
        retry_count: u32,
        next_retry_at: i64,
        last_error: &str,
        now: i64,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE scheduled_posts
            SET status = 'retrying', retry_count = ?, next_retry_at = ?,
                last_error = ?, claimed_at = NULL, updated_at = ?
            WHERE id = ? AND status = 'publishing' AND claimed_at = ?
            "#,
        )
        .bind(i64::from(retry_count))
        .bind(next_retry_at)
        .bind(last_error)
        .bind(now)
        .bind(post_id)
        .bind(claimed_at)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(result.rows_affected() == 1)
    }

    /// `publishing -> failed`. Returns `false` if the claim was lost.
    pub async fn mark_failed(
        &self,
        post_id: &str,
        claimed_at: i64,
        retry_count: u32,
        last_error: &str,
        now: i64,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE scheduled_posts
            SET status = 'failed', retry_count = ?, next_retry_at = NULL,
                last_error = ?, claimed_at = NULL, updated_at = ?
            WHERE id = ? AND status = 'publishing' AND claimed_at = ?
            "#,
        )
        .bind(i64::from(retry_count))
        .bind(last_error)
        .bind(now)
        .bind(post_id)
        .bind(claimed_at)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(result.rows_affected() == 1)
    }

    /// Posts stuck in `publishing` since before `claimed_before`
    pub async fn stale_claims(&self, claimed_before: i64) -> Result<Vec<ScheduledPost>> {
        let query = format!(
            r#"
            SELECT {} FROM scheduled_posts
            WHERE status = 'publishing' AND claimed_at < ?
            ORDER BY claimed_at ASC
            "#,
            POST_COLUMNS
        );
        let rows = sqlx::query(&query)
            .bind(claimed_before)
            .fetch_all(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;

        rows.iter().map(post_from_row).collect()
    }

    /// Take a post out of the queue before it is claimed.
    ///
    /// Returns `false` if the post is not `pending`/`retrying`.
    pub async fn cancel_post(&self, post_id: &str, reason: &str, now: i64) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE scheduled_posts
            SET status = 'failed', next_retry_at = NULL, last_error = ?, updated_at = ?
            WHERE id = ? AND status IN ('pending', 'retrying')
            "#,
        )
        .bind(reason)
        .bind(now)
        .bind(post_id)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(result.rows_affected() == 1)
    }

    /// Number of posts in each status; every status is present
    pub async fn status_counts(&self) -> Result<BTreeMap<String, i64>> {
        let rows = sqlx::query("SELECT status, COUNT(*) AS n FROM scheduled_posts GROUP BY status")
            .fetch_all(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;

        let mut counts: BTreeMap<String, i64> = PostStatus::ALL
            .iter()
            .map(|s| (s.as_str().to_string(), 0))
            .collect();
        for row in rows {
            counts.insert(row.get("status"), row.get("n"));
        }
        Ok(counts)
    }

    /// Published posts whose next checkback is due
    pub async fn checkbacks_due(&self, now: i64, limit: usize) -> Result<Vec<ScheduledPost>> {
        let query = format!(
            r#"
            SELECT {} FROM scheduled_posts
            WHERE status = 'published'
              AND next_checkback_at IS NOT NULL
              AND next_checkback_at <= ?
            ORDER BY next_checkback_at ASC
            LIMIT ?
            "#,
            POST_COLUMNS
        );
        let rows = sqlx::query(&query)
            .bind(now)
            .bind(limit_param(limit))
            .fetch_all(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;

        rows.iter().map(post_from_row).collect()
    }

    /// Move the checkback cursor; `None` marks the post's checkbacks complete
    pub async fn set_next_checkback(
        &self,
        post_id: &str,
        next_checkback_at: Option<i64>,
        now: i64,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE scheduled_posts
            SET next_checkback_at = ?, updated_at = ?
            WHERE id = ? AND status = 'published'
            "#,
        )
        .bind(next_checkback_at)
        .bind(now)
        .bind(post_id)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(())
    }

    /// Insert a snapshot unless one already exists for the same (post, checkback).
    ///
    /// Returns `true` if a row was created.
    pub async fn insert_snapshot(&self, snapshot: &MetricsSnapshot) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO metrics_snapshots
                (id, post_id, checkback, captured_at, views, likes, comments, shares)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (post_id, checkback) DO NOTHING
            "#,
        )
        .bind(&snapshot.id)
        .bind(&snapshot.post_id)
        .bind(snapshot.checkback.label())
        .bind(snapshot.captured_at)
        .bind(counter_param(snapshot.metrics.views))
        .bind(counter_param(snapshot.metrics.likes))
        .bind(counter_param(snapshot.metrics.comments))
        .bind(counter_param(snapshot.metrics.shares))
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(result.rows_affected() == 1)
    }

    /// Snapshots for a post in checkback order
    pub async fn snapshots_for_post(&self, post_id: &str) -> Result<Vec<MetricsSnapshot>> {
        let rows = sqlx::query(
            r#"
            SELECT id, post_id, checkback, captured_at, views, likes, comments, shares
            FROM metrics_snapshots
            WHERE post_id = ?
            "#,
        )
        .bind(post_id)
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        let mut snapshots = rows
            .iter()
            .map(snapshot_from_row)
            .collect::<Result<Vec<_>>>()?;
        snapshots.sort_by_key(|s| s.checkback);
        Ok(snapshots)
    }
}

fn limit_param(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

fn counter_param(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn corrupt(table: &'static str, reason: String) -> DbError {
    DbError::CorruptRow { table, reason }
}

fn post_from_row(row: &SqliteRow) -> Result<ScheduledPost> {
    let status: String = row.get("status");
    let platform: String = row.get("platform");
    let media_urls: String = row.get("media_urls");
    let retry_count: i64 = row.get("retry_count");

    Ok(ScheduledPost {
        id: row.get("id"),
        content: row.get("content"),
        media_urls: serde_json::from_str(&media_urls)
            .map_err(|e| corrupt("scheduled_posts", format!("media_urls: {}", e)))?,
        platform: platform
            .parse::<TargetPlatform>()
            .map_err(|e| corrupt("scheduled_posts", e.to_string()))?,
        scheduled_at: row.get("scheduled_at"),
        status: status
            .parse::<PostStatus>()
            .map_err(|e| corrupt("scheduled_posts", e.to_string()))?,
        external_post_id: row.get("external_post_id"),
        retry_count: u32::try_from(retry_count)
            .map_err(|_| corrupt("scheduled_posts", format!("retry_count {}", retry_count)))?,
        next_retry_at: row.get("next_retry_at"),
        last_error: row.get("last_error"),
        claimed_at: row.get("claimed_at"),
        published_at: row.get("published_at"),
        next_checkback_at: row.get("next_checkback_at"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

fn snapshot_from_row(row: &SqliteRow) -> Result<MetricsSnapshot> {
    let checkback: String = row.get("checkback");
    let counter = |column: &str| -> Result<u64> {
        let value: i64 = row.get(column);
        u64::try_from(value)
            .map_err(|_| corrupt("metrics_snapshots", format!("{} = {}", column, value)).into())
    };

    Ok(MetricsSnapshot {
        id: row.get("id"),
        post_id: row.get("post_id"),
        checkback: checkback
            .parse::<Checkback>()
            .map_err(|e| corrupt("metrics_snapshots", e.to_string()))?,
        captured_at: row.get("captured_at"),
        metrics: MetricValues {
            views: counter("views")?,
            likes: counter("likes")?,
            comments: counter("comments")?,
            shares: counter("shares")?,
        },
    })
}
