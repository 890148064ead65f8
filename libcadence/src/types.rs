//! Core types for Cadence

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

use crate::error::CadenceError;

/// Lifecycle state of a scheduled post.
///
/// `Pending | Retrying -> Publishing -> Published | Retrying | Failed`.
/// `Published` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum PostStatus {
    Pending,
    Publishing,
    Published,
    Failed,
    Retrying,
}

impl PostStatus {
    pub const ALL: [PostStatus; 5] = [
        PostStatus::Pending,
        PostStatus::Publishing,
        PostStatus::Published,
        PostStatus::Failed,
        PostStatus::Retrying,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PostStatus::Pending => "pending",
            PostStatus::Publishing => "publishing",
            PostStatus::Published => "published",
            PostStatus::Failed => "failed",
            PostStatus::Retrying => "retrying",
        }
    }
}

impl std::fmt::Display for PostStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PostStatus {
    type Err = CadenceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PostStatus::ALL
            .into_iter()
            .find(|status| status.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| CadenceError::InvalidInput(format!("Unknown post status: {}", s)))
    }
}

/// Social platform a post is published to through the publishing provider.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum TargetPlatform {
    Tiktok,
    Instagram,
    Youtube,
    Twitter,
    Linkedin,
    Facebook,
    Threads,
    Pinterest,
    Bluesky,
}

impl TargetPlatform {
    pub const ALL: [TargetPlatform; 9] = [
        TargetPlatform::Tiktok,
        TargetPlatform::Instagram,
        TargetPlatform::Youtube,
        TargetPlatform::Twitter,
        TargetPlatform::Linkedin,
        TargetPlatform::Facebook,
        TargetPlatform::Threads,
        TargetPlatform::Pinterest,
        TargetPlatform::Bluesky,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TargetPlatform::Tiktok => "tiktok",
            TargetPlatform::Instagram => "instagram",
            TargetPlatform::Youtube => "youtube",
            TargetPlatform::Twitter => "twitter",
            TargetPlatform::Linkedin => "linkedin",
            TargetPlatform::Facebook => "facebook",
            TargetPlatform::Threads => "threads",
            TargetPlatform::Pinterest => "pinterest",
            TargetPlatform::Bluesky => "bluesky",
        }
    }
}

impl std::fmt::Display for TargetPlatform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TargetPlatform {
    type Err = CadenceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase();
        let normalized = match normalized.as_str() {
            "x" => "twitter",
            "yt" => "youtube",
            other => other,
        };
        TargetPlatform::ALL
            .into_iter()
            .find(|platform| platform.as_str() == normalized)
            .ok_or_else(|| CadenceError::InvalidInput(format!("Unknown platform: {}", s)))
    }
}

/// A post waiting for, undergoing, or finished with publication.
///
/// All timestamps are Unix seconds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScheduledPost {
    pub id: String,
    /// Caption or body text handed to the publisher
    pub content: String,
    pub media_urls: Vec<String>,
    pub platform: TargetPlatform,
    pub scheduled_at: i64,
    pub status: PostStatus,
    /// Set exactly when `status == Published`
    pub external_post_id: Option<String>,
    pub retry_count: u32,
    pub next_retry_at: Option<i64>,
    pub last_error: Option<String>,
    /// When the current `Publishing` claim was taken
    pub claimed_at: Option<i64>,
    pub published_at: Option<i64>,
    /// Due time of the next metrics checkback; `None` before publication and after the last one
    pub next_checkback_at: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl ScheduledPost {
    pub fn new(content: String, platform: TargetPlatform, scheduled_at: i64) -> Self {
        let now = chrono::Utc::now().timestamp();
        Self {
            id: Uuid::new_v4().to_string(),
            content,
            media_urls: Vec::new(),
            platform,
            scheduled_at,
            status: PostStatus::Pending,
            external_post_id: None,
            retry_count: 0,
            next_retry_at: None,
            last_error: None,
            claimed_at: None,
            published_at: None,
            next_checkback_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_media(mut self, media_urls: Vec<String>) -> Self {
        self.media_urls = media_urls;
        self
    }
}

/// Fixed offsets after publication at which analytics are captured.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Checkback {
    #[serde(rename = "1h")]
    OneHour,
    #[serde(rename = "6h")]
    SixHours,
    #[serde(rename = "24h")]
    OneDay,
    #[serde(rename = "72h")]
    ThreeDays,
    #[serde(rename = "168h")]
    OneWeek,
}

impl Checkback {
    /// In visiting order
    pub const ALL: [Checkback; 5] = [
        Checkback::OneHour,
        Checkback::SixHours,
        Checkback::OneDay,
        Checkback::ThreeDays,
        Checkback::OneWeek,
    ];

    pub fn first() -> Self {
        Checkback::OneHour
    }

    pub fn label(&self) -> &'static str {
        match self {
            Checkback::OneHour => "1h",
            Checkback::SixHours => "6h",
            Checkback::OneDay => "24h",
            Checkback::ThreeDays => "72h",
            Checkback::OneWeek => "168h",
        }
    }

    pub fn offset_secs(&self) -> i64 {
        let hours = match self {
            Checkback::OneHour => 1,
            Checkback::SixHours => 6,
            Checkback::OneDay => 24,
            Checkback::ThreeDays => 72,
            Checkback::OneWeek => 168,
        };
        hours * 3600
    }

    pub fn due_at(&self, published_at: i64) -> i64 {
        published_at + self.offset_secs()
    }
}

impl std::fmt::Display for Checkback {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Checkback {
    type Err = CadenceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Checkback::ALL
            .into_iter()
            .find(|c| c.label() == s)
            .ok_or_else(|| CadenceError::InvalidInput(format!("Unknown checkback offset: {}", s)))
    }
}

/// Raw engagement counters reported by the analytics provider
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct MetricValues {
    pub views: u64,
    pub likes: u64,
    pub comments: u64,
    pub shares: u64,
}

/// Immutable capture of a post's metrics at one checkback offset
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub id: String,
    pub post_id: String,
    pub checkback: Checkback,
    pub captured_at: i64,
    pub metrics: MetricValues,
}

impl MetricsSnapshot {
    pub fn new(
        post_id: String,
        checkback: Checkback,
        captured_at: i64,
        metrics: MetricValues,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            post_id,
            checkback,
            captured_at,
            metrics,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_parse_and_display() {
        for status in PostStatus::ALL {
            assert_eq!(status.as_str().parse::<PostStatus>().unwrap(), status);
        }
        assert_eq!("RETRYING".parse::<PostStatus>().unwrap(), PostStatus::Retrying);
        assert!("posted".parse::<PostStatus>().is_err());
    }

    #[test]
    fn test_platform_aliases() {
        assert_eq!("x".parse::<TargetPlatform>().unwrap(), TargetPlatform::Twitter);
        assert_eq!(" TikTok ".parse::<TargetPlatform>().unwrap(), TargetPlatform::Tiktok);
        assert!("myspace".parse::<TargetPlatform>().is_err());
    }

    #[test]
    fn test_new_post_defaults() {
        let post = ScheduledPost::new("hello".to_string(), TargetPlatform::Tiktok, 1_000);
        assert_eq!(post.status, PostStatus::Pending);
        assert_eq!(post.retry_count, 0);
        assert!(post.external_post_id.is_none());
        assert!(post.next_checkback_at.is_none());
    }

    #[test]
    fn test_checkback_order_and_offsets() {
        let labels: Vec<&str> = Checkback::ALL.iter().map(|c| c.label()).collect();
        assert_eq!(labels, vec!["1h", "6h", "24h", "72h", "168h"]);

        assert_eq!(Checkback::first().due_at(0), 3600);
        assert_eq!(Checkback::OneWeek.offset_secs(), 168 * 3600);
    }

    #[test]
    fn test_checkback_serde_uses_labels() {
        let json = serde_json::to_string(&Checkback::ThreeDays).unwrap();
        assert_eq!(json, "\"72h\"");
        assert_eq!("24h".parse::<Checkback>().unwrap(), Checkback::OneDay);
    }
}
