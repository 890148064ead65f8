//! Platform Publisher Client abstraction
//!
//! A [`Publisher`] turns one scheduled post into one external publish call and
//! normalizes whatever happened into a [`PublishResult`]. Publishers never
//! return transport errors directly; every failure carries an
//! [`ErrorClassification`](crate::error::ErrorClassification) so the publish
//! task can decide between retrying and giving up.
//!
//! # Examples
//!
//! ```no_run
//! use libcadence::config::Config;
//! use libcadence::platforms::{Publisher, PublishRequest, blotato::BlotatoClient};
//! use libcadence::types::{ScheduledPost, TargetPlatform};
//!
//! # async fn example() -> libcadence::Result<()> {
//! let config = Config::load()?;
//! let client = BlotatoClient::from_config(config.blotato.as_ref().unwrap())?;
//!
//! let post = ScheduledPost::new("New drop tonight".to_string(), TargetPlatform::Tiktok, 0);
//! let result = client.publish(&PublishRequest::from_post(&post)).await;
//! if let Some(id) = result.external_id() {
//!     println!("published as {}", id);
//! }
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;

use crate::error::{ErrorClassification, PublishError};
use crate::types::{ScheduledPost, TargetPlatform};

pub mod blotato;

// Available outside tests so integration tests and dry runs can use it
pub mod mock;

/// Everything a publisher needs to know about one post
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishRequest {
    pub post_id: String,
    pub content: String,
    pub media_urls: Vec<String>,
    pub platform: TargetPlatform,
}

impl PublishRequest {
    pub fn from_post(post: &ScheduledPost) -> Self {
        Self {
            post_id: post.id.clone(),
            content: post.content.clone(),
            media_urls: post.media_urls.clone(),
            platform: post.platform,
        }
    }
}

/// Normalized outcome of one publish call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishResult {
    Published { external_id: String },
    Failed(PublishError),
}

impl PublishResult {
    pub fn published(external_id: impl Into<String>) -> Self {
        PublishResult::Published {
            external_id: external_id.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, PublishResult::Published { .. })
    }

    pub fn external_id(&self) -> Option<&str> {
        match self {
            PublishResult::Published { external_id } => Some(external_id),
            PublishResult::Failed(_) => None,
        }
    }

    pub fn error(&self) -> Option<&PublishError> {
        match self {
            PublishResult::Published { .. } => None,
            PublishResult::Failed(error) => Some(error),
        }
    }

    pub fn classification(&self) -> Option<ErrorClassification> {
        self.error().map(|e| e.classification)
    }
}

impl From<PublishError> for PublishResult {
    fn from(error: PublishError) -> Self {
        PublishResult::Failed(error)
    }
}

#[async_trait]
pub trait Publisher: Send + Sync {
    /// Identifier used in logs, e.g. `"blotato"`
    fn name(&self) -> &str;

    /// Publish one post. Network and provider failures are reported through
    /// [`PublishResult::Failed`], never panics or transport errors.
    ///
    /// Rate limits are enforced here, once for all posts on a platform:
    /// while a platform is throttled the call returns
    /// [`ErrorClassification::RateLimited`] with a `retry_after` hint.
    async fn publish(&self, request: &PublishRequest) -> PublishResult;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_from_post() {
        let post = ScheduledPost::new("caption".to_string(), TargetPlatform::Instagram, 10)
            .with_media(vec!["https://cdn.example.com/a.jpg".to_string()]);
        let request = PublishRequest::from_post(&post);

        assert_eq!(request.post_id, post.id);
        assert_eq!(request.content, "caption");
        assert_eq!(request.platform, TargetPlatform::Instagram);
        assert_eq!(request.media_urls.len(), 1);
    }

    #[test]
    fn test_result_accessors() {
        let ok = PublishResult::published("ext-1");
        assert!(ok.is_success());
        assert_eq!(ok.external_id(), Some("ext-1"));
        assert!(ok.classification().is_none());

        let failed: PublishResult = PublishError::not_implemented("pinterest").into();
        assert!(!failed.is_success());
        assert_eq!(failed.classification(), Some(ErrorClassification::NotImplemented));
    }
}
