//! Mock publisher for testing
//!
//! Plays back a script of outcomes, one per call, and records every request it
//! sees. Once the script runs out it keeps returning the fallback outcome
//! (success with a generated id unless configured otherwise). Clones share
//! their counters, so a test can keep a handle after moving one into a task.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::sleep;

use crate::error::PublishError;
use crate::platforms::{PublishRequest, PublishResult, Publisher};

#[derive(Debug, Default)]
struct MockState {
    script: VecDeque<PublishResult>,
    calls: Vec<PublishRequest>,
}

#[derive(Debug, Clone)]
pub struct MockPublisher {
    name: String,
    /// Returned once the script is empty; `None` means succeed
    fallback: Option<PublishError>,
    /// Simulated network latency
    delay: Duration,
    state: Arc<Mutex<MockState>>,
}

impl Default for MockPublisher {
    fn default() -> Self {
        Self::succeeding()
    }
}

impl MockPublisher {
    /// Every call succeeds with id `mock-<n>`
    pub fn succeeding() -> Self {
        Self {
            name: "mock".to_string(),
            fallback: None,
            delay: Duration::ZERO,
            state: Arc::new(Mutex::new(MockState::default())),
        }
    }

    /// Every call fails with `error`
    pub fn failing(error: PublishError) -> Self {
        Self {
            fallback: Some(error),
            ..Self::succeeding()
        }
    }

    /// Play back `results` in order, then succeed
    pub fn scripted(results: Vec<PublishResult>) -> Self {
        let mock = Self::succeeding();
        mock.lock().script = results.into();
        mock
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn call_count(&self) -> usize {
        self.lock().calls.len()
    }

    /// Requests received so far, in call order
    pub fn requests(&self) -> Vec<PublishRequest> {
        self.lock().calls.clone()
    }

    /// Number of calls made for one post
    pub fn calls_for(&self, post_id: &str) -> usize {
        self.lock().calls.iter().filter(|r| r.post_id == post_id).count()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl Publisher for MockPublisher {
    fn name(&self) -> &str {
        &self.name
    }

    async fn publish(&self, request: &PublishRequest) -> PublishResult {
        let (scripted, call_number) = {
            let mut state = self.lock();
            state.calls.push(request.clone());
            (state.script.pop_front(), state.calls.len())
        };

        if !self.delay.is_zero() {
            sleep(self.delay).await;
        }

        match (scripted, &self.fallback) {
            (Some(result), _) => result,
            (None, Some(error)) => PublishResult::Failed(error.clone()),
            (None, None) => PublishResult::published(format!("mock-{}", call_number)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorClassification;
    use crate::types::TargetPlatform;

    fn request(post_id: &str) -> PublishRequest {
        PublishRequest {
            post_id: post_id.to_string(),
            content: "test".to_string(),
            media_urls: vec![],
            platform: TargetPlatform::Tiktok,
        }
    }

    #[tokio::test]
    async fn test_succeeding_generates_ids() {
        let mock = MockPublisher::succeeding();
        let first = mock.publish(&request("a")).await;
        let second = mock.publish(&request("b")).await;

        assert_eq!(first.external_id(), Some("mock-1"));
        assert_eq!(second.external_id(), Some("mock-2"));
        assert_eq!(mock.call_count(), 2);
    }

    #[tokio::test]
    async fn test_failing_always_fails() {
        let mock = MockPublisher::failing(PublishError::transient("connection reset"));
        for _ in 0..3 {
            let result = mock.publish(&request("a")).await;
            assert_eq!(result.classification(), Some(ErrorClassification::Transient));
        }
        assert_eq!(mock.calls_for("a"), 3);
    }

    #[tokio::test]
    async fn test_script_then_fallback() {
        let mock = MockPublisher::scripted(vec![
            PublishError::rate_limited("429", None).into(),
            PublishResult::published("ext-42"),
        ]);

        assert!(!mock.publish(&request("a")).await.is_success());
        assert_eq!(mock.publish(&request("a")).await.external_id(), Some("ext-42"));
        assert_eq!(mock.publish(&request("a")).await.external_id(), Some("mock-3"));
    }

    #[tokio::test]
    async fn test_clones_share_counters() {
        let mock = MockPublisher::succeeding();
        let handle = mock.clone();
        let boxed: Arc<dyn Publisher> = Arc::new(mock);

        boxed.publish(&request("x")).await;
        assert_eq!(handle.call_count(), 1);
        assert_eq!(handle.requests()[0].post_id, "x");
    }

    #[tokio::test]
    async fn test_delay() {
        let mock = MockPublisher::succeeding().with_delay(Duration::from_millis(50));
        let start = std::time::Instant::now();
        mock.publish(&request("a")).await;
        assert!(start.elapsed() >= Duration::from_millis(50));
    }
}
