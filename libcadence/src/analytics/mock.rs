//! Mock analytics provider for testing

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use crate::analytics::{AnalyticsFetcher, AnalyticsReport};
use crate::error::AnalyticsError;
use crate::types::{MetricValues, TargetPlatform};

#[derive(Debug, Default)]
struct MockState {
    /// external id -> queued outcomes
    scripts: HashMap<String, VecDeque<std::result::Result<AnalyticsReport, AnalyticsError>>>,
    /// external ids fetched, in call order
    calls: Vec<String>,
}

/// Returns `views = 100 * call number` unless a per-post script says otherwise
#[derive(Debug, Clone, Default)]
pub struct MockAnalytics {
    state: Arc<Mutex<MockState>>,
}

impl MockAnalytics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an outcome for the next fetch of `external_post_id`
    pub fn push(
        &self,
        external_post_id: &str,
        outcome: std::result::Result<MetricValues, AnalyticsError>,
    ) {
        self.lock()
            .scripts
            .entry(external_post_id.to_string())
            .or_default()
            .push_back(outcome.map(AnalyticsReport::from));
    }

    pub fn call_count(&self) -> usize {
        self.lock().calls.len()
    }

    pub fn calls_for(&self, external_post_id: &str) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|id| id.as_str() == external_post_id)
            .count()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl AnalyticsFetcher for MockAnalytics {
    fn name(&self) -> &str {
        "mock"
    }

    async fn fetch(
        &self,
        external_post_id: &str,
        _platform: TargetPlatform,
    ) -> std::result::Result<AnalyticsReport, AnalyticsError> {
        let mut state = self.lock();
        state.calls.push(external_post_id.to_string());
        let call_number = state.calls.len() as u64;

        if let Some(outcome) = state
            .scripts
            .get_mut(external_post_id)
            .and_then(|queue| queue.pop_front())
        {
            return outcome;
        }

        Ok(MetricValues {
            views: 100 * call_number,
            ..Default::default()
        }
        .into())
    }
}
