//! Post analytics retrieval
//!
//! An [`AnalyticsFetcher`] reads the current engagement counters of a
//! published post from a data provider. The metrics collector calls it once
//! per checkback and stores whatever comes back as an immutable snapshot.

use async_trait::async_trait;

use crate::error::AnalyticsError;
use crate::types::{MetricValues, TargetPlatform};

pub mod mock;
pub mod rapidapi;

/// Counters as reported by the provider
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnalyticsReport {
    pub metrics: MetricValues,
    /// Provider's own observation time, when the response includes one
    pub observed_at: Option<i64>,
}

impl From<MetricValues> for AnalyticsReport {
    fn from(metrics: MetricValues) -> Self {
        Self {
            metrics,
            observed_at: None,
        }
    }
}

#[async_trait]
pub trait AnalyticsFetcher: Send + Sync {
    fn name(&self) -> &str;

    async fn fetch(
        &self,
        external_post_id: &str,
        platform: TargetPlatform,
    ) -> std::result::Result<AnalyticsReport, AnalyticsError>;
}
