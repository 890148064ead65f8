//! Cadence - scheduled publishing for social media posts
//!
//! This library holds the post store, the retry policy, the publisher and
//! analytics clients, and the background tasks that move posts from
//! `pending` to `published` and collect their engagement metrics afterwards.

pub mod analytics;
pub mod config;
pub mod db;
pub mod error;
pub mod logging;
pub mod platforms;
pub mod rate_limiter;
pub mod retry;
pub mod scheduler;
pub mod scheduling;
pub mod tasks;
pub mod types;

// Re-export commonly used types
pub use config::Config;
pub use db::Database;
pub use error::{CadenceError, ErrorClassification, PublishError, Result};
pub use retry::RetryPolicy;
pub use scheduler::{ScheduledJob, Scheduler};
pub use tasks::{MetricsCollectorTask, ScheduledPublishTask, StaleClaimReaper};
pub use types::{Checkback, MetricsSnapshot, PostStatus, ScheduledPost, TargetPlatform};
