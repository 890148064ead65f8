//! RapidAPI analytics client
//!
//! Each platform is served by a different RapidAPI provider with its own
//! response shape, so counters are located by key name anywhere in the JSON
//! document rather than through per-provider structs.

use async_trait::async_trait;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::debug;

use crate::analytics::{AnalyticsFetcher, AnalyticsReport};
use crate::config::{AnalyticsConfig, AnalyticsHost, RAPIDAPI_KEY_ENV};
use crate::error::{AnalyticsError, ConfigError, Result};
use crate::types::{MetricValues, TargetPlatform};

const VIEW_KEYS: &[&str] = &[
    "play_count",
    "playCount",
    "view_count",
    "viewCount",
    "video_view_count",
    "views",
];
const LIKE_KEYS: &[&str] = &["digg_count", "diggCount", "like_count", "likeCount", "likes"];
const COMMENT_KEYS: &[&str] = &["comment_count", "commentCount", "comments"];
const SHARE_KEYS: &[&str] = &["share_count", "shareCount", "shares"];
const TIMESTAMP_KEYS: &[&str] = &["timestamp", "fetched_at"];

/// Keep provider bodies out of logs beyond this length
const MAX_ERROR_BODY: usize = 200;

pub struct RapidApiClient {
    http: Client,
    api_key: SecretString,
    hosts: BTreeMap<TargetPlatform, AnalyticsHost>,
}

impl std::fmt::Debug for RapidApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RapidApiClient")
            .field("hosts", &self.hosts)
            .finish_non_exhaustive()
    }
}

impl RapidApiClient {
    pub fn from_config(config: &AnalyticsConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .filter(|k| !k.expose_secret().trim().is_empty())
            .ok_or_else(|| {
                ConfigError::MissingField(format!("analytics.api_key (or {})", RAPIDAPI_KEY_ENV))
            })?;

        let mut hosts = BTreeMap::new();
        for platform in TargetPlatform::ALL {
            if let Some(host) = config.host_for(platform) {
                hosts.insert(platform, host.clone());
            }
        }

        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout))
            .build()
            .map_err(|e| ConfigError::InvalidValue {
                field: "analytics".to_string(),
                reason: format!("failed to build HTTP client: {}", e),
            })?;

        Ok(Self {
            http,
            api_key,
            hosts,
        })
    }
}

#[async_trait]
impl AnalyticsFetcher for RapidApiClient {
    fn name(&self) -> &str {
        "rapidapi"
    }

    async fn fetch(
        &self,
        external_post_id: &str,
        platform: TargetPlatform,
    ) -> std::result::Result<AnalyticsReport, AnalyticsError> {
        let host = self.hosts.get(&platform).ok_or_else(|| {
            AnalyticsError::NotConfigured(format!("no analytics host for {}", platform))
        })?;

        let url = build_url(host, external_post_id);
        debug!(platform = %platform, host = %host.host, "Fetching post analytics");

        let response = self
            .http
            .get(&url)
            .header("X-RapidAPI-Key", self.api_key.expose_secret())
            .header("X-RapidAPI-Host", &host.host)
            .send()
            .await
            .map_err(|e| AnalyticsError::Network(e.to_string()))?;

        let status = response.status();
        if status.as_u16() == 429 {
            return Err(AnalyticsError::RateLimited(format!(
                "{} throttled analytics requests",
                host.host
            )));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AnalyticsError::Http {
                status: status.as_u16(),
                body: body.chars().take(MAX_ERROR_BODY).collect(),
            });
        }

        let document: Value = response
            .json()
            .await
            .map_err(|e| AnalyticsError::Decode(e.to_string()))?;
        extract_report(&document)
    }
}

/// RFC 3986 unreserved characters stay as they are
const ID_COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

pub fn build_url(host: &AnalyticsHost, external_post_id: &str) -> String {
    let id = utf8_percent_encode(external_post_id, ID_COMPONENT).to_string();
    let path = host.path.replace("{id}", &id);
    let separator = if path.starts_with('/') { "" } else { "/" };
    format!("https://{}{}{}", host.host, separator, path)
}

/// Pull counters out of a provider response.
///
/// At least one of views or likes must be present; other missing counters
/// default to zero.
pub fn extract_report(document: &Value) -> std::result::Result<AnalyticsReport, AnalyticsError> {
    let views = find_counter(document, VIEW_KEYS);
    let likes = find_counter(document, LIKE_KEYS);
    if views.is_none() && likes.is_none() {
        return Err(AnalyticsError::Decode(
            "response contains no view or like counters".to_string(),
        ));
    }

    let metrics = MetricValues {
        views: views.unwrap_or(0),
        likes: likes.unwrap_or(0),
        comments: find_counter(document, COMMENT_KEYS).unwrap_or(0),
        shares: find_counter(document, SHARE_KEYS).unwrap_or(0),
    };
    let observed_at = find_counter(document, TIMESTAMP_KEYS).and_then(|t| i64::try_from(t).ok());

    Ok(AnalyticsReport {
        metrics,
        observed_at,
    })
}

/// Depth-first search for the first key in `keys` holding a non-negative integer
fn find_counter(value: &Value, keys: &[&str]) -> Option<u64> {
    match value {
        Value::Object(map) => {
            for key in keys {
                if let Some(n) = map.get(*key).and_then(as_counter) {
                    return Some(n);
                }
            }
            map.values().find_map(|v| find_counter(v, keys))
        }
        Value::Array(items) => items.iter().find_map(|v| find_counter(v, keys)),
        _ => None,
    }
}

fn as_counter(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
