//! Blotato publishing API client
//!
//! One `POST /v2/posts` per scheduled post. Responses are classified by HTTP
//! status; 429s put the platform into a shared cooldown so other posts on the
//! same platform back off without spending requests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{Client, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::{BlotatoConfig, BLOTATO_KEY_ENV};
use crate::error::{ConfigError, PublishError, Result};
use crate::platforms::{PublishRequest, PublishResult, Publisher};
use crate::rate_limiter::RateLimiter;
use crate::types::TargetPlatform;

/// Cooldown applied after a 429 that carried no usable Retry-After
const DEFAULT_COOLDOWN: Duration = Duration::from_secs(60);

/// Maximum length of a provider response body kept in error messages
const MAX_ERROR_BODY: usize = 300;

/// How a target platform maps onto the provider
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlatformRoute {
    /// Provider `targetType`
    Supported(&'static str),
    NotImplemented,
}

pub fn route(platform: TargetPlatform) -> PlatformRoute {
    match platform {
        TargetPlatform::Tiktok => PlatformRoute::Supported("tiktok"),
        TargetPlatform::Instagram => PlatformRoute::Supported("instagram"),
        TargetPlatform::Youtube => PlatformRoute::Supported("youtube"),
        TargetPlatform::Twitter => PlatformRoute::Supported("twitter"),
        TargetPlatform::Linkedin => PlatformRoute::Supported("linkedin"),
        TargetPlatform::Facebook => PlatformRoute::Supported("facebook"),
        TargetPlatform::Threads => PlatformRoute::Supported("threads"),
        TargetPlatform::Bluesky => PlatformRoute::Supported("bluesky"),
        // needs a board id per post, which scheduled posts don't carry yet
        TargetPlatform::Pinterest => PlatformRoute::NotImplemented,
    }
}

/// Per-platform credentials: the shared API key plus the connected account
#[derive(Debug, Clone)]
pub struct Credentials {
    pub api_key: SecretString,
    pub account_id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreatePostBody<'a> {
    post: PostBody<'a>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PostBody<'a> {
    account_id: &'a str,
    content: ContentBody<'a>,
    target: serde_json::Value,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ContentBody<'a> {
    text: &'a str,
    media_urls: &'a [String],
    platform: &'static str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreatePostResponse {
    post_submission_id: Option<String>,
    id: Option<String>,
}

pub struct BlotatoClient {
    http: Client,
    api_base: String,
    api_key: SecretString,
    accounts: BTreeMap<TargetPlatform, String>,
    limiter: RateLimiter,
}

impl std::fmt::Debug for BlotatoClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlotatoClient")
            .field("api_base", &self.api_base)
            .field("accounts", &self.accounts)
            .finish_non_exhaustive()
    }
}

impl BlotatoClient {
    pub fn from_config(config: &BlotatoConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .filter(|k| !k.expose_secret().trim().is_empty())
            .ok_or_else(|| {
                ConfigError::MissingField(format!("blotato.api_key (or {})", BLOTATO_KEY_ENV))
            })?;

        let mut accounts = BTreeMap::new();
        for platform in TargetPlatform::ALL {
            if let Some(account) = config.account_for(platform) {
                accounts.insert(platform, account.to_string());
            }
        }

        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout))
            .build()
            .map_err(|e| ConfigError::InvalidValue {
                field: "blotato".to_string(),
                reason: format!("failed to build HTTP client: {}", e),
            })?;

        Ok(Self {
            http,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            api_key,
            accounts,
            limiter: RateLimiter::new(config.rate_limits()?),
        })
    }

    pub fn credentials_for(&self, platform: TargetPlatform) -> Option<Credentials> {
        self.accounts.get(&platform).map(|account_id| Credentials {
            api_key: self.api_key.clone(),
            account_id: account_id.clone(),
        })
    }

    async fn send(
        &self,
        request: &PublishRequest,
        target_type: &'static str,
        credentials: &Credentials,
    ) -> PublishResult {
        let body = CreatePostBody {
            post: PostBody {
                account_id: &credentials.account_id,
                content: ContentBody {
                    text: &request.content,
                    media_urls: &request.media_urls,
                    platform: target_type,
                },
                target: target_for(request.platform, target_type, &request.content),
            },
        };

        let response = self
            .http
            .post(format!("{}/v2/posts", self.api_base))
            .header("blotato-api-key", credentials.api_key.expose_secret())
            .json(&body)
            .send()
            .await;

        let response = match response {
            Ok(response) => response,
            Err(e) => return PublishError::transient(describe_transport_error(&e)).into(),
        };

        let status = response.status();
        let retry_after = parse_retry_after(response.headers(), Utc::now());

        if status.is_success() {
            return match response.json::<CreatePostResponse>().await {
                Ok(parsed) => match parsed.post_submission_id.or(parsed.id) {
                    Some(id) if !id.is_empty() => PublishResult::published(id),
                    _ => PublishError::permanent(
                        "Blotato accepted the post but returned no post id",
                    )
                    .into(),
                },
                Err(e) => {
                    PublishError::permanent(format!("Unreadable Blotato response: {}", e)).into()
                }
            };
        }

        let body = response.text().await.unwrap_or_default();
        let error = classify_status(status, &body, retry_after);
        if status == StatusCode::TOO_MANY_REQUESTS {
            self.limiter.note_rate_limited(
                request.platform,
                Utc::now().timestamp(),
                retry_after.unwrap_or(DEFAULT_COOLDOWN),
            );
        }
        error.into()
    }
}

#[async_trait]
impl Publisher for BlotatoClient {
    fn name(&self) -> &str {
        "blotato"
    }

    async fn publish(&self, request: &PublishRequest) -> PublishResult {
        let target_type = match route(request.platform) {
            PlatformRoute::Supported(target_type) => target_type,
            PlatformRoute::NotImplemented => {
                return PublishError::not_implemented(format!(
                    "publishing to {} is not implemented",
                    request.platform
                ))
                .into();
            }
        };

        let Some(credentials) = self.credentials_for(request.platform) else {
            return PublishError::permanent(format!(
                "no Blotato account configured for {}",
                request.platform
            ))
            .into();
        };

        if let Err(wait) = self
            .limiter
            .check_and_record(request.platform, Utc::now().timestamp())
        {
            debug!(
                platform = %request.platform,
                wait_secs = wait.as_secs(),
                "Skipping publish call while platform is rate limited"
            );
            return PublishError::rate_limited(
                format!("{} is rate limited locally", request.platform),
                Some(wait),
            )
            .into();
        }

        let result = self.send(request, target_type, &credentials).await;
        if let PublishResult::Failed(error) = &result {
            warn!(
                post_id = %request.post_id,
                platform = %request.platform,
                classification = %error.classification,
                "Blotato publish failed: {}",
                error.message
            );
        }
        result
    }
}

/// Provider `target` object; some platforms require extra fields
fn target_for(
    platform: TargetPlatform,
    target_type: &'static str,
    content: &str,
) -> serde_json::Value {
    match platform {
        TargetPlatform::Tiktok => serde_json::json!({
            "targetType": target_type,
            "privacyLevel": "PUBLIC_TO_EVERYONE",
            "disabledComments": false,
            "disabledDuet": false,
            "disabledStitch": false,
            "isBrandedContent": false,
            "isYourBrand": false,
            "isAiGenerated": false,
        }),
        TargetPlatform::Youtube => serde_json::json!({
            "targetType": target_type,
            "title": youtube_title(content),
            "privacyStatus": "public",
            "shouldNotifySubscribers": true,
        }),
        _ => serde_json::json!({ "targetType": target_type }),
    }
}

fn youtube_title(content: &str) -> String {
    let first_line = content.lines().next().unwrap_or("").trim();
    let title: String = first_line.chars().take(100).collect();
    if title.is_empty() {
        "Untitled".to_string()
    } else {
        title
    }
}

fn describe_transport_error(error: &reqwest::Error) -> String {
    if error.is_timeout() {
        format!("Blotato request timed out: {}", error)
    } else if error.is_connect() {
        format!("Could not connect to Blotato: {}", error)
    } else {
        format!("Blotato request failed: {}", error)
    }
}

/// Map a non-success HTTP status onto a classified error
pub fn classify_status(
    status: StatusCode,
    body: &str,
    retry_after: Option<Duration>,
) -> PublishError {
    let body = truncate(body.trim(), MAX_ERROR_BODY);
    let message = if body.is_empty() {
        format!("Blotato returned HTTP {}", status.as_u16())
    } else {
        format!("Blotato returned HTTP {}: {}", status.as_u16(), body)
    };

    match status.as_u16() {
        429 => PublishError::rate_limited(message, retry_after),
        408 | 425 | 500..=599 => PublishError::transient(message),
        _ => PublishError::permanent(message),
    }
}

/// `Retry-After` as delta-seconds or an HTTP-date
pub fn parse_retry_after(headers: &HeaderMap, now: DateTime<Utc>) -> Option<Duration> {
    let value = headers.get(RETRY_AFTER)?.to_str().ok()?.trim();

    if let Ok(secs) = value.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }

    let at = DateTime::parse_from_rfc2822(value).ok()?.with_timezone(&Utc);
    let secs = (at - now).num_seconds().max(0);
    Some(Duration::from_secs(u64::try_from(secs).unwrap_or(0)))
}

fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_chars).collect();
        format!("{}...", kept)
    }
}
