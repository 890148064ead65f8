//! Configuration management for Cadence

use secrecy::SecretString;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{ConfigError, Result};
use crate::retry::RetryPolicy;
use crate::types::TargetPlatform;

pub const CONFIG_ENV: &str = "CADENCE_CONFIG";
pub const DB_PATH_ENV: &str = "CADENCE_DB_PATH";
pub const BLOTATO_KEY_ENV: &str = "CADENCE_BLOTATO_API_KEY";
pub const RAPIDAPI_KEY_ENV: &str = "CADENCE_RAPIDAPI_KEY";

pub const DEFAULT_BLOTATO_API_BASE: &str = "https://backend.blotato.com";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    #[serde(default)]
    pub scheduling: SchedulingConfig,
    pub blotato: Option<BlotatoConfig>,
    pub analytics: Option<AnalyticsConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub path: String,
}

/// Cycle intervals and retry budget. Durations are whole seconds.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct SchedulingConfig {
    pub poll_interval: u64,
    pub metrics_interval: u64,
    pub max_attempts: u32,
    pub base_delay: u64,
    pub max_delay: u64,
    pub jitter_ratio: f64,
    pub rate_limit_min_delay: u64,
    pub stale_claim_timeout: u64,
    pub concurrency: usize,
}

impl Default for SchedulingConfig {
    fn default() -> Self {
        Self {
            poll_interval: 60,
            metrics_interval: 300,
            max_attempts: 5,
            base_delay: 60,
            max_delay: 3600,
            jitter_ratio: 0.2,
            rate_limit_min_delay: 900,
            stale_claim_timeout: 1800,
            concurrency: 4,
        }
    }
}

impl SchedulingConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            base_delay: Duration::from_secs(self.base_delay),
            max_delay: Duration::from_secs(self.max_delay),
            max_attempts: self.max_attempts,
            jitter_ratio: self.jitter_ratio,
            rate_limit_min_delay: Duration::from_secs(self.rate_limit_min_delay),
        }
    }

    pub fn stale_claim_timeout(&self) -> Duration {
        Duration::from_secs(self.stale_claim_timeout)
    }

    fn validate(&self) -> std::result::Result<(), ConfigError> {
        let invalid = |field: &str, reason: &str| ConfigError::InvalidValue {
            field: format!("scheduling.{}", field),
            reason: reason.to_string(),
        };

        if self.poll_interval == 0 {
            return Err(invalid("poll_interval", "must be at least 1 second"));
        }
        if self.metrics_interval == 0 {
            return Err(invalid("metrics_interval", "must be at least 1 second"));
        }
        if self.max_attempts == 0 {
            return Err(invalid("max_attempts", "must be at least 1"));
        }
        if self.base_delay == 0 {
            return Err(invalid("base_delay", "must be at least 1 second"));
        }
        if self.max_delay < self.base_delay {
            return Err(invalid("max_delay", "must not be less than base_delay"));
        }
        if !(0.0..=1.0).contains(&self.jitter_ratio) {
            return Err(invalid("jitter_ratio", "must be between 0.0 and 1.0"));
        }
        if self.concurrency == 0 {
            return Err(invalid("concurrency", "must be at least 1"));
        }
        Ok(())
    }
}

/// Blotato publishing API
#[derive(Debug, Clone, Deserialize)]
pub struct BlotatoConfig {
    #[serde(default = "default_blotato_api_base")]
    pub api_base: String,
    /// Falls back to `CADENCE_BLOTATO_API_KEY`
    pub api_key: Option<SecretString>,
    #[serde(default = "default_timeout")]
    pub timeout: u64,
    /// Target platform name -> Blotato account id
    #[serde(default)]
    pub accounts: BTreeMap<String, String>,
    /// Target platform name -> posts per hour
    #[serde(default)]
    pub rate_limits: BTreeMap<String, u32>,
}

impl BlotatoConfig {
    pub fn account_for(&self, platform: TargetPlatform) -> Option<&str> {
        lookup_platform(&self.accounts, platform).map(String::as_str)
    }

    pub fn rate_limits(&self) -> Result<BTreeMap<TargetPlatform, u32>> {
        self.rate_limits
            .iter()
            .map(|(name, limit)| Ok((name.parse::<TargetPlatform>()?, *limit)))
            .collect()
    }
}

/// RapidAPI analytics providers
#[derive(Debug, Clone, Deserialize)]
pub struct AnalyticsConfig {
    /// Falls back to `CADENCE_RAPIDAPI_KEY`
    pub api_key: Option<SecretString>,
    #[serde(default = "default_timeout")]
    pub timeout: u64,
    /// Target platform name -> provider endpoint
    #[serde(default)]
    pub hosts: BTreeMap<String, AnalyticsHost>,
}

impl AnalyticsConfig {
    pub fn host_for(&self, platform: TargetPlatform) -> Option<&AnalyticsHost> {
        lookup_platform(&self.hosts, platform)
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct AnalyticsHost {
    /// e.g. `tiktok-scraper7.p.rapidapi.com`
    pub host: String,
    /// Path and query with an `{id}` placeholder for the external post id
    pub path: String,
}

fn default_blotato_api_base() -> String {
    DEFAULT_BLOTATO_API_BASE.to_string()
}

fn default_timeout() -> u64 {
    30
}

fn lookup_platform<V>(map: &BTreeMap<String, V>, platform: TargetPlatform) -> Option<&V> {
    map.iter()
        .find(|(name, _)| name.parse::<TargetPlatform>().ok() == Some(platform))
        .map(|(_, value)| value)
}

impl Config {
    /// Load configuration from the default location
    pub fn load() -> Result<Self> {
        let config_path = resolve_config_path()?;
        Self::load_from_path(&config_path)
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::ReadError)?;
        Self::from_toml_str(&content)
    }

    /// Parse, apply environment overrides, and validate
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let mut config: Config = toml::from_str(content).map_err(ConfigError::ParseError)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(path) = std::env::var(DB_PATH_ENV) {
            self.database.path = path;
        }
        if let Some(blotato) = self.blotato.as_mut() {
            if blotato.api_key.is_none() {
                blotato.api_key = std::env::var(BLOTATO_KEY_ENV).ok().map(SecretString::from);
            }
        }
        if let Some(analytics) = self.analytics.as_mut() {
            if analytics.api_key.is_none() {
                analytics.api_key = std::env::var(RAPIDAPI_KEY_ENV).ok().map(SecretString::from);
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.database.path.trim().is_empty() {
            return Err(ConfigError::MissingField("database.path".to_string()).into());
        }
        self.scheduling.validate()?;

        if let Some(blotato) = &self.blotato {
            for name in blotato.accounts.keys().chain(blotato.rate_limits.keys()) {
                check_platform_key("blotato", name)?;
            }
        }
        if let Some(analytics) = &self.analytics {
            for (name, host) in &analytics.hosts {
                check_platform_key("analytics.hosts", name)?;
                if !host.path.contains("{id}") {
                    return Err(ConfigError::InvalidValue {
                        field: format!("analytics.hosts.{}.path", name),
                        reason: "must contain an {id} placeholder".to_string(),
                    }
                    .into());
                }
            }
        }
        Ok(())
    }
}

fn check_platform_key(section: &str, name: &str) -> std::result::Result<(), ConfigError> {
    name.parse::<TargetPlatform>()
        .map(|_| ())
        .map_err(|_| ConfigError::InvalidValue {
            field: format!("{}.{}", section, name),
            reason: "unknown platform".to_string(),
        })
}

/// Resolve the configuration file path following XDG Base Directory spec
pub fn resolve_config_path() -> Result<PathBuf> {
    if let Ok(path) = std::env::var(CONFIG_ENV) {
        return Ok(PathBuf::from(shellexpand::tilde(&path).to_string()));
    }

    let config_dir = dirs::config_dir()
        .ok_or_else(|| ConfigError::MissingField("config directory".to_string()))?;

    Ok(config_dir.join("cadence").join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CadenceError;
    use secrecy::ExposeSecret;
    use serial_test::serial;

    const FULL: &str = r#"
[database]
path = "/tmp/cadence-test.db"

[scheduling]
poll_interval = 30
max_attempts = 3
base_delay = 10
max_delay = 600

[blotato]
api_key = "blt_test"
[blotato.accounts]
tiktok = "acc_1"
x = "acc_2"
[blotato.rate_limits]
tiktok = 10

[analytics]
api_key = "rapid_test"
[analytics.hosts]
tiktok = { host = "tiktok-scraper7.p.rapidapi.com", path = "/video/info?video_id={id}" }
"#;

    #[test]
    #[serial]
    fn test_parse_full_config() {
        std::env::remove_var(DB_PATH_ENV);
        let config = Config::from_toml_str(FULL).unwrap();

        assert_eq!(config.scheduling.poll_interval, 30);
        assert_eq!(config.scheduling.max_attempts, 3);
        // unspecified fields keep their defaults
        assert_eq!(config.scheduling.concurrency, 4);
        assert_eq!(config.scheduling.jitter_ratio, 0.2);

        let blotato = config.blotato.as_ref().unwrap();
        assert_eq!(blotato.api_base, DEFAULT_BLOTATO_API_BASE);
        assert_eq!(blotato.account_for(TargetPlatform::Tiktok), Some("acc_1"));
        assert_eq!(blotato.account_for(TargetPlatform::Twitter), Some("acc_2"));
        assert_eq!(blotato.account_for(TargetPlatform::Instagram), None);
        assert_eq!(
            blotato.rate_limits().unwrap().get(&TargetPlatform::Tiktok),
            Some(&10)
        );

        let analytics = config.analytics.as_ref().unwrap();
        let host = analytics.host_for(TargetPlatform::Tiktok).unwrap();
        assert_eq!(host.host, "tiktok-scraper7.p.rapidapi.com");
    }

    #[test]
    #[serial]
    fn test_debug_output_hides_api_keys() {
        std::env::remove_var(DB_PATH_ENV);
        let config = Config::from_toml_str(FULL).unwrap();

        let rendered = format!("{:?}", config);
        assert!(!rendered.contains("blt_test"));
        assert!(!rendered.contains("rapid_test"));
        assert!(rendered.contains("acc_1"));

        let blotato = config.blotato.as_ref().unwrap();
        assert_eq!(blotato.api_key.as_ref().unwrap().expose_secret(), "blt_test");
    }

    #[test]
    #[serial]
    fn test_minimal_config_uses_defaults() {
        std::env::remove_var(DB_PATH_ENV);
        let config = Config::from_toml_str("[database]\npath = \"x.db\"\n").unwrap();
        assert_eq!(config.scheduling, SchedulingConfig::default());
        assert!(config.blotato.is_none());
        assert!(config.analytics.is_none());
    }

    #[test]
    fn test_retry_policy_from_scheduling() {
        let policy = SchedulingConfig::default().retry_policy();
        assert_eq!(policy.base_delay, Duration::from_secs(60));
        assert_eq!(policy.max_delay, Duration::from_secs(3600));
        assert_eq!(policy.max_attempts, 5);
    }

    #[test]
    #[serial]
    fn test_rejects_bad_jitter() {
        let toml = "[database]\npath = \"x.db\"\n[scheduling]\njitter_ratio = 1.5\n";
        let err = Config::from_toml_str(toml).unwrap_err();
        assert!(matches!(err, CadenceError::Config(ConfigError::InvalidValue { .. })));
        assert!(err.to_string().contains("jitter_ratio"));
    }

    #[test]
    #[serial]
    fn test_rejects_max_delay_below_base() {
        let toml = "[database]\npath = \"x.db\"\n[scheduling]\nbase_delay = 100\nmax_delay = 50\n";
        assert!(Config::from_toml_str(toml).is_err());
    }

    #[test]
    #[serial]
    fn test_rejects_unknown_platform_key() {
        let toml = "[database]\npath = \"x.db\"\n[blotato.accounts]\nmyspace = \"a\"\n";
        let err = Config::from_toml_str(toml).unwrap_err();
        assert!(err.to_string().contains("myspace"));
    }

    #[test]
    #[serial]
    fn test_rejects_host_path_without_placeholder() {
        let toml = r#"
[database]
path = "x.db"
[analytics.hosts]
tiktok = { host = "h", path = "/video/info" }
"#;
        let err = Config::from_toml_str(toml).unwrap_err();
        assert!(err.to_string().contains("{id}"));
    }

    #[test]
    #[serial]
    fn test_env_overrides_api_keys_and_db_path() {
        std::env::set_var(BLOTATO_KEY_ENV, "from-env");
        std::env::set_var(DB_PATH_ENV, "/tmp/override.db");

        let toml = "[database]\npath = \"x.db\"\n[blotato]\n";
        let config = Config::from_toml_str(toml).unwrap();
        assert_eq!(config.database.path, "/tmp/override.db");
        let key = config.blotato.unwrap().api_key.unwrap();
        assert_eq!(key.expose_secret(), "from-env");

        std::env::remove_var(BLOTATO_KEY_ENV);
        std::env::remove_var(DB_PATH_ENV);
    }

    #[test]
    #[serial]
    fn test_resolve_config_path_from_env() {
        std::env::set_var(CONFIG_ENV, "/etc/cadence/config.toml");
        assert_eq!(
            resolve_config_path().unwrap(),
            PathBuf::from("/etc/cadence/config.toml")
        );
        std::env::remove_var(CONFIG_ENV);
    }

    #[test]
    #[serial]
    fn test_load_from_missing_path() {
        let err = Config::load_from_path(Path::new("/nonexistent/cadence.toml")).unwrap_err();
        assert!(matches!(err, CadenceError::Config(ConfigError::ReadError(_))));
    }
}
