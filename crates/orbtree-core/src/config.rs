//! orbtree configuration
//!
//! A JSON file whose every field is optional: absent fields and absent nested
//! sections fall back to defaults. A handful of environment variables override
//! the file.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::advisory::service::AdvisorySettings;
use crate::cache::ci_status::CiTtlPolicy;
use crate::domain::error::{OrbError, Result};
use crate::domain::model::DEFAULT_BRANCH;
use crate::source::gh::RepoFilter;

pub const ENV_ORG: &str = "ORBTREE_ORG";
pub const ENV_GATEWAY_URL: &str = "ORBTREE_GATEWAY_URL";
pub const ENV_GATEWAY_TOKEN: &str = "ORBTREE_GATEWAY_TOKEN";

/// Upper bound for every TTL, timeout and interval: one year.
pub const MAX_DURATION_SECS: u64 = 365 * 24 * 60 * 60;

fn chrono_seconds(secs: u64) -> chrono::Duration {
    chrono::Duration::seconds(secs.min(MAX_DURATION_SECS) as i64)
}

/// CI status cache tuning
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CiCacheConfig {
    pub pending_ttl_secs: u64,
    pub stable_ttl_secs: u64,
    pub unknown_ttl_secs: u64,
    pub max_requests_per_cycle: usize,
    pub fetch_timeout_secs: u64,
}

impl Default for CiCacheConfig {
    fn default() -> Self {
        Self {
            pending_ttl_secs: 300,
            stable_ttl_secs: 900,
            unknown_ttl_secs: 600,
            max_requests_per_cycle: 10,
            fetch_timeout_secs: 30,
        }
    }
}

impl CiCacheConfig {
    pub fn ttl_policy(&self) -> CiTtlPolicy {
        CiTtlPolicy {
            pending: chrono_seconds(self.pending_ttl_secs),
            stable: chrono_seconds(self.stable_ttl_secs),
            unknown: chrono_seconds(self.unknown_ttl_secs),
        }
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RefreshConfig {
    pub interval_secs: u64,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self { interval_secs: 900 }
    }
}

impl RefreshConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

/// Advisory suggestion cache and call limits
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SuggestionConfig {
    pub ttl_secs: u64,
    pub gateway_timeout_secs: u64,
    /// How long a caller waits before giving up; the call itself continues.
    pub wait_timeout_secs: Option<u64>,
}

impl Default for SuggestionConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 300,
            gateway_timeout_secs: 30,
            wait_timeout_secs: None,
        }
    }
}

impl SuggestionConfig {
    pub fn ttl(&self) -> chrono::Duration {
        chrono_seconds(self.ttl_secs)
    }

    pub fn settings(&self) -> AdvisorySettings {
        AdvisorySettings {
            gateway_timeout: Duration::from_secs(self.gateway_timeout_secs),
            wait_timeout: self.wait_timeout_secs.map(Duration::from_secs),
            ..AdvisorySettings::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub endpoint: Option<String>,
    #[serde(skip_serializing)]
    pub token: Option<String>,
    pub user_agent: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            token: None,
            user_agent: crate::advisory::http::DEFAULT_USER_AGENT.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RepoFilterConfig {
    pub exclude: Vec<String>,
    pub include_archived: bool,
    pub min_pushed_days_ago: i64,
}

impl Default for RepoFilterConfig {
    fn default() -> Self {
        Self {
            exclude: Vec::new(),
            include_archived: false,
            min_pushed_days_ago: 365,
        }
    }
}

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrbConfig {
    pub organization: String,
    pub default_branch: String,
    /// Age after which the renderer marks data as stale.
    pub stale_minutes: u64,
    pub max_repos: usize,
    /// List the commits each branch adds over its parent when fetching.
    pub fetch_commits: bool,
    pub ci_cache: CiCacheConfig,
    pub refresh: RefreshConfig,
    pub suggestions: SuggestionConfig,
    pub gateway: GatewayConfig,
    pub repo_filters: RepoFilterConfig,
}

impl Default for OrbConfig {
    fn default() -> Self {
        Self {
            organization: String::new(),
            default_branch: DEFAULT_BRANCH.to_string(),
            stale_minutes: 60,
            max_repos: 50,
            fetch_commits: true,
            ci_cache: CiCacheConfig::default(),
            refresh: RefreshConfig::default(),
            suggestions: SuggestionConfig::default(),
            gateway: GatewayConfig::default(),
            repo_filters: RepoFilterConfig::default(),
        }
    }
}

impl OrbConfig {
    /// Parse a config document. Missing fields take defaults.
    pub fn from_json(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    /// Load `path` and apply environment overrides.
    ///
    /// A missing file yields defaults. An unreadable or unparseable file is
    /// logged and also yields defaults.
    pub fn load(path: &Path) -> Self {
        let mut config = match std::fs::read_to_string(path) {
            Ok(raw) => Self::from_json(&raw).unwrap_or_else(|e| {
                warn!(path = %path.display(), error = %e, "could not load config, using defaults");
                Self::default()
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "no config file, using defaults");
                Self::default()
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "could not read config, using defaults");
                Self::default()
            }
        };
        config.apply_env_overrides(|key| std::env::var(key).ok());
        config
    }

    /// Apply overrides from `lookup` (normally the process environment).
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        if let Some(org) = non_empty(ENV_ORG) {
            self.organization = org;
        }
        if let Some(url) = non_empty(ENV_GATEWAY_URL) {
            self.gateway.endpoint = Some(url);
        }
        if let Some(token) = non_empty(ENV_GATEWAY_TOKEN) {
            self.gateway.token = Some(token);
        }
    }

    /// Reject settings that would make a cache or the refresh loop degenerate.
    pub fn validate(&self) -> Result<()> {
        let ci = &self.ci_cache;
        let too_long = |secs: u64| secs > MAX_DURATION_SECS;
        let checks = [
            (ci.pending_ttl_secs == 0, "ci_cache.pending_ttl_secs must be > 0"),
            (ci.stable_ttl_secs == 0, "ci_cache.stable_ttl_secs must be > 0"),
            (ci.unknown_ttl_secs == 0, "ci_cache.unknown_ttl_secs must be > 0"),
            (ci.max_requests_per_cycle == 0, "ci_cache.max_requests_per_cycle must be > 0"),
            (ci.fetch_timeout_secs == 0, "ci_cache.fetch_timeout_secs must be > 0"),
            (self.suggestions.ttl_secs == 0, "suggestions.ttl_secs must be > 0"),
            (
                self.suggestions.gateway_timeout_secs == 0,
                "suggestions.gateway_timeout_secs must be > 0",
            ),
            (self.refresh.interval_secs == 0, "refresh.interval_secs must be > 0"),
            (self.default_branch.trim().is_empty(), "default_branch must not be empty"),
            (
                [
                    ci.pending_ttl_secs,
                    ci.stable_ttl_secs,
                    ci.unknown_ttl_secs,
                    ci.fetch_timeout_secs,
                    self.suggestions.ttl_secs,
                    self.suggestions.gateway_timeout_secs,
                    self.suggestions.wait_timeout_secs.unwrap_or(0),
                    self.refresh.interval_secs,
                ]
                .into_iter()
                .any(too_long),
                "durations must not exceed one year (31536000 seconds)",
            ),
        ];
        match checks.iter().find(|(failed, _)| *failed) {
            Some((_, message)) => Err(OrbError::InvalidConfig((*message).to_string())),
            None => Ok(()),
        }
    }

    pub fn repo_filter(&self) -> RepoFilter {
        RepoFilter {
            exclude: self.repo_filters.exclude.clone(),
            include_archived: self.repo_filters.include_archived,
            min_pushed_days_ago: self.repo_filters.min_pushed_days_ago,
            max_repos: self.max_repos,
        }
    }
}
