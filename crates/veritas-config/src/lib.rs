// SPDX-License-Identifier: MIT OR Apache-2.0
//! Configuration loading, validation, and env overlay for the provenance
//! service.
//!
//! This crate provides [`AppConfig`] — the top-level runtime settings —
//! together with helpers for loading from TOML files, applying environment
//! overrides, and producing advisory [`ConfigWarning`]s.
#![deny(unsafe_code)]
#![warn(missing_docs)]

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors that can occur during configuration loading or validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The requested configuration file was not found.
    #[error("config file not found: {path}")]
    FileNotFound {
        /// Path that was requested.
        path: String,
    },

    /// The file could not be parsed as valid TOML.
    #[error("failed to parse config: {reason}")]
    ParseError {
        /// Human-readable parse error detail.
        reason: String,
    },

    /// Semantic validation failed (one or more problems).
    #[error("config validation failed: {reasons:?}")]
    ValidationError {
        /// Individual validation failure messages.
        reasons: Vec<String>,
    },
}

// ---------------------------------------------------------------------------
// Warnings
// ---------------------------------------------------------------------------

/// Advisory-level issues that do not prevent operation but deserve attention.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigWarning {
    /// No API keys are configured while `require_api_key` is enabled.
    NoApiKeysConfigured,
    /// A provider is enabled but has no adapter-specific settings.
    ProviderMissingSettings {
        /// Provider name.
        provider: String,
    },
    /// A rate-limit bucket has an unusually large window.
    LargeRateLimitWindow {
        /// Bucket name.
        bucket: String,
        /// Window size in seconds.
        secs: u64,
    },
    /// A recommended optional field is missing.
    MissingOptionalField {
        /// Name of the missing field.
        field: String,
        /// Why it matters.
        hint: String,
    },
}

impl std::fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigWarning::NoApiKeysConfigured => {
                write!(f, "require_api_key is set but api_keys is empty")
            }
            ConfigWarning::ProviderMissingSettings { provider } => {
                write!(f, "provider '{provider}' is enabled but has no settings")
            }
            ConfigWarning::LargeRateLimitWindow { bucket, secs } => {
                write!(f, "rate-limit bucket '{bucket}' has a large window ({secs}s)")
            }
            ConfigWarning::MissingOptionalField { field, hint } => {
                write!(f, "missing optional field '{field}': {hint}")
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Config types
// ---------------------------------------------------------------------------

/// Top-level runtime configuration for the provenance service.
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct AppConfig {
    /// Connection string for the analysis/audit store.
    #[serde(default = "default_database_url")]
    pub database_url: String,

    /// Optional connection string for a shared rate-limit/spend cache
    /// (e.g. Redis). When absent, rate-limiting runs in-process.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_url: Option<String>,

    /// Whether the `X-API-Key` header is required on inbound requests.
    #[serde(default)]
    pub require_api_key: bool,

    /// Accepted API keys, when `require_api_key` is set.
    #[serde(default)]
    pub api_keys: Vec<String>,

    /// Per-bucket rate-limit settings.
    #[serde(default)]
    pub rate_limit: BTreeMap<String, RateLimitConfig>,

    /// Daily spend cap, in abstract points, across all buckets.
    #[serde(default = "default_spend_cap")]
    pub daily_spend_cap_points: u64,

    /// Whether the Consensus Engine fans out to external providers at all.
    #[serde(default = "default_true")]
    pub consensus_enabled: bool,

    /// Per-provider timeout applied to every probe.
    #[serde(default = "default_provider_timeout_seconds")]
    pub provider_timeout_seconds: u64,

    /// Number of probe attempts per provider before it is marked
    /// `unavailable` for a single consensus call.
    #[serde(default = "default_provider_retry_attempts")]
    pub provider_retry_attempts: u32,

    /// Configured external providers, in probe order.
    #[serde(default)]
    pub providers: Vec<ProviderConfig>,

    /// Decision thresholds, keyed by modality (`"text"`, `"image"`, ...).
    #[serde(default)]
    pub threshold: BTreeMap<String, f64>,

    /// Scheduler settings.
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Webhook dispatcher settings.
    #[serde(default)]
    pub webhook: WebhookConfig,

    /// Audit pipeline settings.
    #[serde(default)]
    pub audit: AuditConfig,

    /// Window within which a repeat `(content_type, content_hash)` is
    /// treated as a duplicate by `AnalysisStore::put`, in seconds.
    #[serde(default = "default_dedup_window_seconds")]
    pub analysis_dedup_window_seconds: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_url: default_database_url(),
            cache_url: None,
            require_api_key: false,
            api_keys: Vec::new(),
            rate_limit: default_rate_limit_buckets(),
            daily_spend_cap_points: default_spend_cap(),
            consensus_enabled: true,
            provider_timeout_seconds: default_provider_timeout_seconds(),
            provider_retry_attempts: default_provider_retry_attempts(),
            providers: Vec::new(),
            threshold: default_thresholds(),
            scheduler: SchedulerConfig::default(),
            webhook: WebhookConfig::default(),
            audit: AuditConfig::default(),
            analysis_dedup_window_seconds: default_dedup_window_seconds(),
        }
    }
}

fn default_dedup_window_seconds() -> u64 {
    300
}

fn default_database_url() -> String {
    "sqlite://veritas.db".into()
}

fn default_spend_cap() -> u64 {
    1000
}

fn default_true() -> bool {
    true
}

fn default_provider_timeout_seconds() -> u64 {
    8
}

fn default_provider_retry_attempts() -> u32 {
    3
}

fn default_thresholds() -> BTreeMap<String, f64> {
    BTreeMap::from([
        ("text".into(), 0.5),
        ("image".into(), 0.5),
        ("audio".into(), 0.5),
        ("video".into(), 0.5),
    ])
}

fn default_rate_limit_buckets() -> BTreeMap<String, RateLimitConfig> {
    BTreeMap::from([
        ("text".into(), RateLimitConfig { window_seconds: 60, max_requests: 100, cost_points: 1 }),
        ("media".into(), RateLimitConfig { window_seconds: 60, max_requests: 40, cost_points: 5 }),
        ("batch".into(), RateLimitConfig { window_seconds: 60, max_requests: 20, cost_points: 20 }),
        ("intel".into(), RateLimitConfig { window_seconds: 60, max_requests: 20, cost_points: 50 }),
        ("default".into(), RateLimitConfig { window_seconds: 60, max_requests: 30, cost_points: 1 }),
    ])
}

/// Fixed-window rate-limit settings for a single bucket.
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub struct RateLimitConfig {
    /// Window size in seconds.
    pub window_seconds: u64,
    /// Maximum number of requests admitted per window.
    pub max_requests: u64,
    /// Spend-ledger cost of one admitted request in this bucket.
    pub cost_points: u64,
}

/// Settings for one external consensus provider.
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct ProviderConfig {
    /// Provider name (`"copyleaks"`, `"reality_defender"`, `"c2pa"`, `"hive"`).
    pub name: String,
    /// Whether this provider is probed.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Relative weight in the consensus weighted mean.
    #[serde(default = "default_provider_weight")]
    pub weight: f64,
    /// Base URL of the provider's API, if applicable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    /// Name of the environment variable holding this provider's API key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,
}

fn default_provider_weight() -> f64 {
    1.0
}

/// Scheduler configuration.
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct SchedulerConfig {
    /// Whether the scheduler tick loop runs at all.
    #[serde(default)]
    pub enabled: bool,
    /// Interval between ticks, in seconds.
    #[serde(default = "default_tick_interval_seconds")]
    pub tick_interval_seconds: u64,
    /// Maximum concurrently in-flight scheduled jobs.
    #[serde(default = "default_max_concurrent_jobs")]
    pub max_concurrent_jobs: usize,
    /// Monthly cap on external requests across all scheduled jobs.
    #[serde(default = "default_monthly_request_cap")]
    pub monthly_request_cap: u64,
    /// Maximum posts fetched from one page of an external API.
    #[serde(default = "default_page_cap")]
    pub page_cap: u32,

    /// Whether a fully-capped month halts further scheduled work until an
    /// operator clears the kill-switch (see `SchedulerUsage::is_capped`).
    #[serde(default = "default_true")]
    pub kill_switch_on_cap: bool,

    /// Recurring jobs the scheduler dispatches on each eligible tick.
    #[serde(default)]
    pub handles: Vec<ScheduledJobConfig>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            tick_interval_seconds: default_tick_interval_seconds(),
            max_concurrent_jobs: default_max_concurrent_jobs(),
            monthly_request_cap: default_monthly_request_cap(),
            page_cap: default_page_cap(),
            kill_switch_on_cap: true,
            handles: Vec::new(),
        }
    }
}

/// Configuration for one recurring scheduled job, as declared in
/// `scheduler.handles[]`.
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct ScheduledJobConfig {
    /// Target identifier (e.g. a social account handle).
    pub handle: String,
    /// How often the job is dispatched, in seconds.
    pub interval_seconds: u64,
    /// How many days of history to collect per run.
    pub window_days: u32,
    /// Maximum number of posts to collect per run.
    pub max_posts: u32,
    /// Optional search query scoping the collection.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
}

fn default_tick_interval_seconds() -> u64 {
    30
}

fn default_max_concurrent_jobs() -> usize {
    4
}

fn default_monthly_request_cap() -> u64 {
    50_000
}

fn default_page_cap() -> u32 {
    100
}

/// Webhook dispatcher configuration.
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct WebhookConfig {
    /// Base backoff delay in seconds before the first retry.
    #[serde(default = "default_base_backoff_seconds")]
    pub base_backoff_seconds: u64,
    /// Ceiling applied to the exponential backoff.
    #[serde(default = "default_max_backoff_seconds")]
    pub max_backoff_seconds: u64,
    /// Maximum delivery attempts before an item is dead-lettered.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Path to the durable queue file.
    #[serde(default = "default_queue_file_path")]
    pub queue_file_path: String,

    /// Path to the append-only dead-letter log.
    #[serde(default = "default_dead_letter_file_path")]
    pub dead_letter_file_path: String,

    /// Destination URLs every enqueued event is delivered to.
    #[serde(default)]
    pub urls: Vec<String>,

    /// Per-attempt HTTP timeout, in seconds.
    #[serde(default = "default_delivery_timeout_seconds")]
    pub delivery_timeout_seconds: u64,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            base_backoff_seconds: default_base_backoff_seconds(),
            max_backoff_seconds: default_max_backoff_seconds(),
            max_attempts: default_max_attempts(),
            queue_file_path: default_queue_file_path(),
            dead_letter_file_path: default_dead_letter_file_path(),
            urls: Vec::new(),
            delivery_timeout_seconds: default_delivery_timeout_seconds(),
        }
    }
}

fn default_dead_letter_file_path() -> String {
    "webhook_dead_letter.json".into()
}

fn default_delivery_timeout_seconds() -> u64 {
    10
}

fn default_base_backoff_seconds() -> u64 {
    2
}

fn default_max_backoff_seconds() -> u64 {
    300
}

fn default_max_attempts() -> u32 {
    5
}

fn default_queue_file_path() -> String {
    "webhook_queue.json".into()
}

/// Audit pipeline configuration.
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct AuditConfig {
    /// Whether the audit pipeline is active at all.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Maximum number of events retained in the in-memory ring buffer.
    #[serde(default = "default_ring_buffer_capacity")]
    pub ring_buffer_capacity: usize,
    /// Whether every HTTP request/response pair emits an `http.request`
    /// audit event.
    #[serde(default = "default_true")]
    pub log_http_requests: bool,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ring_buffer_capacity: default_ring_buffer_capacity(),
            log_http_requests: true,
        }
    }
}

fn default_ring_buffer_capacity() -> usize {
    20_000
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

/// Load an [`AppConfig`] from an optional TOML file path.
///
/// * If `path` is `Some`, reads and parses the file.
/// * If `path` is `None`, returns [`AppConfig::default()`].
///
/// Environment variable overrides are applied on top in both cases.
pub fn load_config(path: Option<&Path>) -> Result<AppConfig, ConfigError> {
    let mut config = match path {
        Some(p) => {
            let content = std::fs::read_to_string(p).map_err(|_| ConfigError::FileNotFound {
                path: p.display().to_string(),
            })?;
            parse_toml(&content)?
        }
        None => AppConfig::default(),
    };
    apply_env_overrides(&mut config);
    Ok(config)
}

/// Parse a TOML string into an [`AppConfig`].
pub fn parse_toml(content: &str) -> Result<AppConfig, ConfigError> {
    toml::from_str::<AppConfig>(content).map_err(|e| ConfigError::ParseError {
        reason: e.to_string(),
    })
}

// ---------------------------------------------------------------------------
// Env overrides
// ---------------------------------------------------------------------------

/// Apply environment variable overrides.
///
/// Recognised variables:
/// - `VERITAS_DATABASE_URL`
/// - `VERITAS_CACHE_URL`
/// - `VERITAS_REQUIRE_API_KEY` (`"true"`/`"false"`)
/// - `VERITAS_API_KEYS` (comma-separated)
/// - `VERITAS_DAILY_SPEND_CAP_POINTS`
pub fn apply_env_overrides(config: &mut AppConfig) {
    if let Ok(val) = std::env::var("VERITAS_DATABASE_URL") {
        config.database_url = val;
    }
    if let Ok(val) = std::env::var("VERITAS_CACHE_URL") {
        config.cache_url = Some(val);
    }
    if let Ok(val) = std::env::var("VERITAS_REQUIRE_API_KEY") {
        config.require_api_key = val.eq_ignore_ascii_case("true") || val == "1";
    }
    if let Ok(val) = std::env::var("VERITAS_API_KEYS") {
        config.api_keys = val
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect();
    }
    if let Ok(val) = std::env::var("VERITAS_DAILY_SPEND_CAP_POINTS") {
        if let Ok(parsed) = val.parse::<u64>() {
            config.daily_spend_cap_points = parsed;
        }
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

const LARGE_WINDOW_THRESHOLD_SECS: u64 = 86_400;

/// Validate a parsed configuration, returning advisory warnings.
///
/// Hard errors (empty database URL, zero-valued rate-limit settings, out of
/// range thresholds) are returned as a [`ConfigError::ValidationError`]; soft
/// issues come back as warnings.
pub fn validate_config(config: &AppConfig) -> Result<Vec<ConfigWarning>, ConfigError> {
    let mut errors: Vec<String> = Vec::new();
    let mut warnings: Vec<ConfigWarning> = Vec::new();

    if config.database_url.trim().is_empty() {
        errors.push("database_url must not be empty".into());
    }

    if config.require_api_key && config.api_keys.is_empty() {
        warnings.push(ConfigWarning::NoApiKeysConfigured);
    }

    for (bucket, rl) in &config.rate_limit {
        if rl.window_seconds == 0 {
            errors.push(format!("rate_limit '{bucket}': window_seconds must be > 0"));
        }
        if rl.max_requests == 0 {
            errors.push(format!("rate_limit '{bucket}': max_requests must be > 0"));
        }
        if rl.window_seconds > LARGE_WINDOW_THRESHOLD_SECS {
            warnings.push(ConfigWarning::LargeRateLimitWindow {
                bucket: bucket.clone(),
                secs: rl.window_seconds,
            });
        }
    }

    for (modality, threshold) in &config.threshold {
        if !(0.0..=1.0).contains(threshold) {
            errors.push(format!(
                "threshold.{modality} = {threshold} is out of range [0, 1]"
            ));
        }
    }

    for provider in &config.providers {
        if provider.name.trim().is_empty() {
            errors.push("provider name must not be empty".into());
        }
        if provider.weight < 0.0 {
            errors.push(format!("provider '{}': weight must be >= 0", provider.name));
        }
        if provider.enabled && provider.base_url.is_none() && provider.api_key_env.is_none() {
            warnings.push(ConfigWarning::ProviderMissingSettings {
                provider: provider.name.clone(),
            });
        }
    }

    if config.scheduler.enabled && config.scheduler.tick_interval_seconds == 0 {
        errors.push("scheduler.tick_interval_seconds must be > 0 when enabled".into());
    }

    if config.webhook.base_backoff_seconds == 0 {
        errors.push("webhook.base_backoff_seconds must be > 0".into());
    }
    if config.webhook.max_backoff_seconds < config.webhook.base_backoff_seconds {
        errors.push("webhook.max_backoff_seconds must be >= base_backoff_seconds".into());
    }

    if config.cache_url.is_none() {
        warnings.push(ConfigWarning::MissingOptionalField {
            field: "cache_url".into(),
            hint: "rate-limit state will not be shared across instances".into(),
        });
    }

    if errors.is_empty() {
        Ok(warnings)
    } else {
        Err(ConfigError::ValidationError { reasons: errors })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
