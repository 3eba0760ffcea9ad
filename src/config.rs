// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Configuration for the contact gatekeeper.
//!
//! Every value has a default so a bare `cargo run` starts a degraded but
//! working service. Secrets are optional: an unset CAPTCHA secret skips
//! CAPTCHA verification, an unset mail API key disables notification.

use ipnet::IpNet;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Configuration for the contact gatekeeper service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Server bind address (default: 0.0.0.0:8080)
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// Peers (IPs or CIDR ranges) whose `CF-Connecting-IP` and
    /// `X-Forwarded-For` headers are honoured. Empty trusts nobody.
    #[serde(default)]
    pub trusted_proxies: Vec<String>,

    /// Hostnames served by this deployment
    #[serde(default)]
    pub site: SiteConfig,

    /// Rate limiting and timing heuristics
    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    /// CAPTCHA verification
    #[serde(default)]
    pub captcha: CaptchaConfig,

    /// Outbound notification mail
    #[serde(default)]
    pub email: EmailConfig,

    /// Admin read access
    #[serde(default)]
    pub admin: AdminConfig,

    /// Backup persistence
    #[serde(default)]
    pub backup: BackupConfig,

    /// Key-value store bindings
    #[serde(default)]
    pub stores: StoreConfig,

    /// Metrics configuration
    #[serde(default)]
    pub metrics: MetricsConfig,

    /// Timeout applied to every outbound HTTP call, in seconds (default: 10)
    #[serde(default = "default_outbound_timeout_secs")]
    pub outbound_timeout_secs: u64,
}

/// Hostnames for the apex-to-www redirect.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SiteConfig {
    /// Bare hostname that gets redirected; `None` disables the redirect
    #[serde(default)]
    pub apex_host: Option<String>,

    /// Canonical hostname; derived as `www.<apex>` when unset
    #[serde(default)]
    pub www_host: Option<String>,
}

/// Fixed-window rate limiting per client IP.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Maximum accepted submissions per window and IP (default: 5)
    #[serde(default = "default_max_submissions")]
    pub max_submissions: u32,

    /// Window length in seconds (default: 900)
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,

    /// Submissions from one IP closer together than this are treated as
    /// automated (default: 3000)
    #[serde(default = "default_min_interval_ms")]
    pub min_interval_ms: u64,

    /// Lifetime of a timing marker in seconds (default: 60)
    #[serde(default = "default_timing_ttl_secs")]
    pub timing_ttl_secs: u64,

    /// Entry limit of the in-process fallback store (default: 10000)
    #[serde(default = "default_fallback_capacity")]
    pub fallback_capacity: usize,
}

/// CAPTCHA verification configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptchaConfig {
    /// Turnstile secret; `None` disables CAPTCHA checks entirely
    #[serde(default)]
    pub secret_key: Option<String>,

    /// Verification endpoint
    #[serde(default = "default_captcha_verify_url")]
    pub verify_url: String,
}

/// Notification mail configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailConfig {
    /// Resend API key; `None` disables notification
    #[serde(default)]
    pub api_key: Option<String>,

    /// Mail API endpoint
    #[serde(default = "default_email_api_url")]
    pub api_url: String,

    /// Sender mailbox
    #[serde(default = "default_email_from")]
    pub from: String,

    /// Recipients of every notification
    #[serde(default = "default_email_to")]
    pub to: Vec<String>,
}

/// Admin endpoint configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AdminConfig {
    /// Shared secret expected in the `key` query parameter
    #[serde(default)]
    pub api_key: Option<String>,
}

/// Backup persistence configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupConfig {
    /// How long records and daily indexes are kept (default: 90)
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,

    /// Days covered by the default admin listing (default: 7)
    #[serde(default = "default_listing_days")]
    pub listing_days: u32,
}

/// Which store implementation backs a binding.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum StoreBackend {
    /// Binding is absent
    #[default]
    None,
    /// Bounded in-process store
    Memory,
    /// Cloudflare Workers KV namespace
    Cloudflare {
        /// Namespace id
        namespace_id: String,
    },
}

/// Key-value store bindings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Store for rate-limit counters and timing markers
    #[serde(default)]
    pub rate_limit: StoreBackend,

    /// Store for submission backups; falls back to `rate_limit` when unbound
    #[serde(default)]
    pub backup: StoreBackend,

    /// Credentials for Cloudflare-backed bindings
    #[serde(default)]
    pub cloudflare: Option<CloudflareConfig>,

    /// Entry limit for memory-backed bindings (default: 10000)
    #[serde(default = "default_fallback_capacity")]
    pub memory_capacity: usize,
}

/// Cloudflare API credentials.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloudflareConfig {
    pub account_id: String,
    pub api_token: String,
    #[serde(default = "default_cloudflare_api_base")]
    pub api_base: String,
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Enable Prometheus metrics endpoint (default: true)
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Metrics endpoint path (default: /metrics)
    #[serde(default = "default_metrics_path")]
    pub path: String,
}

/// Configuration that could not be loaded.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {var}: {value:?}")]
    InvalidValue { var: &'static str, value: String },

    #[error("Store binding {0} uses Cloudflare but CLOUDFLARE_ACCOUNT_ID/CLOUDFLARE_API_TOKEN are not set")]
    MissingCloudflareCredentials(&'static str),

    #[error("Failed to build HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),

    #[error("Failed to set up metrics: {0}")]
    Metrics(#[from] crate::metrics::MetricsError),
}

// Default value functions
fn default_bind_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_max_submissions() -> u32 {
    5
}

fn default_window_secs() -> u64 {
    15 * 60
}

fn default_min_interval_ms() -> u64 {
    3000
}

fn default_timing_ttl_secs() -> u64 {
    60
}

fn default_fallback_capacity() -> usize {
    10_000
}

fn default_captcha_verify_url() -> String {
    "https://challenges.cloudflare.com/turnstile/v0/siteverify".to_string()
}

fn default_email_api_url() -> String {
    "https://api.resend.com/emails".to_string()
}

fn default_email_from() -> String {
    "Website Kontaktformular <noreply@mail.kost-sicherheitstechnik.de>".to_string()
}

fn default_email_to() -> Vec<String> {
    vec![
        "info@kost-sicherheitstechnik.de".to_string(),
        "info@graphiks.de".to_string(),
    ]
}

fn default_retention_days() -> u32 {
    90
}

fn default_listing_days() -> u32 {
    7
}

fn default_cloudflare_api_base() -> String {
    "https://api.cloudflare.com/client/v4".to_string()
}

fn default_outbound_timeout_secs() -> u64 {
    10
}

fn default_true() -> bool {
    true
}

fn default_metrics_path() -> String {
    "/metrics".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            trusted_proxies: Vec::new(),
            site: SiteConfig::default(),
            rate_limit: RateLimitConfig::default(),
            captcha: CaptchaConfig::default(),
            email: EmailConfig::default(),
            admin: AdminConfig::default(),
            backup: BackupConfig::default(),
            stores: StoreConfig::default(),
            metrics: MetricsConfig::default(),
            outbound_timeout_secs: default_outbound_timeout_secs(),
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_submissions: default_max_submissions(),
            window_secs: default_window_secs(),
            min_interval_ms: default_min_interval_ms(),
            timing_ttl_secs: default_timing_ttl_secs(),
            fallback_capacity: default_fallback_capacity(),
        }
    }
}

impl Default for CaptchaConfig {
    fn default() -> Self {
        Self {
            secret_key: None,
            verify_url: default_captcha_verify_url(),
        }
    }
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_url: default_email_api_url(),
            from: default_email_from(),
            to: default_email_to(),
        }
    }
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            retention_days: default_retention_days(),
            listing_days: default_listing_days(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            path: default_metrics_path(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables, reading `.env` first.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let cloudflare = match (
            env_string("CLOUDFLARE_ACCOUNT_ID"),
            env_string("CLOUDFLARE_API_TOKEN"),
        ) {
            (Some(account_id), Some(api_token)) => Some(CloudflareConfig {
                account_id,
                api_token,
                api_base: env_string("CLOUDFLARE_API_BASE")
                    .unwrap_or_else(default_cloudflare_api_base),
            }),
            _ => None,
        };

        let apex_host = env_string("APEX_HOST");
        let config = Self {
            bind_addr: env_string("BIND_ADDR").unwrap_or(defaults.bind_addr),
            trusted_proxies: env_string("TRUSTED_PROXIES")
                .map(|list| split_list(&list))
                .unwrap_or_default(),
            site: SiteConfig {
                www_host: env_string("WWW_HOST"),
                apex_host,
            },
            rate_limit: RateLimitConfig {
                max_submissions: env_parse("RATE_LIMIT_MAX")?
                    .unwrap_or(defaults.rate_limit.max_submissions),
                window_secs: env_parse("RATE_LIMIT_WINDOW_SECS")?
                    .unwrap_or(defaults.rate_limit.window_secs),
                min_interval_ms: env_parse("MIN_SUBMIT_INTERVAL_MS")?
                    .unwrap_or(defaults.rate_limit.min_interval_ms),
                ..defaults.rate_limit
            },
            captcha: CaptchaConfig {
                secret_key: env_string("TURNSTILE_SECRET_KEY"),
                ..defaults.captcha
            },
            email: EmailConfig {
                api_key: env_string("RESEND_API_KEY"),
                from: env_string("CONTACT_EMAIL_FROM").unwrap_or(defaults.email.from),
                to: env_string("CONTACT_EMAIL_TO")
                    .map(|list| split_list(&list))
                    .unwrap_or(defaults.email.to),
                ..defaults.email
            },
            admin: AdminConfig {
                api_key: env_string("CONTACTS_API_KEY"),
            },
            backup: defaults.backup,
            stores: StoreConfig {
                rate_limit: env_parse("RATE_LIMIT_KV")?.unwrap_or_default(),
                backup: env_parse("CONTACT_BACKUP_KV")?.unwrap_or_default(),
                cloudflare,
                memory_capacity: defaults.stores.memory_capacity,
            },
            metrics: defaults.metrics,
            outbound_timeout_secs: env_parse("OUTBOUND_TIMEOUT_SECS")?
                .unwrap_or(defaults.outbound_timeout_secs),
        };

        Ok(config)
    }

    /// Get the timeout for outbound HTTP calls
    pub fn outbound_timeout(&self) -> Duration {
        Duration::from_secs(self.outbound_timeout_secs)
    }

    /// Parse the trusted proxy list into networks. Bare addresses become
    /// single-host networks.
    pub fn trusted_networks(&self) -> Result<Vec<IpNet>, ConfigError> {
        self.trusted_proxies
            .iter()
            .map(|entry| {
                let entry = entry.trim();
                entry
                    .parse::<IpNet>()
                    .or_else(|_| entry.parse::<IpAddr>().map(IpNet::from))
                    .map_err(|_| ConfigError::InvalidValue {
                        var: "TRUSTED_PROXIES",
                        value: entry.to_string(),
                    })
            })
            .collect()
    }

    /// Whether the backup store has a binding, directly or through the
    /// rate-limit store.
    pub fn backup_configured(&self) -> bool {
        self.stores.backup != StoreBackend::None || self.stores.rate_limit != StoreBackend::None
    }
}

impl SiteConfig {
    /// The canonical hostname the apex host redirects to.
    pub fn canonical_host(&self) -> Option<String> {
        match (&self.www_host, &self.apex_host) {
            (Some(www), _) => Some(www.clone()),
            (None, Some(apex)) => Some(format!("www.{apex}")),
            (None, None) => None,
        }
    }
}

impl RateLimitConfig {
    /// Get the rate window duration
    pub fn window_duration(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }

    /// Get the minimum interval between two submissions of one IP
    pub fn min_interval(&self) -> Duration {
        Duration::from_millis(self.min_interval_ms)
    }

    /// Get the timing marker lifetime
    pub fn timing_ttl(&self) -> Duration {
        Duration::from_secs(self.timing_ttl_secs)
    }
}

impl BackupConfig {
    /// Get the retention period
    pub fn retention(&self) -> Duration {
        Duration::from_secs(u64::from(self.retention_days) * 24 * 60 * 60)
    }
}

impl FromStr for StoreBackend {
    type Err = String;

    /// Parses `memory`, `none` or `cloudflare:<namespace-id>`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "" | "none" => Ok(Self::None),
            "memory" => Ok(Self::Memory),
            other => match other.strip_prefix("cloudflare:") {
                Some(ns) if !ns.trim().is_empty() => Ok(Self::Cloudflare {
                    namespace_id: ns.trim().to_string(),
                }),
                _ => Err(format!("unknown store binding {other:?}")),
            },
        }
    }
}

/// Read a non-empty environment variable.
fn env_string(var: &str) -> Option<String> {
    dotenvy::var(var).ok().filter(|v| !v.trim().is_empty())
}

/// Split a comma-separated list, dropping empty entries.
fn split_list(list: &str) -> Vec<String> {
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Read and parse an optional environment variable.
fn env_parse<T: FromStr>(var: &'static str) -> Result<Option<T>, ConfigError> {
    match env_string(var) {
        None => Ok(None),
        Some(value) => value
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue { var, value }),
    }
}
