// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Key-value stores with per-key expiration.
//!
//! All persistent state (rate-limit counters, timing markers, submission
//! backups) goes through [`KvStore`]. Two implementations exist:
//!
//! - [`MemoryStore`]: bounded in-process map, used for development, tests and
//!   as the rate limiter's process-local fallback
//! - [`CloudflareKvStore`]: a Workers KV namespace reached over the
//!   Cloudflare REST API
//!
//! ## Key Patterns
//!
//! ```text
//! ratelimit_{ip}          → RateLimitCounter JSON (TTL: rest of window)
//! timing_{ip}             → TimingMarker JSON (TTL: 60 s)
//! contact_{millis}_{rand} → BackupRecord JSON (TTL: retention)
//! index_{YYYY-MM-DD}      → JSON array of record ids (TTL: retention)
//! ```

use crate::config::{CloudflareConfig, ConfigError, StoreBackend, StoreConfig};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::debug;

/// Workers KV rejects expirations shorter than this.
const CLOUDFLARE_MIN_TTL_SECS: u64 = 60;

/// Store error types.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Store request timed out")]
    Timeout,

    #[error("Store transport error: {0}")]
    Transport(String),

    #[error("Store API error {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Stored value is not valid JSON for its schema: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

impl From<reqwest::Error> for StoreError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else {
            Self::Transport(err.to_string())
        }
    }
}

/// An asynchronous JSON key-value store with per-key TTL.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Fetch a value; expired or absent keys yield `None`.
    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError>;

    /// Store a value that expires after `ttl`.
    async fn put(&self, key: &str, value: Value, ttl: Duration) -> Result<(), StoreError>;

    /// Short name for logs.
    fn kind(&self) -> &'static str;
}

/// Fetch and deserialize a typed value.
pub async fn get_json<T: DeserializeOwned>(
    store: &dyn KvStore,
    key: &str,
) -> Result<Option<T>, StoreError> {
    match store.get(key).await? {
        Some(value) => Ok(Some(serde_json::from_value(value)?)),
        None => Ok(None),
    }
}

/// Serialize and store a typed value.
pub async fn put_json<T: Serialize + ?Sized>(
    store: &dyn KvStore,
    key: &str,
    value: &T,
    ttl: Duration,
) -> Result<(), StoreError> {
    store.put(key, serde_json::to_value(value)?, ttl).await
}

/// Entry in the memory store.
#[derive(Debug)]
struct MemoryEntry {
    value: Value,
    expires_at: Instant,
}

/// Bounded in-process store.
///
/// When full, expired entries are dropped first, then the entry closest to
/// expiry. Contents are lost on restart and not shared between instances.
pub struct MemoryStore {
    entries: RwLock<HashMap<String, MemoryEntry>>,
    capacity: usize,
}

impl MemoryStore {
    /// Create a store holding at most `capacity` keys.
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    /// Number of stored entries, including expired ones not yet purged.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Whether the store holds no entries.
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Drop expired entries, returning how many were removed.
    pub async fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, entry| entry.expires_at > now);
        before - entries.len()
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        let entries = self.entries.read().await;
        Ok(entries
            .get(key)
            .filter(|entry| entry.expires_at > Instant::now())
            .map(|entry| entry.value.clone()))
    }

    async fn put(&self, key: &str, value: Value, ttl: Duration) -> Result<(), StoreError> {
        let now = Instant::now();
        let mut entries = self.entries.write().await;

        if entries.len() >= self.capacity && !entries.contains_key(key) {
            entries.retain(|_, entry| entry.expires_at > now);

            if entries.len() >= self.capacity {
                let victim = entries
                    .iter()
                    .min_by_key(|(_, entry)| entry.expires_at)
                    .map(|(k, _)| k.clone());
                if let Some(victim) = victim {
                    debug!(key = %victim, "Memory store full, evicting");
                    entries.remove(&victim);
                }
            }
        }

        entries.insert(
            key.to_string(),
            MemoryEntry {
                value,
                expires_at: now + ttl,
            },
        );
        Ok(())
    }

    fn kind(&self) -> &'static str {
        "memory"
    }
}

/// A Workers KV namespace reached through the Cloudflare REST API.
pub struct CloudflareKvStore {
    client: reqwest::Client,
    namespace_url: String,
    api_token: String,
}

impl CloudflareKvStore {
    /// Create a client for one namespace.
    pub fn new(
        credentials: &CloudflareConfig,
        namespace_id: &str,
        timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        let namespace_url = format!(
            "{}/accounts/{}/storage/kv/namespaces/{}",
            credentials.api_base.trim_end_matches('/'),
            credentials.account_id,
            namespace_id
        );

        Ok(Self {
            client,
            namespace_url,
            api_token: credentials.api_token.clone(),
        })
    }

    fn value_url(&self, key: &str) -> String {
        format!("{}/values/{}", self.namespace_url, urlencoding::encode(key))
    }
}

#[async_trait]
impl KvStore for CloudflareKvStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        let response = self
            .client
            .get(self.value_url(key))
            .bearer_auth(&self.api_token)
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(StoreError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let body = response.text().await?;
        Ok(Some(serde_json::from_str(&body)?))
    }

    async fn put(&self, key: &str, value: Value, ttl: Duration) -> Result<(), StoreError> {
        let ttl_secs = ttl.as_secs().max(CLOUDFLARE_MIN_TTL_SECS);
        let response = self
            .client
            .put(self.value_url(key))
            .query(&[("expiration_ttl", ttl_secs)])
            .bearer_auth(&self.api_token)
            .body(value.to_string())
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(StoreError::Api {
                status: status.as_u16(),
                message,
            });
        }
        Ok(())
    }

    fn kind(&self) -> &'static str {
        "cloudflare"
    }
}

/// Store bindings of a deployment.
#[derive(Clone, Default)]
pub struct Stores {
    /// Rate-limit counters and timing markers
    pub rate_limit: Option<Arc<dyn KvStore>>,
    /// Submission backups
    pub backup: Option<Arc<dyn KvStore>>,
    /// Memory-backed bindings, kept for periodic purging
    pub local: Vec<Arc<MemoryStore>>,
}

impl Stores {
    /// Build the bindings named in the configuration.
    ///
    /// An unbound backup store falls back to the rate-limit store.
    pub fn from_config(config: &StoreConfig, timeout: Duration) -> Result<Self, ConfigError> {
        let mut local = Vec::new();
        let rate_limit = build_store(
            "RATE_LIMIT_KV",
            &config.rate_limit,
            config,
            timeout,
            &mut local,
        )?;
        let backup = build_store(
            "CONTACT_BACKUP_KV",
            &config.backup,
            config,
            timeout,
            &mut local,
        )?
        .or_else(|| rate_limit.clone());

        Ok(Self {
            rate_limit,
            backup,
            local,
        })
    }

    /// Drop expired entries from every memory-backed binding.
    pub async fn purge_expired(&self) -> usize {
        let mut purged = 0;
        for store in &self.local {
            purged += store.purge_expired().await;
        }
        purged
    }
}

fn build_store(
    binding: &'static str,
    backend: &StoreBackend,
    config: &StoreConfig,
    timeout: Duration,
    local: &mut Vec<Arc<MemoryStore>>,
) -> Result<Option<Arc<dyn KvStore>>, ConfigError> {
    match backend {
        StoreBackend::None => Ok(None),
        StoreBackend::Memory => {
            let store = Arc::new(MemoryStore::new(config.memory_capacity));
            local.push(store.clone());
            Ok(Some(store))
        }
        StoreBackend::Cloudflare { namespace_id } => {
            let credentials = config
                .cloudflare
                .as_ref()
                .ok_or(ConfigError::MissingCloudflareCredentials(binding))?;
            let store = CloudflareKvStore::new(credentials, namespace_id, timeout)?;
            Ok(Some(Arc::new(store)))
        }
    }
}
