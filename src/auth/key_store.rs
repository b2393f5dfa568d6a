// ============================================================================
// API Key Store
// ============================================================================
//
// Lookup of workspace API keys by raw key value, plus usage accounting.
//
// Implementations:
// - InMemoryKeyStore: seeded from a JSON file (or built in tests)
// - RestKeyStore: PostgREST-style HTTP interface over the `api_keys` table
//
// ============================================================================

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::{Mutex, RwLock};
use std::time::Duration;
use subtle::ConstantTimeEq;

/// One workspace API key
#[derive(Clone, Serialize, Deserialize)]
pub struct ApiKeyRecord {
    #[serde(alias = "id")]
    pub key_id: String,
    #[serde(alias = "key")]
    pub raw_key: String,
    pub workspace_id: String,
    #[serde(default = "default_active")]
    pub is_active: bool,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    /// Empty means any origin
    #[serde(default)]
    pub allowed_origins: Vec<String>,
    pub rate_limit_per_minute: u32,
}

fn default_active() -> bool {
    true
}

// Raw key stays out of Debug output
impl fmt::Debug for ApiKeyRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiKeyRecord")
            .field("key_id", &self.key_id)
            .field("workspace_id", &self.workspace_id)
            .field("is_active", &self.is_active)
            .field("expires_at", &self.expires_at)
            .field("allowed_origins", &self.allowed_origins)
            .field("rate_limit_per_minute", &self.rate_limit_per_minute)
            .finish_non_exhaustive()
    }
}

#[async_trait]
pub trait KeyStore: Send + Sync {
    /// Record whose raw key equals `raw_key`, if any
    async fn find_by_key(&self, raw_key: &str) -> Result<Option<ApiKeyRecord>>;

    /// Bump usage statistics for the key. Callers do not wait on this.
    async fn record_usage(&self, key_id: &str) -> Result<()>;
}

// ============================================================================
// In-memory store
// ============================================================================

pub struct InMemoryKeyStore {
    records: RwLock<Vec<ApiKeyRecord>>,
    usage: Mutex<HashMap<String, u64>>,
}

impl InMemoryKeyStore {
    pub fn new(records: Vec<ApiKeyRecord>) -> Self {
        Self {
            records: RwLock::new(records),
            usage: Mutex::new(HashMap::new()),
        }
    }

    /// Load records from a JSON array file
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read API keys file {}", path.display()))?;
        let records: Vec<ApiKeyRecord> = serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse API keys file {}", path.display()))?;
        tracing::info!(count = records.len(), "Loaded API keys from file");
        Ok(Self::new(records))
    }

    pub fn insert(&self, record: ApiKeyRecord) {
        if let Ok(mut records) = self.records.write() {
            records.retain(|r| r.key_id != record.key_id);
            records.push(record);
        }
    }

    /// Recorded usage count for a key
    pub fn usage(&self, key_id: &str) -> u64 {
        self.usage
            .lock()
            .ok()
            .and_then(|u| u.get(key_id).copied())
            .unwrap_or(0)
    }
}

#[async_trait]
impl KeyStore for InMemoryKeyStore {
    async fn find_by_key(&self, raw_key: &str) -> Result<Option<ApiKeyRecord>> {
        let records = self
            .records
            .read()
            .map_err(|_| anyhow::anyhow!("API key store lock poisoned"))?;

        // Compare against every record so timing does not reveal which one matched
        let mut found = None;
        for record in records.iter() {
            let matches: bool = record.raw_key.as_bytes().ct_eq(raw_key.as_bytes()).into();
            if matches && found.is_none() {
                found = Some(record.clone());
            }
        }
        Ok(found)
    }

    async fn record_usage(&self, key_id: &str) -> Result<()> {
        let mut usage = self
            .usage
            .lock()
            .map_err(|_| anyhow::anyhow!("API key usage lock poisoned"))?;
        *usage.entry(key_id.to_string()).or_insert(0) += 1;
        Ok(())
    }
}

// ============================================================================
// REST store
// ============================================================================

/// Key store behind a PostgREST endpoint
pub struct RestKeyStore {
    client: reqwest::Client,
    base_url: String,
    service_key: Option<String>,
}

impl RestKeyStore {
    pub fn new(base_url: &str, service_key: Option<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .pool_max_idle_per_host(10)
            .build()
            .context("Failed to build key store HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            service_key,
        })
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.service_key {
            Some(key) => request.header("apikey", key).bearer_auth(key),
            None => request,
        }
    }
}

#[async_trait]
impl KeyStore for RestKeyStore {
    async fn find_by_key(&self, raw_key: &str) -> Result<Option<ApiKeyRecord>> {
        let url = format!("{}/api_keys", self.base_url);
        let request = self
            .client
            .get(&url)
            .query(&[("key", format!("eq.{}", raw_key)), ("select", "*".to_string())]);

        let response = self
            .authorize(request)
            .send()
            .await
            .context("Key store request failed")?;

        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("Key store returned {}", status);
        }

        let mut rows: Vec<ApiKeyRecord> = response
            .json()
            .await
            .context("Key store returned an unexpected body")?;
        Ok(if rows.is_empty() { None } else { Some(rows.swap_remove(0)) })
    }

    async fn record_usage(&self, key_id: &str) -> Result<()> {
        let url = format!("{}/rpc/increment_api_key_usage", self.base_url);
        let request = self
            .client
            .post(&url)
            .json(&serde_json::json!({ "key_id": key_id }));

        let response = self
            .authorize(request)
            .send()
            .await
            .context("Key usage update failed")?;
        if !response.status().is_success() {
            anyhow::bail!("Key usage update returned {}", response.status());
        }
        Ok(())
    }
}
