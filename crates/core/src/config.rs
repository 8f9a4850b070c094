use std::env;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

/// Read a profiled env var: tries {PROFILE}_{KEY} first, falls back to {KEY}.
fn profiled_env_opt(profile: &str, key: &str) -> Option<String> {
    if !profile.is_empty() {
        let prefixed = format!("{}_{}", profile, key);
        if let Some(v) = env_opt(&prefixed) {
            return Some(v);
        }
    }
    env_opt(key)
}

fn profiled_env_or(profile: &str, key: &str, default: &str) -> String {
    profiled_env_opt(profile, key).unwrap_or_else(|| default.to_string())
}

fn profiled_env_u32(profile: &str, key: &str, default: u32) -> u32 {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn profiled_env_u64(profile: &str, key: &str, default: u64) -> u64 {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn profiled_env_bool(profile: &str, key: &str, default: bool) -> bool {
    profiled_env_opt(profile, key)
        .map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(default)
}

// ── Top-level config ──────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Active profile name (empty = default).
    pub profile: String,
    pub storage: StorageConfig,
    pub retry: RetryConfig,
    pub dispatch: DispatchConfig,
    pub dead_letter: DeadLetterConfig,
    pub embedding: EmbeddingConfig,
    pub index: IndexConfig,
    /// Path to the per-source schedule file.
    pub sources_path: PathBuf,
}

impl Config {
    /// Build config from environment variables (call `load_dotenv()` first).
    /// Profile is read from `SKYFEED_PROFILE`. When set (e.g. `PROD`),
    /// every key is first looked up as `{PROFILE}_{KEY}`, falling back to `{KEY}`.
    pub fn from_env() -> Self {
        let profile = env_or("SKYFEED_PROFILE", "").to_uppercase();
        Self::for_profile(&profile)
    }

    /// Build config for a specific named profile (empty string = default).
    pub fn for_profile(profile: &str) -> Self {
        let p = profile.to_uppercase();
        let p = p.as_str();
        let storage = StorageConfig::from_env_profiled(p);
        let dead_letter = DeadLetterConfig::from_env_profiled(p, &storage.data_dir);
        Self {
            profile: p.to_string(),
            retry: RetryConfig::from_env_profiled(p),
            dispatch: DispatchConfig::from_env_profiled(p),
            dead_letter,
            embedding: EmbeddingConfig::from_env_profiled(p),
            index: IndexConfig::from_env_profiled(p),
            sources_path: PathBuf::from(profiled_env_or(
                p,
                "SKYFEED_SOURCES",
                "config/sources.toml",
            )),
            storage,
        }
    }

    pub fn profile_label(&self) -> &str {
        if self.profile.is_empty() { "default" } else { &self.profile }
    }

    /// Print a redacted summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!("Config loaded (profile: {}):", self.profile_label());
        tracing::info!("  storage:     data_dir={}, snapshot={}", self.storage.data_dir.display(), self.storage.snapshot_enabled);
        tracing::info!("  retry:       max_retries={}, max_age={}s", self.retry.max_retries, self.retry.max_age_secs);
        tracing::info!("  dispatch:    batch_size={}, window={}s, parallelism={}", self.dispatch.batch_size, self.dispatch.batch_window_secs, self.dispatch.sync_parallelism);
        tracing::info!("  dead_letter: path={}, retention={}d", self.dead_letter.path.display(), self.dead_letter.retention_days);
        tracing::info!("  embedding:   provider={}, dims={}", self.embedding.provider, self.embedding.dimensions);
        tracing::info!("  index:       provider={}", self.index.provider);
        tracing::info!("  sources:     {}", self.sources_path.display());
    }
}

// ── Storage ───────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
    /// Interval between TTL reclamation passes.
    pub reclaim_interval_secs: u64,
    /// Persist a JSONL snapshot of live items under `data_dir`.
    pub snapshot_enabled: bool,
}

impl StorageConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            data_dir: PathBuf::from(profiled_env_or(p, "DATA_DIR", "data")),
            reclaim_interval_secs: profiled_env_u64(p, "RECLAIM_INTERVAL_SECS", 300),
            snapshot_enabled: profiled_env_bool(p, "SNAPSHOT_ENABLED", true),
        }
    }

    pub fn snapshot_path(&self) -> PathBuf {
        self.data_dir.join("store").join("items.jsonl")
    }

    pub fn run_log_dir(&self) -> PathBuf {
        self.data_dir.join("ingestion")
    }
}

// ── Retry ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Attempts allowed beyond the first try.
    pub max_retries: u32,
    /// Budget measured from the first attempt.
    pub max_age_secs: u64,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Per-attempt timeout; an attempt that exceeds it counts as transient.
    pub attempt_timeout_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            max_age_secs: 3_600,
            base_delay_ms: 1_000,
            max_delay_ms: 60_000,
            attempt_timeout_secs: 60,
        }
    }
}

impl RetryConfig {
    fn from_env_profiled(p: &str) -> Self {
        let d = Self::default();
        Self {
            max_retries: profiled_env_u32(p, "RETRY_MAX_RETRIES", d.max_retries),
            max_age_secs: profiled_env_u64(p, "RETRY_MAX_AGE_SECS", d.max_age_secs),
            base_delay_ms: profiled_env_u64(p, "RETRY_BASE_DELAY_MS", d.base_delay_ms),
            max_delay_ms: profiled_env_u64(p, "RETRY_MAX_DELAY_MS", d.max_delay_ms),
            attempt_timeout_secs: profiled_env_u64(p, "RETRY_ATTEMPT_TIMEOUT_SECS", d.attempt_timeout_secs),
        }
    }

    /// Per-attempt timeout, never below one second.
    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_secs(self.attempt_timeout_secs.max(1))
    }
}

// ── Change dispatch ───────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    pub batch_size: usize,
    pub batch_window_secs: u64,
    /// Max items of one batch synced to the index concurrently.
    pub sync_parallelism: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            batch_window_secs: 30,
            sync_parallelism: 4,
        }
    }
}

impl DispatchConfig {
    fn from_env_profiled(p: &str) -> Self {
        let d = Self::default();
        Self {
            batch_size: profiled_env_u32(p, "DISPATCH_BATCH_SIZE", d.batch_size as u32).max(1) as usize,
            batch_window_secs: profiled_env_u64(p, "DISPATCH_BATCH_WINDOW_SECS", d.batch_window_secs),
            sync_parallelism: profiled_env_u32(p, "SYNC_PARALLELISM", d.sync_parallelism as u32).max(1) as usize,
        }
    }
}

// ── Dead-letter sink ──────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetterConfig {
    pub path: PathBuf,
    pub retention_days: u32,
}

impl DeadLetterConfig {
    fn from_env_profiled(p: &str, data_dir: &std::path::Path) -> Self {
        let default_path = data_dir.join("dead-letter").join("records.jsonl");
        Self {
            path: profiled_env_opt(p, "DLQ_PATH")
                .map(PathBuf::from)
                .unwrap_or(default_path),
            retention_days: profiled_env_u32(p, "DLQ_RETENTION_DAYS", 14),
        }
    }
}

// ── Embedding ─────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// "openai", "ollama", "hash"
    pub provider: String,
    pub model: String,
    pub dimensions: u32,
    pub openai_api_key: Option<String>,
    pub openai_base_url: Option<String>,
    pub ollama_url: String,
    pub cache_capacity: usize,
}

impl EmbeddingConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            provider: profiled_env_or(p, "EMBEDDING_PROVIDER", "hash"),
            model: profiled_env_or(p, "EMBEDDING_MODEL", "text-embedding-3-small"),
            dimensions: profiled_env_u32(p, "EMBEDDING_DIMENSIONS", 384),
            openai_api_key: profiled_env_opt(p, "OPENAI_API_KEY"),
            openai_base_url: profiled_env_opt(p, "OPENAI_BASE_URL"),
            ollama_url: profiled_env_or(p, "OLLAMA_URL", "http://localhost:11434"),
            cache_capacity: profiled_env_u32(p, "EMBEDDING_CACHE_CAPACITY", 4_096) as usize,
        }
    }
}

// ── Search index ──────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexConfig {
    /// "memory", "opensearch"
    pub provider: String,
    pub opensearch_url: String,
    pub opensearch_index: String,
    pub opensearch_username: Option<String>,
    pub opensearch_password: Option<String>,
}

impl IndexConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            provider: profiled_env_or(p, "INDEX_PROVIDER", "memory"),
            opensearch_url: profiled_env_or(p, "OPENSEARCH_URL", "http://localhost:9200"),
            opensearch_index: profiled_env_or(p, "OPENSEARCH_INDEX", "skyfeed-items"),
            opensearch_username: profiled_env_opt(p, "OPENSEARCH_USERNAME"),
            opensearch_password: profiled_env_opt(p, "OPENSEARCH_PASSWORD"),
        }
    }
}
