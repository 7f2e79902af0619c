use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// Base directory for run state, ledger, and reports.
    pub data_dir: PathBuf,
    pub db: DbConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub scraper: ScraperConfig,
    #[serde(default)]
    pub verifier: VerifierConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_words")]
    pub chunk_words: usize,
    #[serde(default = "default_overlap_words")]
    pub overlap_words: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_words: default_chunk_words(),
            overlap_words: default_overlap_words(),
        }
    }
}

fn default_chunk_words() -> usize {
    512
}
fn default_overlap_words() -> usize {
    64
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "hash".to_string(),
            model: None,
            dims: None,
            url: None,
            batch_size: 64,
            max_retries: 5,
            timeout_secs: 30,
        }
    }
}

fn default_provider() -> String {
    "hash".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

impl EmbeddingConfig {
    /// Dimensionality actually in effect for the configured provider.
    pub fn effective_dims(&self) -> usize {
        self.dims.unwrap_or(match self.provider.as_str() {
            "hash" => 256,
            _ => 0,
        })
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ScraperConfig {
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_fetch_timeout_secs")]
    pub timeout_secs: u64,
    /// Minimum interval between two requests to the same domain.
    #[serde(default = "default_throttle_ms")]
    pub throttle_ms: u64,
    #[serde(default = "default_fetch_retries")]
    pub max_retries: u32,
    #[serde(default = "default_robots_ttl_secs")]
    pub robots_ttl_secs: u64,
    /// REST API base used for code-host repository candidates.
    #[serde(default = "default_code_host_api")]
    pub code_host_api: String,
}

impl Default for ScraperConfig {
    fn default() -> Self {
        Self {
            user_agent: default_user_agent(),
            timeout_secs: default_fetch_timeout_secs(),
            throttle_ms: default_throttle_ms(),
            max_retries: default_fetch_retries(),
            robots_ttl_secs: default_robots_ttl_secs(),
            code_host_api: default_code_host_api(),
        }
    }
}

fn default_code_host_api() -> String {
    "https://api.github.com".to_string()
}

fn default_user_agent() -> String {
    "SourceWatcher/0.1".to_string()
}
fn default_fetch_timeout_secs() -> u64 {
    10
}
fn default_throttle_ms() -> u64 {
    1000
}
fn default_fetch_retries() -> u32 {
    3
}
fn default_robots_ttl_secs() -> u64 {
    3600
}

#[derive(Debug, Deserialize, Clone)]
pub struct VerifierConfig {
    /// Hard floor is 2; raising it demands broader corroboration.
    #[serde(default = "default_min_sources")]
    pub min_sources: usize,
    #[serde(default = "default_allowed_licenses")]
    pub allowed_licenses: Vec<String>,
    /// Trust score for a document with exactly `min_sources` corroborators.
    #[serde(default = "default_base_score")]
    pub base_score: f64,
    /// Added per corroborating domain beyond `min_sources`.
    #[serde(default = "default_per_source_bonus")]
    pub per_source_bonus: f64,
    /// Per-domain reputation weights added to the score (max over corroborators).
    #[serde(default)]
    pub reputation: BTreeMap<String, f64>,
    /// Fallback license assumed for a domain when the page declares none.
    #[serde(default)]
    pub domain_license_defaults: BTreeMap<String, String>,
}

impl Default for VerifierConfig {
    fn default() -> Self {
        Self {
            min_sources: default_min_sources(),
            allowed_licenses: default_allowed_licenses(),
            base_score: default_base_score(),
            per_source_bonus: default_per_source_bonus(),
            reputation: BTreeMap::new(),
            domain_license_defaults: BTreeMap::new(),
        }
    }
}

fn default_min_sources() -> usize {
    2
}
fn default_allowed_licenses() -> Vec<String> {
    ["CC-BY-4.0", "CC-BY-SA-4.0", "MIT", "Apache-2.0"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}
fn default_base_score() -> f64 {
    0.6
}
fn default_per_source_bonus() -> f64 {
    0.1
}

#[derive(Debug, Deserialize, Clone)]
pub struct SchedulerConfig {
    /// Sleep between window checks while idle.
    #[serde(default = "default_poll_secs")]
    pub poll_secs: u64,
    /// Kill-switch check interval; bounds worst-case shutdown latency.
    #[serde(default = "default_kill_switch_poll_secs")]
    pub kill_switch_poll_secs: u64,
    /// Bounded scraping worker pool, one logical worker per domain.
    #[serde(default = "default_max_concurrent_domains")]
    pub max_concurrent_domains: usize,
    /// Rows kept in the vector store after the reindex phase (0 = unbounded).
    #[serde(default)]
    pub retention_limit: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_secs: default_poll_secs(),
            kill_switch_poll_secs: default_kill_switch_poll_secs(),
            max_concurrent_domains: default_max_concurrent_domains(),
            retention_limit: 0,
        }
    }
}

fn default_poll_secs() -> u64 {
    300
}
fn default_kill_switch_poll_secs() -> u64 {
    5
}
fn default_max_concurrent_domains() -> usize {
    4
}

impl Config {
    pub fn run_state_path(&self) -> PathBuf {
        self.data_dir.join("run-state.json")
    }

    pub fn ledger_path(&self) -> PathBuf {
        self.data_dir.join("consent-ledger.jsonl")
    }

    pub fn policy_path(&self) -> PathBuf {
        self.data_dir.join("policy.toml")
    }

    pub fn reports_dir(&self) -> PathBuf {
        self.data_dir.join("reports")
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    if config.chunking.chunk_words == 0 {
        anyhow::bail!("chunking.chunk_words must be > 0");
    }
    if config.chunking.overlap_words >= config.chunking.chunk_words {
        anyhow::bail!("chunking.overlap_words must be smaller than chunking.chunk_words");
    }

    if config.verifier.min_sources < 2 {
        anyhow::bail!("verifier.min_sources must be >= 2 (corroboration is a hard rule)");
    }
    if !(0.0..=1.0).contains(&config.verifier.base_score) {
        anyhow::bail!("verifier.base_score must be in [0.0, 1.0]");
    }

    match config.embedding.provider.as_str() {
        "hash" | "openai" | "ollama" | "disabled" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be hash, openai, ollama, or disabled.",
            other
        ),
    }
    if config.embedding.provider != "disabled" && config.embedding.effective_dims() == 0 {
        anyhow::bail!(
            "embedding.dims must be > 0 when provider is '{}'",
            config.embedding.provider
        );
    }

    if config.scheduler.max_concurrent_domains == 0 {
        anyhow::bail!("scheduler.max_concurrent_domains must be >= 1");
    }

    Ok(config)
}
