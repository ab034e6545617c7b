use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    pub cache: CacheConfig,
    #[serde(default)]
    pub fetch: FetchConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub discover: DiscoverConfig,
    #[serde(default)]
    pub data: DataConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CacheConfig {
    pub dir: PathBuf,
    #[serde(default = "default_refetch")]
    pub refetch: RefetchPolicy,
}

/// What to do when a URL about to be fetched already has a cache entry.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RefetchPolicy {
    /// Fetch again and overwrite the cached copy (fresh data wins).
    Overwrite,
    /// Serve the cached copy without touching the network.
    Skip,
}

fn default_refetch() -> RefetchPolicy {
    RefetchPolicy::Overwrite
}

#[derive(Debug, Deserialize, Clone)]
pub struct FetchConfig {
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    /// Extraction-proxy API endpoint. When set, fetches are POSTed here
    /// with the target URL in the body instead of hitting the page directly.
    #[serde(default)]
    pub proxy_endpoint: Option<String>,
    /// Proxy API key; falls back to the WATERLINE_API_KEY env var.
    #[serde(default)]
    pub api_key: Option<String>,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
            user_agent: default_user_agent(),
            proxy_endpoint: None,
            api_key: None,
        }
    }
}

fn default_timeout_secs() -> u64 {
    30
}
fn default_max_retries() -> u32 {
    3
}
fn default_user_agent() -> String {
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0 Safari/537.36".to_string()
}

impl FetchConfig {
    /// Resolved proxy API key: config value first, then environment.
    pub fn resolved_api_key(&self) -> Option<String> {
        self.api_key
            .clone()
            .or_else(|| std::env::var("WATERLINE_API_KEY").ok())
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct PipelineConfig {
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// When false, items whose external id is already stored are skipped
    /// instead of re-extracted and merged.
    #[serde(default = "default_true")]
    pub update_existing: bool,
    /// When false, records are extracted and counted but never written.
    #[serde(default = "default_true")]
    pub persist: bool,
    /// Consecutive persistence failures that abort the run.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            update_existing: true,
            persist: true,
            failure_threshold: default_failure_threshold(),
        }
    }
}

fn default_concurrency() -> usize {
    5
}
fn default_true() -> bool {
    true
}
fn default_failure_threshold() -> u32 {
    10
}

#[derive(Debug, Deserialize, Clone)]
pub struct DiscoverConfig {
    #[serde(default = "default_max_pages")]
    pub max_pages: u32,
    #[serde(default = "default_max_results")]
    pub max_results: usize,
    /// Consecutive result pages contributing zero new URLs before discovery
    /// stops early.
    #[serde(default = "default_empty_page_tolerance")]
    pub empty_page_tolerance: u32,
    #[serde(default = "default_page_delay_ms")]
    pub page_delay_ms: u64,
}

impl Default for DiscoverConfig {
    fn default() -> Self {
        Self {
            max_pages: default_max_pages(),
            max_results: default_max_results(),
            empty_page_tolerance: default_empty_page_tolerance(),
            page_delay_ms: default_page_delay_ms(),
        }
    }
}

fn default_max_pages() -> u32 {
    20
}
fn default_max_results() -> usize {
    1000
}
fn default_empty_page_tolerance() -> u32 {
    2
}
fn default_page_delay_ms() -> u64 {
    1000
}

#[derive(Debug, Deserialize, Clone)]
pub struct DataConfig {
    /// Where URL lists and run summaries are written.
    #[serde(default = "default_data_dir")]
    pub dir: PathBuf,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            dir: default_data_dir(),
        }
    }
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    if config.pipeline.concurrency == 0 {
        anyhow::bail!("pipeline.concurrency must be > 0");
    }

    if config.pipeline.failure_threshold == 0 {
        anyhow::bail!("pipeline.failure_threshold must be > 0");
    }

    if config.fetch.timeout_secs == 0 {
        anyhow::bail!("fetch.timeout_secs must be > 0");
    }

    if config.discover.max_pages == 0 {
        anyhow::bail!("discover.max_pages must be > 0");
    }

    if let Some(endpoint) = &config.fetch.proxy_endpoint {
        if !endpoint.starts_with("http://") && !endpoint.starts_with("https://") {
            anyhow::bail!("fetch.proxy_endpoint must be an http(s) URL");
        }
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn minimal_config_gets_defaults() {
        let file = write_config(
            r#"
[db]
path = "test.db"

[cache]
dir = "cache"
"#,
        );
        let config = load_config(file.path()).unwrap();
        assert_eq!(config.pipeline.concurrency, 5);
        assert_eq!(config.fetch.max_retries, 3);
        assert_eq!(config.cache.refetch, RefetchPolicy::Overwrite);
        assert_eq!(config.discover.empty_page_tolerance, 2);
        assert!(config.pipeline.persist);
    }

    #[test]
    fn zero_concurrency_is_rejected() {
        let file = write_config(
            r#"
[db]
path = "test.db"

[cache]
dir = "cache"

[pipeline]
concurrency = 0
"#,
        );
        assert!(load_config(file.path()).is_err());
    }

    #[test]
    fn refetch_policy_parses_lowercase() {
        let file = write_config(
            r#"
[db]
path = "test.db"

[cache]
dir = "cache"
refetch = "skip"
"#,
        );
        let config = load_config(file.path()).unwrap();
        assert_eq!(config.cache.refetch, RefetchPolicy::Skip);
    }
}
