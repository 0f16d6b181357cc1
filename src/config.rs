//! TOML configuration with environment overrides.
//!
//! Every section has defaults, so the harness runs without a config file.
//! After the file is parsed, a small set of environment variables
//! (`GCP_PROJECT`, `MODEL_GEMINI_FLASH`, …) override individual fields; see
//! [`apply_env_overrides`].

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Config file used when `--config` is not given and the file exists.
pub const DEFAULT_CONFIG_PATH: &str = "./config/wiz.toml";

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub workspace: WorkspaceConfig,
    #[serde(default)]
    pub extract: ExtractConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub history: HistoryConfig,
    #[serde(default)]
    pub workflows: WorkflowsConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:5001".to_string()
}
fn default_request_timeout_secs() -> u64 {
    600
}

#[derive(Debug, Deserialize, Clone)]
pub struct WorkspaceConfig {
    /// Parent directory of the per-request staging directories.
    #[serde(default = "default_workspace_root")]
    pub root: PathBuf,
    #[serde(default = "default_true")]
    pub shallow: bool,
    #[serde(default = "default_clone_timeout_secs")]
    pub clone_timeout_secs: u64,
    #[serde(default = "default_max_concurrent_ingests")]
    pub max_concurrent_ingests: usize,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            root: default_workspace_root(),
            shallow: true,
            clone_timeout_secs: default_clone_timeout_secs(),
            max_concurrent_ingests: default_max_concurrent_ingests(),
        }
    }
}

fn default_workspace_root() -> PathBuf {
    PathBuf::from("./repo_cache")
}
fn default_true() -> bool {
    true
}
fn default_clone_timeout_secs() -> u64 {
    300
}
fn default_max_concurrent_ingests() -> usize {
    1
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct ExtractConfig {
    /// Extra glob patterns pruned from both the file index and the corpus.
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    /// Files larger than this keep their index entry but contribute no text.
    #[serde(default)]
    pub max_file_bytes: Option<u64>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub project: Option<String>,
    #[serde(default = "default_location")]
    pub location: String,
    #[serde(default = "default_model_flash")]
    pub model_flash: String,
    #[serde(default = "default_model_pro")]
    pub model_pro: String,
    /// Overrides `https://{location}-aiplatform.googleapis.com/v1`.
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default = "default_token_command")]
    pub token_command: Vec<String>,
    #[serde(default = "default_llm_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_top_p")]
    pub top_p: f32,
    #[serde(default)]
    pub max_prompt_chars: Option<usize>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            project: None,
            location: default_location(),
            model_flash: default_model_flash(),
            model_pro: default_model_pro(),
            endpoint: None,
            access_token: None,
            token_command: default_token_command(),
            timeout_secs: default_llm_timeout_secs(),
            max_retries: default_max_retries(),
            max_output_tokens: default_max_output_tokens(),
            temperature: default_temperature(),
            top_p: default_top_p(),
            max_prompt_chars: None,
        }
    }
}

fn default_provider() -> String {
    "vertex".to_string()
}
fn default_location() -> String {
    "us-central1".to_string()
}
fn default_model_flash() -> String {
    "gemini-2.5-flash".to_string()
}
fn default_model_pro() -> String {
    "gemini-2.5-pro".to_string()
}
fn default_token_command() -> Vec<String> {
    vec![
        "gcloud".to_string(),
        "auth".to_string(),
        "print-access-token".to_string(),
    ]
}
fn default_llm_timeout_secs() -> u64 {
    300
}
fn default_max_retries() -> u32 {
    2
}
fn default_max_output_tokens() -> u32 {
    8192
}
fn default_temperature() -> f32 {
    0.4
}
fn default_top_p() -> f32 {
    1.0
}

impl LlmConfig {
    /// Models offered to clients, fastest first.
    pub fn models(&self) -> Vec<String> {
        vec![self.model_flash.clone(), self.model_pro.clone()]
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct CacheConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_ttl_hours")]
    pub default_ttl_hours: u64,
    #[serde(default = "default_max_ttl_hours")]
    pub max_ttl_hours: u64,
    /// Model the corpus is cached for; defaults to `llm.model_flash`.
    #[serde(default)]
    pub model: Option<String>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            default_ttl_hours: default_ttl_hours(),
            max_ttl_hours: default_max_ttl_hours(),
            model: None,
        }
    }
}

fn default_ttl_hours() -> u64 {
    1
}
fn default_max_ttl_hours() -> u64 {
    24
}

#[derive(Debug, Deserialize, Clone)]
pub struct HistoryConfig {
    #[serde(default = "default_history_dir")]
    pub dir: PathBuf,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            dir: default_history_dir(),
        }
    }
}

fn default_history_dir() -> PathBuf {
    PathBuf::from("./history")
}

#[derive(Debug, Deserialize, Clone)]
pub struct WorkflowsConfig {
    /// Directory holding `<industry>-<lang>.txt` question lists.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

impl Default for WorkflowsConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

impl Config {
    pub fn cache_model(&self) -> String {
        self.cache
            .model
            .clone()
            .unwrap_or_else(|| self.llm.model_flash.clone())
    }
}

/// Load configuration for the CLI.
///
/// An explicitly named file must exist. Without one, [`DEFAULT_CONFIG_PATH`]
/// is used when present and built-in defaults otherwise. Environment
/// overrides are applied before validation.
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let mut config = match path {
        Some(path) => parse_config_file(path)?,
        None => {
            let default_path = Path::new(DEFAULT_CONFIG_PATH);
            if default_path.exists() {
                parse_config_file(default_path)?
            } else {
                Config::default()
            }
        }
    };

    apply_env_overrides(&mut config, |key| std::env::var(key).ok());
    validate(&config)?;
    Ok(config)
}

fn parse_config_file(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    toml::from_str(&content).with_context(|| "Failed to parse config file")
}

/// Apply environment overrides through `lookup` (injectable for tests).
pub fn apply_env_overrides<F>(config: &mut Config, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

    if let Some(project) = non_empty("GCP_PROJECT") {
        config.llm.project = Some(project);
    }
    if let Some(location) = non_empty("GCP_LOCATION") {
        config.llm.location = location;
    }
    if let Some(model) = non_empty("MODEL_GEMINI_FLASH") {
        config.llm.model_flash = model;
    }
    if let Some(model) = non_empty("MODEL_GEMINI_PRO") {
        config.llm.model_pro = model;
    }
    if let Some(token) = non_empty("VERTEX_ACCESS_TOKEN") {
        config.llm.access_token = Some(token);
    }
    if let Some(bind) = non_empty("WIZ_BIND") {
        config.server.bind = bind;
    }
}

pub fn validate(config: &Config) -> Result<()> {
    if config.workspace.max_concurrent_ingests == 0 {
        anyhow::bail!("workspace.max_concurrent_ingests must be >= 1");
    }
    if config.workspace.clone_timeout_secs == 0 {
        anyhow::bail!("workspace.clone_timeout_secs must be > 0");
    }
    if config.server.request_timeout_secs == 0 {
        anyhow::bail!("server.request_timeout_secs must be > 0");
    }
    if config.llm.timeout_secs == 0 {
        anyhow::bail!("llm.timeout_secs must be > 0");
    }

    if config.cache.default_ttl_hours == 0 {
        anyhow::bail!("cache.default_ttl_hours must be >= 1");
    }
    if config.cache.default_ttl_hours > config.cache.max_ttl_hours {
        anyhow::bail!(
            "cache.default_ttl_hours ({}) must not exceed cache.max_ttl_hours ({})",
            config.cache.default_ttl_hours,
            config.cache.max_ttl_hours
        );
    }

    if !(0.0..=2.0).contains(&config.llm.temperature) {
        anyhow::bail!("llm.temperature must be in [0.0, 2.0]");
    }
    if !(config.llm.top_p > 0.0 && config.llm.top_p <= 1.0) {
        anyhow::bail!("llm.top_p must be in (0.0, 1.0]");
    }

    match config.llm.provider.as_str() {
        "vertex" | "disabled" => {}
        other => anyhow::bail!(
            "Unknown LLM provider: '{}'. Must be vertex or disabled.",
            other
        ),
    }

    Ok(())
}
