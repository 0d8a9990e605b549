//! Application configuration for actorlens.
//!
//! User config lives at `~/.actorlens/actorlens.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{ActorLensError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "actorlens.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".actorlens";

// ---------------------------------------------------------------------------
// Config structs (matching actorlens.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Global defaults.
    #[serde(default)]
    pub defaults: DefaultsConfig,

    /// Source catalog settings.
    #[serde(default)]
    pub source: SourceSection,

    /// Reasoning service settings.
    #[serde(default)]
    pub reasoning: ReasoningSection,
}

/// `[defaults]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultsConfig {
    /// Path to the local enrichment database.
    #[serde(default = "default_db_path")]
    pub db_path: String,

    /// Path to the taxonomy bundle JSON file.
    #[serde(default = "default_taxonomy_path")]
    pub taxonomy_path: String,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            taxonomy_path: default_taxonomy_path(),
        }
    }
}

fn default_db_path() -> String {
    "~/.actorlens/actorlens.db".into()
}
fn default_taxonomy_path() -> String {
    "~/.actorlens/taxonomy.json".into()
}

/// `[source]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceSection {
    /// Base URL of the actor catalog API.
    #[serde(default = "default_source_base_url")]
    pub base_url: String,

    /// Page size for the paginated listing endpoint.
    #[serde(default = "default_page_size")]
    pub page_size: u32,

    /// Fixed delay in ms between page requests.
    #[serde(default = "default_rate_limit")]
    pub rate_limit_ms: u64,

    /// Page-level retry attempts before the fetch aborts.
    #[serde(default = "default_fetch_retries")]
    pub max_retries: u32,

    /// Per-request timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for SourceSection {
    fn default() -> Self {
        Self {
            base_url: default_source_base_url(),
            page_size: default_page_size(),
            rate_limit_ms: default_rate_limit(),
            max_retries: default_fetch_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_source_base_url() -> String {
    "https://threatcatalog.example.com/api".into()
}
fn default_page_size() -> u32 {
    100
}
fn default_rate_limit() -> u64 {
    500
}
fn default_fetch_retries() -> u32 {
    3
}
fn default_timeout_secs() -> u64 {
    30
}

/// `[reasoning]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReasoningSection {
    /// Name of the env var holding the API key (never store the key itself).
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// OpenAI-compatible API base URL.
    #[serde(default = "default_reasoning_base_url")]
    pub base_url: String,

    /// Model to use for technique inference.
    #[serde(default = "default_model")]
    pub model: String,

    /// Sampling temperature. Kept low to favor reproducibility.
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Minimum valid techniques an inference must yield.
    #[serde(default = "default_min_techniques")]
    pub min_techniques: usize,

    /// Maximum valid techniques an inference may yield.
    #[serde(default = "default_max_techniques")]
    pub max_techniques: usize,

    /// Retry attempts per actor before giving up.
    #[serde(default = "default_inference_retries")]
    pub max_retries: u32,

    /// Concurrent in-flight inference requests.
    #[serde(default = "default_inference_concurrency")]
    pub concurrency: usize,

    /// Character budget for the actor context sent to the service.
    #[serde(default = "default_context_chars")]
    pub context_chars: usize,
}

impl Default for ReasoningSection {
    fn default() -> Self {
        Self {
            api_key_env: default_api_key_env(),
            base_url: default_reasoning_base_url(),
            model: default_model(),
            temperature: default_temperature(),
            min_techniques: default_min_techniques(),
            max_techniques: default_max_techniques(),
            max_retries: default_inference_retries(),
            concurrency: default_inference_concurrency(),
            context_chars: default_context_chars(),
        }
    }
}

fn default_api_key_env() -> String {
    "OPENROUTER_API_KEY".into()
}
fn default_reasoning_base_url() -> String {
    "https://openrouter.ai/api/v1".into()
}
fn default_model() -> String {
    "moonshotai/kimi-k2.5".into()
}
fn default_temperature() -> f32 {
    0.1
}
fn default_min_techniques() -> usize {
    5
}
fn default_max_techniques() -> usize {
    15
}
fn default_inference_retries() -> u32 {
    3
}
fn default_inference_concurrency() -> usize {
    4
}
fn default_context_chars() -> usize {
    6_000
}

// ---------------------------------------------------------------------------
// Runtime configs (merged from config + CLI flags)
// ---------------------------------------------------------------------------

/// Runtime source-fetch configuration.
#[derive(Debug, Clone)]
pub struct SourceConfig {
    /// Base URL of the actor catalog API.
    pub base_url: String,
    /// Page size for the listing endpoint.
    pub page_size: u32,
    /// Fixed delay in ms between page requests.
    pub rate_limit_ms: u64,
    /// Page-level retry attempts.
    pub max_retries: u32,
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
}

impl From<&AppConfig> for SourceConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            base_url: config.source.base_url.clone(),
            page_size: config.source.page_size,
            rate_limit_ms: config.source.rate_limit_ms,
            max_retries: config.source.max_retries,
            timeout_secs: config.source.timeout_secs,
        }
    }
}

/// Runtime inference configuration.
#[derive(Debug, Clone)]
pub struct InferenceConfig {
    /// OpenAI-compatible API base URL.
    pub base_url: String,
    /// API key, resolved from the configured env var.
    pub api_key: Option<String>,
    /// Model identifier.
    pub model: String,
    /// Sampling temperature.
    pub temperature: f32,
    /// Minimum valid techniques per inference.
    pub min_techniques: usize,
    /// Maximum valid techniques per inference.
    pub max_techniques: usize,
    /// Retry attempts per actor.
    pub max_retries: u32,
    /// Character budget for the actor context.
    pub context_chars: usize,
}

impl From<&AppConfig> for InferenceConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            base_url: config.reasoning.base_url.clone(),
            api_key: std::env::var(&config.reasoning.api_key_env).ok(),
            model: config.reasoning.model.clone(),
            temperature: config.reasoning.temperature,
            min_techniques: config.reasoning.min_techniques,
            max_techniques: config.reasoning.max_techniques,
            max_retries: config.reasoning.max_retries,
            context_chars: config.reasoning.context_chars,
        }
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.actorlens/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| ActorLensError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.actorlens/actorlens.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Expand a leading `~/` to the user's home directory.
pub fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| ActorLensError::io(path, e))?;

    toml::from_str(&content).map_err(|e| {
        ActorLensError::config(format!("failed to parse {}: {e}", path.display()))
    })
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| ActorLensError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| ActorLensError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| ActorLensError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Check that the reasoning-service API key env var is set and non-empty.
pub fn validate_api_key(config: &AppConfig) -> Result<()> {
    let var_name = &config.reasoning.api_key_env;
    match std::env::var(var_name) {
        Ok(val) if !val.is_empty() => Ok(()),
        _ => Err(ActorLensError::config(format!(
            "reasoning service API key not found. Set the {var_name} environment variable."
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize default config");
        assert!(toml_str.contains("db_path"));
        assert!(toml_str.contains("OPENROUTER_API_KEY"));
    }

    #[test]
    fn config_roundtrip() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize");
        let parsed: AppConfig = toml::from_str(&toml_str).expect("deserialize");
        assert_eq!(parsed.source.page_size, 100);
        assert_eq!(parsed.reasoning.api_key_env, "OPENROUTER_API_KEY");
        assert_eq!(parsed.reasoning.min_techniques, 5);
        assert_eq!(parsed.reasoning.max_techniques, 15);
    }

    #[test]
    fn partial_config_fills_defaults() {
        let toml_str = r#"
[source]
base_url = "https://catalog.internal/api"
rate_limit_ms = 1000
"#;
        let config: AppConfig = toml::from_str(toml_str).expect("parse");
        assert_eq!(config.source.base_url, "https://catalog.internal/api");
        assert_eq!(config.source.rate_limit_ms, 1000);
        // Unspecified fields fall back to defaults.
        assert_eq!(config.source.page_size, 100);
        assert_eq!(config.reasoning.model, "moonshotai/kimi-k2.5");
    }

    #[test]
    fn source_config_from_app_config() {
        let app = AppConfig::default();
        let source = SourceConfig::from(&app);
        assert_eq!(source.page_size, 100);
        assert_eq!(source.rate_limit_ms, 500);
        assert_eq!(source.max_retries, 3);
    }

    #[test]
    fn inference_config_from_app_config() {
        let app = AppConfig::default();
        let inference = InferenceConfig::from(&app);
        assert_eq!(inference.model, "moonshotai/kimi-k2.5");
        assert!(inference.temperature < 0.2);
        assert_eq!(inference.max_retries, 3);
    }

    #[test]
    fn expand_home_passthrough_for_absolute() {
        let p = expand_home("/var/lib/actorlens.db");
        assert_eq!(p, PathBuf::from("/var/lib/actorlens.db"));
    }

    #[test]
    fn api_key_validation() {
        let mut config = AppConfig::default();
        // Use a unique env var name to avoid interfering with other tests
        config.reasoning.api_key_env = "AL_TEST_NONEXISTENT_KEY_12345".into();
        let result = validate_api_key(&config);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("API key not found"));
    }
}
