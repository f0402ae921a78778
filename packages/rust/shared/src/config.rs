//! Application configuration for docimport.
//!
//! User config lives at `~/.docimport/docimport.toml`.
//! Precedence: CLI flags > environment variables > config file > defaults.
//! Secrets are never stored in the file; the file names the env var instead.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ImportError, Result};
use crate::types::{LlmFallbackMode, StructureOrder, WriteMode};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "docimport.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".docimport";

// ---------------------------------------------------------------------------
// Config structs (matching docimport.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Remote platform settings.
    #[serde(default)]
    pub feishu: FeishuConfig,

    /// OpenAI-compatible resolver for ambiguous TOC links.
    #[serde(default)]
    pub llm: LlmConfig,

    /// HTTP transport settings.
    #[serde(default)]
    pub http: HttpConfig,

    /// Defaults for `docimport import`.
    #[serde(default)]
    pub import: ImportDefaults,
}

/// `[feishu]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeishuConfig {
    /// API origin, without trailing slash.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Application id used for the tenant access token.
    #[serde(default)]
    pub app_id: String,

    /// Name of the env var holding the app secret.
    #[serde(default = "default_app_secret_env")]
    pub app_secret_env: String,

    /// Root drive folder for created documents.
    #[serde(default)]
    pub folder_token: String,

    /// Maximum markdown bytes per convert call.
    #[serde(default = "default_convert_max_bytes")]
    pub convert_max_bytes: usize,
}

impl Default for FeishuConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            app_id: String::new(),
            app_secret_env: default_app_secret_env(),
            folder_token: String::new(),
            convert_max_bytes: default_convert_max_bytes(),
        }
    }
}

fn default_base_url() -> String {
    "https://open.feishu.cn".into()
}
fn default_app_secret_env() -> String {
    "FEISHU_APP_SECRET".into()
}
fn default_convert_max_bytes() -> usize {
    45_000
}

/// `[llm]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Chat completions base URL; empty disables the resolver.
    #[serde(default)]
    pub base_url: String,

    /// Name of the env var holding the API key.
    #[serde(default = "default_llm_key_env")]
    pub api_key_env: String,

    #[serde(default)]
    pub model: String,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            api_key_env: default_llm_key_env(),
            model: String::new(),
        }
    }
}

fn default_llm_key_env() -> String {
    "LLM_API_KEY".into()
}

/// `[http]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: f64,

    /// Retries after the first attempt for 5xx/408/429 and transport errors.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Linear backoff unit; attempt `n` sleeps `n * retry_backoff_secs`.
    #[serde(default = "default_retry_backoff")]
    pub retry_backoff_secs: f64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
            retry_backoff_secs: default_retry_backoff(),
        }
    }
}

impl HttpConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs_f64(self.timeout_secs.max(0.1))
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_secs_f64(self.retry_backoff_secs.max(0.0))
    }
}

fn default_timeout_secs() -> f64 {
    30.0
}
fn default_max_retries() -> u32 {
    3
}
fn default_retry_backoff() -> f64 {
    1.0
}

/// `[import]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportDefaults {
    #[serde(default)]
    pub write_mode: WriteMode,

    #[serde(default)]
    pub structure_order: StructureOrder,

    #[serde(default = "default_toc_file")]
    pub toc_file: String,

    #[serde(default)]
    pub llm_fallback: LlmFallbackMode,

    #[serde(default = "default_llm_max_calls")]
    pub llm_max_calls: usize,

    #[serde(default = "default_max_workers")]
    pub max_workers: usize,

    #[serde(default = "default_chunk_workers")]
    pub chunk_workers: usize,

    #[serde(default = "default_nav_title")]
    pub folder_nav_title: String,
}

impl Default for ImportDefaults {
    fn default() -> Self {
        Self {
            write_mode: WriteMode::default(),
            structure_order: StructureOrder::default(),
            toc_file: default_toc_file(),
            llm_fallback: LlmFallbackMode::default(),
            llm_max_calls: default_llm_max_calls(),
            max_workers: default_max_workers(),
            chunk_workers: default_chunk_workers(),
            folder_nav_title: default_nav_title(),
        }
    }
}

fn default_toc_file() -> String {
    "TABLE_OF_CONTENTS.md".into()
}
fn default_llm_max_calls() -> usize {
    3
}
fn default_max_workers() -> usize {
    4
}
fn default_chunk_workers() -> usize {
    1
}
fn default_nav_title() -> String {
    "00-Navigation".into()
}

// ---------------------------------------------------------------------------
// Environment overrides and secrets
// ---------------------------------------------------------------------------

impl AppConfig {
    /// Apply overrides from the process environment.
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_env_from(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary lookup (tests pass a map).
    pub fn apply_env_from(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        if let Some(v) = get("FEISHU_BASE_URL") {
            self.feishu.base_url = v.trim_end_matches('/').to_string();
        }
        if let Some(v) = get("FEISHU_APP_ID") {
            self.feishu.app_id = v;
        }
        if let Some(v) = get("FEISHU_FOLDER_TOKEN") {
            self.feishu.folder_token = v;
        }
        if let Some(v) = get("FEISHU_CONVERT_MAX_BYTES") {
            self.feishu.convert_max_bytes = parse_env("FEISHU_CONVERT_MAX_BYTES", &v)?;
        }
        if let Some(v) = get("LLM_BASE_URL") {
            self.llm.base_url = v;
        }
        if let Some(v) = get("LLM_MODEL") {
            self.llm.model = v;
        }
        if let Some(v) = get("REQUEST_TIMEOUT") {
            self.http.timeout_secs = parse_env("REQUEST_TIMEOUT", &v)?;
        }
        if let Some(v) = get("MAX_RETRIES") {
            self.http.max_retries = parse_env("MAX_RETRIES", &v)?;
        }
        if let Some(v) = get("RETRY_BACKOFF") {
            self.http.retry_backoff_secs = parse_env("RETRY_BACKOFF", &v)?;
        }
        Ok(())
    }

    /// The Feishu app secret, read from the env var named in the config.
    pub fn app_secret(&self) -> Option<String> {
        read_secret(&self.feishu.app_secret_env)
    }

    /// The resolver API key, read from the env var named in the config.
    pub fn llm_api_key(&self) -> Option<String> {
        read_secret(&self.llm.api_key_env)
    }

    /// Whether enough is configured to build the LLM resolver.
    pub fn llm_ready(&self) -> bool {
        !self.llm.base_url.is_empty() && !self.llm.model.is_empty() && self.llm_api_key().is_some()
    }
}

fn read_secret(var_name: &str) -> Option<String> {
    std::env::var(var_name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    value
        .parse()
        .map_err(|e| ImportError::config(format!("invalid {key}='{value}': {e}")))
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.docimport/`).
pub fn config_dir() -> Result<PathBuf> {
    let home =
        dirs::home_dir().ok_or_else(|| ImportError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.docimport/docimport.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
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
    let content = std::fs::read_to_string(path).map_err(|e| ImportError::io(path, e))?;

    toml::from_str(&content)
        .map_err(|e| ImportError::config(format!("failed to parse {}: {e}", path.display())))
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| ImportError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content = toml::to_string_pretty(&config).map_err(|e| ImportError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| ImportError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn default_config_serializes() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize default config");
        assert!(toml_str.contains("convert_max_bytes = 45000"));
        assert!(toml_str.contains("FEISHU_APP_SECRET"));
        assert!(toml_str.contains("TABLE_OF_CONTENTS.md"));
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let toml_str = r#"
[feishu]
app_id = "cli_a1b2"
folder_token = "fldcnRoot"

[import]
write_mode = "both"
structure_order = "path"
llm_max_calls = 1
"#;
        let config: AppConfig = toml::from_str(toml_str).expect("parse");
        assert_eq!(config.feishu.app_id, "cli_a1b2");
        assert_eq!(config.feishu.base_url, "https://open.feishu.cn");
        assert_eq!(config.import.write_mode, WriteMode::Both);
        assert_eq!(config.import.structure_order, StructureOrder::Path);
        assert_eq!(config.import.llm_max_calls, 1);
        assert_eq!(config.import.toc_file, "TABLE_OF_CONTENTS.md");
        assert_eq!(config.http.max_retries, 3);
    }

    #[test]
    fn env_overrides_file_values() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("FEISHU_BASE_URL", "https://open.larksuite.com/"),
            ("FEISHU_CONVERT_MAX_BYTES", "20000"),
            ("REQUEST_TIMEOUT", "12.5"),
            ("LLM_MODEL", "  "),
        ]);
        let mut config = AppConfig::default();
        config.llm.model = "from-file".into();
        config
            .apply_env_from(|k| env.get(k).map(|v| v.to_string()))
            .expect("apply env");

        assert_eq!(config.feishu.base_url, "https://open.larksuite.com");
        assert_eq!(config.feishu.convert_max_bytes, 20_000);
        assert_eq!(config.http.timeout(), Duration::from_secs_f64(12.5));
        // Blank env values do not clobber the file.
        assert_eq!(config.llm.model, "from-file");
    }

    #[test]
    fn bad_env_value_is_config_error() {
        let mut config = AppConfig::default();
        let err = config
            .apply_env_from(|k| (k == "MAX_RETRIES").then(|| "many".to_string()))
            .unwrap_err();
        assert!(err.to_string().contains("invalid MAX_RETRIES='many'"));
    }

    #[test]
    fn missing_secret_env_is_none() {
        let mut config = AppConfig::default();
        // Use a unique env var name to avoid interfering with other tests
        config.feishu.app_secret_env = "DOCIMPORT_TEST_NONEXISTENT_SECRET_9876".into();
        assert!(config.app_secret().is_none());
        assert!(!config.llm_ready());
    }
}
