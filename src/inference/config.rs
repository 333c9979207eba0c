//! Application and model configuration loading.
//!
//! Reads `config.yaml` (or `.yml` / `.json`) from the config directory and
//! resolves environment variables before parsing. The file is the single
//! source of truth for model endpoints, capabilities and loop tuning.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::capabilities::{Capability, CapabilitySet};
use super::errors::InferenceError;

// ─── Constants ───────────────────────────────────────────────────────────────

/// File names probed, in order, inside the config directory.
const CONFIG_FILE_NAMES: &[&str] = &["config.yaml", "config.yml", "config.json"];

// ─── Public Types ────────────────────────────────────────────────────────────

/// Which backend protocol a model speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    /// Native Ollama `/api/chat`.
    Ollama,
    /// OpenAI-compatible `/chat/completions`.
    #[serde(rename = "openai", alias = "open_ai")]
    OpenAi,
}

/// Default sampling parameters for a model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelOptions {
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_top_p")]
    pub top_p: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Unknown keys are kept and forwarded to the backend.
    #[serde(default, flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Default for ModelOptions {
    fn default() -> Self {
        Self {
            temperature: default_temperature(),
            top_p: default_top_p(),
            max_tokens: default_max_tokens(),
            extra: serde_json::Map::new(),
        }
    }
}

fn default_temperature() -> f32 {
    0.9
}
fn default_top_p() -> f32 {
    1.0
}
fn default_max_tokens() -> u32 {
    4096
}

/// A single model's runtime configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Filled from the map key when loaded from a file.
    #[serde(default)]
    pub name: String,
    pub provider: Provider,
    pub url: String,
    /// Name the backend knows the model by, when it differs from `name`.
    #[serde(default)]
    pub name_in_provider: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub options: ModelOptions,
    /// Explicit capability list; derived from provider and name when absent.
    #[serde(default)]
    pub capabilities: Option<Vec<Capability>>,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_request_timeout_secs() -> u64 {
    180
}

impl ModelConfig {
    /// Minimal config for a provider/url pair, with default options.
    pub fn new(name: impl Into<String>, provider: Provider, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            provider,
            url: url.into(),
            name_in_provider: None,
            api_key: None,
            options: ModelOptions::default(),
            capabilities: None,
            request_timeout_secs: default_request_timeout_secs(),
        }
    }

    /// The model identifier sent to the backend.
    pub fn provider_model_name(&self) -> &str {
        self.name_in_provider.as_deref().unwrap_or(&self.name)
    }

    /// Resolved capability set.
    pub fn capability_set(&self) -> CapabilitySet {
        match &self.capabilities {
            Some(list) => CapabilitySet::new(list.iter().copied()),
            None => CapabilitySet::defaults_for(self.provider, self.provider_model_name()),
        }
    }
}

/// Heuristic thresholds for the streaming tool-call gate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamingConfig {
    /// Size of the rolling window scanned for tool-call markers.
    #[serde(default = "default_rolling_window_chars")]
    pub rolling_window_chars: usize,
    /// Accumulated text beyond which held output is released.
    #[serde(default = "default_flush_threshold_chars")]
    pub flush_threshold_chars: usize,
    /// Time since the last forwarded chunk after which held output is released.
    #[serde(default = "default_flush_interval_ms")]
    pub flush_interval_ms: u64,
}

impl StreamingConfig {
    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            rolling_window_chars: default_rolling_window_chars(),
            flush_threshold_chars: default_flush_threshold_chars(),
            flush_interval_ms: default_flush_interval_ms(),
        }
    }
}

fn default_rolling_window_chars() -> usize {
    200
}
fn default_flush_threshold_chars() -> usize {
    1000
}
fn default_flush_interval_ms() -> u64 {
    2000
}

/// Bounded retry for tool invocations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts, including the first.
    #[serde(default = "default_retry_attempts")]
    pub attempts: u32,
    /// Fixed delay between attempts.
    #[serde(default = "default_retry_delay_ms")]
    pub delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            attempts: default_retry_attempts(),
            delay_ms: default_retry_delay_ms(),
        }
    }
}

fn default_retry_attempts() -> u32 {
    3
}
fn default_retry_delay_ms() -> u64 {
    1000
}

/// Top-level configuration file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub models: HashMap<String, ModelConfig>,
    #[serde(default)]
    pub default_model: Option<String>,
    /// Tool provider definitions, consumed by whoever wires up the providers.
    #[serde(default, alias = "mcpServers")]
    pub tool_providers: HashMap<String, serde_json::Value>,
    #[serde(default, alias = "default_server")]
    pub default_provider: Option<String>,
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    #[serde(default)]
    pub streaming: StreamingConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    /// Files in the working directory whose contents are added as context.
    #[serde(default = "default_context_files")]
    pub context_files: Vec<String>,
}

fn default_max_iterations() -> u32 {
    10
}

fn default_context_files() -> Vec<String> {
    vec!["AGENTLOOP.md".to_string()]
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            models: HashMap::new(),
            default_model: None,
            tool_providers: HashMap::new(),
            default_provider: None,
            max_iterations: default_max_iterations(),
            streaming: StreamingConfig::default(),
            retry: RetryConfig::default(),
            context_files: default_context_files(),
        }
    }
}

impl AppConfig {
    /// Register a model under its own name.
    pub fn with_model(mut self, model: ModelConfig) -> Self {
        self.models.insert(model.name.clone(), model);
        self
    }

    /// Resolve which model a call should use.
    ///
    /// An explicit name must exist. Without one, `default_model` wins, then
    /// the only configured model.
    pub fn resolve_model(&self, name: Option<&str>) -> Result<&ModelConfig, InferenceError> {
        if let Some(name) = name {
            return self.models.get(name).ok_or_else(|| InferenceError::UnknownModel {
                name: name.to_string(),
            });
        }

        if let Some(default) = &self.default_model {
            return self
                .models
                .get(default)
                .ok_or_else(|| InferenceError::UnknownModel {
                    name: default.clone(),
                });
        }

        let mut models = self.models.values();
        match (models.next(), models.next()) {
            (Some(only), None) => Ok(only),
            _ => Err(InferenceError::NoModelConfigured),
        }
    }
}

// ─── Loading ─────────────────────────────────────────────────────────────────

/// Find the config file inside `dir`.
pub fn find_config_path(dir: &Path) -> Result<PathBuf, InferenceError> {
    CONFIG_FILE_NAMES
        .iter()
        .map(|name| dir.join(name))
        .find(|candidate| candidate.exists())
        .ok_or_else(|| InferenceError::ConfigError {
            reason: format!("no config file found in {}", dir.display()),
        })
}

/// Load the config file from `dir`, or defaults when there is none.
pub fn load_or_default(dir: &Path) -> Result<AppConfig, InferenceError> {
    match find_config_path(dir) {
        Ok(path) => load_app_config(&path),
        Err(_) => {
            tracing::info!(dir = %dir.display(), "no config file, using defaults");
            Ok(AppConfig::default())
        }
    }
}

/// Load and parse the configuration file.
///
/// Performs environment-variable interpolation on string values matching
/// `${VAR_NAME}` or `${VAR_NAME:-default}`. An empty file yields defaults.
pub fn load_app_config(path: &Path) -> Result<AppConfig, InferenceError> {
    let raw = std::fs::read_to_string(path).map_err(|e| InferenceError::ConfigError {
        reason: format!("failed to read {}: {e}", path.display()),
    })?;

    if raw.trim().is_empty() {
        return Ok(AppConfig::default());
    }

    let interpolated = interpolate_env_vars(&raw);

    let mut config: AppConfig =
        serde_yaml::from_str(&interpolated).map_err(|e| InferenceError::ConfigError {
            reason: format!("failed to parse {}: {e}", path.display()),
        })?;

    for (key, model) in config.models.iter_mut() {
        model.name = key.clone();
    }

    tracing::info!(
        path = %path.display(),
        models = config.models.len(),
        default_model = ?config.default_model,
        "loaded configuration"
    );

    Ok(config)
}

// ─── Env-var interpolation ───────────────────────────────────────────────────

/// Replace `${VAR}` and `${VAR:-default}` in a string.
fn interpolate_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && chars.peek() == Some(&'{') {
            chars.next();
            let mut var_expr = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                var_expr.push(c);
            }
            result.push_str(&resolve_var_expr(&var_expr));
        } else {
            result.push(ch);
        }
    }

    result
}

/// Resolve a variable expression like `VAR` or `VAR:-default`.
fn resolve_var_expr(expr: &str) -> String {
    if let Some((var_name, default)) = expr.split_once(":-") {
        std::env::var(var_name).unwrap_or_else(|_| expand_tilde(default))
    } else {
        std::env::var(expr).unwrap_or_default()
    }
}

/// Expand a leading `~` to the user's home directory.
pub(crate) fn expand_tilde(path: &str) -> String {
    if let Some(rest) = path.strip_prefix('~') {
        if let Some(home) = dirs::home_dir() {
            return format!("{}{rest}", home.display());
        }
    }
    path.to_string()
}

// ─── Tests ───────────────────────────────────────────────────────────────────
