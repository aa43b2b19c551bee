//! TOML Configuration File Support
//!
//! Centralized configuration for the pipeline, loaded from
//! `~/.config/memo-consensus/config.toml`.
//!
//! # Configuration Priority
//!
//! Configuration values are loaded with the following priority (highest first):
//! 1. CLI arguments (via [`ConfigOverrides`])
//! 2. Environment variables
//! 3. TOML configuration file
//! 4. Default values
//!
//! # XDG Base Directory Compliance
//!
//! - `$XDG_CONFIG_HOME/memo-consensus/config.toml` for configuration
//! - `$XDG_DATA_HOME/memo-consensus/results` for saved runs
//!
//! # Example Configuration
//!
//! ```toml
//! [pipeline]
//! max_in_flight = 6
//! call_timeout_secs = 300
//! run_deadline_secs = 600
//! consolidation_model = "anthropic/claude-3.7-sonnet:thinking"
//! default_models = ["openai/gpt-4.1", "x-ai/grok-3-beta"]
//! max_tokens = 4000
//!
//! [store]
//! dir = "/var/lib/memo-consensus"
//!
//! [backends.openrouter]
//! kind = "openai_compatible"
//! base_url = "https://openrouter.ai/api/v1"
//! api_key_env = "OPENROUTER_API_KEY"
//!
//! [backends.local]
//! kind = "ollama"
//! host = "localhost"
//! port = 11434
//!
//! [[models]]
//! id = "ollama/llama3.2"
//! backend = "local"
//! wire_name = "llama3.2"
//! ```
//!
//! API keys are never read from the file itself: a backend names the
//! environment variable that holds its key and the value is resolved once,
//! at load time, into the returned [`ConsensusConfig`].

use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::backend::OPENROUTER_BASE_URL;
use crate::model::ModelIdentity;

/// Reasoning models dispatched when the caller does not pick any
pub const DEFAULT_MODELS: [&str; 5] = [
    "openai/gpt-4.1",
    "anthropic/claude-3.7-sonnet",
    "google/gemini-2.5-flash-preview-05-20",
    "x-ai/grok-3-beta",
    "meta-llama/llama-4-maverick",
];

/// Model used to merge the reasoning models' outputs
pub const DEFAULT_CONSOLIDATION_MODEL: &str = "anthropic/claude-3.7-sonnet:thinking";

/// Name of the backend created by default
pub const DEFAULT_BACKEND: &str = "openrouter";

/// Environment variable holding the default backend's key
pub const DEFAULT_API_KEY_ENV: &str = "OPENROUTER_API_KEY";

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur when loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read config file
    #[error("Failed to read config file at {path}: {source}")]
    ReadError {
        /// The path that was attempted
        path: PathBuf,
        /// The underlying IO error
        source: std::io::Error,
    },

    /// Failed to parse TOML
    #[error("Failed to parse TOML config: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    Validation(String),
}

// =============================================================================
// Configuration Source Tracking
// =============================================================================

/// Tracks where a configuration value came from
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfigSource {
    /// Value from command-line argument
    Cli,
    /// Value from environment variable
    Env,
    /// Value from TOML configuration file
    File,
    /// Default value
    Default,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cli => write!(f, "CLI"),
            Self::Env => write!(f, "environment"),
            Self::File => write!(f, "config file"),
            Self::Default => write!(f, "default"),
        }
    }
}

// =============================================================================
// TOML Configuration Structures
// =============================================================================

/// Pipeline section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineToml {
    /// Maximum model calls in flight at once
    pub max_in_flight: Option<usize>,

    /// Per-call timeout in seconds
    pub call_timeout_secs: Option<u64>,

    /// Deadline for a whole run in seconds
    pub run_deadline_secs: Option<u64>,

    /// Model used for consolidation
    pub consolidation_model: Option<String>,

    /// Models dispatched when the caller names none
    pub default_models: Option<Vec<String>>,

    /// Maximum tokens per response
    pub max_tokens: Option<u32>,

    /// Sampling temperature
    pub temperature: Option<f32>,
}

/// Store section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreToml {
    /// Directory holding saved runs
    pub dir: Option<PathBuf>,
}

/// Kind of backend a `[backends.<name>]` table declares
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// OpenAI-compatible chat completions (OpenRouter, OpenAI, ...)
    #[serde(rename = "openai_compatible")]
    OpenAiCompatible,
    /// Local Ollama server
    Ollama,
}

/// One `[backends.<name>]` table
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BackendToml {
    /// Backend kind
    pub kind: BackendKind,

    /// Base URL (OpenAI-compatible)
    #[serde(default)]
    pub base_url: Option<String>,

    /// Environment variable holding the API key (OpenAI-compatible)
    #[serde(default)]
    pub api_key_env: Option<String>,

    /// Connect timeout in seconds (OpenAI-compatible)
    #[serde(default)]
    pub connect_timeout_secs: Option<u64>,

    /// Host (Ollama)
    #[serde(default)]
    pub host: Option<String>,

    /// Port (Ollama)
    #[serde(default)]
    pub port: Option<u16>,
}

/// One `[[models]]` entry
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ModelToml {
    /// Model identity (`provider/model[:variant]`)
    pub id: String,

    /// Name of the backend serving it
    pub backend: String,

    /// Model name sent on the wire, if different from the identity
    #[serde(default)]
    pub wire_name: Option<String>,
}

/// Top-level TOML configuration structure
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsensusToml {
    /// Pipeline configuration section
    pub pipeline: PipelineToml,

    /// Store configuration section
    pub store: StoreToml,

    /// Backend declarations by name
    pub backends: BTreeMap<String, BackendToml>,

    /// Model declarations
    pub models: Vec<ModelToml>,
}

// =============================================================================
// Main Configuration Struct
// =============================================================================

/// Resolved settings for one backend
#[derive(Clone, PartialEq, Eq)]
pub enum BackendSettings {
    /// OpenAI-compatible endpoint
    OpenAiCompatible {
        /// Base URL
        base_url: String,
        /// Environment variable the key was read from
        api_key_env: String,
        /// Resolved key (absent if the variable was unset)
        api_key: Option<String>,
        /// Connect timeout
        connect_timeout: Duration,
    },
    /// Ollama server
    Ollama {
        /// Host
        host: String,
        /// Port
        port: u16,
    },
}

impl std::fmt::Debug for BackendSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::OpenAiCompatible {
                base_url,
                api_key_env,
                api_key,
                connect_timeout,
            } => f
                .debug_struct("OpenAiCompatible")
                .field("base_url", base_url)
                .field("api_key_env", api_key_env)
                .field("api_key", &api_key.as_ref().map(|_| "<redacted>"))
                .field("connect_timeout", connect_timeout)
                .finish(),
            Self::Ollama { host, port } => f
                .debug_struct("Ollama")
                .field("host", host)
                .field("port", port)
                .finish(),
        }
    }
}

impl BackendSettings {
    /// Default OpenRouter backend
    #[must_use]
    pub fn openrouter() -> Self {
        Self::OpenAiCompatible {
            base_url: OPENROUTER_BASE_URL.to_string(),
            api_key_env: DEFAULT_API_KEY_ENV.to_string(),
            api_key: None,
            connect_timeout: Duration::from_secs(10),
        }
    }

    fn from_toml(name: &str, toml: &BackendToml) -> Result<Self, ConfigError> {
        match toml.kind {
            BackendKind::OpenAiCompatible => Ok(Self::OpenAiCompatible {
                base_url: toml
                    .base_url
                    .clone()
                    .unwrap_or_else(|| OPENROUTER_BASE_URL.to_string()),
                api_key_env: toml
                    .api_key_env
                    .clone()
                    .unwrap_or_else(|| DEFAULT_API_KEY_ENV.to_string()),
                api_key: None,
                connect_timeout: Duration::from_secs(toml.connect_timeout_secs.unwrap_or(10)),
            }),
            BackendKind::Ollama => {
                if toml.api_key_env.is_some() {
                    return Err(ConfigError::Validation(format!(
                        "backend {name}: ollama backends take no api_key_env"
                    )));
                }
                Ok(Self::Ollama {
                    host: toml.host.clone().unwrap_or_else(|| "localhost".to_string()),
                    port: toml.port.unwrap_or(11434),
                })
            }
        }
    }
}

/// A model the registry can serve
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ModelEntry {
    /// Identity
    pub id: ModelIdentity,
    /// Backend name
    pub backend: String,
    /// Wire name override
    pub wire_name: Option<String>,
}

/// Centralized configuration for the pipeline
///
/// This struct consolidates all configuration from multiple sources and tracks
/// where values came from. Use [`load_config`] to load configuration with
/// proper priority handling.
#[derive(Clone, Debug)]
pub struct ConsensusConfig {
    /// Maximum model calls in flight at once
    pub max_in_flight: usize,

    /// Per-call timeout
    pub call_timeout: Duration,

    /// Deadline for a whole run
    pub run_deadline: Option<Duration>,

    /// Model used for consolidation
    pub consolidation_model: ModelIdentity,

    /// Models dispatched when the caller names none
    pub default_models: Vec<ModelIdentity>,

    /// Maximum tokens per response (0 = backend default)
    pub max_tokens: u32,

    /// Sampling temperature
    pub temperature: f32,

    /// Directory holding saved runs
    pub store_dir: PathBuf,

    /// Backends by name
    pub backends: BTreeMap<String, BackendSettings>,

    /// Models and the backend serving each
    pub models: Vec<ModelEntry>,

    /// Path to the config file that was loaded (if any)
    pub config_file_path: Option<PathBuf>,

    /// Source of configuration values
    source: ConfigSource,
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        let default_models: Vec<ModelIdentity> = DEFAULT_MODELS
            .into_iter()
            .map(ModelIdentity::builtin)
            .collect();
        let consolidation_model = ModelIdentity::builtin(DEFAULT_CONSOLIDATION_MODEL);

        let models = default_models
            .iter()
            .chain(std::iter::once(&consolidation_model))
            .map(|id| ModelEntry {
                id: id.clone(),
                backend: DEFAULT_BACKEND.to_string(),
                wire_name: None,
            })
            .collect();

        let mut backends = BTreeMap::new();
        backends.insert(DEFAULT_BACKEND.to_string(), BackendSettings::openrouter());

        Self {
            max_in_flight: 6,
            call_timeout: Duration::from_secs(300),
            run_deadline: None,
            consolidation_model,
            default_models,
            max_tokens: 4000,
            temperature: 0.7,
            store_dir: default_store_dir(),
            backends,
            models,
            config_file_path: None,
            source: ConfigSource::Default,
        }
    }
}

impl ConsensusConfig {
    /// Create a new configuration with default values
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the primary source of this configuration
    #[must_use]
    pub fn source(&self) -> ConfigSource {
        self.source
    }

    /// Set the configuration source
    pub fn set_source(&mut self, source: ConfigSource) {
        self.source = source;
    }

    /// Declare (or redeclare) a model
    pub fn upsert_model(&mut self, entry: ModelEntry) {
        if let Some(existing) = self.models.iter_mut().find(|m| m.id == entry.id) {
            *existing = entry;
        } else {
            self.models.push(entry);
        }
    }

    /// Check cross-field invariants
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] describing the first problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_in_flight == 0 {
            return Err(ConfigError::Validation(
                "max_in_flight must be at least 1".to_string(),
            ));
        }
        if self.call_timeout.is_zero() {
            return Err(ConfigError::Validation(
                "call_timeout_secs must be greater than 0".to_string(),
            ));
        }
        if self.run_deadline.is_some_and(|d| d.is_zero()) {
            return Err(ConfigError::Validation(
                "run_deadline_secs must be greater than 0".to_string(),
            ));
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(ConfigError::Validation(format!(
                "temperature must be between 0.0 and 2.0, got {}",
                self.temperature
            )));
        }

        let mut seen = HashSet::new();
        for entry in &self.models {
            if !seen.insert(&entry.id) {
                return Err(ConfigError::Validation(format!(
                    "model {} declared twice",
                    entry.id
                )));
            }
            if !self.backends.contains_key(&entry.backend) {
                return Err(ConfigError::Validation(format!(
                    "model {} references unknown backend {:?}",
                    entry.id, entry.backend
                )));
            }
        }

        if !seen.contains(&self.consolidation_model) {
            return Err(ConfigError::Validation(format!(
                "consolidation model {} is not declared",
                self.consolidation_model
            )));
        }
        if let Some(missing) = self.default_models.iter().find(|m| !seen.contains(m)) {
            return Err(ConfigError::Validation(format!(
                "default model {missing} is not declared"
            )));
        }

        Ok(())
    }
}

// =============================================================================
// Configuration Loading
// =============================================================================

/// Get the default configuration file path
///
/// Returns `$XDG_CONFIG_HOME/memo-consensus/config.toml` or
/// `~/.config/memo-consensus/config.toml` if `XDG_CONFIG_HOME` is not set.
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("memo-consensus").join("config.toml"))
}

/// Get the default directory for saved runs
#[must_use]
pub fn default_store_dir() -> PathBuf {
    dirs::data_dir()
        .map_or_else(|| PathBuf::from("."), |p| p.join("memo-consensus"))
        .join("results")
}

/// Load configuration from all sources with proper priority
///
/// # Errors
///
/// Returns an error if the config file exists but cannot be parsed, or if
/// the merged configuration is invalid. A missing config file is not an
/// error (defaults are used).
pub fn load_config() -> Result<ConsensusConfig, ConfigError> {
    load_config_from_path(default_config_path())
}

/// Load configuration from a specific path
///
/// # Arguments
///
/// * `path` - Optional path to the configuration file. If `None`, only defaults
///   and environment variables are used.
///
/// # Errors
///
/// Returns an error if the specified config file cannot be read or parsed,
/// or if the merged configuration is invalid.
pub fn load_config_from_path(path: Option<PathBuf>) -> Result<ConsensusConfig, ConfigError> {
    // Start with defaults
    let mut config = ConsensusConfig::default();

    // Try to load from file
    if let Some(ref config_path) = path {
        if config_path.exists() {
            let toml_content =
                std::fs::read_to_string(config_path).map_err(|e| ConfigError::ReadError {
                    path: config_path.clone(),
                    source: e,
                })?;

            let toml_config: ConsensusToml = toml::from_str(&toml_content)?;
            apply_toml_config(&mut config, &toml_config)?;
            config.config_file_path = Some(config_path.clone());
            config.source = ConfigSource::File;

            tracing::info!(
                path = %config_path.display(),
                "Loaded configuration from file"
            );
        } else {
            tracing::debug!(
                path = %config_path.display(),
                "Config file not found, using defaults"
            );
        }
    }

    // Apply environment variables (overrides file values)
    apply_env_config(&mut config)?;
    resolve_api_keys(&mut config);

    config.validate()?;
    Ok(config)
}

fn parse_identity(raw: &str, field: &str) -> Result<ModelIdentity, ConfigError> {
    ModelIdentity::parse(raw).map_err(|e| ConfigError::Validation(format!("{field}: {e}")))
}

/// Apply TOML configuration values to the config struct
fn apply_toml_config(config: &mut ConsensusConfig, toml: &ConsensusToml) -> Result<(), ConfigError> {
    // Pipeline settings
    if let Some(n) = toml.pipeline.max_in_flight {
        config.max_in_flight = n;
    }
    if let Some(secs) = toml.pipeline.call_timeout_secs {
        config.call_timeout = Duration::from_secs(secs);
    }
    if let Some(secs) = toml.pipeline.run_deadline_secs {
        config.run_deadline = Some(Duration::from_secs(secs));
    }
    if let Some(ref model) = toml.pipeline.consolidation_model {
        config.consolidation_model = parse_identity(model, "consolidation_model")?;
    }
    if let Some(ref models) = toml.pipeline.default_models {
        config.default_models = models
            .iter()
            .map(|m| parse_identity(m, "default_models"))
            .collect::<Result<_, _>>()?;
    }
    if let Some(max_tokens) = toml.pipeline.max_tokens {
        config.max_tokens = max_tokens;
    }
    if let Some(temperature) = toml.pipeline.temperature {
        config.temperature = temperature;
    }

    // Store settings
    if let Some(ref dir) = toml.store.dir {
        config.store_dir = dir.clone();
    }

    // Backends replace defaults of the same name
    for (name, backend) in &toml.backends {
        config
            .backends
            .insert(name.clone(), BackendSettings::from_toml(name, backend)?);
    }

    // Models are merged by identity
    for model in &toml.models {
        config.upsert_model(ModelEntry {
            id: parse_identity(&model.id, "models.id")?,
            backend: model.backend.clone(),
            wire_name: model.wire_name.clone(),
        });
    }

    Ok(())
}

/// Apply environment variable overrides to the config
fn apply_env_config(config: &mut ConsensusConfig) -> Result<(), ConfigError> {
    if let Ok(n) = std::env::var("MEMO_CONSENSUS_MAX_IN_FLIGHT") {
        if let Ok(n) = n.parse::<usize>() {
            config.max_in_flight = n;
            config.source = ConfigSource::Env;
        }
    }
    if let Ok(secs) = std::env::var("MEMO_CONSENSUS_CALL_TIMEOUT") {
        if let Ok(secs) = secs.parse::<u64>() {
            config.call_timeout = Duration::from_secs(secs);
            config.source = ConfigSource::Env;
        }
    }
    if let Ok(secs) = std::env::var("MEMO_CONSENSUS_DEADLINE") {
        if let Ok(secs) = secs.parse::<u64>() {
            config.run_deadline = Some(Duration::from_secs(secs));
            config.source = ConfigSource::Env;
        }
    }
    if let Ok(dir) = std::env::var("MEMO_CONSENSUS_STORE_DIR") {
        config.store_dir = PathBuf::from(dir);
        config.source = ConfigSource::Env;
    }
    if let Ok(model) = std::env::var("MEMO_CONSENSUS_CONSOLIDATION_MODEL") {
        config.consolidation_model =
            parse_identity(&model, "MEMO_CONSENSUS_CONSOLIDATION_MODEL")?;
        config.source = ConfigSource::Env;
    }
    Ok(())
}

/// Read each OpenAI-compatible backend's key from its named variable
fn resolve_api_keys(config: &mut ConsensusConfig) {
    for (name, backend) in &mut config.backends {
        if let BackendSettings::OpenAiCompatible {
            api_key_env,
            api_key,
            ..
        } = backend
        {
            *api_key = std::env::var(&*api_key_env)
                .ok()
                .filter(|k| !k.trim().is_empty());
            if api_key.is_none() {
                tracing::warn!(
                    backend = %name,
                    env = %api_key_env,
                    "API key not set; calls through this backend will fail"
                );
            }
        }
    }
}

// =============================================================================
// CLI Override Support
// =============================================================================

/// Builder for applying CLI overrides to configuration
///
/// Use this after [`load_config`] to apply command-line argument overrides.
#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    /// Store directory override
    pub store_dir: Option<PathBuf>,

    /// Run deadline override (seconds)
    pub run_deadline_secs: Option<u64>,

    /// Max in-flight override
    pub max_in_flight: Option<usize>,

    /// Consolidation model override
    pub consolidation_model: Option<ModelIdentity>,
}

impl ConfigOverrides {
    /// Create a new empty set of overrides
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set store directory override
    #[must_use]
    pub fn with_store_dir(mut self, dir: PathBuf) -> Self {
        self.store_dir = Some(dir);
        self
    }

    /// Set run deadline override
    #[must_use]
    pub fn with_run_deadline_secs(mut self, secs: u64) -> Self {
        self.run_deadline_secs = Some(secs);
        self
    }

    /// Set max in-flight override
    #[must_use]
    pub fn with_max_in_flight(mut self, n: usize) -> Self {
        self.max_in_flight = Some(n);
        self
    }

    /// Set consolidation model override
    #[must_use]
    pub fn with_consolidation_model(mut self, model: ModelIdentity) -> Self {
        self.consolidation_model = Some(model);
        self
    }

    /// Apply overrides to a configuration
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] if the result is invalid.
    pub fn apply(&self, config: &mut ConsensusConfig) -> Result<(), ConfigError> {
        if self.store_dir.is_some()
            || self.run_deadline_secs.is_some()
            || self.max_in_flight.is_some()
            || self.consolidation_model.is_some()
        {
            config.source = ConfigSource::Cli;
        }

        if let Some(ref dir) = self.store_dir {
            config.store_dir = dir.clone();
        }
        if let Some(secs) = self.run_deadline_secs {
            config.run_deadline = Some(Duration::from_secs(secs));
        }
        if let Some(n) = self.max_in_flight {
            config.max_in_flight = n;
        }
        if let Some(ref model) = self.consolidation_model {
            config.consolidation_model = model.clone();
        }

        config.validate()
    }
}

// =============================================================================
// Tests
// =============================================================================
