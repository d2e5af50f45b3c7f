//! Configuration loading, validation, and provider selection for Glimpse.
//!
//! Loads configuration from `~/.glimpse/config.toml` with environment
//! variable overrides. Validates all settings at startup and picks the
//! model provider once, from whichever credentials are present.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Providers checked for credentials, in preference order.
pub const PROVIDER_PREFERENCE: [ProviderKind; 3] =
    [ProviderKind::Anthropic, ProviderKind::OpenAi, ProviderKind::OpenRouter];

/// Hard ceiling on reasoning steps per user turn.
pub const MAX_STEP_BUDGET: u32 = 15;

/// The root configuration structure.
///
/// Maps directly to `~/.glimpse/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Force a provider ("anthropic", "openai", "openrouter")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,

    /// Chat model override (defaults per provider)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    /// Vision model override (defaults to the chat model)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vision_model: Option<String>,

    /// Default temperature
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Default max tokens per LLM response
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Provider-specific configurations, keyed by provider name
    #[serde(default)]
    pub providers: HashMap<String, ProviderConfig>,

    /// Search backend configuration
    #[serde(default)]
    pub search: SearchConfig,

    /// Orchestration loop settings
    #[serde(default)]
    pub agent: AgentSettings,

    /// Where the log and images are written
    #[serde(default)]
    pub storage: StorageConfig,
}

fn default_temperature() -> f32 {
    0.7
}
fn default_max_tokens() -> u32 {
    4096
}

/// Redact a secret string for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("provider", &self.provider)
            .field("model", &self.model)
            .field("vision_model", &self.vision_model)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("providers", &self.providers)
            .field("search", &self.search)
            .field("agent", &self.agent)
            .field("storage", &self.storage)
            .finish()
    }
}

#[derive(Clone, Default, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_model: Option<String>,
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("api_key", &redact(&self.api_key))
            .field("api_url", &self.api_url)
            .field("default_model", &self.default_model)
            .finish()
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default = "default_search_url")]
    pub api_url: String,

    /// Spending ceiling per search call
    #[serde(default = "default_cost_ceiling")]
    pub cost_ceiling: f64,

    /// Backend search type ("all", "web", "proprietary")
    #[serde(default = "default_search_type")]
    pub search_type: String,
}

fn default_search_url() -> String {
    "https://api.valyu.network".into()
}
fn default_cost_ceiling() -> f64 {
    30.0
}
fn default_search_type() -> String {
    "all".into()
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_url: default_search_url(),
            cost_ceiling: default_cost_ceiling(),
            search_type: default_search_type(),
        }
    }
}

impl std::fmt::Debug for SearchConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SearchConfig")
            .field("api_key", &redact(&self.api_key))
            .field("api_url", &self.api_url)
            .field("cost_ceiling", &self.cost_ceiling)
            .field("search_type", &self.search_type)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSettings {
    /// Model invocations allowed per user turn (1-15)
    #[serde(default = "default_max_steps")]
    pub max_steps: u32,

    /// How the log is replayed into the model: "full" or "compact"
    #[serde(default = "default_history_mode")]
    pub history_mode: String,
}

fn default_max_steps() -> u32 {
    MAX_STEP_BUDGET
}
fn default_history_mode() -> String {
    "full".into()
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            max_steps: default_max_steps(),
            history_mode: default_history_mode(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Persisted conversation log (default `~/.glimpse/conversation.json`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_path: Option<PathBuf>,

    /// Downloaded images (default `~/.glimpse/images`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub images_dir: Option<PathBuf>,
}

/// A model backend the agent can talk to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderKind {
    Anthropic,
    OpenAi,
    OpenRouter,
}

impl ProviderKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Anthropic => "anthropic",
            Self::OpenAi => "openai",
            Self::OpenRouter => "openrouter",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "anthropic" => Some(Self::Anthropic),
            "openai" => Some(Self::OpenAi),
            "openrouter" => Some(Self::OpenRouter),
            _ => None,
        }
    }

    /// Environment variable holding this provider's credential.
    pub fn env_key(&self) -> &'static str {
        match self {
            Self::Anthropic => "ANTHROPIC_API_KEY",
            Self::OpenAi => "OPENAI_API_KEY",
            Self::OpenRouter => "OPENROUTER_API_KEY",
        }
    }

    pub fn default_model(&self) -> &'static str {
        match self {
            Self::Anthropic => "claude-sonnet-4-20250514",
            Self::OpenAi => "gpt-4o",
            Self::OpenRouter => "anthropic/claude-sonnet-4",
        }
    }
}

/// The provider chosen at startup. Immutable for the process lifetime.
#[derive(Clone)]
pub struct ProviderSelection {
    pub kind: ProviderKind,
    pub api_key: String,
    pub api_url: Option<String>,
    pub model: String,
    pub vision_model: String,
}

impl std::fmt::Debug for ProviderSelection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderSelection")
            .field("kind", &self.kind)
            .field("api_key", &"[REDACTED]")
            .field("api_url", &self.api_url)
            .field("model", &self.model)
            .field("vision_model", &self.vision_model)
            .finish()
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.glimpse/config.toml),
    /// then apply environment overrides.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_with_env(&Self::config_dir().join("config.toml"))
    }

    /// Load a specific file, then apply environment overrides.
    pub fn load_with_env(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load_from(path)?;
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Apply environment overrides through a lookup function.
    ///
    /// Credentials from the environment only fill gaps; the file wins.
    /// `GLIMPSE_*` selectors always win.
    pub fn apply_env(&mut self, env: impl Fn(&str) -> Option<String>) {
        for kind in PROVIDER_PREFERENCE {
            if let Some(key) = env(kind.env_key()).filter(|k| !k.trim().is_empty()) {
                let entry = self.providers.entry(kind.name().to_string()).or_default();
                if entry.api_key.is_none() {
                    entry.api_key = Some(key);
                }
            }
        }

        if self.search.api_key.is_none() {
            self.search.api_key = env("VALYU_API_KEY").filter(|k| !k.trim().is_empty());
        }

        if let Some(provider) = env("GLIMPSE_PROVIDER") {
            self.provider = Some(provider);
        }
        if let Some(model) = env("GLIMPSE_MODEL") {
            self.model = Some(model);
        }
        if let Some(model) = env("GLIMPSE_VISION_MODEL") {
            self.vision_model = Some(model);
        }
    }

    /// Pick the model provider from the credentials on hand.
    ///
    /// An explicit `provider` must have a credential. Otherwise the first
    /// provider in [`PROVIDER_PREFERENCE`] with a key wins.
    pub fn select_provider(&self) -> Result<ProviderSelection, ConfigError> {
        let credential = |kind: ProviderKind| {
            self.providers
                .get(kind.name())
                .and_then(|p| p.api_key.clone())
                .filter(|k| !k.trim().is_empty())
        };

        let kind = match &self.provider {
            Some(name) => {
                let kind = ProviderKind::from_name(name)
                    .ok_or_else(|| ConfigError::UnknownProvider(name.clone()))?;
                if credential(kind).is_none() {
                    return Err(ConfigError::MissingCredential {
                        provider: kind.name().into(),
                        env_key: kind.env_key().into(),
                    });
                }
                kind
            }
            None => PROVIDER_PREFERENCE
                .into_iter()
                .find(|k| credential(*k).is_some())
                .ok_or(ConfigError::NoCredentials)?,
        };

        let provider_config = self.providers.get(kind.name()).cloned().unwrap_or_default();
        let model = self
            .model
            .clone()
            .or(provider_config.default_model.clone())
            .unwrap_or_else(|| kind.default_model().to_string());
        let vision_model = self.vision_model.clone().unwrap_or_else(|| model.clone());

        Ok(ProviderSelection {
            kind,
            api_key: credential(kind).unwrap_or_default(),
            api_url: provider_config.api_url,
            model,
            vision_model,
        })
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".glimpse")
    }

    /// Resolved path of the persisted conversation log.
    pub fn log_path(&self) -> PathBuf {
        self.storage
            .log_path
            .clone()
            .unwrap_or_else(|| Self::config_dir().join("conversation.json"))
    }

    /// Resolved directory for downloaded images.
    pub fn images_dir(&self) -> PathBuf {
        self.storage
            .images_dir
            .clone()
            .unwrap_or_else(|| Self::config_dir().join("images"))
    }

    /// Validate the configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.temperature < 0.0 || self.temperature > 2.0 {
            return Err(ConfigError::ValidationError(
                "temperature must be between 0.0 and 2.0".into(),
            ));
        }

        if self.agent.max_steps == 0 || self.agent.max_steps > MAX_STEP_BUDGET {
            return Err(ConfigError::ValidationError(format!(
                "agent.max_steps must be between 1 and {MAX_STEP_BUDGET}"
            )));
        }

        if !matches!(self.agent.history_mode.as_str(), "full" | "compact") {
            return Err(ConfigError::ValidationError(
                "agent.history_mode must be \"full\" or \"compact\"".into(),
            ));
        }

        if self.search.cost_ceiling <= 0.0 {
            return Err(ConfigError::ValidationError(
                "search.cost_ceiling must be > 0".into(),
            ));
        }

        Ok(())
    }

    /// Check if a search credential is available.
    pub fn has_search_key(&self) -> bool {
        self.search.api_key.is_some()
    }

    /// Generate a default config TOML string.
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            provider: None,
            model: None,
            vision_model: None,
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            providers: HashMap::new(),
            search: SearchConfig::default(),
            agent: AgentSettings::default(),
            storage: StorageConfig::default(),
        }
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),

    #[error("Unknown provider '{0}' (expected anthropic, openai or openrouter)")]
    UnknownProvider(String),

    #[error("Provider '{provider}' selected but no credential found (set {env_key})")]
    MissingCredential { provider: String, env_key: String },

    #[error("No model credential found (set ANTHROPIC_API_KEY, OPENAI_API_KEY or OPENROUTER_API_KEY)")]
    NoCredentials,
}
