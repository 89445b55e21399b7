use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Error type for configuration loading
#[derive(Debug)]
pub enum ConfigError {
    ReadError {
        path: PathBuf,
        source: std::io::Error,
    },
    ParseError {
        path: PathBuf,
        source: toml::de::Error,
    },
    InvalidValue {
        path: PathBuf,
        field: String,
        value: String,
        valid_values: Vec<String>,
    },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::ReadError { path, source } => {
                write!(
                    f,
                    "Failed to read config file {}: {}",
                    path.display(),
                    source
                )
            }
            ConfigError::ParseError { path, source } => {
                write!(f, "Invalid TOML syntax in {}: {}", path.display(), source)
            }
            ConfigError::InvalidValue {
                path,
                field,
                value,
                valid_values,
            } => {
                write!(
                    f,
                    "Invalid value '{}' for '{}' in {}\n  Valid values: {}",
                    value,
                    field,
                    path.display(),
                    valid_values.join(", ")
                )
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::ReadError { source, .. } => Some(source),
            ConfigError::ParseError { source, .. } => Some(source),
            ConfigError::InvalidValue { .. } => None,
        }
    }
}

/// Gateway configuration, usually loaded from `~/.config/ai-gateway/config.toml`.
///
/// All fields have sensible defaults. The gateway itself never reads files or
/// the environment; it is handed a finished `Config`.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub quota: QuotaConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Default sampling parameters applied to requests that don't set their own.
///
/// Example in `config.toml`:
/// ```toml
/// [model]
/// name = "mistral-small-latest"
/// temperature = 0.4
/// max_tokens = 800
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelConfig {
    #[serde(default = "default_model_name")]
    pub name: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

fn default_model_name() -> String {
    "mistral-small-latest".to_string()
}

fn default_temperature() -> f32 {
    0.7
}

fn default_max_tokens() -> u32 {
    1024
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            name: default_model_name(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
        }
    }
}

/// Provider endpoint and retry behaviour.
#[derive(Clone, Serialize, Deserialize, PartialEq)]
pub struct ProviderConfig {
    /// OpenAI-compatible chat completions URL
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Per-attempt timeout in seconds (default: 30)
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    /// Total attempts per logical call, first one included (default: 3)
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_base_backoff")]
    pub base_backoff_ms: u64,
    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,
    /// Jitter factor applied to backoff delays (0.0-1.0)
    #[serde(default = "default_backoff_jitter")]
    pub backoff_jitter: f64,
}

fn default_endpoint() -> String {
    "https://api.mistral.ai/v1/chat/completions".to_string()
}

fn default_timeout() -> u64 {
    30
}

fn default_max_retries() -> u32 {
    3
}

fn default_base_backoff() -> u64 {
    1000
}

fn default_max_backoff() -> u64 {
    60_000
}

fn default_backoff_jitter() -> f64 {
    0.1
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            api_key: None,
            timeout_secs: default_timeout(),
            max_retries: default_max_retries(),
            base_backoff_ms: default_base_backoff(),
            max_backoff_ms: default_max_backoff(),
            backoff_jitter: default_backoff_jitter(),
        }
    }
}

impl fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("endpoint", &self.endpoint)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("timeout_secs", &self.timeout_secs)
            .field("max_retries", &self.max_retries)
            .field("base_backoff_ms", &self.base_backoff_ms)
            .field("max_backoff_ms", &self.max_backoff_ms)
            .field("backoff_jitter", &self.backoff_jitter)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CacheConfig {
    #[serde(default = "default_cache_enabled")]
    pub enabled: bool,
    /// Cache TTL in seconds (default: 3600 = 1 hour)
    #[serde(default = "default_cache_ttl")]
    pub ttl_seconds: u64,
    /// Maximum number of cached responses, 0 for unbounded (default: 256)
    #[serde(default = "default_cache_max_entries")]
    pub max_entries: usize,
    /// Collapse whitespace and case in prompts before hashing
    #[serde(default)]
    pub normalize_prompts: bool,
}

fn default_cache_enabled() -> bool {
    true
}

fn default_cache_ttl() -> u64 {
    3600
}

fn default_cache_max_entries() -> usize {
    256
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: default_cache_enabled(),
            ttl_seconds: default_cache_ttl(),
            max_entries: default_cache_max_entries(),
            normalize_prompts: false,
        }
    }
}

/// Call budgets per rolling window.
///
/// Example in `config.toml`:
/// ```toml
/// [quota]
/// hourly = 20
/// daily = 100
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QuotaConfig {
    #[serde(default = "default_hourly_quota")]
    pub hourly: u32,
    #[serde(default = "default_daily_quota")]
    pub daily: u32,
}

fn default_hourly_quota() -> u32 {
    20
}

fn default_daily_quota() -> u32 {
    100
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            hourly: default_hourly_quota(),
            daily: default_daily_quota(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct LoggingConfig {
    #[serde(default)]
    pub debug: bool,
    /// Log raw provider output for debugging
    #[serde(default)]
    pub log_requests: bool,
}

impl Config {
    pub fn dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("ai-gateway")
    }

    pub fn path() -> PathBuf {
        Self::dir().join("config.toml")
    }

    /// Load from the default location, falling back to defaults if absent.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::parse(&content, path)
    }

    /// Parse TOML text; `path` is only used in error messages.
    pub fn parse(content: &str, path: &Path) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })?;
        config.validate(path)?;
        Ok(config)
    }

    pub fn validate(&self, path: &Path) -> Result<(), ConfigError> {
        let invalid = |field: &str, value: String, valid: &str| ConfigError::InvalidValue {
            path: path.to_path_buf(),
            field: field.to_string(),
            value,
            valid_values: vec![valid.to_string()],
        };

        if !(0.0..=2.0).contains(&self.model.temperature) {
            return Err(invalid(
                "model.temperature",
                self.model.temperature.to_string(),
                "0.0 to 2.0",
            ));
        }
        if self.model.max_tokens == 0 {
            return Err(invalid("model.max_tokens", "0".into(), "at least 1"));
        }
        if self.provider.timeout_secs == 0 {
            return Err(invalid("provider.timeout_secs", "0".into(), "at least 1"));
        }
        if self.provider.max_retries == 0 {
            return Err(invalid("provider.max_retries", "0".into(), "at least 1"));
        }
        if !(0.0..=1.0).contains(&self.provider.backoff_jitter) {
            return Err(invalid(
                "provider.backoff_jitter",
                self.provider.backoff_jitter.to_string(),
                "0.0 to 1.0",
            ));
        }
        if !self.provider.endpoint.starts_with("https://")
            && !self.provider.endpoint.starts_with("http://")
        {
            return Err(invalid(
                "provider.endpoint",
                self.provider.endpoint.clone(),
                "an http:// or https:// URL",
            ));
        }
        Ok(())
    }

    /// Save config to the given path, creating parent directories.
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::ReadError {
                path: path.to_path_buf(),
                source: e,
            })?;
        }

        let content = self.to_toml().map_err(|e| ConfigError::InvalidValue {
            path: path.to_path_buf(),
            field: "serialization".to_string(),
            value: e.to_string(),
            valid_values: vec![],
        })?;

        std::fs::write(path, content).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })
    }

    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }

    pub fn with_overrides(
        mut self,
        model: Option<String>,
        endpoint: Option<String>,
        api_key: Option<String>,
        debug: bool,
    ) -> Self {
        if let Some(m) = model {
            self.model.name = m;
        }
        if let Some(e) = endpoint {
            self.provider.endpoint = e;
        }
        if let Some(k) = api_key {
            self.provider.api_key = Some(k);
        }
        if debug {
            self.logging.debug = true;
        }
        self
    }
}
