use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Config file read when `TGRELAY_CONFIG` is not set. Optional.
pub const DEFAULT_CONFIG_PATH: &str = "config.toml";

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LlmProvider {
    #[default]
    Aimlapi,
    Openai,
    Openrouter,
    Ollama,
}

impl std::fmt::Display for LlmProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LlmProvider::Aimlapi => write!(f, "aimlapi"),
            LlmProvider::Openai => write!(f, "openai"),
            LlmProvider::Openrouter => write!(f, "openrouter"),
            LlmProvider::Ollama => write!(f, "ollama"),
        }
    }
}

/// When the relay moves its update offset forward.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum CommitMode {
    /// After the whole batch has been handled. A failure mid-batch replays
    /// the batch, so replies already sent may be sent again.
    #[default]
    Batch,
    /// After each update. Narrows the replay window to the update in flight.
    Update,
}

impl std::fmt::Display for CommitMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CommitMode::Batch => write!(f, "batch"),
            CommitMode::Update => write!(f, "update"),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct TelegramConfig {
    #[serde(default)]
    pub bot_token: String,
    #[serde(default = "default_telegram_api_url")]
    pub api_url: String,
    /// Seconds Telegram may hold a getUpdates call open waiting for messages.
    #[serde(default = "default_poll_timeout_secs")]
    pub poll_timeout_secs: u32,
    #[serde(default = "default_true")]
    pub delete_commands_on_start: bool,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            bot_token: String::new(),
            api_url: default_telegram_api_url(),
            poll_timeout_secs: default_poll_timeout_secs(),
            delete_commands_on_start: true,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default)]
    pub provider: LlmProvider,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default)]
    pub base_url: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Sent to the chat in place of a reply when the completion fails.
    #[serde(default = "default_fallback_reply")]
    pub fallback_reply: String,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: LlmProvider::default(),
            model: default_model(),
            base_url: String::new(),
            api_key: String::new(),
            max_tokens: None,
            request_timeout_secs: default_request_timeout_secs(),
            fallback_reply: default_fallback_reply(),
        }
    }
}

impl LlmConfig {
    /// Returns the effective base_url: if the stored value is empty,
    /// fall back to the canonical URL for the configured provider.
    pub fn effective_base_url(&self) -> &str {
        if !self.base_url.is_empty() {
            return self.base_url.trim_end_matches('/');
        }
        match self.provider {
            LlmProvider::Aimlapi => "https://api.aimlapi.com/v1",
            LlmProvider::Openai => "https://api.openai.com/v1",
            LlmProvider::Openrouter => "https://openrouter.ai/api/v1",
            LlmProvider::Ollama => "http://localhost:11434/v1",
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RelayConfig {
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_error_backoff_ms")]
    pub error_backoff_ms: u64,
    #[serde(default)]
    pub commit: CommitMode,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            error_backoff_ms: default_error_backoff_ms(),
            commit: CommitMode::default(),
        }
    }
}

impl RelayConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn error_backoff(&self) -> Duration {
        Duration::from_millis(self.error_backoff_ms)
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub telegram: TelegramConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub relay: RelayConfig,
}

fn default_true() -> bool {
    true
}

fn default_telegram_api_url() -> String {
    "https://api.telegram.org".to_string()
}

fn default_poll_timeout_secs() -> u32 {
    25
}

fn default_model() -> String {
    "gpt-4".to_string()
}

fn default_request_timeout_secs() -> u64 {
    120
}

fn default_fallback_reply() -> String {
    "Sorry, an error occurred while processing your request.".to_string()
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_error_backoff_ms() -> u64 {
    5000
}

impl Config {
    /// Build the configuration from the optional config file and the
    /// process environment, then validate it.
    pub fn load() -> Result<Self> {
        let mut config = match std::env::var_os("TGRELAY_CONFIG") {
            Some(path) => Self::from_file(Path::new(&path))?,
            None => {
                let path = PathBuf::from(DEFAULT_CONFIG_PATH);
                if path.exists() {
                    Self::from_file(&path)?
                } else {
                    Self::default()
                }
            }
        };

        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::from_toml(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Overlay environment variables on top of file values. Empty
    /// variables are treated as unset.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(token) = get("TELEGRAM_BOT_TOKEN") {
            self.telegram.bot_token = token;
        }
        if let Some(url) = get("TELEGRAM_API_URL") {
            self.telegram.api_url = url;
        }
        if let Some(key) = get("OPENAI_API_KEY") {
            self.llm.api_key = key;
        }
        if let Some(url) = get("OPENAI_BASE_URL") {
            self.llm.base_url = url;
        }
        if let Some(model) = get("OPENAI_MODEL") {
            self.llm.model = model;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.telegram.bot_token.trim().is_empty() {
            anyhow::bail!("TELEGRAM_BOT_TOKEN is not set");
        }
        if self.llm.api_key.trim().is_empty() && self.llm.provider != LlmProvider::Ollama {
            anyhow::bail!(
                "OPENAI_API_KEY is not set (required for provider '{}')",
                self.llm.provider
            );
        }
        if self.llm.model.trim().is_empty() {
            anyhow::bail!("llm.model must not be empty");
        }
        if self.relay.poll_interval_ms == 0 || self.relay.error_backoff_ms == 0 {
            anyhow::bail!("relay intervals must be greater than zero");
        }
        if self.llm.request_timeout_secs == 0 {
            anyhow::bail!("llm.request_timeout_secs must be greater than zero");
        }
        Ok(())
    }
}
