//! Runtime configuration: LLM endpoint, history directory and server settings.
//!
//! Values come from defaults, then an optional TOML settings file, then a
//! `.env` file, then a TOML secrets file for the API key, then individual
//! environment overrides.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use url::Url;

use crate::error::{ChatError, ChatResult};

/// Environment variable (and secrets-file key) holding the API key.
pub const API_KEY_ENV: &str = "GROQ_API_KEY";
/// Environment variable pointing at the TOML secrets file.
pub const SECRETS_PATH_ENV: &str = "MENTOR_CHAT_SECRETS";
/// Secrets file used when `MENTOR_CHAT_SECRETS` is unset.
pub const DEFAULT_SECRETS_FILE: &str = ".secrets.toml";
/// Environment variable pointing at the TOML settings file.
pub const CONFIG_PATH_ENV: &str = "MENTOR_CHAT_CONFIG";
/// Settings file used when `MENTOR_CHAT_CONFIG` is unset.
pub const DEFAULT_CONFIG_FILE: &str = "mentor_chat.toml";

const MODEL_ENV: &str = "MENTOR_CHAT_MODEL";
const ENDPOINT_ENV: &str = "MENTOR_CHAT_ENDPOINT";
const HISTORY_DIR_ENV: &str = "MENTOR_CHAT_HISTORY_DIR";
const PORT_ENV: &str = "MENTOR_CHAT_PORT";
const STATIC_DIR_ENV: &str = "MENTOR_CHAT_STATIC_DIR";
const STREAM_ENV: &str = "MENTOR_CHAT_STREAM";
const SYSTEM_PROMPT_ENV: &str = "MENTOR_CHAT_SYSTEM_PROMPT";

/// Groq's OpenAI-compatible chat completion endpoint.
pub const DEFAULT_ENDPOINT: &str = "https://api.groq.com/openai/v1/chat/completions";
/// Model requested when none is configured.
pub const DEFAULT_MODEL: &str = "moonshotai/kimi-k2-instruct";

const MISSING_KEY_MESSAGE: &str = "GROQ_API_KEY not found.\n\
Setup instructions:\n\
  1. Create a .env file next to the binary containing GROQ_API_KEY=your_api_key\n\
     (or put GROQ_API_KEY = \"your_api_key\" in .secrets.toml)\n\
  2. Restart the application\n\
To get a key, visit https://console.groq.com/ and create one under API Keys.";

/// Bearer token for the LLM API. Never printed.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct ApiKey(String);

impl ApiKey {
    /// Wrap a raw key.
    #[must_use]
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Borrow the raw key for the `Authorization` header.
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ApiKey(***)")
    }
}

/// Top-level configuration.
///
/// Every table and key of the settings file is optional:
///
/// ```toml
/// [llm]
/// model = "llama-3.3-70b-versatile"
/// stream_timeout = 30
///
/// [history]
/// dir = "/var/lib/mentor-chat"
/// ```
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AppConfig {
    /// LLM endpoint and sampling settings.
    pub llm: LlmConfig,
    /// Conversation history storage.
    pub history: HistoryConfig,
    /// HTTP front-end.
    pub server: ServerConfig,
}

/// LLM endpoint and sampling settings.
#[derive(Clone, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LlmConfig {
    /// Chat completion endpoint URL.
    pub endpoint: String,
    /// Model name.
    pub model: String,
    /// Bearer token.
    #[serde(skip)]
    pub api_key: ApiKey,
    /// Maximum generated tokens.
    pub max_tokens: u32,
    /// Sampling temperature.
    pub temperature: f32,
    /// Nucleus sampling mass.
    pub top_p: f32,
    /// Request streamed responses.
    pub stream: bool,
    /// Optional system prompt sent ahead of the conversation.
    pub system_prompt: Option<String>,
    /// Upper bound for a streamed request, in seconds in the settings file.
    #[serde(deserialize_with = "seconds")]
    pub stream_timeout: Duration,
    /// Upper bound for a non-streamed request, in seconds in the settings file.
    #[serde(deserialize_with = "seconds")]
    pub completion_timeout: Duration,
    /// Number of most recent messages sent as context.
    pub context_messages: usize,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            model: DEFAULT_MODEL.to_string(),
            api_key: ApiKey::default(),
            max_tokens: 8_000,
            temperature: 0.1,
            top_p: 0.9,
            stream: true,
            system_prompt: None,
            stream_timeout: Duration::from_secs(45),
            completion_timeout: Duration::from_secs(90),
            context_messages: 20,
        }
    }
}

/// Conversation history storage.
#[derive(Clone, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HistoryConfig {
    /// Directory holding one JSON file per saved conversation.
    pub dir: PathBuf,
    /// Number of records front-ends show by default.
    pub list_limit: usize,
    /// Labels longer than this are shortened in compact listings.
    pub label_max_chars: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("chat_history"),
            list_limit: 10,
            label_max_chars: 32,
        }
    }
}

/// HTTP front-end.
#[derive(Clone, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    /// Listening port.
    pub port: u16,
    /// Directory served for any non-API path.
    pub static_dir: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: crate::server::DEFAULT_PORT,
            static_dir: PathBuf::from("static"),
        }
    }
}

impl AppConfig {
    /// Load `.env`, then resolve everything from the process environment.
    ///
    /// # Errors
    /// Returns [`ChatError::Config`] if no API key is found or a value is invalid.
    pub fn from_env() -> ChatResult<Self> {
        match dotenvy::dotenv() {
            Ok(path) => tracing::debug!("loaded environment from {}", path.display()),
            Err(err) => tracing::debug!("no .env file loaded: {err}"),
        }
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Resolve configuration through `lookup` instead of the process environment.
    ///
    /// # Errors
    /// Returns [`ChatError::Config`] if no API key is found, the settings file
    /// is malformed, or a value is invalid.
    pub fn from_lookup<F>(lookup: F) -> ChatResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let config_path =
            lookup(CONFIG_PATH_ENV).map_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE), PathBuf::from);
        let mut config = Self::from_file(&config_path)?.unwrap_or_default();

        let secrets_path =
            lookup(SECRETS_PATH_ENV).map_or_else(|| PathBuf::from(DEFAULT_SECRETS_FILE), PathBuf::from);
        let api_key = read_secret(&secrets_path, API_KEY_ENV)?
            .or_else(|| lookup(API_KEY_ENV))
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| ChatError::Config(MISSING_KEY_MESSAGE.to_string()))?;
        config.llm.api_key = ApiKey::new(api_key.trim());

        if let Some(model) = lookup(MODEL_ENV) {
            config.llm.model = model;
        }
        if let Some(endpoint) = lookup(ENDPOINT_ENV) {
            config.llm.endpoint = endpoint;
        }
        if let Some(prompt) = lookup(SYSTEM_PROMPT_ENV).filter(|p| !p.trim().is_empty()) {
            config.llm.system_prompt = Some(prompt);
        }
        if let Some(raw) = lookup(STREAM_ENV) {
            config.llm.stream = parse_flag(&raw)
                .ok_or_else(|| ChatError::Config(format!("{STREAM_ENV} must be a boolean, got '{raw}'")))?;
        }
        if let Some(dir) = lookup(HISTORY_DIR_ENV) {
            config.history.dir = PathBuf::from(dir);
        }
        if let Some(raw) = lookup(PORT_ENV) {
            config.server.port = raw
                .parse()
                .map_err(|_| ChatError::Config(format!("{PORT_ENV} must be a port number, got '{raw}'")))?;
        }
        if let Some(dir) = lookup(STATIC_DIR_ENV) {
            config.server.static_dir = PathBuf::from(dir);
        }

        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML settings file. A missing file yields `None`.
    ///
    /// The API key is never read from this file.
    ///
    /// # Errors
    /// Returns [`ChatError::Config`] if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> ChatResult<Option<Self>> {
        let Some(raw) = read_optional(path, "settings")? else {
            return Ok(None);
        };
        let config = toml::from_str(&raw).map_err(|err| {
            ChatError::Config(format!("invalid settings file {}: {err}", path.display()))
        })?;
        tracing::debug!("loaded settings from {}", path.display());
        Ok(Some(config))
    }

    /// Override the history directory.
    #[must_use]
    pub fn with_history_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.history.dir = dir.into();
        self
    }

    /// Override streaming mode.
    #[must_use]
    pub const fn with_stream(mut self, stream: bool) -> Self {
        self.llm.stream = stream;
        self
    }

    /// Override the model name.
    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.llm.model = model.into();
        self
    }

    /// Validate configuration invariants.
    ///
    /// # Errors
    /// Returns an error if any values are out of range or invalid.
    pub fn validate(&self) -> ChatResult<()> {
        Url::parse(&self.llm.endpoint)?;

        if self.llm.model.trim().is_empty() {
            return Err(ChatError::Config("llm.model must not be empty".to_string()));
        }
        if self.llm.max_tokens == 0 {
            return Err(ChatError::Config("llm.max_tokens must be > 0".to_string()));
        }
        if !(0.0..=2.0).contains(&self.llm.temperature) {
            return Err(ChatError::Config(
                "llm.temperature must be within [0, 2]".to_string(),
            ));
        }
        if self.llm.top_p <= 0.0 || self.llm.top_p > 1.0 {
            return Err(ChatError::Config("llm.top_p must be within (0, 1]".to_string()));
        }
        if self.llm.stream_timeout.is_zero() || self.llm.completion_timeout.is_zero() {
            return Err(ChatError::Config("llm timeouts must be > 0".to_string()));
        }
        if self.llm.context_messages == 0 {
            return Err(ChatError::Config(
                "llm.context_messages must be > 0".to_string(),
            ));
        }
        if self.history.dir.as_os_str().is_empty() {
            return Err(ChatError::Config("history.dir must not be empty".to_string()));
        }
        if self.history.list_limit == 0 {
            return Err(ChatError::Config("history.list_limit must be > 0".to_string()));
        }

        Ok(())
    }
}

/// Read `key` from a flat TOML secrets file. A missing file is not an error.
fn read_secret(path: &Path, key: &str) -> ChatResult<Option<String>> {
    let Some(raw) = read_optional(path, "secrets")? else {
        return Ok(None);
    };

    let table: toml::Table = toml::from_str(&raw).map_err(|err| {
        ChatError::Config(format!("invalid secrets file {}: {err}", path.display()))
    })?;

    Ok(table
        .get(key)
        .and_then(toml::Value::as_str)
        .map(ToString::to_string))
}

fn read_optional(path: &Path, kind: &str) -> ChatResult<Option<String>> {
    match std::fs::read_to_string(path) {
        Ok(raw) => Ok(Some(raw)),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(ChatError::Config(format!(
            "cannot read {kind} file {}: {err}",
            path.display()
        ))),
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Whole or fractional seconds.
fn seconds<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let secs = f64::deserialize(deserializer)?;
    Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.llm.endpoint, DEFAULT_ENDPOINT);
        assert_eq!(config.llm.max_tokens, 8_000);
        assert_eq!(config.history.dir, PathBuf::from("chat_history"));
        assert_eq!(config.history.list_limit, 10);
        assert!(config.llm.stream);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_missing_api_key_is_config_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let secrets = dir.path().join("absent.toml");
        let secrets = secrets.to_string_lossy().to_string();
        let result = AppConfig::from_lookup(lookup_from(&[(SECRETS_PATH_ENV, &secrets)]));

        match result {
            Err(ChatError::Config(message)) => assert!(message.contains("GROQ_API_KEY")),
            other => panic!("expected config error, got {other:?}"),
        }
    }

    #[test]
    fn test_api_key_from_environment() {
        let dir = tempfile::TempDir::new().unwrap();
        let secrets = dir.path().join("absent.toml").to_string_lossy().to_string();
        let config = AppConfig::from_lookup(lookup_from(&[
            (SECRETS_PATH_ENV, &secrets),
            (API_KEY_ENV, "gsk_env"),
            (MODEL_ENV, "llama-3.3-70b-versatile"),
            (STREAM_ENV, "off"),
            (PORT_ENV, "8080"),
        ]))
        .unwrap();

        assert_eq!(config.llm.api_key.expose(), "gsk_env");
        assert_eq!(config.llm.model, "llama-3.3-70b-versatile");
        assert!(!config.llm.stream);
        assert_eq!(config.server.port, 8080);
    }

    #[test]
    fn test_secrets_file_wins_over_environment() {
        let dir = tempfile::TempDir::new().unwrap();
        let secrets = dir.path().join("secrets.toml");
        std::fs::write(&secrets, "GROQ_API_KEY = \"gsk_file\"\n").unwrap();
        let secrets = secrets.to_string_lossy().to_string();

        let config = AppConfig::from_lookup(lookup_from(&[
            (SECRETS_PATH_ENV, &secrets),
            (API_KEY_ENV, "gsk_env"),
        ]))
        .unwrap();

        assert_eq!(config.llm.api_key.expose(), "gsk_file");
    }

    #[test]
    fn test_invalid_values_rejected() {
        let dir = tempfile::TempDir::new().unwrap();
        let secrets = dir.path().join("absent.toml").to_string_lossy().to_string();

        let bad_port = AppConfig::from_lookup(lookup_from(&[
            (SECRETS_PATH_ENV, &secrets),
            (API_KEY_ENV, "k"),
            (PORT_ENV, "not-a-port"),
        ]));
        assert!(matches!(bad_port, Err(ChatError::Config(_))));

        let bad_url = AppConfig::from_lookup(lookup_from(&[
            (SECRETS_PATH_ENV, &secrets),
            (API_KEY_ENV, "k"),
            (ENDPOINT_ENV, "not a url"),
        ]));
        assert!(matches!(bad_url, Err(ChatError::Config(_))));
    }

    #[test]
    fn test_settings_file_then_environment() {
        let dir = tempfile::TempDir::new().unwrap();
        let settings = dir.path().join("mentor_chat.toml");
        std::fs::write(
            &settings,
            "[llm]\nmodel = \"llama-3.3-70b-versatile\"\nstream = false\ncompletion_timeout = 2.5\n\n\
             [history]\nlist_limit = 25\n",
        )
        .unwrap();
        let settings = settings.to_string_lossy().to_string();
        let secrets = dir.path().join("absent.toml").to_string_lossy().to_string();

        let config = AppConfig::from_lookup(lookup_from(&[
            (CONFIG_PATH_ENV, &settings),
            (SECRETS_PATH_ENV, &secrets),
            (API_KEY_ENV, "k"),
            (MODEL_ENV, "from-env"),
        ]))
        .unwrap();

        assert_eq!(config.llm.model, "from-env");
        assert!(!config.llm.stream);
        assert_eq!(config.llm.completion_timeout, Duration::from_millis(2_500));
        assert_eq!(config.llm.stream_timeout, Duration::from_secs(45));
        assert_eq!(config.history.list_limit, 25);
        assert_eq!(config.history.dir, PathBuf::from("chat_history"));
    }

    #[test]
    fn test_settings_file_rejects_unknown_keys() {
        let dir = tempfile::TempDir::new().unwrap();
        let settings = dir.path().join("mentor_chat.toml");
        std::fs::write(&settings, "[llm]\napi_key = \"gsk_in_the_wrong_place\"\n").unwrap();

        match AppConfig::from_file(&settings) {
            Err(ChatError::Config(message)) => assert!(message.contains("invalid settings file")),
            other => panic!("expected config error, got {other:?}"),
        }
        assert!(AppConfig::from_file(&dir.path().join("none.toml")).unwrap().is_none());
    }

    #[test]
    fn test_api_key_is_redacted() {
        let key = ApiKey::new("gsk_secret");
        assert_eq!(format!("{key:?}"), "ApiKey(***)");
    }
}
