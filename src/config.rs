use serde::Deserialize;
use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use teloxide::types::ChatId;

use crate::format::TELEGRAM_MESSAGE_LIMIT;
use crate::site::PageSpec;

/// Errors that can occur when loading configuration.
#[derive(Debug)]
pub enum ConfigError {
    /// Failed to read the settings file.
    ReadFile { path: PathBuf, source: std::io::Error },
    /// Failed to parse JSON.
    ParseJson { path: PathBuf, source: serde_json::Error },
    /// A required environment variable is not set.
    Missing(&'static str),
    /// Validation error.
    Validation(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ReadFile { path, source } => {
                write!(f, "failed to read settings file '{}': {}", path.display(), source)
            }
            Self::ParseJson { path, source } => {
                write!(f, "failed to parse settings file '{}': {}", path.display(), source)
            }
            Self::Missing(name) => write!(f, "environment variable {} is required", name),
            Self::Validation(msg) => write!(f, "config validation error: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::ReadFile { source, .. } => Some(source),
            Self::ParseJson { source, .. } => Some(source),
            Self::Missing(_) | Self::Validation(_) => None,
        }
    }
}

/// Non-secret settings, all optional.
#[derive(Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct SettingsFile {
    site_base_url: Option<String>,
    pages: Option<Vec<PageSpec>>,
    completion_url: Option<String>,
    /// Tried in order until one answers.
    models: Option<Vec<String>>,
    max_tokens: Option<u32>,
    temperature: Option<f32>,
    request_timeout_secs: Option<u64>,
    refresh_interval_minutes: Option<u64>,
    page_char_budget: Option<usize>,
    prompt_char_budget: Option<usize>,
    chunk_limit: Option<usize>,
    send_delay_ms: Option<u64>,
    school_name: Option<String>,
    /// Directory for log files. Defaults to current directory.
    data_dir: Option<String>,
}

const DEFAULT_COMPLETION_URL: &str = "https://api.deepseek.com/v1/chat/completions";
const DEFAULT_MODEL: &str = "deepseek-chat";
const DEFAULT_PORT: u16 = 8080;

fn default_pages() -> Vec<PageSpec> {
    [
        ("Главная", "/"),
        ("Цены", "/prices"),
        ("Расписание", "/schedule"),
        ("Преподаватели", "/teachers"),
        ("Контакты", "/contacts"),
    ]
    .into_iter()
    .map(|(name, path)| PageSpec::new(name, path))
    .collect()
}

pub struct Config {
    pub telegram_bot_token: String,
    pub completion_api_key: String,
    /// Public base URL; when set the bot runs in webhook mode.
    pub webhook_url: Option<String>,
    /// JSON endpoint serving page text, used instead of scraping when set.
    pub content_api_url: Option<String>,
    pub debug: bool,
    /// Port for the health check and webhook server.
    pub port: u16,
    /// Chat that receives warnings and errors.
    pub log_chat_id: Option<ChatId>,
    pub site_base_url: Option<String>,
    pub pages: Vec<PageSpec>,
    pub completion_url: String,
    pub models: Vec<String>,
    pub max_tokens: u32,
    pub temperature: f32,
    pub request_timeout: Duration,
    pub refresh_interval: Duration,
    pub page_char_budget: usize,
    pub prompt_char_budget: usize,
    pub chunk_limit: usize,
    pub send_delay: Duration,
    pub school_name: String,
    /// Directory for state files (logs).
    pub data_dir: PathBuf,
}

impl Config {
    /// Load settings from an optional JSON file and secrets from the process environment.
    pub fn load(settings_path: Option<&Path>) -> Result<Self, ConfigError> {
        Self::from_sources(settings_path, |key| std::env::var(key).ok())
    }

    pub fn from_sources<F>(settings_path: Option<&Path>, env: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let file = match settings_path {
            Some(path) => read_settings(path)?,
            None => SettingsFile::default(),
        };
        let var = |key: &str| {
            env(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let telegram_bot_token = var("TELEGRAM_BOT_TOKEN")
            .or_else(|| var("BOT_TOKEN"))
            .ok_or(ConfigError::Missing("TELEGRAM_BOT_TOKEN"))?;
        // Telegram tokens are formatted as {bot_id}:{secret} where bot_id is numeric
        let token_parts: Vec<&str> = telegram_bot_token.split(':').collect();
        if token_parts.len() != 2 || token_parts[0].parse::<u64>().is_err() || token_parts[1].is_empty() {
            return Err(ConfigError::Validation(
                "telegram bot token appears invalid (expected format: 123456789:ABCdefGHI...)".into(),
            ));
        }

        let completion_api_key = var("COMPLETION_API_KEY")
            .or_else(|| var("DEEPSEEK_API_KEY"))
            .ok_or(ConfigError::Missing("COMPLETION_API_KEY"))?;

        let port = match var("PORT") {
            Some(p) => p
                .parse::<u16>()
                .map_err(|_| ConfigError::Validation(format!("PORT must be a port number, got '{p}'")))?,
            None => DEFAULT_PORT,
        };
        let log_chat_id = match var("LOG_CHAT_ID") {
            Some(id) => Some(ChatId(id.parse::<i64>().map_err(|_| {
                ConfigError::Validation(format!("LOG_CHAT_ID must be a chat id, got '{id}'"))
            })?)),
            None => None,
        };
        let debug = var("DEBUG").is_some_and(|v| is_truthy(&v));
        let webhook_url = var("WEBHOOK_URL").map(|u| u.trim_end_matches('/').to_string());
        let content_api_url = var("CONTENT_API_URL");
        let site_base_url = var("SITE_URL")
            .or(file.site_base_url)
            .map(|u| u.trim_end_matches('/').to_string());

        if site_base_url.is_none() && content_api_url.is_none() {
            return Err(ConfigError::Validation(
                "either site_base_url (or SITE_URL) or CONTENT_API_URL must be set".into(),
            ));
        }

        let pages = file.pages.unwrap_or_else(default_pages);
        if pages.is_empty() {
            return Err(ConfigError::Validation("pages must not be empty".into()));
        }
        let mut seen = HashSet::new();
        for page in &pages {
            if !seen.insert(page.name.as_str()) {
                return Err(ConfigError::Validation(format!("duplicate page name '{}'", page.name)));
            }
        }

        let models = file.models.unwrap_or_else(|| vec![DEFAULT_MODEL.to_string()]);
        if models.is_empty() || models.iter().any(|m| m.trim().is_empty()) {
            return Err(ConfigError::Validation("models must list at least one model id".into()));
        }

        let temperature = file.temperature.unwrap_or(0.3);
        if !(0.0..=2.0).contains(&temperature) {
            return Err(ConfigError::Validation(format!(
                "temperature must be between 0 and 2, got {temperature}"
            )));
        }

        let chunk_limit = file.chunk_limit.unwrap_or(TELEGRAM_MESSAGE_LIMIT);
        if !(64..=TELEGRAM_MESSAGE_LIMIT).contains(&chunk_limit) {
            return Err(ConfigError::Validation(format!(
                "chunk_limit must be between 64 and {TELEGRAM_MESSAGE_LIMIT}, got {chunk_limit}"
            )));
        }

        let refresh_minutes = file.refresh_interval_minutes.unwrap_or(60);
        if refresh_minutes == 0 {
            return Err(ConfigError::Validation("refresh_interval_minutes must be positive".into()));
        }

        Ok(Self {
            telegram_bot_token,
            completion_api_key,
            webhook_url,
            content_api_url,
            debug,
            port,
            log_chat_id,
            site_base_url,
            pages,
            completion_url: file
                .completion_url
                .unwrap_or_else(|| DEFAULT_COMPLETION_URL.to_string()),
            models,
            max_tokens: file.max_tokens.unwrap_or(1000),
            temperature,
            request_timeout: Duration::from_secs(file.request_timeout_secs.unwrap_or(25)),
            refresh_interval: Duration::from_secs(refresh_minutes * 60),
            page_char_budget: file.page_char_budget.unwrap_or(3000),
            prompt_char_budget: file.prompt_char_budget.unwrap_or(12000),
            chunk_limit,
            send_delay: Duration::from_millis(file.send_delay_ms.unwrap_or(300)),
            school_name: file
                .school_name
                .unwrap_or_else(|| "гитарная школа".to_string()),
            data_dir: file
                .data_dir
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(".")),
        })
    }

    pub fn is_webhook(&self) -> bool {
        self.webhook_url.is_some()
    }
}

fn read_settings(path: &Path) -> Result<SettingsFile, ConfigError> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::ReadFile { path: path.to_path_buf(), source: e })?;
    serde_json::from_str(&content)
        .map_err(|e| ConfigError::ParseJson { path: path.to_path_buf(), source: e })
}

fn is_truthy(value: &str) -> bool {
    matches!(value.to_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_settings(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    fn base_env() -> Vec<(&'static str, &'static str)> {
        vec![
            ("TELEGRAM_BOT_TOKEN", "123456789:ABCdefGHIjklMNOpqrsTUVwxyz"),
            ("COMPLETION_API_KEY", "sk-test"),
            ("SITE_URL", "https://guitar.example/"),
        ]
    }

    fn assert_err<T>(result: Result<T, ConfigError>) -> ConfigError {
        match result {
            Ok(_) => panic!("expected error, got Ok"),
            Err(e) => e,
        }
    }

    #[test]
    fn test_defaults_from_env_only() {
        let config = Config::from_sources(None, env(&base_env())).expect("should load");
        assert_eq!(config.site_base_url.as_deref(), Some("https://guitar.example"));
        assert_eq!(config.models, vec!["deepseek-chat"]);
        assert_eq!(config.chunk_limit, 4096);
        assert_eq!(config.port, 8080);
        assert_eq!(config.send_delay, Duration::from_millis(300));
        assert_eq!(config.request_timeout, Duration::from_secs(25));
        assert_eq!(config.pages.len(), 5);
        assert!(!config.debug);
        assert!(!config.is_webhook());
    }

    #[test]
    fn test_token_aliases() {
        let config = Config::from_sources(
            None,
            env(&[
                ("BOT_TOKEN", "42:secret"),
                ("DEEPSEEK_API_KEY", "sk-alias"),
                ("CONTENT_API_URL", "https://cms.example/pages"),
            ]),
        )
        .expect("should load");
        assert_eq!(config.telegram_bot_token, "42:secret");
        assert_eq!(config.completion_api_key, "sk-alias");
        assert!(config.site_base_url.is_none());
    }

    #[test]
    fn test_optional_env() {
        let mut vars = base_env();
        vars.extend([
            ("WEBHOOK_URL", "https://bot.example/"),
            ("DEBUG", "True"),
            ("PORT", "10000"),
            ("LOG_CHAT_ID", "-100123"),
        ]);
        let config = Config::from_sources(None, env(&vars)).expect("should load");
        assert_eq!(config.webhook_url.as_deref(), Some("https://bot.example"));
        assert!(config.is_webhook());
        assert!(config.debug);
        assert_eq!(config.port, 10000);
        assert_eq!(config.log_chat_id, Some(ChatId(-100123)));
    }

    #[test]
    fn test_settings_file() {
        let file = write_settings(r#"{
            "site_base_url": "https://school.example",
            "pages": [{"name": "Цены", "path": "/price"}],
            "models": ["deepseek/deepseek-chat", "mistralai/mistral-7b-instruct"],
            "chunk_limit": 1000,
            "send_delay_ms": 500,
            "school_name": "Гитарная школа «Аккорд»"
        }"#);
        let vars = [
            ("TELEGRAM_BOT_TOKEN", "123:abc"),
            ("COMPLETION_API_KEY", "sk"),
        ];
        let config = Config::from_sources(Some(file.path()), env(&vars)).expect("should load");
        assert_eq!(config.site_base_url.as_deref(), Some("https://school.example"));
        assert_eq!(config.pages, vec![PageSpec::new("Цены", "/price")]);
        assert_eq!(config.models.len(), 2);
        assert_eq!(config.chunk_limit, 1000);
        assert_eq!(config.send_delay, Duration::from_millis(500));
        assert_eq!(config.school_name, "Гитарная школа «Аккорд»");
    }

    #[test]
    fn test_missing_token() {
        let err = assert_err(Config::from_sources(None, env(&[("COMPLETION_API_KEY", "sk")])));
        assert!(matches!(err, ConfigError::Missing("TELEGRAM_BOT_TOKEN")));
    }

    #[test]
    fn test_blank_api_key_is_missing() {
        let err = assert_err(Config::from_sources(
            None,
            env(&[("TELEGRAM_BOT_TOKEN", "1:a"), ("COMPLETION_API_KEY", "  ")]),
        ));
        assert!(matches!(err, ConfigError::Missing("COMPLETION_API_KEY")));
    }

    #[test]
    fn test_invalid_token_format() {
        for token in ["no_colon", "abc:def", "123:"] {
            let mut vars = base_env();
            vars[0] = ("TELEGRAM_BOT_TOKEN", token);
            let err = assert_err(Config::from_sources(None, env(&vars)));
            assert!(matches!(err, ConfigError::Validation(_)), "token {token}");
        }
    }

    #[test]
    fn test_requires_a_content_source() {
        let vars = [("TELEGRAM_BOT_TOKEN", "1:a"), ("COMPLETION_API_KEY", "sk")];
        let err = assert_err(Config::from_sources(None, env(&vars)));
        assert!(err.to_string().contains("CONTENT_API_URL"));
    }

    #[test]
    fn test_invalid_port() {
        let mut vars = base_env();
        vars.push(("PORT", "http"));
        let err = assert_err(Config::from_sources(None, env(&vars)));
        assert!(err.to_string().contains("PORT"));
    }

    #[test]
    fn test_empty_models() {
        let file = write_settings(r#"{"models": []}"#);
        let err = assert_err(Config::from_sources(Some(file.path()), env(&base_env())));
        assert!(err.to_string().contains("models"));
    }

    #[test]
    fn test_duplicate_pages() {
        let file = write_settings(
            r#"{"pages": [{"name": "Цены", "path": "/a"}, {"name": "Цены", "path": "/b"}]}"#,
        );
        let err = assert_err(Config::from_sources(Some(file.path()), env(&base_env())));
        assert!(err.to_string().contains("duplicate"));
    }

    #[test]
    fn test_chunk_limit_above_telegram_limit() {
        let file = write_settings(r#"{"chunk_limit": 5000}"#);
        let err = assert_err(Config::from_sources(Some(file.path()), env(&base_env())));
        assert!(matches!(err, ConfigError::Validation(_)));
    }

    #[test]
    fn test_unknown_field() {
        let file = write_settings(r#"{"chunk_limt": 100}"#);
        let err = assert_err(Config::from_sources(Some(file.path()), env(&base_env())));
        assert!(matches!(err, ConfigError::ParseJson { .. }));
    }

    #[test]
    fn test_file_not_found() {
        let err = assert_err(Config::from_sources(
            Some(Path::new("/nonexistent/path/settings.json")),
            env(&base_env()),
        ));
        assert!(matches!(err, ConfigError::ReadFile { .. }));
    }

    #[test]
    fn test_invalid_json() {
        let file = write_settings("{ invalid json }");
        let err = assert_err(Config::from_sources(Some(file.path()), env(&base_env())));
        assert!(matches!(err, ConfigError::ParseJson { .. }));
    }
}
