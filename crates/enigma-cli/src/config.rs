//! Application configuration.
//!
//! Reads `config/default.toml` (or the file given with `--config`). Every
//! section and key is optional; missing values fall back to the defaults
//! below. Secrets never live in the file: the Telegram token and the Sheets
//! access token come from the environment.
//!
//! ```toml
//! [bot]
//! maintainer_chat_id = -100123
//! admin_ids = [42]
//! session_ttl_secs = 3600
//! poll_timeout_secs = 30
//! attempt_id_policy = "increment"   # or "copy_previous"
//! flush_interval_secs = 60
//!
//! [remote]
//! backend = "sheets"                # or "memory"
//! spreadsheet_id = "1AbC..."
//! timeout_secs = 10
//! max_attempts = 3
//! backoff_ms = 500
//!
//! [messages.answer]
//! correct = "Bravo! Score: {score}"
//! ```

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use enigma_bot::{AttemptIdPolicy, EngineConfig, Messages};
use enigma_store::RetryPolicy;
use serde::Deserialize;
use tracing::info;

use crate::helpers::env_non_empty;

/// Environment variable overriding `[remote] spreadsheet_id`.
pub const SPREADSHEET_ID_ENV: &str = "SPREADSHEET_ID";

/// Top-level configuration file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub bot: BotSection,
    pub remote: RemoteSection,
    /// Reply template overrides, see [`Messages::from_toml`].
    pub messages: toml::Table,
}

/// `[bot]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BotSection {
    pub maintainer_chat_id: Option<i64>,
    pub admin_ids: Vec<i64>,
    pub session_ttl_secs: u64,
    pub max_sessions: u64,
    pub poll_timeout_secs: u64,
    pub attempt_id_policy: AttemptIdPolicy,
    /// How often dirty tables are pushed again; 0 disables the flusher.
    pub flush_interval_secs: u64,
}

impl Default for BotSection {
    fn default() -> Self {
        Self {
            maintainer_chat_id: None,
            admin_ids: Vec::new(),
            session_ttl_secs: 3600,
            max_sessions: 10_000,
            poll_timeout_secs: 30,
            attempt_id_policy: AttemptIdPolicy::default(),
            flush_interval_secs: 60,
        }
    }
}

/// Which [`RemoteStore`](enigma_store::RemoteStore) backs the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backend {
    #[default]
    Sheets,
    /// Volatile in-process tables, for local trials.
    Memory,
}

/// `[remote]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RemoteSection {
    pub backend: Backend,
    pub spreadsheet_id: Option<String>,
    pub timeout_secs: u64,
    pub max_attempts: u32,
    pub backoff_ms: u64,
}

impl Default for RemoteSection {
    fn default() -> Self {
        Self {
            backend: Backend::default(),
            spreadsheet_id: None,
            timeout_secs: 10,
            max_attempts: 3,
            backoff_ms: 500,
        }
    }
}

impl AppConfig {
    /// Load from `path`, using defaults when the file does not exist.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            info!(path = %path.display(), "no configuration file, using defaults");
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("failed to parse {}", path.display()))?;
        info!(path = %path.display(), "configuration loaded");
        Ok(config)
    }

    /// Spreadsheet id, with the environment taking precedence over the file.
    pub fn spreadsheet_id(&self) -> Option<String> {
        env_non_empty(SPREADSHEET_ID_ENV).or_else(|| {
            self.remote
                .spreadsheet_id
                .clone()
                .filter(|id| !id.is_empty())
        })
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            timeout: Duration::from_secs(self.remote.timeout_secs.max(1)),
            max_attempts: self.remote.max_attempts.max(1),
            backoff: Duration::from_millis(self.remote.backoff_ms),
        }
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            maintainer_chat_id: self.bot.maintainer_chat_id,
            admin_ids: self.bot.admin_ids.clone(),
            session_ttl: Duration::from_secs(self.bot.session_ttl_secs.max(1)),
            max_sessions: self.bot.max_sessions.max(1),
            attempt_ids: self.bot.attempt_id_policy,
        }
    }

    pub fn messages(&self) -> Messages {
        Messages::from_toml(&self.messages)
    }

    /// `None` when the periodic flush is disabled.
    pub fn flush_interval(&self) -> Option<Duration> {
        (self.bot.flush_interval_secs > 0).then(|| Duration::from_secs(self.bot.flush_interval_secs))
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use enigma_bot::messages::keys;

    use super::*;

    fn write_config(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig::load(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.remote.backend, Backend::Sheets);
        assert_eq!(config.bot.poll_timeout_secs, 30);
        assert_eq!(config.retry_policy(), RetryPolicy::default());
        assert_eq!(config.flush_interval(), Some(Duration::from_secs(60)));
    }

    #[test]
    fn sections_are_read() {
        let file = write_config(
            r#"
            [bot]
            maintainer_chat_id = -100
            admin_ids = [1, 2]
            attempt_id_policy = "copy_previous"
            flush_interval_secs = 0

            [remote]
            backend = "memory"
            timeout_secs = 2
            max_attempts = 5
            backoff_ms = 10
            "#,
        );
        let config = AppConfig::load(file.path()).unwrap();

        let engine = config.engine_config();
        assert_eq!(engine.maintainer_chat_id, Some(-100));
        assert_eq!(engine.admin_ids, vec![1, 2]);
        assert_eq!(engine.attempt_ids, AttemptIdPolicy::CopyPrevious);
        assert_eq!(engine.session_ttl, Duration::from_secs(3600));

        assert_eq!(config.remote.backend, Backend::Memory);
        let policy = config.retry_policy();
        assert_eq!(policy.timeout, Duration::from_secs(2));
        assert_eq!(policy.max_attempts, 5);
        assert_eq!(policy.backoff, Duration::from_millis(10));
        assert_eq!(config.flush_interval(), None);
    }

    #[test]
    fn shipped_config_parses() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("../../config/default.toml");
        let config = AppConfig::load(&path).unwrap();
        assert_eq!(config.remote.backend, Backend::Sheets);
        assert_eq!(config.retry_policy(), RetryPolicy::default());
        assert_eq!(config.flush_interval(), Some(Duration::from_secs(60)));
        assert!(
            config
                .messages()
                .get(keys::WELCOME_NEW)
                .contains("You are now registered")
        );
    }

    #[test]
    fn message_overrides_apply() {
        let file = write_config(
            r#"
            [messages.answer]
            correct = "Bravo! {score}"
            "#,
        );
        let messages = AppConfig::load(file.path()).unwrap().messages();
        assert_eq!(
            messages.get_with(keys::CORRECT, &[("score", "3")]),
            "Bravo! 3"
        );
        assert!(messages.get(keys::WRONG).starts_with("Sorry"));
    }

    #[test]
    fn bad_values_are_reported() {
        let file = write_config("[remote]\nbackend = \"ftp\"\n");
        let err = AppConfig::load(file.path()).unwrap_err();
        assert!(format!("{err:#}").contains("failed to parse"));
    }
}
