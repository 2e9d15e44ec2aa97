//! Configuration loading and validation.

use crate::error::{ConfigError, Result};
use anyhow::Context as _;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

/// Default backend base URL (the Flask service's default bind address).
const DEFAULT_BACKEND_URL: &str = "http://127.0.0.1:5000";

/// Chagbot configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Data directory path.
    pub data_dir: PathBuf,

    /// Platform credentials.
    pub discord: DiscordConfig,

    /// Text-generation backend settings.
    pub backend: BackendConfig,

    /// Media directory and upload cache locations.
    pub media: MediaConfig,

    /// Login retry behavior.
    pub retry: RetryConfig,

    /// Message routing behavior.
    pub dispatch: DispatchConfig,
}

/// Discord credentials.
#[derive(Clone)]
pub struct DiscordConfig {
    pub token: String,
}

impl std::fmt::Debug for DiscordConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiscordConfig")
            .field("token", &"[redacted]")
            .finish()
    }
}

/// Text-generation backend configuration.
#[derive(Debug, Clone)]
pub struct BackendConfig {
    /// Base URL; `/generate` and `/learn` are appended.
    pub base_url: String,

    /// Forward ordinary channel messages to `/learn`.
    pub learn: bool,
}

/// Media directory and upload cache paths.
#[derive(Debug, Clone)]
pub struct MediaConfig {
    pub dir: PathBuf,
    pub cache_path: PathBuf,
}

/// Login retry configuration.
#[derive(Debug, Clone, Copy)]
pub struct RetryConfig {
    /// Delay before the first retry, in seconds.
    pub delay_secs: u64,

    /// Upper bound on the delay between retries, in seconds.
    pub max_delay_secs: u64,

    /// Multiplier applied to the delay after each failed attempt.
    pub backoff_factor: f64,

    /// Log a warning once every this many failed attempts.
    pub warn_every: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            delay_secs: 5,
            max_delay_secs: 5,
            backoff_factor: 1.0,
            warn_every: 120,
        }
    }
}

/// Message routing configuration.
#[derive(Debug, Clone, Copy, Default)]
pub struct DispatchConfig {
    pub token_policy: TokenPolicy,
}

/// What happens when one message carries both a media and a chat token.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenPolicy {
    /// Only the media path runs.
    #[default]
    Exclusive,
    /// The media path runs, then the chat path.
    Independent,
}

impl FromStr for TokenPolicy {
    type Err = ConfigError;

    fn from_str(value: &str) -> std::result::Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "exclusive" => Ok(Self::Exclusive),
            "independent" => Ok(Self::Independent),
            other => Err(ConfigError::Invalid(format!(
                "unknown token policy '{other}', expected 'exclusive' or 'independent'"
            ))),
        }
    }
}

/// On-disk TOML layout. Every key is optional; environment variables win.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FileConfig {
    data_dir: Option<PathBuf>,
    discord: FileDiscordConfig,
    backend: FileBackendConfig,
    media: FileMediaConfig,
    retry: FileRetryConfig,
    dispatch: FileDispatchConfig,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FileDiscordConfig {
    token: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FileBackendConfig {
    base_url: Option<String>,
    learn: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FileMediaConfig {
    dir: Option<PathBuf>,
    cache_path: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FileRetryConfig {
    delay_secs: Option<u64>,
    max_delay_secs: Option<u64>,
    backoff_factor: Option<f64>,
    warn_every: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FileDispatchConfig {
    token_policy: Option<TokenPolicy>,
}

impl Config {
    /// Load configuration from the environment (and `.env`, if present).
    pub fn load() -> Result<Self> {
        let _ = dotenvy::dotenv();
        Self::resolve(FileConfig::default(), &|key| std::env::var(key).ok())
    }

    /// Load from a TOML file, with environment variables taking precedence.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let _ = dotenvy::dotenv();
        let raw = std::fs::read_to_string(path).map_err(|error| ConfigError::Load {
            path: path.display().to_string(),
            source: Arc::new(error),
        })?;
        let file = parse_file(&raw, path)?;
        Self::resolve(file, &|key| std::env::var(key).ok())
    }

    /// Merge file values with an environment lookup and validate the result.
    fn resolve(file: FileConfig, env: &dyn Fn(&str) -> Option<String>) -> Result<Self> {
        let data_dir = env("CHAGBOT_DATA_DIR")
            .map(PathBuf::from)
            .or(file.data_dir)
            .unwrap_or_else(|| {
                dirs::data_dir()
                    .map(|d| d.join("chagbot"))
                    .unwrap_or_else(|| PathBuf::from("./data"))
            });

        let token = env("DISCORD_TOKEN")
            .or(file.discord.token)
            .filter(|token| !token.trim().is_empty())
            .ok_or_else(|| ConfigError::MissingKey("DISCORD_TOKEN".into()))?;

        let backend = BackendConfig {
            base_url: env("SERVER_URL")
                .or(file.backend.base_url)
                .unwrap_or_else(|| DEFAULT_BACKEND_URL.into()),
            learn: parse_env(env, "CHAGBOT_LEARN")?
                .or(file.backend.learn)
                .unwrap_or(false),
        };

        let media = MediaConfig {
            dir: env("CHAGBOT_MEDIA_DIR")
                .map(PathBuf::from)
                .or(file.media.dir)
                .unwrap_or_else(|| PathBuf::from("./media")),
            cache_path: env("CHAGBOT_CACHE_PATH")
                .map(PathBuf::from)
                .or(file.media.cache_path)
                .unwrap_or_else(|| data_dir.join("upload_cache.json")),
        };

        let defaults = RetryConfig::default();
        let delay_secs = parse_env(env, "CHAGBOT_RETRY_DELAY_SECS")?
            .or(file.retry.delay_secs)
            .unwrap_or(defaults.delay_secs);
        let retry = RetryConfig {
            delay_secs,
            // A fixed delay unless a ceiling is configured.
            max_delay_secs: parse_env(env, "CHAGBOT_RETRY_MAX_DELAY_SECS")?
                .or(file.retry.max_delay_secs)
                .unwrap_or(delay_secs),
            backoff_factor: parse_env(env, "CHAGBOT_RETRY_BACKOFF")?
                .or(file.retry.backoff_factor)
                .unwrap_or(defaults.backoff_factor),
            warn_every: parse_env(env, "CHAGBOT_RETRY_WARN_EVERY")?
                .or(file.retry.warn_every)
                .unwrap_or(defaults.warn_every),
        };
        retry.validate()?;

        let dispatch = DispatchConfig {
            token_policy: match env("CHAGBOT_TOKEN_POLICY") {
                Some(value) => value.parse()?,
                None => file.dispatch.token_policy.unwrap_or_default(),
            },
        };

        Ok(Self {
            data_dir,
            discord: DiscordConfig { token },
            backend,
            media,
            retry,
            dispatch,
        })
    }

    /// Create the data directory and the cache file's parent directory.
    pub fn ensure_dirs(&self) -> Result<()> {
        std::fs::create_dir_all(&self.data_dir).with_context(|| {
            format!("failed to create data directory: {}", self.data_dir.display())
        })?;
        if let Some(parent) = self.media.cache_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("failed to create cache directory: {}", parent.display())
            })?;
        }
        Ok(())
    }
}

impl RetryConfig {
    fn validate(&self) -> Result<()> {
        if !self.backoff_factor.is_finite() || self.backoff_factor < 1.0 {
            return Err(ConfigError::Invalid(format!(
                "retry backoff factor must be >= 1.0, got {}",
                self.backoff_factor
            ))
            .into());
        }
        if self.warn_every == 0 {
            return Err(ConfigError::Invalid("retry warn_every must be at least 1".into()).into());
        }
        if self.max_delay_secs < self.delay_secs {
            return Err(ConfigError::Invalid(format!(
                "retry max delay ({}s) is shorter than the initial delay ({}s)",
                self.max_delay_secs, self.delay_secs
            ))
            .into());
        }
        Ok(())
    }
}

fn parse_file(raw: &str, path: &Path) -> Result<FileConfig> {
    toml::from_str(raw).map_err(|error| {
        ConfigError::Parse {
            path: path.display().to_string(),
            message: error.to_string(),
        }
        .into()
    })
}

fn parse_env<T: FromStr>(env: &dyn Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>> {
    match env(key) {
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Invalid(format!("{key} has invalid value '{value}'")).into()),
        None => Ok(None),
    }
}
