use std::error::Error;
use std::fmt;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::assets::Manifest;

const DEFAULT_CONFIG_TOML: &str = include_str!("default_config.toml");

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Config {
    pub assets: AssetsConfig,
    pub sync: SyncConfig,
    pub notification: NotificationConfig,
    pub share: ShareConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AssetsConfig {
    pub generation: String,
    pub origin: String,
    pub fetch_timeout_ms: u64,
    pub manifest: Manifest,
}

impl AssetsConfig {
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerOn {
    /// Every committed mutation requests a deferred flush.
    All,
    /// Only inserts request a deferred flush.
    Insert,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncConfig {
    pub tag: String,
    pub background: bool,
    pub flush_delay_ms: u64,
    pub lease_secs: u64,
    pub trigger_on: TriggerOn,
}

impl SyncConfig {
    pub fn flush_delay(&self) -> Duration {
        Duration::from_millis(self.flush_delay_ms)
    }

    pub fn lease(&self) -> Duration {
        Duration::from_secs(self.lease_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NotificationConfig {
    pub title: String,
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ShareConfig {
    pub base_url: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfigFile {
    #[serde(default)]
    assets: RawAssets,
    #[serde(default)]
    sync: RawSync,
    #[serde(default)]
    notification: RawNotification,
    #[serde(default)]
    share: RawShare,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawAssets {
    generation: Option<String>,
    origin: Option<String>,
    fetch_timeout_ms: Option<u64>,
    manifest: Option<Vec<String>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawSync {
    tag: Option<String>,
    background: Option<bool>,
    flush_delay_ms: Option<u64>,
    lease_secs: Option<u64>,
    trigger_on: Option<TriggerOn>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawNotification {
    title: Option<String>,
    body: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawShare {
    base_url: Option<String>,
}

#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Toml(toml::de::Error),
    Invalid(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Io(err) => write!(f, "config I/O error: {}", err),
            ConfigError::Toml(err) => write!(f, "invalid config TOML: {}", err),
            ConfigError::Invalid(message) => write!(f, "invalid config: {}", message),
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ConfigError::Io(err) => Some(err),
            ConfigError::Toml(err) => Some(err),
            ConfigError::Invalid(_) => None,
        }
    }
}

impl From<std::io::Error> for ConfigError {
    fn from(value: std::io::Error) -> Self {
        ConfigError::Io(value)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(value: toml::de::Error) -> Self {
        ConfigError::Toml(value)
    }
}

impl Config {
    pub fn defaults() -> Result<Self, ConfigError> {
        Self::from_toml(DEFAULT_CONFIG_TOML)
    }

    /// Loads `path` over the built-in defaults. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(raw) => {
                tracing::debug!(path = %path.display(), "loading config file");
                let mut config = Self::defaults()?;
                config.overlay(toml::from_str(&raw)?)?;
                Ok(config)
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Self::defaults(),
            Err(err) => Err(ConfigError::Io(err)),
        }
    }

    pub(crate) fn from_toml(raw: &str) -> Result<Self, ConfigError> {
        let file: RawConfigFile = toml::from_str(raw)?;
        let mut config = Config {
            assets: AssetsConfig {
                generation: String::new(),
                origin: String::new(),
                fetch_timeout_ms: 0,
                manifest: Manifest::default(),
            },
            sync: SyncConfig {
                tag: String::new(),
                background: true,
                flush_delay_ms: 0,
                lease_secs: 0,
                trigger_on: TriggerOn::All,
            },
            notification: NotificationConfig {
                title: String::new(),
                body: String::new(),
            },
            share: ShareConfig {
                base_url: String::new(),
            },
        };
        config.overlay(file)?;
        Ok(config)
    }

    fn overlay(&mut self, file: RawConfigFile) -> Result<(), ConfigError> {
        let RawConfigFile {
            assets,
            sync,
            notification,
            share,
        } = file;

        if let Some(generation) = assets.generation {
            self.assets.generation = generation.trim().to_string();
        }
        if let Some(origin) = assets.origin {
            self.assets.origin = origin.trim().to_string();
        }
        if let Some(timeout) = assets.fetch_timeout_ms {
            self.assets.fetch_timeout_ms = timeout;
        }
        if let Some(paths) = assets.manifest {
            self.assets.manifest =
                Manifest::new(paths).map_err(|err| ConfigError::Invalid(err.to_string()))?;
        }

        if let Some(tag) = sync.tag {
            self.sync.tag = tag.trim().to_string();
        }
        if let Some(background) = sync.background {
            self.sync.background = background;
        }
        if let Some(delay) = sync.flush_delay_ms {
            self.sync.flush_delay_ms = delay;
        }
        if let Some(lease) = sync.lease_secs {
            self.sync.lease_secs = lease;
        }
        if let Some(trigger_on) = sync.trigger_on {
            self.sync.trigger_on = trigger_on;
        }

        if let Some(title) = notification.title {
            self.notification.title = title;
        }
        if let Some(body) = notification.body {
            self.notification.body = body;
        }
        if let Some(base_url) = share.base_url {
            self.share.base_url = base_url.trim().to_string();
        }

        self.validate()
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.assets.generation.is_empty() {
            return Err(ConfigError::Invalid(
                "assets.generation must not be empty".to_string(),
            ));
        }
        if self.assets.origin.is_empty() {
            return Err(ConfigError::Invalid(
                "assets.origin must not be empty".to_string(),
            ));
        }
        if self.assets.fetch_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "assets.fetch_timeout_ms must be greater than zero".to_string(),
            ));
        }
        if self.assets.manifest.is_empty() {
            return Err(ConfigError::Invalid(
                "assets.manifest must list at least one resource".to_string(),
            ));
        }
        if self.sync.tag.is_empty() {
            return Err(ConfigError::Invalid("sync.tag must not be empty".to_string()));
        }
        if self.sync.lease_secs == 0 {
            return Err(ConfigError::Invalid(
                "sync.lease_secs must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}
