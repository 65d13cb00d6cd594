use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::dispatcher::DispatcherConfig;

pub const STDERR_SERVICE_VAR: &str = "STDERR_SERVICE";
pub const WEBHOOK_VAR: &str = "MS_TEAMS_WEBHOOK";
pub const CARD_SUBJECT_VAR: &str = "MS_TEAMS_CARD_SUBJECT";
pub const UPDATE_AWARE_VAR: &str = "SENTINEL_UPDATE_AWARE";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Env file error: {0}")]
    EnvFile(#[from] dotenv::Error),
    #[error("{var} must be a boolean, got {value:?}")]
    InvalidBool { var: &'static str, value: String },
}

/// Environment as seen by the configuration: the process environment with
/// the env files from the command line layered on top, in order.
#[derive(Debug, Default, Clone)]
pub struct EnvVars {
    inner: HashMap<String, String>,
}

impl EnvVars {
    pub fn from_process() -> Self {
        let inner = std::env::vars_os()
            .filter_map(|(k, v)| Some((k.into_string().ok()?, v.into_string().ok()?)))
            .collect();
        Self { inner }
    }

    pub fn load_files(&mut self, files: &[PathBuf]) -> Result<(), ConfigError> {
        for file in files {
            log::debug!("Loading env file {file:?}");
            for entry in dotenv::from_path_iter(file)? {
                let (key, value) = entry?;
                self.inner.insert(key, value);
            }
        }
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.inner.get(key).map(String::as_str)
    }
}

impl FromIterator<(String, String)> for EnvVars {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self {
            inner: iter.into_iter().collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize)]
#[serde(default)]
pub struct SentinelConfig {
    /// Swarm service whose containers get their stderr forwarded.
    pub stderr_service: String,
    /// Teams incoming webhook URL.
    pub webhook: Option<String>,
    /// Card summary, shown in notifications.
    pub card_subject: String,
    /// Ignore container exits caused by rolling updates.
    pub update_aware: bool,
}

impl Default for SentinelConfig {
    fn default() -> Self {
        Self {
            stderr_service: String::new(),
            webhook: None,
            card_subject: String::new(),
            update_aware: true,
        }
    }
}

fn parse_bool(var: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidBool {
            var,
            value: value.to_string(),
        }),
    }
}

impl SentinelConfig {
    fn try_init_from_string(val: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(val)?)
    }

    /// The config file is optional, a missing one means defaults.
    pub fn try_init(path: &Path, env: &EnvVars) -> Result<Self, ConfigError> {
        let config = match std::fs::read_to_string(path) {
            Ok(contents) => Self::try_init_from_string(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::debug!("No config file at {path:?}, using defaults");
                Self::default()
            }
            Err(e) => return Err(e.into()),
        };
        config.with_env(env)
    }

    /// Environment variables win over the config file.
    fn with_env(mut self, env: &EnvVars) -> Result<Self, ConfigError> {
        if let Some(service) = env.get(STDERR_SERVICE_VAR) {
            self.stderr_service = service.to_string();
        }
        if let Some(webhook) = env.get(WEBHOOK_VAR) {
            self.webhook = Some(webhook.to_string());
        }
        if let Some(subject) = env.get(CARD_SUBJECT_VAR) {
            self.card_subject = subject.to_string();
        }
        if let Some(value) = env.get(UPDATE_AWARE_VAR) {
            self.update_aware = parse_bool(UPDATE_AWARE_VAR, value)?;
        }
        // An empty webhook is as good as none.
        self.webhook = self.webhook.filter(|w| !w.trim().is_empty());
        Ok(self)
    }

    pub fn dispatcher_config(&self) -> DispatcherConfig {
        DispatcherConfig {
            stderr_service: self.stderr_service.clone(),
            update_aware: self.update_aware,
        }
    }
}
