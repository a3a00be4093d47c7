use crate::{EngineError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

pub const DATA_ENV_VAR: &str = "DATA";
pub const CONFIG_ENV_VAR: &str = "CONFIG";
pub const PUID_ENV_VAR: &str = "PUID";
pub const PGID_ENV_VAR: &str = "PGID";

const DATABASE_FILE_NAME: &str = "podgrab.db";
const SETTINGS_FILE_NAME: &str = "settings.json";
const BACKUPS_FOLDER: &str = "backups";
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(25);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OwnerIds {
    pub uid: u32,
    pub gid: u32,
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Base for per-podcast asset folders.
    pub data_root: PathBuf,
    /// Base for the database file, settings and backups.
    pub config_root: PathBuf,
    pub owner: Option<OwnerIds>,
    /// Overrides the persisted user agent when set.
    pub user_agent: Option<String>,
    /// Upper bound on a whole request, body included.
    pub request_timeout: Duration,
}

impl EngineConfig {
    pub fn new(data_root: PathBuf, config_root: PathBuf) -> Self {
        Self {
            data_root,
            config_root,
            owner: None,
            user_agent: None,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &str| -> Result<PathBuf> {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .map(PathBuf::from)
                .ok_or_else(|| EngineError::Config(format!("{key} is not set")))
        };

        let data_root = required(DATA_ENV_VAR)?;
        let config_root = required(CONFIG_ENV_VAR)?;

        let numeric = |key: &str| lookup(key).and_then(|v| v.trim().parse::<u32>().ok());
        let owner = match (numeric(PUID_ENV_VAR), numeric(PGID_ENV_VAR)) {
            (Some(uid), Some(gid)) => Some(OwnerIds { uid, gid }),
            _ => None,
        };

        Ok(Self {
            data_root,
            config_root,
            owner,
            user_agent: None,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        })
    }

    pub fn with_owner(mut self, owner: Option<OwnerIds>) -> Self {
        self.owner = owner;
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn database_path(&self) -> PathBuf {
        self.config_root.join(DATABASE_FILE_NAME)
    }

    pub fn settings_path(&self) -> PathBuf {
        self.config_root.join(SETTINGS_FILE_NAME)
    }

    pub fn backups_dir(&self) -> PathBuf {
        self.config_root.join(BACKUPS_FOLDER)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub user_agent: Option<String>,
}

pub fn load_settings(config: &EngineConfig) -> Result<Settings> {
    let path = config.settings_path();
    if !path.exists() {
        return Ok(Settings::default());
    }
    let bytes = std::fs::read(&path).map_err(|e| EngineError::io(&path, e))?;
    let parsed: Settings = serde_json::from_slice(&bytes).map_err(|e| {
        EngineError::Config(format!(
            "failed to parse settings at {}: {e}",
            path.to_string_lossy()
        ))
    })?;
    Ok(parsed)
}

pub fn save_settings(config: &EngineConfig, settings: &Settings) -> Result<()> {
    let path = config.settings_path();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| EngineError::io(parent, e))?;
    }
    let json = serde_json::to_string_pretty(settings)?;
    std::fs::write(&path, format!("{json}\n")).map_err(|e| EngineError::io(&path, e))?;
    Ok(())
}

/// User agent for the next request: explicit config first, then persisted settings.
pub fn effective_user_agent(config: &EngineConfig) -> Option<String> {
    let explicit = config
        .user_agent
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty());
    if let Some(value) = explicit {
        return Some(value.to_string());
    }

    match load_settings(config) {
        Ok(settings) => settings
            .user_agent
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty()),
        Err(err) => {
            tracing::warn!("ignoring unreadable settings: {err}");
            None
        }
    }
}
