use std::{
    fs, io,
    path::{Path, PathBuf},
    time::Duration,
};

use serde::{Deserialize, Serialize};

use crate::{
    scheduler::Scheduler,
    store::{JsonFileStore, RecordPolicy},
};

const APP_NAME: &str = "roosty_reminder";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("couldn't find a home directory for {APP_NAME}")]
    NoProjectDirs,

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("couldn't parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("couldn't serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

pub type Result<T> = core::result::Result<T, ConfigError>;

/// Application settings, stored as `config.toml` in the platform config
/// directory. Missing keys take their defaults.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct Config {
    /// strftime format used when showing times
    pub time_format: String,
    /// where the triggers live, defaults to `alarms.json` in the data dir
    pub alarms_path: Option<PathBuf>,
    /// played for triggers without their own sound
    pub default_sound: Option<PathBuf>,
    /// 0.0 to 1.0
    pub volume: f32,
    pub show_notifications: bool,
    pub stop_timeout_secs: u64,
    pub invalid_records: RecordPolicy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            time_format: "%H:%M".to_string(),
            alarms_path: None,
            default_sound: None,
            volume: 0.5,
            show_notifications: true,
            stop_timeout_secs: 2,
            invalid_records: RecordPolicy::Skip,
        }
    }
}

impl Config {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load(path: &Path) -> Result<Self> {
        let config = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(toml::from_str(&config)?)
    }

    /// Like [`Self::load`], but a missing file gives the defaults.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        match Self::load(path) {
            Err(ConfigError::Io { source, .. }) if source.kind() == io::ErrorKind::NotFound => {
                Ok(Self::default())
            }
            config => config,
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let config = toml::to_string(self)?;
        let io_err = |source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        };
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).map_err(io_err)?;
        }
        fs::write(path, config).map_err(io_err)
    }

    fn project_dirs() -> Result<directories::ProjectDirs> {
        directories::ProjectDirs::from("", "", APP_NAME).ok_or(ConfigError::NoProjectDirs)
    }

    pub fn config_path() -> Result<PathBuf> {
        let mut path = Self::project_dirs()?.config_dir().to_path_buf();
        path.push("config.toml");
        Ok(path)
    }

    pub fn data_dir() -> Result<PathBuf> {
        Ok(Self::project_dirs()?.data_dir().to_path_buf())
    }

    pub fn alarms_path(&self) -> Result<PathBuf> {
        match &self.alarms_path {
            Some(path) => Ok(path.clone()),
            None => Ok(Self::data_dir()?.join("alarms.json")),
        }
    }

    /// The configured volume, clamped to 0.0..=1.0.
    #[must_use]
    pub fn volume(&self) -> f32 {
        if self.volume.is_nan() {
            return Self::default().volume;
        }
        self.volume.clamp(0.0, 1.0)
    }

    #[must_use]
    pub const fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.stop_timeout_secs)
    }

    pub fn store(&self) -> Result<JsonFileStore> {
        Ok(JsonFileStore::new(self.alarms_path()?).with_policy(self.invalid_records))
    }

    /// A stopped scheduler backed by the configured alarms file. Nothing is
    /// loaded yet.
    pub fn scheduler(&self) -> Result<Scheduler> {
        Ok(Scheduler::with_stop_timeout(self.store()?, self.stop_timeout()))
    }
}
