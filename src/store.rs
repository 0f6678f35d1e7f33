//! Persistence for the trigger collection.
//!
//! The on-disk form is a JSON array of trigger records:
//!
//! ```text
//! [
//!   { "id": "...", "time_str": "07:30", "repeat_daily": true,
//!     "enabled": true, "audio_file": null, "message": "" }
//! ]
//! ```
//!
//! Record order carries no meaning.

use std::{
    fmt, fs, io,
    path::{Path, PathBuf},
    sync::{Mutex, PoisonError},
};

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::trigger::{Trigger, TriggerId};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("record {index} is invalid: {reason}")]
    InvalidRecord { index: usize, reason: String },
}

pub type Result<T> = core::result::Result<T, StoreError>;

/// What to do with a record that can't be decoded (for example one without a
/// `time_str`).
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordPolicy {
    /// drop the record and keep loading
    #[default]
    Skip,
    /// fail the whole load
    Reject,
}

/// Non-fatal problems noticed while loading.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadWarning {
    /// the store exists but isn't a list of records; loaded as empty
    Corrupt { reason: String },
    SkippedRecord { index: usize, reason: String },
    /// the record loaded, but its time can't be parsed and will read as midnight
    InvalidTime { id: TriggerId, time_str: String },
    /// the store couldn't be read at all; nothing was replaced
    Unreadable { reason: String },
}

impl fmt::Display for LoadWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Corrupt { reason } => write!(f, "store is corrupt, starting empty: {reason}"),
            Self::SkippedRecord { index, reason } => {
                write!(f, "skipped record {index}: {reason}")
            }
            Self::InvalidTime { id, time_str } => {
                write!(f, "trigger {id} has invalid time {time_str:?}, using 00:00")
            }
            Self::Unreadable { reason } => write!(f, "store could not be read: {reason}"),
        }
    }
}

/// The result of a successful load.
#[derive(Debug, Default)]
pub struct Loaded {
    pub triggers: Vec<Trigger>,
    pub warnings: Vec<LoadWarning>,
}

/// Durable storage for the trigger collection.
pub trait Store: Send + Sync {
    fn save(&self, triggers: &[Trigger]) -> Result<()>;

    /// Loads every stored trigger. A missing store is an empty collection.
    fn load(&self) -> Result<Loaded>;
}

impl<S: Store + ?Sized> Store for std::sync::Arc<S> {
    fn save(&self, triggers: &[Trigger]) -> Result<()> {
        (**self).save(triggers)
    }

    fn load(&self) -> Result<Loaded> {
        (**self).load()
    }
}

/// Stores triggers as pretty printed JSON in a single file.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
    policy: RecordPolicy,
}

impl JsonFileStore {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            policy: RecordPolicy::default(),
        }
    }

    #[must_use]
    pub const fn with_policy(mut self, policy: RecordPolicy) -> Self {
        self.policy = policy;
        self
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, source: io::Error) -> StoreError {
        StoreError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

impl Store for JsonFileStore {
    fn save(&self, triggers: &[Trigger]) -> Result<()> {
        let json = serde_json::to_string_pretty(triggers)?;
        if let Some(dir) = self.path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            fs::create_dir_all(dir).map_err(|e| self.io_error(e))?;
        }
        fs::write(&self.path, json).map_err(|e| self.io_error(e))?;
        debug!("saved {} triggers to {}", triggers.len(), self.path.display());
        Ok(())
    }

    fn load(&self) -> Result<Loaded> {
        let json = match fs::read_to_string(&self.path) {
            Ok(json) => json,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Loaded::default()),
            // not UTF-8, so it can't be JSON either
            Err(e) if e.kind() == io::ErrorKind::InvalidData => {
                warn!("trigger store is corrupt, loading nothing: {e}");
                return Ok(Loaded {
                    triggers: vec![],
                    warnings: vec![LoadWarning::Corrupt {
                        reason: e.to_string(),
                    }],
                });
            }
            Err(e) => return Err(self.io_error(e)),
        };
        decode_records(&json, self.policy)
    }
}

/// Decodes a JSON array of records one at a time so a single bad record
/// doesn't take the rest down with it.
pub fn decode_records(json: &str, policy: RecordPolicy) -> Result<Loaded> {
    let records: Vec<serde_json::Value> = match serde_json::from_str(json) {
        Ok(records) => records,
        Err(e) => {
            warn!("trigger store is corrupt, loading nothing: {e}");
            return Ok(Loaded {
                triggers: vec![],
                warnings: vec![LoadWarning::Corrupt {
                    reason: e.to_string(),
                }],
            });
        }
    };

    let mut loaded = Loaded::default();
    for (index, record) in records.into_iter().enumerate() {
        match serde_json::from_value::<Trigger>(record) {
            Ok(trigger) => loaded.triggers.push(trigger),
            Err(e) => match policy {
                RecordPolicy::Skip => {
                    warn!("skipping trigger record {index}: {e}");
                    loaded.warnings.push(LoadWarning::SkippedRecord {
                        index,
                        reason: e.to_string(),
                    });
                }
                RecordPolicy::Reject => {
                    return Err(StoreError::InvalidRecord {
                        index,
                        reason: e.to_string(),
                    })
                }
            },
        }
    }
    Ok(loaded)
}

/// Keeps the serialized collection in memory. Useful for tests and for
/// running without touching disk.
#[derive(Debug, Default)]
pub struct MemoryStore {
    json: Mutex<Option<String>>,
    policy: RecordPolicy,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts out holding `json`, as if a previous run had written it.
    #[must_use]
    pub fn with_contents(json: impl Into<String>) -> Self {
        Self {
            json: Mutex::new(Some(json.into())),
            policy: RecordPolicy::default(),
        }
    }

    #[must_use]
    pub const fn with_policy(mut self, policy: RecordPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// The last saved contents, if anything has been saved.
    #[must_use]
    pub fn contents(&self) -> Option<String> {
        self.json
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Store for MemoryStore {
    fn save(&self, triggers: &[Trigger]) -> Result<()> {
        let json = serde_json::to_string(triggers)?;
        *self.json.lock().unwrap_or_else(PoisonError::into_inner) = Some(json);
        Ok(())
    }

    fn load(&self) -> Result<Loaded> {
        self.contents()
            .map_or_else(|| Ok(Loaded::default()), |json| decode_records(&json, self.policy))
    }
}
