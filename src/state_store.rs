//! Persistence of the ledger state and the daily history archive.

use chrono::NaiveDateTime;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

use crate::error::{MeterError, Result};
use crate::state::EngineState;

pub trait StateStore: Send {
    /// `Ok(None)` when nothing was stored yet
    fn load(&self) -> Result<Option<EngineState>>;
    fn save(&self, state: &EngineState) -> Result<()>;
}

/// Receives the full state right before a day rollover clears `Today`
pub trait DayArchive {
    fn archive_day(&self, state: &EngineState) -> Result<()>;
}

/// Pretty printed JSON files; the state file is replaced atomically.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
    history_dir: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>, history_dir: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            history_dir: history_dir.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Archive file for the day the state was last observed on
    pub fn history_file(&self, state: &EngineState) -> PathBuf {
        let day = state.observed_time.unwrap_or(state.start_time);
        self.history_dir
            .join(format!("{}_data.json", day.format("%m-%d")))
    }
}

fn write_json(path: &Path, state: &EngineState) -> Result<()> {
    let io_err = |source| MeterError::StoreIo {
        path: path.to_path_buf(),
        source,
    };
    let json = serde_json::to_vec_pretty(state).map_err(|source| MeterError::StoreFormat {
        path: path.to_path_buf(),
        source,
    })?;
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir).map_err(io_err)?;
    }
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, json).map_err(io_err)?;
    fs::rename(&tmp, path).map_err(io_err)
}

impl StateStore for JsonFileStore {
    fn load(&self) -> Result<Option<EngineState>> {
        let text = match fs::read(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(MeterError::StoreIo {
                    path: self.path.clone(),
                    source,
                })
            }
        };
        let state = serde_json::from_slice(&text).map_err(|source| MeterError::StoreFormat {
            path: self.path.clone(),
            source,
        })?;
        Ok(Some(state))
    }

    fn save(&self, state: &EngineState) -> Result<()> {
        write_json(&self.path, state)?;
        debug!(path = %self.path.display(), "State saved");
        Ok(())
    }
}

impl DayArchive for JsonFileStore {
    fn archive_day(&self, state: &EngineState) -> Result<()> {
        let file = self.history_file(state);
        write_json(&file, state)?;
        info!(path = %file.display(), "Day archived");
        Ok(())
    }
}

/// Loads the stored state or starts a fresh one.
///
/// A missing file starts from zero and is written immediately. An unreadable
/// file is left alone until the next save overwrites it.
pub fn restore_or_init(store: &dyn StateStore, now: NaiveDateTime) -> EngineState {
    match store.load() {
        Ok(Some(state)) => {
            info!(observed = ?state.observed_time, "State restored");
            state
        }
        Ok(None) => {
            warn!("No stored state found, started from zero");
            let state = EngineState::new(now);
            save_logged(store, &state);
            state
        }
        Err(e) => {
            error!(error = %e, "Cannot load stored state, started from zero");
            EngineState::new(now)
        }
    }
}

/// Saves the state, logging instead of failing
pub fn save_logged(store: &dyn StateStore, state: &EngineState) {
    if let Err(e) = store.save(state) {
        error!(error = %e, "Cannot save state");
    }
}
