//! # Persistence
//!
//! The operation state and anomaly counters are saved on every operation change and
//! periodically, so that they survive a restart. Only telemetry relevant data is restored, the
//! mower always starts in Idle.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::{
    cell::RefCell,
    fs,
    io::ErrorKind,
    path::{Path, PathBuf},
    rc::Rc,
};

use serde::{Deserialize, Serialize};

use comms_if::tm::AnomalyCounters;
use util::session::SessionSaver;

use crate::auto::op_mgr::{ErrorCause, OpKind};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Path of the state file, relative to the session root.
pub const STATE_FILE: &str = "state/op_state.json";

// ------------------------------------------------------------------------------------------------
// TRAITS
// ------------------------------------------------------------------------------------------------

/// Somewhere to keep [`PersistedState`] between runs.
pub trait Storage {
    fn save(&mut self, state: &PersistedState);

    /// Load the last saved state, `None` if nothing has been saved.
    fn load(&self) -> Result<Option<PersistedState>, PersistError>;
}

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedState {
    pub op: OpKind,
    pub goal: OpKind,
    pub error_cause: Option<ErrorCause>,
    pub counters: AnomalyCounters,
    pub gps_jumps: u32,
    pub saved_at_s: f64,
}

/// Saves through the session's background save thread.
///
/// Loading reads a state file from a previous session if one was given, otherwise from the
/// current session.
pub struct SessionStorage {
    saver: SessionSaver,
    restore_from: Option<PathBuf>,
}

/// Keeps the saved states in memory, clones share the same storage.
#[derive(Debug, Clone, Default)]
pub struct MemStorage {
    saved: Rc<RefCell<Vec<PersistedState>>>,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum PersistError {
    #[error("Cannot read the state file {0:?}: {1}")]
    ReadError(PathBuf, std::io::Error),

    #[error("Cannot parse the state file {0:?}: {1}")]
    ParseError(PathBuf, serde_json::Error),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl SessionStorage {
    pub fn new(saver: SessionSaver, restore_from: Option<PathBuf>) -> Self {
        Self {
            saver,
            restore_from,
        }
    }

    fn state_path(&self) -> PathBuf {
        match self.restore_from {
            Some(ref p) => p.clone(),
            None => self.saver.session_root().join(STATE_FILE),
        }
    }
}

impl Storage for SessionStorage {
    fn save(&mut self, state: &PersistedState) {
        self.saver.save(STATE_FILE, state.clone());
    }

    fn load(&self) -> Result<Option<PersistedState>, PersistError> {
        read_state(&self.state_path())
    }
}

impl MemStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// All states saved so far, oldest first.
    pub fn saved(&self) -> Vec<PersistedState> {
        self.saved.borrow().clone()
    }
}

impl Storage for MemStorage {
    fn save(&mut self, state: &PersistedState) {
        self.saved.borrow_mut().push(state.clone());
    }

    fn load(&self) -> Result<Option<PersistedState>, PersistError> {
        Ok(self.saved.borrow().last().cloned())
    }
}

/// Read a state file, a missing file is not an error.
fn read_state(path: &Path) -> Result<Option<PersistedState>, PersistError> {
    let s = match fs::read_to_string(path) {
        Ok(s) => s,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(PersistError::ReadError(path.to_path_buf(), e)),
    };

    serde_json::from_str(&s)
        .map(Some)
        .map_err(|e| PersistError::ParseError(path.to_path_buf(), e))
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------
