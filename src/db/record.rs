use std::fmt;
use std::path::{Path, PathBuf};

use crate::config::DbConfig;

/// Files written by `gtags` into a database root.
pub const INDEX_FILES: [&str; 3] = ["GTAGS", "GRTAGS", "GPATH"];

/// Access mode a handle was granted under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    Shared,
    Exclusive,
}

impl LockMode {
    pub fn from_exclusive(exclusive: bool) -> Self {
        if exclusive {
            LockMode::Exclusive
        } else {
            LockMode::Shared
        }
    }
}

/// Lock state of a database record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LockState {
    #[default]
    Free,
    Shared(usize),
    Exclusive,
}

impl LockState {
    /// Applies a grant in `mode`, or returns `None` if it conflicts.
    pub fn grant(self, mode: LockMode) -> Option<LockState> {
        match (self, mode) {
            (LockState::Free, LockMode::Shared) => Some(LockState::Shared(1)),
            (LockState::Free, LockMode::Exclusive) => Some(LockState::Exclusive),
            (LockState::Shared(n), LockMode::Shared) => Some(LockState::Shared(n + 1)),
            _ => None,
        }
    }

    /// Reverses a grant in `mode`, or returns `None` if nothing is held in it.
    pub fn revoke(self, mode: LockMode) -> Option<LockState> {
        match (self, mode) {
            (LockState::Shared(1), LockMode::Shared) => Some(LockState::Free),
            (LockState::Shared(n), LockMode::Shared) if n > 1 => Some(LockState::Shared(n - 1)),
            (LockState::Exclusive, LockMode::Exclusive) => Some(LockState::Free),
            _ => None,
        }
    }

    pub fn is_free(&self) -> bool {
        matches!(self, LockState::Free)
    }
}

impl fmt::Display for LockState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockState::Free => write!(f, "free"),
            LockState::Shared(n) => write!(f, "shared({})", n),
            LockState::Exclusive => write!(f, "exclusive"),
        }
    }
}

/// One known database, identified by its canonical root path.
#[derive(Debug, Clone)]
pub struct DbRecord {
    pub root: PathBuf,
    pub lock: LockState,
    pub pending_delete: bool,
    pub config: DbConfig,
}

impl DbRecord {
    pub fn new(root: PathBuf, config: DbConfig) -> Self {
        Self {
            root,
            lock: LockState::Free,
            pending_delete: false,
            config,
        }
    }

    /// Whether `path` is this root or lies under it.
    pub fn covers(&self, path: &Path) -> bool {
        path.starts_with(&self.root)
    }
}

/// Whether `folder` holds a `GTAGS` file.
pub fn has_index(folder: &Path) -> bool {
    folder.join(INDEX_FILES[0]).is_file()
}
