//! Database Registry
//!
//! Hands out shared (query) and exclusive (build/update) handles to database
//! roots. Acquisition never blocks: a conflicting request is refused with
//! [`Acquired::Busy`] and the caller decides whether to retry or defer.

use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::config::{DbConfig, DB_CONFIG_FILENAME};
use crate::db::record::{has_index, DbRecord, LockMode, LockState, INDEX_FILES};
use crate::error::{EngineError, Result};

/// Outcome of an acquire request.
#[derive(Debug)]
pub enum Acquired {
    Granted(DbHandle),
    /// The owning database exists but is locked in a conflicting mode
    Busy(PathBuf),
    /// No database covers the path
    Unknown,
}

impl Acquired {
    pub fn granted(self) -> Option<DbHandle> {
        match self {
            Acquired::Granted(handle) => Some(handle),
            _ => None,
        }
    }

    pub fn into_result(self, path: &Path) -> Result<DbHandle> {
        match self {
            Acquired::Granted(handle) => Ok(handle),
            Acquired::Busy(root) => Err(EngineError::DatabaseBusy(root)),
            Acquired::Unknown => Err(EngineError::DatabaseNotFound(path.to_path_buf())),
        }
    }
}

#[derive(Debug)]
struct Ticket {
    root: PathBuf,
    mode: LockMode,
}

#[derive(Debug, Default)]
struct RegistryState {
    records: Vec<DbRecord>,
    tickets: HashMap<u64, Ticket>,
    next_ticket: u64,
}

impl RegistryState {
    /// Index of the longest registered root covering `path`.
    fn owner_of(&self, path: &Path) -> Option<usize> {
        self.records
            .iter()
            .enumerate()
            .filter(|(_, r)| r.covers(path))
            .max_by_key(|(_, r)| r.root.components().count())
            .map(|(i, _)| i)
    }

    fn exact(&self, root: &Path) -> Option<usize> {
        self.records.iter().position(|r| r.root == root)
    }

    fn grant(&mut self, idx: usize, mode: LockMode) -> std::result::Result<(u64, DbRecord), PathBuf> {
        let record = &mut self.records[idx];
        if record.pending_delete {
            return Err(record.root.clone());
        }
        let Some(next) = record.lock.grant(mode) else {
            return Err(record.root.clone());
        };
        record.lock = next;
        let snapshot = record.clone();

        let ticket = self.next_ticket;
        self.next_ticket += 1;
        self.tickets.insert(
            ticket,
            Ticket {
                root: snapshot.root.clone(),
                mode,
            },
        );
        Ok((ticket, snapshot))
    }
}

/// Registry of known database roots and their lock state.
///
/// Cheap to clone; all clones share one state behind a single mutex.
#[derive(Debug, Clone, Default)]
pub struct DbRegistry {
    state: Arc<Mutex<RegistryState>>,
    defaults: DbConfig,
}

impl DbRegistry {
    /// Creates an empty registry. `defaults` seeds records whose root carries
    /// no config file.
    pub fn new(defaults: DbConfig) -> Self {
        Self {
            state: Arc::new(Mutex::new(RegistryState::default())),
            defaults,
        }
    }

    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn config_for(&self, root: &Path) -> DbConfig {
        match DbConfig::load_from_folder(root) {
            Ok(Some(config)) => config,
            Ok(None) => self.defaults.clone(),
            Err(e) => {
                tracing::warn!("Ignoring unreadable config in {}: {}", root.display(), e);
                self.defaults.clone()
            }
        }
    }

    /// Registers a new database root and returns its canonical path.
    pub fn register(&self, path: &Path) -> Result<PathBuf> {
        let root = canonical(path);
        let config = self.config_for(&root);

        let mut state = self.lock();
        if state.exact(&root).is_some() {
            return Err(EngineError::AlreadyRegistered(root));
        }
        tracing::debug!("Registered database {}", root.display());
        state.records.push(DbRecord::new(root.clone(), config));
        Ok(root)
    }

    /// Acquires the database owning `path`.
    ///
    /// The owner is the longest registered root that is a prefix of `path`.
    /// If none is registered, the ancestors of `path` are searched for an
    /// on-disk database, which is registered on the spot.
    pub fn acquire(&self, path: &Path, exclusive: bool) -> Acquired {
        let path = canonical(path);
        let mode = LockMode::from_exclusive(exclusive);

        let owner = {
            let state = self.lock();
            state.owner_of(&path).map(|idx| state.records[idx].root.clone())
        };
        let root = match owner.or_else(|| self.discover(&path)) {
            Some(root) => root,
            None => return Acquired::Unknown,
        };

        self.grant_root(&root, mode)
    }

    /// Acquires exactly the database rooted at `root`, without resolving
    /// parents or discovering anything on disk.
    pub fn acquire_root(&self, root: &Path, exclusive: bool) -> Acquired {
        self.grant_root(&canonical(root), LockMode::from_exclusive(exclusive))
    }

    fn grant_root(&self, root: &Path, mode: LockMode) -> Acquired {
        let mut state = self.lock();
        // The record may have been unregistered since it was resolved
        let Some(idx) = state.exact(root) else {
            return Acquired::Unknown;
        };
        match state.grant(idx, mode) {
            Ok((ticket, record)) => {
                tracing::debug!(
                    "Granted {:?} handle {} on {} ({})",
                    mode,
                    ticket,
                    record.root.display(),
                    record.lock
                );
                Acquired::Granted(DbHandle {
                    registry: self.clone(),
                    root: record.root,
                    config: record.config,
                    mode,
                    ticket,
                    released: false,
                })
            }
            Err(root) => {
                tracing::debug!("Denied {:?} handle on {}", mode, root.display());
                Acquired::Busy(root)
            }
        }
    }

    /// Walks up from `path` looking for a folder with a `GTAGS` file and
    /// registers the first one found.
    fn discover(&self, path: &Path) -> Option<PathBuf> {
        let root = path.ancestors().find(|dir| has_index(dir))?.to_path_buf();
        let config = self.config_for(&root);

        let mut state = self.lock();
        // Another caller may have registered it meanwhile
        if state.exact(&root).is_none() {
            tracing::info!("Discovered database at {}", root.display());
            state.records.push(DbRecord::new(root.clone(), config));
        }
        Some(root)
    }

    /// Returns a handle by its ticket.
    ///
    /// Releasing a ticket that is not outstanding is reported as
    /// [`EngineError::HandleNotHeld`] and leaves the lock state untouched.
    pub(crate) fn put(&self, ticket: u64) -> Result<()> {
        let mut state = self.lock();
        let Some(held) = state.tickets.remove(&ticket) else {
            tracing::error!("Handle {} released twice", ticket);
            return Err(EngineError::HandleNotHeld(ticket));
        };

        let Some(idx) = state.exact(&held.root) else {
            tracing::error!("Handle {} refers to unknown database {}", ticket, held.root.display());
            return Err(EngineError::HandleNotHeld(ticket));
        };
        let record = &mut state.records[idx];
        match record.lock.revoke(held.mode) {
            Some(next) => {
                record.lock = next;
                tracing::debug!(
                    "Released handle {} on {} ({})",
                    ticket,
                    record.root.display(),
                    record.lock
                );
                Ok(())
            }
            None => {
                tracing::error!("Lock state of {} out of sync with handle {}", record.root.display(), ticket);
                Err(EngineError::HandleNotHeld(ticket))
            }
        }
    }

    /// Removes the database owning `path` together with its index files.
    ///
    /// Fails with [`EngineError::DatabaseBusy`] while any handle is
    /// outstanding.
    pub fn unregister(&self, path: &Path) -> Result<()> {
        let path = canonical(path);
        let root = {
            let mut state = self.lock();
            let idx = state
                .owner_of(&path)
                .ok_or_else(|| EngineError::DatabaseNotFound(path.clone()))?;
            let record = &mut state.records[idx];
            if record.pending_delete || !record.lock.is_free() {
                return Err(EngineError::DatabaseBusy(record.root.clone()));
            }
            record.pending_delete = true;
            record.root.clone()
        };

        let removed = remove_index_files(&root);

        let mut state = self.lock();
        let idx = state.exact(&root);
        match removed {
            Ok(()) => {
                if let Some(idx) = idx {
                    state.records.remove(idx);
                }
                tracing::info!("Deleted database {}", root.display());
                Ok(())
            }
            Err(e) => {
                if let Some(idx) = idx {
                    state.records[idx].pending_delete = false;
                }
                Err(e)
            }
        }
    }

    /// Whether a database covers `path`, either registered or on disk.
    /// Registers nothing.
    pub fn exists(&self, path: &Path) -> bool {
        let path = canonical(path);
        if self.lock().owner_of(&path).is_some() {
            return true;
        }
        path.ancestors().any(has_index)
    }

    /// Config of the database owning `path`.
    pub fn config(&self, path: &Path) -> Option<DbConfig> {
        let path = canonical(path);
        let state = self.lock();
        state.owner_of(&path).map(|idx| state.records[idx].config.clone())
    }

    /// Stores `config` for the database rooted at `root`, on disk and in memory.
    pub fn set_config(&self, root: &Path, config: DbConfig) -> Result<()> {
        let root = canonical(root);
        config.save_to_folder(&root)?;

        let mut state = self.lock();
        let idx = state
            .exact(&root)
            .ok_or_else(|| EngineError::DatabaseNotFound(root.clone()))?;
        state.records[idx].config = config;
        Ok(())
    }

    pub fn defaults(&self) -> &DbConfig {
        &self.defaults
    }

    /// Root of the registered database owning `path`. Discovers nothing.
    pub fn root_of(&self, path: &Path) -> Option<PathBuf> {
        let path = canonical(path);
        let state = self.lock();
        state.owner_of(&path).map(|idx| state.records[idx].root.clone())
    }

    pub fn lock_state(&self, root: &Path) -> Option<LockState> {
        let root = canonical(root);
        let state = self.lock();
        state.exact(&root).map(|idx| state.records[idx].lock)
    }

    pub fn roots(&self) -> Vec<PathBuf> {
        self.lock().records.iter().map(|r| r.root.clone()).collect()
    }

    pub fn outstanding_handles(&self) -> usize {
        self.lock().tickets.len()
    }
}

fn remove_index_files(root: &Path) -> Result<()> {
    for name in INDEX_FILES.iter().chain(std::iter::once(&DB_CONFIG_FILENAME)) {
        match fs::remove_file(root.join(name)) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

/// Canonical form of `path`; falls back to an absolute path when it does not
/// exist yet.
pub fn canonical(path: &Path) -> PathBuf {
    if let Ok(p) = fs::canonicalize(path) {
        return p;
    }
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(path))
            .unwrap_or_else(|_| path.to_path_buf())
    }
}

/// Capability for shared or exclusive access to one database root.
///
/// Returned to the registry exactly once: by [`DbHandle::release`] or on drop.
#[derive(Debug)]
pub struct DbHandle {
    registry: DbRegistry,
    root: PathBuf,
    config: DbConfig,
    mode: LockMode,
    ticket: u64,
    released: bool,
}

impl DbHandle {
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn mode(&self) -> LockMode {
        self.mode
    }

    pub fn is_exclusive(&self) -> bool {
        self.mode == LockMode::Exclusive
    }

    /// Config of the database as of acquisition.
    pub fn config(&self) -> &DbConfig {
        &self.config
    }

    pub fn ticket(&self) -> u64 {
        self.ticket
    }

    pub fn release(mut self) -> Result<()> {
        self.released = true;
        self.registry.put(self.ticket)
    }
}

impl Drop for DbHandle {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        if let Err(e) = self.registry.put(self.ticket) {
            debug_assert!(false, "failed to release {}: {}", self.root.display(), e);
        }
    }
}
