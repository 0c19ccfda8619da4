//! Deferred single-file updates.
//!
//! Files saved while their database was write-locked are parked here and
//! replayed one at a time as commands against that database complete.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

/// Result of one attempt to start a deferred update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplayAttempt {
    /// The update command was submitted
    Started,
    /// The database is still locked; the attempt deferred the file again
    Busy,
    /// The update could not be submitted at all
    Failed,
}

#[derive(Debug)]
pub struct UpdateScheduler {
    pending: Mutex<Vec<PathBuf>>,
    max_attempts: usize,
}

impl Default for UpdateScheduler {
    fn default() -> Self {
        Self::new(3)
    }
}

impl UpdateScheduler {
    /// `max_attempts` bounds the consecutive failed attempts of one
    /// [`replay_one`](Self::replay_one) call.
    pub fn new(max_attempts: usize) -> Self {
        Self {
            pending: Mutex::new(Vec::new()),
            max_attempts: max_attempts.max(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<PathBuf>> {
        self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Queues `path` for re-indexing. Returns `false` if it was already queued.
    pub fn defer(&self, path: &Path) -> bool {
        let mut pending = self.lock();
        // Recently deferred files are the likeliest duplicates
        if pending.iter().rev().any(|p| p == path) {
            return false;
        }
        tracing::debug!("Deferred update of {}", path.display());
        pending.push(path.to_path_buf());
        true
    }

    /// Removes and returns the first queued file under `db_root` accepted by
    /// `belongs`.
    ///
    /// `belongs` runs without the set lock held, so it may consult the
    /// registry.
    pub fn take_first_in<B>(&self, db_root: &Path, mut belongs: B) -> Option<PathBuf>
    where
        B: FnMut(&Path) -> bool,
    {
        let candidates: Vec<PathBuf> = self
            .lock()
            .iter()
            .filter(|p| p.starts_with(db_root))
            .cloned()
            .collect();
        let file = candidates.into_iter().find(|p| belongs(p.as_path()))?;

        let mut pending = self.lock();
        let idx = pending.iter().position(|p| *p == file)?;
        Some(pending.remove(idx))
    }

    /// Replays one deferred update for the database at `db_root`.
    ///
    /// Takes the first queued file under the root that `belongs` to it (a
    /// file under a nested database root belongs to that one) and hands it to
    /// `attempt`, which submits the update. The file is not re-queued here; on `Busy`
    /// the attempt is expected to have deferred it again, and the loop stops
    /// since every file under the root shares the busy database. `Failed`
    /// files are dropped and the next one is tried, for at most
    /// `max_attempts` consecutive failures.
    ///
    /// Returns `true` if an update was started.
    pub fn replay_one<B, F>(&self, db_root: &Path, mut belongs: B, mut attempt: F) -> bool
    where
        B: FnMut(&Path) -> bool,
        F: FnMut(&Path) -> ReplayAttempt,
    {
        for _ in 0..self.max_attempts {
            // The set lock is never held across the attempt
            let Some(file) = self.take_first_in(db_root, &mut belongs) else {
                return false;
            };
            match attempt(&file) {
                ReplayAttempt::Started => {
                    tracing::debug!("Replayed update of {}", file.display());
                    return true;
                }
                ReplayAttempt::Busy => return false,
                ReplayAttempt::Failed => {
                    tracing::warn!("Dropping deferred update of {}", file.display());
                }
            }
        }
        false
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn pending(&self) -> Vec<PathBuf> {
        self.lock().clone()
    }
}
