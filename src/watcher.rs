//! Save watcher
//!
//! Watches a database root and turns debounced file modifications into
//! single-file updates, for databases that have automatic updates enabled.

use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use notify::RecursiveMode;
use notify_debouncer_mini::{new_debouncer, DebounceEventResult, Debouncer};
use tokio::sync::mpsc;

use crate::config::DB_CONFIG_FILENAME;
use crate::db::INDEX_FILES;
use crate::engine::{Engine, UpdateOutcome};
use crate::error::{EngineError, Result};

const DEBOUNCE: Duration = Duration::from_millis(500);

pub struct SaveWatcher {
    _debouncer: Debouncer<notify::RecommendedWatcher>,
    receiver: mpsc::UnboundedReceiver<Vec<PathBuf>>,
}

impl SaveWatcher {
    pub fn new(root: &Path) -> Result<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        let watched = root.to_path_buf();

        let mut debouncer = new_debouncer(DEBOUNCE, move |result: DebounceEventResult| match result {
            Ok(events) => {
                let saved: Vec<PathBuf> = events
                    .into_iter()
                    .map(|e| e.path)
                    .filter(|p| is_saved_source(&watched, p))
                    .collect();
                if !saved.is_empty() {
                    let _ = tx.send(saved);
                }
            }
            Err(e) => tracing::warn!("Watch error: {}", e),
        })
        .map_err(|e| EngineError::Watcher(e.to_string()))?;

        debouncer
            .watcher()
            .watch(root, RecursiveMode::Recursive)
            .map_err(|e| EngineError::Watcher(e.to_string()))?;

        tracing::debug!("Watching {}", root.display());
        Ok(Self {
            _debouncer: debouncer,
            receiver: rx,
        })
    }

    /// Next batch of saved files. `None` once the watcher has stopped.
    pub async fn recv(&mut self) -> Option<Vec<PathBuf>> {
        self.receiver.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Vec<PathBuf>> {
        self.receiver.try_recv().ok()
    }
}

/// Whether an event path is a user file worth re-indexing.
///
/// The index files themselves change on every update and must not trigger
/// another one. Hidden entries below `root` (`.git` and the like) are
/// skipped.
fn is_saved_source(root: &Path, path: &Path) -> bool {
    if !path.is_file() {
        return false;
    }
    let relative = path.strip_prefix(root).unwrap_or(path);
    let hidden = relative.components().any(|c| match c {
        Component::Normal(name) => name.to_string_lossy().starts_with('.'),
        _ => false,
    });
    if hidden {
        return false;
    }
    let Some(name) = path.file_name().map(|n| n.to_string_lossy()) else {
        return false;
    };
    name != DB_CONFIG_FILENAME && !INDEX_FILES.iter().any(|index| name.starts_with(index))
}

/// Hands saved files to the engine. Files whose database does not want
/// automatic updates are left out of the result.
pub fn apply(engine: &Engine, files: &[PathBuf]) -> Vec<(PathBuf, UpdateOutcome)> {
    files
        .iter()
        .filter_map(|file| {
            let outcome = engine.on_file_saved(file)?;
            tracing::info!("{}: {:?}", file.display(), outcome);
            Some((file.clone(), outcome))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_index_files_are_not_sources() {
        let dir = TempDir::new().unwrap();
        for name in ["GTAGS", "GRTAGS", "GPATH", DB_CONFIG_FILENAME, "main.c"] {
            fs::write(dir.path().join(name), b"").unwrap();
        }

        let root = dir.path();
        assert!(is_saved_source(root, &root.join("main.c")));
        assert!(!is_saved_source(root, &root.join("GTAGS")));
        assert!(!is_saved_source(root, &root.join("GPATH")));
        assert!(!is_saved_source(root, &root.join(DB_CONFIG_FILENAME)));
    }

    #[test]
    fn test_hidden_and_missing_paths_are_skipped() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join(".git")).unwrap();
        fs::write(dir.path().join(".git/index"), b"").unwrap();

        let root = dir.path();
        assert!(!is_saved_source(root, &root.join(".git/index")));
        assert!(!is_saved_source(root, &root.join("deleted.c")));
        assert!(!is_saved_source(root, root));
    }

    #[tokio::test]
    async fn test_watcher_starts_on_existing_root() {
        let dir = TempDir::new().unwrap();
        let mut watcher = SaveWatcher::new(dir.path()).unwrap();
        assert!(watcher.try_recv().is_none());
    }

    #[test]
    fn test_watcher_on_missing_root_fails() {
        let dir = TempDir::new().unwrap();
        let err = SaveWatcher::new(&dir.path().join("missing")).err().unwrap();
        assert!(matches!(err, EngineError::Watcher(_)));
    }
}
