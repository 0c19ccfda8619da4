use std::env;
use std::path::{Path, PathBuf};

use crate::command::Tool;
use crate::config::ToolsConfig;
use crate::error::{EngineError, Result};

/// Resolved locations of the `global` and `gtags` binaries.
#[derive(Debug, Clone)]
pub struct Tools {
    global: PathBuf,
    gtags: PathBuf,
}

impl Tools {
    /// Locates both binaries, first in `bin_dir` and then on `PATH`.
    ///
    /// Failing here is fatal for the whole feature set and is meant to be
    /// reported once at startup.
    pub fn locate(config: &ToolsConfig) -> Result<Self> {
        let bin_dir = config.bin_dir.as_deref();
        let global = find_binary(&config.global, bin_dir);
        let gtags = find_binary(&config.gtags, bin_dir);

        match (global, gtags) {
            (Some(global), Some(gtags)) => {
                tracing::debug!("Using {} and {}", global.display(), gtags.display());
                Ok(Self { global, gtags })
            }
            (global, _) => {
                let missing = if global.is_none() { &config.global } else { &config.gtags };
                let place = match bin_dir {
                    Some(dir) => format!("{} or PATH", dir.display()),
                    None => "PATH".to_string(),
                };
                Err(EngineError::ConfigurationFatal(format!(
                    "'{}' not found in {}",
                    missing, place
                )))
            }
        }
    }

    /// Uses the given paths as they are.
    pub fn from_paths(global: impl Into<PathBuf>, gtags: impl Into<PathBuf>) -> Self {
        Self {
            global: global.into(),
            gtags: gtags.into(),
        }
    }

    pub fn path(&self, tool: Tool) -> &Path {
        match tool {
            Tool::Global => &self.global,
            Tool::Gtags => &self.gtags,
        }
    }

    /// Whether both binaries are still present.
    pub fn is_available(&self) -> bool {
        self.global.is_file() && self.gtags.is_file()
    }
}

fn find_binary(name: &str, bin_dir: Option<&Path>) -> Option<PathBuf> {
    let as_path = Path::new(name);
    if as_path.components().count() > 1 || as_path.is_absolute() {
        return as_path.is_file().then(|| as_path.to_path_buf());
    }

    let dirs = bin_dir
        .map(Path::to_path_buf)
        .into_iter()
        .chain(env::var_os("PATH").into_iter().flat_map(|p| env::split_paths(&p).collect::<Vec<_>>()));

    for dir in dirs {
        for candidate in candidates(&dir, name) {
            if candidate.is_file() {
                return Some(candidate);
            }
        }
    }
    None
}

#[cfg(windows)]
fn candidates(dir: &Path, name: &str) -> Vec<PathBuf> {
    vec![dir.join(format!("{}.exe", name)), dir.join(name)]
}

#[cfg(not(windows))]
fn candidates(dir: &Path, name: &str) -> Vec<PathBuf> {
    vec![dir.join(name)]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_locate_in_bin_dir() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("my-global"), b"").unwrap();
        fs::write(dir.path().join("my-gtags"), b"").unwrap();

        let config = ToolsConfig {
            global: "my-global".into(),
            gtags: "my-gtags".into(),
            bin_dir: Some(dir.path().to_path_buf()),
        };
        let tools = Tools::locate(&config).unwrap();
        assert_eq!(tools.path(Tool::Global), dir.path().join("my-global"));
        assert_eq!(tools.path(Tool::Gtags), dir.path().join("my-gtags"));
        assert!(tools.is_available());
    }

    #[test]
    fn test_missing_binary_is_fatal() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("global"), b"").unwrap();

        let config = ToolsConfig {
            global: "global".into(),
            gtags: "gtags-that-does-not-exist-anywhere".into(),
            bin_dir: Some(dir.path().to_path_buf()),
        };
        let err = Tools::locate(&config).unwrap_err();
        assert!(matches!(err, EngineError::ConfigurationFatal(ref m) if m.contains("gtags-that-does-not-exist-anywhere")));
    }

    #[test]
    fn test_explicit_path() {
        let dir = TempDir::new().unwrap();
        let global = dir.path().join("global");
        fs::write(&global, b"").unwrap();

        assert_eq!(find_binary(global.to_str().unwrap(), None), Some(global.clone()));
        assert_eq!(find_binary(dir.path().join("nope").to_str().unwrap(), None), None);
    }
}
