//! Configuration for the engine and for individual databases.
//!
//! `EngineConfig` is loaded once at startup from a TOML file. `DbConfig` lives
//! next to the index files of each database root; the `[defaults]` section of
//! the engine config seeds databases that have none.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// File name of the per-database configuration, stored in the database root.
pub const DB_CONFIG_FILENAME: &str = "gtags-engine.toml";

/// Environment variable overriding `tools.bin_dir`.
pub const BIN_DIR_ENV: &str = "GTAGS_ENGINE_BIN_DIR";

/// Source code parser used by `gtags` when building a database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParserKind {
    #[default]
    Default,
    Ctags,
    Pygments,
}

impl ParserKind {
    pub const ALL: [ParserKind; 3] = [ParserKind::Default, ParserKind::Ctags, ParserKind::Pygments];

    /// Value passed to `gtags --gtagslabel=`.
    pub fn as_str(&self) -> &'static str {
        match self {
            ParserKind::Default => "default",
            ParserKind::Ctags => "ctags",
            ParserKind::Pygments => "pygments",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|p| p.as_str().eq_ignore_ascii_case(name))
    }
}

/// Settings bound to one database root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DbConfig {
    #[serde(default)]
    pub parser: ParserKind,

    /// Re-index a file when it is saved
    #[serde(default = "default_auto_update")]
    pub auto_update: bool,

    /// Consult the library databases when querying
    #[serde(default)]
    pub use_library_dbs: bool,

    /// Roots of auxiliary library databases
    #[serde(default)]
    pub library_dbs: Vec<PathBuf>,
}

fn default_auto_update() -> bool {
    true
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            parser: ParserKind::Default,
            auto_update: default_auto_update(),
            use_library_dbs: false,
            library_dbs: Vec::new(),
        }
    }
}

impl DbConfig {
    /// Loads the config stored in `folder`, or `None` if there is none.
    pub fn load_from_folder(folder: &Path) -> Result<Option<Self>> {
        let path = folder.join(DB_CONFIG_FILENAME);
        if !path.is_file() {
            return Ok(None);
        }
        let content = fs::read_to_string(&path)?;
        Ok(Some(toml::from_str(&content)?))
    }

    pub fn save_to_folder(&self, folder: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        fs::write(folder.join(DB_CONFIG_FILENAME), content)?;
        Ok(())
    }

    /// Replaces the library list from newline-delimited text.
    ///
    /// Blank lines are skipped and trailing whitespace is trimmed from each
    /// entry. Duplicates are kept out.
    pub fn library_dbs_from_text(&mut self, text: &str) {
        self.library_dbs.clear();
        for line in text.split(['\n', '\r']) {
            let entry = line.trim_end();
            if entry.trim_start().is_empty() {
                continue;
            }
            let path = PathBuf::from(entry);
            if !self.library_dbs.contains(&path) {
                self.library_dbs.push(path);
            }
        }
    }

    pub fn library_dbs_to_text(&self) -> String {
        self.library_dbs
            .iter()
            .map(|p| p.display().to_string())
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Value for `GTAGSLIBPATH`, if library databases are in use.
    pub fn library_path_env(&self) -> Option<std::ffi::OsString> {
        if !self.use_library_dbs || self.library_dbs.is_empty() {
            return None;
        }
        std::env::join_paths(&self.library_dbs).ok()
    }
}

/// Where to find the external `global` and `gtags` binaries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    #[serde(default = "default_global")]
    pub global: String,

    #[serde(default = "default_gtags")]
    pub gtags: String,

    /// Directory holding both binaries. Searched before `PATH`.
    #[serde(default)]
    pub bin_dir: Option<PathBuf>,
}

fn default_global() -> String {
    "global".to_string()
}

fn default_gtags() -> String {
    "gtags".to_string()
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            global: default_global(),
            gtags: default_gtags(),
            bin_dir: None,
        }
    }
}

/// Process-wide configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub tools: ToolsConfig,

    /// Seeds databases that carry no config of their own
    #[serde(default)]
    pub defaults: DbConfig,

    /// Consecutive failed attempts after which a replay gives up
    #[serde(default = "default_max_replay_attempts")]
    pub max_replay_attempts: usize,
}

fn default_max_replay_attempts() -> usize {
    3
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tools: ToolsConfig::default(),
            defaults: DbConfig::default(),
            max_replay_attempts: default_max_replay_attempts(),
        }
    }
}

impl EngineConfig {
    /// Loads the config from a TOML file. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let config = if path.is_file() {
            let content = fs::read_to_string(path)?;
            toml::from_str(&content)?
        } else {
            tracing::debug!("No config at {}, using defaults", path.display());
            Self::default()
        };
        Ok(config.with_env_overrides())
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(path, toml::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Env vars take precedence over TOML values.
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(val) = std::env::var(BIN_DIR_ENV) {
            if !val.is_empty() {
                self.tools.bin_dir = Some(PathBuf::from(val));
            }
        }
        self
    }
}
