use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The external tool binaries are missing. Disables the whole feature set.
    #[error("GNU Global binaries not found: {0}")]
    ConfigurationFatal(String),

    #[error("Database already registered: {}", .0.display())]
    AlreadyRegistered(PathBuf),

    #[error("Database not found for: {}", .0.display())]
    DatabaseNotFound(PathBuf),

    #[error("Database is in use: {}", .0.display())]
    DatabaseBusy(PathBuf),

    #[error("Handle {0} is not held (released twice?)")]
    HandleNotHeld(u64),

    #[error("{0}")]
    CommandFailed(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Watcher error: {0}")]
    Watcher(String),
}

impl From<toml::de::Error> for EngineError {
    fn from(e: toml::de::Error) -> Self {
        EngineError::Config(e.to_string())
    }
}

impl From<toml::ser::Error> for EngineError {
    fn from(e: toml::ser::Error) -> Self {
        EngineError::Config(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
