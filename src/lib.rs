pub mod command;
pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod parser;
pub mod pipeline;
pub mod scheduler;
pub mod watcher;

pub use command::{Command, CommandKind, CommandStatus, QueryFlags, Tool};
pub use config::{DbConfig, EngineConfig, ParserKind, ToolsConfig};
pub use db::{Acquired, DbHandle, DbRegistry, LockMode, LockState};
pub use engine::{Engine, QueryReply, Submit, UpdateOutcome};
pub use error::{EngineError, Result};
pub use parser::{FileMatches, LineMatch, MatchSet};
pub use pipeline::{CompletionPump, Pipeline, Tools};
pub use scheduler::{ReplayAttempt, UpdateScheduler};
pub use watcher::SaveWatcher;
