//! Commands run against the external GNU Global tools.
//!
//! A [`Command`] is built by a caller, moved into the pipeline worker which is
//! its only writer, and handed back to exactly one continuation once it has a
//! terminal status.

pub mod kind;

use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::config::DbConfig;
use crate::db::DbHandle;
use crate::error::Result;

pub use kind::{CommandKind, QueryFlags, Tool};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandStatus {
    /// Not yet run
    Pending,
    Ok,
    /// Ran successfully and printed nothing
    NoResult,
    /// Could not be launched or exited with a failure code
    RunError,
}

impl CommandStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, CommandStatus::Pending)
    }
}

#[derive(Debug)]
pub struct Command {
    kind: CommandKind,
    name: String,
    tag: String,
    flags: QueryFlags,
    db: Option<DbHandle>,
    db_root: Option<PathBuf>,
    db_config: DbConfig,
    output: String,
    status: CommandStatus,
    exit_code: Option<i32>,
}

impl Command {
    /// Creates a command bound to a database handle.
    ///
    /// For [`CommandKind::UpdateSingleFile`] the tag is the file to re-index.
    pub fn new(kind: CommandKind, db: DbHandle, tag: impl Into<String>) -> Self {
        let db_root = db.root().to_path_buf();
        let db_config = db.config().clone();
        Self {
            kind,
            name: kind.name().to_string(),
            tag: tag.into(),
            flags: QueryFlags::default(),
            db: Some(db),
            db_root: Some(db_root),
            db_config,
            output: String::new(),
            status: CommandStatus::Pending,
            exit_code: None,
        }
    }

    /// The only command that runs without a database.
    pub fn version() -> Self {
        Self {
            kind: CommandKind::Version,
            name: CommandKind::Version.name().to_string(),
            tag: String::new(),
            flags: QueryFlags::default(),
            db: None,
            db_root: None,
            db_config: DbConfig::default(),
            output: String::new(),
            status: CommandStatus::Pending,
            exit_code: None,
        }
    }

    pub fn with_flags(mut self, flags: QueryFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn kind(&self) -> CommandKind {
        self.kind
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn flags(&self) -> QueryFlags {
        self.flags
    }

    /// Root of the bound database. Still available after the handle has been
    /// released.
    pub fn db_root(&self) -> Option<&Path> {
        self.db_root.as_deref()
    }

    pub fn db_config(&self) -> &DbConfig {
        &self.db_config
    }

    pub fn holds_db(&self) -> bool {
        self.db.is_some()
    }

    /// Returns the database handle to the registry. A no-op if the command
    /// holds none.
    pub fn release_db(&mut self) -> Result<()> {
        match self.db.take() {
            Some(handle) => handle.release(),
            None => Ok(()),
        }
    }

    /// Standard output on success, the error text on [`CommandStatus::RunError`].
    pub fn output(&self) -> &str {
        &self.output
    }

    pub fn status(&self) -> CommandStatus {
        self.status
    }

    pub fn exit_code(&self) -> Option<i32> {
        self.exit_code
    }

    pub fn is_error(&self) -> bool {
        self.status == CommandStatus::RunError
    }

    pub fn no_result(&self) -> bool {
        self.status == CommandStatus::NoResult
    }

    /// Records the process outcome. Called once by the pipeline worker.
    pub(crate) fn complete(&mut self, exit_code: Option<i32>, stdout: String, stderr: String) {
        debug_assert!(!self.status.is_terminal(), "command completed twice");

        self.exit_code = exit_code;
        if exit_code == Some(0) {
            if stdout.trim().is_empty() {
                self.status = CommandStatus::NoResult;
                self.output = String::new();
            } else {
                self.status = CommandStatus::Ok;
                self.output = stdout;
            }
        } else {
            self.status = CommandStatus::RunError;
            self.output = if stderr.trim().is_empty() {
                match exit_code {
                    Some(code) => format!("{} exited with code {}", self.name, code),
                    None => format!("{} was terminated by a signal", self.name),
                }
            } else {
                stderr.trim_end().to_string()
            };
        }
    }

    /// Puts the output of an earlier pass of the same query in front of this
    /// one's. An error stays an error.
    pub(crate) fn merge_earlier(&mut self, earlier: &str) {
        if self.is_error() || earlier.trim().is_empty() {
            return;
        }
        let mut merged = earlier.trim_end().to_string();
        merged.push('\n');
        merged.push_str(&self.output);
        self.output = merged;
        self.status = CommandStatus::Ok;
    }

    /// Records a launch failure.
    pub(crate) fn fail(&mut self, message: impl Into<String>) {
        debug_assert!(!self.status.is_terminal(), "command completed twice");
        self.status = CommandStatus::RunError;
        self.output = message.into();
    }
}
