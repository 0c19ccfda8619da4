use std::ffi::OsString;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::config::ParserKind;

/// The two external programs of GNU Global.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tool {
    /// `global`, the query tool
    Global,
    /// `gtags`, the indexer
    Gtags,
}

/// Query modifiers chosen by the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryFlags {
    pub regexp: bool,
    pub match_case: bool,
}

impl Default for QueryFlags {
    fn default() -> Self {
        Self {
            regexp: false,
            match_case: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandKind {
    CreateDatabase,
    UpdateSingleFile,
    FindDefinition,
    FindReference,
    /// Symbols without a definition in the project; used as a fallback
    FindSymbol,
    FindFile,
    Grep,
    /// Names starting with a prefix, for autocompletion
    FindSymbolPrefix,
    /// Second completion pass over symbols without a definition
    FindOtherSymbolPrefix,
    /// File paths with a component starting with a prefix
    FindFilePrefix,
    Version,
}

impl CommandKind {
    pub fn name(&self) -> &'static str {
        match self {
            CommandKind::CreateDatabase => "Create Database",
            CommandKind::UpdateSingleFile => "Database Single File Update",
            CommandKind::FindDefinition => "Find Definition",
            CommandKind::FindReference => "Find Reference",
            CommandKind::FindSymbol => "Find Symbol",
            CommandKind::FindFile => "Find File",
            CommandKind::Grep => "Grep",
            CommandKind::FindSymbolPrefix | CommandKind::FindOtherSymbolPrefix => "AutoComplete",
            CommandKind::FindFilePrefix => "AutoComplete File",
            CommandKind::Version => "About",
        }
    }

    pub fn tool(&self) -> Tool {
        match self {
            CommandKind::CreateDatabase | CommandKind::UpdateSingleFile => Tool::Gtags,
            _ => Tool::Global,
        }
    }

    /// Whether the command writes the database and so needs an exclusive handle.
    pub fn writes_database(&self) -> bool {
        self.tool() == Tool::Gtags
    }

    /// Whether the output is a plain list of lines rather than
    /// `tag line file snippet` records.
    pub fn lists_lines(&self) -> bool {
        matches!(self, CommandKind::FindFile) || self.is_completion()
    }

    pub fn is_completion(&self) -> bool {
        matches!(
            self,
            CommandKind::FindSymbolPrefix | CommandKind::FindOtherSymbolPrefix | CommandKind::FindFilePrefix
        )
    }

    pub fn is_query(&self) -> bool {
        !self.writes_database() && *self != CommandKind::Version
    }

    /// Builds the argument list for this kind.
    ///
    /// `tag` is the query text, or the file path for single-file updates.
    pub fn args(&self, tag: &str, flags: QueryFlags, parser: ParserKind) -> Vec<OsString> {
        let mut args: Vec<String> = match self {
            CommandKind::CreateDatabase => {
                let mut args = vec!["-v".to_string()];
                if parser != ParserKind::Default {
                    args.push(format!("--gtagslabel={}", parser.as_str()));
                }
                return to_os(args);
            }
            CommandKind::UpdateSingleFile => {
                let mut args = to_os(vec!["--single-update".to_string()]);
                args.push(Path::new(tag).as_os_str().to_os_string());
                return args;
            }
            CommandKind::Version => return to_os(vec!["--version".to_string()]),
            CommandKind::FindDefinition => vec!["-d".into(), "--result=ctags-x".into()],
            CommandKind::FindReference => vec!["-r".into(), "--result=ctags-x".into()],
            CommandKind::FindSymbol => vec!["-s".into(), "--result=ctags-x".into()],
            CommandKind::FindFile | CommandKind::FindFilePrefix => vec!["-P".into()],
            CommandKind::Grep => {
                let mut args: Vec<String> = vec!["-g".into(), "--result=ctags-x".into()];
                if !flags.regexp {
                    args.push("--literal".into());
                }
                args
            }
            CommandKind::FindSymbolPrefix => vec!["-c".into()],
            CommandKind::FindOtherSymbolPrefix => vec!["-c".into(), "-s".into()],
        };

        if !flags.match_case {
            args.push("-i".into());
        }
        // Keeps tags starting with '-' from being read as options
        args.push("--".into());
        args.push(tag.to_string());
        to_os(args)
    }
}

fn to_os(args: Vec<String>) -> Vec<OsString> {
    args.into_iter().map(OsString::from).collect()
}
