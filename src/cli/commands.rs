use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Args, Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use serde_json::json;
use tokio::sync::oneshot;

use gtags_engine::command::{Command, CommandKind, CommandStatus, QueryFlags};
use gtags_engine::config::{DbConfig, ParserKind};
use gtags_engine::engine::{Engine, QueryReply, Submit, UpdateOutcome};
use gtags_engine::error::{EngineError, Result};
use gtags_engine::pipeline::CompletionPump;
use gtags_engine::watcher::{self, SaveWatcher};

#[derive(Parser)]
#[command(name = "gtags-engine")]
#[command(about = "Build and query GNU Global tag databases")]
#[command(version)]
#[command(after_long_help = r#"
EXAMPLES:
    # Build a database for the current directory
    gtags-engine create

    # Re-index one file after editing it
    gtags-engine update src/main.c

    # Find where a symbol is defined, ignoring case
    gtags-engine def main -i

    # Grep the project with a regular expression, as JSON
    gtags-engine grep 'TODO.*fix' --regexp --format json

    # Keep the database up to date while editing
    gtags-engine watch ./project
"#)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Engine configuration file
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Output format
    #[arg(long, global = true, value_enum, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Args, Clone, Copy)]
pub struct QueryArgs {
    /// Treat the tag as a regular expression (grep only)
    #[arg(long)]
    pub regexp: bool,

    /// Match case-insensitively
    #[arg(short = 'i', long)]
    pub ignore_case: bool,
}

impl From<QueryArgs> for QueryFlags {
    fn from(args: QueryArgs) -> Self {
        QueryFlags {
            regexp: args.regexp,
            match_case: !args.ignore_case,
        }
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// Build or rebuild the database rooted at a directory
    Create {
        #[arg(default_value = ".")]
        path: PathBuf,

        /// Also rebuild the configured library databases
        #[arg(long)]
        libraries: bool,
    },

    /// Re-index a single file
    Update { file: PathBuf },

    /// Delete the database owning a path
    Delete {
        #[arg(default_value = ".")]
        path: PathBuf,
    },

    /// Find definitions of a symbol
    Def {
        tag: String,
        /// Path inside the project
        #[arg(long, default_value = ".")]
        path: PathBuf,
        #[command(flatten)]
        query: QueryArgs,
    },

    /// Find references to a symbol
    Ref {
        tag: String,
        #[arg(long, default_value = ".")]
        path: PathBuf,
        #[command(flatten)]
        query: QueryArgs,
    },

    /// Find symbols that have no definition in the project
    Symbol {
        tag: String,
        #[arg(long, default_value = ".")]
        path: PathBuf,
        #[command(flatten)]
        query: QueryArgs,
    },

    /// Find files whose path matches
    File {
        pattern: String,
        #[arg(long, default_value = ".")]
        path: PathBuf,
        #[command(flatten)]
        query: QueryArgs,
    },

    /// Search file contents
    Grep {
        pattern: String,
        #[arg(long, default_value = ".")]
        path: PathBuf,
        #[command(flatten)]
        query: QueryArgs,
    },

    /// List symbol names (or file paths) starting with a prefix
    Complete {
        prefix: String,
        #[arg(long, default_value = ".")]
        path: PathBuf,
        /// Complete file path components instead of symbols
        #[arg(long)]
        files: bool,
        #[command(flatten)]
        query: QueryArgs,
    },

    /// Show the GNU Global version
    Version,

    /// Re-index files as they are saved
    Watch {
        #[arg(default_value = ".")]
        path: PathBuf,
    },

    /// Show or change the settings of a database
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Print the settings of the database owning a path
    Show {
        #[arg(default_value = ".")]
        path: PathBuf,
    },

    /// Change the settings of the database owning a path
    Set {
        #[arg(default_value = ".")]
        path: PathBuf,

        /// Parser used when building: default, ctags or pygments
        #[arg(long, value_parser = parse_parser)]
        parser: Option<ParserKind>,

        /// Re-index files on save
        #[arg(long)]
        auto_update: Option<bool>,

        /// Consult library databases when querying
        #[arg(long)]
        use_library_dbs: Option<bool>,

        /// File listing library database roots, one per line
        #[arg(long)]
        libraries_from: Option<PathBuf>,
    },
}

fn parse_parser(name: &str) -> std::result::Result<ParserKind, String> {
    ParserKind::from_name(name).ok_or_else(|| {
        let names: Vec<_> = ParserKind::ALL.iter().map(|p| p.as_str()).collect();
        format!("unknown parser '{}', expected one of: {}", name, names.join(", "))
    })
}

/// Maps a refused submission to an error.
fn ensure_started(submit: Submit, path: &Path) -> Result<()> {
    match submit {
        Submit::Started => Ok(()),
        Submit::Busy(root) => Err(EngineError::DatabaseBusy(root)),
        Submit::NoDatabase => Err(EngineError::DatabaseNotFound(path.to_path_buf())),
        Submit::Rejected => Err(EngineError::ConfigurationFatal(
            "binaries are no longer available".to_string(),
        )),
    }
}

/// Pumps completions until every submitted command is done, then takes the
/// value a continuation sent.
async fn wait_for<T>(pump: &mut CompletionPump, rx: oneshot::Receiver<T>) -> Result<T> {
    pump.drain().await;
    rx.await
        .map_err(|_| EngineError::CommandFailed("command finished without a result".to_string()))
}

fn print_failure(command: &Command, format: OutputFormat) -> Result<()> {
    if format == OutputFormat::Json {
        println!(
            "{}",
            json!({ "command": command.name(), "status": command.status(), "error": command.output() })
        );
    }
    Err(EngineError::CommandFailed(format!(
        "{} failed: {}",
        command.name(),
        command.output()
    )))
}

pub async fn create_database(
    engine: &Engine,
    pump: &mut CompletionPump,
    path: &Path,
    libraries: bool,
    format: OutputFormat,
) -> Result<()> {
    let (tx, rx) = oneshot::channel();
    let submit = engine.create_database(path, move |cmd| {
        let _ = tx.send(cmd);
    });
    ensure_started(submit, path)?;

    if libraries {
        let started = engine.rebuild_library_databases(path);
        tracing::info!("Rebuilding {} library databases", started);
    }

    let spinner = if format == OutputFormat::Text {
        let pb = ProgressBar::new_spinner();
        pb.set_style(
            ProgressStyle::with_template("{spinner} {msg} [{elapsed}]")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        pb.set_message(format!("Creating database in {}", path.display()));
        pb.enable_steady_tick(Duration::from_millis(100));
        pb
    } else {
        ProgressBar::hidden()
    };

    let command = wait_for(pump, rx).await;
    spinner.finish_and_clear();
    let command = command?;
    if command.is_error() {
        return print_failure(&command, format);
    }

    let root = command.db_root().map(Path::to_path_buf).unwrap_or_default();
    match format {
        OutputFormat::Text => println!("Database created in {}", root.display()),
        OutputFormat::Json => println!("{}", json!({ "created": root })),
    }
    Ok(())
}

pub async fn update_file(
    engine: &Engine,
    pump: &mut CompletionPump,
    file: &Path,
    format: OutputFormat,
) -> Result<()> {
    let (tx, rx) = oneshot::channel();
    let outcome = engine.update_single_file_with(file, move |cmd| {
        let _ = tx.send(cmd);
    });

    match outcome {
        UpdateOutcome::Started => {}
        UpdateOutcome::Deferred => {
            // Replayed by the next command that completes on this database
            pump.drain().await;
            println!("Update of {} deferred", file.display());
            return Ok(());
        }
        UpdateOutcome::NoDatabase => return Err(EngineError::DatabaseNotFound(file.to_path_buf())),
        UpdateOutcome::Rejected => {
            return Err(EngineError::ConfigurationFatal(
                "binaries are no longer available".to_string(),
            ))
        }
    }

    let command = wait_for(pump, rx).await?;
    if command.is_error() {
        return print_failure(&command, format);
    }
    match format {
        OutputFormat::Text => println!("Updated {}", file.display()),
        OutputFormat::Json => println!("{}", json!({ "updated": file })),
    }
    Ok(())
}

pub fn delete_database(engine: &Engine, path: &Path, format: OutputFormat) -> Result<()> {
    // Registers a database found on disk so it can be removed
    let root = owning_root(engine, path)?;
    engine.delete_database(&root)?;

    match format {
        OutputFormat::Text => println!("Deleted database in {}", root.display()),
        OutputFormat::Json => println!("{}", json!({ "deleted": root })),
    }
    Ok(())
}

pub async fn query(
    engine: &Engine,
    pump: &mut CompletionPump,
    kind: CommandKind,
    path: &Path,
    tag: &str,
    flags: QueryFlags,
    format: OutputFormat,
) -> Result<()> {
    let (tx, rx) = oneshot::channel();
    let submit = engine.query(kind, path, tag, flags, move |reply| {
        let _ = tx.send(reply);
    });
    ensure_started(submit, path)?;

    let reply = wait_for(pump, rx).await?;
    print_reply(&reply, format)
}

pub async fn complete(
    engine: &Engine,
    pump: &mut CompletionPump,
    path: &Path,
    prefix: &str,
    files: bool,
    flags: QueryFlags,
    format: OutputFormat,
) -> Result<()> {
    let (tx, rx) = oneshot::channel();
    let cont = move |reply: QueryReply| {
        let _ = tx.send(reply);
    };
    let submit = if files {
        engine.complete_file(path, prefix, flags, cont)
    } else {
        engine.complete(path, prefix, flags, cont)
    };
    ensure_started(submit, path)?;

    let reply = wait_for(pump, rx).await?;
    print_reply(&reply, format)
}

fn print_reply(reply: &QueryReply, format: OutputFormat) -> Result<()> {
    let command = &reply.command;
    if command.is_error() {
        return print_failure(command, format);
    }

    let completing = command.kind().is_completion();
    match format {
        OutputFormat::Json if completing => {
            println!("{}", json!({ "status": command.status(), "names": reply.names() }));
        }
        OutputFormat::Json => {
            let output = serde_json::to_string_pretty(&json!({
                "status": command.status(),
                "count": reply.matches.len(),
                "result": reply.matches,
            }))
            .map_err(|e| EngineError::CommandFailed(e.to_string()))?;
            println!("{}", output);
        }
        OutputFormat::Text if command.status() == CommandStatus::NoResult => {
            println!("{} \"{}\": no results", command.name(), command.tag());
        }
        OutputFormat::Text if completing => {
            for name in reply.names() {
                println!("{}", name);
            }
        }
        OutputFormat::Text => println!("{}", reply.matches),
    }
    Ok(())
}

pub async fn show_version(engine: &Engine, pump: &mut CompletionPump, format: OutputFormat) -> Result<()> {
    let (tx, rx) = oneshot::channel();
    let started = engine.version(move |cmd| {
        let _ = tx.send(cmd);
    });
    if !started {
        return Err(EngineError::ConfigurationFatal(
            "binaries are no longer available".to_string(),
        ));
    }

    let command = wait_for(pump, rx).await?;
    if command.is_error() {
        return print_failure(&command, format);
    }
    match format {
        OutputFormat::Text => println!("{}", command.output().trim_end()),
        OutputFormat::Json => println!("{}", json!({ "version": command.output().trim() })),
    }
    Ok(())
}

pub async fn watch(engine: &Engine, pump: &mut CompletionPump, path: &Path) -> Result<()> {
    if !engine.registry().exists(path) {
        return Err(EngineError::DatabaseNotFound(path.to_path_buf()));
    }
    let mut watcher = SaveWatcher::new(path)?;
    println!("Watching {} for changes...", path.display());

    loop {
        tokio::select! {
            batch = watcher.recv() => {
                let Some(files) = batch else { break };
                for (file, outcome) in watcher::apply(engine, &files) {
                    match outcome {
                        UpdateOutcome::Started => println!("Updating {}", file.display()),
                        UpdateOutcome::Deferred => println!("Deferred {}", file.display()),
                        UpdateOutcome::NoDatabase | UpdateOutcome::Rejected => {
                            eprintln!("Cannot update {}: {:?}", file.display(), outcome)
                        }
                    }
                }
            }
            _ = pump.dispatch_next(), if pump.in_flight() > 0 => {}
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    pump.drain().await;
    Ok(())
}

fn owning_root(engine: &Engine, path: &Path) -> Result<PathBuf> {
    let handle = engine.registry().acquire(path, false).into_result(path)?;
    Ok(handle.root().to_path_buf())
}

pub fn show_config(engine: &Engine, path: &Path, format: OutputFormat) -> Result<()> {
    let root = owning_root(engine, path)?;
    let config = engine
        .registry()
        .config(&root)
        .ok_or_else(|| EngineError::DatabaseNotFound(root.clone()))?;

    match format {
        OutputFormat::Text => {
            println!("Database: {}", root.display());
            println!("Parser: {}", config.parser.as_str());
            println!("Auto update: {}", config.auto_update);
            println!("Use library databases: {}", config.use_library_dbs);
            if !config.library_dbs.is_empty() {
                println!("Library databases:");
                for line in config.library_dbs_to_text().lines() {
                    println!("  {}", line);
                }
            }
        }
        OutputFormat::Json => println!("{}", json!({ "root": root, "config": config })),
    }
    Ok(())
}

pub struct ConfigChanges {
    pub parser: Option<ParserKind>,
    pub auto_update: Option<bool>,
    pub use_library_dbs: Option<bool>,
    pub libraries_from: Option<PathBuf>,
}

pub fn set_config(engine: &Engine, path: &Path, changes: ConfigChanges) -> Result<()> {
    let root = owning_root(engine, path)?;
    let mut config: DbConfig = engine
        .registry()
        .config(&root)
        .unwrap_or_else(|| engine.registry().defaults().clone());

    if let Some(parser) = changes.parser {
        config.parser = parser;
    }
    if let Some(auto_update) = changes.auto_update {
        config.auto_update = auto_update;
    }
    if let Some(use_library_dbs) = changes.use_library_dbs {
        config.use_library_dbs = use_library_dbs;
    }
    if let Some(list) = changes.libraries_from {
        config.library_dbs_from_text(&fs::read_to_string(list)?);
    }

    engine.registry().set_config(&root, config)?;
    println!("Saved settings of {}", root.display());
    Ok(())
}
