//! Engine
//!
//! Owns the registry, the pipeline and the update scheduler, and wires them
//! together: every command it submits gets a continuation that returns the
//! database handle, replays one deferred update for that database, parses
//! query output and only then calls back the caller.
//!
//! Creation order: config, tools, pipeline (with its pump), registry,
//! scheduler. Teardown is dropping the engine and then the pump once
//! [`CompletionPump::drain`] has returned.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tokio::runtime::Handle;

use crate::command::{Command, CommandKind, QueryFlags};
use crate::config::{EngineConfig, DB_CONFIG_FILENAME};
use crate::db::record::has_index;
use crate::db::{canonical, Acquired, DbHandle, DbRegistry};
use crate::error::{EngineError, Result};
use crate::parser::{self, MatchSet};
use crate::pipeline::{self, CompletionPump, Pipeline, Tools};
use crate::scheduler::{ReplayAttempt, UpdateScheduler};

/// Outcome of submitting a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Submit {
    Started,
    /// The database is locked; try again later
    Busy(PathBuf),
    NoDatabase,
    /// The pipeline refused the command
    Rejected,
}

impl Submit {
    pub fn is_started(&self) -> bool {
        matches!(self, Submit::Started)
    }
}

/// Outcome of a single-file update request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    Started,
    /// The database was locked; the file will be replayed later
    Deferred,
    NoDatabase,
    Rejected,
}

/// What a query continuation receives. The handle has already been returned.
#[derive(Debug)]
pub struct QueryReply {
    pub command: Command,
    pub matches: MatchSet,
}

impl QueryReply {
    fn new(command: Command) -> Self {
        let matches = MatchSet::from_command(&command);
        Self { command, matches }
    }

    /// Names (symbols or paths) of a completion query, sorted and
    /// de-duplicated.
    pub fn names(&self) -> Vec<String> {
        parser::completions(self.command.output())
    }
}

/// A caller continuation shared with a follow-up command, so that it can
/// still be called when the pipeline refuses that command.
struct Handoff<F>(Arc<Mutex<Option<F>>>);

impl<F> Handoff<F> {
    fn new(cont: F) -> Self {
        Self(Arc::new(Mutex::new(Some(cont))))
    }

    fn take(&self) -> Option<F> {
        self.0.lock().unwrap_or_else(|e| e.into_inner()).take()
    }
}

impl<F> Clone for Handoff<F> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

struct EngineInner {
    registry: DbRegistry,
    pipeline: Pipeline,
    scheduler: UpdateScheduler,
}

#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

impl Engine {
    /// Locates the binaries and builds the engine.
    ///
    /// Fails with [`EngineError::ConfigurationFatal`] if the binaries are
    /// missing; the caller should report it once and disable everything.
    pub fn start(config: &EngineConfig, runtime: Handle) -> Result<(Self, CompletionPump)> {
        let tools = Tools::locate(&config.tools)?;
        Ok(Self::with_tools(config, tools, runtime))
    }

    pub fn with_tools(config: &EngineConfig, tools: Tools, runtime: Handle) -> (Self, CompletionPump) {
        let (pipeline, pump) = pipeline::channel(tools, runtime);
        let inner = EngineInner {
            registry: DbRegistry::new(config.defaults.clone()),
            pipeline,
            scheduler: UpdateScheduler::new(config.max_replay_attempts),
        };
        (
            Self {
                inner: Arc::new(inner),
            },
            pump,
        )
    }

    pub fn registry(&self) -> &DbRegistry {
        &self.inner.registry
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.inner.pipeline
    }

    pub fn scheduler(&self) -> &UpdateScheduler {
        &self.inner.scheduler
    }

    /// Releases the command's handle and replays one deferred update for its
    /// database. Runs first in every continuation.
    fn finish(&self, command: &mut Command) {
        if let Err(e) = command.release_db() {
            tracing::error!("{}: {}", command.name(), e);
        }
        if let Some(root) = command.db_root() {
            self.replay_one(root);
        }
    }

    /// Runs a write command, handing the finished command to `cont`.
    fn run_write<F>(&self, kind: CommandKind, handle: DbHandle, tag: String, cont: F) -> bool
    where
        F: FnOnce(Command) + Send + 'static,
    {
        let engine = self.clone();
        let command = Command::new(kind, handle, tag);
        self.pipeline().run(command, move |mut cmd| {
            engine.finish(&mut cmd);
            cont(cmd);
        })
    }

    // === Database maintenance ===

    /// Builds (or rebuilds) the database rooted at `root`, registering the
    /// root first if it is unknown.
    ///
    /// A root that had neither index files nor a config before is forgotten
    /// again if its first build fails. Existing databases are never removed.
    pub fn create_database<F>(&self, root: &Path, cont: F) -> Submit
    where
        F: FnOnce(Command) + Send + 'static,
    {
        let root = canonical(root);
        let registry = self.registry();

        let mut fresh = false;
        let handle = match registry.acquire_root(&root, true) {
            Acquired::Granted(handle) => handle,
            Acquired::Busy(root) => return Submit::Busy(root),
            Acquired::Unknown => {
                let on_disk = has_index(&root) || root.join(DB_CONFIG_FILENAME).is_file();
                match registry.register(&root) {
                    Ok(_) => fresh = !on_disk,
                    Err(EngineError::AlreadyRegistered(_)) => {}
                    Err(e) => {
                        tracing::warn!("Cannot register {}: {}", root.display(), e);
                        return Submit::NoDatabase;
                    }
                }
                match registry.acquire_root(&root, true) {
                    Acquired::Granted(handle) => handle,
                    Acquired::Busy(root) => return Submit::Busy(root),
                    Acquired::Unknown => return Submit::NoDatabase,
                }
            }
        };

        tracing::info!("Creating database in {}", root.display());
        let engine = self.clone();
        let tag = root.display().to_string();
        let started = self.run_write(CommandKind::CreateDatabase, handle, tag, move |cmd| {
            if cmd.is_error() && fresh {
                if let Some(root) = cmd.db_root() {
                    if let Err(e) = engine.registry().unregister(root) {
                        tracing::warn!("Cannot forget {}: {}", root.display(), e);
                    }
                }
            }
            cont(cmd);
        });

        if started {
            Submit::Started
        } else {
            Submit::Rejected
        }
    }

    /// Re-indexes one file, or defers it while its database is locked.
    pub fn update_single_file(&self, file: &Path) -> UpdateOutcome {
        self.update_single_file_with(file, |cmd| {
            if cmd.is_error() {
                tracing::warn!("{} failed: {}", cmd.name(), cmd.output());
            }
        })
    }

    pub fn update_single_file_with<F>(&self, file: &Path, cont: F) -> UpdateOutcome
    where
        F: FnOnce(Command) + Send + 'static,
    {
        let file = canonical(file);
        match self.registry().acquire(&file, true) {
            Acquired::Granted(handle) => {
                let tag = file.display().to_string();
                if self.run_write(CommandKind::UpdateSingleFile, handle, tag, cont) {
                    UpdateOutcome::Started
                } else {
                    UpdateOutcome::Rejected
                }
            }
            Acquired::Busy(_) => {
                self.scheduler().defer(&file);
                UpdateOutcome::Deferred
            }
            Acquired::Unknown => UpdateOutcome::NoDatabase,
        }
    }

    /// Starts one deferred update for the database at `root`.
    ///
    /// Files under a nested database root are left for that database.
    pub fn replay_one(&self, root: &Path) -> bool {
        let belongs = |file: &Path| {
            self.registry()
                .root_of(file)
                .map_or(true, |owner| owner.as_path() == root)
        };
        self.scheduler().replay_one(root, belongs, |file| match self.update_single_file(file) {
            UpdateOutcome::Started => ReplayAttempt::Started,
            UpdateOutcome::Deferred => ReplayAttempt::Busy,
            UpdateOutcome::NoDatabase | UpdateOutcome::Rejected => ReplayAttempt::Failed,
        })
    }

    /// Re-indexes a saved file if its database wants automatic updates.
    pub fn on_file_saved(&self, file: &Path) -> Option<UpdateOutcome> {
        let config = self.registry().config(file)?;
        if !config.auto_update {
            return None;
        }
        Some(self.update_single_file(file))
    }

    /// Removes the database owning `path` and its files.
    pub fn delete_database(&self, path: &Path) -> Result<()> {
        self.registry().unregister(path)
    }

    /// Rebuilds every existing library database configured for the database
    /// owning `path`. Returns how many builds were started.
    pub fn rebuild_library_databases(&self, path: &Path) -> usize {
        let config = self
            .registry()
            .config(path)
            .unwrap_or_else(|| self.registry().defaults().clone());

        let mut started = 0;
        for lib in config.library_dbs.iter().filter(|lib| lib.is_dir()) {
            let submit = self.create_database(lib, |cmd| {
                if cmd.is_error() {
                    tracing::warn!("Library database build failed: {}", cmd.output());
                }
            });
            match submit {
                Submit::Started => started += 1,
                other => tracing::warn!("Library database {} not rebuilt: {:?}", lib.display(), other),
            }
        }
        started
    }

    // === Queries ===

    /// Runs a query of `kind` against the database owning `path`.
    ///
    /// Find-definition and find-reference queries without results are
    /// retried once as find-symbol before `cont` is called. Symbol completion
    /// runs a second pass over symbols without a definition and merges both.
    pub fn query<F>(&self, kind: CommandKind, path: &Path, tag: &str, flags: QueryFlags, cont: F) -> Submit
    where
        F: FnOnce(QueryReply) + Send + 'static,
    {
        debug_assert!(kind.is_query(), "{:?} is not a query", kind);

        let handle = match self.registry().acquire(path, false) {
            Acquired::Granted(handle) => handle,
            Acquired::Busy(root) => return Submit::Busy(root),
            Acquired::Unknown => return Submit::NoDatabase,
        };
        let command = Command::new(kind, handle, tag).with_flags(flags);

        if self.submit_query(command, cont) {
            Submit::Started
        } else {
            Submit::Rejected
        }
    }

    fn submit_query<F>(&self, command: Command, cont: F) -> bool
    where
        F: FnOnce(QueryReply) + Send + 'static,
    {
        let engine = self.clone();
        self.pipeline().run(command, move |mut cmd| {
            engine.finish(&mut cmd);
            engine.follow_up(cmd, cont);
        })
    }

    fn follow_up<F>(&self, cmd: Command, cont: F)
    where
        F: FnOnce(QueryReply) + Send + 'static,
    {
        match cmd.kind() {
            CommandKind::FindDefinition | CommandKind::FindReference if cmd.no_result() => {
                self.chain(cmd, CommandKind::FindSymbol, |symbols| symbols, cont)
            }
            CommandKind::FindSymbolPrefix if !cmd.is_error() => {
                let earlier = cmd.output().to_string();
                let merge = move |mut others: Command| {
                    others.merge_earlier(&earlier);
                    others
                };
                self.chain(cmd, CommandKind::FindOtherSymbolPrefix, merge, cont)
            }
            _ => cont(QueryReply::new(cmd)),
        }
    }

    /// Re-runs the tag of `earlier` as `kind` on a fresh shared handle and
    /// hands the follow-up, passed through `merge`, to `cont`. If the
    /// follow-up cannot run, `cont` gets `earlier` as it is.
    fn chain<M, F>(&self, earlier: Command, kind: CommandKind, merge: M, cont: F)
    where
        M: FnOnce(Command) -> Command + Send + 'static,
        F: FnOnce(QueryReply) + Send + 'static,
    {
        let handle = earlier
            .db_root()
            .and_then(|root| self.registry().acquire_root(root, false).granted());
        let Some(handle) = handle else {
            return cont(QueryReply::new(earlier));
        };

        tracing::debug!("{} {:?} done, running {:?}", earlier.name(), earlier.tag(), kind);
        let command = Command::new(kind, handle, earlier.tag()).with_flags(earlier.flags());

        let handoff = Handoff::new(cont);
        let later = handoff.clone();
        let next: Box<dyn FnOnce(QueryReply) + Send> = Box::new(move |reply: QueryReply| {
            if let Some(cont) = later.take() {
                cont(QueryReply::new(merge(reply.command)));
            }
        });
        let started = self.submit_query(command, next);
        if !started {
            if let Some(cont) = handoff.take() {
                cont(QueryReply::new(earlier));
            }
        }
    }

    pub fn find_definition<F>(&self, path: &Path, tag: &str, flags: QueryFlags, cont: F) -> Submit
    where
        F: FnOnce(QueryReply) + Send + 'static,
    {
        self.query(CommandKind::FindDefinition, path, tag, flags, cont)
    }

    pub fn find_reference<F>(&self, path: &Path, tag: &str, flags: QueryFlags, cont: F) -> Submit
    where
        F: FnOnce(QueryReply) + Send + 'static,
    {
        self.query(CommandKind::FindReference, path, tag, flags, cont)
    }

    pub fn find_file<F>(&self, path: &Path, tag: &str, flags: QueryFlags, cont: F) -> Submit
    where
        F: FnOnce(QueryReply) + Send + 'static,
    {
        self.query(CommandKind::FindFile, path, tag, flags, cont)
    }

    pub fn grep<F>(&self, path: &Path, pattern: &str, flags: QueryFlags, cont: F) -> Submit
    where
        F: FnOnce(QueryReply) + Send + 'static,
    {
        self.query(CommandKind::Grep, path, pattern, flags, cont)
    }

    /// Symbol names starting with `prefix`; see [`QueryReply::names`].
    pub fn complete<F>(&self, path: &Path, prefix: &str, flags: QueryFlags, cont: F) -> Submit
    where
        F: FnOnce(QueryReply) + Send + 'static,
    {
        self.query(CommandKind::FindSymbolPrefix, path, prefix, flags, cont)
    }

    /// File paths with a component starting with `prefix`; see
    /// [`QueryReply::names`].
    pub fn complete_file<F>(&self, path: &Path, prefix: &str, flags: QueryFlags, cont: F) -> Submit
    where
        F: FnOnce(QueryReply) + Send + 'static,
    {
        self.query(CommandKind::FindFilePrefix, path, &format!("/{}", prefix), flags, cont)
    }

    /// Asks `global` for its version. No database is involved.
    pub fn version<F>(&self, cont: F) -> bool
    where
        F: FnOnce(Command) + Send + 'static,
    {
        self.pipeline().run(Command::version(), cont)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::command::CommandStatus;
    use crate::db::LockState;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Fake GNU Global: `global` answers from files, `gtags` writes GTAGS.
    struct Fixture {
        _bin: TempDir,
        project: TempDir,
        engine: Engine,
        pump: CompletionPump,
    }

    fn write_script(path: &Path, body: &str) {
        fs::write(path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        fs::set_permissions(path, fs::Permissions::from_mode(0o755)).unwrap();
    }

    fn fixture(global_body: &str) -> Fixture {
        let bin = TempDir::new().unwrap();
        let global = bin.path().join("global");
        let gtags = bin.path().join("gtags");
        write_script(&global, global_body);
        write_script(
            &gtags,
            "if [ \"$1\" = \"--single-update\" ]; then echo \"$2\" >> GUPDATES; else : > GTAGS; : > GRTAGS; : > GPATH; fi",
        );

        let project = TempDir::new().unwrap();
        fs::create_dir_all(project.path().join("src")).unwrap();
        let (engine, pump) = Engine::with_tools(
            &EngineConfig::default(),
            Tools::from_paths(global, gtags),
            Handle::current(),
        );
        Fixture {
            _bin: bin,
            project,
            engine,
            pump,
        }
    }

    fn root(fx: &Fixture) -> PathBuf {
        canonical(fx.project.path())
    }

    #[tokio::test]
    async fn test_create_then_query() {
        let mut fx = fixture("echo \"main 3 src/a.c int main(void)\"");
        let root = root(&fx);

        let built = Arc::new(Mutex::new(None));
        let sink = built.clone();
        let submit = fx
            .engine
            .create_database(&root, move |cmd| *sink.lock().unwrap() = Some(cmd.status()));
        assert_eq!(submit, Submit::Started);
        fx.pump.drain().await;

        assert_eq!(*built.lock().unwrap(), Some(CommandStatus::NoResult));
        assert!(root.join("GTAGS").is_file());
        assert_eq!(fx.engine.registry().lock_state(&root), Some(LockState::Free));

        let reply = Arc::new(Mutex::new(None));
        let sink = reply.clone();
        let submit = fx.engine.find_definition(
            &root.join("src/a.c"),
            "main",
            QueryFlags::default(),
            move |r| *sink.lock().unwrap() = Some(r),
        );
        assert_eq!(submit, Submit::Started);
        fx.pump.drain().await;

        let reply = reply.lock().unwrap().take().unwrap();
        assert_eq!(reply.command.status(), CommandStatus::Ok);
        assert!(!reply.command.holds_db());
        assert_eq!(reply.matches.project, root);
        assert_eq!(reply.matches.files[0].file, "src/a.c");
        assert_eq!(reply.matches.files[0].matches[0].line, 3);
    }

    #[tokio::test]
    async fn test_definition_falls_back_to_symbol() {
        // Only `-s` queries print anything
        let mut fx = fixture("if [ \"$1\" = \"-s\" ]; then echo \"foo 8 lib.c foo();\"; fi");
        let root = root(&fx);
        fs::write(root.join("GTAGS"), b"").unwrap();

        let reply = Arc::new(Mutex::new(None));
        let sink = reply.clone();
        fx.engine.find_definition(&root, "foo", QueryFlags::default(), move |r| {
            *sink.lock().unwrap() = Some(r);
        });
        fx.pump.drain().await;

        let reply = reply.lock().unwrap().take().unwrap();
        assert_eq!(reply.command.kind(), CommandKind::FindSymbol);
        assert_eq!(reply.matches.files[0].file, "lib.c");
        assert_eq!(fx.engine.registry().outstanding_handles(), 0);
    }

    #[tokio::test]
    async fn test_grep_without_results_does_not_fall_back() {
        let mut fx = fixture("exit 0");
        let root = root(&fx);
        fs::write(root.join("GTAGS"), b"").unwrap();

        let reply = Arc::new(Mutex::new(None));
        let sink = reply.clone();
        fx.engine.grep(&root, "nothing", QueryFlags::default(), move |r| {
            *sink.lock().unwrap() = Some(r);
        });
        fx.pump.drain().await;

        let reply = reply.lock().unwrap().take().unwrap();
        assert_eq!(reply.command.kind(), CommandKind::Grep);
        assert!(reply.command.no_result());
        assert!(reply.matches.is_empty());
    }

    #[tokio::test]
    async fn test_query_without_database() {
        let fx = fixture("exit 0");
        let submit = fx
            .engine
            .find_file(&root(&fx).join("src"), "a.c", QueryFlags::default(), |_| {});
        assert_eq!(submit, Submit::NoDatabase);
    }

    #[tokio::test]
    async fn test_busy_update_is_deferred_and_replayed() {
        let mut fx = fixture("echo \"x 1 src/a.c y\"");
        let root = root(&fx);
        fs::write(root.join("GTAGS"), b"").unwrap();
        let file = root.join("src/a.c");
        fs::write(&file, b"int x;").unwrap();

        // A running query holds a shared handle
        let reader = fx.engine.registry().acquire(&root, false).granted().unwrap();
        assert_eq!(fx.engine.update_single_file(&file), UpdateOutcome::Deferred);
        assert_eq!(fx.engine.update_single_file(&file), UpdateOutcome::Deferred);
        assert_eq!(fx.engine.scheduler().pending(), vec![file.clone()]);
        drop(reader);

        // The next completion on that database replays the update
        fx.engine.find_reference(&root, "x", QueryFlags::default(), |_| {});
        fx.pump.drain().await;

        assert!(fx.engine.scheduler().is_empty());
        let updates = fs::read_to_string(root.join("GUPDATES")).unwrap();
        assert_eq!(updates.trim(), file.display().to_string());
        assert_eq!(fx.engine.registry().outstanding_handles(), 0);
    }

    #[tokio::test]
    async fn test_auto_update_respects_config() {
        let fx = fixture("exit 0");
        let root = root(&fx);
        fs::write(root.join("GTAGS"), b"").unwrap();
        fx.engine.registry().register(&root).unwrap();

        let mut config = fx.engine.registry().config(&root).unwrap();
        config.auto_update = false;
        fx.engine.registry().set_config(&root, config).unwrap();
        assert_eq!(fx.engine.on_file_saved(&root.join("src/a.c")), None);

        assert_eq!(fx.engine.on_file_saved(Path::new("/nowhere/at/all.c")), None);
    }

    #[tokio::test]
    async fn test_failed_create_forgets_fresh_root() {
        let bin = TempDir::new().unwrap();
        let global = bin.path().join("global");
        let gtags = bin.path().join("gtags");
        write_script(&global, "exit 0");
        write_script(&gtags, "echo 'gtags: cannot write' >&2; exit 1");
        let project = TempDir::new().unwrap();
        let (engine, mut pump) = Engine::with_tools(
            &EngineConfig::default(),
            Tools::from_paths(global, gtags),
            Handle::current(),
        );

        let status = Arc::new(Mutex::new(None));
        let sink = status.clone();
        engine.create_database(project.path(), move |cmd| {
            *sink.lock().unwrap() = Some((cmd.status(), cmd.output().to_string()));
        });
        pump.drain().await;

        let (status, output) = status.lock().unwrap().take().unwrap();
        assert_eq!(status, CommandStatus::RunError);
        assert_eq!(output, "gtags: cannot write");
        assert!(engine.registry().roots().is_empty());
    }

    #[tokio::test]
    async fn test_create_refused_while_querying() {
        let fx = fixture("exit 0");
        let root = root(&fx);
        fx.engine.registry().register(&root).unwrap();
        let _reader = fx.engine.registry().acquire(&root, false).granted().unwrap();

        assert!(matches!(fx.engine.create_database(&root, |_| {}), Submit::Busy(_)));
    }

    #[tokio::test]
    async fn test_completion_names() {
        let mut fx = fixture("printf 'get_id\\nget_name\\nget_id\\n'");
        let root = root(&fx);
        fs::write(root.join("GTAGS"), b"").unwrap();

        let names = Arc::new(Mutex::new(Vec::new()));
        let sink = names.clone();
        fx.engine.complete(&root, "get_", QueryFlags::default(), move |r| {
            *sink.lock().unwrap() = r.names();
        });
        fx.pump.drain().await;

        assert_eq!(*names.lock().unwrap(), vec!["get_id".to_string(), "get_name".to_string()]);
    }

    #[tokio::test]
    async fn test_completion_merges_symbols_without_definition() {
        let mut fx = fixture("case \"$2\" in -s) printf 'get_extra\\nget_id\\n' ;; *) printf 'get_id\\n' ;; esac");
        let root = root(&fx);
        fs::write(root.join("GTAGS"), b"").unwrap();

        let reply = Arc::new(Mutex::new(None));
        let sink = reply.clone();
        fx.engine.complete(&root, "get_", QueryFlags::default(), move |r| {
            *sink.lock().unwrap() = Some(r);
        });
        fx.pump.drain().await;

        let reply = reply.lock().unwrap().take().unwrap();
        assert_eq!(reply.command.kind(), CommandKind::FindOtherSymbolPrefix);
        assert_eq!(reply.command.status(), CommandStatus::Ok);
        assert_eq!(reply.names(), vec!["get_extra".to_string(), "get_id".to_string()]);
        assert_eq!(fx.engine.registry().outstanding_handles(), 0);
    }

    #[tokio::test]
    async fn test_file_completion() {
        let mut fx = fixture("for a; do last=$a; done; echo \"$last\" > LAST_TAG; printf 'src/map.h\\nsrc/main.c\\n'");
        let root = root(&fx);
        fs::write(root.join("GTAGS"), b"").unwrap();

        let names = Arc::new(Mutex::new(Vec::new()));
        let sink = names.clone();
        let submit = fx.engine.complete_file(&root, "ma", QueryFlags::default(), move |r| {
            *sink.lock().unwrap() = r.names();
        });
        assert!(submit.is_started());
        fx.pump.drain().await;

        assert_eq!(fs::read_to_string(root.join("LAST_TAG")).unwrap().trim(), "/ma");
        assert_eq!(
            *names.lock().unwrap(),
            vec!["src/main.c".to_string(), "src/map.h".to_string()]
        );
    }

    #[tokio::test]
    async fn test_refused_fallback_delivers_original() {
        // The binary disappears while the first query runs
        let mut fx = fixture("rm -f \"$0\"; exit 0");
        let root = root(&fx);
        fs::write(root.join("GTAGS"), b"").unwrap();

        let reply = Arc::new(Mutex::new(None));
        let sink = reply.clone();
        fx.engine.find_definition(&root, "gone", QueryFlags::default(), move |r| {
            *sink.lock().unwrap() = Some(r);
        });
        fx.pump.drain().await;

        let reply = reply.lock().unwrap().take().unwrap();
        assert_eq!(reply.command.kind(), CommandKind::FindDefinition);
        assert!(reply.command.no_result());
        assert_eq!(fx.engine.registry().outstanding_handles(), 0);
        assert_eq!(fx.engine.registry().lock_state(&root), Some(LockState::Free));
    }

    #[tokio::test]
    async fn test_replay_leaves_files_of_nested_database() {
        let mut fx = fixture("exit 0");
        let root = root(&fx);
        let sub = root.join("sub");
        fs::create_dir_all(&sub).unwrap();
        let nested = sub.join("x.c");
        let file = root.join("a.c");
        fs::write(&nested, b"int x;").unwrap();
        fs::write(&file, b"int a;").unwrap();
        fx.engine.registry().register(&root).unwrap();
        fx.engine.registry().register(&sub).unwrap();

        let writer = fx.engine.registry().acquire(&sub, true).granted().unwrap();
        let reader = fx.engine.registry().acquire(&root, false).granted().unwrap();
        assert_eq!(fx.engine.update_single_file(&nested), UpdateOutcome::Deferred);
        assert_eq!(fx.engine.update_single_file(&file), UpdateOutcome::Deferred);
        drop(reader);

        assert!(fx.engine.replay_one(&root));
        assert_eq!(fx.engine.scheduler().pending(), vec![nested.clone()]);
        fx.pump.drain().await;

        let updates = fs::read_to_string(root.join("GUPDATES")).unwrap();
        assert_eq!(updates.trim(), file.display().to_string());
        drop(writer);
    }

    #[tokio::test]
    async fn test_version() {
        let mut fx = fixture("echo 'global (GNU GLOBAL) 6.6.10'");
        let version = Arc::new(Mutex::new(String::new()));
        let sink = version.clone();
        assert!(fx.engine.version(move |cmd| *sink.lock().unwrap() = cmd.output().trim().to_string()));
        fx.pump.drain().await;
        assert_eq!(*version.lock().unwrap(), "global (GNU GLOBAL) 6.6.10");
    }

    #[tokio::test]
    async fn test_delete_database() {
        let mut fx = fixture("exit 0");
        let root = root(&fx);
        fx.engine.create_database(&root, |_| {});
        fx.pump.drain().await;
        assert!(root.join("GTAGS").is_file());

        fx.engine.delete_database(&root.join("src")).unwrap();
        assert!(!root.join("GTAGS").exists());
        assert!(fx.engine.registry().roots().is_empty());
    }
}
