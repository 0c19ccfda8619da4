//! Command Pipeline
//!
//! Runs external GNU Global processes off the caller's thread. Each accepted
//! command gets its own worker task; when the process exits, the finished
//! command travels back over a channel and its continuation is invoked by the
//! [`CompletionPump`] on the coordinating context. That channel is the only
//! hand-off between workers and the coordinating context.

pub mod tools;

use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::runtime::Handle;
use tokio::sync::mpsc;

use crate::command::Command;

pub use tools::Tools;

/// Environment variable through which `global` finds library databases.
pub const LIBRARY_PATH_ENV: &str = "GTAGSLIBPATH";

/// Logic invoked exactly once with a command in terminal status.
pub type Continuation = Box<dyn FnOnce(Command) + Send + 'static>;

struct Finished {
    command: Command,
    continuation: Continuation,
}

/// Submitting side of the pipeline. Cheap to clone.
#[derive(Clone)]
pub struct Pipeline {
    tools: Arc<Tools>,
    runtime: Handle,
    sender: mpsc::UnboundedSender<Finished>,
    in_flight: Arc<AtomicUsize>,
    unavailable_reported: Arc<AtomicBool>,
}

/// Receiving side of the pipeline, owned by the coordinating context.
pub struct CompletionPump {
    receiver: mpsc::UnboundedReceiver<Finished>,
    in_flight: Arc<AtomicUsize>,
}

/// Creates a pipeline whose workers run on `runtime`.
pub fn channel(tools: Tools, runtime: Handle) -> (Pipeline, CompletionPump) {
    let (sender, receiver) = mpsc::unbounded_channel();
    let in_flight = Arc::new(AtomicUsize::new(0));

    let pipeline = Pipeline {
        tools: Arc::new(tools),
        runtime,
        sender,
        in_flight: in_flight.clone(),
        unavailable_reported: Arc::new(AtomicBool::new(false)),
    };
    let pump = CompletionPump {
        receiver,
        in_flight,
    };
    (pipeline, pump)
}

impl Pipeline {
    /// Submits `command` and returns immediately.
    ///
    /// Returns `false` and schedules nothing if the binaries have gone
    /// missing; the command is dropped, which releases its database handle.
    /// Otherwise `continuation` is invoked exactly once by the pump. It is
    /// responsible for releasing the handle the command holds.
    pub fn run<F>(&self, mut command: Command, continuation: F) -> bool
    where
        F: FnOnce(Command) + Send + 'static,
    {
        if !self.tools.is_available() {
            if !self.unavailable_reported.swap(true, Ordering::SeqCst) {
                tracing::error!("GNU Global binaries are no longer available, commands are disabled");
            }
            return false;
        }

        self.in_flight.fetch_add(1, Ordering::SeqCst);
        let tools = self.tools.clone();
        let sender = self.sender.clone();
        let in_flight = self.in_flight.clone();

        self.runtime.spawn(async move {
            execute(&tools, &mut command).await;

            let finished = Finished {
                command,
                continuation: Box::new(continuation),
            };
            if let Err(mpsc::error::SendError(finished)) = sender.send(finished) {
                tracing::warn!("Completion pump gone, dropping result of {}", finished.command.name());
                in_flight.fetch_sub(1, Ordering::SeqCst);
            }
        });
        true
    }

    pub fn tools(&self) -> &Tools {
        &self.tools
    }

    /// Commands submitted whose continuation has not run yet.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }
}

async fn execute(tools: &Tools, command: &mut Command) {
    let kind = command.kind();
    let program = tools.path(kind.tool()).to_path_buf();

    let mut process = tokio::process::Command::new(&program);
    process
        .args(kind.args(command.tag(), command.flags(), command.db_config().parser))
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    if let Some(root) = command.db_root() {
        process.current_dir(root);
    }
    if let Some(paths) = command.db_config().library_path_env() {
        process.env(LIBRARY_PATH_ENV, paths);
    }

    tracing::debug!("Running {} ({:?}) for {:?}", program.display(), kind, command.tag());

    match process.output().await {
        Ok(output) => {
            let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
            let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
            command.complete(output.status.code(), stdout, stderr);
            if command.is_error() {
                tracing::warn!("{} failed: {}", command.name(), command.output());
            }
        }
        Err(e) => {
            tracing::warn!("Failed to launch {}: {}", program.display(), e);
            command.fail(format!("Failed to run {}: {}", program.display(), e));
        }
    }
}

impl CompletionPump {
    fn dispatch(&self, finished: Finished) {
        let Finished {
            command,
            continuation,
        } = finished;
        tracing::debug!("{} finished with {:?}", command.name(), command.status());
        continuation(command);
        // After the continuation, so that follow-up commands it submits keep
        // the count above zero
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }

    /// Waits for the next finished command and runs its continuation.
    /// Returns `false` once every pipeline clone has been dropped.
    pub async fn dispatch_next(&mut self) -> bool {
        match self.receiver.recv().await {
            Some(finished) => {
                self.dispatch(finished);
                true
            }
            None => false,
        }
    }

    /// Runs the continuations of all commands that have already finished.
    pub fn dispatch_ready(&mut self) -> usize {
        let mut count = 0;
        while let Ok(finished) = self.receiver.try_recv() {
            self.dispatch(finished);
            count += 1;
        }
        count
    }

    /// Dispatches until no submitted command is left, including follow-up
    /// commands submitted by continuations.
    pub async fn drain(&mut self) {
        while self.in_flight() > 0 {
            if !self.dispatch_next().await {
                break;
            }
        }
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }
}
