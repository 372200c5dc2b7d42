//! Lifecycle of the two background loops.
//!
//! Each task moves `Created -> Running -> CancelRequested -> Stopped`. The
//! state is published on a watch channel so callers can wait on transitions.
//! `Stopped` is written by a guard inside the task, so it holds after a normal
//! exit, a panic, or an abort alike.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, error, info, info_span, warn};

use super::loops;
use crate::context::AppContext;
use crate::error::SupervisorError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskKind {
    FileWatch,
    ReachabilityWatch,
}

impl TaskKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FileWatch => "file_watch",
            Self::ReachabilityWatch => "reachability_watch",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Created,
    Running,
    CancelRequested,
    Stopped,
}

/// Outcome of [`Supervisor::shutdown`].
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Tasks that observed cancellation and returned on their own
    pub stopped: Vec<TaskKind>,
    /// Tasks aborted after the grace period ran out
    pub forced: Vec<TaskKind>,
}

impl ShutdownReport {
    pub fn is_clean(&self) -> bool {
        self.forced.is_empty()
    }
}

struct SupervisedTask {
    kind: TaskKind,
    state: Arc<watch::Sender<TaskState>>,
    handle: Option<JoinHandle<()>>,
}

/// Marks the task stopped when its future completes or is dropped.
struct StoppedGuard(Arc<watch::Sender<TaskState>>);

impl Drop for StoppedGuard {
    fn drop(&mut self) {
        self.0.send_replace(TaskState::Stopped);
    }
}

pub struct Supervisor {
    ctx: AppContext,
    token: CancellationToken,
    tasks: Vec<SupervisedTask>,
}

impl Supervisor {
    pub fn new(ctx: AppContext) -> Self {
        Self {
            ctx,
            token: CancellationToken::new(),
            tasks: Vec::new(),
        }
    }

    /// Spawn both loops. Must be called from within a tokio runtime.
    pub fn start(&mut self) -> Result<(), SupervisorError> {
        if !self.tasks.is_empty() || self.token.is_cancelled() {
            return Err(SupervisorError::AlreadyStarted);
        }

        self.spawn(TaskKind::ReachabilityWatch);
        self.spawn(TaskKind::FileWatch);
        info!("Supervisor started");
        Ok(())
    }

    fn spawn(&mut self, kind: TaskKind) {
        let (state_tx, _) = watch::channel(TaskState::Created);
        let state = Arc::new(state_tx);

        let ctx = self.ctx.clone();
        let token = self.token.clone();
        let task_state = state.clone();
        let span = info_span!("task", name = kind.as_str());

        let handle = tokio::spawn(
            async move {
                let _stopped = StoppedGuard(task_state.clone());
                // A cancel that lands before the first poll must not be overwritten
                task_state.send_if_modified(|s| {
                    if *s == TaskState::Created {
                        *s = TaskState::Running;
                        true
                    } else {
                        false
                    }
                });

                match kind {
                    TaskKind::FileWatch => loops::file_watch_loop(ctx, token).await,
                    TaskKind::ReachabilityWatch => {
                        loops::reachability_watch_loop(ctx, token).await
                    }
                }
            }
            .instrument(span),
        );

        self.tasks.push(SupervisedTask {
            kind,
            state,
            handle: Some(handle),
        });
    }

    pub fn states(&self) -> Vec<(TaskKind, TaskState)> {
        self.tasks
            .iter()
            .map(|task| (task.kind, *task.state.borrow()))
            .collect()
    }

    pub fn state(&self, kind: TaskKind) -> Option<TaskState> {
        self.find(kind).map(|task| *task.state.borrow())
    }

    /// Watch a task's state transitions.
    pub fn subscribe(&self, kind: TaskKind) -> Option<watch::Receiver<TaskState>> {
        self.find(kind).map(|task| task.state.subscribe())
    }

    fn find(&self, kind: TaskKind) -> Option<&SupervisedTask> {
        self.tasks.iter().find(|task| task.kind == kind)
    }

    /// Cancel both loops and wait for them, at most `grace` in total.
    ///
    /// Returns only once every task is `Stopped`; stragglers are aborted.
    pub async fn shutdown(mut self, grace: Duration) -> ShutdownReport {
        for task in &self.tasks {
            task.state.send_if_modified(|s| {
                if *s == TaskState::Stopped {
                    false
                } else {
                    *s = TaskState::CancelRequested;
                    true
                }
            });
        }

        info!(grace_ms = grace.as_millis() as u64, "Supervisor shutting down");
        self.token.cancel();

        let deadline = Instant::now() + grace;
        let mut report = ShutdownReport::default();

        for task in &mut self.tasks {
            let Some(mut handle) = task.handle.take() else {
                continue;
            };

            match tokio::time::timeout_at(deadline, &mut handle).await {
                Ok(Ok(())) => report.stopped.push(task.kind),
                Ok(Err(e)) => {
                    error!(task = task.kind.as_str(), error = %e, "Task ended abnormally");
                    report.stopped.push(task.kind);
                }
                Err(_) => {
                    warn!(task = task.kind.as_str(), "Task ignored cancellation, aborting");
                    handle.abort();
                    let _ = handle.await;
                    report.forced.push(task.kind);
                }
            }

            task.state.send_replace(TaskState::Stopped);
        }

        info!(
            stopped = report.stopped.len(),
            forced = report.forced.len(),
            "Supervisor stopped"
        );
        report
    }
}

impl Drop for Supervisor {
    /// A supervisor dropped without `shutdown` still stops its loops.
    fn drop(&mut self) {
        self.token.cancel();
    }
}
