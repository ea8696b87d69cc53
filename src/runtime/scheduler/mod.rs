//! Task scheduler
//!
//! Every spawned task runs on its own named OS thread. Blocking operations
//! (`send`, `recv`, `wait`, a debugger pause) suspend only that thread.
//!
//! - [`task`] - task handles, result cells and continuations
//! - [`cancel`] - cooperative cancellation tokens
//! - [`group`] - spawn groups (ordered, all must finish) and race groups (first success)
//! - [`ledger`] - failure policy ledger

pub mod cancel;
pub mod group;
pub mod ledger;
pub mod task;

pub use cancel::CancelToken;
pub use group::{RaceGroup, TaskGroup};
pub use ledger::{FailureLedger, LedgerAction, TaskFailurePolicy};
pub use task::{Task, TaskId, TaskIdGenerator, TaskState};

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::thread;

use serde::{Deserialize, Serialize};
use tracing::{error, trace};

use crate::runtime::errors::{RuntimeError, RuntimeResult};
use crate::runtime::value::Value;
use crate::runtime::Runtime;

/// Boxed unit of work handed to a spawn or race group.
pub type Thunk = Box<dyn FnOnce(&TaskContext) -> RuntimeResult<Value> + Send>;

/// Box a closure as a [`Thunk`].
pub fn thunk<F>(f: F) -> Thunk
where
    F: FnOnce(&TaskContext) -> RuntimeResult<Value> + Send + 'static,
{
    Box::new(f)
}

/// Scheduler configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Prefix of task thread names; the task number is appended.
    pub thread_name_prefix: String,
    /// Stack size for task threads, in bytes.
    pub stack_size: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            thread_name_prefix: "braid-task".to_string(),
            stack_size: 2 * 1024 * 1024,
        }
    }
}

/// What a running thunk can see of its surroundings.
#[derive(Debug, Clone)]
pub struct TaskContext {
    runtime: Runtime,
    task: Task,
}

impl TaskContext {
    /// The runtime the task belongs to, for spawning nested tasks.
    #[inline]
    pub fn runtime(&self) -> &Runtime {
        &self.runtime
    }

    /// The task being executed.
    #[inline]
    pub fn task(&self) -> &Task {
        &self.task
    }

    #[inline]
    pub fn is_canceled(&self) -> bool {
        self.task.is_canceled()
    }

    /// `Err(Canceled)` if cancellation was requested.
    #[inline]
    pub fn check_canceled(&self) -> RuntimeResult<()> {
        self.task.cancel_token().check()
    }
}

/// Start `job` on a fresh thread, resolving `task` with its outcome.
pub(crate) fn launch<F>(
    runtime: &Runtime,
    task: &Task,
    job: F,
) where
    F: FnOnce(&TaskContext) -> RuntimeResult<Value> + Send + 'static,
{
    let config = &runtime.config().scheduler;
    let ctx = TaskContext {
        runtime: runtime.clone(),
        task: task.clone(),
    };

    let spawned = thread::Builder::new()
        .name(format!("{}-{}", config.thread_name_prefix, task.id().inner()))
        .stack_size(config.stack_size)
        .spawn(move || run_task(ctx, job));

    if let Err(e) = spawned {
        error!("failed to spawn thread for {}: {}", task.id(), e);
        task.settle(Err(RuntimeError::SpawnFailed {
            task: task.id(),
            message: e.to_string(),
        }));
    }
}

/// Task thread body.
fn run_task<F>(
    ctx: TaskContext,
    job: F,
) where
    F: FnOnce(&TaskContext) -> RuntimeResult<Value>,
{
    let task = ctx.task.clone();
    let _current = cancel::enter(task.cancel_token().clone());
    let hooks = ctx.runtime.hooks();
    if let Some(hooks) = &hooks {
        hooks.on_thread_start(task.id());
    }
    trace!("{} '{}' started", task.id(), task.name());

    let result = match panic::catch_unwind(AssertUnwindSafe(|| job(&ctx))) {
        Ok(result) => result,
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            error!("{} '{}' panicked: {}", task.id(), task.name(), message);
            Err(RuntimeError::TaskPanicked {
                task: task.id(),
                message,
            })
        }
    };

    if let Some(hooks) = &hooks {
        hooks.on_thread_exit(task.id());
    }
    task.settle(result);
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests;
