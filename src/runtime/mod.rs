//! Runtime system
//!
//! This module contains the concurrency core the evaluator builds on: tasks,
//! channels, spawn/race groups and the failure policy ledger. A [`Runtime`]
//! is one program run; clone it freely, all clones share the same state.

pub mod channel;
pub mod env;
pub mod errors;
pub mod scheduler;
pub mod value;

pub use channel::{Channel, Recv, TrySend};
pub use env::{EnvRef, Environment};
pub use errors::{ErrorClass, ErrorKind, RuntimeError, RuntimeResult, UnhandledFailure};
pub use scheduler::{
    thunk, CancelToken, FailureLedger, RaceGroup, Task, TaskContext, TaskFailurePolicy, TaskGroup,
    TaskId, TaskState, Thunk,
};
pub use value::{Function, Value};

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, error, warn};

use crate::debugger::ExecutionHooks;
use crate::runtime::scheduler::{cancel, LedgerAction, TaskIdGenerator};
use crate::util::config::RuntimeConfig;

struct Shared {
    config: RuntimeConfig,
    ids: TaskIdGenerator,
    ledger: FailureLedger,
    hooks: Option<Arc<dyn ExecutionHooks>>,
    /// Cancellation tokens of every unresolved task.
    live: Mutex<HashMap<TaskId, Arc<CancelToken>>>,
    /// Token of the main execution thread (the one inside [`Runtime::run`]).
    root: Arc<CancelToken>,
    /// First fatal fail-fast error, once the run is aborting.
    abort: Mutex<Option<RuntimeError>>,
}

/// Handle to one program run.
#[derive(Clone)]
pub struct Runtime {
    shared: Arc<Shared>,
}

impl fmt::Debug for Runtime {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("policy", &self.policy())
            .field("live_tasks", &self.live_tasks())
            .field("aborted", &self.is_aborted())
            .finish()
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new(RuntimeConfig::default())
    }
}

impl Runtime {
    /// Create a runtime without execution hooks.
    pub fn new(config: RuntimeConfig) -> Self {
        Self::build(config, None)
    }

    /// Create a runtime whose task threads report to `hooks` (a debugger).
    pub fn with_hooks(
        config: RuntimeConfig,
        hooks: Arc<dyn ExecutionHooks>,
    ) -> Self {
        Self::build(config, Some(hooks))
    }

    fn build(
        config: RuntimeConfig,
        hooks: Option<Arc<dyn ExecutionHooks>>,
    ) -> Self {
        debug!("runtime created (policy {})", config.task_failure_policy);
        Self {
            shared: Arc::new(Shared {
                ledger: FailureLedger::new(config.task_failure_policy),
                config,
                ids: TaskIdGenerator::new(),
                hooks,
                live: Mutex::new(HashMap::new()),
                root: CancelToken::new(),
                abort: Mutex::new(None),
            }),
        }
    }

    #[inline]
    pub fn config(&self) -> &RuntimeConfig {
        &self.shared.config
    }

    #[inline]
    pub fn policy(&self) -> TaskFailurePolicy {
        self.shared.ledger.policy()
    }

    #[inline]
    pub fn ledger(&self) -> &FailureLedger {
        &self.shared.ledger
    }

    /// Hooks installed for this run, if any.
    pub fn hooks(&self) -> Option<Arc<dyn ExecutionHooks>> {
        self.shared.hooks.clone()
    }

    /// Number of tasks that have not resolved yet.
    pub fn live_tasks(&self) -> usize {
        self.shared.live.lock().len()
    }

    #[inline]
    pub(crate) fn next_task_id(&self) -> TaskId {
        self.shared.ids.next()
    }

    pub(crate) fn register_live(
        &self,
        id: TaskId,
        token: &Arc<CancelToken>,
    ) {
        if self.is_aborted() {
            token.cancel();
        }
        self.shared.live.lock().insert(id, Arc::clone(token));
    }

    pub(crate) fn unregister_live(
        &self,
        id: TaskId,
    ) {
        self.shared.live.lock().remove(&id);
    }

    /// `&expr`: start `f` on its own thread.
    pub fn spawn<F>(
        &self,
        f: F,
    ) -> Task
    where
        F: FnOnce(&TaskContext) -> RuntimeResult<Value> + Send + 'static,
    {
        self.spawn_named("spawn", f)
    }

    /// Like [`Runtime::spawn`] with a name for logs and debugger frames.
    pub fn spawn_named<F>(
        &self,
        name: impl Into<Arc<str>>,
        f: F,
    ) -> Task
    where
        F: FnOnce(&TaskContext) -> RuntimeResult<Value> + Send + 'static,
    {
        let task = Task::new(self, name);
        debug!("spawning {} '{}'", task.id(), task.name());
        scheduler::launch(self, &task, f);
        task
    }

    /// `& { ... }`: start every thunk; the group resolves to their values in
    /// declaration order.
    pub fn spawn_group(
        &self,
        thunks: Vec<Thunk>,
    ) -> TaskGroup {
        scheduler::group::spawn_group(self, thunks)
    }

    /// `| { ... }`: start every thunk; the group resolves to the first
    /// success. Which member wins is decided in real time and is not
    /// reproducible across runs.
    pub fn race_group(
        &self,
        thunks: Vec<Thunk>,
    ) -> RaceGroup {
        scheduler::group::race_group(self, thunks)
    }

    /// `task.then(f)` for a function value.
    pub fn then(
        &self,
        task: &Task,
        func: &Value,
    ) -> RuntimeResult<Task> {
        Ok(task.then(func.expect_function()?.clone()))
    }

    pub fn is_aborted(&self) -> bool {
        self.shared.abort.lock().is_some()
    }

    /// Poll point between statements: the fatal error once the run aborts.
    pub fn check_abort(&self) -> RuntimeResult<()> {
        match &*self.shared.abort.lock() {
            Some(fatal) => Err(fatal.clone()),
            None => Ok(()),
        }
    }

    /// Drain the ledger; an aggregate fatal error if anything was pending.
    pub fn check_unhandled_failures(&self) -> RuntimeResult<()> {
        self.shared.ledger.check()
    }

    /// The last handle of a failed task is gone; escalate its held failure.
    pub(crate) fn release_task(
        &self,
        task: TaskId,
    ) {
        if let Some(LedgerAction::Abort(fatal)) = self.shared.ledger.escalate(task) {
            self.abort(fatal);
        }
    }

    /// Abort the run: remember `fatal` and cancel every execution thread.
    fn abort(
        &self,
        fatal: RuntimeError,
    ) {
        {
            let mut slot = self.shared.abort.lock();
            if slot.is_some() {
                return;
            }
            error!("aborting run: {}", fatal);
            *slot = Some(fatal);
        }
        self.shared.root.cancel();
        let tokens: Vec<_> = self.shared.live.lock().values().cloned().collect();
        for token in tokens {
            token.cancel();
        }
    }

    /// Top-level driver: run `program` on the calling thread.
    ///
    /// The calling thread becomes the main execution thread. Failures still
    /// held behind live handles are escalated when the program returns. A
    /// fail-fast abort replaces whatever the program returned; under `defer`
    /// the ledger is drained at the end. The final outcome is reported to the hooks
    /// (`Finish` for a debugger) exactly once.
    pub fn run<F>(
        &self,
        program: F,
    ) -> RuntimeResult<Value>
    where
        F: FnOnce(&Runtime) -> RuntimeResult<Value>,
    {
        let result = {
            let _current = cancel::enter(Arc::clone(&self.shared.root));
            program(self)
        };

        // Tasks handed back in the result are the caller's to observe.
        if let Ok(value) = &result {
            value.for_each_task(&mut |task: &Task| task.attach());
        }
        if let Some(fatal) = self.shared.ledger.escalate_all() {
            self.abort(fatal);
        }

        let result = match self.check_abort() {
            Err(fatal) => Err(fatal),
            Ok(()) => match (result, self.check_unhandled_failures()) {
                (Ok(value), Ok(())) => Ok(value),
                (Ok(_), Err(unhandled)) => Err(unhandled),
                (Err(e), Ok(())) => Err(e),
                (Err(e), Err(unhandled)) => {
                    warn!("run failed with unreported task failures: {}", unhandled);
                    Err(e)
                }
            },
        };

        match &result {
            Ok(value) => debug!("run finished: {}", value),
            Err(e) => debug!("run failed: {}", e),
        }
        if let Some(hooks) = &self.shared.hooks {
            hooks.on_finish(&result);
        }
        result
    }
}
