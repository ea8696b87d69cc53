//! Task handles.
//!
//! A [`Task`] is a cheap, clonable handle to one unit of concurrent work. Its
//! result cell is written exactly once (Running -> Completed | Failed |
//! Canceled) and is read-only afterwards; every `wait` sees the same outcome.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use smallvec::SmallVec;
use tracing::{debug, trace};

use crate::runtime::errors::{RuntimeError, RuntimeResult, UnhandledFailure};
use crate::runtime::scheduler::cancel::{self, CancelToken};
use crate::runtime::value::{Function, Value};
use crate::runtime::Runtime;

/// Unique task identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(pub u64);

impl TaskId {
    /// Get the inner value.
    #[inline]
    pub fn inner(&self) -> u64 {
        self.0
    }
}

impl From<u64> for TaskId {
    fn from(val: u64) -> Self {
        Self(val)
    }
}

impl fmt::Display for TaskId {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "Task({})", self.0)
    }
}

/// Generator for task IDs, shared by every thread of one runtime.
#[derive(Debug, Default)]
pub struct TaskIdGenerator {
    next_id: AtomicU64,
}

impl TaskIdGenerator {
    /// Create a new task ID generator.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Generate the next task ID.
    #[inline]
    #[allow(clippy::should_implement_trait)]
    pub fn next(&self) -> TaskId {
        TaskId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }
}

/// Task state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// Task has not resolved yet.
    Running,
    /// Task produced a value.
    Completed,
    /// Task produced an error.
    Failed,
    /// Task was canceled and stopped at a synchronization point.
    Canceled,
}

impl TaskState {
    /// Convert from u8 (for atomic storage).
    #[inline]
    pub fn from_u8(val: u8) -> Self {
        match val {
            1 => TaskState::Completed,
            2 => TaskState::Failed,
            3 => TaskState::Canceled,
            _ => TaskState::Running,
        }
    }

    /// Convert to u8 (for atomic storage).
    #[inline]
    pub fn as_u8(&self) -> u8 {
        match self {
            TaskState::Running => 0,
            TaskState::Completed => 1,
            TaskState::Failed => 2,
            TaskState::Canceled => 3,
        }
    }

    /// Whether the state is terminal.
    #[inline]
    pub fn is_done(&self) -> bool {
        !matches!(self, TaskState::Running)
    }
}

impl fmt::Display for TaskState {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        let s = match self {
            TaskState::Running => "running",
            TaskState::Completed => "completed",
            TaskState::Failed => "failed",
            TaskState::Canceled => "canceled",
        };
        f.write_str(s)
    }
}

type SettleCallback = Box<dyn FnOnce(&RuntimeResult<Value>) + Send>;

/// Work registered to run once a task resolves.
enum Continuation {
    /// `task.then(func)`: feeds the parent's value to `func`, resolving `derived`.
    Then { func: Function, derived: Task },
    /// Internal notification (group and race coordinators).
    Notify(SettleCallback),
}

struct Slot {
    result: Option<RuntimeResult<Value>>,
    continuations: SmallVec<[Continuation; 2]>,
}

struct TaskInner {
    id: TaskId,
    name: Arc<str>,
    runtime: Runtime,
    state: AtomicU8,
    slot: Mutex<Slot>,
    done: Condvar,
    cancel: Arc<CancelToken>,
    /// Tokens canceled along with this task (members of a group).
    linked: Mutex<Vec<Arc<CancelToken>>>,
    observed: AtomicBool,
    attached: AtomicBool,
}

impl Drop for TaskInner {
    fn drop(&mut self) {
        // Nothing can observe the task any more.
        if self.state.load(Ordering::SeqCst) == TaskState::Failed.as_u8() {
            self.runtime.release_task(self.id);
        }
    }
}

/// Handle to a unit of concurrently running evaluation.
#[derive(Clone)]
pub struct Task {
    inner: Arc<TaskInner>,
}

impl fmt::Debug for Task {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.inner.id)
            .field("name", &self.inner.name)
            .field("state", &self.state())
            .field("observed", &self.is_observed())
            .finish()
    }
}

impl Task {
    /// Create a task in the Running state. Nothing executes it yet.
    pub(crate) fn new(
        runtime: &Runtime,
        name: impl Into<Arc<str>>,
    ) -> Self {
        let id = runtime.next_task_id();
        let task = Self {
            inner: Arc::new(TaskInner {
                id,
                name: name.into(),
                runtime: runtime.clone(),
                state: AtomicU8::new(TaskState::Running.as_u8()),
                slot: Mutex::new(Slot {
                    result: None,
                    continuations: SmallVec::new(),
                }),
                done: Condvar::new(),
                cancel: CancelToken::new(),
                linked: Mutex::new(Vec::new()),
                observed: AtomicBool::new(false),
                attached: AtomicBool::new(false),
            }),
        };
        runtime.register_live(id, &task.inner.cancel);
        task
    }

    /// Get the task ID.
    #[inline]
    pub fn id(&self) -> TaskId {
        self.inner.id
    }

    /// Get the task name.
    #[inline]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Get the current state.
    #[inline]
    pub fn state(&self) -> TaskState {
        TaskState::from_u8(self.inner.state.load(Ordering::SeqCst))
    }

    #[inline]
    pub fn is_done(&self) -> bool {
        self.state().is_done()
    }

    /// Whether a `wait` or `.then` has reached this task.
    #[inline]
    pub fn is_observed(&self) -> bool {
        self.inner.observed.load(Ordering::SeqCst)
    }

    #[inline]
    pub fn is_canceled(&self) -> bool {
        self.inner.cancel.is_canceled()
    }

    /// The task's cancellation token.
    #[inline]
    pub fn cancel_token(&self) -> &Arc<CancelToken> {
        &self.inner.cancel
    }

    /// Mark the task as reachable from the program's result.
    ///
    /// Attached tasks are never reported to the failure ledger; the evaluator
    /// calls this when a task value flows into something that will be
    /// observed later.
    pub fn attach(&self) {
        if !self.is_attached() {
            let attached = &self.inner.attached;
            self.inner
                .runtime
                .ledger()
                .release(self.id(), || attached.swap(true, Ordering::SeqCst));
        }
    }

    #[inline]
    pub fn is_attached(&self) -> bool {
        self.inner.attached.load(Ordering::SeqCst)
    }

    fn mark_observed(&self) {
        if !self.is_observed() {
            let observed = &self.inner.observed;
            self.inner
                .runtime
                .ledger()
                .release(self.id(), || observed.swap(true, Ordering::SeqCst));
        }
    }

    /// Request cooperative cancellation.
    ///
    /// A task blocked in a channel operation or `wait` wakes and fails with
    /// `canceled`; a task past its last synchronization point finishes
    /// normally. Returns `true` on the first call.
    pub fn cancel(&self) -> bool {
        let first = self.inner.cancel.cancel();
        if first {
            debug!("{} '{}' cancel requested", self.id(), self.name());
            for token in self.inner.linked.lock().iter() {
                token.cancel();
            }
        }
        first
    }

    /// Cancel `token` whenever this task is canceled.
    pub(crate) fn link_cancel(
        &self,
        token: Arc<CancelToken>,
    ) {
        if self.is_canceled() {
            token.cancel();
        }
        self.inner.linked.lock().push(token);
    }

    /// Block until the task resolves and return its outcome.
    ///
    /// Marks the task observed. Fatal errors raised inside the task come back
    /// wrapped as recoverable [`RuntimeError::TaskFailed`]. If the *calling*
    /// thread's own task is canceled while waiting, returns `Canceled`.
    pub fn wait(&self) -> RuntimeResult<Value> {
        cancel::check_current()?;
        self.mark_observed();

        let token = cancel::current();
        let _waker = token.as_ref().map(|t| {
            let inner = Arc::clone(&self.inner);
            t.register(move || {
                let _slot = inner.slot.lock();
                inner.done.notify_all();
            })
        });

        let mut slot = self.inner.slot.lock();
        loop {
            if let Some(result) = &slot.result {
                let result = result.clone();
                drop(slot);
                self.mark_observed();
                return result.map_err(|e| e.into_observed(self.id()));
            }
            if let Some(token) = &token {
                token.check()?;
            }
            self.inner.done.wait(&mut slot);
        }
    }

    /// Like [`Task::wait`] but gives up after `timeout`, returning `None`.
    pub fn wait_timeout(
        &self,
        timeout: Duration,
    ) -> Option<RuntimeResult<Value>> {
        let deadline = Instant::now() + timeout;
        let mut slot = self.inner.slot.lock();
        loop {
            if let Some(result) = &slot.result {
                let result = result.clone();
                drop(slot);
                self.mark_observed();
                return Some(result.map_err(|e| e.into_observed(self.id())));
            }
            if self.inner.done.wait_until(&mut slot, deadline).timed_out() && slot.result.is_none() {
                return None;
            }
        }
    }

    /// Non-blocking peek at the result. Does not mark the task observed.
    pub fn try_result(&self) -> Option<RuntimeResult<Value>> {
        self.inner.slot.lock().result.clone()
    }

    /// Register `func` to run with this task's value.
    ///
    /// Returns the derived task immediately. If this task fails, `func` never
    /// runs and the derived task fails with the same error, already observed.
    pub fn then(
        &self,
        func: Function,
    ) -> Task {
        let runtime = self.inner.runtime.clone();
        let derived = Task::new(&runtime, format!("{}.then({})", self.name(), func.name()));
        trace!("{} registered continuation {}", self.id(), derived.id());
        self.mark_observed();
        self.push_continuation(Continuation::Then {
            func,
            derived: derived.clone(),
        });
        derived
    }

    /// Run `callback` with the outcome once the task resolves (immediately if
    /// it already has). Does not mark the task observed.
    pub(crate) fn on_settle<F>(
        &self,
        callback: F,
    ) where
        F: FnOnce(&RuntimeResult<Value>) + Send + 'static,
    {
        self.push_continuation(Continuation::Notify(Box::new(callback)));
    }

    fn push_continuation(
        &self,
        continuation: Continuation,
    ) {
        let ready = {
            let mut slot = self.inner.slot.lock();
            match &slot.result {
                Some(result) => Some(result.clone()),
                None => {
                    slot.continuations.push(continuation);
                    return;
                }
            }
        };
        if let Some(result) = ready {
            self.run_continuation(continuation, &result);
        }
    }

    fn run_continuation(
        &self,
        continuation: Continuation,
        result: &RuntimeResult<Value>,
    ) {
        match continuation {
            Continuation::Notify(callback) => callback(result),
            Continuation::Then { func, derived } => match result {
                Ok(value) => {
                    let value = value.clone();
                    let runtime = self.inner.runtime.clone();
                    super::launch(&runtime, &derived, move |_ctx| func.call(&[value]));
                }
                Err(error) => {
                    derived.inner.observed.store(true, Ordering::SeqCst);
                    derived.settle(Err(error.clone()));
                }
            },
        }
    }

    /// Write the result cell. Only the first call has any effect.
    pub(crate) fn settle(
        &self,
        result: RuntimeResult<Value>,
    ) -> bool {
        let state = match &result {
            Ok(_) => TaskState::Completed,
            Err(RuntimeError::Canceled) if self.is_canceled() => TaskState::Canceled,
            Err(_) => TaskState::Failed,
        };

        let continuations = {
            let mut slot = self.inner.slot.lock();
            if slot.result.is_some() {
                return false;
            }
            slot.result = Some(result.clone());
            self.inner.state.store(state.as_u8(), Ordering::SeqCst);
            self.inner.done.notify_all();
            std::mem::take(&mut slot.continuations)
        };

        let runtime = &self.inner.runtime;
        runtime.unregister_live(self.id());
        debug!("{} '{}' settled: {}", self.id(), self.name(), state);

        if let Err(error) = &result {
            if state == TaskState::Failed {
                let failure = UnhandledFailure {
                    task: self.id(),
                    name: Arc::clone(&self.inner.name),
                    error: error.clone(),
                };
                runtime.ledger().hold(failure, || self.is_observed() || self.is_attached());
            }
        }

        for continuation in continuations {
            self.run_continuation(continuation, &result);
        }
        true
    }
}
