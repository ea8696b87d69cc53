//! Failure policy ledger.
//!
//! Records task failures nobody observed and applies the run's
//! [`TaskFailurePolicy`] once they can no longer be observed: `fail-fast`
//! turns the first one into a fatal abort, `defer` keeps them until
//! [`FailureLedger::check`] drains the set.

use std::fmt;
use std::str::FromStr;

use indexmap::IndexMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use crate::runtime::errors::{RuntimeError, RuntimeResult, UnhandledFailure};
use crate::runtime::scheduler::task::TaskId;

/// What to do with a detached task failure nobody observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum TaskFailurePolicy {
    /// Abort the run as soon as the failure happens.
    #[default]
    FailFast,
    /// Remember the failure and report it at the next checkpoint.
    Defer,
}

impl TaskFailurePolicy {
    /// The configuration spelling of this policy.
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskFailurePolicy::FailFast => "fail-fast",
            TaskFailurePolicy::Defer => "defer",
        }
    }
}

impl fmt::Display for TaskFailurePolicy {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskFailurePolicy {
    type Err = RuntimeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fail-fast" => Ok(TaskFailurePolicy::FailFast),
            "defer" => Ok(TaskFailurePolicy::Defer),
            other => Err(RuntimeError::InvalidPolicy(other.to_string())),
        }
    }
}

impl TryFrom<String> for TaskFailurePolicy {
    type Error = RuntimeError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<TaskFailurePolicy> for String {
    fn from(policy: TaskFailurePolicy) -> Self {
        policy.as_str().to_string()
    }
}

/// Outcome of reporting an unobserved failure to the ledger.
#[derive(Debug, Clone)]
pub enum LedgerAction {
    /// Stored for the next checkpoint.
    Deferred,
    /// The run must abort with this fatal error.
    Abort(RuntimeError),
}

/// Process-wide set of unhandled task failures for one run.
///
/// A failed task that nobody has observed yet is first *held*: a live handle
/// may still reach it through `wait` or `.then`. Once its last handle is
/// dropped (or the run ends) the held failure is escalated under the policy.
#[derive(Debug)]
pub struct FailureLedger {
    policy: TaskFailurePolicy,
    entries: Mutex<Entries>,
}

#[derive(Debug, Default)]
struct Entries {
    /// Failures whose task can still be observed, in failure order.
    held: IndexMap<TaskId, UnhandledFailure>,
    /// Deferred failures waiting for the next checkpoint.
    pending: Vec<UnhandledFailure>,
}

impl FailureLedger {
    /// Create an empty ledger enforcing `policy`.
    pub fn new(policy: TaskFailurePolicy) -> Self {
        Self {
            policy,
            entries: Mutex::new(Entries::default()),
        }
    }

    #[inline]
    pub fn policy(&self) -> TaskFailurePolicy {
        self.policy
    }

    /// Apply the policy to a failure that can no longer be observed.
    pub fn record(
        &self,
        failure: UnhandledFailure,
    ) -> LedgerAction {
        match self.policy {
            TaskFailurePolicy::FailFast => {
                warn!("fail-fast: unhandled failure in {}", failure);
                LedgerAction::Abort(RuntimeError::UnhandledTaskFailure {
                    task: failure.task,
                    source: Box::new(failure.error),
                })
            }
            TaskFailurePolicy::Defer => {
                debug!("defer: recording unhandled failure in {}", failure);
                self.entries.lock().pending.push(failure);
                LedgerAction::Deferred
            }
        }
    }

    /// Hold `failure` unless `handled` reports the task already observed or
    /// attached. `handled` runs under the ledger lock.
    pub(crate) fn hold<F>(
        &self,
        failure: UnhandledFailure,
        handled: F,
    ) -> bool
    where
        F: FnOnce() -> bool,
    {
        let mut entries = self.entries.lock();
        if handled() {
            return false;
        }
        trace!("holding failure of {} until its handles are gone", failure.task);
        entries.held.insert(failure.task, failure);
        true
    }

    /// Mark `task` handled and forget anything recorded for it.
    ///
    /// `mark` sets the task's flag and returns its previous value; it runs
    /// under the ledger lock so a concurrent [`FailureLedger::hold`] either
    /// sees the flag or has its record removed here.
    pub(crate) fn release<F>(
        &self,
        task: TaskId,
        mark: F,
    ) where
        F: FnOnce() -> bool,
    {
        let (held, retracted) = {
            let mut entries = self.entries.lock();
            if mark() {
                return;
            }
            let held = entries.held.shift_remove(&task);
            let retracted = take_task(&mut entries.pending, task);
            (held, retracted)
        };
        if held.is_some() || !retracted.is_empty() {
            debug!("{} observed after failing; not reported", task);
        }
    }

    /// The last handle of `task` is gone: escalate its held failure, if any.
    pub fn escalate(
        &self,
        task: TaskId,
    ) -> Option<LedgerAction> {
        let failure = self.entries.lock().held.shift_remove(&task)?;
        Some(self.record(failure))
    }

    /// End of run: escalate every held failure.
    ///
    /// Under `fail-fast` the first one becomes the fatal error; under `defer`
    /// they all join the pending set.
    pub fn escalate_all(&self) -> Option<RuntimeError> {
        let held: Vec<_> = std::mem::take(&mut self.entries.lock().held).into_values().collect();
        let mut fatal = None;
        for failure in held {
            match self.record(failure) {
                LedgerAction::Abort(err) if fatal.is_none() => fatal = Some(err),
                _ => {}
            }
        }
        fatal
    }

    /// Forget a deferred failure whose task was observed after all.
    ///
    /// Returns `true` if a record was removed.
    pub fn retract(
        &self,
        task: TaskId,
    ) -> bool {
        let removed = take_task(&mut self.entries.lock().pending, task);
        !removed.is_empty()
    }

    /// Atomically take every pending record.
    pub fn drain(&self) -> Vec<UnhandledFailure> {
        std::mem::take(&mut self.entries.lock().pending)
    }

    /// Drain the ledger; an aggregate error if anything was pending.
    pub fn check(&self) -> RuntimeResult<()> {
        let failures = self.drain();
        if failures.is_empty() {
            Ok(())
        } else {
            debug!("checkpoint: draining {} unhandled failure(s)", failures.len());
            Err(RuntimeError::UnhandledFailures(failures))
        }
    }

    /// Number of failures still held behind live handles.
    #[inline]
    pub fn held(&self) -> usize {
        self.entries.lock().held.len()
    }

    /// Number of pending (deferred) failures.
    #[inline]
    pub fn len(&self) -> usize {
        self.entries.lock().pending.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().pending.is_empty()
    }
}

/// Remove `task`'s records from `pending`. The removed records are returned
/// so they drop after the lock is released.
fn take_task(
    pending: &mut Vec<UnhandledFailure>,
    task: TaskId,
) -> Vec<UnhandledFailure> {
    let (taken, kept): (Vec<_>, Vec<_>) = std::mem::take(pending).into_iter().partition(|f| f.task == task);
    *pending = kept;
    taken
}
