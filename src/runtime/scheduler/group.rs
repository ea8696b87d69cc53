//! Spawn and race groups.
//!
//! Both coordinators are driven by settle notifications from their members;
//! no extra thread waits on the group. Members are attached before they
//! start, so their failures reach the group and never the failure ledger.
//!
//! Neither coordinator cancels members once the group has resolved: losers
//! and siblings run to completion and their outcomes are discarded.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::runtime::errors::{RuntimeError, RuntimeResult};
use crate::runtime::scheduler::{launch, Task, TaskFailurePolicy, Thunk};
use crate::runtime::value::Value;
use crate::runtime::Runtime;

/// Tasks started together whose combined value keeps declaration order.
#[derive(Debug, Clone)]
pub struct TaskGroup {
    task: Task,
    members: Vec<Task>,
}

impl TaskGroup {
    /// The task resolving to the ordered list of member values.
    #[inline]
    pub fn task(&self) -> &Task {
        &self.task
    }

    /// Members in declaration order.
    #[inline]
    pub fn members(&self) -> &[Task] {
        &self.members
    }

    /// Wait for the group's value.
    pub fn wait(&self) -> RuntimeResult<Value> {
        self.task.wait()
    }

    #[inline]
    pub fn into_task(self) -> Task {
        self.task
    }
}

/// Tasks started together; the first success wins.
#[derive(Debug, Clone)]
pub struct RaceGroup {
    task: Task,
    members: Vec<Task>,
}

impl RaceGroup {
    /// The task resolving to the first successful member value.
    #[inline]
    pub fn task(&self) -> &Task {
        &self.task
    }

    #[inline]
    pub fn members(&self) -> &[Task] {
        &self.members
    }

    pub fn wait(&self) -> RuntimeResult<Value> {
        self.task.wait()
    }

    #[inline]
    pub fn into_task(self) -> Task {
        self.task
    }
}

struct GroupState {
    values: Vec<Option<Value>>,
    remaining: usize,
    /// Lowest-index member failure seen so far.
    failure: Option<(usize, RuntimeError)>,
}

/// Create a member task that reports to its group, then start it.
fn start_member<F>(
    runtime: &Runtime,
    group: &Task,
    index: usize,
    thunk: Thunk,
    on_settle: F,
) -> Task
where
    F: FnOnce(&RuntimeResult<Value>) + Send + 'static,
{
    let member = Task::new(runtime, format!("{}#{}", group.name(), index));
    member.attach();
    group.link_cancel(member.cancel_token().clone());
    member.on_settle(on_settle);
    launch(runtime, &member, thunk);
    member
}

pub(crate) fn spawn_group(
    runtime: &Runtime,
    thunks: Vec<Thunk>,
) -> TaskGroup {
    let n = thunks.len();
    let group = Task::new(runtime, format!("group[{}]", n));
    debug!("{} spawning {} member(s)", group.id(), n);

    if n == 0 {
        group.settle(Ok(Value::list(Vec::new())));
        return TaskGroup {
            task: group,
            members: Vec::new(),
        };
    }

    let fail_fast = runtime.policy() == TaskFailurePolicy::FailFast;
    let state = Arc::new(Mutex::new(GroupState {
        values: vec![None; n],
        remaining: n,
        failure: None,
    }));

    let members = thunks
        .into_iter()
        .enumerate()
        .map(|(index, thunk)| {
            let state = Arc::clone(&state);
            let target = group.clone();
            start_member(runtime, &group, index, thunk, move |result| {
                let outcome = {
                    let mut st = state.lock();
                    st.remaining -= 1;
                    match result {
                        Ok(value) => st.values[index] = Some(value.clone()),
                        Err(error) => {
                            if st.failure.as_ref().map_or(true, |(i, _)| index < *i) {
                                st.failure = Some((index, error.clone()));
                            }
                        }
                    }
                    let surface_now = match result {
                        Err(error) if fail_fast => Some(error.clone()),
                        _ => None,
                    };
                    if let Some(error) = surface_now {
                        // Siblings keep running; their outcomes are discarded.
                        Some(Err(error))
                    } else if st.remaining > 0 {
                        None
                    } else {
                        Some(match st.failure.take() {
                            Some((_, error)) => Err(error),
                            None => Ok(Value::list(
                                st.values.iter_mut().map(|v| v.take().unwrap_or_default()),
                            )),
                        })
                    }
                };
                match outcome {
                    Some(Ok(value)) => {
                        target.settle(Ok(value));
                    }
                    Some(Err(error)) => settle_group_failure(&target, error),
                    None => {}
                }
            })
        })
        .collect();

    TaskGroup {
        task: group,
        members,
    }
}

fn settle_group_failure(
    group: &Task,
    error: RuntimeError,
) {
    if group.settle(Err(error)) {
        debug!("{} failed", group.id());
    }
}

struct RaceState {
    remaining: usize,
    last_error: Option<RuntimeError>,
}

pub(crate) fn race_group(
    runtime: &Runtime,
    thunks: Vec<Thunk>,
) -> RaceGroup {
    let n = thunks.len();
    let race = Task::new(runtime, format!("race[{}]", n));
    debug!("{} racing {} member(s)", race.id(), n);

    if n == 0 {
        race.settle(Err(RuntimeError::Type("race group has no members".to_string())));
        return RaceGroup {
            task: race,
            members: Vec::new(),
        };
    }

    let state = Arc::new(Mutex::new(RaceState {
        remaining: n,
        last_error: None,
    }));

    let members = thunks
        .into_iter()
        .enumerate()
        .map(|(index, thunk)| {
            let state = Arc::clone(&state);
            let target = race.clone();
            start_member(runtime, &race, index, thunk, move |result| {
                let exhausted = {
                    let mut st = state.lock();
                    st.remaining -= 1;
                    if let Err(error) = result {
                        st.last_error = Some(error.clone());
                    }
                    if st.remaining == 0 {
                        st.last_error.take()
                    } else {
                        None
                    }
                };
                match result {
                    Ok(value) => {
                        if target.settle(Ok(value.clone())) {
                            debug!("{} won by member #{}", target.id(), index);
                        }
                    }
                    Err(_) => {
                        // Late failures after a win are dropped by settle.
                        if let Some(error) = exhausted {
                            target.settle(Err(error));
                        }
                    }
                }
            })
        })
        .collect();

    RaceGroup {
        task: race,
        members,
    }
}
