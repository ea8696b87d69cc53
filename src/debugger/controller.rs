//! Debug controller
//!
//! The state machine behind a debug session. Evaluator threads call into it
//! through [`ExecutionHooks`]; a controlling thread (DAP server, CLI) drives
//! it with the command methods. Run state, breakpoints and frame stacks live
//! in one [`Session`] guarded by a single mutex and condition variable.
//!
//! Only one pause is active at a time. A second thread reaching a hook while
//! another is paused blocks until the pause ends. Step requests belong to the
//! thread that was stopped; other threads stop only at breakpoints and
//! explicit pause requests.

use std::collections::HashMap;
use std::sync::Arc;
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace};

use crate::debugger::breakpoints::{Breakpoint, BreakpointId, BreakpointStore};
use crate::debugger::hooks::{DebugFrame, ExecutionHooks, NodeEvent};
use crate::runtime::env::Environment;
use crate::runtime::errors::{RuntimeError, RuntimeResult};
use crate::runtime::scheduler::TaskId;
use crate::runtime::value::Value;
use crate::util::config::RuntimeConfig;

/// Debugger configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DebugConfig {
    /// Pause before the first node of the program.
    pub stop_on_entry: bool,
}

/// Run state of a debug session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    Running,
    Paused,
    Done,
}

/// Stepping mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepMode {
    /// Next node at any depth.
    Into,
    /// Next node at the same or a lower depth.
    Over,
    /// Next node at a strictly lower depth.
    Out,
}

impl StepMode {
    fn accepts(
        self,
        depth: usize,
        origin: usize,
    ) -> bool {
        match self {
            StepMode::Into => true,
            StepMode::Over => depth <= origin,
            StepMode::Out => depth < origin,
        }
    }
}

/// Why the session stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum StopReason {
    Entry,
    Breakpoint { id: BreakpointId },
    Step,
    Pause,
    /// The program finished; see [`Debugger::result`].
    Done,
}

/// Details of the active pause.
#[derive(Debug, Clone, Serialize)]
pub struct StopInfo {
    pub reason: StopReason,
    pub event: NodeEvent,
    /// Frame depth of the stopped thread.
    pub depth: usize,
    /// Name of the stopped thread, if it has one.
    pub thread_name: Option<String>,
    #[serde(skip)]
    pub thread: ThreadId,
}

#[derive(Debug, Clone)]
struct StepRequest {
    mode: StepMode,
    thread: ThreadId,
    depth: usize,
    origin: NodeEvent,
    /// `after_node` has reported the origin node finished.
    origin_done: bool,
}

impl StepRequest {
    fn completes(
        &self,
        event: &NodeEvent,
        depth: usize,
    ) -> bool {
        if !self.mode.accepts(depth, self.depth) {
            return false;
        }
        self.origin_done || depth != self.depth || !same_line(event, &self.origin)
    }
}

/// Location a thread just resumed from. Breakpoints on it stay quiet until
/// the thread moves on or the node finishes.
#[derive(Debug, Clone)]
struct Guard {
    event: NodeEvent,
    depth: usize,
}

impl Guard {
    fn covers(
        &self,
        event: &NodeEvent,
        depth: usize,
    ) -> bool {
        self.depth == depth && same_line(event, &self.event)
    }

    fn moved_past(
        &self,
        event: &NodeEvent,
        depth: usize,
    ) -> bool {
        depth < self.depth || (depth == self.depth && !same_line(event, &self.event))
    }
}

fn same_line(
    a: &NodeEvent,
    b: &NodeEvent,
) -> bool {
    a.line == b.line && a.file == b.file
}

struct Session {
    run: RunState,
    breakpoints: BreakpointStore,
    frames: HashMap<ThreadId, Vec<DebugFrame>>,
    step: Option<StepRequest>,
    /// Per-thread resume locations.
    guards: HashMap<ThreadId, Guard>,
    pause_requested: bool,
    entry_pending: bool,
    quit: bool,
    stop: Option<StopInfo>,
    /// Bumped on every resume; a paused thread sleeps until it changes.
    resume_epoch: u64,
    result: Option<RuntimeResult<Value>>,
}

impl Session {
    fn depth_of(
        &self,
        thread: ThreadId,
    ) -> usize {
        self.frames.get(&thread).map_or(0, Vec::len)
    }

    fn blocked_by_other(
        &self,
        thread: ThreadId,
    ) -> bool {
        self.run == RunState::Paused && self.stop.as_ref().is_some_and(|s| s.thread != thread)
    }

    fn stop_reason(
        &mut self,
        thread: ThreadId,
        event: &NodeEvent,
        depth: usize,
    ) -> Option<StopReason> {
        if self.guards.get(&thread).is_some_and(|g| g.moved_past(event, depth)) {
            self.guards.remove(&thread);
        }

        if self.entry_pending {
            return Some(StopReason::Entry);
        }
        if self.pause_requested {
            return Some(StopReason::Pause);
        }
        if let Some(step) = &self.step {
            if step.thread == thread && step.completes(event, depth) {
                return Some(StopReason::Step);
            }
        }
        let id = self.breakpoints.matches(&event.file, event.line)?;
        let guarded = self.guards.get(&thread).is_some_and(|g| g.covers(event, depth));
        if guarded {
            None
        } else {
            Some(StopReason::Breakpoint { id })
        }
    }

    /// Leave the pause, arming `step` for the stopped thread.
    fn resume(
        &mut self,
        mode: Option<StepMode>,
    ) -> RuntimeResult<()> {
        match self.run {
            RunState::Done => return Err(RuntimeError::SessionDone),
            RunState::Running => return Err(RuntimeError::NotPaused),
            RunState::Paused => {}
        }
        let stop = self.stop.take().ok_or(RuntimeError::NotPaused)?;
        self.step = mode.map(|mode| StepRequest {
            mode,
            thread: stop.thread,
            depth: stop.depth,
            origin: stop.event.clone(),
            origin_done: false,
        });
        self.guards.insert(
            stop.thread,
            Guard {
                event: stop.event,
                depth: stop.depth,
            },
        );
        self.run = RunState::Running;
        self.resume_epoch += 1;
        Ok(())
    }

    fn stopped_frames(&self) -> RuntimeResult<&[DebugFrame]> {
        match self.run {
            RunState::Done => Err(RuntimeError::SessionDone),
            RunState::Running => Err(RuntimeError::NotPaused),
            RunState::Paused => {
                let stop = self.stop.as_ref().ok_or(RuntimeError::NotPaused)?;
                Ok(self.frames.get(&stop.thread).map_or(&[][..], Vec::as_slice))
            }
        }
    }
}

/// An interactive debug session.
///
/// Install it as the runtime's hooks (`Runtime::with_hooks`) and hand the
/// same `Arc` to the evaluator; drive it from another thread.
pub struct Debugger {
    session: Mutex<Session>,
    cond: Condvar,
}

impl std::fmt::Debug for Debugger {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        let s = self.session.lock();
        f.debug_struct("Debugger")
            .field("run", &s.run)
            .field("breakpoints", &s.breakpoints.len())
            .field("stop", &s.stop.as_ref().map(|stop| stop.reason))
            .finish()
    }
}

impl Default for Debugger {
    fn default() -> Self {
        Self::new(DebugConfig::default())
    }
}

impl Debugger {
    /// A debugger set up from the run's `[debug]` section.
    pub fn from_config(config: &RuntimeConfig) -> Self {
        Self::new(config.debug.clone())
    }

    pub fn new(config: DebugConfig) -> Self {
        Self {
            session: Mutex::new(Session {
                run: RunState::Running,
                breakpoints: BreakpointStore::new(),
                frames: HashMap::new(),
                step: None,
                guards: HashMap::new(),
                pause_requested: false,
                entry_pending: config.stop_on_entry,
                quit: false,
                stop: None,
                resume_epoch: 0,
                result: None,
            }),
            cond: Condvar::new(),
        }
    }

    pub fn run_state(&self) -> RunState {
        self.session.lock().run
    }

    // ---- breakpoints ----

    /// Returns the existing id when `file:line` is already set.
    pub fn add_breakpoint(
        &self,
        file: &str,
        line: u32,
    ) -> BreakpointId {
        let id = self.session.lock().breakpoints.add(file, line);
        debug!("{} set at {}:{}", id, file, line);
        id
    }

    pub fn remove_breakpoint(
        &self,
        id: BreakpointId,
    ) -> RuntimeResult<()> {
        let removed = self.session.lock().breakpoints.remove(id)?;
        debug!("{} removed from {}:{}", id, removed.file, removed.line);
        Ok(())
    }

    /// Remove all breakpoints, returning how many there were.
    pub fn clear_breakpoints(&self) -> usize {
        self.session.lock().breakpoints.clear()
    }

    /// Replace every breakpoint in `file`.
    pub fn set_breakpoints(
        &self,
        file: &str,
        lines: &[u32],
    ) -> Vec<Breakpoint> {
        self.session.lock().breakpoints.set_file(file, lines)
    }

    pub fn list_breakpoints(&self) -> Vec<Breakpoint> {
        self.session.lock().breakpoints.list()
    }

    // ---- commands ----

    /// Continue: resume without a step request.
    pub fn resume(&self) -> RuntimeResult<()> {
        self.resume_with(None)
    }

    /// Step into: stop at the next node on the stopped thread, entering calls.
    ///
    /// Stepping is line-granular: nested nodes on the line being stepped from
    /// (at the same depth) run without stopping until that line's node
    /// finishes or execution reaches another line or a deeper frame.
    pub fn step(&self) -> RuntimeResult<()> {
        self.resume_with(Some(StepMode::Into))
    }

    pub fn step_over(&self) -> RuntimeResult<()> {
        self.resume_with(Some(StepMode::Over))
    }

    pub fn step_out(&self) -> RuntimeResult<()> {
        self.resume_with(Some(StepMode::Out))
    }

    fn resume_with(
        &self,
        mode: Option<StepMode>,
    ) -> RuntimeResult<()> {
        let mut s = self.session.lock();
        s.resume(mode)?;
        debug!("resumed ({:?})", mode);
        self.cond.notify_all();
        Ok(())
    }

    /// Ask for a pause at the next hook call on any thread.
    pub fn pause(&self) {
        let mut s = self.session.lock();
        if s.run == RunState::Running {
            s.pause_requested = true;
            debug!("pause requested");
        }
    }

    /// End the session: resume if paused, never pause again. The evaluator
    /// sees `Terminated` from its next `before_node`.
    pub fn quit(&self) {
        let mut s = self.session.lock();
        if s.quit {
            return;
        }
        s.quit = true;
        s.step = None;
        s.guards.clear();
        s.pause_requested = false;
        s.entry_pending = false;
        if s.run == RunState::Paused {
            s.stop = None;
            s.run = RunState::Running;
            s.resume_epoch += 1;
        }
        info!("debug session quit");
        self.cond.notify_all();
    }

    /// Block until the session is paused or done.
    pub fn wait_for_stop(&self) -> StopReason {
        let mut s = self.session.lock();
        loop {
            if let Some(reason) = Self::stopped(&s) {
                return reason;
            }
            self.cond.wait(&mut s);
        }
    }

    /// Like [`Debugger::wait_for_stop`]; `None` on timeout.
    pub fn wait_for_stop_timeout(
        &self,
        timeout: Duration,
    ) -> Option<StopReason> {
        let deadline = Instant::now() + timeout;
        let mut s = self.session.lock();
        loop {
            if let Some(reason) = Self::stopped(&s) {
                return Some(reason);
            }
            if self.cond.wait_until(&mut s, deadline).timed_out() {
                return Self::stopped(&s);
            }
        }
    }

    fn stopped(s: &Session) -> Option<StopReason> {
        match s.run {
            RunState::Done => Some(StopReason::Done),
            RunState::Paused => s.stop.as_ref().map(|stop| stop.reason),
            RunState::Running => None,
        }
    }

    /// Record the program's outcome. Called once by the top-level driver;
    /// later calls are ignored.
    pub fn finish(
        &self,
        result: RuntimeResult<Value>,
    ) {
        let mut s = self.session.lock();
        if s.run == RunState::Done {
            return;
        }
        match &result {
            Ok(value) => info!("program finished: {}", value),
            Err(e) => info!("program failed: {}", e),
        }
        s.result = Some(result);
        s.run = RunState::Done;
        s.stop = None;
        s.step = None;
        s.resume_epoch += 1;
        self.cond.notify_all();
    }

    /// `(value, error, done)`.
    pub fn result(&self) -> (Option<Value>, Option<RuntimeError>, bool) {
        let s = self.session.lock();
        let done = s.run == RunState::Done;
        match &s.result {
            Some(Ok(value)) => (Some(value.clone()), None, done),
            Some(Err(e)) => (None, Some(e.clone()), done),
            None => (None, None, done),
        }
    }

    // ---- inspection ----

    /// Node the stopped thread is about to evaluate.
    pub fn current_event(&self) -> Option<NodeEvent> {
        let s = self.session.lock();
        match s.run {
            RunState::Paused => s.stop.as_ref().map(|stop| stop.event.clone()),
            _ => None,
        }
    }

    pub fn stop_info(&self) -> Option<StopInfo> {
        self.session.lock().stop.clone()
    }

    /// Frames of the stopped thread, innermost first.
    pub fn stack(&self) -> RuntimeResult<Vec<DebugFrame>> {
        let s = self.session.lock();
        Ok(s.stopped_frames()?.iter().rev().cloned().collect())
    }

    /// Live scope of frame `index` (0 = innermost) of the stopped thread.
    pub fn env_for_frame(
        &self,
        index: usize,
    ) -> RuntimeResult<Arc<Environment>> {
        let s = self.session.lock();
        let frames = s.stopped_frames()?;
        let depth = frames.len();
        let frame = frames
            .iter()
            .rev()
            .nth(index)
            .ok_or(RuntimeError::FrameOutOfRange { index, depth })?;
        frame.environment().ok_or(RuntimeError::EnvironmentReleased(index))
    }

    /// Snapshot of the variables declared directly in frame `index`.
    pub fn variables(
        &self,
        index: usize,
    ) -> RuntimeResult<Vec<(String, Value)>> {
        Ok(self.env_for_frame(index)?.locals())
    }

    /// Block the calling evaluator thread until the pause it just entered ends.
    fn park(
        &self,
        s: &mut parking_lot::MutexGuard<'_, Session>,
    ) {
        let epoch = s.resume_epoch;
        while s.resume_epoch == epoch {
            self.cond.wait(s);
        }
    }
}

impl ExecutionHooks for Debugger {
    fn before_node(
        &self,
        event: &NodeEvent,
    ) -> RuntimeResult<()> {
        let me = thread::current().id();
        let mut s = self.session.lock();

        while !s.quit && s.blocked_by_other(me) {
            self.cond.wait(&mut s);
        }
        if s.quit {
            return Err(RuntimeError::Terminated);
        }
        if s.run == RunState::Done {
            return Ok(());
        }

        let depth = s.depth_of(me);
        let reason = match s.stop_reason(me, event, depth) {
            Some(reason) => reason,
            None => return Ok(()),
        };

        info!(
            "paused ({:?}) at {}:{}:{} depth {}",
            reason, event.file, event.line, event.column, depth
        );
        s.run = RunState::Paused;
        s.entry_pending = false;
        s.pause_requested = false;
        s.step = None;
        s.stop = Some(StopInfo {
            reason,
            event: event.clone(),
            depth,
            thread_name: thread::current().name().map(str::to_string),
            thread: me,
        });
        self.cond.notify_all();

        self.park(&mut s);
        if s.quit {
            return Err(RuntimeError::Terminated);
        }
        Ok(())
    }

    fn after_node(
        &self,
        event: &NodeEvent,
        _result: &RuntimeResult<Value>,
    ) {
        let me = thread::current().id();
        let mut s = self.session.lock();
        let depth = s.depth_of(me);
        if let Some(step) = &mut s.step {
            if step.thread == me && step.depth == depth && step.origin == *event {
                step.origin_done = true;
            }
        }
        let finished_guard = s.guards.get(&me).is_some_and(|g| g.depth == depth && g.event == *event);
        if finished_guard {
            s.guards.remove(&me);
        }
    }

    fn on_frame_push(
        &self,
        mut frame: DebugFrame,
    ) {
        let me = thread::current().id();
        let mut s = self.session.lock();
        let stack = s.frames.entry(me).or_default();
        frame.depth = stack.len();
        trace!("frame push {} depth {}", frame.name, frame.depth);
        stack.push(frame);
    }

    fn on_frame_pop(
        &self,
        frame: &DebugFrame,
    ) {
        let me = thread::current().id();
        let mut s = self.session.lock();
        if let Some(stack) = s.frames.get_mut(&me) {
            stack.pop();
            trace!("frame pop {} depth {}", frame.name, stack.len());
        }
    }

    fn on_thread_start(
        &self,
        task: TaskId,
    ) {
        trace!("{} entered the debug session", task);
        self.session.lock().frames.entry(thread::current().id()).or_default();
    }

    fn on_thread_exit(
        &self,
        task: TaskId,
    ) {
        let me = thread::current().id();
        let mut s = self.session.lock();
        s.frames.remove(&me);
        s.guards.remove(&me);
        // A step cannot complete on a thread that is gone; stop wherever
        // execution shows up next.
        if s.step.as_ref().is_some_and(|step| step.thread == me) {
            debug!("{} exited mid-step", task);
            s.step = None;
            s.pause_requested = true;
        }
    }

    fn on_finish(
        &self,
        result: &RuntimeResult<Value>,
    ) {
        self.finish(result.clone());
    }
}
