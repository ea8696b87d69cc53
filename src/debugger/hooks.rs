//! Evaluator hooks.
//!
//! The evaluator calls these synchronously on the executing thread: around
//! every syntax node, around every function-call frame, and once at the end of
//! the run. The runtime adds the thread start/exit calls for task threads.

use std::sync::Arc;

use serde::Serialize;

use crate::runtime::env::{EnvRef, Environment};
use crate::runtime::errors::RuntimeResult;
use crate::runtime::scheduler::TaskId;
use crate::runtime::value::Value;

/// Where the evaluator is, reported before and after each node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeEvent {
    pub file: String,
    pub line: u32,
    pub column: u32,
    /// Syntax node kind, as named by the parser.
    pub kind: String,
    /// Call depth as the evaluator sees it.
    pub depth: usize,
}

impl NodeEvent {
    pub fn new(
        file: impl Into<String>,
        line: u32,
        column: u32,
        kind: impl Into<String>,
    ) -> Self {
        Self {
            file: file.into(),
            line,
            column,
            kind: kind.into(),
            depth: 0,
        }
    }

    /// Set the evaluator-reported frame depth.
    pub fn at_depth(
        mut self,
        depth: usize,
    ) -> Self {
        self.depth = depth;
        self
    }
}

/// One function-call frame as the debugger mirrors it.
///
/// `env` never keeps the scope alive; see [`DebugFrame::environment`].
#[derive(Debug, Clone, Serialize)]
pub struct DebugFrame {
    pub name: String,
    pub file: String,
    pub line: u32,
    pub column: u32,
    /// Position in the thread's stack, 0 = outermost. Filled in on push.
    pub depth: usize,
    #[serde(skip)]
    pub env: EnvRef,
}

impl DebugFrame {
    pub fn new(
        name: impl Into<String>,
        file: impl Into<String>,
        line: u32,
        column: u32,
        env: &Arc<Environment>,
    ) -> Self {
        Self {
            name: name.into(),
            file: file.into(),
            line,
            column,
            depth: 0,
            env: Arc::downgrade(env),
        }
    }

    /// The frame's live scope, unless the evaluator has released it.
    pub fn environment(&self) -> Option<Arc<Environment>> {
        self.env.upgrade()
    }
}

/// Callbacks the evaluator and the runtime invoke while a program runs.
///
/// Every method defaults to a no-op.
pub trait ExecutionHooks: Send + Sync {
    /// Before evaluating a node. May block (a debugger pause); an error tells
    /// the evaluator to unwind.
    fn before_node(
        &self,
        _event: &NodeEvent,
    ) -> RuntimeResult<()> {
        Ok(())
    }

    /// After evaluating a node, with its value or error.
    fn after_node(
        &self,
        _event: &NodeEvent,
        _result: &RuntimeResult<Value>,
    ) {
    }

    fn on_frame_push(
        &self,
        _frame: DebugFrame,
    ) {
    }

    fn on_frame_pop(
        &self,
        _frame: &DebugFrame,
    ) {
    }

    /// A task thread begins executing.
    fn on_thread_start(
        &self,
        _task: TaskId,
    ) {
    }

    /// A task thread is about to resolve its task.
    fn on_thread_exit(
        &self,
        _task: TaskId,
    ) {
    }

    /// The top-level driver finished the run.
    fn on_finish(
        &self,
        _result: &RuntimeResult<Value>,
    ) {
    }
}

/// Hooks that do nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopHooks;

impl ExecutionHooks for NoopHooks {}
