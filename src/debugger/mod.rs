//! Source-level debugger
//!
//! - [`hooks`] - the callbacks an evaluator invokes around nodes and frames
//! - [`breakpoints`] - breakpoint ids and the per-file line store
//! - [`controller`] - the pause/step state machine driven by a front-end

pub mod breakpoints;
pub mod controller;
pub mod hooks;

pub use breakpoints::{normalize_path, Breakpoint, BreakpointId, BreakpointStore};
pub use controller::{DebugConfig, Debugger, RunState, StepMode, StopInfo, StopReason};
pub use hooks::{DebugFrame, ExecutionHooks, NodeEvent, NoopHooks};

#[cfg(test)]
mod tests;
