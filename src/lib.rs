//! braid: concurrency runtime core for a scripting language
//!
//! Tasks running on their own threads, rendezvous and buffered channels,
//! spawn/race groups, the unhandled-failure policy, and a source-level debug
//! controller the evaluator reports to.
//!
//! # Example
//!
//! ```no_run
//! use braid::{run, RuntimeConfig, Value};
//!
//! let result = run(RuntimeConfig::default(), |rt| {
//!     let task = rt.spawn(|_ctx| Ok(Value::Int(21)));
//!     let value = task.wait()?;
//!     Ok(Value::Int(value.as_int().unwrap_or(0) * 2))
//! });
//! assert_eq!(result.unwrap(), Value::Int(42));
//! ```

#![doc(html_root_url = "https://docs.rs/braid")]
#![warn(rust_2018_idioms)]

// Public modules
pub mod debugger;
pub mod runtime;

// Utility modules
pub mod util;

// Re-exports
pub use anyhow::{Context, Result};
pub use thiserror::Error;

pub use debugger::{DebugConfig, DebugFrame, Debugger, ExecutionHooks, NodeEvent, StopReason};
pub use runtime::{
    thunk, Channel, Environment, ErrorClass, ErrorKind, Function, Recv, Runtime, RuntimeError, RuntimeResult, Task,
    TaskContext, TaskFailurePolicy, TaskId, TaskState, Value,
};
pub use util::config::RuntimeConfig;

use ::std::io;
use ::std::path::Path;
use ::std::sync::Arc;
use ::std::thread::{self, JoinHandle};

use tracing::debug;

/// Runtime version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Runtime name
pub const NAME: &str = "braid";

/// Run `program` on the calling thread with a fresh runtime.
pub fn run<F>(
    config: RuntimeConfig,
    program: F,
) -> RuntimeResult<Value>
where
    F: FnOnce(&Runtime) -> RuntimeResult<Value>,
{
    Runtime::new(config).run(program)
}

/// Run `program` under `debugger`. The outcome is also recorded by the
/// debugger, where a front-end reads it through [`Debugger::result`].
pub fn run_debug<F>(
    config: RuntimeConfig,
    debugger: Arc<Debugger>,
    program: F,
) -> RuntimeResult<Value>
where
    F: FnOnce(&Runtime) -> RuntimeResult<Value>,
{
    debug!("{} {} starting debug run", NAME, VERSION);
    Runtime::with_hooks(config, debugger).run(program)
}

/// Start `program` under a debugger built from `config.debug` on a new main
/// thread. The caller drives the session through the returned debugger and
/// joins the handle for the program's result.
pub fn spawn_debug<F>(
    config: RuntimeConfig,
    program: F,
) -> io::Result<(Arc<Debugger>, JoinHandle<RuntimeResult<Value>>)>
where
    F: FnOnce(&Runtime) -> RuntimeResult<Value> + Send + 'static,
{
    let debugger = Arc::new(Debugger::from_config(&config));
    let session = Arc::clone(&debugger);
    let handle = thread::Builder::new()
        .name(format!("{}-main", NAME))
        .spawn(move || run_debug(config, session, program))?;
    Ok((debugger, handle))
}

/// Load configuration from `path`, set up logging from it, and run `program`.
pub fn run_with_config_file<F>(
    path: &Path,
    program: F,
) -> Result<Value>
where
    F: FnOnce(&Runtime) -> RuntimeResult<Value>,
{
    let config = RuntimeConfig::load(path)?;
    util::logger::init_from_config(&config.log);
    debug!("{} {} running with {}", NAME, VERSION, path.display());
    Ok(run(config, program)?)
}
