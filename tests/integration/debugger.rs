//! Debugger driven by a scripted evaluator running on the runtime

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam::channel::{unbounded, Sender};

use braid::debugger::Breakpoint;
use braid::{
    run_debug, spawn_debug, DebugConfig, DebugFrame, Debugger, Environment, ErrorKind, ExecutionHooks, NodeEvent,
    Runtime, RuntimeConfig, RuntimeResult, StopReason, TaskId, Value,
};

const FILE: &str = "prog.bx";
const TIMEOUT: Duration = Duration::from_secs(5);

/// Evaluate one statement the way an evaluator reports it.
fn stmt(
    rt: &Runtime,
    line: u32,
) -> RuntimeResult<()> {
    rt.check_abort()?;
    if let Some(hooks) = rt.hooks() {
        let event = NodeEvent::new(FILE, line, 1, "stmt");
        hooks.before_node(&event)?;
        hooks.after_node(&event, &Ok(Value::Null));
    }
    Ok(())
}

fn with_frame<T>(
    rt: &Runtime,
    name: &str,
    env: &Arc<Environment>,
    body: impl FnOnce() -> RuntimeResult<T>,
) -> RuntimeResult<T> {
    let frame = DebugFrame::new(name, FILE, 1, 1, env);
    let hooks = rt.hooks();
    if let Some(h) = &hooks {
        h.on_frame_push(frame.clone());
    }
    let result = body();
    if let Some(h) = &hooks {
        h.on_frame_pop(&frame);
    }
    result
}

/// main: lines 1..=3, a task running line 20, then line 4.
fn program(rt: &Runtime) -> RuntimeResult<Value> {
    let env = Environment::new();
    env.define("greeting", Value::from("hi"));
    with_frame(rt, "main", &env, || {
        stmt(rt, 1)?;
        stmt(rt, 2)?;
        let task = rt.spawn_named("worker", |ctx| {
            let rt = ctx.runtime();
            let local = Environment::new();
            local.define("n", Value::Int(7));
            with_frame(rt, "worker", &local, || {
                stmt(rt, 20)?;
                Ok(Value::Int(7))
            })
        });
        stmt(rt, 3)?;
        let value = task.wait()?;
        stmt(rt, 4)?;
        Ok(value)
    })
}

fn start(debugger: &Arc<Debugger>) -> thread::JoinHandle<RuntimeResult<Value>> {
    let dbg = Arc::clone(debugger);
    thread::spawn(move || run_debug(RuntimeConfig::default(), dbg, program))
}

fn stop(debugger: &Debugger) -> StopReason {
    debugger.wait_for_stop_timeout(TIMEOUT).expect("no stop")
}

#[test]
fn test_breakpoint_then_finish() {
    let dbg = Arc::new(Debugger::default());
    let id = dbg.add_breakpoint(FILE, 2);
    let handle = start(&dbg);

    assert_eq!(stop(&dbg), StopReason::Breakpoint { id });
    assert_eq!(dbg.current_event().unwrap().line, 2);
    assert_eq!(dbg.variables(0).unwrap(), vec![("greeting".to_string(), Value::from("hi"))]);

    dbg.resume().unwrap();
    assert_eq!(stop(&dbg), StopReason::Done);
    assert_eq!(handle.join().unwrap().unwrap(), Value::Int(7));

    let (value, error, done) = dbg.result();
    assert_eq!(value, Some(Value::Int(7)));
    assert!(error.is_none());
    assert!(done);
}

#[test]
fn test_breakpoint_on_task_thread() {
    let dbg = Arc::new(Debugger::default());
    dbg.add_breakpoint(FILE, 20);
    let handle = start(&dbg);

    stop(&dbg);
    let info = dbg.stop_info().unwrap();
    assert_eq!(info.event.line, 20);
    assert!(info.thread_name.unwrap_or_default().starts_with("braid-task"));

    let stack = dbg.stack().unwrap();
    assert_eq!(stack.len(), 1);
    assert_eq!(stack[0].name, "worker");
    assert_eq!(dbg.env_for_frame(0).unwrap().lookup("n"), Some(Value::Int(7)));

    dbg.resume().unwrap();
    assert_eq!(stop(&dbg), StopReason::Done);
    assert_eq!(handle.join().unwrap().unwrap(), Value::Int(7));
}

#[test]
fn test_step_through_main() {
    let dbg = Arc::new(Debugger::new(DebugConfig { stop_on_entry: true }));
    let handle = start(&dbg);

    assert_eq!(stop(&dbg), StopReason::Entry);
    assert_eq!(dbg.current_event().unwrap().line, 1);
    dbg.step_over().unwrap();
    assert_eq!(stop(&dbg), StopReason::Step);
    assert_eq!(dbg.current_event().unwrap().line, 2);

    dbg.resume().unwrap();
    assert_eq!(stop(&dbg), StopReason::Done);
    handle.join().unwrap().unwrap();
}

#[test]
fn test_quit_terminates_run() {
    let dbg = Arc::new(Debugger::default());
    dbg.add_breakpoint(FILE, 1);
    let handle = start(&dbg);
    stop(&dbg);

    dbg.quit();
    let err = handle.join().unwrap().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Terminated);
    assert_eq!(stop(&dbg), StopReason::Done);
    assert_eq!(dbg.result().1.map(|e| e.kind()), Some(ErrorKind::Terminated));
}

#[test]
fn test_config_file_stop_on_entry() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("braid.toml");
    std::fs::write(&path, "[debug]\nstop_on_entry = true\n").unwrap();
    let config = RuntimeConfig::load(&path).unwrap();

    let (dbg, handle) = spawn_debug(config, program).unwrap();
    assert_eq!(stop(&dbg), StopReason::Entry);
    assert_eq!(dbg.current_event().unwrap().line, 1);

    dbg.resume().unwrap();
    assert_eq!(stop(&dbg), StopReason::Done);
    assert_eq!(handle.join().unwrap().unwrap(), Value::Int(7));
}

#[test]
fn test_default_config_runs_without_stopping() {
    let (dbg, handle) = spawn_debug(RuntimeConfig::default(), program).unwrap();
    assert_eq!(stop(&dbg), StopReason::Done);
    assert_eq!(handle.join().unwrap().unwrap(), Value::Int(7));
}

#[derive(Debug, PartialEq)]
enum Seen {
    Start(TaskId),
    Exit(TaskId),
    Finish(bool),
}

struct Recorder {
    tx: Sender<Seen>,
}

impl ExecutionHooks for Recorder {
    fn on_thread_start(
        &self,
        task: TaskId,
    ) {
        let _ = self.tx.send(Seen::Start(task));
    }

    fn on_thread_exit(
        &self,
        task: TaskId,
    ) {
        let _ = self.tx.send(Seen::Exit(task));
    }

    fn on_finish(
        &self,
        result: &RuntimeResult<Value>,
    ) {
        let _ = self.tx.send(Seen::Finish(result.is_ok()));
    }
}

#[test]
fn test_runtime_reports_thread_lifecycle() {
    let (tx, rx) = unbounded();
    let rt = Runtime::with_hooks(RuntimeConfig::default(), Arc::new(Recorder { tx }));
    let spawned = rt
        .run(|rt| {
            let a = rt.spawn(|_ctx| Ok(Value::Int(1)));
            let b = rt.spawn(|_ctx| Ok(Value::Int(2)));
            a.wait()?;
            b.wait()?;
            Ok(Value::list(vec![Value::from(a), Value::from(b)]))
        })
        .unwrap();

    let seen: Vec<Seen> = rx.try_iter().collect();
    assert_eq!(seen.last(), Some(&Seen::Finish(true)));
    for task in spawned.as_list().unwrap() {
        let id = task.as_task().unwrap().id();
        let start = seen.iter().position(|s| *s == Seen::Start(id)).unwrap();
        let exit = seen.iter().position(|s| *s == Seen::Exit(id)).unwrap();
        assert!(start < exit);
    }
    assert_eq!(seen.iter().filter(|s| matches!(s, Seen::Finish(_))).count(), 1);
}

#[test]
fn test_serialized_shapes() {
    let event = NodeEvent::new(FILE, 3, 5, "call").at_depth(2);
    let json = serde_json::to_value(&event).unwrap();
    assert_eq!(
        json,
        serde_json::json!({"file": FILE, "line": 3, "column": 5, "kind": "call", "depth": 2})
    );

    assert_eq!(
        serde_json::to_value(StopReason::Done).unwrap(),
        serde_json::json!({"reason": "done"})
    );

    let dbg = Debugger::default();
    let id = dbg.add_breakpoint("./prog.bx", 9);
    let listed: Vec<Breakpoint> = dbg.list_breakpoints();
    assert_eq!(
        serde_json::to_value(&listed).unwrap(),
        serde_json::json!([{"id": id.inner(), "file": "prog.bx", "line": 9}])
    );

    let env = Environment::new();
    let frame = DebugFrame::new("main", FILE, 1, 1, &env);
    let json = serde_json::to_value(&frame).unwrap();
    assert!(json.get("env").is_none());
    assert_eq!(json["name"], "main");
    assert!(dbg.stop_info().is_none());
}
