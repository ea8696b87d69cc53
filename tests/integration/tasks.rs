//! Task lifecycle through the public API

use std::thread;
use std::time::Duration;

use braid::{run, Channel, ErrorKind, Function, RuntimeConfig, RuntimeError, TaskFailurePolicy, TaskState, Value};

#[test]
fn test_run_returns_program_value() {
    let result = run(RuntimeConfig::default(), |rt| {
        let task = rt.spawn(|_ctx| Ok(Value::Int(21)));
        let value = task.wait()?;
        Ok(Value::Int(value.as_int().unwrap_or(0) * 2))
    });
    assert_eq!(result.unwrap(), Value::Int(42));
}

#[test]
fn test_then_chain() {
    let result = run(RuntimeConfig::default(), |rt| {
        let add_one = Value::from(Function::new("add_one", |args: &[Value]| {
            Ok(Value::Int(args[0].as_int().unwrap_or(0) + 1))
        }));
        let first = rt.spawn(|_ctx| Ok(Value::Int(1)));
        let second = rt.then(&first, &add_one)?;
        let third = rt.then(&second, &add_one)?;
        third.wait()
    });
    assert_eq!(result.unwrap(), Value::Int(3));
}

#[test]
fn test_caught_task_error_lets_program_continue() {
    let result = run(RuntimeConfig::with_policy(TaskFailurePolicy::Defer), |rt| {
        let task = rt.spawn(|_ctx| Err(RuntimeError::thrown("nope")));
        match task.wait() {
            Err(e) if e.is_recoverable() => Ok(Value::from("recovered")),
            Err(e) => Err(e),
            Ok(v) => Ok(v),
        }
    });
    assert_eq!(result.unwrap(), Value::from("recovered"));
}

/// Canceling a task blocked on `recv` makes its `wait` fail with `canceled`.
#[test]
fn test_cancel_blocked_receiver() {
    let result = run(RuntimeConfig::default(), |rt| {
        let ch = Channel::rendezvous();
        let rx = ch.clone();
        let task = rt.spawn(move |_ctx| rx.recv_value());
        thread::sleep(Duration::from_millis(30));
        task.cancel();
        let outcome = task.wait();
        assert_eq!(task.state(), TaskState::Canceled);
        match outcome {
            Err(e) => Ok(Value::from(format!("{:?}:{}", e.kind(), e.is_recoverable()))),
            Ok(v) => Ok(v),
        }
    });
    assert_eq!(result.unwrap(), Value::from(format!("{:?}:true", ErrorKind::Canceled)));
}

#[test]
fn test_task_values_cross_threads() {
    let result = run(RuntimeConfig::default(), |rt| {
        let ch = Channel::buffered(1);
        let producer = rt.spawn({
            let ch = ch.clone();
            move |_ctx| {
                ch.send(Value::list(vec![Value::Int(1), Value::from("two")]))?;
                Ok(Value::Null)
            }
        });
        producer.wait()?;
        let task_value = Value::from(producer.clone());
        assert_eq!(task_value.as_task().map(|t| t.id()), Some(producer.id()));
        Ok(ch.recv()?.value)
    });
    assert_eq!(result.unwrap(), Value::list(vec![Value::Int(1), Value::from("two")]));
}
