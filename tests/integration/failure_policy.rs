//! Fail-fast and defer policies over whole runs

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use braid::{run, thunk, Channel, ErrorKind, Runtime, RuntimeConfig, RuntimeError, TaskFailurePolicy, Value};

fn failing_detached(rt: &Runtime) {
    rt.spawn_named("detached", |_ctx| Err(RuntimeError::thrown("detached failure")));
}

#[test]
fn test_fail_fast_aborts_before_next_statement() {
    let side_effect = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&side_effect);

    let result = run(RuntimeConfig::with_policy(TaskFailurePolicy::FailFast), move |rt| {
        failing_detached(rt);
        // Blocks until the abort cancels the main thread.
        Channel::rendezvous().recv()?;
        flag.store(true, Ordering::SeqCst);
        Ok(Value::Null)
    });

    let err = result.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UnhandledTaskFailure);
    assert!(err.is_fatal());
    assert!(err.to_string().contains("detached failure"));
    assert!(!side_effect.load(Ordering::SeqCst));
}

#[test]
fn test_fail_fast_polled_between_statements() {
    let result = run(RuntimeConfig::default(), |rt| {
        failing_detached(rt);
        loop {
            rt.check_abort()?;
            thread::sleep(Duration::from_millis(5));
        }
    });

    assert_eq!(result.unwrap_err().kind(), ErrorKind::UnhandledTaskFailure);
}

#[test]
fn test_defer_completes_and_reports_one_failure() {
    let side_effect = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&side_effect);

    let result = run(RuntimeConfig::with_policy(TaskFailurePolicy::Defer), move |rt| {
        failing_detached(rt);
        while rt.ledger().is_empty() {
            thread::sleep(Duration::from_millis(5));
        }
        flag.store(true, Ordering::SeqCst);
        Ok(Value::from("done"))
    });

    assert!(side_effect.load(Ordering::SeqCst));
    match result {
        Err(RuntimeError::UnhandledFailures(failures)) => {
            assert_eq!(failures.len(), 1);
            assert_eq!(&*failures[0].name, "detached");
        }
        other => panic!("expected aggregate failure, got {:?}", other),
    }
}

#[test]
fn test_defer_checkpoint_inside_program() {
    let result = run(RuntimeConfig::with_policy(TaskFailurePolicy::Defer), |rt| {
        failing_detached(rt);
        while rt.ledger().is_empty() {
            thread::sleep(Duration::from_millis(5));
        }
        let reported = match rt.check_unhandled_failures() {
            Err(RuntimeError::UnhandledFailures(failures)) => failures.len(),
            _ => 0,
        };
        // The checkpoint drained the ledger; the run itself ends clean.
        Ok(Value::Int(reported as i64))
    });
    assert_eq!(result.unwrap(), Value::Int(1));
}

#[test]
fn test_observed_failures_never_reach_ledger() {
    for policy in [TaskFailurePolicy::FailFast, TaskFailurePolicy::Defer] {
        let result = run(RuntimeConfig::with_policy(policy), |rt| {
            let task = rt.spawn(|_ctx| {
                thread::sleep(Duration::from_millis(30));
                Err(RuntimeError::thrown("seen"))
            });
            let caught = task.wait().is_err();
            Ok(Value::Bool(caught))
        });
        assert_eq!(result.unwrap(), Value::Bool(true), "policy {}", policy);
    }
}

#[test]
fn test_wait_after_immediate_failure_is_catchable() {
    let result = run(RuntimeConfig::default(), |rt| {
        let task = rt.spawn(|_ctx| Err(RuntimeError::thrown("boom")));
        let group = rt.spawn_group(vec![thunk(|_ctx| Err(RuntimeError::thrown("member")))]);
        thread::sleep(Duration::from_millis(20));
        rt.check_abort()?;

        let task_err = task.wait().unwrap_err();
        let group_err = group.wait().unwrap_err();
        Ok(Value::list(vec![
            Value::Bool(task_err.is_recoverable()),
            Value::Bool(group_err.is_recoverable()),
        ]))
    });
    assert_eq!(result.unwrap(), Value::list(vec![Value::Bool(true), Value::Bool(true)]));
}

#[test]
fn test_unwaited_failure_reported_when_program_returns() {
    let result = run(RuntimeConfig::default(), |rt| {
        let task = rt.spawn(|_ctx| Err(RuntimeError::thrown("forgotten")));
        while !task.is_done() {
            thread::sleep(Duration::from_millis(5));
        }
        rt.check_abort()?;
        Ok(Value::Null)
    });
    assert_eq!(result.unwrap_err().kind(), ErrorKind::UnhandledTaskFailure);
}

#[test]
fn test_task_returned_in_result_is_not_reported() {
    let result = run(RuntimeConfig::default(), |rt| {
        let task = rt.spawn(|_ctx| Err(RuntimeError::thrown("handed back")));
        while !task.is_done() {
            thread::sleep(Duration::from_millis(5));
        }
        Ok(Value::list(vec![Value::from(task)]))
    });
    let value = result.unwrap();
    let task = value.as_list().unwrap()[0].as_task().unwrap().clone();
    assert!(task.wait().is_err());
}

#[test]
fn test_invalid_policy_string_rejected() {
    let err = "sometimes".parse::<TaskFailurePolicy>().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidPolicy);
    assert!(RuntimeConfig::from_toml_str("task_failure_policy = \"sometimes\"").is_err());
}
