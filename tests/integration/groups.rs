//! Spawn and race groups end to end
//!
//! Race outcomes depend on real-time completion order, which is not
//! reproducible across runs; delays here keep the intended winner far ahead.

use std::thread;
use std::time::Duration;

use braid::{run, thunk, RuntimeConfig, RuntimeError, TaskFailurePolicy, Value};

fn pause(ms: u64) {
    thread::sleep(Duration::from_millis(ms));
}

#[test]
fn test_group_values_in_declaration_order() {
    let result = run(RuntimeConfig::default(), |rt| {
        let thunks = (0..5)
            .map(|i: i64| {
                thunk(move |_ctx| {
                    // Later members finish first.
                    pause(10 * (5 - i as u64));
                    Ok(Value::Int(i * i))
                })
            })
            .collect();
        rt.spawn_group(thunks).wait()
    });
    let expected = Value::list((0..5).map(|i: i64| Value::Int(i * i)));
    assert_eq!(result.unwrap(), expected);
}

#[test]
fn test_race_fast_beats_slow() {
    let result = run(RuntimeConfig::default(), |rt| {
        let race = rt.race_group(vec![
            thunk(|_ctx| {
                pause(120);
                Err(RuntimeError::thrown("slow"))
            }),
            thunk(|_ctx| {
                pause(5);
                Ok(Value::from("fast"))
            }),
        ]);
        let winner = race.wait()?;
        // Let the loser fail; it must not affect the run.
        pause(200);
        rt.check_abort()?;
        Ok(winner)
    });
    assert_eq!(result.unwrap(), Value::from("fast"));
}

#[test]
fn test_nested_groups() {
    let result = run(RuntimeConfig::default(), |rt| {
        let outer = rt.spawn_group(vec![
            thunk(|ctx| {
                ctx.runtime()
                    .spawn_group(vec![thunk(|_| Ok(Value::Int(1))), thunk(|_| Ok(Value::Int(2)))])
                    .wait()
            }),
            thunk(|ctx| {
                ctx.runtime()
                    .race_group(vec![thunk(|_| Ok(Value::Int(3)))])
                    .wait()
            }),
        ]);
        outer.wait()
    });
    assert_eq!(
        result.unwrap(),
        Value::list(vec![
            Value::list(vec![Value::Int(1), Value::Int(2)]),
            Value::Int(3)
        ])
    );
}

#[test]
fn test_group_failure_is_catchable() {
    let result = run(RuntimeConfig::with_policy(TaskFailurePolicy::Defer), |rt| {
        let group = rt.spawn_group(vec![
            thunk(|_| {
                pause(20);
                Ok(Value::Int(1))
            }),
            thunk(|_| {
                pause(40);
                Err(RuntimeError::thrown("member"))
            }),
        ]);
        match group.wait() {
            Err(e) if e.is_recoverable() => Ok(Value::from(e.to_string())),
            other => other,
        }
    });
    assert_eq!(result.unwrap(), Value::from("member"));
}
