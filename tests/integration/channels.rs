//! Channel semantics between tasks

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use braid::{run, Channel, ErrorKind, Runtime, RuntimeConfig, TaskFailurePolicy, Value};

#[test]
fn test_rendezvous_round_trip() {
    let result = run(RuntimeConfig::default(), |rt| {
        let ch = Channel::rendezvous();
        let tx = ch.clone();
        let sender = rt.spawn(move |_ctx| {
            tx.send(Value::from("ping"))?;
            Ok(Value::Null)
        });
        thread::sleep(Duration::from_millis(20));
        assert_eq!(ch.len(), 0);
        let got = ch.recv_value()?;
        sender.wait()?;
        Ok(got)
    });
    assert_eq!(result.unwrap(), Value::list(vec![Value::from("ping"), Value::Bool(false)]));
}

#[test]
fn test_buffered_capacity_then_block() {
    let rt = Runtime::default();
    let ch = Channel::buffered(3);
    let sent = Arc::new(AtomicUsize::new(0));

    let tx = ch.clone();
    let counter = Arc::clone(&sent);
    let sender = rt.spawn(move |_ctx| {
        for i in 0..4 {
            tx.send(Value::Int(i))?;
            counter.fetch_add(1, Ordering::SeqCst);
        }
        Ok(Value::Null)
    });

    thread::sleep(Duration::from_millis(50));
    assert_eq!(sent.load(Ordering::SeqCst), 3);
    assert_eq!(ch.len(), 3);

    assert_eq!(ch.recv().unwrap().value, Value::Int(0));
    sender.wait().unwrap();
    assert_eq!(sent.load(Ordering::SeqCst), 4);
}

#[test]
fn test_done_then_recv_and_send() {
    let rt = Runtime::new(RuntimeConfig::with_policy(TaskFailurePolicy::Defer));
    let ch = Channel::rendezvous();
    assert!(ch.done());
    assert!(!ch.done());
    assert_eq!(ch.recv_value().unwrap(), Value::list(vec![Value::Null, Value::Bool(true)]));

    let tx = ch.clone();
    let task = rt.spawn(move |_ctx| {
        tx.send(Value::Int(1))?;
        Ok(Value::Null)
    });
    let err = task.wait().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::TaskFailed);

    let direct = ch.send(Value::Int(2)).unwrap_err();
    assert_eq!(direct.kind(), ErrorKind::SendOnClosed);
    assert!(direct.is_fatal());
}

#[test]
fn test_producer_consumer_pipeline() {
    let result = run(RuntimeConfig::default(), |rt| {
        let ch = Channel::buffered(4);
        let producers: Vec<_> = (0..4)
            .map(|p| {
                let tx = ch.clone();
                rt.spawn(move |_ctx| {
                    for i in 0..25 {
                        tx.send(Value::Int(p * 100 + i))?;
                    }
                    Ok(Value::Null)
                })
            })
            .collect();

        let rx = ch.clone();
        let consumer = rt.spawn(move |_ctx| {
            let mut sum = 0;
            loop {
                let item = rx.recv()?;
                if item.done {
                    break;
                }
                sum += item.value.as_int().unwrap_or(0);
            }
            Ok(Value::Int(sum))
        });

        for producer in &producers {
            producer.wait()?;
        }
        ch.done();
        consumer.wait()
    });
    let expected: i64 = (0..4).map(|p| (0..25).map(|i| p * 100 + i).sum::<i64>()).sum();
    assert_eq!(result.unwrap(), Value::Int(expected));
}
