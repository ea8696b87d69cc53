//! Scheduler 单元测试
//!
//! 测试任务、续体、分组与失败策略

use std::thread;
use std::time::Duration;

use crate::runtime::errors::RuntimeError;
use crate::runtime::scheduler::TaskFailurePolicy;
use crate::runtime::value::Value;
use crate::runtime::Runtime;
use crate::util::config::RuntimeConfig;


fn runtime(policy: TaskFailurePolicy) -> Runtime {
    Runtime::new(RuntimeConfig::with_policy(policy))
}

fn sleep_ms(ms: u64) {
    thread::sleep(Duration::from_millis(ms));
}

fn fail(message: &str) -> Result<Value, RuntimeError> {
    Err(RuntimeError::thrown(message))
}

fn thrown_text(error: &RuntimeError) -> Option<String> {
    match error {
        RuntimeError::Thrown(value) => value.as_str().map(str::to_string),
        _ => None,
    }
}

/// Poll `cond` for up to two seconds.
fn eventually(cond: impl Fn() -> bool) -> bool {
    for _ in 0..400 {
        if cond() {
            return true;
        }
        sleep_ms(5);
    }
    cond()
}
