//! Runtime value representation
//!
//! `Value` is what flows through task result cells and channel buffers. All
//! variants are `Send + Sync` so a value produced on one task thread can be
//! read from any other.
//!
//! - Scalars are stored inline
//! - Strings and lists are shared through `Arc`, cloning is cheap
//! - Tasks, channels and functions compare by identity

use std::fmt;
use std::sync::Arc;

use crate::runtime::channel::Channel;
use crate::runtime::errors::{RuntimeError, RuntimeResult};
use crate::runtime::scheduler::Task;

/// Host closure signature backing a [`Function`] value.
pub type NativeFn = dyn Fn(&[Value]) -> RuntimeResult<Value> + Send + Sync;

/// A callable value.
///
/// The evaluator wraps its closures in this type; the runtime only ever calls
/// them (for `.then` continuations).
#[derive(Clone)]
pub struct Function {
    name: Arc<str>,
    call: Arc<NativeFn>,
}

impl Function {
    /// Wrap a host closure.
    pub fn new<F>(
        name: impl Into<Arc<str>>,
        call: F,
    ) -> Self
    where
        F: Fn(&[Value]) -> RuntimeResult<Value> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            call: Arc::new(call),
        }
    }

    /// Function name for diagnostics.
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Invoke the function.
    #[inline]
    pub fn call(
        &self,
        args: &[Value],
    ) -> RuntimeResult<Value> {
        (self.call)(args)
    }

    /// Identity comparison.
    #[inline]
    pub fn ptr_eq(
        &self,
        other: &Function,
    ) -> bool {
        Arc::ptr_eq(&self.call, &other.call)
    }
}

impl fmt::Debug for Function {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "Function({})", self.name)
    }
}

/// Runtime value
#[derive(Debug, Clone, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Arc<str>),
    List(Arc<Vec<Value>>),
    Function(Function),
    Task(Task),
    Channel(Channel),
}

impl Value {
    /// Build a list value.
    pub fn list(items: impl IntoIterator<Item = Value>) -> Self {
        Value::List(Arc::new(items.into_iter().collect()))
    }

    /// Name of the value's type, as the language reports it.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "string",
            Value::List(_) => "list",
            Value::Function(_) => "function",
            Value::Task(_) => "task",
            Value::Channel(_) => "channel",
        }
    }

    #[inline]
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Truthiness: `null`, `false`, `0`, `0.0`, `""` and `[]` are false.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Float(f) => *f != 0.0,
            Value::Str(s) => !s.is_empty(),
            Value::List(items) => !items.is_empty(),
            Value::Function(_) | Value::Task(_) | Value::Channel(_) => true,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items.as_slice()),
            _ => None,
        }
    }

    pub fn as_task(&self) -> Option<&Task> {
        match self {
            Value::Task(task) => Some(task),
            _ => None,
        }
    }

    /// Visit every task in this value, looking inside lists.
    pub fn for_each_task<F>(
        &self,
        f: &mut F,
    ) where
        F: FnMut(&Task),
    {
        match self {
            Value::Task(task) => f(task),
            Value::List(items) => items.iter().for_each(|item| item.for_each_task(f)),
            _ => {}
        }
    }

    pub fn as_channel(&self) -> Option<&Channel> {
        match self {
            Value::Channel(ch) => Some(ch),
            _ => None,
        }
    }

    /// Borrow the value as a function, or report a type error.
    pub fn expect_function(&self) -> RuntimeResult<&Function> {
        match self {
            Value::Function(func) => Ok(func),
            other => Err(RuntimeError::Type(format!(
                "expected function, found {}",
                other.type_name()
            ))),
        }
    }
}

impl PartialEq for Value {
    fn eq(
        &self,
        other: &Self,
    ) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Int(a), Value::Float(b)) | (Value::Float(b), Value::Int(a)) => {
                (*a as f64) == *b
            }
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::List(a), Value::List(b)) => a == b,
            (Value::Function(a), Value::Function(b)) => a.ptr_eq(b),
            (Value::Task(a), Value::Task(b)) => a.id() == b.id(),
            (Value::Channel(a), Value::Channel(b)) => a.same_channel(b),
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{}", x),
            Value::Str(s) => write!(f, "{}", s),
            Value::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
            Value::Function(func) => write!(f, "<fn {}>", func.name()),
            Value::Task(task) => write!(f, "<{} {}>", task.id(), task.state()),
            Value::Channel(ch) => write!(f, "<channel cap={}>", ch.capacity()),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Value::Float(x)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(Arc::from(s))
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(Arc::from(s))
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::List(Arc::new(items))
    }
}

impl From<Task> for Value {
    fn from(task: Task) -> Self {
        Value::Task(task)
    }
}

impl From<Channel> for Value {
    fn from(ch: Channel) -> Self {
        Value::Channel(ch)
    }
}

impl From<Function> for Value {
    fn from(func: Function) -> Self {
        Value::Function(func)
    }
}
