//! Lexical environments
//!
//! The evaluator owns environments through `Arc`; debugger frames only ever
//! hold an [`EnvRef`] (a `Weak`), so returning from a function releases its
//! scope even while a debug session is attached.

use std::sync::{Arc, Weak};

use indexmap::IndexMap;
use parking_lot::RwLock;

use crate::runtime::value::Value;

/// Non-owning handle to an environment.
pub type EnvRef = Weak<Environment>;

/// A lexical scope: declaration-ordered bindings plus an optional parent.
#[derive(Debug, Default)]
pub struct Environment {
    vars: RwLock<IndexMap<String, Value>>,
    parent: Option<Arc<Environment>>,
}

impl Environment {
    /// Create a root scope.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Create a child scope of `parent`.
    pub fn child(parent: &Arc<Environment>) -> Arc<Self> {
        Arc::new(Self {
            vars: RwLock::new(IndexMap::new()),
            parent: Some(Arc::clone(parent)),
        })
    }

    /// Bind `name` in this scope, shadowing outer bindings.
    pub fn define(
        &self,
        name: impl Into<String>,
        value: Value,
    ) {
        self.vars.write().insert(name.into(), value);
    }

    /// Assign to the nearest scope that already binds `name`.
    ///
    /// Returns `false` when no scope binds it.
    pub fn assign(
        &self,
        name: &str,
        value: Value,
    ) -> bool {
        if let Some(slot) = self.vars.write().get_mut(name) {
            *slot = value;
            return true;
        }
        match &self.parent {
            Some(parent) => parent.assign(name, value),
            None => false,
        }
    }

    /// Look `name` up through the scope chain.
    pub fn lookup(
        &self,
        name: &str,
    ) -> Option<Value> {
        if let Some(value) = self.vars.read().get(name) {
            return Some(value.clone());
        }
        self.parent.as_ref().and_then(|p| p.lookup(name))
    }

    /// Snapshot of the bindings declared directly in this scope.
    pub fn locals(&self) -> Vec<(String, Value)> {
        self.vars
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Enclosing scope, if any.
    #[inline]
    pub fn parent(&self) -> Option<&Arc<Environment>> {
        self.parent.as_ref()
    }
}
