//! Breakpoint store.
//!
//! Breakpoints are keyed by normalized file path and hold a sorted,
//! de-duplicated line set. An id is minted the first time a file:line is
//! registered and reused for every later registration of the same location,
//! even after the breakpoint was removed.

use std::collections::{BTreeSet, HashMap};
use std::fmt;

use indexmap::IndexMap;
use serde::Serialize;

use crate::runtime::errors::{RuntimeError, RuntimeResult};

/// Unique identifier for breakpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct BreakpointId(u64);

impl BreakpointId {
    /// Create a new breakpoint ID.
    #[inline]
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Get the inner value.
    #[inline]
    pub fn inner(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for BreakpointId {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "breakpoint-{}", self.0)
    }
}

/// An active breakpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Breakpoint {
    pub id: BreakpointId,
    pub file: String,
    pub line: u32,
}

/// Normalize a source path for breakpoint matching.
///
/// Backslashes become slashes and `.` segments are dropped, so `./src/a.bx`,
/// `src/./a.bx` and `src\a.bx` name the same file.
pub fn normalize_path(path: &str) -> String {
    let unified = path.replace('\\', "/");
    let absolute = unified.starts_with('/');
    let parts: Vec<&str> = unified
        .split('/')
        .filter(|seg| !seg.is_empty() && *seg != ".")
        .collect();
    let joined = parts.join("/");
    if absolute {
        format!("/{}", joined)
    } else {
        joined
    }
}

/// All breakpoints of a debug session.
#[derive(Debug, Default)]
pub struct BreakpointStore {
    lines: IndexMap<String, BTreeSet<u32>>,
    ids: HashMap<(String, u32), BreakpointId>,
    locations: HashMap<BreakpointId, (String, u32)>,
    next_id: u64,
}

impl BreakpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a breakpoint; re-adding a location returns its existing id.
    pub fn add(
        &mut self,
        file: &str,
        line: u32,
    ) -> BreakpointId {
        let file = normalize_path(file);
        let id = self.id_for(&file, line);
        self.lines.entry(file).or_default().insert(line);
        id
    }

    fn id_for(
        &mut self,
        file: &str,
        line: u32,
    ) -> BreakpointId {
        let key = (file.to_string(), line);
        if let Some(id) = self.ids.get(&key) {
            return *id;
        }
        self.next_id += 1;
        let id = BreakpointId(self.next_id);
        self.ids.insert(key.clone(), id);
        self.locations.insert(id, key);
        id
    }

    /// Remove an active breakpoint by id.
    pub fn remove(
        &mut self,
        id: BreakpointId,
    ) -> RuntimeResult<Breakpoint> {
        let (file, line) = self
            .locations
            .get(&id)
            .cloned()
            .ok_or(RuntimeError::UnknownBreakpoint(id))?;
        let removed = match self.lines.get_mut(&file) {
            Some(set) => set.remove(&line),
            None => false,
        };
        if !removed {
            return Err(RuntimeError::UnknownBreakpoint(id));
        }
        if self.lines.get(&file).is_some_and(|set| set.is_empty()) {
            self.lines.shift_remove(&file);
        }
        Ok(Breakpoint { id, file, line })
    }

    /// Remove everything; returns how many breakpoints were active.
    pub fn clear(&mut self) -> usize {
        let count = self.len();
        self.lines.clear();
        count
    }

    /// Replace the breakpoints of one file with `lines`.
    pub fn set_file(
        &mut self,
        file: &str,
        lines: &[u32],
    ) -> Vec<Breakpoint> {
        let file = normalize_path(file);
        let set: BTreeSet<u32> = lines.iter().copied().collect();
        let result = set
            .iter()
            .map(|&line| Breakpoint {
                id: self.id_for(&file, line),
                file: file.clone(),
                line,
            })
            .collect();
        if set.is_empty() {
            self.lines.shift_remove(&file);
        } else {
            self.lines.insert(file, set);
        }
        result
    }

    /// The id of the breakpoint at `file:line`, if one is active.
    pub fn matches(
        &self,
        file: &str,
        line: u32,
    ) -> Option<BreakpointId> {
        let set = match self.lines.get(file) {
            Some(set) => set,
            None => self.lines.get(&normalize_path(file))?,
        };
        if !set.contains(&line) {
            return None;
        }
        self.ids.get(&(normalize_path(file), line)).copied()
    }

    /// Active lines of `file`, ascending.
    pub fn lines(
        &self,
        file: &str,
    ) -> Vec<u32> {
        self.lines
            .get(&normalize_path(file))
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Every active breakpoint, by file registration order then line.
    pub fn list(&self) -> Vec<Breakpoint> {
        self.lines
            .iter()
            .flat_map(|(file, set)| {
                set.iter().filter_map(move |&line| {
                    self.ids.get(&(file.clone(), line)).map(|&id| Breakpoint {
                        id,
                        file: file.clone(),
                        line,
                    })
                })
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.lines.values().map(|set| set.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
