//! Canonical state identifiers and per-run execution state.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};
use std::fmt;

/// Canonical identifier for a logical piece of state a tool touches.
///
/// Two namespaces are predefined: the users table (`db.users`) and a
/// single file at a concrete path (`fs.file:<path>`). Keys are compared
/// by equality; set intersection decides whether two steps conflict.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StateKey(String);

impl StateKey {
    /// The users table.
    pub const DB_USERS: &'static str = "db.users";

    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn db_users() -> Self {
        Self(Self::DB_USERS.to_string())
    }

    /// The file at `path`.
    pub fn fs_file(path: &str) -> Self {
        Self(format!("fs.file:{path}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The state a tool call touches, resolved to concrete keys.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StateEffects {
    pub reads: BTreeSet<StateKey>,
    pub writes: BTreeSet<StateKey>,
}

impl StateEffects {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn read(mut self, key: StateKey) -> Self {
        self.reads.insert(key);
        self
    }

    pub fn write(mut self, key: StateKey) -> Self {
        self.writes.insert(key);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.reads.is_empty() && self.writes.is_empty()
    }
}

/// Output of every completed step, keyed by step id.
///
/// Lives for a single plan execution and is dropped with it; nothing
/// here is persisted.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExecutionState {
    outputs: HashMap<String, Value>,
}

impl ExecutionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, step_id: impl Into<String>, output: Value) {
        self.outputs.insert(step_id.into(), output);
    }

    pub fn get(&self, step_id: &str) -> Option<&Value> {
        self.outputs.get(step_id)
    }

    pub fn contains(&self, step_id: &str) -> bool {
        self.outputs.contains_key(step_id)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.outputs.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.outputs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outputs.is_empty()
    }

    pub fn into_outputs(self) -> HashMap<String, Value> {
        self.outputs
    }
}
