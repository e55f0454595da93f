//! Declarative tool contracts and the boot-time registry.
//!
//! A contract describes a tool's interaction with state; it is not
//! execution logic. Contracts are registered once at process start and
//! never mutated afterwards.

use crate::error::{PlanError, PlanResult};
use crate::state::{StateEffects, StateKey};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

/// Declared type of a tool argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgKind {
    String,
    Integer,
    Number,
    Boolean,
    Object,
    Array,
    /// Accepts anything; used where the payload is injected at runtime.
    Any,
}

impl ArgKind {
    pub fn matches(&self, value: &Value) -> bool {
        match self {
            ArgKind::String => value.is_string(),
            ArgKind::Integer => value.is_i64() || value.is_u64(),
            ArgKind::Number => value.is_number(),
            ArgKind::Boolean => value.is_boolean(),
            ArgKind::Object => value.is_object(),
            ArgKind::Array => value.is_array(),
            ArgKind::Any => true,
        }
    }
}

impl fmt::Display for ArgKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ArgKind::String => "string",
            ArgKind::Integer => "integer",
            ArgKind::Number => "number",
            ArgKind::Boolean => "boolean",
            ArgKind::Object => "object",
            ArgKind::Array => "array",
            ArgKind::Any => "any",
        };
        f.write_str(name)
    }
}

/// Pure mapping from call arguments to the concrete state keys the call
/// touches. Identical arguments must yield identical effects.
pub type StateResolver = Arc<dyn Fn(&Map<String, Value>) -> StateEffects + Send + Sync>;

/// Declarative description of a tool's interaction with state.
#[derive(Clone)]
pub struct ToolContract {
    pub name: String,
    /// State read when no resolver is present.
    pub reads: BTreeSet<StateKey>,
    /// State written when no resolver is present.
    pub writes: BTreeSet<StateKey>,
    /// Safe to re-issue without changing the outcome.
    pub idempotent: bool,
    /// Two calls may run in either order with an equivalent final state.
    pub commutative: bool,
    pub required_args: BTreeMap<String, ArgKind>,
    pub optional_args: BTreeMap<String, ArgKind>,
    /// Computes dynamic state keys (e.g. `fs.file:<path>`) from arguments.
    pub state_resolver: Option<StateResolver>,
}

impl fmt::Debug for ToolContract {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolContract")
            .field("name", &self.name)
            .field("reads", &self.reads)
            .field("writes", &self.writes)
            .field("idempotent", &self.idempotent)
            .field("commutative", &self.commutative)
            .field("required_args", &self.required_args)
            .field("optional_args", &self.optional_args)
            .field("state_resolver", &self.state_resolver.as_ref().map(|_| "<fn>"))
            .finish()
    }
}

impl ToolContract {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            reads: BTreeSet::new(),
            writes: BTreeSet::new(),
            idempotent: false,
            commutative: false,
            required_args: BTreeMap::new(),
            optional_args: BTreeMap::new(),
            state_resolver: None,
        }
    }

    pub fn reads(mut self, key: StateKey) -> Self {
        self.reads.insert(key);
        self
    }

    pub fn writes(mut self, key: StateKey) -> Self {
        self.writes.insert(key);
        self
    }

    pub fn idempotent(mut self) -> Self {
        self.idempotent = true;
        self
    }

    pub fn commutative(mut self) -> Self {
        self.commutative = true;
        self
    }

    pub fn required(mut self, name: impl Into<String>, kind: ArgKind) -> Self {
        self.required_args.insert(name.into(), kind);
        self
    }

    pub fn optional(mut self, name: impl Into<String>, kind: ArgKind) -> Self {
        self.optional_args.insert(name.into(), kind);
        self
    }

    pub fn with_state_resolver(
        mut self,
        resolver: impl Fn(&Map<String, Value>) -> StateEffects + Send + Sync + 'static,
    ) -> Self {
        self.state_resolver = Some(Arc::new(resolver));
        self
    }

    /// Whether the argument schema accepts `name`.
    pub fn accepts(&self, name: &str) -> bool {
        self.required_args.contains_key(name) || self.optional_args.contains_key(name)
    }

    /// Declared kind of the argument `name`, if the schema knows it.
    pub fn arg_kind(&self, name: &str) -> Option<ArgKind> {
        self.required_args
            .get(name)
            .or_else(|| self.optional_args.get(name))
            .copied()
    }

    /// Effective state effects for a call with `args`: the resolver when
    /// present, the static sets otherwise.
    pub fn effects(&self, args: &Map<String, Value>) -> StateEffects {
        match &self.state_resolver {
            Some(resolver) => resolver(args),
            None => StateEffects {
                reads: self.reads.clone(),
                writes: self.writes.clone(),
            },
        }
    }
}

/// Strip the `file://` scheme and the trailing slash from a resource
/// URI, leaving the logical path.
pub fn resource_path(uri: &str) -> &str {
    uri.strip_prefix("file://").unwrap_or(uri).trim_end_matches('/')
}

/// Read-only lookup of tool contracts, populated at process start.
#[derive(Debug, Default, Clone)]
pub struct ContractRegistry {
    contracts: HashMap<String, ToolContract>,
}

impl ContractRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, contract: ToolContract) -> PlanResult<()> {
        if self.contracts.contains_key(&contract.name) {
            return Err(PlanError::DuplicateContract(contract.name));
        }
        self.contracts.insert(contract.name.clone(), contract);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&ToolContract> {
        self.contracts.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.contracts.contains_key(name)
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.contracts.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.contracts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contracts.is_empty()
    }

    /// The registry for the built-in db and file backends.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        let contracts = [
            ToolContract::new("create_user")
                .writes(StateKey::db_users())
                .commutative()
                .required("name", ArgKind::String)
                .required("email", ArgKind::String),
            ToolContract::new("update_user")
                .reads(StateKey::db_users())
                .writes(StateKey::db_users())
                .required("id", ArgKind::Integer)
                .optional("name", ArgKind::String)
                .optional("email", ArgKind::String),
            ToolContract::new("delete_user")
                .reads(StateKey::db_users())
                .writes(StateKey::db_users())
                .required("id", ArgKind::Integer),
            ToolContract::new("list_users")
                .reads(StateKey::db_users())
                .idempotent()
                .commutative()
                .optional("name_filter", ArgKind::String)
                .optional("email_filter", ArgKind::String),
            ToolContract::new("get_user_by_id")
                .reads(StateKey::db_users())
                .idempotent()
                .commutative()
                .required("id", ArgKind::Integer),
            // The payload of `content` is injected from upstream step
            // outputs at execution time, so its declared kind is open.
            ToolContract::new("write_file")
                .required("path", ArgKind::String)
                .optional("content", ArgKind::Any)
                .with_state_resolver(|args| match args.get("path").and_then(Value::as_str) {
                    Some(path) => StateEffects::new().write(StateKey::fs_file(path)),
                    None => StateEffects::new(),
                }),
            ToolContract::new("read_file")
                .idempotent()
                .commutative()
                .required("uri", ArgKind::String)
                .with_state_resolver(|args| match args.get("uri").and_then(Value::as_str) {
                    Some(uri) => StateEffects::new().read(StateKey::fs_file(resource_path(uri))),
                    None => StateEffects::new(),
                }),
        ];
        for contract in contracts {
            registry
                .register(contract)
                .expect("builtin contract names are unique");
        }
        registry
    }
}
