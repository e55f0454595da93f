//! Error taxonomy for plan validation and execution.

use thiserror::Error;

/// Result type for plan operations.
pub type PlanResult<T> = Result<T, PlanError>;

/// A plan failed static validation. Always fatal before execution
/// starts; every variant names the offending step and field.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("plan is not a sequence of step objects: {0}")]
    Malformed(String),

    #[error("invalid step id '{id}'")]
    InvalidStepId { id: String },

    #[error("duplicate step id '{id}'")]
    DuplicateStepId { id: String },

    #[error("invalid type in step '{step}'")]
    UnknownType { step: String },

    #[error("unknown server in step '{step}'")]
    UnknownServer { step: String },

    #[error("unknown tool '{tool}' in step '{step}'")]
    UnknownTool { step: String, tool: String },

    #[error("missing required argument '{argument}' for tool '{tool}' in step '{step}'")]
    MissingArgument {
        step: String,
        tool: String,
        argument: String,
    },

    #[error("argument '{argument}' for tool '{tool}' in step '{step}' must be {expected}")]
    ArgumentKind {
        step: String,
        tool: String,
        argument: String,
        expected: String,
    },

    #[error("unexpected argument '{argument}' for tool '{tool}' in step '{step}'")]
    UnexpectedArgument {
        step: String,
        tool: String,
        argument: String,
    },

    #[error("invalid $from in step '{step}': {reason}")]
    FromFormat { step: String, reason: String },

    #[error("plan mixes steps with and without $from (step '{step}')")]
    MixedDependencyModes { step: String },

    #[error("unknown $from reference '{reference}' in step '{step}'")]
    UnknownStepReference { step: String, reference: String },

    #[error("step '{step}' references later step '{reference}'")]
    ForwardReference { step: String, reference: String },

    #[error("step '{step}' references itself")]
    SelfReference { step: String },
}

/// Errors surfaced by graph construction and plan execution.
#[derive(Debug, Clone, Error)]
pub enum PlanError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("contract already registered: {0}")]
    DuplicateContract(String),

    #[error("cycle detected in execution graph ({remaining} nodes unreachable)")]
    CycleDetected { remaining: usize },

    /// A `$from` reference was absent from the execution state at
    /// resolution time. Can only happen under a buggy runner; fatal.
    #[error("missing dependency '{reference}' for step '{step}'")]
    DependencyMissing { step: String, reference: String },

    #[error("remote error from '{tool}': {message}")]
    Remote { tool: String, message: String },

    #[error("transport failure on '{server}' session: {message}")]
    Transport { server: String, message: String },

    #[error("call to '{tool}' timed out after {timeout_s}s")]
    Timeout { tool: String, timeout_s: u64 },

    #[error("execution cancelled")]
    Cancelled,

    #[error("session error: {0}")]
    Session(String),
}

impl PlanError {
    /// Transient failures eligible for contract-driven retry. Timeouts
    /// and transport failures are retry-equivalent to remote errors.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            PlanError::Remote { .. } | PlanError::Transport { .. } | PlanError::Timeout { .. }
        )
    }
}
