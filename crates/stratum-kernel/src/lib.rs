//! Stratum kernel
//!
//! The synchronous half of the plan execution engine: canonical state
//! keys, declarative tool contracts, the plan data model with its
//! validator, dependency-graph construction and Kahn layering. Nothing
//! in this crate performs I/O beyond configuration loading; the
//! executing half lives in `stratum-runtime`.

// configuration module
pub mod config;

// contract module
pub mod contract;

// error module
pub mod error;

// graph module
pub mod graph;

// plan module
pub mod plan;

// state module
pub mod state;

pub use config::RunnerConfig;
pub use contract::{ArgKind, ContractRegistry, StateResolver, ToolContract};
pub use error::{PlanError, PlanResult, ValidationError};
pub use graph::ExecutionGraph;
pub use graph::builder::GraphBuilder;
pub use graph::layers::build_layers;
pub use plan::validate::PlanValidator;
pub use plan::{DependencyMode, FromRef, Plan, ServerKind, Step, StepKind};
pub use state::{ExecutionState, StateEffects, StateKey};
