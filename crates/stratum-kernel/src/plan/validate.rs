//! Syntactic and semantic plan validation against the contract
//! registry.
//!
//! Two passes, mirroring the order guarantees callers rely on: per-step
//! structure first (ids, types, servers, tools, argument schemas), then
//! `$from` reference integrity across the whole plan.

use crate::contract::ContractRegistry;
use crate::error::ValidationError;
use crate::plan::{DependencyMode, FromRef, Plan, ServerKind, Step, StepKind, dep_placeholder};
use regex::Regex;
use std::collections::{HashMap, HashSet};

const ID_PATTERN: &str = "^[a-z][a-z0-9_]*$";

/// Validates raw plans before graph construction or execution.
pub struct PlanValidator<'a> {
    registry: &'a ContractRegistry,
    id_pattern: Regex,
}

impl<'a> PlanValidator<'a> {
    pub fn new(registry: &'a ContractRegistry) -> Self {
        Self {
            registry,
            id_pattern: Regex::new(ID_PATTERN).expect("static id pattern"),
        }
    }

    /// Validate the plan and report which dependency mode it uses.
    pub fn validate(&self, plan: &Plan) -> Result<DependencyMode, ValidationError> {
        let mut seen = HashSet::new();
        for step in plan {
            self.validate_step(step, &mut seen)?;
        }

        let mode = self.dependency_mode(plan)?;
        if mode == DependencyMode::Explicit {
            self.validate_references(plan)?;
        }
        Ok(mode)
    }

    /// Either every step declares `$from` or none does.
    fn dependency_mode(&self, plan: &Plan) -> Result<DependencyMode, ValidationError> {
        if let Some(mode) = plan.dependency_mode() {
            return Ok(mode);
        }
        let step = plan
            .steps()
            .iter()
            .find(|step| step.from.is_none())
            .map(|step| step.id.clone())
            .unwrap_or_default();
        Err(ValidationError::MixedDependencyModes { step })
    }

    fn validate_step(
        &self,
        step: &Step,
        seen: &mut HashSet<String>,
    ) -> Result<(), ValidationError> {
        if !self.id_pattern.is_match(&step.id) {
            return Err(ValidationError::InvalidStepId {
                id: step.id.clone(),
            });
        }
        if !seen.insert(step.id.clone()) {
            return Err(ValidationError::DuplicateStepId {
                id: step.id.clone(),
            });
        }

        if step.kind == StepKind::Unknown {
            return Err(ValidationError::UnknownType {
                step: step.id.clone(),
            });
        }
        if step.server == ServerKind::Unknown {
            return Err(ValidationError::UnknownServer {
                step: step.id.clone(),
            });
        }

        let contract =
            self.registry
                .get(&step.tool)
                .ok_or_else(|| ValidationError::UnknownTool {
                    step: step.id.clone(),
                    tool: step.tool.clone(),
                })?;

        for (name, kind) in &contract.required_args {
            let Some(value) = step.arguments.get(name) else {
                return Err(ValidationError::MissingArgument {
                    step: step.id.clone(),
                    tool: step.tool.clone(),
                    argument: name.clone(),
                });
            };
            // Dependency placeholders defer type checking to resolution.
            if dep_placeholder(value).is_some() {
                continue;
            }
            if !kind.matches(value) {
                return Err(ValidationError::ArgumentKind {
                    step: step.id.clone(),
                    tool: step.tool.clone(),
                    argument: name.clone(),
                    expected: kind.to_string(),
                });
            }
        }

        for (name, value) in &step.arguments {
            let Some(kind) = contract.arg_kind(name) else {
                return Err(ValidationError::UnexpectedArgument {
                    step: step.id.clone(),
                    tool: step.tool.clone(),
                    argument: name.clone(),
                });
            };
            if contract.required_args.contains_key(name) {
                continue;
            }
            if dep_placeholder(value).is_some() {
                continue;
            }
            if !kind.matches(value) {
                return Err(ValidationError::ArgumentKind {
                    step: step.id.clone(),
                    tool: step.tool.clone(),
                    argument: name.clone(),
                    expected: kind.to_string(),
                });
            }
        }

        if let Some(from) = &step.from {
            self.validate_from_format(step, from)?;
        }
        Ok(())
    }

    /// Format rule: a single dependency must be a bare string, fan-in
    /// must be a list.
    fn validate_from_format(&self, step: &Step, from: &FromRef) -> Result<(), ValidationError> {
        match from {
            FromRef::Many(ids) if ids.len() == 1 => Err(ValidationError::FromFormat {
                step: step.id.clone(),
                reason: "single dependency must be a string".to_string(),
            }),
            _ => Ok(()),
        }
    }

    /// Every reference must name an existing, strictly earlier step.
    fn validate_references(&self, plan: &Plan) -> Result<(), ValidationError> {
        let index: HashMap<&str, usize> = plan
            .steps()
            .iter()
            .enumerate()
            .map(|(i, step)| (step.id.as_str(), i))
            .collect();

        for (i, step) in plan.steps().iter().enumerate() {
            let Some(from) = &step.from else {
                continue;
            };
            for reference in from.refs() {
                let Some(&target) = index.get(reference) else {
                    return Err(ValidationError::UnknownStepReference {
                        step: step.id.clone(),
                        reference: reference.to_string(),
                    });
                };
                if target == i {
                    return Err(ValidationError::SelfReference {
                        step: step.id.clone(),
                    });
                }
                if target > i {
                    return Err(ValidationError::ForwardReference {
                        step: step.id.clone(),
                        reference: reference.to_string(),
                    });
                }
            }
        }
        Ok(())
    }
}
