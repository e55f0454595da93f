//! Single-step execution: argument resolution, dispatch and
//! contract-driven retries.

use crate::normalize::normalize_outputs;
use crate::router::SessionLease;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use stratum_kernel::config::RunnerConfig;
use stratum_kernel::contract::{ContractRegistry, resource_path};
use stratum_kernel::error::{PlanError, PlanResult, ValidationError};
use stratum_kernel::plan::{Step, StepKind, dep_placeholder};
use stratum_kernel::state::ExecutionState;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Executes one step at a time on behalf of the plan runner.
#[derive(Clone)]
pub struct StepExecutor {
    registry: Arc<ContractRegistry>,
    config: RunnerConfig,
}

impl StepExecutor {
    pub fn new(registry: Arc<ContractRegistry>, config: RunnerConfig) -> Self {
        Self { registry, config }
    }

    /// Replace every `{$from}` placeholder with the producer's recorded
    /// output and apply the `content` injection convention.
    ///
    /// Non-suspending: the runner calls this on its own task before the
    /// worker is launched, so the execution state needs no lock.
    pub fn resolve_arguments(
        &self,
        step: &Step,
        state: &ExecutionState,
    ) -> PlanResult<Map<String, Value>> {
        let mut resolved = Map::new();
        for (name, value) in &step.arguments {
            resolved.insert(name.clone(), self.resolve_value(&step.id, value, state)?);
        }

        // Data-binding convention: a tool step with a non-empty $from
        // receives its producers' normalized outputs as `content`,
        // provided the schema accepts that argument.
        if step.kind == StepKind::Tool
            && let Some(from) = &step.from
            && !from.is_empty()
            && self
                .registry
                .get(&step.tool)
                .is_some_and(|contract| contract.accepts("content"))
        {
            let mut outputs = Vec::new();
            for reference in from.refs() {
                let output =
                    state
                        .get(reference)
                        .ok_or_else(|| PlanError::DependencyMissing {
                            step: step.id.clone(),
                            reference: reference.to_string(),
                        })?;
                outputs.push(output.clone());
            }
            resolved.insert("content".to_string(), normalize_outputs(&outputs));
        }

        Ok(resolved)
    }

    fn resolve_value(
        &self,
        step_id: &str,
        value: &Value,
        state: &ExecutionState,
    ) -> PlanResult<Value> {
        if let Some(refs) = dep_placeholder(value) {
            let mut outputs = Vec::new();
            for reference in refs.refs() {
                let output =
                    state
                        .get(reference)
                        .ok_or_else(|| PlanError::DependencyMissing {
                            step: step_id.to_string(),
                            reference: reference.to_string(),
                        })?;
                outputs.push(output.clone());
            }
            return Ok(match outputs.len() {
                0 => Value::Null,
                1 => outputs.remove(0),
                _ => Value::Array(outputs),
            });
        }

        match value {
            Value::Object(map) => {
                let mut resolved = Map::new();
                for (name, nested) in map {
                    resolved.insert(name.clone(), self.resolve_value(step_id, nested, state)?);
                }
                Ok(Value::Object(resolved))
            }
            Value::Array(items) => {
                let mut resolved = Vec::with_capacity(items.len());
                for nested in items {
                    resolved.push(self.resolve_value(step_id, nested, state)?);
                }
                Ok(Value::Array(resolved))
            }
            other => Ok(other.clone()),
        }
    }

    /// Dispatch the resolved call over the leased session, applying the
    /// contract-driven retry policy.
    pub async fn execute(
        &self,
        step: &Step,
        resolved: Map<String, Value>,
        lease: &SessionLease,
        cancel: &CancellationToken,
    ) -> PlanResult<Value> {
        let attempts = self.attempt_budget(step);
        let mut last_error: Option<PlanError> = None;

        for attempt in 1..=attempts {
            if attempt > 1 {
                let delay =
                    Duration::from_millis(self.config.retry_backoff_ms * u64::from(attempt - 1));
                warn!(step = %step.id, tool = %step.tool, attempt, "retrying after transient error");
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = cancel.cancelled() => return Err(PlanError::Cancelled),
                }
            }

            match self.dispatch(step, resolved.clone(), lease).await {
                Ok(output) => {
                    if attempt > 1 {
                        debug!(step = %step.id, attempt, "call succeeded after retry");
                    }
                    return Ok(output);
                }
                Err(error) if error.is_transient() && attempt < attempts => {
                    last_error = Some(error);
                }
                Err(error) => return Err(error),
            }
        }

        Err(last_error
            .unwrap_or_else(|| PlanError::Session("retry loop completed without result".to_string())))
    }

    /// Resources get one attempt; idempotent tools get `1 + max_retries`;
    /// everything else must not be re-issued.
    fn attempt_budget(&self, step: &Step) -> u32 {
        if step.kind == StepKind::Resource {
            return 1;
        }
        match self.registry.get(&step.tool) {
            Some(contract) if contract.idempotent => 1 + self.config.max_retries,
            _ => 1,
        }
    }

    async fn dispatch(
        &self,
        step: &Step,
        resolved: Map<String, Value>,
        lease: &SessionLease,
    ) -> PlanResult<Value> {
        let call = async {
            match step.kind {
                StepKind::Tool => lease.session().call_tool(&step.tool, resolved).await,
                StepKind::Resource => {
                    let uri = resolved.get("uri").and_then(Value::as_str).ok_or_else(|| {
                        PlanError::Session(format!("resource step '{}' has no uri", step.id))
                    })?;
                    lease.session().read_resource(resource_path(uri)).await
                }
                StepKind::Unknown => Err(ValidationError::UnknownType {
                    step: step.id.clone(),
                }
                .into()),
            }
        };

        match tokio::time::timeout(Duration::from_secs(self.config.call_timeout_s), call).await {
            Ok(result) => result,
            Err(_) => Err(PlanError::Timeout {
                tool: step.tool.clone(),
                timeout_s: self.config.call_timeout_s,
            }),
        }
    }
}
