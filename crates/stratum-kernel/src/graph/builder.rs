//! Derives the execution graph from a validated plan.
//!
//! Two modes, one active per run: explicit edges straight from the
//! top-level `$from` references, or inferred edges from contract-based
//! conflict detection over each step's effective state keys.

use super::ExecutionGraph;
use crate::contract::ContractRegistry;
use crate::error::{PlanResult, ValidationError};
use crate::plan::{DependencyMode, Plan, ServerKind, Step};
use crate::state::StateEffects;
use tracing::debug;

/// Builds dependency edges for a validated plan.
pub struct GraphBuilder<'a> {
    registry: &'a ContractRegistry,
}

impl<'a> GraphBuilder<'a> {
    pub fn new(registry: &'a ContractRegistry) -> Self {
        Self { registry }
    }

    /// Build and acyclicity-check the graph. The mode comes from the
    /// plan itself: explicit when every step declares `$from`.
    pub fn build(&self, plan: &Plan) -> PlanResult<ExecutionGraph> {
        let mode = match plan.dependency_mode() {
            Some(mode) => mode,
            // the validator rejects mixed plans before we ever get here
            None => {
                let step = plan
                    .steps()
                    .iter()
                    .find(|step| step.from.is_none())
                    .map(|step| step.id.clone())
                    .unwrap_or_default();
                return Err(ValidationError::MixedDependencyModes { step }.into());
            }
        };

        let graph = match mode {
            DependencyMode::Explicit => self.build_explicit(plan)?,
            DependencyMode::Inferred => self.build_inferred(plan),
        };
        graph.assert_acyclic()?;
        debug!(
            nodes = graph.len(),
            edges = graph.edge_count(),
            ?mode,
            "execution graph built"
        );
        Ok(graph)
    }

    /// One edge per `$from` reference; nothing else is consulted.
    fn build_explicit(&self, plan: &Plan) -> PlanResult<ExecutionGraph> {
        let mut graph = ExecutionGraph::new(plan.len());
        for (to, step) in plan.steps().iter().enumerate() {
            let Some(from) = &step.from else { continue };
            for reference in from.refs() {
                let Some(src) = plan.index_of(reference) else {
                    return Err(ValidationError::UnknownStepReference {
                        step: step.id.clone(),
                        reference: reference.to_string(),
                    }
                    .into());
                };
                graph.add_edge(src, to);
            }
        }
        Ok(graph)
    }

    /// Conflict inference over every ordered pair (i < j).
    fn build_inferred(&self, plan: &Plan) -> ExecutionGraph {
        let steps = plan.steps();
        let effects: Vec<StateEffects> = steps.iter().map(|step| self.step_effects(step)).collect();
        let commutative: Vec<bool> = steps
            .iter()
            .map(|step| {
                self.registry
                    .get(&step.tool)
                    .is_some_and(|contract| contract.commutative)
            })
            .collect();

        let mut graph = ExecutionGraph::new(steps.len());
        for i in 0..steps.len() {
            for j in (i + 1)..steps.len() {
                if Self::conflicts(&steps[i], &steps[j], &effects[i], &effects[j], commutative[i], commutative[j]) {
                    debug!(from = %steps[i].id, to = %steps[j].id, "inferred dependency edge");
                    graph.add_edge(i, j);
                }
            }
        }
        graph
    }

    /// Effective effects: the contract's resolver when present, else its
    /// static sets.
    fn step_effects(&self, step: &Step) -> StateEffects {
        match self.registry.get(&step.tool) {
            Some(contract) => contract.effects(&step.arguments),
            None => StateEffects::default(),
        }
    }

    fn conflicts(
        earlier: &Step,
        later: &Step,
        a: &StateEffects,
        b: &StateEffects,
        a_commutative: bool,
        b_commutative: bool,
    ) -> bool {
        // read-after-write
        if !a.writes.is_disjoint(&b.reads) {
            return true;
        }
        // write/write on the same key, unless both writers commute
        if !a.writes.is_disjoint(&b.writes) && !(a_commutative && b_commutative) {
            return true;
        }
        // conservative cross-server rule: a db write precedes any later
        // file operation, so externally visible state cannot leak into a
        // file before its producer commits
        if earlier.server == ServerKind::Db
            && !a.writes.is_empty()
            && later.server == ServerKind::File
        {
            return true;
        }
        false
    }
}
