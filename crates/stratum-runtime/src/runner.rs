//! Drives a validated plan's dependency graph to completion over
//! pooled sessions.
//!
//! Two equivalent strategies with one observable contract: streaming
//! topological order (a step launches the moment its last dependency
//! completes) and layer barriers (every Kahn level runs as a batch).

use crate::executor::StepExecutor;
use crate::router::SessionRouter;
use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::Arc;
use stratum_kernel::config::RunnerConfig;
use stratum_kernel::contract::ContractRegistry;
use stratum_kernel::error::{PlanError, PlanResult};
use stratum_kernel::graph::ExecutionGraph;
use stratum_kernel::graph::builder::GraphBuilder;
use stratum_kernel::graph::layers::build_layers;
use stratum_kernel::plan::Plan;
use stratum_kernel::plan::validate::PlanValidator;
use stratum_kernel::state::ExecutionState;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, warn};
use uuid::Uuid;

/// Executes whole plans: validate, build the graph, drive workers.
pub struct PlanRunner {
    registry: Arc<ContractRegistry>,
    router: Arc<SessionRouter>,
    executor: StepExecutor,
    config: RunnerConfig,
}

/// Bookkeeping shared by both execution strategies.
struct RunState {
    state: ExecutionState,
    failed: Vec<bool>,
    first_error: Option<PlanError>,
    fail_fast: bool,
    cancel: CancellationToken,
}

impl RunState {
    fn new(nodes: usize, fail_fast: bool) -> Self {
        Self {
            state: ExecutionState::new(),
            failed: vec![false; nodes],
            first_error: None,
            fail_fast,
            cancel: CancellationToken::new(),
        }
    }

    fn record_failure(&mut self, node: usize, error: PlanError) {
        if self.first_error.is_none() {
            if self.fail_fast {
                // stop backoff waits and further launches; in-flight
                // calls own remote side effects and are awaited, not
                // aborted
                self.cancel.cancel();
            }
            self.first_error = Some(error);
        }
        self.failed[node] = true;
    }

    fn into_result(self) -> PlanResult<ExecutionState> {
        match self.first_error {
            Some(error) => Err(error),
            None => Ok(self.state),
        }
    }
}

impl PlanRunner {
    pub fn new(
        registry: Arc<ContractRegistry>,
        router: Arc<SessionRouter>,
        config: RunnerConfig,
    ) -> Self {
        let executor = StepExecutor::new(Arc::clone(&registry), config.clone());
        Self {
            registry,
            router,
            executor,
            config,
        }
    }

    /// Streaming topological execution.
    pub async fn run(&self, plan: &Plan) -> PlanResult<ExecutionState> {
        self.run_with(plan, Strategy::Streaming).await
    }

    /// Layer-barrier execution.
    pub async fn run_layered(&self, plan: &Plan) -> PlanResult<ExecutionState> {
        self.run_with(plan, Strategy::Layered).await
    }

    async fn run_with(&self, plan: &Plan, strategy: Strategy) -> PlanResult<ExecutionState> {
        let run_id = Uuid::new_v4();
        let span = tracing::info_span!("plan_run", %run_id, steps = plan.len());
        let result = self.drive(plan, strategy).instrument(span).await;

        // sessions close after the plan ends, success or fail-fast
        let shutdown = self.router.shutdown().await;
        match (result, shutdown) {
            (Ok(state), Ok(())) => Ok(state),
            (Ok(_), Err(error)) => Err(error),
            (Err(error), _) => Err(error),
        }
    }

    async fn drive(&self, plan: &Plan, strategy: Strategy) -> PlanResult<ExecutionState> {
        let validator = PlanValidator::new(&self.registry);
        let mode = validator.validate(plan)?;
        debug!(?mode, "plan validated");

        let graph = GraphBuilder::new(&self.registry).build(plan)?;
        let layers = build_layers(&graph)?;
        info!(
            nodes = graph.len(),
            edges = graph.edge_count(),
            layers = layers.len(),
            "execution graph ready"
        );

        match strategy {
            Strategy::Streaming => self.drive_streaming(plan, &graph).await,
            Strategy::Layered => self.drive_layered(plan, &graph, &layers).await,
        }
    }

    /// Ready-set loop: launch every zero in-degree node, decrement
    /// successors as workers complete, fail fast on the first error.
    async fn drive_streaming(
        &self,
        plan: &Plan,
        graph: &ExecutionGraph,
    ) -> PlanResult<ExecutionState> {
        let mut run = RunState::new(plan.len(), self.config.fail_fast);
        let mut in_degree = graph.in_degrees();
        let mut ready: BTreeSet<usize> = (0..plan.len()).filter(|&n| in_degree[n] == 0).collect();
        let mut workers: JoinSet<(usize, PlanResult<Value>)> = JoinSet::new();
        let mut outstanding = 0usize;

        loop {
            // launch phase: ascending order is the deterministic tie-break
            while let Some(node) = ready.pop_first() {
                if run.first_error.is_some() && self.config.fail_fast {
                    continue;
                }
                if run.failed[node] {
                    Self::propagate_skip(graph, node, &mut run.failed, &mut in_degree, &mut ready);
                    continue;
                }
                match self.launch(plan, node, &run, &mut workers) {
                    Ok(()) => outstanding += 1,
                    Err(error) => {
                        warn!(step = %plan.steps()[node].id, %error, "step failed to launch");
                        run.record_failure(node, error);
                        Self::propagate_skip(
                            graph,
                            node,
                            &mut run.failed,
                            &mut in_degree,
                            &mut ready,
                        );
                    }
                }
            }

            if outstanding == 0 {
                break;
            }

            let Some(joined) = workers.join_next().await else {
                break;
            };
            outstanding -= 1;
            let (node, result) =
                joined.map_err(|e| PlanError::Session(format!("worker task failed: {e}")))?;
            let step = &plan.steps()[node];

            match result {
                Ok(output) => {
                    debug!(step = %step.id, "step completed");
                    // publish the output before successors can launch
                    run.state.insert(step.id.clone(), output.clone());
                    if let Some(produces) = &step.produces {
                        run.state.insert(produces.clone(), output);
                    }
                    for succ in graph.successors(node) {
                        in_degree[succ] -= 1;
                        if in_degree[succ] == 0 {
                            ready.insert(succ);
                        }
                    }
                }
                Err(error) => {
                    warn!(step = %step.id, %error, "step failed");
                    run.record_failure(node, error);
                    for succ in graph.successors(node) {
                        run.failed[succ] = true;
                        in_degree[succ] -= 1;
                        if in_degree[succ] == 0 {
                            ready.insert(succ);
                        }
                    }
                }
            }
        }

        run.into_result()
    }

    /// Layer barrier: every node of a layer runs concurrently; the next
    /// layer starts only when the whole batch has completed.
    async fn drive_layered(
        &self,
        plan: &Plan,
        graph: &ExecutionGraph,
        layers: &[Vec<usize>],
    ) -> PlanResult<ExecutionState> {
        let mut run = RunState::new(plan.len(), self.config.fail_fast);

        for (index, layer) in layers.iter().enumerate() {
            if run.first_error.is_some() && self.config.fail_fast {
                break;
            }
            debug!(layer = index, nodes = ?layer, "executing layer");

            let mut workers: JoinSet<(usize, PlanResult<Value>)> = JoinSet::new();
            for &node in layer {
                if run.failed[node] || graph.predecessors(node).any(|pred| run.failed[pred]) {
                    run.failed[node] = true;
                    continue;
                }
                if let Err(error) = self.launch(plan, node, &run, &mut workers) {
                    warn!(step = %plan.steps()[node].id, %error, "step failed to launch");
                    run.record_failure(node, error);
                }
            }

            while let Some(joined) = workers.join_next().await {
                let (node, result) =
                    joined.map_err(|e| PlanError::Session(format!("worker task failed: {e}")))?;
                let step = &plan.steps()[node];
                match result {
                    Ok(output) => {
                        debug!(step = %step.id, "step completed");
                        run.state.insert(step.id.clone(), output.clone());
                        if let Some(produces) = &step.produces {
                            run.state.insert(produces.clone(), output);
                        }
                    }
                    Err(error) => {
                        warn!(step = %step.id, %error, "step failed");
                        run.record_failure(node, error);
                    }
                }
            }
        }

        run.into_result()
    }

    /// Resolve arguments on the runner task, then hand the suspending
    /// part (lease acquisition and the remote call) to a worker.
    fn launch(
        &self,
        plan: &Plan,
        node: usize,
        run: &RunState,
        workers: &mut JoinSet<(usize, PlanResult<Value>)>,
    ) -> PlanResult<()> {
        let step = plan.steps()[node].clone();
        let resolved = self.executor.resolve_arguments(&step, &run.state)?;
        debug!(step = %step.id, server = %step.server, "launching step");

        let executor = self.executor.clone();
        let router = Arc::clone(&self.router);
        let cancel = run.cancel.clone();
        workers.spawn(async move {
            let result = async {
                let lease = router.acquire(step.server).await?;
                executor.execute(&step, resolved, &lease, &cancel).await
                // lease drops here: released on every exit path
            }
            .await;
            (node, result)
        });
        Ok(())
    }

    /// A node whose dependency failed is skipped; its successors are
    /// unblocked so the skip flows to the end of the graph.
    fn propagate_skip(
        graph: &ExecutionGraph,
        node: usize,
        failed: &mut [bool],
        in_degree: &mut [usize],
        ready: &mut BTreeSet<usize>,
    ) {
        debug!(node, "skipping step whose dependency failed");
        for succ in graph.successors(node) {
            failed[succ] = true;
            in_degree[succ] -= 1;
            if in_degree[succ] == 0 {
                ready.insert(succ);
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Strategy {
    Streaming,
    Layered,
}
