//! Kahn-level layering of the execution graph.

use super::ExecutionGraph;
use crate::error::{PlanError, PlanResult};
use tracing::debug;

/// Partition the graph into topologically ordered layers.
///
/// Each round emits every node whose remaining in-degree is zero,
/// ascending for determinism, then removes them from the remaining
/// graph. A round that emits nothing while nodes remain is a cycle.
pub fn build_layers(graph: &ExecutionGraph) -> PlanResult<Vec<Vec<usize>>> {
    let mut in_degree = graph.in_degrees();
    let mut emitted = vec![false; graph.len()];
    let mut remaining = graph.len();
    let mut layers = Vec::new();

    while remaining > 0 {
        let ready: Vec<usize> = (0..graph.len())
            .filter(|&node| !emitted[node] && in_degree[node] == 0)
            .collect();
        if ready.is_empty() {
            return Err(PlanError::CycleDetected { remaining });
        }

        for &node in &ready {
            emitted[node] = true;
            remaining -= 1;
            for succ in graph.successors(node) {
                in_degree[succ] -= 1;
            }
        }
        layers.push(ready);
    }

    debug!(layers = layers.len(), "graph layered");
    Ok(layers)
}
