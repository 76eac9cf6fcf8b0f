//! Structural checks run before any node executes.

use crate::graph::GraphModel;
use dagcore::WorkflowError;
use petgraph::graph::NodeIndex;
use std::collections::VecDeque;
use std::sync::Arc;

/// A graph that passed validation, with its topological order
#[derive(Debug, Clone)]
pub struct ValidatedGraph {
    model: Arc<GraphModel>,
    order: Vec<NodeIndex>,
}

impl ValidatedGraph {
    pub fn model(&self) -> &Arc<GraphModel> {
        &self.model
    }

    /// Topological order; ties resolved by workflow order
    pub fn order(&self) -> &[NodeIndex] {
        &self.order
    }
}

/// Validate the graph.
///
/// # Errors
/// - [`WorkflowError::UnconfiguredNode`] if a node without a type feeds another node.
/// - [`WorkflowError::Cycle`] if configured nodes form a cycle; the error lists
///   every node left over by Kahn's algorithm.
pub fn validate(model: Arc<GraphModel>) -> Result<ValidatedGraph, WorkflowError> {
    for idx in model.indices() {
        let node = model.node(idx);
        if !node.is_configured() && model.out_degree(idx) > 0 {
            return Err(WorkflowError::UnconfiguredNode {
                node_id: node.id.clone(),
            });
        }
    }

    // Only edges between configured nodes take part in the cycle check
    let counts = |idx: NodeIndex| model.node(idx).is_configured();
    let mut in_degree: Vec<usize> = model
        .indices()
        .map(|idx| {
            if !counts(idx) {
                return 0;
            }
            model.upstream(idx).iter().filter(|l| counts(l.node)).count()
        })
        .collect();

    let mut queue: VecDeque<NodeIndex> = model
        .indices()
        .filter(|idx| in_degree[idx.index()] == 0)
        .collect();
    let mut order = Vec::with_capacity(model.len());

    while let Some(idx) = queue.pop_front() {
        order.push(idx);
        if !counts(idx) {
            continue;
        }
        for link in model.downstream(idx) {
            if !counts(link.node) {
                continue;
            }
            let degree = &mut in_degree[link.node.index()];
            *degree -= 1;
            if *degree == 0 {
                queue.push_back(link.node);
            }
        }
    }

    if order.len() != model.len() {
        let nodes = model
            .indices()
            .filter(|idx| in_degree[idx.index()] > 0)
            .map(|idx| model.node(idx).id.clone())
            .collect();
        return Err(WorkflowError::Cycle { nodes });
    }

    Ok(ValidatedGraph { model, order })
}
