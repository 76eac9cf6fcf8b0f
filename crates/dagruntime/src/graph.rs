//! Read-only graph model built from a workflow snapshot.
//!
//! Nodes live in a petgraph arena and are addressed by `NodeIndex`; node
//! ids map to indices. Indices follow workflow node order and edge
//! adjacency lists follow edge declaration order, which keeps every
//! traversal deterministic.

use dagcore::{EdgeId, NodeId, NodeTypeId, Value, Workflow, WorkflowError, WorkflowId};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use std::collections::{HashMap, HashSet};

/// Node payload stored in the arena
#[derive(Debug, Clone)]
pub struct GraphNode {
    pub id: NodeId,
    pub node_type_id: Option<NodeTypeId>,
    pub config: Value,
}

impl GraphNode {
    pub fn is_configured(&self) -> bool {
        self.node_type_id.is_some()
    }
}

/// Edge payload stored in the arena
#[derive(Debug, Clone)]
pub struct GraphEdge {
    pub id: EdgeId,
    /// Key the target node receives the source's output under
    pub input_key: String,
}

/// One resolved edge seen from either endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Link {
    pub edge_id: EdgeId,
    /// The node at the other end of the edge
    pub node: NodeIndex,
    pub input_key: String,
}

#[derive(Debug)]
pub struct GraphModel {
    workflow_id: WorkflowId,
    graph: DiGraph<GraphNode, GraphEdge>,
    index: HashMap<NodeId, NodeIndex>,
    upstream: Vec<Vec<Link>>,
    downstream: Vec<Vec<Link>>,
}

impl GraphModel {
    /// Build the model, rejecting edges to unknown nodes and ambiguous inputs
    pub fn build(workflow: &Workflow) -> Result<Self, WorkflowError> {
        let mut graph = DiGraph::with_capacity(workflow.nodes.len(), workflow.edges.len());
        let mut index = HashMap::with_capacity(workflow.nodes.len());

        for node in &workflow.nodes {
            if index.contains_key(&node.id) {
                return Err(WorkflowError::MalformedGraph(format!(
                    "duplicate node id {}",
                    node.id
                )));
            }
            let idx = graph.add_node(GraphNode {
                id: node.id.clone(),
                node_type_id: node.node_type_id.clone(),
                config: node.config.clone(),
            });
            index.insert(node.id.clone(), idx);
        }

        let mut seen_keys: HashSet<(NodeIndex, String)> = HashSet::new();
        for edge in &workflow.edges {
            let resolve = |node_id: &NodeId| {
                index.get(node_id).copied().ok_or_else(|| WorkflowError::DanglingEdge {
                    edge_id: edge.id.clone(),
                    node_id: node_id.clone(),
                })
            };
            let source = resolve(&edge.source_node_id)?;
            let target = resolve(&edge.target_node_id)?;

            let input_key = edge.input_key().to_string();
            if !seen_keys.insert((target, input_key.clone())) {
                return Err(WorkflowError::MalformedGraph(format!(
                    "node {} receives more than one input named '{}'",
                    edge.target_node_id, input_key
                )));
            }

            graph.add_edge(
                source,
                target,
                GraphEdge {
                    id: edge.id.clone(),
                    input_key,
                },
            );
        }

        let upstream = graph
            .node_indices()
            .map(|idx| collect_links(&graph, idx, Direction::Incoming))
            .collect();
        let downstream = graph
            .node_indices()
            .map(|idx| collect_links(&graph, idx, Direction::Outgoing))
            .collect();

        Ok(Self {
            workflow_id: workflow.id,
            graph,
            index,
            upstream,
            downstream,
        })
    }

    pub fn workflow_id(&self) -> WorkflowId {
        self.workflow_id
    }

    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Node indices in workflow order
    pub fn indices(&self) -> impl Iterator<Item = NodeIndex> + '_ {
        self.graph.node_indices()
    }

    /// Node ids in workflow order
    pub fn node_ids(&self) -> impl Iterator<Item = &NodeId> + '_ {
        self.graph.node_weights().map(|n| &n.id)
    }

    pub fn index_of(&self, node_id: &str) -> Option<NodeIndex> {
        self.index.get(node_id).copied()
    }

    pub fn node(&self, idx: NodeIndex) -> &GraphNode {
        &self.graph[idx]
    }

    /// Incoming edges in declaration order
    pub fn upstream(&self, idx: NodeIndex) -> &[Link] {
        &self.upstream[idx.index()]
    }

    /// Outgoing edges in declaration order
    pub fn downstream(&self, idx: NodeIndex) -> &[Link] {
        &self.downstream[idx.index()]
    }

    /// Distinct upstream nodes, first-edge order
    pub fn upstream_nodes(&self, idx: NodeIndex) -> Vec<NodeIndex> {
        dedup_nodes(self.upstream(idx))
    }

    /// Distinct downstream nodes, first-edge order
    pub fn downstream_nodes(&self, idx: NodeIndex) -> Vec<NodeIndex> {
        dedup_nodes(self.downstream(idx))
    }

    pub fn in_degree(&self, idx: NodeIndex) -> usize {
        self.upstream(idx).len()
    }

    pub fn out_degree(&self, idx: NodeIndex) -> usize {
        self.downstream(idx).len()
    }

    /// Nodes without incoming edges, in workflow order
    pub fn roots(&self) -> Vec<NodeIndex> {
        self.indices().filter(|&idx| self.in_degree(idx) == 0).collect()
    }
}

fn collect_links(
    graph: &DiGraph<GraphNode, GraphEdge>,
    idx: NodeIndex,
    direction: Direction,
) -> Vec<Link> {
    // petgraph walks adjacency newest-first; edge indices restore declaration order
    let mut edges: Vec<_> = graph.edges_directed(idx, direction).collect();
    edges.sort_by_key(|e| e.id());
    edges
        .into_iter()
        .map(|e| Link {
            edge_id: e.weight().id.clone(),
            node: match direction {
                Direction::Incoming => e.source(),
                Direction::Outgoing => e.target(),
            },
            input_key: e.weight().input_key.clone(),
        })
        .collect()
}

fn dedup_nodes(links: &[Link]) -> Vec<NodeIndex> {
    let mut seen = HashSet::new();
    links
        .iter()
        .map(|l| l.node)
        .filter(|n| seen.insert(*n))
        .collect()
}
