use crate::{NodeId, WorkflowId};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FlowError {
    #[error("Workflow error: {0}")]
    Workflow(#[from] WorkflowError),

    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("Store error: {0}")]
    Store(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Structural problems detected before any node executes
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WorkflowError {
    #[error("Workflow not found: {0}")]
    NotFound(WorkflowId),

    #[error("Malformed graph: {0}")]
    MalformedGraph(String),

    #[error("Edge {edge_id} references unknown node {node_id}")]
    DanglingEdge { edge_id: String, node_id: NodeId },

    #[error("Cyclic dependency among nodes: {}", nodes.join(", "))]
    Cycle { nodes: Vec<NodeId> },

    #[error("Node {node_id} has no node type but feeds other nodes")]
    UnconfiguredNode { node_id: NodeId },

    #[error("Node type not found: {0}")]
    NodeTypeNotFound(String),

    #[error("Workflow {0} is not visible to the caller")]
    Forbidden(WorkflowId),
}

/// Failure of a single node execution.
///
/// These are captured in the run record and never abort sibling branches.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExecutionError {
    #[error("Node {node_id} failed: {cause}")]
    Failed { node_id: NodeId, cause: String },

    #[error("Node {node_id} timed out after {timeout_ms}ms")]
    TimedOut { node_id: NodeId, timeout_ms: u64 },

    #[error("Node {node_id} exceeded its {resource} limit ({detail})")]
    ResourceLimit {
        node_id: NodeId,
        resource: String,
        detail: String,
    },

    #[error("Node {node_id} was cancelled")]
    Cancelled { node_id: NodeId },
}

impl ExecutionError {
    pub fn failed(node_id: impl Into<NodeId>, cause: impl Into<String>) -> Self {
        ExecutionError::Failed {
            node_id: node_id.into(),
            cause: cause.into(),
        }
    }
}

/// Errors raised by node code itself
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NodeError {
    #[error("Missing required input: {0}")]
    MissingInput(String),

    #[error("Invalid input type for '{field}': expected {expected}, got {actual}")]
    InvalidInputType {
        field: String,
        expected: String,
        actual: String,
    },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Execution failed: {0}")]
    ExecutionFailed(String),
}

/// Faults in the engine itself; these abort the whole run
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("State table corrupted: {0}")]
    StateCorruption(String),

    #[error("Worker pool misconfigured: {0}")]
    WorkerPool(String),

    #[error("Invalid engine configuration: {0}")]
    InvalidConfig(String),

    #[error("Worker task failed to join: {0}")]
    TaskJoin(String),
}
