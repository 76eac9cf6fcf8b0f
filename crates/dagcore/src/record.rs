use crate::{events::RunId, ExecutionError, NodeId, Value, WorkflowId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Lifecycle state of one node within a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    Pending,
    Ready,
    Running,
    Succeeded,
    Failed,
    TimedOut,
    Skipped,
}

impl NodeStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            NodeStatus::Succeeded | NodeStatus::Failed | NodeStatus::TimedOut | NodeStatus::Skipped
        )
    }
}

/// Overall outcome of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Succeeded,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Node code raised, crashed or returned something unusable
    Execution,
    Timeout,
    ResourceLimit,
    /// An upstream node did not succeed
    Upstream,
    /// Placeholder node without a node type
    Unconfigured,
    Cancelled,
}

/// Why a node failed or was skipped
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl NodeFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn upstream(blocking: &str, status: NodeStatus) -> Self {
        let verb = match status {
            NodeStatus::Failed => "failed",
            NodeStatus::TimedOut => "timed out",
            _ => "was skipped",
        };
        Self::new(FailureKind::Upstream, format!("upstream node {} {}", blocking, verb))
    }
}

impl From<&ExecutionError> for NodeFailure {
    fn from(error: &ExecutionError) -> Self {
        let kind = match error {
            ExecutionError::Failed { .. } => FailureKind::Execution,
            ExecutionError::TimedOut { .. } => FailureKind::Timeout,
            ExecutionError::ResourceLimit { .. } => FailureKind::ResourceLimit,
            ExecutionError::Cancelled { .. } => FailureKind::Cancelled,
        };
        Self::new(kind, error.to_string())
    }
}

/// Outcome of one node in a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeResult {
    pub status: NodeStatus,
    pub output: Option<Value>,
    pub error: Option<NodeFailure>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl NodeResult {
    pub fn pending() -> Self {
        Self {
            status: NodeStatus::Pending,
            output: None,
            error: None,
            started_at: None,
            finished_at: None,
        }
    }

    pub fn duration_ms(&self) -> Option<u64> {
        match (self.started_at, self.finished_at) {
            (Some(start), Some(end)) => Some((end - start).num_milliseconds().max(0) as u64),
            _ => None,
        }
    }
}

/// Immutable report of one workflow run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: RunId,
    pub workflow_id: WorkflowId,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub results: BTreeMap<NodeId, NodeResult>,
    pub status: RunStatus,
}

impl RunRecord {
    pub fn result(&self, node_id: &str) -> Option<&NodeResult> {
        self.results.get(node_id)
    }

    pub fn status_of(&self, node_id: &str) -> Option<NodeStatus> {
        self.result(node_id).map(|r| r.status)
    }

    pub fn output(&self, node_id: &str) -> Option<&Value> {
        self.result(node_id).and_then(|r| r.output.as_ref())
    }

    /// Number of nodes that ended in `status`
    pub fn count(&self, status: NodeStatus) -> usize {
        self.results.values().filter(|r| r.status == status).count()
    }

    pub fn duration_ms(&self) -> u64 {
        (self.finished_at - self.started_at).num_milliseconds().max(0) as u64
    }
}
