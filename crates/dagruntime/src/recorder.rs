//! Per-run node state table and the record it turns into.
//!
//! The scheduler loop owns the recorder and is its only writer. Every
//! transition is checked against the node lifecycle; an illegal one means
//! the table is corrupt and is reported as an [`EngineError`].

use crate::graph::GraphModel;
use chrono::{DateTime, Utc};
use dagcore::{
    EngineError, EventBus, ExecutionError, ExecutionEvent, NodeFailure, NodeResult, NodeStatus,
    RunId, RunRecord, RunStatus, Value, WorkflowId,
};
use petgraph::graph::NodeIndex;
use std::sync::Arc;

pub struct RunRecorder {
    run_id: RunId,
    workflow_id: WorkflowId,
    started_at: DateTime<Utc>,
    node_ids: Vec<String>,
    results: Vec<NodeResult>,
    events: Arc<EventBus>,
}

impl RunRecorder {
    pub fn new(run_id: RunId, model: &GraphModel, events: Arc<EventBus>) -> Self {
        let node_ids: Vec<String> = model.node_ids().cloned().collect();
        let results = node_ids.iter().map(|_| NodeResult::pending()).collect();
        let started_at = Utc::now();

        events.emit(ExecutionEvent::RunStarted {
            run_id,
            workflow_id: model.workflow_id(),
            timestamp: started_at,
        });

        Self {
            run_id,
            workflow_id: model.workflow_id(),
            started_at,
            node_ids,
            results,
            events,
        }
    }

    pub fn status(&self, idx: NodeIndex) -> NodeStatus {
        self.results[idx.index()].status
    }

    pub fn output(&self, idx: NodeIndex) -> Option<&Value> {
        self.results[idx.index()].output.as_ref()
    }

    /// Nodes not yet in a terminal state
    pub fn unfinished(&self) -> impl Iterator<Item = NodeIndex> + '_ {
        self.results
            .iter()
            .enumerate()
            .filter(|(_, r)| !r.status.is_terminal())
            .map(|(i, _)| NodeIndex::new(i))
    }

    pub fn ready(&mut self, idx: NodeIndex) -> Result<(), EngineError> {
        self.expect(idx, &[NodeStatus::Pending], NodeStatus::Ready)?;
        self.results[idx.index()].status = NodeStatus::Ready;
        Ok(())
    }

    pub fn started(&mut self, idx: NodeIndex, node_type: &str) -> Result<(), EngineError> {
        self.expect(idx, &[NodeStatus::Ready], NodeStatus::Running)?;
        let now = Utc::now();
        let result = &mut self.results[idx.index()];
        result.status = NodeStatus::Running;
        result.started_at = Some(now);

        self.events.emit(ExecutionEvent::NodeStarted {
            run_id: self.run_id,
            node_id: self.node_ids[idx.index()].clone(),
            node_type: node_type.to_string(),
            timestamp: now,
        });
        Ok(())
    }

    pub fn succeeded(&mut self, idx: NodeIndex, output: Value) -> Result<(), EngineError> {
        self.expect(idx, &[NodeStatus::Running], NodeStatus::Succeeded)?;
        let now = Utc::now();
        let result = &mut self.results[idx.index()];
        result.status = NodeStatus::Succeeded;
        result.finished_at = Some(now);
        result.output = Some(output.clone());
        let duration_ms = result.duration_ms().unwrap_or(0);

        self.events.emit(ExecutionEvent::NodeSucceeded {
            run_id: self.run_id,
            node_id: self.node_ids[idx.index()].clone(),
            output,
            duration_ms,
            timestamp: now,
        });
        Ok(())
    }

    /// Record a failed execution; cancellation counts as a skip
    pub fn failed(&mut self, idx: NodeIndex, error: &ExecutionError) -> Result<(), EngineError> {
        let failure = NodeFailure::from(error);
        let status = match error {
            ExecutionError::TimedOut { .. } => NodeStatus::TimedOut,
            ExecutionError::Cancelled { .. } => return self.skipped(idx, failure),
            ExecutionError::Failed { .. } | ExecutionError::ResourceLimit { .. } => NodeStatus::Failed,
        };
        self.expect(idx, &[NodeStatus::Running], status)?;

        let now = Utc::now();
        let result = &mut self.results[idx.index()];
        result.status = status;
        result.finished_at = Some(now);
        result.error = Some(failure.clone());

        self.events.emit(ExecutionEvent::NodeFailed {
            run_id: self.run_id,
            node_id: self.node_ids[idx.index()].clone(),
            status,
            error: failure,
            timestamp: now,
        });
        Ok(())
    }

    pub fn skipped(&mut self, idx: NodeIndex, reason: NodeFailure) -> Result<(), EngineError> {
        self.expect(
            idx,
            &[NodeStatus::Pending, NodeStatus::Ready, NodeStatus::Running],
            NodeStatus::Skipped,
        )?;
        let now = Utc::now();
        let result = &mut self.results[idx.index()];
        result.status = NodeStatus::Skipped;
        result.finished_at = Some(now);
        result.error = Some(reason.clone());

        self.events.emit(ExecutionEvent::NodeSkipped {
            run_id: self.run_id,
            node_id: self.node_ids[idx.index()].clone(),
            reason,
            timestamp: now,
        });
        Ok(())
    }

    /// Produce the immutable record; every node must be terminal by now
    pub fn finish(self, status: RunStatus) -> Result<RunRecord, EngineError> {
        if let Some(idx) = self.unfinished().next() {
            return Err(EngineError::StateCorruption(format!(
                "run finished while node {} is {:?}",
                self.node_ids[idx.index()],
                self.status(idx)
            )));
        }

        let finished_at = Utc::now();
        let duration_ms = (finished_at - self.started_at).num_milliseconds().max(0) as u64;
        self.events.emit(ExecutionEvent::RunCompleted {
            run_id: self.run_id,
            status,
            duration_ms,
            timestamp: finished_at,
        });

        Ok(RunRecord {
            run_id: self.run_id,
            workflow_id: self.workflow_id,
            started_at: self.started_at,
            finished_at,
            results: self.node_ids.into_iter().zip(self.results).collect(),
            status,
        })
    }

    fn expect(
        &self,
        idx: NodeIndex,
        allowed: &[NodeStatus],
        next: NodeStatus,
    ) -> Result<(), EngineError> {
        let current = self
            .results
            .get(idx.index())
            .map(|r| r.status)
            .ok_or_else(|| EngineError::StateCorruption(format!("no node at index {}", idx.index())))?;
        if allowed.contains(&current) {
            Ok(())
        } else {
            Err(EngineError::StateCorruption(format!(
                "node {} cannot move from {:?} to {:?}",
                self.node_ids[idx.index()],
                current,
                next
            )))
        }
    }
}
