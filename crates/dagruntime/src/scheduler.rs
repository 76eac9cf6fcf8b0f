use crate::graph::GraphModel;
use crate::recorder::RunRecorder;
use crate::registry::NodeTypeSnapshot;
use crate::sandbox::{ExecutionLimits, ExecutionRequest, SandboxDispatcher};
use crate::validator::ValidatedGraph;
use dagcore::{
    EngineError, EventBus, ExecutionError, FailureKind, NodeFailure, NodeStatus, RunId, RunRecord,
    RunStatus, Value,
};
use futures::stream::{FuturesUnordered, StreamExt};
use petgraph::graph::NodeIndex;
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Hard ceiling on concurrent node executions per run
pub const MAX_WORKERS: usize = 1024;

/// Key under which a node with a single upstream edge also sees its input
pub const DEFAULT_INPUT: &str = "default";

/// Drives one validated graph to completion.
///
/// The run loop is the only writer of node state. Ready nodes are
/// dispatched in arrival order (roots in workflow order, then dependents
/// as their upstreams finish), so a single worker gives reproducible runs.
pub struct Scheduler {
    max_workers: usize,
    limits: ExecutionLimits,
    run_timeout: Option<Duration>,
}

/// Read-only inputs shared by every node execution of a run
pub struct RunPlan {
    pub run_id: RunId,
    pub graph: ValidatedGraph,
    pub node_types: Arc<NodeTypeSnapshot>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stop {
    Cancelled,
    DeadlineExceeded,
}

type Completion = (NodeIndex, Result<Value, ExecutionError>);

impl Scheduler {
    pub fn new(max_workers: usize, limits: ExecutionLimits) -> Self {
        Self {
            max_workers,
            limits,
            run_timeout: None,
        }
    }

    pub fn with_run_timeout(mut self, run_timeout: Option<Duration>) -> Self {
        self.run_timeout = run_timeout;
        self
    }

    /// Execute the plan and return its record.
    ///
    /// Node failures end up in the record; only engine faults are returned
    /// as errors.
    pub async fn run(
        &self,
        plan: RunPlan,
        sandbox: Arc<SandboxDispatcher>,
        events: Arc<EventBus>,
        cancellation: CancellationToken,
    ) -> Result<RunRecord, EngineError> {
        if self.max_workers == 0 || self.max_workers > MAX_WORKERS {
            return Err(EngineError::WorkerPool(format!(
                "max_workers must be between 1 and {}, got {}",
                MAX_WORKERS, self.max_workers
            )));
        }

        let model = plan.graph.model().clone();
        let run_id = plan.run_id;
        tracing::info!(
            "Starting run {} of workflow {} ({} nodes, {} workers)",
            run_id,
            model.workflow_id(),
            model.len(),
            self.max_workers
        );

        // Cancels in-flight nodes on every exit path, including engine faults
        let run_token = cancellation.child_token();
        let _guard = run_token.clone().drop_guard();

        let mut recorder = RunRecorder::new(run_id, &model, events.clone());
        let mut waiting_on: Vec<usize> = model
            .indices()
            .map(|idx| model.upstream_nodes(idx).len())
            .collect();
        let mut settled: VecDeque<NodeIndex> = model.roots().into();
        let mut ready: VecDeque<NodeIndex> = VecDeque::new();
        let mut running = FuturesUnordered::new();
        let mut stop: Option<Stop> = None;

        let deadline = self.run_timeout.map(|d| Instant::now() + d);
        let deadline_reached = async move {
            match deadline {
                Some(at) => tokio::time::sleep_until(at).await,
                None => std::future::pending().await,
            }
        };
        tokio::pin!(deadline_reached);

        loop {
            if stop.is_none() && cancellation.is_cancelled() {
                stop = Some(Stop::Cancelled);
            }

            if stop.is_none() {
                while let Some(idx) = settled.pop_front() {
                    self.settle(idx, &model, &mut recorder, &mut ready, &mut waiting_on, &mut settled)?;
                }

                while running.len() < self.max_workers {
                    let Some(idx) = ready.pop_front() else { break };
                    let task = self.dispatch(idx, &plan, &model, &mut recorder, &sandbox, &events, &run_token)?;
                    running.push(task);
                }
            }

            if running.is_empty() {
                break;
            }

            tokio::select! {
                biased;
                _ = run_token.cancelled(), if stop.is_none() => {
                    tracing::info!("Run {} cancelled; waiting for in-flight nodes", run_id);
                    stop = Some(Stop::Cancelled);
                }
                _ = &mut deadline_reached, if stop.is_none() => {
                    tracing::warn!("Run {} exceeded its deadline", run_id);
                    run_token.cancel();
                    stop = Some(Stop::DeadlineExceeded);
                }
                Some(joined) = running.next() => {
                    let (idx, outcome): Completion = joined
                        .map_err(|e| EngineError::TaskJoin(e.to_string()))?;
                    self.complete(idx, outcome, &model, &mut recorder)?;
                    if stop.is_none() {
                        release_downstream(idx, &model, &mut waiting_on, &mut settled);
                    }
                }
            }
        }

        let status = match stop {
            Some(reason) => {
                let message = match reason {
                    Stop::Cancelled => "run cancelled".to_string(),
                    Stop::DeadlineExceeded => format!(
                        "run exceeded its {}ms deadline",
                        self.run_timeout.unwrap_or_default().as_millis()
                    ),
                };
                let unfinished: Vec<_> = recorder.unfinished().collect();
                for idx in unfinished {
                    recorder.skipped(idx, NodeFailure::new(FailureKind::Cancelled, message.clone()))?;
                }
                match reason {
                    Stop::Cancelled => RunStatus::Cancelled,
                    Stop::DeadlineExceeded => RunStatus::Failed,
                }
            }
            None => overall_status(&model, &recorder),
        };

        let record = recorder.finish(status)?;
        tracing::info!(
            "Run {} finished: {:?} ({} succeeded, {} failed, {} timed out, {} skipped)",
            run_id,
            record.status,
            record.count(NodeStatus::Succeeded),
            record.count(NodeStatus::Failed),
            record.count(NodeStatus::TimedOut),
            record.count(NodeStatus::Skipped)
        );
        Ok(record)
    }

    /// Decide the fate of a node whose upstream nodes are all terminal
    fn settle(
        &self,
        idx: NodeIndex,
        model: &GraphModel,
        recorder: &mut RunRecorder,
        ready: &mut VecDeque<NodeIndex>,
        waiting_on: &mut [usize],
        settled: &mut VecDeque<NodeIndex>,
    ) -> Result<(), EngineError> {
        let node = model.node(idx);
        let blocking = model
            .upstream_nodes(idx)
            .into_iter()
            .find(|up| recorder.status(*up) != NodeStatus::Succeeded);

        let reason = match blocking {
            Some(up) => NodeFailure::upstream(&model.node(up).id, recorder.status(up)),
            None if !node.is_configured() => {
                NodeFailure::new(FailureKind::Unconfigured, "node has no node type")
            }
            None => {
                recorder.ready(idx)?;
                ready.push_back(idx);
                return Ok(());
            }
        };

        tracing::debug!("Skipping node {}: {}", node.id, reason.message);
        recorder.skipped(idx, reason)?;
        release_downstream(idx, model, waiting_on, settled);
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn dispatch(
        &self,
        idx: NodeIndex,
        plan: &RunPlan,
        model: &GraphModel,
        recorder: &mut RunRecorder,
        sandbox: &Arc<SandboxDispatcher>,
        events: &Arc<EventBus>,
        run_token: &CancellationToken,
    ) -> Result<tokio::task::JoinHandle<Completion>, EngineError> {
        let node = model.node(idx);
        let definition = node
            .node_type_id
            .as_deref()
            .and_then(|id| plan.node_types.get(id))
            .cloned()
            .ok_or_else(|| {
                EngineError::StateCorruption(format!("node {} has no pinned node type", node.id))
            })?;

        let request = ExecutionRequest {
            node_id: node.id.clone(),
            inputs: collect_inputs(idx, model, recorder),
            config: node.config.clone(),
        };
        recorder.started(idx, &definition.name)?;
        tracing::debug!("Dispatching node {} ({})", node.id, definition.id);

        let sandbox = sandbox.clone();
        let limits = self.limits.clone();
        let token = run_token.clone();
        let emitter = events.create_emitter(plan.run_id, node.id.clone());
        Ok(tokio::spawn(async move {
            let outcome = sandbox
                .execute(&definition, request, limits, token, emitter)
                .await;
            (idx, outcome)
        }))
    }

    fn complete(
        &self,
        idx: NodeIndex,
        outcome: Result<Value, ExecutionError>,
        model: &GraphModel,
        recorder: &mut RunRecorder,
    ) -> Result<(), EngineError> {
        let node_id = &model.node(idx).id;
        match outcome {
            Ok(value) => {
                tracing::info!("Node {} succeeded", node_id);
                recorder.succeeded(idx, value)
            }
            Err(e) => {
                tracing::warn!("{}", e);
                recorder.failed(idx, &e)
            }
        }
    }
}

/// Count a terminal node against each downstream node's wait list
fn release_downstream(
    idx: NodeIndex,
    model: &GraphModel,
    waiting_on: &mut [usize],
    settled: &mut VecDeque<NodeIndex>,
) {
    for down in model.downstream_nodes(idx) {
        let remaining = &mut waiting_on[down.index()];
        *remaining = remaining.saturating_sub(1);
        if *remaining == 0 {
            settled.push_back(down);
        }
    }
}

/// Assemble a node's inputs from its upstream outputs
fn collect_inputs(idx: NodeIndex, model: &GraphModel, recorder: &RunRecorder) -> BTreeMap<String, Value> {
    let links = model.upstream(idx);
    let mut inputs = BTreeMap::new();
    for link in links {
        if let Some(value) = recorder.output(link.node) {
            inputs.insert(link.input_key.clone(), value.clone());
        }
    }

    if let [only] = links {
        if only.input_key != DEFAULT_INPUT {
            if let Some(value) = recorder.output(only.node) {
                inputs.insert(DEFAULT_INPUT.to_string(), value.clone());
            }
        }
    }
    inputs
}

/// Succeeded iff every executable node succeeded
fn overall_status(model: &GraphModel, recorder: &RunRecorder) -> RunStatus {
    let all_succeeded = model
        .indices()
        .filter(|idx| model.node(*idx).is_configured())
        .all(|idx| recorder.status(idx) == NodeStatus::Succeeded);
    if all_succeeded {
        RunStatus::Succeeded
    } else {
        RunStatus::Failed
    }
}
