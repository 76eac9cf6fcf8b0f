use crate::builtins::BuiltinRegistry;
use crate::graph::GraphModel;
use crate::registry::{NodeTypeRegistry, NodeTypeSnapshot};
use crate::sandbox::{ExecutionLimits, ProcessSandboxConfig, SandboxDispatcher};
use crate::scheduler::{RunPlan, Scheduler, MAX_WORKERS};
use crate::store::{MemoryStore, NodeTypeCatalog, RunStore, WorkflowStore};
use crate::validator::{self, ValidatedGraph};
use dagcore::{
    Caller, CodeRuntime, EngineError, EventBus, ExecutionEvent, FlowError, RunId, RunRecord,
    Workflow, WorkflowError, WorkflowId,
};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Main entry point: loads, validates and runs workflows
pub struct FlowRuntime {
    config: EngineConfig,
    workflows: Arc<dyn WorkflowStore>,
    node_types: NodeTypeRegistry,
    runs: Option<Arc<dyn RunStore>>,
    builtins: Arc<BuiltinRegistry>,
    sandbox: Arc<SandboxDispatcher>,
    event_bus: Arc<EventBus>,
}

impl FlowRuntime {
    /// Create a runtime backed by a fresh in-memory store
    pub fn new(builtins: BuiltinRegistry) -> Result<Self, FlowError> {
        let store = Arc::new(MemoryStore::new());
        Self::with_stores(store.clone(), store, builtins, EngineConfig::default())
    }

    /// Create a runtime over caller-provided stores
    pub fn with_stores(
        workflows: Arc<dyn WorkflowStore>,
        node_types: Arc<dyn NodeTypeCatalog>,
        builtins: BuiltinRegistry,
        config: EngineConfig,
    ) -> Result<Self, FlowError> {
        config.validate()?;
        let builtins = Arc::new(builtins);
        let sandbox = Arc::new(SandboxDispatcher::new(builtins.clone(), config.process.clone()));
        let event_bus = Arc::new(EventBus::new(config.event_buffer_size));

        Ok(Self {
            config,
            workflows,
            node_types: NodeTypeRegistry::new(node_types),
            runs: None,
            builtins,
            sandbox,
            event_bus,
        })
    }

    /// Persist every finished run record to `store`
    pub fn with_run_store(mut self, store: Arc<dyn RunStore>) -> Self {
        self.runs = Some(store);
        self
    }

    pub fn builtins(&self) -> &Arc<BuiltinRegistry> {
        &self.builtins
    }

    pub fn node_types(&self) -> &NodeTypeRegistry {
        &self.node_types
    }

    /// Load, validate and execute a workflow by id
    pub async fn run_workflow(&self, workflow_id: WorkflowId) -> Result<RunRecord, FlowError> {
        self.run_workflow_with_cancel(workflow_id, CancellationToken::new())
            .await
    }

    pub async fn run_workflow_with_cancel(
        &self,
        workflow_id: WorkflowId,
        cancellation: CancellationToken,
    ) -> Result<RunRecord, FlowError> {
        let workflow = self.workflows.load_workflow(workflow_id).await?;
        self.execute(&workflow, cancellation).await
    }

    /// Run a workflow on behalf of `caller`.
    ///
    /// Private workflows of other owners are [`WorkflowError::Forbidden`].
    pub async fn run_workflow_as(
        &self,
        workflow_id: WorkflowId,
        caller: &Caller,
        cancellation: CancellationToken,
    ) -> Result<RunRecord, FlowError> {
        let workflow = self.workflows.load_workflow(workflow_id).await?;
        if !workflow.is_visible_to(caller) {
            tracing::warn!("User {} may not run workflow {}", caller.user_id, workflow_id);
            return Err(WorkflowError::Forbidden(workflow_id).into());
        }
        self.execute(&workflow, cancellation).await
    }

    /// Execute a workflow already in hand.
    ///
    /// Structural problems are returned before any node runs. Node failures
    /// are part of the returned record, not errors.
    pub async fn execute(
        &self,
        workflow: &Workflow,
        cancellation: CancellationToken,
    ) -> Result<RunRecord, FlowError> {
        let graph = self.validate(workflow)?;
        let node_types = Arc::new(self.node_types.snapshot(workflow).await?);
        self.check_builtins(&node_types)?;

        let run_id: RunId = Uuid::new_v4();
        let plan = RunPlan {
            run_id,
            graph,
            node_types,
        };
        let scheduler = Scheduler::new(self.config.max_workers, self.config.limits.clone())
            .with_run_timeout(self.config.run_timeout);
        let record = scheduler
            .run(plan, self.sandbox.clone(), self.event_bus.clone(), cancellation)
            .await?;

        if let Some(store) = &self.runs {
            if let Err(e) = store.save_run(&record).await {
                tracing::error!("Failed to persist run {}: {}", record.run_id, e);
                return Err(e);
            }
        }
        Ok(record)
    }

    /// Structural checks only: ids, edges, placeholders and cycles
    pub fn validate(&self, workflow: &Workflow) -> Result<ValidatedGraph, FlowError> {
        let model = GraphModel::build(workflow)?;
        let graph = validator::validate(Arc::new(model))?;
        tracing::debug!(
            "Workflow {} is valid ({} nodes, {} edges)",
            workflow.id,
            graph.model().len(),
            graph.model().edge_count()
        );
        Ok(graph)
    }

    /// Look up a finished run in the configured run store
    pub async fn load_run(&self, run_id: RunId) -> Result<Option<RunRecord>, FlowError> {
        match &self.runs {
            Some(store) => store.load_run(run_id).await,
            None => Ok(None),
        }
    }

    /// Subscribe to execution events
    pub fn subscribe_events(&self) -> tokio::sync::broadcast::Receiver<ExecutionEvent> {
        self.event_bus.subscribe()
    }

    /// Builtin node types must name code this process actually has
    fn check_builtins(&self, node_types: &NodeTypeSnapshot) -> Result<(), FlowError> {
        for definition in node_types.definitions() {
            if definition.runtime == CodeRuntime::Builtin && !self.builtins.contains(&definition.code) {
                return Err(WorkflowError::NodeTypeNotFound(format!(
                    "{} (builtin {})",
                    definition.id, definition.code
                ))
                .into());
            }
        }
        Ok(())
    }
}

/// Configuration for the runtime
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub max_workers: usize,
    pub event_buffer_size: usize,
    pub limits: ExecutionLimits,
    /// Deadline for a whole run; `None` lets runs take as long as they need
    pub run_timeout: Option<Duration>,
    pub process: ProcessSandboxConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_workers: 10,
            event_buffer_size: 1000,
            limits: ExecutionLimits::default(),
            run_timeout: None,
            process: ProcessSandboxConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = max_workers;
        self
    }

    pub fn with_limits(mut self, limits: ExecutionLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_run_timeout(mut self, run_timeout: Duration) -> Self {
        self.run_timeout = Some(run_timeout);
        self
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        if self.max_workers == 0 || self.max_workers > MAX_WORKERS {
            return Err(EngineError::WorkerPool(format!(
                "max_workers must be between 1 and {}, got {}",
                MAX_WORKERS, self.max_workers
            )));
        }
        if self.limits.timeout.is_zero() {
            return Err(EngineError::InvalidConfig("node timeout must be positive".to_string()));
        }
        if self.run_timeout.is_some_and(|t| t.is_zero()) {
            return Err(EngineError::InvalidConfig("run timeout must be positive".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(EngineConfig::default().validate().is_ok());
    }

    #[test]
    fn rejects_out_of_range_workers() {
        for workers in [0, MAX_WORKERS + 1] {
            let config = EngineConfig::default().with_max_workers(workers);
            assert!(matches!(config.validate(), Err(EngineError::WorkerPool(_))));
        }
        assert!(EngineConfig::default().with_max_workers(MAX_WORKERS).validate().is_ok());
    }

    #[test]
    fn rejects_zero_timeouts() {
        let config = EngineConfig::default()
            .with_limits(ExecutionLimits::default().with_timeout(Duration::ZERO));
        assert!(matches!(config.validate(), Err(EngineError::InvalidConfig(_))));

        let config = EngineConfig::default().with_run_timeout(Duration::ZERO);
        assert!(matches!(config.validate(), Err(EngineError::InvalidConfig(_))));
    }

    #[test]
    fn runtime_refuses_bad_config() {
        let store = Arc::new(MemoryStore::new());
        let config = EngineConfig::default().with_max_workers(0);
        assert!(matches!(
            FlowRuntime::with_stores(store.clone(), store, BuiltinRegistry::new(), config),
            Err(FlowError::Engine(EngineError::WorkerPool(_)))
        ));
    }
}
