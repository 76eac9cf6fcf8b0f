//! Persistence seams consumed by the runtime, plus in-memory and file
//! implementations.

use async_trait::async_trait;
use dagcore::{FlowError, NodeType, RunId, RunRecord, Visibility, Workflow, WorkflowError, WorkflowId};
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use tokio::sync::RwLock;

/// Source of workflow definitions
#[async_trait]
pub trait WorkflowStore: Send + Sync {
    /// Load a workflow; a missing id is [`WorkflowError::NotFound`]
    async fn load_workflow(&self, id: WorkflowId) -> Result<Workflow, FlowError>;

    async fn save_workflow(&self, workflow: Workflow) -> Result<(), FlowError>;

    /// Returns whether a workflow was removed
    async fn delete_workflow(&self, id: WorkflowId) -> Result<bool, FlowError>;

    async fn list_workflows(&self) -> Result<Vec<Workflow>, FlowError>;
}

/// Catalog of node type definitions
#[async_trait]
pub trait NodeTypeCatalog: Send + Sync {
    async fn load_node_type(&self, id: &str) -> Result<Option<NodeType>, FlowError>;

    async fn list_node_types(&self, visibility: &Visibility) -> Result<Vec<NodeType>, FlowError>;

    async fn save_node_type(&self, node_type: NodeType) -> Result<(), FlowError>;
}

/// Durable home for finished run records
#[async_trait]
pub trait RunStore: Send + Sync {
    async fn save_run(&self, record: &RunRecord) -> Result<(), FlowError>;

    async fn load_run(&self, run_id: RunId) -> Result<Option<RunRecord>, FlowError>;
}

/// In-memory store backing workflows, node types and run records
#[derive(Default)]
pub struct MemoryStore {
    workflows: RwLock<HashMap<WorkflowId, Workflow>>,
    node_types: RwLock<BTreeMap<String, NodeType>>,
    runs: RwLock<HashMap<RunId, RunRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store pre-filled with the given definitions
    pub fn with_contents(
        workflows: impl IntoIterator<Item = Workflow>,
        node_types: impl IntoIterator<Item = NodeType>,
    ) -> Self {
        Self {
            workflows: RwLock::new(workflows.into_iter().map(|w| (w.id, w)).collect()),
            node_types: RwLock::new(node_types.into_iter().map(|t| (t.id.clone(), t)).collect()),
            runs: RwLock::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl WorkflowStore for MemoryStore {
    async fn load_workflow(&self, id: WorkflowId) -> Result<Workflow, FlowError> {
        self.workflows
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or_else(|| WorkflowError::NotFound(id).into())
    }

    async fn save_workflow(&self, workflow: Workflow) -> Result<(), FlowError> {
        self.workflows.write().await.insert(workflow.id, workflow);
        Ok(())
    }

    async fn delete_workflow(&self, id: WorkflowId) -> Result<bool, FlowError> {
        Ok(self.workflows.write().await.remove(&id).is_some())
    }

    async fn list_workflows(&self) -> Result<Vec<Workflow>, FlowError> {
        let mut workflows: Vec<_> = self.workflows.read().await.values().cloned().collect();
        workflows.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        Ok(workflows)
    }
}

#[async_trait]
impl NodeTypeCatalog for MemoryStore {
    async fn load_node_type(&self, id: &str) -> Result<Option<NodeType>, FlowError> {
        Ok(self.node_types.read().await.get(id).cloned())
    }

    async fn list_node_types(&self, visibility: &Visibility) -> Result<Vec<NodeType>, FlowError> {
        Ok(self
            .node_types
            .read()
            .await
            .values()
            .filter(|t| visibility.admits(t))
            .cloned()
            .collect())
    }

    async fn save_node_type(&self, node_type: NodeType) -> Result<(), FlowError> {
        self.node_types
            .write()
            .await
            .insert(node_type.id.clone(), node_type);
        Ok(())
    }
}

#[async_trait]
impl RunStore for MemoryStore {
    async fn save_run(&self, record: &RunRecord) -> Result<(), FlowError> {
        self.runs.write().await.insert(record.run_id, record.clone());
        Ok(())
    }

    async fn load_run(&self, run_id: RunId) -> Result<Option<RunRecord>, FlowError> {
        Ok(self.runs.read().await.get(&run_id).cloned())
    }
}

/// Run records persisted as `<dir>/<run_id>.json`
pub struct FileRunStore {
    dir: PathBuf,
}

impl FileRunStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, run_id: RunId) -> PathBuf {
        self.dir.join(format!("{}.json", run_id))
    }
}

#[async_trait]
impl RunStore for FileRunStore {
    async fn save_run(&self, record: &RunRecord) -> Result<(), FlowError> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let json = serde_json::to_vec_pretty(record)?;

        // Write then rename so readers never see a half-written record
        let path = self.path_for(record.run_id);
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &path).await?;

        tracing::debug!("Saved run record {}", path.display());
        Ok(())
    }

    async fn load_run(&self, run_id: RunId) -> Result<Option<RunRecord>, FlowError> {
        match tokio::fs::read(self.path_for(run_id)).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use dagcore::{Caller, CodeRuntime, RunStatus};
    use uuid::Uuid;

    fn record() -> RunRecord {
        RunRecord {
            run_id: Uuid::new_v4(),
            workflow_id: Uuid::new_v4(),
            started_at: Utc::now(),
            finished_at: Utc::now(),
            results: BTreeMap::new(),
            status: RunStatus::Succeeded,
        }
    }

    #[tokio::test]
    async fn memory_store_reports_missing_workflow() {
        let store = MemoryStore::new();
        let id = Uuid::new_v4();
        let err = store.load_workflow(id).await.unwrap_err();
        assert!(matches!(err, FlowError::Workflow(WorkflowError::NotFound(missing)) if missing == id));
    }

    #[tokio::test]
    async fn memory_store_round_trips_workflows() {
        let store = MemoryStore::new();
        let wf = Workflow::new("saved");
        store.save_workflow(wf.clone()).await.unwrap();
        assert_eq!(store.load_workflow(wf.id).await.unwrap().name, "saved");
        assert_eq!(store.list_workflows().await.unwrap().len(), 1);
        assert!(store.delete_workflow(wf.id).await.unwrap());
        assert!(!store.delete_workflow(wf.id).await.unwrap());
    }

    #[tokio::test]
    async fn catalog_listing_respects_visibility() {
        let store = MemoryStore::with_contents(
            [],
            [
                NodeType::new("shared", CodeRuntime::Python, "def run(i, c): return 1"),
                NodeType::new("mine", CodeRuntime::Python, "def run(i, c): return 2").with_owner("alice"),
            ],
        );
        let public = store.list_node_types(&Visibility::Public).await.unwrap();
        assert_eq!(public.len(), 1);

        let alice = Visibility::VisibleTo(Caller::new("alice"));
        assert_eq!(store.list_node_types(&alice).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn file_store_persists_records() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileRunStore::new(dir.path().join("runs"));
        let record = record();

        store.save_run(&record).await.unwrap();
        assert!(store.path_for(record.run_id).exists());

        let loaded = store.load_run(record.run_id).await.unwrap().unwrap();
        assert_eq!(loaded.run_id, record.run_id);
        assert_eq!(loaded.status, RunStatus::Succeeded);
        assert!(store.load_run(Uuid::new_v4()).await.unwrap().is_none());
    }
}
