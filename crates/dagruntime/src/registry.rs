use crate::store::NodeTypeCatalog;
use dagcore::{CodeRuntime, FlowError, NodeType, NodeTypeId, Workflow, WorkflowError};
use std::collections::HashMap;
use std::sync::Arc;

/// Executable definition of a node type, pinned for the duration of a run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeTypeDefinition {
    pub id: NodeTypeId,
    pub name: String,
    pub runtime: CodeRuntime,
    pub code: String,
}

impl From<NodeType> for NodeTypeDefinition {
    fn from(node_type: NodeType) -> Self {
        Self {
            id: node_type.id,
            name: node_type.name,
            runtime: node_type.runtime,
            code: node_type.code,
        }
    }
}

/// Resolves node type ids against the catalog
#[derive(Clone)]
pub struct NodeTypeRegistry {
    catalog: Arc<dyn NodeTypeCatalog>,
}

impl NodeTypeRegistry {
    pub fn new(catalog: Arc<dyn NodeTypeCatalog>) -> Self {
        Self { catalog }
    }

    /// Look up one node type.
    ///
    /// The catalog is only read; a missing id is [`WorkflowError::NodeTypeNotFound`].
    pub async fn resolve(&self, node_type_id: &str) -> Result<Arc<NodeTypeDefinition>, FlowError> {
        let node_type = self
            .catalog
            .load_node_type(node_type_id)
            .await?
            .ok_or_else(|| WorkflowError::NodeTypeNotFound(node_type_id.to_string()))?;
        Ok(Arc::new(node_type.into()))
    }

    /// Resolve every node type the workflow references, once.
    ///
    /// The run reads only the returned snapshot, so catalog edits made while
    /// it executes are not observed.
    pub async fn snapshot(&self, workflow: &Workflow) -> Result<NodeTypeSnapshot, FlowError> {
        let mut types = HashMap::new();
        for node_type_id in workflow.nodes.iter().filter_map(|n| n.node_type_id.as_ref()) {
            if types.contains_key(node_type_id) {
                continue;
            }
            let definition = self.resolve(node_type_id).await?;
            types.insert(node_type_id.clone(), definition);
        }
        tracing::debug!("Pinned {} node types for workflow {}", types.len(), workflow.id);
        Ok(NodeTypeSnapshot { types })
    }
}

/// Node type definitions pinned at run start
#[derive(Debug, Clone, Default)]
pub struct NodeTypeSnapshot {
    types: HashMap<NodeTypeId, Arc<NodeTypeDefinition>>,
}

impl NodeTypeSnapshot {
    pub fn get(&self, node_type_id: &str) -> Option<&Arc<NodeTypeDefinition>> {
        self.types.get(node_type_id)
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    pub fn definitions(&self) -> impl Iterator<Item = &Arc<NodeTypeDefinition>> {
        self.types.values()
    }
}
