use dagcore::{Node, NodeError, Value};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Factory trait for creating native node instances
pub trait NodeFactory: Send + Sync {
    /// Create a fresh instance of the node for one execution
    fn create(&self, config: &Value) -> Result<Box<dyn Node>, NodeError>;

    /// Builtin name referenced by `NodeType::code`
    fn node_type(&self) -> &str;

    /// Optional: Get node metadata (description, input/output schema, etc.)
    fn metadata(&self) -> NodeMetadata {
        NodeMetadata::default()
    }
}

/// Metadata about a builtin node
#[derive(Debug, Clone)]
pub struct NodeMetadata {
    pub description: String,
    pub category: String,
    pub inputs: Vec<PortDefinition>,
    pub outputs: Vec<PortDefinition>,
}

impl Default for NodeMetadata {
    fn default() -> Self {
        Self {
            description: String::new(),
            category: "general".to_string(),
            inputs: Vec::new(),
            outputs: Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PortDefinition {
    pub name: String,
    pub description: String,
    pub required: bool,
}

impl PortDefinition {
    pub fn new(name: impl Into<String>, description: impl Into<String>, required: bool) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            required,
        }
    }
}

/// Registry of natively implemented node code.
///
/// Node types with the `builtin` runtime name one of these factories in
/// their `code`.
#[derive(Clone, Default)]
pub struct BuiltinRegistry {
    factories: BTreeMap<String, Arc<dyn NodeFactory>>,
}

impl BuiltinRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a node factory, replacing any previous one with the same name
    pub fn register(&mut self, factory: Arc<dyn NodeFactory>) {
        let node_type = factory.node_type().to_string();
        tracing::debug!("Registering builtin node: {}", node_type);
        self.factories.insert(node_type, factory);
    }

    pub fn get(&self, node_type: &str) -> Option<&Arc<dyn NodeFactory>> {
        self.factories.get(node_type)
    }

    pub fn contains(&self, node_type: &str) -> bool {
        self.factories.contains_key(node_type)
    }

    /// Create a node instance from a builtin name and config
    pub fn create_node(&self, node_type: &str, config: &Value) -> Result<Box<dyn Node>, NodeError> {
        let factory = self.factories.get(node_type).ok_or_else(|| {
            NodeError::Configuration(format!("Unknown builtin node: {}", node_type))
        })?;
        factory.create(config)
    }

    /// All registered builtin names, sorted
    pub fn list_node_types(&self) -> Vec<String> {
        self.factories.keys().cloned().collect()
    }

    pub fn get_metadata(&self, node_type: &str) -> Option<NodeMetadata> {
        self.factories.get(node_type).map(|f| f.metadata())
    }
}
