use crate::Value;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type WorkflowId = Uuid;
pub type NodeId = String;
pub type NodeTypeId = String;
pub type EdgeId = String;

/// Complete workflow definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    pub id: WorkflowId,
    pub name: String,
    #[serde(default)]
    pub owner_id: Option<String>,
    #[serde(default)]
    pub is_public: bool,
    #[serde(default)]
    pub nodes: Vec<NodeInstance>,
    #[serde(default)]
    pub edges: Vec<Edge>,
}

impl Workflow {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            owner_id: None,
            is_public: false,
            nodes: Vec::new(),
            edges: Vec::new(),
        }
    }

    pub fn with_owner(mut self, owner_id: impl Into<String>) -> Self {
        self.owner_id = Some(owner_id.into());
        self
    }

    pub fn public(mut self) -> Self {
        self.is_public = true;
        self
    }

    pub fn add_node(&mut self, node: NodeInstance) -> NodeId {
        let id = node.id.clone();
        self.nodes.push(node);
        id
    }

    /// Add an unlabeled edge; the target sees the value under the source id
    pub fn connect(&mut self, source: impl Into<NodeId>, target: impl Into<NodeId>) -> EdgeId {
        self.push_edge(source.into(), target.into(), None)
    }

    /// Add an edge whose value is delivered under `label`
    pub fn connect_labeled(
        &mut self,
        source: impl Into<NodeId>,
        target: impl Into<NodeId>,
        label: impl Into<String>,
    ) -> EdgeId {
        self.push_edge(source.into(), target.into(), Some(label.into()))
    }

    fn push_edge(&mut self, source: NodeId, target: NodeId, label: Option<String>) -> EdgeId {
        let id = format!("e{}", self.edges.len() + 1);
        self.edges.push(Edge {
            id: id.clone(),
            source_node_id: source,
            target_node_id: target,
            label,
        });
        id
    }

    /// Public workflows are visible to everyone, private ones to their owner
    pub fn is_visible_to(&self, caller: &Caller) -> bool {
        self.is_public || self.owner_id.as_deref() == Some(caller.user_id.as_str())
    }
}

/// One placement of a node type inside a workflow
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeInstance {
    pub id: NodeId,
    /// `None` marks an empty placeholder that cannot execute
    #[serde(default)]
    pub node_type_id: Option<NodeTypeId>,
    #[serde(default)]
    pub position: Position,
    #[serde(default)]
    pub size: Size,
    #[serde(default)]
    pub config: Value,
}

impl NodeInstance {
    pub fn new(id: impl Into<NodeId>, node_type_id: impl Into<NodeTypeId>) -> Self {
        Self {
            id: id.into(),
            node_type_id: Some(node_type_id.into()),
            position: Position::default(),
            size: Size::default(),
            config: Value::Null,
        }
    }

    /// A node with no type assigned yet
    pub fn placeholder(id: impl Into<NodeId>) -> Self {
        Self {
            id: id.into(),
            node_type_id: None,
            position: Position::default(),
            size: Size::default(),
            config: Value::Null,
        }
    }

    pub fn with_config(mut self, config: impl Into<Value>) -> Self {
        self.config = config.into();
        self
    }

    /// Set config from its persisted text form.
    ///
    /// JSON text becomes the parsed value; anything else is kept verbatim.
    pub fn with_config_text(mut self, text: &str) -> Self {
        self.config = match serde_json::from_str::<serde_json::Value>(text) {
            Ok(json) => Value::from(json),
            Err(_) if text.trim().is_empty() => Value::Null,
            Err(_) => Value::String(text.to_string()),
        };
        self
    }

    pub fn with_position(mut self, x: f32, y: f32) -> Self {
        self.position = Position { x, y };
        self
    }

    pub fn is_configured(&self) -> bool {
        self.node_type_id.is_some()
    }
}

/// Directed data-flow connection between two node instances
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Edge {
    pub id: EdgeId,
    pub source_node_id: NodeId,
    pub target_node_id: NodeId,
    #[serde(default)]
    pub label: Option<String>,
}

impl Edge {
    /// Key under which the target receives this edge's value
    pub fn input_key(&self) -> &str {
        self.label.as_deref().unwrap_or(&self.source_node_id)
    }
}

/// Node position in visual editor
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Position {
    pub x: f32,
    pub y: f32,
}

impl Default for Position {
    fn default() -> Self {
        Self { x: 0.0, y: 0.0 }
    }
}

/// Node size in visual editor
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Size {
    pub width: f32,
    pub height: f32,
}

impl Default for Size {
    fn default() -> Self {
        Self {
            width: 200.0,
            height: 100.0,
        }
    }
}

/// How a node type's code is executed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CodeRuntime {
    /// `code` names a native node registered in the builtin registry
    Builtin,
    /// `code` defines `run(inputs, config)` for a python interpreter
    #[default]
    Python,
    /// `code` is a shell script reading the input envelope on stdin
    Shell,
}

/// Reusable, user-authored unit of computation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeType {
    pub id: NodeTypeId,
    pub name: String,
    pub code: String,
    #[serde(default)]
    pub runtime: CodeRuntime,
    #[serde(default)]
    pub owner_id: Option<String>,
    #[serde(default)]
    pub is_public: bool,
}

impl NodeType {
    pub fn new(
        id: impl Into<NodeTypeId>,
        runtime: CodeRuntime,
        code: impl Into<String>,
    ) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            code: code.into(),
            runtime,
            owner_id: None,
            is_public: true,
        }
    }

    /// Node type backed by a builtin node of the given name
    pub fn builtin(id: impl Into<NodeTypeId>, builtin: impl Into<String>) -> Self {
        Self::new(id, CodeRuntime::Builtin, builtin)
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_owner(mut self, owner_id: impl Into<String>) -> Self {
        self.owner_id = Some(owner_id.into());
        self.is_public = false;
        self
    }

    pub fn is_visible_to(&self, caller: &Caller) -> bool {
        self.is_public || self.owner_id.as_deref() == Some(caller.user_id.as_str())
    }
}

/// Authenticated identity of whoever asks for a run or a listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller {
    pub user_id: String,
}

impl Caller {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
        }
    }
}

/// Which node types a catalog listing should return
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Visibility {
    /// Public types only
    Public,
    /// Public types plus the caller's private ones
    VisibleTo(Caller),
    /// Everything, regardless of owner
    All,
}

impl Visibility {
    pub fn admits(&self, node_type: &NodeType) -> bool {
        match self {
            Visibility::Public => node_type.is_public,
            Visibility::VisibleTo(caller) => node_type.is_visible_to(caller),
            Visibility::All => true,
        }
    }
}
