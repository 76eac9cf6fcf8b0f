use crate::{events::EventEmitter, NodeError, NodeId, Value};
use async_trait::async_trait;
use std::collections::BTreeMap;
use tokio_util::sync::CancellationToken;

/// Core trait implemented by natively executed node code
#[async_trait]
pub trait Node: Send + Sync {
    /// Builtin name this node is registered under (e.g. "debug.log")
    fn node_type(&self) -> &str;

    /// Run the node against its inputs and config, returning its output value
    async fn execute(&self, ctx: NodeContext) -> Result<Value, NodeError>;

    /// Optional: Validate configuration before the node is scheduled
    fn validate_config(&self, _config: &Value) -> Result<(), NodeError> {
        Ok(())
    }
}

/// Execution context passed to each node
#[derive(Clone)]
pub struct NodeContext {
    /// Node instance id within the workflow
    pub node_id: NodeId,

    /// Upstream outputs keyed by edge label (or source node id)
    pub inputs: BTreeMap<String, Value>,

    /// Node instance configuration, passed verbatim
    pub config: Value,

    /// Event emitter for real-time updates
    pub events: EventEmitter,

    /// Fires when the run is cancelled or the node's deadline passes
    pub cancellation: CancellationToken,
}

impl NodeContext {
    pub fn new(node_id: impl Into<NodeId>, events: EventEmitter) -> Self {
        Self {
            node_id: node_id.into(),
            inputs: BTreeMap::new(),
            config: Value::Null,
            events,
            cancellation: CancellationToken::new(),
        }
    }

    pub fn with_inputs(mut self, inputs: BTreeMap<String, Value>) -> Self {
        self.inputs = inputs;
        self
    }

    pub fn with_config(mut self, config: Value) -> Self {
        self.config = config;
        self
    }

    /// Get required input or return error
    pub fn require_input(&self, name: &str) -> Result<&Value, NodeError> {
        self.inputs
            .get(name)
            .ok_or_else(|| NodeError::MissingInput(name.to_string()))
    }

    /// Get a required numeric input
    pub fn require_number(&self, name: &str) -> Result<f64, NodeError> {
        let value = self.require_input(name)?;
        value.as_f64().ok_or_else(|| NodeError::InvalidInputType {
            field: name.to_string(),
            expected: "number".to_string(),
            actual: value.kind().to_string(),
        })
    }

    /// Get config with default
    pub fn get_config_or(&self, name: &str, default: Value) -> Value {
        self.config.get(name).cloned().unwrap_or(default)
    }
}
