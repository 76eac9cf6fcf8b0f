use async_trait::async_trait;
use dagcore::{Node, NodeContext, NodeError, Value};
use dagruntime::{NodeFactory, NodeMetadata, PortDefinition};

/// Simple debug node that logs its inputs
pub struct DebugNode;

#[async_trait]
impl Node for DebugNode {
    fn node_type(&self) -> &str {
        "debug.log"
    }

    async fn execute(&self, ctx: NodeContext) -> Result<Value, NodeError> {
        let message = ctx
            .config
            .get("message")
            .or_else(|| ctx.inputs.get("message"))
            .and_then(|v| v.as_str())
            .unwrap_or("(no message)")
            .to_string();

        ctx.events.info(format!("DEBUG: {}", message));
        tracing::debug!("[{}] {}", ctx.node_id, message);

        // Also log all inputs for visibility
        for (key, value) in &ctx.inputs {
            ctx.events.info(format!("  {}: {:?}", key, value));
        }

        Ok(Value::object([
            ("message", Value::from(message)),
            ("inputs", Value::Object(ctx.inputs)),
        ]))
    }
}

pub struct DebugNodeFactory;

impl NodeFactory for DebugNodeFactory {
    fn create(&self, _config: &Value) -> Result<Box<dyn Node>, NodeError> {
        Ok(Box::new(DebugNode))
    }

    fn node_type(&self) -> &str {
        "debug.log"
    }

    fn metadata(&self) -> NodeMetadata {
        NodeMetadata {
            description: "Logs input values for debugging".to_string(),
            category: "debug".to_string(),
            inputs: vec![PortDefinition::new("message", "Text to log", false)],
            outputs: vec![],
        }
    }
}
