use async_trait::async_trait;
use dagcore::{Node, NodeContext, NodeError, Value};
use dagruntime::{NodeFactory, NodeMetadata, PortDefinition};

/// Doubles its single numeric input
pub struct DoubleNode;

#[async_trait]
impl Node for DoubleNode {
    fn node_type(&self) -> &str {
        "math.double"
    }

    async fn execute(&self, ctx: NodeContext) -> Result<Value, NodeError> {
        Ok(Value::Number(ctx.require_number("default")? * 2.0))
    }
}

pub struct DoubleNodeFactory;

impl NodeFactory for DoubleNodeFactory {
    fn create(&self, _config: &Value) -> Result<Box<dyn Node>, NodeError> {
        Ok(Box::new(DoubleNode))
    }

    fn node_type(&self) -> &str {
        "math.double"
    }

    fn metadata(&self) -> NodeMetadata {
        NodeMetadata {
            description: "Multiply the input by two".to_string(),
            category: "math".to_string(),
            inputs: vec![PortDefinition::new("default", "Number to double", true)],
            outputs: vec![],
        }
    }
}
