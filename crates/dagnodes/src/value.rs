use async_trait::async_trait;
use dagcore::{Node, NodeContext, NodeError, Value};
use dagruntime::{NodeFactory, NodeMetadata};

/// Emits `config.v`, or the whole config when `v` is absent
pub struct EchoNode;

#[async_trait]
impl Node for EchoNode {
    fn node_type(&self) -> &str {
        "value.echo"
    }

    async fn execute(&self, ctx: NodeContext) -> Result<Value, NodeError> {
        Ok(match ctx.config.get("v") {
            Some(v) => v.clone(),
            None => ctx.config,
        })
    }
}

pub struct EchoNodeFactory;

impl NodeFactory for EchoNodeFactory {
    fn create(&self, _config: &Value) -> Result<Box<dyn Node>, NodeError> {
        Ok(Box::new(EchoNode))
    }

    fn node_type(&self) -> &str {
        "value.echo"
    }

    fn metadata(&self) -> NodeMetadata {
        NodeMetadata {
            description: "Emit a constant from config".to_string(),
            category: "value".to_string(),
            inputs: vec![],
            outputs: vec![],
        }
    }
}
