use async_trait::async_trait;
use dagcore::{Node, NodeContext, NodeError, Value};
use dagruntime::{NodeFactory, NodeMetadata};
use tokio::time::{sleep, Duration};

/// Delay execution for a specified duration
pub struct DelayNode;

#[async_trait]
impl Node for DelayNode {
    fn node_type(&self) -> &str {
        "time.delay"
    }

    async fn execute(&self, ctx: NodeContext) -> Result<Value, NodeError> {
        let delay_ms = ctx
            .config
            .get("delay_ms")
            .and_then(|v| v.as_f64())
            .unwrap_or(1000.0) as u64;

        ctx.events.info(format!("Delaying for {}ms", delay_ms));

        tokio::select! {
            _ = sleep(Duration::from_millis(delay_ms)) => {}
            _ = ctx.cancellation.cancelled() => {
                return Err(NodeError::ExecutionFailed("delay interrupted".to_string()));
            }
        }

        // Pass through the inputs
        Ok(match ctx.inputs.get("default") {
            Some(value) => value.clone(),
            None => Value::Object(ctx.inputs),
        })
    }

    fn validate_config(&self, config: &Value) -> Result<(), NodeError> {
        match config.get("delay_ms") {
            Some(v) if v.as_f64().map_or(true, |ms| ms < 0.0) => Err(NodeError::Configuration(
                "delay_ms must be a non-negative number".to_string(),
            )),
            _ => Ok(()),
        }
    }
}

pub struct DelayNodeFactory;

impl NodeFactory for DelayNodeFactory {
    fn create(&self, _config: &Value) -> Result<Box<dyn Node>, NodeError> {
        Ok(Box::new(DelayNode))
    }

    fn node_type(&self) -> &str {
        "time.delay"
    }

    fn metadata(&self) -> NodeMetadata {
        NodeMetadata {
            description: "Delay execution for specified milliseconds".to_string(),
            category: "time".to_string(),
            inputs: vec![],
            outputs: vec![],
        }
    }
}
