use super::{ExecutionEnv, ExecutionRequest, SandboxBackend};
use crate::builtins::BuiltinRegistry;
use crate::registry::NodeTypeDefinition;
use async_trait::async_trait;
use dagcore::{ExecutionError, NodeContext, Value};
use std::any::Any;
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Runs builtin nodes in-process.
///
/// Each execution gets a fresh node instance and owned copies of its
/// inputs and config, on its own task. A panic in node code surfaces as a
/// join error and is reported as a failure of that node only.
pub struct NativeSandbox {
    builtins: Arc<BuiltinRegistry>,
}

impl NativeSandbox {
    pub fn new(builtins: Arc<BuiltinRegistry>) -> Self {
        Self { builtins }
    }
}

#[async_trait]
impl SandboxBackend for NativeSandbox {
    async fn run(
        &self,
        definition: &NodeTypeDefinition,
        request: ExecutionRequest,
        env: ExecutionEnv,
    ) -> Result<Value, ExecutionError> {
        let node_id = request.node_id.clone();
        let fail = |cause: String| ExecutionError::failed(node_id.clone(), cause);

        let node = self
            .builtins
            .create_node(&definition.code, &request.config)
            .map_err(|e| fail(e.to_string()))?;
        node.validate_config(&request.config)
            .map_err(|e| fail(e.to_string()))?;

        let ctx = NodeContext {
            node_id: request.node_id,
            inputs: request.inputs,
            config: request.config,
            events: env.events,
            cancellation: env.cancellation,
        };

        let mut task = AbortOnDrop(tokio::spawn(async move { node.execute(ctx).await }));
        match (&mut task.0).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(fail(e.to_string())),
            Err(e) if e.is_panic() => Err(fail(format!(
                "node panicked: {}",
                panic_message(e.into_panic())
            ))),
            Err(_) => Err(ExecutionError::Cancelled {
                node_id: node_id.clone(),
            }),
        }
    }
}

/// Aborts the wrapped task when the owning future is dropped
struct AbortOnDrop<T>(JoinHandle<T>);

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
