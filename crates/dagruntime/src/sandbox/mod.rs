//! Execution sandbox: runs one node's code under time and resource limits.
//!
//! The dispatcher owns the deadline and cancellation handling; backends
//! only know how to run code. Dropping a backend future tears down its
//! work (native tasks are aborted, child processes are killed), so a node
//! that overruns can never hold the engine.

mod native;
mod process;

pub use native::NativeSandbox;
pub use process::{ProcessSandbox, ProcessSandboxConfig};

use crate::builtins::BuiltinRegistry;
use crate::registry::NodeTypeDefinition;
use async_trait::async_trait;
use dagcore::{CodeRuntime, EventEmitter, ExecutionError, NodeId, Value};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Bounds applied to every node execution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionLimits {
    /// Wall-clock budget for one node
    pub timeout: Duration,
    /// Address-space cap for process-backed nodes (unix only)
    pub max_memory_bytes: Option<u64>,
    /// Largest output a node may produce, in serialized bytes
    pub max_output_bytes: usize,
}

impl Default for ExecutionLimits {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            max_memory_bytes: None,
            max_output_bytes: 8 * 1024 * 1024,
        }
    }
}

impl ExecutionLimits {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_memory(mut self, bytes: u64) -> Self {
        self.max_memory_bytes = Some(bytes);
        self
    }

    pub fn with_max_output(mut self, bytes: usize) -> Self {
        self.max_output_bytes = bytes;
        self
    }
}

/// What a node receives
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRequest {
    pub node_id: NodeId,
    pub inputs: BTreeMap<String, Value>,
    pub config: Value,
}

/// Per-execution environment handed to a backend
#[derive(Clone)]
pub struct ExecutionEnv {
    pub limits: ExecutionLimits,
    pub cancellation: CancellationToken,
    pub events: EventEmitter,
}

/// One way of running node code
#[async_trait]
pub trait SandboxBackend: Send + Sync {
    async fn run(
        &self,
        definition: &NodeTypeDefinition,
        request: ExecutionRequest,
        env: ExecutionEnv,
    ) -> Result<Value, ExecutionError>;
}

/// Routes executions to the backend matching each node type's runtime
pub struct SandboxDispatcher {
    native: NativeSandbox,
    process: ProcessSandbox,
}

impl SandboxDispatcher {
    pub fn new(builtins: Arc<BuiltinRegistry>, process: ProcessSandboxConfig) -> Self {
        Self {
            native: NativeSandbox::new(builtins),
            process: ProcessSandbox::new(process),
        }
    }

    fn backend(&self, runtime: CodeRuntime) -> &dyn SandboxBackend {
        match runtime {
            CodeRuntime::Builtin => &self.native,
            CodeRuntime::Python | CodeRuntime::Shell => &self.process,
        }
    }

    /// Execute one node.
    ///
    /// Never panics and never returns anything but the node's value or a
    /// per-node [`ExecutionError`].
    pub async fn execute(
        &self,
        definition: &NodeTypeDefinition,
        request: ExecutionRequest,
        limits: ExecutionLimits,
        cancellation: CancellationToken,
        events: EventEmitter,
    ) -> Result<Value, ExecutionError> {
        let node_id = request.node_id.clone();
        let node_token = cancellation.child_token();
        let env = ExecutionEnv {
            limits: limits.clone(),
            cancellation: node_token.clone(),
            events,
        };
        let run = self.backend(definition.runtime).run(definition, request, env);

        let outcome = tokio::select! {
            biased;
            _ = cancellation.cancelled() => Err(ExecutionError::Cancelled { node_id: node_id.clone() }),
            result = tokio::time::timeout(limits.timeout, run) => match result {
                Ok(result) => result,
                Err(_) => Err(ExecutionError::TimedOut {
                    node_id: node_id.clone(),
                    timeout_ms: limits.timeout.as_millis() as u64,
                }),
            },
        };
        // Lets cooperative node code notice it lost the race
        node_token.cancel();

        let value = outcome?;
        check_output_size(&node_id, &value, limits.max_output_bytes)?;
        Ok(value)
    }
}

fn check_output_size(node_id: &str, value: &Value, max: usize) -> Result<(), ExecutionError> {
    let size = serde_json::to_vec(value)
        .map_err(|e| ExecutionError::failed(node_id, format!("output is not serializable: {}", e)))?
        .len();
    if size > max {
        return Err(ExecutionError::ResourceLimit {
            node_id: node_id.to_string(),
            resource: "output".to_string(),
            detail: format!("{} bytes produced, {} allowed", size, max),
        });
    }
    Ok(())
}
