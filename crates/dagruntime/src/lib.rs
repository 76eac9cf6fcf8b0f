//! Workflow execution runtime
//!
//! Builds the graph model, validates it, pins node types, and schedules
//! node executions through the sandbox while recording every outcome.

pub mod builtins;
pub mod graph;
pub mod recorder;
pub mod registry;
mod runtime;
pub mod sandbox;
pub mod scheduler;
pub mod store;
pub mod validator;

pub use builtins::{BuiltinRegistry, NodeFactory, NodeMetadata, PortDefinition};
pub use graph::GraphModel;
pub use registry::{NodeTypeDefinition, NodeTypeRegistry, NodeTypeSnapshot};
pub use runtime::{EngineConfig, FlowRuntime};
pub use sandbox::{ExecutionLimits, ProcessSandboxConfig, SandboxDispatcher};
pub use scheduler::{Scheduler, MAX_WORKERS};
pub use store::{FileRunStore, MemoryStore, NodeTypeCatalog, RunStore, WorkflowStore};
pub use validator::ValidatedGraph;
