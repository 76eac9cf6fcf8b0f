//! Core abstractions for the dagflow engine
//!
//! Value model, workflow and node-type data model, error taxonomy, the
//! native `Node` trait, execution events and run records. Every other
//! crate in the workspace builds on these types.

mod error;
pub mod events;
mod node;
mod record;
mod value;
mod workflow;

pub use error::{EngineError, ExecutionError, FlowError, NodeError, WorkflowError};
pub use events::*;
pub use node::{Node, NodeContext};
pub use record::{FailureKind, NodeFailure, NodeResult, NodeStatus, RunRecord, RunStatus};
pub use value::Value;
pub use workflow::{
    Caller, CodeRuntime, Edge, EdgeId, NodeId, NodeInstance, NodeType, NodeTypeId, Position,
    Size, Visibility, Workflow, WorkflowId,
};
