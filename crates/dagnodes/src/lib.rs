//! Standard node library
//!
//! Collection of built-in nodes for common operations. Each is referenced
//! from a `builtin` node type by the name it registers under.

mod debug;
mod http;
mod math;
mod time;
mod transform;
mod value;

pub use debug::DebugNode;
pub use http::HttpRequestNode;
pub use math::DoubleNode;
pub use time::DelayNode;
pub use transform::{JsonParseNode, JsonStringifyNode};
pub use value::EchoNode;

use dagcore::{NodeContext, NodeError, NodeType, Value};
use dagruntime::BuiltinRegistry;
use std::sync::Arc;

/// Register all standard nodes with a registry
pub fn register_all(registry: &mut BuiltinRegistry) {
    registry.register(Arc::new(debug::DebugNodeFactory));
    registry.register(Arc::new(http::HttpRequestNodeFactory));
    registry.register(Arc::new(math::DoubleNodeFactory));
    registry.register(Arc::new(transform::JsonParseNodeFactory));
    registry.register(Arc::new(transform::JsonStringifyNodeFactory));
    registry.register(Arc::new(time::DelayNodeFactory));
    registry.register(Arc::new(value::EchoNodeFactory));
}

/// Registry pre-filled with every standard node
pub fn standard_registry() -> BuiltinRegistry {
    let mut registry = BuiltinRegistry::new();
    register_all(&mut registry);
    registry
}

/// Public catalog entries for the standard nodes, one per builtin, with
/// the builtin name as id
pub fn standard_node_types(registry: &BuiltinRegistry) -> Vec<NodeType> {
    registry
        .list_node_types()
        .into_iter()
        .map(|name| {
            let description = registry
                .get_metadata(&name)
                .map(|m| m.description)
                .unwrap_or_default();
            let display = if description.is_empty() { name.clone() } else { description };
            NodeType::builtin(name.clone(), name).with_name(display)
        })
        .collect()
}

/// Named input, falling back to the single-upstream `default` alias
pub(crate) fn input_or_default<'a>(ctx: &'a NodeContext, name: &str) -> Result<&'a Value, NodeError> {
    ctx.inputs
        .get(name)
        .or_else(|| ctx.inputs.get("default"))
        .ok_or_else(|| NodeError::MissingInput(name.to_string()))
}
