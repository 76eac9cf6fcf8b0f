// Shared fixtures for the dagruntime integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use dagcore::{Node, NodeContext, NodeError, NodeType, Value};
use dagruntime::{BuiltinRegistry, EngineConfig, FlowRuntime, MemoryStore, NodeFactory};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Returns `config.v`, or the whole config when there is no `v`
struct Echo;

#[async_trait]
impl Node for Echo {
    fn node_type(&self) -> &str {
        "test.echo"
    }

    async fn execute(&self, ctx: NodeContext) -> Result<Value, NodeError> {
        Ok(ctx.config.get("v").cloned().unwrap_or(ctx.config))
    }
}

/// Doubles `inputs.default`
struct Double;

#[async_trait]
impl Node for Double {
    fn node_type(&self) -> &str {
        "test.double"
    }

    async fn execute(&self, ctx: NodeContext) -> Result<Value, NodeError> {
        Ok(Value::Number(ctx.require_number("default")? * 2.0))
    }
}

struct Fail;

#[async_trait]
impl Node for Fail {
    fn node_type(&self) -> &str {
        "test.fail"
    }

    async fn execute(&self, _ctx: NodeContext) -> Result<Value, NodeError> {
        Err(NodeError::ExecutionFailed("boom".to_string()))
    }
}

/// Sleeps for `config.ms`, giving up early when cancelled
struct Sleep;

#[async_trait]
impl Node for Sleep {
    fn node_type(&self) -> &str {
        "test.sleep"
    }

    async fn execute(&self, ctx: NodeContext) -> Result<Value, NodeError> {
        let ms = ctx.get_config_or("ms", Value::from(1000)).as_f64().unwrap_or(1000.0) as u64;
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_millis(ms)) => Ok(Value::from(ms as i64)),
            _ = ctx.cancellation.cancelled() => Err(NodeError::ExecutionFailed("interrupted".into())),
        }
    }
}

/// Returns its inputs as an object and counts invocations
struct Collect {
    invocations: Arc<AtomicUsize>,
}

#[async_trait]
impl Node for Collect {
    fn node_type(&self) -> &str {
        "test.collect"
    }

    async fn execute(&self, ctx: NodeContext) -> Result<Value, NodeError> {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        Ok(Value::Object(ctx.inputs))
    }
}

struct Factory<F> {
    name: &'static str,
    make: F,
}

impl<F> NodeFactory for Factory<F>
where
    F: Fn() -> Box<dyn Node> + Send + Sync,
{
    fn create(&self, _config: &Value) -> Result<Box<dyn Node>, NodeError> {
        Ok((self.make)())
    }

    fn node_type(&self) -> &str {
        self.name
    }
}

pub struct Harness {
    pub runtime: FlowRuntime,
    pub store: Arc<MemoryStore>,
    /// Executions of the `collect` node type
    pub invocations: Arc<AtomicUsize>,
}

impl Harness {
    pub fn invocations(&self) -> usize {
        self.invocations.load(Ordering::SeqCst)
    }
}

pub fn builtins(invocations: Arc<AtomicUsize>) -> BuiltinRegistry {
    let mut registry = BuiltinRegistry::new();
    registry.register(Arc::new(Factory { name: "test.echo", make: || Box::new(Echo) as Box<dyn Node> }));
    registry.register(Arc::new(Factory { name: "test.double", make: || Box::new(Double) as Box<dyn Node> }));
    registry.register(Arc::new(Factory { name: "test.fail", make: || Box::new(Fail) as Box<dyn Node> }));
    registry.register(Arc::new(Factory { name: "test.sleep", make: || Box::new(Sleep) as Box<dyn Node> }));
    registry.register(Arc::new(Factory {
        name: "test.collect",
        make: move || {
            Box::new(Collect {
                invocations: invocations.clone(),
            }) as Box<dyn Node>
        },
    }));
    registry
}

/// Catalog entries for every test builtin, under short ids
pub fn node_types() -> Vec<NodeType> {
    ["echo", "double", "fail", "sleep", "collect"]
        .into_iter()
        .map(|id| NodeType::builtin(id, format!("test.{}", id)))
        .collect()
}

pub fn harness(config: EngineConfig) -> Harness {
    let invocations = Arc::new(AtomicUsize::new(0));
    let store = Arc::new(MemoryStore::with_contents([], node_types()));
    let runtime = FlowRuntime::with_stores(
        store.clone(),
        store.clone(),
        builtins(invocations.clone()),
        config,
    )
    .expect("valid engine config");
    Harness {
        runtime,
        store,
        invocations,
    }
}

pub fn single_worker() -> EngineConfig {
    EngineConfig::default().with_max_workers(1)
}
