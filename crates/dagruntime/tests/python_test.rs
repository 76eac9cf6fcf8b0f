// Python node code; these tests need `python3` on PATH

#![cfg(unix)]

use dagcore::{
    CodeRuntime, EventBus, ExecutionError, FailureKind, NodeInstance, NodeStatus, NodeType,
    RunStatus, Value, Workflow,
};
use dagruntime::sandbox::ExecutionRequest;
use dagruntime::{
    BuiltinRegistry, EngineConfig, ExecutionLimits, FlowRuntime, MemoryStore, NodeTypeDefinition,
    ProcessSandboxConfig, SandboxDispatcher,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

const ECHO: &str = "def run(inputs, config):\n    return config[\"v\"]\n";
const DOUBLE: &str = "def run(inputs, config):\n    return inputs[\"default\"] * 2\n";
const RAISE: &str = "def run(inputs, config):\n    raise ValueError(\"boom\")\n";
const CHATTY: &str = "def run(inputs, config):\n    print(\"working on\", inputs)\n    return {\"ok\": True}\n";
const SET_RESULT: &str = "def run(inputs, config):\n    return {1, 2}\n";
const GREEDY: &str = "def run(inputs, config):\n    data = bytearray(1024 * 1024 * 1024)\n    return len(data)\n";

fn runtime() -> FlowRuntime {
    let node_types = [
        ("echo", ECHO),
        ("double", DOUBLE),
        ("raise", RAISE),
        ("chatty", CHATTY),
        ("set", SET_RESULT),
    ]
    .into_iter()
    .map(|(id, code)| NodeType::new(id, CodeRuntime::Python, code))
    .collect::<Vec<_>>();
    let store = Arc::new(MemoryStore::with_contents([], node_types));
    FlowRuntime::with_stores(store.clone(), store, BuiltinRegistry::new(), EngineConfig::default())
        .unwrap()
}

fn chain(mid: &str) -> Workflow {
    let mut wf = Workflow::new("python chain");
    wf.add_node(NodeInstance::new("a", "echo").with_config(Value::object([("v", 1)])));
    wf.add_node(NodeInstance::new("b", mid));
    wf.add_node(NodeInstance::new("c", "double"));
    wf.connect("a", "b");
    wf.connect("b", "c");
    wf
}

#[tokio::test]
async fn test_python_chain() {
    let record = runtime()
        .execute(&chain("double"), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(record.status, RunStatus::Succeeded);
    assert_eq!(record.output("a"), Some(&Value::from(1)));
    assert_eq!(record.output("b"), Some(&Value::from(2)));
    assert_eq!(record.output("c"), Some(&Value::from(4)));
}

#[tokio::test]
async fn test_python_exception_fails_node_and_skips_downstream() {
    let record = runtime()
        .execute(&chain("raise"), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(record.status, RunStatus::Failed);
    assert_eq!(record.status_of("a"), Some(NodeStatus::Succeeded));
    assert_eq!(record.status_of("b"), Some(NodeStatus::Failed));
    let failure = record.result("b").unwrap().error.clone().unwrap();
    assert_eq!(failure.kind, FailureKind::Execution);
    assert!(failure.message.contains("boom"), "message was {}", failure.message);

    assert_eq!(record.status_of("c"), Some(NodeStatus::Skipped));
    assert_eq!(record.result("c").unwrap().error.as_ref().unwrap().kind, FailureKind::Upstream);
}

#[tokio::test]
async fn test_print_does_not_corrupt_result() {
    let mut wf = Workflow::new("chatty");
    wf.add_node(NodeInstance::new("p", "chatty"));

    let record = runtime().execute(&wf, CancellationToken::new()).await.unwrap();

    assert_eq!(record.output("p"), Some(&Value::object([("ok", true)])));
}

#[tokio::test]
async fn test_unserializable_result_is_malformed() {
    let mut wf = Workflow::new("set");
    wf.add_node(NodeInstance::new("s", "set"));

    let record = runtime().execute(&wf, CancellationToken::new()).await.unwrap();

    assert_eq!(record.status_of("s"), Some(NodeStatus::Failed));
    let message = &record.result("s").unwrap().error.as_ref().unwrap().message;
    assert!(message.contains("malformed return value"), "message was {}", message);
}

#[tokio::test]
async fn test_allocation_over_memory_cap() {
    let dispatcher =
        SandboxDispatcher::new(Arc::new(BuiltinRegistry::new()), ProcessSandboxConfig::default());
    let definition = NodeTypeDefinition {
        id: "greedy".to_string(),
        name: "greedy".to_string(),
        runtime: CodeRuntime::Python,
        code: GREEDY.to_string(),
    };
    let bus = EventBus::new(16);

    let err = dispatcher
        .execute(
            &definition,
            ExecutionRequest {
                node_id: "g".to_string(),
                inputs: BTreeMap::new(),
                config: Value::Null,
            },
            ExecutionLimits::default().with_max_memory(256 * 1024 * 1024),
            CancellationToken::new(),
            bus.create_emitter(Uuid::new_v4(), "g".to_string()),
        )
        .await
        .unwrap_err();

    match err {
        ExecutionError::ResourceLimit { node_id, resource, detail } => {
            assert_eq!(node_id, "g");
            assert_eq!(resource, "memory");
            assert!(detail.contains("MemoryError"), "detail was {}", detail);
        }
        other => panic!("expected memory limit, got {:?}", other),
    }
}
