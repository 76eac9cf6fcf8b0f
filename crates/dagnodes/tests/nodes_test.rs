use dagcore::{
    EventBus, EventEmitter, ExecutionEvent, Node, NodeContext, NodeError, NodeEvent, NodeInstance,
    RunStatus, Value, Workflow,
};
use dagnodes::{
    standard_node_types, standard_registry, DebugNode, DelayNode, DoubleNode, EchoNode,
    HttpRequestNode, JsonParseNode, JsonStringifyNode,
};
use dagruntime::{EngineConfig, FlowRuntime, MemoryStore};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

// Helper function to create a test context
fn create_test_context(config: Value, inputs: Vec<(&str, Value)>) -> NodeContext {
    let inputs: BTreeMap<String, Value> = inputs
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();
    NodeContext::new("n1", EventEmitter::detached("n1"))
        .with_inputs(inputs)
        .with_config(config)
}

#[tokio::test]
async fn test_echo_and_double() {
    let ctx = create_test_context(Value::object([("v", 21)]), vec![]);
    assert_eq!(EchoNode.execute(ctx).await.unwrap(), Value::from(21));

    let ctx = create_test_context(Value::object([("other", true)]), vec![]);
    assert_eq!(
        EchoNode.execute(ctx).await.unwrap(),
        Value::object([("other", true)])
    );

    let ctx = create_test_context(Value::Null, vec![("default", Value::from(21))]);
    assert_eq!(DoubleNode.execute(ctx).await.unwrap(), Value::from(42));
}

#[tokio::test]
async fn test_double_rejects_non_numbers() {
    let ctx = create_test_context(Value::Null, vec![("default", Value::from("x"))]);
    match DoubleNode.execute(ctx).await {
        Err(NodeError::InvalidInputType { field, expected, actual }) => {
            assert_eq!(field, "default");
            assert_eq!(expected, "number");
            assert_eq!(actual, "string");
        }
        other => panic!("unexpected result {:?}", other),
    }

    let ctx = create_test_context(Value::Null, vec![]);
    assert!(matches!(
        DoubleNode.execute(ctx).await,
        Err(NodeError::MissingInput(name)) if name == "default"
    ));
}

#[tokio::test]
async fn test_json_roundtrip_nodes() {
    let ctx = create_test_context(Value::Null, vec![("json", Value::from(r#"{"a": [1, 2]}"#))]);
    let parsed = JsonParseNode.execute(ctx).await.unwrap();
    assert_eq!(
        parsed.get("a"),
        Some(&Value::from(vec![Value::from(1), Value::from(2)]))
    );

    let ctx = create_test_context(Value::Null, vec![("default", parsed)]);
    let text = JsonStringifyNode.execute(ctx).await.unwrap();
    assert_eq!(text, Value::from(r#"{"a":[1,2]}"#));

    let ctx = create_test_context(Value::Null, vec![("json", Value::from("{nope"))]);
    assert!(matches!(
        JsonParseNode.execute(ctx).await,
        Err(NodeError::ExecutionFailed(msg)) if msg.starts_with("JSON parse error")
    ));
}

#[tokio::test]
async fn test_debug_node_emits_events() {
    let bus = EventBus::new(16);
    let mut rx = bus.subscribe();
    let ctx = NodeContext::new("dbg", bus.create_emitter(uuid::Uuid::new_v4(), "dbg".into()))
        .with_config(Value::object([("message", "hello")]));

    let output = DebugNode.execute(ctx).await.unwrap();

    assert_eq!(output.get("message"), Some(&Value::from("hello")));
    match rx.recv().await.unwrap() {
        ExecutionEvent::NodeEvent { event: NodeEvent::Info { message }, .. } => {
            assert_eq!(message, "DEBUG: hello")
        }
        other => panic!("unexpected event {:?}", other),
    }
}

#[tokio::test]
async fn test_delay_passes_input_through_and_stops_on_cancel() {
    let ctx = create_test_context(
        Value::object([("delay_ms", 5)]),
        vec![("default", Value::from("kept"))],
    );
    assert_eq!(DelayNode.execute(ctx).await.unwrap(), Value::from("kept"));

    let ctx = create_test_context(Value::object([("delay_ms", 60_000)]), vec![]);
    let token = ctx.cancellation.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        token.cancel();
    });
    assert!(DelayNode.execute(ctx).await.is_err());

    assert!(DelayNode.validate_config(&Value::object([("delay_ms", -1)])).is_err());
    assert!(DelayNode.validate_config(&Value::Null).is_ok());
}

#[tokio::test]
async fn test_http_node_configuration_errors() {
    let node = HttpRequestNode::new();
    assert!(node
        .validate_config(&Value::object([("method", "TRACE")]))
        .is_err());
    assert!(node.validate_config(&Value::object([("method", "post")])).is_ok());

    let ctx = create_test_context(Value::Null, vec![]);
    assert!(matches!(
        node.execute(ctx).await,
        Err(NodeError::MissingInput(name)) if name == "url"
    ));
}

#[test]
fn test_standard_catalog_covers_registry() {
    let registry = standard_registry();
    let names = registry.list_node_types();
    for expected in [
        "debug.log",
        "http.request",
        "math.double",
        "time.delay",
        "transform.json_parse",
        "transform.json_stringify",
        "value.echo",
    ] {
        assert!(names.contains(&expected.to_string()), "missing {}", expected);
    }

    let types = standard_node_types(&registry);
    assert_eq!(types.len(), names.len());
    assert!(types.iter().all(|t| t.is_public && t.id == t.code));
}

#[tokio::test]
async fn test_standard_nodes_in_a_workflow() {
    let registry = standard_registry();
    let store = Arc::new(MemoryStore::with_contents([], standard_node_types(&registry)));
    let runtime = FlowRuntime::with_stores(
        store.clone(),
        store,
        registry,
        EngineConfig::default().with_max_workers(1),
    )
    .unwrap();

    let mut wf = Workflow::new("standard");
    wf.add_node(NodeInstance::new("a", "value.echo").with_config(Value::object([("v", 1)])));
    wf.add_node(NodeInstance::new("b", "math.double"));
    wf.add_node(NodeInstance::new("c", "math.double"));
    wf.add_node(NodeInstance::new("s", "transform.json_stringify"));
    wf.connect("a", "b");
    wf.connect("b", "c");
    wf.connect("c", "s");

    let record = runtime.execute(&wf, CancellationToken::new()).await.unwrap();

    assert_eq!(record.status, RunStatus::Succeeded);
    assert_eq!(record.output("c"), Some(&Value::from(4)));
    assert_eq!(record.output("s"), Some(&Value::from("4")));
}
