mod common;

use common::{harness, single_worker};
use dagcore::{
    Caller, CodeRuntime, EngineError, ExecutionEvent, FailureKind, FlowError, NodeInstance,
    NodeStatus, NodeType, RunStatus, Value, Workflow, WorkflowError,
};
use dagruntime::{EngineConfig, ExecutionLimits, FileRunStore, NodeTypeCatalog, RunStore, WorkflowStore};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

fn echo(id: &str, v: i64) -> NodeInstance {
    NodeInstance::new(id, "echo").with_config(Value::object([("v", v)]))
}

fn sleep(id: &str, ms: i64) -> NodeInstance {
    NodeInstance::new(id, "sleep").with_config(Value::object([("ms", ms)]))
}

fn chain() -> Workflow {
    let mut wf = Workflow::new("chain");
    wf.add_node(echo("a", 1));
    wf.add_node(NodeInstance::new("b", "double"));
    wf.add_node(NodeInstance::new("c", "double"));
    wf.connect("a", "b");
    wf.connect("b", "c");
    wf
}

#[tokio::test]
async fn test_echo_double_chain() {
    let h = harness(single_worker());
    let record = h.runtime.execute(&chain(), CancellationToken::new()).await.unwrap();

    assert_eq!(record.status, RunStatus::Succeeded);
    assert_eq!(record.output("a"), Some(&Value::from(1)));
    assert_eq!(record.output("b"), Some(&Value::from(2)));
    assert_eq!(record.output("c"), Some(&Value::from(4)));
    assert_eq!(record.results.len(), 3);
}

#[tokio::test]
async fn test_failing_node_skips_downstream() {
    let h = harness(single_worker());
    let mut wf = Workflow::new("mid-failure");
    wf.add_node(echo("a", 1));
    wf.add_node(NodeInstance::new("b", "fail"));
    wf.add_node(NodeInstance::new("c", "double"));
    wf.connect("a", "b");
    wf.connect("b", "c");

    let record = h.runtime.execute(&wf, CancellationToken::new()).await.unwrap();

    assert_eq!(record.status, RunStatus::Failed);
    assert_eq!(record.output("a"), Some(&Value::from(1)));
    assert_eq!(record.status_of("b"), Some(NodeStatus::Failed));
    let b_error = record.result("b").unwrap().error.as_ref().unwrap();
    assert_eq!(b_error.kind, FailureKind::Execution);
    assert!(b_error.message.contains("boom"));

    let c = record.result("c").unwrap();
    assert_eq!(c.status, NodeStatus::Skipped);
    assert!(c.started_at.is_none());
    let reason = c.error.as_ref().unwrap();
    assert_eq!(reason.kind, FailureKind::Upstream);
    assert!(reason.message.contains("upstream node b failed"));
}

#[tokio::test]
async fn test_timeout_marks_node_and_skips_downstream() {
    let limits = ExecutionLimits::default().with_timeout(Duration::from_millis(50));
    let h = harness(EngineConfig::default().with_limits(limits));
    let mut wf = Workflow::new("slow");
    wf.add_node(sleep("slow", 10_000));
    wf.add_node(echo("after", 1));
    wf.add_node(echo("independent", 2));
    wf.connect("slow", "after");

    let started = Instant::now();
    let record = h.runtime.execute(&wf, CancellationToken::new()).await.unwrap();

    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(record.status, RunStatus::Failed);
    assert_eq!(record.status_of("slow"), Some(NodeStatus::TimedOut));
    assert_eq!(
        record.result("slow").unwrap().error.as_ref().unwrap().kind,
        FailureKind::Timeout
    );
    assert_eq!(record.status_of("after"), Some(NodeStatus::Skipped));
    assert_eq!(record.output("independent"), Some(&Value::from(2)));
}

#[tokio::test]
async fn test_fan_in_uses_edge_labels() {
    let h = harness(EngineConfig::default());
    let mut wf = Workflow::new("fan-in");
    wf.add_node(echo("x", 1));
    wf.add_node(echo("y", 2));
    wf.add_node(NodeInstance::new("z", "collect"));
    wf.connect_labeled("x", "z", "a");
    wf.connect_labeled("y", "z", "b");

    let record = h.runtime.execute(&wf, CancellationToken::new()).await.unwrap();

    assert_eq!(
        record.output("z"),
        Some(&Value::object([("a", 1), ("b", 2)]))
    );
}

#[tokio::test]
async fn test_single_input_is_also_default() {
    let h = harness(single_worker());
    let mut wf = Workflow::new("alias");
    wf.add_node(echo("src", 7));
    wf.add_node(NodeInstance::new("sink", "collect"));
    wf.connect_labeled("src", "sink", "value");

    let record = h.runtime.execute(&wf, CancellationToken::new()).await.unwrap();

    assert_eq!(
        record.output("sink"),
        Some(&Value::object([("default", 7), ("value", 7)]))
    );
}

#[tokio::test]
async fn test_reruns_are_idempotent() {
    let h = harness(EngineConfig::default());
    let wf = chain();

    let first = h.runtime.execute(&wf, CancellationToken::new()).await.unwrap();
    let second = h.runtime.execute(&wf, CancellationToken::new()).await.unwrap();

    assert_ne!(first.run_id, second.run_id);
    for id in ["a", "b", "c"] {
        assert_eq!(first.output(id), second.output(id));
    }
}

#[tokio::test]
async fn test_cycle_is_rejected_before_execution() {
    let h = harness(EngineConfig::default());
    let mut wf = Workflow::new("cycle");
    wf.add_node(NodeInstance::new("root", "collect"));
    wf.add_node(NodeInstance::new("a", "collect"));
    wf.add_node(NodeInstance::new("b", "collect"));
    wf.connect("root", "a");
    wf.connect("a", "b");
    wf.connect("b", "a");

    let err = h.runtime.execute(&wf, CancellationToken::new()).await.unwrap_err();

    match err {
        FlowError::Workflow(WorkflowError::Cycle { nodes }) => assert_eq!(nodes, vec!["a", "b"]),
        other => panic!("expected cycle error, got {:?}", other),
    }
    assert_eq!(h.invocations(), 0);
}

#[tokio::test]
async fn test_skipped_nodes_are_never_invoked() {
    let h = harness(EngineConfig::default());
    let mut wf = Workflow::new("spy");
    wf.add_node(NodeInstance::new("bad", "fail"));
    wf.add_node(NodeInstance::new("spy", "collect"));
    wf.add_node(NodeInstance::new("spy2", "collect"));
    wf.connect("bad", "spy");
    wf.connect("spy", "spy2");

    let record = h.runtime.execute(&wf, CancellationToken::new()).await.unwrap();

    assert_eq!(h.invocations(), 0);
    assert_eq!(record.count(NodeStatus::Skipped), 2);
    assert!(record
        .result("spy2")
        .unwrap()
        .error
        .as_ref()
        .unwrap()
        .message
        .contains("spy was skipped"));
}

#[tokio::test]
async fn test_cancellation_skips_unfinished_nodes() {
    let h = harness(EngineConfig::default());
    let mut wf = Workflow::new("cancel");
    wf.add_node(echo("quick", 1));
    wf.add_node(sleep("slow1", 10_000));
    wf.add_node(sleep("slow2", 10_000));
    wf.add_node(NodeInstance::new("after", "collect"));
    wf.connect("slow1", "after");

    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        trigger.cancel();
    });

    let started = Instant::now();
    let record = h.runtime.execute(&wf, token).await.unwrap();

    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(record.status, RunStatus::Cancelled);
    assert_eq!(record.status_of("quick"), Some(NodeStatus::Succeeded));
    for id in ["slow1", "slow2", "after"] {
        let result = record.result(id).unwrap();
        assert_eq!(result.status, NodeStatus::Skipped, "node {}", id);
        assert_eq!(result.error.as_ref().unwrap().kind, FailureKind::Cancelled);
    }
    assert_eq!(h.invocations(), 0);
}

#[tokio::test]
async fn test_run_deadline_cancels_remaining_work() {
    let config = EngineConfig::default().with_run_timeout(Duration::from_millis(100));
    let h = harness(config);
    let mut wf = Workflow::new("deadline");
    wf.add_node(sleep("slow", 10_000));

    let record = h.runtime.execute(&wf, CancellationToken::new()).await.unwrap();

    assert_eq!(record.status, RunStatus::Failed);
    let slow = record.result("slow").unwrap();
    assert_eq!(slow.status, NodeStatus::Skipped);
    assert_eq!(slow.error.as_ref().unwrap().kind, FailureKind::Cancelled);
}

#[tokio::test]
async fn test_placeholders() {
    let h = harness(EngineConfig::default());
    let mut wf = Workflow::new("placeholders");
    wf.add_node(echo("a", 1));
    wf.add_node(NodeInstance::placeholder("empty"));

    let record = h.runtime.execute(&wf, CancellationToken::new()).await.unwrap();
    assert_eq!(record.status, RunStatus::Succeeded);
    let empty = record.result("empty").unwrap();
    assert_eq!(empty.status, NodeStatus::Skipped);
    assert_eq!(empty.error.as_ref().unwrap().kind, FailureKind::Unconfigured);

    wf.add_node(NodeInstance::new("b", "double"));
    wf.connect("empty", "b");
    assert!(matches!(
        h.runtime.execute(&wf, CancellationToken::new()).await,
        Err(FlowError::Workflow(WorkflowError::UnconfiguredNode { node_id })) if node_id == "empty"
    ));
}

#[tokio::test]
async fn test_structural_errors() {
    let h = harness(EngineConfig::default());

    let mut dangling = Workflow::new("dangling");
    dangling.add_node(echo("a", 1));
    dangling.connect("a", "ghost");
    assert!(matches!(
        h.runtime.validate(&dangling),
        Err(FlowError::Workflow(WorkflowError::DanglingEdge { node_id, .. })) if node_id == "ghost"
    ));

    let mut unknown = Workflow::new("unknown");
    unknown.add_node(NodeInstance::new("a", "no-such-type"));
    assert!(matches!(
        h.runtime.execute(&unknown, CancellationToken::new()).await,
        Err(FlowError::Workflow(WorkflowError::NodeTypeNotFound(_)))
    ));

    h.store
        .save_node_type(NodeType::builtin("ghost-builtin", "not.registered"))
        .await
        .unwrap();
    let mut missing_builtin = Workflow::new("missing-builtin");
    missing_builtin.add_node(NodeInstance::new("a", "ghost-builtin"));
    assert!(matches!(
        h.runtime.execute(&missing_builtin, CancellationToken::new()).await,
        Err(FlowError::Workflow(WorkflowError::NodeTypeNotFound(_)))
    ));
}

#[tokio::test]
async fn test_run_workflow_by_id() {
    let h = harness(EngineConfig::default());
    let wf = chain();
    let id = wf.id;
    h.store.save_workflow(wf).await.unwrap();

    let record = h.runtime.run_workflow(id).await.unwrap();
    assert_eq!(record.workflow_id, id);
    assert_eq!(record.output("c"), Some(&Value::from(4)));

    let missing = Uuid::new_v4();
    assert!(matches!(
        h.runtime.run_workflow(missing).await,
        Err(FlowError::Workflow(WorkflowError::NotFound(id))) if id == missing
    ));
}

#[tokio::test]
async fn test_private_workflows_need_their_owner() {
    let h = harness(EngineConfig::default());
    let wf = chain().with_owner("alice");
    let id = wf.id;
    h.store.save_workflow(wf).await.unwrap();

    let denied = h
        .runtime
        .run_workflow_as(id, &Caller::new("bob"), CancellationToken::new())
        .await;
    assert!(matches!(
        denied,
        Err(FlowError::Workflow(WorkflowError::Forbidden(forbidden))) if forbidden == id
    ));

    let record = h
        .runtime
        .run_workflow_as(id, &Caller::new("alice"), CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(record.status, RunStatus::Succeeded);
}

#[tokio::test]
async fn test_single_worker_dispatch_order() {
    let h = harness(single_worker());
    let mut events = h.runtime.subscribe_events();
    let mut wf = Workflow::new("order");
    for id in ["r3", "r1", "r2"] {
        wf.add_node(NodeInstance::new(id, "collect"));
    }
    wf.add_node(NodeInstance::new("join", "collect"));
    wf.connect("r2", "join");
    wf.connect("r3", "join");

    h.runtime.execute(&wf, CancellationToken::new()).await.unwrap();

    let mut started = Vec::new();
    let mut last = None;
    while let Ok(event) = events.try_recv() {
        if let ExecutionEvent::NodeStarted { node_id, .. } = &event {
            started.push(node_id.clone());
        }
        last = Some(event);
    }
    assert_eq!(started, vec!["r3", "r1", "r2", "join"]);
    assert!(matches!(
        last,
        Some(ExecutionEvent::RunCompleted { status: RunStatus::Succeeded, .. })
    ));
}

#[tokio::test]
async fn test_records_are_persisted() {
    let dir = tempfile::tempdir().unwrap();
    let run_store = Arc::new(FileRunStore::new(dir.path()));
    let h = harness(EngineConfig::default());
    let runtime = h.runtime.with_run_store(run_store.clone());

    let record = runtime.execute(&chain(), CancellationToken::new()).await.unwrap();

    assert!(run_store.path_for(record.run_id).exists());
    let loaded = runtime.load_run(record.run_id).await.unwrap().unwrap();
    assert_eq!(loaded, record);
    assert!(run_store.load_run(Uuid::new_v4()).await.unwrap().is_none());
}

#[tokio::test]
async fn test_process_node_types_run_beside_builtins() {
    let h = harness(EngineConfig::default());
    h.store
        .save_node_type(NodeType::new("sh-add", CodeRuntime::Shell, "echo 41"))
        .await
        .unwrap();
    let mut wf = Workflow::new("mixed");
    wf.add_node(NodeInstance::new("sh", "sh-add"));
    wf.add_node(NodeInstance::new("d", "double"));
    wf.connect("sh", "d");

    let record = h.runtime.execute(&wf, CancellationToken::new()).await.unwrap();

    assert_eq!(record.output("sh"), Some(&Value::from(41)));
    assert_eq!(record.output("d"), Some(&Value::from(82)));
}

#[test]
fn test_invalid_worker_bound() {
    let config = EngineConfig::default().with_max_workers(0);
    assert!(matches!(config.validate(), Err(EngineError::WorkerPool(_))));
}
