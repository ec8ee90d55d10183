use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::bail;
use nimbus::dag::walker::NodeExecutor;
use nimbus::dag::{build_graph, to_dot, DagWalker};
use nimbus::interp::RunContext;
use nimbus::program::{
    ConfigVariable, Expression, LocalVariable, ModelType, Node, Program,
};
use nimbus::value::Value;

fn local(name: &str, depends_on: &[&str]) -> Node {
    Node::Local(LocalVariable {
        name: name.to_string(),
        value: Expression::Literal(Value::null()),
        depends_on: depends_on.iter().map(|s| s.to_string()).collect(),
    })
}

fn program(nodes: Vec<Node>) -> Program {
    Program { nodes }
}

/// Executor that records start/end events per node name.
fn recording_executor(
    program: &Program,
    events: Arc<Mutex<Vec<String>>>,
) -> NodeExecutor {
    let names: Vec<String> = program.nodes.iter().map(|n| n.name().to_string()).collect();
    Box::new(move |position| {
        let name = names[position].clone();
        let events = Arc::clone(&events);
        Box::pin(async move {
            events.lock().unwrap().push(format!("start:{}", name));
            tokio::time::sleep(Duration::from_millis(5)).await;
            events.lock().unwrap().push(format!("end:{}", name));
            Ok(())
        })
    })
}

fn position_of(events: &[String], event: &str) -> usize {
    events.iter().position(|e| e == event).unwrap()
}

#[test]
fn build_rejects_unknown_dependencies() {
    let program = program(vec![local("a", &["missing"])]);
    let error = build_graph(&program).unwrap_err();
    assert!(error.to_string().contains("missing"));
}

#[test]
fn build_rejects_cycles() {
    let program = program(vec![local("a", &["b"]), local("b", &["a"])]);
    let error = build_graph(&program).unwrap_err();
    assert!(error.to_string().contains("Circular"));
}

#[test]
fn build_rejects_duplicate_names() {
    let program = program(vec![local("a", &[]), local("a", &[])]);
    let error = build_graph(&program).unwrap_err();
    assert!(error.to_string().contains("Duplicate"));
}

#[test]
fn dot_output_names_every_node() {
    let program = program(vec![local("a", &[]), local("b", &["a"])]);
    let (graph, _) = build_graph(&program).unwrap();
    let dot = to_dot(&graph, &program);
    assert!(dot.contains("digraph program"));
    assert!(dot.contains("local.a"));
    assert!(dot.contains("local.b"));
    assert!(dot.contains("->"));
}

#[tokio::test]
async fn dependencies_complete_before_dependents_start() {
    let program = program(vec![
        local("a", &[]),
        local("b", &["a"]),
        local("c", &["a", "b"]),
    ]);
    let (graph, _) = build_graph(&program).unwrap();
    let events = Arc::new(Mutex::new(Vec::new()));
    let executor = recording_executor(&program, Arc::clone(&events));

    DagWalker::new(4)
        .walk(&graph, &program, Arc::new(executor), RunContext::new())
        .await
        .unwrap();

    let events = events.lock().unwrap();
    assert!(position_of(&events, "end:a") < position_of(&events, "start:b"));
    assert!(position_of(&events, "end:b") < position_of(&events, "start:c"));
}

#[tokio::test]
async fn diamond_joins_wait_for_both_sides() {
    let program = program(vec![
        local("root", &[]),
        local("left", &["root"]),
        local("right", &["root"]),
        local("join", &["left", "right"]),
    ]);
    let (graph, _) = build_graph(&program).unwrap();
    let events = Arc::new(Mutex::new(Vec::new()));
    let executor = recording_executor(&program, Arc::clone(&events));

    DagWalker::new(4)
        .walk(&graph, &program, Arc::new(executor), RunContext::new())
        .await
        .unwrap();

    let events = events.lock().unwrap();
    let join_start = position_of(&events, "start:join");
    assert!(position_of(&events, "end:left") < join_start);
    assert!(position_of(&events, "end:right") < join_start);
}

#[tokio::test]
async fn independent_nodes_run_concurrently() {
    let program = program(vec![local("a", &[]), local("b", &[])]);
    let (graph, _) = build_graph(&program).unwrap();

    // Both nodes must be in flight at once for the barrier to release.
    let barrier = Arc::new(tokio::sync::Barrier::new(2));
    let executor: NodeExecutor = Box::new(move |_position| {
        let barrier = Arc::clone(&barrier);
        Box::pin(async move {
            barrier.wait().await;
            Ok(())
        })
    });

    tokio::time::timeout(
        Duration::from_secs(5),
        DagWalker::new(4).walk(&graph, &program, Arc::new(executor), RunContext::new()),
    )
    .await
    .expect("siblings did not run in parallel")
    .unwrap();
}

#[tokio::test]
async fn failure_skips_dependents_and_surfaces_the_error() {
    let program = program(vec![
        local("bad", &[]),
        local("child", &["bad"]),
        local("grandchild", &["child"]),
    ]);
    let (graph, _) = build_graph(&program).unwrap();
    let started = Arc::new(Mutex::new(Vec::<String>::new()));

    let names: Vec<String> = program.nodes.iter().map(|n| n.name().to_string()).collect();
    let started_clone = Arc::clone(&started);
    let executor: NodeExecutor = Box::new(move |position| {
        let name = names[position].clone();
        let started = Arc::clone(&started_clone);
        Box::pin(async move {
            started.lock().unwrap().push(name.clone());
            if name == "bad" {
                bail!("boom in {}", name);
            }
            Ok(())
        })
    });

    let error = DagWalker::new(4)
        .walk(&graph, &program, Arc::new(executor), RunContext::new())
        .await
        .unwrap_err();
    assert!(error.to_string().contains("boom in bad"));

    let started = started.lock().unwrap();
    assert!(!started.contains(&"child".to_string()));
    assert!(!started.contains(&"grandchild".to_string()));
}

#[tokio::test]
async fn failure_cancels_the_run_context() {
    let program = program(vec![local("bad", &[])]);
    let (graph, _) = build_graph(&program).unwrap();
    let ctx = RunContext::new();

    let executor: NodeExecutor = Box::new(move |_position| {
        Box::pin(async move { bail!("nope") })
    });

    let _ = DagWalker::new(1)
        .walk(&graph, &program, Arc::new(executor), Arc::clone(&ctx))
        .await;
    assert!(ctx.is_cancelled());
}

#[tokio::test]
async fn external_cancellation_aborts_in_flight_nodes() {
    let program = program(vec![local("slow", &[]), local("after", &["slow"])]);
    let (graph, _) = build_graph(&program).unwrap();
    let ctx = RunContext::new();

    // Nodes observe cancellation the way RPC wrappers do: by racing it.
    let node_ctx = Arc::clone(&ctx);
    let executor: NodeExecutor = Box::new(move |_position| {
        let ctx = Arc::clone(&node_ctx);
        Box::pin(async move {
            tokio::select! {
                _ = ctx.cancelled() => bail!("Run cancelled"),
                _ = tokio::time::sleep(Duration::from_secs(30)) => Ok(()),
            }
        })
    });

    let cancel_ctx = Arc::clone(&ctx);
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel_ctx.cancel();
    });

    let error = tokio::time::timeout(
        Duration::from_secs(5),
        DagWalker::new(2).walk(&graph, &program, Arc::new(executor), ctx),
    )
    .await
    .expect("walk did not observe cancellation")
    .unwrap_err();
    assert!(error.to_string().contains("cancelled"));
}

#[tokio::test]
async fn noop_node_kinds_walk_cleanly() {
    let program = program(vec![
        Node::Config(ConfigVariable {
            name: "k".to_string(),
            logical_name: None,
            model_type: ModelType::String,
            default: None,
            nullable: true,
            depends_on: vec![],
            range: None,
        }),
        Node::Settings(Default::default()),
        local("uses_config", &["k"]),
    ]);
    let (graph, _) = build_graph(&program).unwrap();
    let executor: NodeExecutor =
        Box::new(move |_position| Box::pin(async move { Ok(()) }));

    DagWalker::new(2)
        .walk(&graph, &program, Arc::new(executor), RunContext::new())
        .await
        .unwrap();
}
