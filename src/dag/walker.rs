use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use anyhow::{anyhow, Result};
use colored::Colorize;
use dashmap::DashMap;
use petgraph::graph::NodeIndex;
use tokio::sync::{mpsc, Semaphore};
use tracing::debug;

use super::builder::NodeGraph;
use crate::interp::RunContext;
use crate::program::{Node, Program};

/// Status of a node during execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeStatus {
    Pending,
    Running,
    Succeeded,
    Failed(String),
    Skipped(String),
}

/// Callback executing one program node, identified by its position in the
/// program's node list. Bindings happen inside by side effect.
pub type NodeExecutor =
    Box<dyn Fn(usize) -> futures::future::BoxFuture<'static, Result<()>> + Send + Sync>;

/// Message sent back from worker tasks to the walker.
struct NodeCompleted {
    index: NodeIndex,
    error: Option<String>,
}

/// Event-driven DAG walker: nodes start as soon as every predecessor has
/// succeeded, bounded by the run's parallelism. The first failure cancels
/// the run context; in-flight nodes observe it through their RPCs and
/// nothing new is scheduled.
pub struct DagWalker {
    max_parallelism: usize,
}

impl DagWalker {
    pub fn new(max_parallelism: usize) -> Self {
        Self {
            max_parallelism: max_parallelism.max(1),
        }
    }

    pub async fn walk(
        &self,
        graph: &NodeGraph,
        program: &Program,
        executor: Arc<NodeExecutor>,
        ctx: Arc<RunContext>,
    ) -> Result<()> {
        let node_count = graph.node_count();
        if node_count == 0 {
            return Ok(());
        }

        let semaphore = Arc::new(Semaphore::new(self.max_parallelism));
        let statuses: Arc<DashMap<NodeIndex, NodeStatus>> = Arc::new(DashMap::new());
        let (tx, mut rx) = mpsc::channel::<NodeCompleted>(node_count);

        // Precompute dependency info
        let mut in_degree: HashMap<NodeIndex, usize> = HashMap::new();
        let mut dependents: HashMap<NodeIndex, Vec<NodeIndex>> = HashMap::new();
        let mut dependencies: HashMap<NodeIndex, Vec<NodeIndex>> = HashMap::new();

        for index in graph.node_indices() {
            in_degree.insert(index, 0);
            dependents.insert(index, Vec::new());
            dependencies.insert(index, Vec::new());
            statuses.insert(index, NodeStatus::Pending);
        }

        for edge in graph.edge_indices() {
            if let Some((from, to)) = graph.edge_endpoints(edge) {
                *in_degree.entry(to).or_insert(0) += 1;
                dependents.entry(from).or_default().push(to);
                dependencies.entry(to).or_default().push(from);
            }
        }

        let ready: Vec<NodeIndex> = in_degree
            .iter()
            .filter(|(_, &degree)| degree == 0)
            .map(|(&index, _)| index)
            .collect();

        let mut completed = 0usize;
        let mut in_flight = 0usize;
        let mut first_error: Option<String> = None;

        for &index in &ready {
            spawn_node(index, graph, program, &executor, &semaphore, &statuses, &tx);
            in_flight += 1;
        }

        while completed < node_count {
            if in_flight == 0 {
                // Nothing running and nothing schedulable: either we are
                // winding down after a failure/cancellation, or the graph
                // is drained.
                break;
            }
            let Some(message) = rx.recv().await else {
                break;
            };
            in_flight -= 1;
            completed += 1;

            let index = message.index;
            let node = &program.nodes[graph[index]];

            match message.error {
                None => {
                    statuses.insert(index, NodeStatus::Succeeded);
                    if let Node::Resource(resource) = node {
                        println!(
                            "{}: {}",
                            resource.name,
                            "Registered".green().bold(),
                        );
                    }
                    debug!(node = node.name(), "Node completed");

                    if first_error.is_none() && !ctx.is_cancelled() {
                        if let Some(waiting) = dependents.get(&index) {
                            for &dependent in waiting {
                                let all_met = dependencies
                                    .get(&dependent)
                                    .map(|deps| {
                                        deps.iter().all(|dep| {
                                            statuses
                                                .get(dep)
                                                .map(|s| *s == NodeStatus::Succeeded)
                                                .unwrap_or(false)
                                        })
                                    })
                                    .unwrap_or(true);
                                if all_met {
                                    spawn_node(
                                        dependent, graph, program, &executor, &semaphore,
                                        &statuses, &tx,
                                    );
                                    in_flight += 1;
                                }
                            }
                        }
                    }
                }
                Some(error) => {
                    println!(
                        "{}: {} — {}",
                        display_name(node).bold(),
                        "FAILED".red().bold(),
                        error.red(),
                    );
                    statuses.insert(index, NodeStatus::Failed(error.clone()));

                    if first_error.is_none() {
                        first_error = Some(error);
                        // Let in-flight nodes observe the failure
                        ctx.cancel();
                    } else {
                        debug!(node = node.name(), error = %error, "Additional node failure");
                    }

                    // Cascade-skip everything downstream that has not started
                    let downstream = collect_transitive_dependents(index, &dependents);
                    for skip in downstream {
                        let pending = statuses
                            .get(&skip)
                            .map(|s| *s == NodeStatus::Pending)
                            .unwrap_or(false);
                        if pending {
                            let reason =
                                format!("Dependency '{}' failed", display_name(node));
                            debug!(
                                node = %display_name(&program.nodes[graph[skip]]),
                                "Node skipped"
                            );
                            statuses.insert(skip, NodeStatus::Skipped(reason));
                            completed += 1;
                        }
                    }
                }
            }
        }

        if let Some(error) = first_error {
            return Err(anyhow!(error));
        }
        if ctx.is_cancelled() {
            return Err(anyhow!("Run cancelled"));
        }
        Ok(())
    }
}

/// Spawn execution of a single node.
fn spawn_node(
    index: NodeIndex,
    graph: &NodeGraph,
    program: &Program,
    executor: &Arc<NodeExecutor>,
    semaphore: &Arc<Semaphore>,
    statuses: &Arc<DashMap<NodeIndex, NodeStatus>>,
    tx: &mpsc::Sender<NodeCompleted>,
) {
    let position = graph[index];
    let node = &program.nodes[position];
    let executor = Arc::clone(executor);
    let semaphore = Arc::clone(semaphore);
    let tx = tx.clone();

    statuses.insert(index, NodeStatus::Running);

    if let Node::Resource(resource) = node {
        println!("{}: {}...", resource.name, "Registering".cyan());
    }

    tokio::spawn(async move {
        let _permit = semaphore.acquire().await.unwrap();

        let result = executor(position).await;

        let _ = tx
            .send(NodeCompleted {
                index,
                error: result.err().map(|e| e.to_string()),
            })
            .await;
    });
}

fn display_name(node: &Node) -> String {
    match node {
        Node::Config(c) => format!("config.{}", c.name),
        Node::Local(l) => format!("local.{}", l.name),
        Node::Resource(r) => r.name.clone(),
        Node::Output(o) => format!("output.{}", o.name),
        Node::Settings(_) => "settings".to_string(),
    }
}

/// Collect all transitive dependents of a node (for cascade skip on
/// failure).
fn collect_transitive_dependents(
    start: NodeIndex,
    dependents: &HashMap<NodeIndex, Vec<NodeIndex>>,
) -> Vec<NodeIndex> {
    let mut visited = HashSet::new();
    let mut stack = vec![start];

    while let Some(node) = stack.pop() {
        if let Some(next) = dependents.get(&node) {
            for &dependent in next {
                if visited.insert(dependent) {
                    stack.push(dependent);
                }
            }
        }
    }

    visited.into_iter().collect()
}
