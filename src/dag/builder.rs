use std::collections::HashMap;

use anyhow::{bail, Result};
use petgraph::graph::{DiGraph, NodeIndex};

use crate::program::{Node, Program};

/// The execution graph over program nodes. Weights index into the
/// program's node list; edges run dependency → dependent.
pub type NodeGraph = DiGraph<usize, ()>;

/// Build the execution DAG from the program's declared dependencies.
pub fn build_graph(program: &Program) -> Result<(NodeGraph, HashMap<String, NodeIndex>)> {
    let mut graph = DiGraph::new();
    let mut indices = Vec::with_capacity(program.nodes.len());
    let mut by_name: HashMap<String, NodeIndex> = HashMap::new();

    for (position, node) in program.nodes.iter().enumerate() {
        let index = graph.add_node(position);
        indices.push(index);
        // Output and settings nodes are not referents: nothing depends on
        // an output, and settings have no name.
        let addressable = !matches!(node, Node::Output(_) | Node::Settings(_));
        if addressable {
            if by_name.insert(node.name().to_string(), index).is_some() {
                bail!("Duplicate node name '{}' in program", node.name());
            }
        }
    }

    for (position, node) in program.nodes.iter().enumerate() {
        let to = indices[position];
        for dependency in node.depends_on() {
            let Some(&from) = by_name.get(dependency) else {
                bail!(
                    "Node '{}' depends on unknown node '{}'",
                    node.name(),
                    dependency
                );
            };
            if from != to {
                graph.add_edge(from, to, ());
            }
        }
    }

    if petgraph::algo::is_cyclic_directed(&graph) {
        bail!("Circular dependency detected in program graph");
    }

    Ok((graph, by_name))
}

/// Generate DOT representation of the execution graph.
pub fn to_dot(graph: &NodeGraph, program: &Program) -> String {
    let mut dot = String::from("digraph program {\n");
    dot.push_str("  rankdir=TB;\n");
    dot.push_str("  node [shape=box, style=filled];\n\n");

    for index in graph.node_indices() {
        let node = &program.nodes[graph[index]];
        let (label, color) = match node {
            Node::Config(c) => (format!("config.{}", c.name), "#d8d8a8"),
            Node::Local(l) => (format!("local.{}", l.name), "#d8c8a8"),
            Node::Resource(r) => (format!("{}\\n{}", r.name, r.token), "#a8d8a8"),
            Node::Output(o) => (format!("output.{}", o.name), "#a8c8d8"),
            Node::Settings(_) => ("settings".to_string(), "#d0d0d0"),
        };
        dot.push_str(&format!(
            "  n{} [label=\"{}\", fillcolor=\"{}\"];\n",
            index.index(),
            label,
            color
        ));
    }

    dot.push('\n');

    for edge in graph.edge_indices() {
        if let Some((from, to)) = graph.edge_endpoints(edge) {
            dot.push_str(&format!("  n{} -> n{};\n", from.index(), to.index()));
        }
    }

    dot.push_str("}\n");
    dot
}
