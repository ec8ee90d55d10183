pub mod builder;
pub mod walker;

pub use builder::{build_graph, to_dot, NodeGraph};
pub use walker::DagWalker;
