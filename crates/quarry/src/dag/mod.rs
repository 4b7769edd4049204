//! Dependency graph over catalog entry names.
//!
//! The graph stores edges only; entry payloads live in the catalog store.
//! Edges point from **dependency to dependent** (`parent -> child` means the
//! child depends on the parent), so a source's children are the models built
//! on it.
//!
//! Node identity is the normalized name (see [`normalize_name`]): two
//! spellings that differ only in case are the same node. Each node keeps the
//! spelling it was first inserted with, and that spelling is what
//! [`DependencyGraph::parents`] and [`DependencyGraph::children`] report.
//!
//! # Ordering
//!
//! Every sequence returned by this module is sorted by normalized name (BFS
//! levels for [`DependencyGraph::descendants`], Kahn's algorithm with a
//! name-ordered ready set for [`DependencyGraph::topological_order`]), so
//! results are stable across runs.

use crate::error::{Error, Result};
use petgraph::Direction;
use petgraph::algo;
use petgraph::stable_graph::{NodeIndex, StableDiGraph};
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet, VecDeque};

/// Canonicalize an entry name for graph identity.
///
/// Names are case-insensitive; every graph lookup goes through this.
#[must_use]
pub fn normalize_name(name: &str) -> String {
    name.to_lowercase()
}

/// Directed acyclic graph of entry dependencies.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    /// Node weights are display names; edges carry no data.
    graph: StableDiGraph<String, ()>,

    /// Normalized name -> node. Every node in `graph` has exactly one entry.
    node_map: HashMap<String, NodeIndex>,
}

impl DependencyGraph {
    /// Create an empty graph.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a node without edges. No-op if the node exists.
    pub fn add_node(&mut self, name: &str) {
        self.ensure_node(name);
    }

    /// Record that `child` depends on `parent`.
    ///
    /// Re-adding an existing edge is a no-op.
    ///
    /// # Errors
    ///
    /// Returns `Error::Cycle` if `parent` and `child` are the same node or a
    /// path from `child` to `parent` already exists. The graph is left
    /// unchanged.
    pub fn add_edge(&mut self, parent: &str, child: &str) -> Result<()> {
        let parent_key = normalize_name(parent);
        let child_key = normalize_name(child);

        if parent_key == child_key {
            return Err(cycle(parent, child));
        }

        let existing = (
            self.node_map.get(&parent_key),
            self.node_map.get(&child_key),
        );
        if let (Some(&p), Some(&c)) = existing {
            if self.graph.contains_edge(p, c) {
                return Ok(());
            }
            // A path child ->* parent means parent -> child would close a loop
            if algo::has_path_connecting(&self.graph, c, p, None) {
                return Err(cycle(parent, child));
            }
        }

        let p = self.ensure_node(parent);
        let c = self.ensure_node(child);
        self.graph.add_edge(p, c, ());
        Ok(())
    }

    /// Remove a node and every edge touching it. Unknown names are ignored.
    pub fn remove_node(&mut self, name: &str) {
        if let Some(node) = self.node_map.remove(&normalize_name(name)) {
            self.graph.remove_node(node);
        }
    }

    /// Immediate dependencies of `name`. Empty for unknown names.
    #[must_use]
    pub fn parents(&self, name: &str) -> Vec<String> {
        self.neighbors(name, Direction::Incoming)
    }

    /// Immediate dependents of `name`. Empty for unknown names.
    #[must_use]
    pub fn children(&self, name: &str) -> Vec<String> {
        self.neighbors(name, Direction::Outgoing)
    }

    /// Every transitive dependent of `name`, nearest first.
    #[must_use]
    pub fn descendants(&self, name: &str) -> Vec<String> {
        let Some(&start) = self.node_map.get(&normalize_name(name)) else {
            return Vec::new();
        };

        let mut result = Vec::new();
        let mut visited = HashSet::from([start]);
        let mut queue = VecDeque::from([start]);

        while let Some(node) = queue.pop_front() {
            let mut next: Vec<NodeIndex> = self
                .graph
                .neighbors_directed(node, Direction::Outgoing)
                .filter(|n| visited.insert(*n))
                .collect();
            next.sort_by_key(|n| normalize_name(&self.graph[*n]));

            for n in next {
                result.push(self.graph[n].clone());
                queue.push_back(n);
            }
        }

        result
    }

    /// All nodes, parents before children, ties broken by name.
    #[must_use]
    pub fn topological_order(&self) -> Vec<String> {
        let mut in_degree: HashMap<NodeIndex, usize> = self
            .graph
            .node_indices()
            .map(|n| {
                let degree = self
                    .graph
                    .neighbors_directed(n, Direction::Incoming)
                    .count();
                (n, degree)
            })
            .collect();

        let mut ready: BinaryHeap<Reverse<(String, NodeIndex)>> = in_degree
            .iter()
            .filter(|&(_, &degree)| degree == 0)
            .map(|(&n, _)| Reverse((normalize_name(&self.graph[n]), n)))
            .collect();

        let mut order = Vec::with_capacity(self.graph.node_count());
        while let Some(Reverse((_, node))) = ready.pop() {
            order.push(self.graph[node].clone());
            for child in self.graph.neighbors_directed(node, Direction::Outgoing) {
                if let Some(degree) = in_degree.get_mut(&child) {
                    *degree -= 1;
                    if *degree == 0 {
                        ready.push(Reverse((normalize_name(&self.graph[child]), child)));
                    }
                }
            }
        }

        order
    }

    /// Whether a node with this (normalized) name exists.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.node_map.contains_key(&normalize_name(name))
    }

    /// Number of nodes.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    /// Number of edges.
    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Display names of all nodes, sorted.
    #[must_use]
    pub fn nodes(&self) -> Vec<String> {
        let mut nodes: Vec<String> = self.graph.node_weights().cloned().collect();
        nodes.sort_by_key(|n| normalize_name(n));
        nodes
    }

    /// All `(parent, child)` pairs, sorted.
    #[must_use]
    pub fn edges(&self) -> Vec<(String, String)> {
        let mut edges: Vec<(String, String)> = self
            .graph
            .edge_indices()
            .filter_map(|e| self.graph.edge_endpoints(e))
            .map(|(p, c)| (self.graph[p].clone(), self.graph[c].clone()))
            .collect();
        edges.sort_by_key(|(p, c)| (normalize_name(p), normalize_name(c)));
        edges
    }

    fn ensure_node(&mut self, name: &str) -> NodeIndex {
        let key = normalize_name(name);
        if let Some(&node) = self.node_map.get(&key) {
            return node;
        }
        let node = self.graph.add_node(name.to_string());
        self.node_map.insert(key, node);
        node
    }

    fn neighbors(&self, name: &str, direction: Direction) -> Vec<String> {
        let Some(&node) = self.node_map.get(&normalize_name(name)) else {
            return Vec::new();
        };
        let mut names: Vec<String> = self
            .graph
            .neighbors_directed(node, direction)
            .map(|n| self.graph[n].clone())
            .collect();
        names.sort_by_key(|n| normalize_name(n));
        names
    }
}

fn cycle(parent: &str, child: &str) -> Error {
    Error::Cycle {
        parent: parent.to_string(),
        child: child.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chain() -> DependencyGraph {
        // raw -> orders -> revenue
        let mut dag = DependencyGraph::new();
        dag.add_edge("raw", "orders").unwrap();
        dag.add_edge("orders", "revenue").unwrap();
        dag
    }

    #[test]
    fn test_add_edge_is_symmetric() {
        let dag = chain();
        assert_eq!(dag.children("raw"), vec!["orders"]);
        assert_eq!(dag.parents("orders"), vec!["raw"]);
        assert_eq!(dag.children("orders"), vec!["revenue"]);
    }

    #[test]
    fn test_names_are_case_insensitive() {
        let mut dag = DependencyGraph::new();
        dag.add_edge("Foo", "bar").unwrap();

        assert_eq!(dag.children("FOO"), vec!["bar"]);
        assert_eq!(dag.parents("BAR"), vec!["Foo"]);
        assert_eq!(dag.node_count(), 2);
    }

    #[test]
    fn test_add_edge_is_idempotent() {
        let mut dag = chain();
        dag.add_edge("RAW", "Orders").unwrap();
        assert_eq!(dag.edge_count(), 2);
    }

    #[test]
    fn test_self_edge_rejected() {
        let mut dag = DependencyGraph::new();
        let err = dag.add_edge("a", "A").unwrap_err();
        assert!(matches!(err, Error::Cycle { .. }));
        assert_eq!(dag.node_count(), 0);
    }

    #[test]
    fn test_cycle_rejected_and_graph_unchanged() {
        let mut dag = chain();
        let before = dag.edges();

        for _ in 0..2 {
            match dag.add_edge("revenue", "raw") {
                Err(Error::Cycle { parent, child }) => {
                    assert_eq!(parent, "revenue");
                    assert_eq!(child, "raw");
                }
                other => panic!("expected cycle error, got {other:?}"),
            }
            assert_eq!(dag.edges(), before);
        }
    }

    #[test]
    fn test_unknown_node_has_no_neighbors() {
        let dag = chain();
        assert!(dag.parents("missing").is_empty());
        assert!(dag.children("missing").is_empty());
        assert!(dag.descendants("missing").is_empty());
    }

    #[test]
    fn test_remove_node_drops_edges() {
        let mut dag = chain();
        dag.remove_node("ORDERS");

        assert!(!dag.contains("orders"));
        assert!(dag.children("raw").is_empty());
        assert!(dag.parents("revenue").is_empty());
        assert_eq!(dag.edge_count(), 0);

        // Removing again is fine
        dag.remove_node("orders");
    }

    #[test]
    fn test_neighbors_sorted() {
        let mut dag = DependencyGraph::new();
        dag.add_edge("src", "zeta").unwrap();
        dag.add_edge("src", "Alpha").unwrap();
        dag.add_edge("src", "mid").unwrap();
        assert_eq!(dag.children("src"), vec!["Alpha", "mid", "zeta"]);
    }

    #[test]
    fn test_descendants_nearest_first() {
        let mut dag = chain();
        dag.add_edge("raw", "audit").unwrap();
        assert_eq!(dag.descendants("raw"), vec!["audit", "orders", "revenue"]);
        assert_eq!(dag.descendants("revenue"), Vec::<String>::new());
    }

    #[test]
    fn test_topological_order_parents_first() {
        let mut dag = DependencyGraph::new();
        dag.add_edge("b_src", "model").unwrap();
        dag.add_edge("a_src", "model").unwrap();
        dag.add_edge("model", "view").unwrap();
        dag.add_node("lonely");

        assert_eq!(
            dag.topological_order(),
            vec!["a_src", "b_src", "lonely", "model", "view"]
        );
    }
}
