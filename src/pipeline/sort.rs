/// Petgraph-based dependency graph for operator ordering
///
/// Converts `from` references between operators into a directed graph and
/// linearizes it with Kahn's algorithm. Ties between ready operators are broken
/// strictly by registration order so runs are reproducible.

use crate::error::SizerError;
use crate::pipeline::types::OperatorConfig;
use anyhow::Result;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use std::collections::{HashMap, HashSet, VecDeque};

/// Directed graph where an edge runs from a dependency to its dependent
#[derive(Debug, Default)]
pub struct DependencyGraph {
    /// Node weights are operator names; indices follow registration order
    graph: DiGraph<String, ()>,
    /// Mapping from operator name to graph node index
    name_to_index: HashMap<String, NodeIndex>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    fn register(&mut self, name: &str) -> NodeIndex {
        if let Some(index) = self.name_to_index.get(name) {
            return *index;
        }
        let index = self.graph.add_node(name.to_string());
        self.name_to_index.insert(name.to_string(), index);
        index
    }

    /// Record that `dependent` consumes the output of `dependency`.
    /// The dependency is registered before the dependent.
    pub fn add_dependency(&mut self, dependent: &str, dependency: &str) {
        let from = self.register(dependency);
        let to = self.register(dependent);
        self.graph.add_edge(from, to, ());
    }

    /// Register an operator that may have no edges at all
    pub fn add_operator(&mut self, name: &str) {
        self.register(name);
    }

    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    /// Kahn's algorithm with a FIFO ready queue.
    ///
    /// Fails with a configuration error when not every node could be emitted,
    /// i.e. the graph contains a cycle.
    pub fn topological_order(&self) -> Result<Vec<String>> {
        let mut in_degree: Vec<usize> = self
            .graph
            .node_indices()
            .map(|index| {
                self.graph
                    .neighbors_directed(index, Direction::Incoming)
                    .count()
            })
            .collect();

        let mut ready: VecDeque<NodeIndex> = self
            .graph
            .node_indices()
            .filter(|index| in_degree[index.index()] == 0)
            .collect();

        let mut order = Vec::with_capacity(self.graph.node_count());
        while let Some(current) = ready.pop_front() {
            order.push(self.graph[current].clone());

            // petgraph walks edges newest first; replay them in insertion order
            let mut targets: Vec<NodeIndex> = self
                .graph
                .neighbors_directed(current, Direction::Outgoing)
                .collect();
            targets.reverse();

            for target in targets {
                let degree = &mut in_degree[target.index()];
                *degree -= 1;
                if *degree == 0 {
                    ready.push_back(target);
                }
            }
        }

        if order.len() != self.graph.node_count() {
            let stuck: Vec<&str> = self
                .graph
                .node_indices()
                .filter(|index| in_degree[index.index()] > 0)
                .map(|index| self.graph[index].as_str())
                .collect();
            return Err(SizerError::config(format!(
                "there exists a cycle in the pipeline graph involving: {}",
                stuck.join(", ")
            ))
            .into());
        }

        Ok(order)
    }
}

/// Order operators so every producer runs before its consumers.
pub fn sort_operators(operators: Vec<OperatorConfig>) -> Result<Vec<OperatorConfig>> {
    tracing::debug!(
        "🔄 Topologically ordering operators: {:?}",
        operators.iter().map(|op| op.name.as_str()).collect::<Vec<_>>()
    );

    if operators.len() <= 1 {
        return Ok(operators);
    }

    let mut seen = HashSet::new();
    for op in &operators {
        if !seen.insert(op.name.as_str()) {
            return Err(SizerError::config(format!("duplicate operator name `{}`", op.name)).into());
        }
    }

    let mut graph = DependencyGraph::new();
    for op in &operators {
        for dependency in op.dependencies() {
            if !seen.contains(dependency) {
                return Err(SizerError::config(format!(
                    "operator `{}` reads from unknown operator `{}`",
                    op.name, dependency
                ))
                .into());
            }
            graph.add_dependency(&op.name, dependency);
        }
    }
    for op in &operators {
        graph.add_operator(&op.name);
    }

    let sequence = graph.topological_order()?;

    let mut by_name: HashMap<String, OperatorConfig> = operators
        .into_iter()
        .map(|op| (op.name.clone(), op))
        .collect();
    let ordered: Vec<OperatorConfig> = sequence
        .iter()
        .filter_map(|name| by_name.remove(name))
        .collect();

    tracing::debug!("📋 Execution order: {:?}", sequence);
    Ok(ordered)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::classify;
    use crate::pipeline::types::InputBinding;
    use pretty_assertions::assert_eq;

    fn op(name: &str, froms: &[&str]) -> OperatorConfig {
        let mut op = OperatorConfig::new(name, "tag");
        if froms.is_empty() {
            op.inputs.push(InputBinding { from: None, name: None, path: "/input".into() });
        }
        for from in froms {
            op.inputs.push(InputBinding {
                from: Some(from.to_string()),
                name: None,
                path: "/input".into(),
            });
        }
        op
    }

    fn names(ops: &[OperatorConfig]) -> Vec<&str> {
        ops.iter().map(|op| op.name.as_str()).collect()
    }

    #[test]
    fn kahn_order_is_fifo_by_registration() {
        let mut graph = DependencyGraph::new();
        graph.add_dependency("2", "5");
        graph.add_dependency("0", "5");
        graph.add_dependency("0", "4");
        graph.add_dependency("1", "4");
        graph.add_dependency("3", "2");
        graph.add_dependency("1", "3");
        assert_eq!(graph.topological_order().unwrap(), vec!["5", "4", "2", "0", "3", "1"]);
    }

    #[test]
    fn chain_is_emitted_in_dependency_order() {
        let mut graph = DependencyGraph::new();
        graph.add_dependency("2", "1");
        graph.add_dependency("3", "2");
        graph.add_dependency("4", "3");
        assert_eq!(graph.topological_order().unwrap(), vec!["1", "2", "3", "4"]);
    }

    #[test]
    fn cycle_is_a_configuration_error() {
        let mut graph = DependencyGraph::new();
        graph.add_dependency("2", "1");
        graph.add_dependency("3", "2");
        graph.add_dependency("1", "3");
        let err = graph.topological_order().unwrap_err();
        assert!(matches!(classify(&err), Some(SizerError::Configuration(_))));
    }

    #[test]
    fn single_operator_is_returned_unchanged() {
        let only = op("Input1", &[]);
        assert_eq!(sort_operators(vec![only.clone()]).unwrap(), vec![only]);
    }

    #[test]
    fn linear_pipeline_from_shuffled_input() {
        let sorted = sort_operators(vec![
            op("Input2", &["Input1"]),
            op("Input3", &["Input2"]),
            op("Input1", &[]),
        ])
        .unwrap();
        assert_eq!(names(&sorted), vec!["Input1", "Input2", "Input3"]);
    }

    #[test]
    fn diamond_pipeline() {
        let sorted = sort_operators(vec![
            op("Input3", &["Input1", "Input2"]),
            op("Input4", &["Input2"]),
            op("Input1", &[]),
            op("Input2", &[]),
            op("Input5", &["Input3", "Input4"]),
        ])
        .unwrap();
        assert_eq!(names(&sorted), vec!["Input1", "Input2", "Input3", "Input4", "Input5"]);
    }

    #[test]
    fn sorting_is_idempotent() {
        let once = sort_operators(vec![
            op("c", &["b"]),
            op("a", &[]),
            op("b", &["a"]),
        ])
        .unwrap();
        let twice = sort_operators(once.clone()).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn operators_without_edges_still_run() {
        let sorted = sort_operators(vec![
            op("standalone", &[]),
            op("consumer", &["producer"]),
            op("producer", &[]),
        ])
        .unwrap();
        // isolated operators are registered after every edge-derived node
        assert_eq!(names(&sorted), vec!["producer", "standalone", "consumer"]);
    }

    #[test]
    fn unknown_producer_is_rejected() {
        let err = sort_operators(vec![op("a", &[]), op("b", &["ghost"])]).unwrap_err();
        assert!(err.to_string().contains("ghost"));
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let err = sort_operators(vec![op("a", &[]), op("a", &[])]).unwrap_err();
        assert!(matches!(classify(&err), Some(SizerError::Configuration(_))));
    }

    #[test]
    fn cyclic_pipeline_fails() {
        let err = sort_operators(vec![op("a", &["b"]), op("b", &["a"])]).unwrap_err();
        assert!(err.to_string().contains("cycle"));
    }
}
