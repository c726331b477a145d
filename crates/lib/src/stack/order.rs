//! Dependency ordering of stacks.
//!
//! Stacks form a DAG through `depends_on`. Synthesis lists dependencies before
//! their dependents; among stacks that are ready at the same time, registration
//! order wins so the output is deterministic.

use std::collections::HashMap;

use petgraph::Direction;
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};

use crate::error::ConfigError;
use crate::stack::Stack;

/// Sort stacks so every stack comes after the stacks it depends on.
///
/// Dependencies naming stacks outside `stacks` are ignored.
pub fn sort(stacks: &[Stack]) -> Result<Vec<Stack>, ConfigError> {
  let mut graph: DiGraph<usize, ()> = DiGraph::new();
  let mut nodes: HashMap<&str, NodeIndex> = HashMap::new();

  for (position, stack) in stacks.iter().enumerate() {
    nodes.insert(stack.name(), graph.add_node(position));
  }

  for stack in stacks {
    let dependent = nodes[stack.name()];
    for dependency in stack.dependencies() {
      if let Some(&dep_idx) = nodes.get(dependency.as_str()) {
        // Edge from dependency to dependent
        graph.add_edge(dep_idx, dependent, ());
      }
    }
  }

  if let Err(cycle) = toposort(&graph, None) {
    let stack = &stacks[graph[cycle.node_id()]];
    return Err(ConfigError::StackCycle(stack.name().to_string()));
  }

  // Kahn's algorithm, always picking the earliest registered ready stack.
  let mut in_degree: HashMap<NodeIndex, usize> = graph
    .node_indices()
    .map(|idx| (idx, graph.neighbors_directed(idx, Direction::Incoming).count()))
    .collect();
  let mut ready: Vec<NodeIndex> = graph.node_indices().filter(|idx| in_degree[idx] == 0).collect();
  let mut sorted = Vec::with_capacity(stacks.len());

  while !ready.is_empty() {
    ready.sort_by_key(|idx| graph[*idx]);
    let next = ready.remove(0);
    sorted.push(stacks[graph[next]].clone());

    for dependent in graph.neighbors_directed(next, Direction::Outgoing) {
      if let Some(degree) = in_degree.get_mut(&dependent) {
        *degree -= 1;
        if *degree == 0 {
          ready.push(dependent);
        }
      }
    }
  }

  Ok(sorted)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::app::AppConfig;
  use crate::events::EventBus;
  use crate::stack::StackProps;
  use crate::tasks::TaskQueue;
  use std::sync::Arc;

  fn stacks(ids: &[&str]) -> Vec<Stack> {
    let config = Arc::new(AppConfig::new("shop"));
    ids
      .iter()
      .map(|id| Stack::new(id, StackProps::default(), config.clone(), EventBus::default(), TaskQueue::new()))
      .collect()
  }

  fn names(stacks: &[Stack]) -> Vec<&str> {
    stacks.iter().map(|s| s.id()).collect()
  }

  #[test]
  fn independent_stacks_keep_registration_order() {
    let s = stacks(&["a", "b", "c"]);
    assert_eq!(names(&sort(&s).unwrap()), vec!["a", "b", "c"]);
  }

  #[test]
  fn dependencies_come_first() {
    let s = stacks(&["web", "api", "data"]);
    s[0].add_dependency(&s[1]);
    s[1].add_dependency(&s[2]);
    assert_eq!(names(&sort(&s).unwrap()), vec!["data", "api", "web"]);
  }

  #[test]
  fn diamond_dependency() {
    let s = stacks(&["top", "left", "right", "base"]);
    s[0].add_dependency(&s[1]);
    s[0].add_dependency(&s[2]);
    s[1].add_dependency(&s[3]);
    s[2].add_dependency(&s[3]);
    assert_eq!(names(&sort(&s).unwrap()), vec!["base", "left", "right", "top"]);
  }

  #[test]
  fn cycles_are_rejected() {
    let s = stacks(&["a", "b"]);
    s[0].add_dependency(&s[1]);
    s[1].add_dependency(&s[0]);
    assert!(matches!(sort(&s), Err(ConfigError::StackCycle(_))));
  }
}
