//! DependencyGraph - sibling sub-workflow dependencies
//!
//! Built from one document's invocation list. Edges point from a dependency
//! to its dependents. Validation rejects unknown siblings and cycles; the
//! scheduler asks for Kahn layers.

use std::collections::VecDeque;

use rustc_hash::{FxHashMap, FxHashSet};

use crate::ast::SubWorkflowInvocation;
use crate::error::LumenError;

pub struct DependencyGraph {
    /// Node names in declaration order
    names: Vec<String>,
    /// name -> dependents
    adjacency: FxHashMap<String, Vec<String>>,
    /// name -> dependencies (only those present in the graph)
    predecessors: FxHashMap<String, Vec<String>>,
    /// (name, dependency) pairs naming a sibling that does not exist
    dangling: Vec<(String, String)>,
}

impl DependencyGraph {
    pub fn from_invocations<'a, I>(invocations: I) -> Self
    where
        I: IntoIterator<Item = &'a SubWorkflowInvocation>,
    {
        let invocations: Vec<&SubWorkflowInvocation> = invocations.into_iter().collect();
        let mut names = Vec::with_capacity(invocations.len());
        let mut adjacency: FxHashMap<String, Vec<String>> = FxHashMap::default();
        let mut predecessors: FxHashMap<String, Vec<String>> = FxHashMap::default();

        for inv in &invocations {
            if !adjacency.contains_key(&inv.name) {
                names.push(inv.name.clone());
                adjacency.insert(inv.name.clone(), Vec::new());
                predecessors.insert(inv.name.clone(), Vec::new());
            }
        }

        let mut dangling = Vec::new();
        for inv in &invocations {
            for dep in &inv.depends_on {
                if !adjacency.contains_key(dep) {
                    dangling.push((inv.name.clone(), dep.clone()));
                    continue;
                }
                adjacency.entry(dep.clone()).or_default().push(inv.name.clone());
                predecessors.entry(inv.name.clone()).or_default().push(dep.clone());
            }
        }

        Self {
            names,
            adjacency,
            predecessors,
            dangling,
        }
    }

    #[inline]
    pub fn dependencies(&self, name: &str) -> &[String] {
        self.predecessors.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Every depends_on entry naming an unknown sibling
    pub fn missing_dependencies(&self) -> Vec<LumenError> {
        self.dangling
            .iter()
            .map(|(name, dependency)| LumenError::MissingDependency {
                name: name.clone(),
                dependency: dependency.clone(),
            })
            .collect()
    }

    /// Check if `to` (transitively) depends on `from` (BFS)
    pub fn has_path(&self, from: &str, to: &str) -> bool {
        if from == to {
            return true;
        }

        let mut visited: FxHashSet<&str> = FxHashSet::default();
        let mut queue: VecDeque<&str> = VecDeque::new();
        queue.push_back(from);
        visited.insert(from);

        while let Some(current) = queue.pop_front() {
            for next in self.adjacency.get(current).into_iter().flatten() {
                if next == to {
                    return true;
                }
                if visited.insert(next.as_str()) {
                    queue.push_back(next);
                }
            }
        }

        false
    }

    /// Detect cycles using DFS three-color marking
    ///
    /// A cycle is found when the walk reaches a node still on the DFS stack
    /// (gray). The error carries the cycle path, e.g. `a → b → a`.
    pub fn detect_cycles(&self) -> Result<(), LumenError> {
        #[derive(Clone, Copy, PartialEq, Eq)]
        enum Color {
            White,
            Gray,
            Black,
        }

        fn dfs<'g>(
            node: &'g str,
            adjacency: &'g FxHashMap<String, Vec<String>>,
            colors: &mut FxHashMap<&'g str, Color>,
            stack: &mut Vec<&'g str>,
        ) -> Result<(), String> {
            colors.insert(node, Color::Gray);
            stack.push(node);

            for next in adjacency.get(node).into_iter().flatten() {
                match colors.get(next.as_str()).copied() {
                    Some(Color::Gray) => {
                        let start = stack.iter().position(|n| *n == next.as_str()).unwrap_or(0);
                        let cycle = stack[start..].join(" → ");
                        return Err(format!("{} → {}", cycle, next));
                    }
                    Some(Color::White) | None => dfs(next, adjacency, colors, stack)?,
                    Some(Color::Black) => {}
                }
            }

            stack.pop();
            colors.insert(node, Color::Black);
            Ok(())
        }

        let mut colors: FxHashMap<&str, Color> =
            self.names.iter().map(|n| (n.as_str(), Color::White)).collect();
        let mut stack = Vec::new();

        for name in &self.names {
            if colors.get(name.as_str()) == Some(&Color::White) {
                dfs(name, &self.adjacency, &mut colors, &mut stack)
                    .map_err(|cycle| LumenError::CycleDetected { cycle })?;
            }
        }

        Ok(())
    }

    /// Kahn layers: every node appears after all of its dependencies
    ///
    /// Must only be called on an acyclic graph; nodes left over by a cycle are
    /// returned as a final layer so callers never lose work.
    pub fn layers(&self) -> Vec<Vec<String>> {
        let mut indegree: FxHashMap<&str, usize> = self
            .names
            .iter()
            .map(|n| (n.as_str(), self.dependencies(n).len()))
            .collect();

        let mut layers = Vec::new();
        let mut ready: Vec<&str> = self
            .names
            .iter()
            .map(String::as_str)
            .filter(|n| indegree[n] == 0)
            .collect();
        let mut placed = 0;

        while !ready.is_empty() {
            placed += ready.len();
            let mut next = Vec::new();
            for name in &ready {
                for dependent in self.adjacency.get(*name).into_iter().flatten() {
                    if let Some(d) = indegree.get_mut(dependent.as_str()) {
                        *d -= 1;
                        if *d == 0 {
                            next.push(dependent.as_str());
                        }
                    }
                }
            }
            layers.push(ready.iter().map(|n| n.to_string()).collect());
            // Keep declaration order within a layer
            next.sort_by_key(|n| self.names.iter().position(|x| x.as_str() == *n));
            ready = next;
        }

        if placed < self.names.len() {
            let rest: Vec<String> = self
                .names
                .iter()
                .filter(|n| indegree[n.as_str()] > 0)
                .cloned()
                .collect();
            layers.push(rest);
        }

        layers
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inv(name: &str, deps: &[&str]) -> SubWorkflowInvocation {
        SubWorkflowInvocation {
            name: name.to_string(),
            path: format!("./{}.lumen.md", name),
            depends_on: deps.iter().map(|d| d.to_string()).collect(),
            ..Default::default()
        }
    }

    #[test]
    fn two_node_cycle_is_detected() {
        let invs = [inv("a", &["b"]), inv("b", &["a"])];
        let graph = DependencyGraph::from_invocations(&invs);
        let err = graph.detect_cycles().unwrap_err();
        assert!(err.to_string().contains("LUMEN-011"));
        assert!(err.to_string().contains("a → b → a"), "{err}");
    }

    #[test]
    fn self_dependency_is_a_cycle() {
        let invs = [inv("a", &["a"])];
        assert!(DependencyGraph::from_invocations(&invs).detect_cycles().is_err());
    }

    #[test]
    fn diamond_has_no_cycle_and_three_layers() {
        let invs = [
            inv("root", &[]),
            inv("left", &["root"]),
            inv("right", &["root"]),
            inv("join", &["left", "right"]),
        ];
        let graph = DependencyGraph::from_invocations(&invs);
        assert!(graph.detect_cycles().is_ok());
        assert!(graph.has_path("root", "join"));
        assert!(!graph.has_path("join", "root"));
        assert_eq!(
            graph.layers(),
            vec![
                vec!["root".to_string()],
                vec!["left".to_string(), "right".to_string()],
                vec!["join".to_string()],
            ]
        );
    }

    #[test]
    fn unknown_sibling_is_reported_not_linked() {
        let invs = [inv("a", &["ghost"])];
        let graph = DependencyGraph::from_invocations(&invs);
        let missing = graph.missing_dependencies();
        assert_eq!(missing.len(), 1);
        assert!(missing[0].to_string().contains("ghost"));
        assert_eq!(graph.layers(), vec![vec!["a".to_string()]]);
    }
}
