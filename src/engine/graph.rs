//! Dependency graph over a task set.
//!
//! Edges are derived from two sources: task references held in fields and
//! explicit [`Task::dependencies`](crate::engine::Task::dependencies). The
//! graph is validated before any task is observed: unknown names,
//! self-references and cycles all abort the run.

use crate::engine::task::TaskSet;
use crate::error::GraphError;
use std::collections::{BTreeMap, BTreeSet, HashSet};

/// Validated, acyclic dependency graph.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    /// Task name to the names it depends on.
    dependencies: BTreeMap<String, BTreeSet<String>>,
    /// Task name to the names that depend on it.
    dependents: BTreeMap<String, BTreeSet<String>>,
}

impl DependencyGraph {
    /// Builds and validates the graph for a task set.
    ///
    /// # Errors
    ///
    /// Returns a [`GraphError`] on unknown dependencies, self-references or
    /// cycles. Cycles report the full path.
    pub fn build(tasks: &TaskSet) -> Result<Self, GraphError> {
        let mut dependencies: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        let mut dependents: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();

        for task in tasks.iter() {
            let name = task.name().to_string();
            let fields = task.fields();
            let mut deps: BTreeSet<String> = fields
                .references()
                .into_iter()
                .map(|r| r.name().to_string())
                .collect();
            deps.extend(task.dependencies());

            for dep in &deps {
                if *dep == name {
                    return Err(GraphError::SelfReference { task: name });
                }
                if !tasks.contains(dep) {
                    return Err(GraphError::UnknownDependency {
                        task: name,
                        dependency: dep.clone(),
                    });
                }
                dependents.entry(dep.clone()).or_default().insert(name.clone());
            }
            dependents.entry(name.clone()).or_default();
            dependencies.insert(name, deps);
        }

        let graph = Self {
            dependencies,
            dependents,
        };
        if let Some(cycle) = graph.find_cycle() {
            return Err(GraphError::DependencyCycle { cycle });
        }
        Ok(graph)
    }

    /// Number of tasks in the graph.
    #[must_use]
    pub fn len(&self) -> usize {
        self.dependencies.len()
    }

    /// Returns true if the graph has no tasks.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.dependencies.is_empty()
    }

    /// Direct dependencies of a task.
    pub fn dependencies_of(&self, name: &str) -> impl Iterator<Item = &str> {
        self.dependencies
            .get(name)
            .into_iter()
            .flatten()
            .map(String::as_str)
    }

    /// Tasks that directly depend on `name`.
    pub fn dependents_of(&self, name: &str) -> impl Iterator<Item = &str> {
        self.dependents
            .get(name)
            .into_iter()
            .flatten()
            .map(String::as_str)
    }

    /// Every task that depends on `name`, directly or transitively.
    #[must_use]
    pub fn transitive_dependents(&self, name: &str) -> BTreeSet<String> {
        let mut seen = BTreeSet::new();
        let mut stack: Vec<&str> = self.dependents_of(name).collect();
        while let Some(next) = stack.pop() {
            if seen.insert(next.to_string()) {
                stack.extend(self.dependents_of(next));
            }
        }
        seen
    }

    /// Number of direct dependencies per task.
    #[must_use]
    pub fn in_degrees(&self) -> BTreeMap<String, usize> {
        self.dependencies
            .iter()
            .map(|(name, deps)| (name.clone(), deps.len()))
            .collect()
    }

    fn find_cycle(&self) -> Option<Vec<String>> {
        let mut visited = HashSet::new();
        let mut on_stack = HashSet::new();
        let mut path = Vec::new();

        for name in self.dependencies.keys() {
            if !visited.contains(name.as_str()) {
                if let Some(cycle) = self.visit(name, &mut visited, &mut on_stack, &mut path) {
                    return Some(cycle);
                }
            }
        }
        None
    }

    fn visit<'a>(
        &'a self,
        node: &'a str,
        visited: &mut HashSet<&'a str>,
        on_stack: &mut HashSet<&'a str>,
        path: &mut Vec<&'a str>,
    ) -> Option<Vec<String>> {
        visited.insert(node);
        on_stack.insert(node);
        path.push(node);

        for next in self.dependencies_of(node) {
            if on_stack.contains(next) {
                let start = path.iter().position(|n| *n == next).unwrap_or(0);
                let mut cycle: Vec<String> = path[start..].iter().map(|n| (*n).to_string()).collect();
                cycle.push(next.to_string());
                return Some(cycle);
            }
            if !visited.contains(next) {
                if let Some(cycle) = self.visit(next, visited, on_stack, path) {
                    return Some(cycle);
                }
            }
        }

        on_stack.remove(node);
        path.pop();
        None
    }
}
