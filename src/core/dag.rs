//! Task DAG (Directed Acyclic Graph) for dependency ordering.
//!
//! The DAG is an explicit id -> task map whose dependency edges are
//! validated once at construction via topological sort. Readiness queries
//! never re-walk the graph for cycles; they only inspect task status.

use petgraph::algo::toposort;
use petgraph::graph::DiGraph;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

use crate::checks::VerificationConfig;
use crate::core::task::{Task, TaskStatus};
use crate::error::{Error, Result};

/// The task dependency graph.
///
/// Tasks are stored in a `BTreeMap` so every traversal is in ascending id
/// order, which makes scheduling deterministic: identical inputs always
/// produce identical execution order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskDAG {
    pub project_name: String,
    pub tasks: std::collections::BTreeMap<String, Task>,
    #[serde(default)]
    pub verification: VerificationConfig,
}

impl TaskDAG {
    /// Create an empty DAG for the named project.
    pub fn new(project_name: &str) -> Self {
        Self {
            project_name: project_name.to_string(),
            tasks: Default::default(),
            verification: VerificationConfig::default(),
        }
    }

    /// Insert a task. Replaces any existing task with the same id.
    pub fn add_task(&mut self, task: Task) {
        self.tasks.insert(task.id.clone(), task);
    }

    pub fn get(&self, id: &str) -> Option<&Task> {
        self.tasks.get(id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut Task> {
        self.tasks.get_mut(id)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Validate the graph: every dependency id must exist and the edges
    /// must form a DAG.
    ///
    /// Performed once before any task executes; failures name the
    /// offending ids. Uses a topological sort rather than per-query
    /// visited-set walks.
    pub fn validate(&self) -> Result<()> {
        // Dangling dependency ids first, so the error names them precisely.
        let mut dangling: BTreeSet<String> = BTreeSet::new();
        for task in self.tasks.values() {
            for dep in &task.depends_on {
                if !self.tasks.contains_key(dep) {
                    dangling.insert(format!("{} -> {}", task.id, dep));
                }
            }
        }
        if !dangling.is_empty() {
            return Err(Error::Validation(format!(
                "Unknown dependency ids: {}",
                dangling.into_iter().collect::<Vec<_>>().join(", ")
            )));
        }

        let mut graph: DiGraph<&str, ()> = DiGraph::new();
        let mut indices = HashMap::new();
        for id in self.tasks.keys() {
            indices.insert(id.as_str(), graph.add_node(id.as_str()));
        }
        for task in self.tasks.values() {
            for dep in &task.depends_on {
                graph.add_edge(indices[dep.as_str()], indices[task.id.as_str()], ());
            }
        }

        toposort(&graph, None).map_err(|cycle| {
            Error::Validation(format!(
                "Dependency cycle detected involving task {}",
                graph[cycle.node_id()]
            ))
        })?;
        Ok(())
    }

    /// All Pending tasks whose dependencies are every one Done, in
    /// ascending id order.
    pub fn ready_tasks(&self) -> Vec<&Task> {
        self.tasks
            .values()
            .filter(|task| {
                task.status == TaskStatus::Pending
                    && task.depends_on.iter().all(|dep| {
                        self.tasks
                            .get(dep)
                            .map(|d| d.status == TaskStatus::Done)
                            .unwrap_or(false)
                    })
            })
            .collect()
    }

    /// The first ready task id by ascending id, if any.
    pub fn next_ready_task(&self) -> Option<String> {
        self.ready_tasks().first().map(|t| t.id.clone())
    }

    /// True when every task is Done.
    pub fn all_done(&self) -> bool {
        !self.tasks.is_empty() && self.tasks.values().all(|t| t.status == TaskStatus::Done)
    }

    /// True if any task could still run (Pending or InProgress).
    pub fn has_remaining_work(&self) -> bool {
        self.tasks
            .values()
            .any(|t| matches!(t.status, TaskStatus::Pending | TaskStatus::InProgress))
    }

    /// True if any transitive dependency of `id` is Failed.
    ///
    /// Blocked tasks are never scheduled and the run cannot reach full
    /// success while one exists.
    pub fn is_blocked(&self, id: &str) -> bool {
        let Some(task) = self.tasks.get(id) else {
            return false;
        };
        let mut stack: Vec<&str> = task.depends_on.iter().map(String::as_str).collect();
        let mut seen: BTreeSet<&str> = BTreeSet::new();
        while let Some(dep_id) = stack.pop() {
            if !seen.insert(dep_id) {
                continue;
            }
            if let Some(dep) = self.tasks.get(dep_id) {
                if dep.status == TaskStatus::Failed {
                    return true;
                }
                stack.extend(dep.depends_on.iter().map(String::as_str));
            }
        }
        false
    }

    /// Pending tasks permanently blocked by a failed ancestor, ascending id.
    pub fn blocked_tasks(&self) -> Vec<&Task> {
        self.tasks
            .values()
            .filter(|t| t.status == TaskStatus::Pending && self.is_blocked(&t.id))
            .collect()
    }

    /// Ids of tasks in a given status, ascending.
    pub fn ids_with_status(&self, status: TaskStatus) -> Vec<&str> {
        self.tasks
            .values()
            .filter(|t| t.status == status)
            .map(|t| t.id.as_str())
            .collect()
    }

    /// Verification commands in effect for a task: the task's override
    /// merged over the DAG-level config.
    pub fn effective_verification(&self, id: &str) -> VerificationConfig {
        match self.tasks.get(id).and_then(|t| t.verification_override.as_ref()) {
            Some(overrides) => self.verification.merged_with(overrides),
            None => self.verification.clone(),
        }
    }
}
