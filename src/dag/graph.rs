// src/dag/graph.rs

use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;

use crate::errors::{BootdagError, Result};
use crate::task::TaskRef;
use crate::types::{Phase, TaskName};

/// Adjacency information of one task: immediate deps and dependents.
///
/// Forward phases (Init, Setup, Start) wait on `following`; Stop inverts the
/// two roles so that consumers stop before the tasks they depend on.
#[derive(Debug, Clone, Default)]
pub struct Edges {
    /// Direct dependencies: tasks that must reach a phase before this one.
    following: Vec<TaskName>,
    /// Direct dependents: tasks that list this one as a dependency.
    followers: Vec<TaskName>,
}

impl Edges {
    pub fn following(&self) -> &[TaskName] {
        &self.following
    }

    pub fn followers(&self) -> &[TaskName] {
        &self.followers
    }

    pub fn dependencies_for(&self, phase: Phase) -> &[TaskName] {
        if phase.is_teardown() {
            &self.followers
        } else {
            &self.following
        }
    }

    pub fn followers_for(&self, phase: Phase) -> &[TaskName] {
        if phase.is_teardown() {
            &self.following
        } else {
            &self.followers
        }
    }

    /// Returns `false` if the edge already existed.
    pub fn add_following(&mut self, name: &str) -> bool {
        push_unique(&mut self.following, name)
    }

    /// Returns `false` if the edge already existed.
    pub fn add_follower(&mut self, name: &str) -> bool {
        push_unique(&mut self.followers, name)
    }
}

fn push_unique(list: &mut Vec<TaskName>, name: &str) -> bool {
    if list.iter().any(|n| n == name) {
        return false;
    }
    list.push(name.to_string());
    true
}

/// Build a petgraph view of the task set.
///
/// Edge direction: dependency -> dependent. Edges pointing outside the task
/// set are ignored.
fn forward_graph(tasks: &[TaskRef]) -> DiGraphMap<&str, ()> {
    let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();

    for task in tasks {
        graph.add_node(task.name());
    }

    for task in tasks {
        for dep in task.dependencies_for(Phase::Setup) {
            if let Some(dep) = tasks.iter().find(|t| t.name() == dep) {
                graph.add_edge(dep.name(), task.name(), ());
            }
        }
    }

    graph
}

/// Fail with [`BootdagError::DagCycle`] if the forward edges contain a cycle.
///
/// The scheduler itself never detects cycles (a cyclic graph simply never
/// becomes eligible), so the bootstrap checks once after Init.
pub fn check_acyclic(tasks: &[TaskRef]) -> Result<()> {
    phase_order(tasks, Phase::Setup).map(|_| ())
}

/// One valid execution order of `tasks` for `phase`.
///
/// Used for dry-run output and diagnostics; the scheduler never follows it
/// directly.
pub fn phase_order(tasks: &[TaskRef], phase: Phase) -> Result<Vec<TaskName>> {
    let graph = forward_graph(tasks);

    // A topological sort will fail if there is a cycle.
    match toposort(&graph, None) {
        Ok(order) => {
            let mut order: Vec<TaskName> = order.into_iter().map(str::to_string).collect();
            if phase.is_teardown() {
                order.reverse();
            }
            Ok(order)
        }
        Err(cycle) => {
            let node = cycle.node_id();
            Err(BootdagError::DagCycle(format!(
                "cycle detected in dependency graph involving task '{}'",
                node
            )))
        }
    }
}
