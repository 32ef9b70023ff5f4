//! The task graph.
//!
//! A [`Task`] is a named unit of build work with an ordered list of
//! prerequisites. Tasks are declared on a [`Blueprint`](crate::Blueprint),
//! validated into a [`TaskGraph`] and executed with [`TaskGraph::run`].
//!
//! ## Ordering
//!
//! Running a task first runs every transitive prerequisite, each one exactly
//! once and each one finishing before anything that depends on it starts.
//! Tasks are executed one at a time on the calling thread, external tools
//! and the network are awaited in place.
//!
//! ## Chaining
//!
//! An action may ask for another task through [`TaskContext::run`]. This is
//! how a composite task triggers a slow secondary step after its own
//! prerequisites finished, without declaring it as a prerequisite. Chained
//! runs share the bookkeeping of the enclosing run, so nothing executes
//! twice.

pub(crate) mod runner;

use std::borrow::Cow;
use std::sync::Arc;

use petgraph::Graph;
use petgraph::graph::NodeIndex;

use crate::core::Environment;

pub use crate::engine::runner::{Diagnostics, TaskExecution};
#[cfg(feature = "live")]
pub(crate) use crate::engine::runner::watch::watch;

/// Result from a single executed task.
pub type TaskResult = anyhow::Result<()>;

type Action<G> = Arc<dyn Fn(&TaskContext<'_, G>) -> TaskResult + Send + Sync>;

/// A registered task.
pub struct Task<G: Send + Sync> {
    pub(crate) name: Cow<'static, str>,
    pub(crate) about: Option<Cow<'static, str>>,
    pub(crate) prerequisites: Vec<Cow<'static, str>>,
    pub(crate) action: Action<G>,
}

impl<G: Send + Sync> Task<G> {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn about(&self) -> Option<&str> {
        self.about.as_deref()
    }

    pub fn prerequisites(&self) -> impl Iterator<Item = &str> {
        self.prerequisites.iter().map(AsRef::as_ref)
    }
}

impl<G: Send + Sync> Clone for Task<G> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            about: self.about.clone(),
            prerequisites: self.prerequisites.clone(),
            action: self.action.clone(),
        }
    }
}

impl<G: Send + Sync> std::fmt::Debug for Task<G> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task")
            .field("name", &self.name)
            .field("prerequisites", &self.prerequisites)
            .finish_non_exhaustive()
    }
}

/// A validated, acyclic task graph. Edges point from a prerequisite to the
/// task that needs it.
pub struct TaskGraph<G: Send + Sync = ()> {
    pub(crate) graph: Graph<Task<G>, ()>,
}

impl<G: Send + Sync> TaskGraph<G> {
    pub(crate) fn index(&self, name: &str) -> Option<NodeIndex> {
        self.graph
            .node_indices()
            .find(|&index| self.graph[index].name == name)
    }

    /// All tasks in registration order.
    pub fn tasks(&self) -> impl Iterator<Item = &Task<G>> {
        self.graph.node_indices().map(|index| &self.graph[index])
    }
}

/// The context passed to every task action.
pub struct TaskContext<'a, G: Send + Sync = ()> {
    /// Access to global configuration and data.
    pub env: &'a Environment<G>,
    /// Tracing span assigned to this task.
    pub span: tracing::Span,
    pub(crate) run: &'a runner::Run<'a, G>,
}

impl<G: Send + Sync> TaskContext<'_, G> {
    /// Runs another task as part of the current run.
    ///
    /// Tasks that already finished in this run are not repeated.
    pub fn run(&self, name: &str) -> TaskResult {
        self.run.request(name).map_err(runner::into_task_error)
    }

    /// The task graph this task is part of.
    pub fn graph(&self) -> &TaskGraph<G> {
        self.run.graph
    }
}
