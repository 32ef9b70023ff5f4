use std::borrow::Cow;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use console::style;
use petgraph::Graph;

use crate::engine::{Task, TaskContext, TaskGraph, TaskResult};
use crate::error::BlueprintError;

/// The blueprint for a task graph.
///
/// `Blueprint` collects task declarations. Nothing runs until it is turned
/// into a [`TaskGraph`] with [`Blueprint::finish`], which rejects duplicate
/// names, unknown prerequisites and cycles.
///
/// # Example
///
/// ```rust,no_run
/// use tasuki::{Blueprint, Environment};
///
/// let mut blueprint: Blueprint = Blueprint::new();
/// blueprint.register("clean", &[], |_| Ok(()));
/// blueprint
///     .task("build")
///     .about("Bundle and minify")
///     .depends_on(["clean"])
///     .run(|_| Ok(()));
///
/// let graph = blueprint.finish().unwrap();
/// graph.run(&Environment::new(()), "build").unwrap();
/// ```
pub struct Blueprint<G: Send + Sync = ()> {
    tasks: Vec<Task<G>>,
}

impl<G: Send + Sync + 'static> Blueprint<G> {
    /// Creates a new, empty blueprint.
    pub fn new() -> Self {
        Self { tasks: Vec::new() }
    }

    /// Declares a task with its ordered prerequisites.
    pub fn register<F>(&mut self, name: &'static str, prerequisites: &[&'static str], action: F)
    where
        F: Fn(&TaskContext<'_, G>) -> TaskResult + Send + Sync + 'static,
    {
        self.task(name).depends_on(prerequisites.iter().copied()).run(action);
    }

    /// Starts declaring a task.
    pub fn task(&mut self, name: impl Into<Cow<'static, str>>) -> TaskDef<'_, G> {
        TaskDef {
            blueprint: self,
            name: name.into(),
            about: None,
            prerequisites: Vec::new(),
        }
    }

    /// Validates the declarations and builds the task graph.
    pub fn finish(self) -> Result<TaskGraph<G>, BlueprintError> {
        let mut graph = Graph::new();
        let mut indices = HashMap::new();

        for task in self.tasks {
            let name = task.name.clone();
            let index = graph.add_node(task);
            if indices.insert(name.clone(), index).is_some() {
                return Err(BlueprintError::Duplicate(name.into_owned()));
            }
        }

        for index in graph.node_indices() {
            let task: &Task<G> = &graph[index];
            let mut seen = HashSet::new();
            let mut edges = Vec::new();

            for prerequisite in &task.prerequisites {
                let Some(&dependency) = indices.get(prerequisite) else {
                    return Err(BlueprintError::UnknownPrerequisite {
                        task: task.name.to_string(),
                        prerequisite: prerequisite.to_string(),
                    });
                };
                if seen.insert(dependency) {
                    edges.push(dependency);
                }
            }

            for dependency in edges {
                graph.add_edge(dependency, index, ());
            }
        }

        if let Err(cycle) = petgraph::algo::toposort(&graph, None) {
            let name = graph[cycle.node_id()].name.to_string();
            return Err(BlueprintError::Cycle(name));
        }

        Ok(TaskGraph { graph })
    }
}

impl<G: Send + Sync + 'static> Default for Blueprint<G> {
    fn default() -> Self {
        Self::new()
    }
}

pub struct TaskDef<'a, G: Send + Sync> {
    blueprint: &'a mut Blueprint<G>,
    name: Cow<'static, str>,
    about: Option<Cow<'static, str>>,
    prerequisites: Vec<Cow<'static, str>>,
}

impl<'a, G: Send + Sync + 'static> TaskDef<'a, G> {
    /// One line shown next to the task by `help`.
    pub fn about(mut self, about: impl Into<Cow<'static, str>>) -> Self {
        self.about = Some(about.into());
        self
    }

    pub fn depends_on<I, S>(mut self, prerequisites: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<Cow<'static, str>>,
    {
        self.prerequisites
            .extend(prerequisites.into_iter().map(Into::into));
        self
    }

    pub fn run<F>(self, action: F)
    where
        F: Fn(&TaskContext<'_, G>) -> TaskResult + Send + Sync + 'static,
    {
        self.blueprint.tasks.push(Task {
            name: self.name,
            about: self.about,
            prerequisites: self.prerequisites,
            action: Arc::new(action),
        });
    }
}

/// Lists the tasks, the way `help` prints them.
impl<G: Send + Sync> std::fmt::Display for TaskGraph<G> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let width = self.tasks().map(|task| task.name().len()).max().unwrap_or(0);

        for task in self.tasks() {
            let name = format!("{:<width$}", task.name());
            write!(f, "  {}", style(name).cyan())?;

            if let Some(about) = task.about() {
                write!(f, "  {about}")?;
            }

            let prerequisites: Vec<_> = task.prerequisites().collect();
            if !prerequisites.is_empty() {
                write!(f, " {}", style(format!("[{}]", prerequisites.join(", "))).dim())?;
            }

            writeln!(f)?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_name() {
        let mut bp: Blueprint = Blueprint::new();
        bp.register("build", &[], |_| Ok(()));
        bp.register("build", &[], |_| Ok(()));

        assert_eq!(
            bp.finish().err(),
            Some(BlueprintError::Duplicate("build".into()))
        );
    }

    #[test]
    fn test_unknown_prerequisite() {
        let mut bp: Blueprint = Blueprint::new();
        bp.register("gzip", &["build"], |_| Ok(()));

        assert_eq!(
            bp.finish().err(),
            Some(BlueprintError::UnknownPrerequisite {
                task: "gzip".into(),
                prerequisite: "build".into(),
            })
        );
    }

    #[test]
    fn test_cycle() {
        let mut bp: Blueprint = Blueprint::new();
        bp.register("a", &["c"], |_| Ok(()));
        bp.register("b", &["a"], |_| Ok(()));
        bp.register("c", &["b"], |_| Ok(()));

        assert!(matches!(bp.finish(), Err(BlueprintError::Cycle(_))));
    }

    #[test]
    fn test_self_dependency() {
        let mut bp: Blueprint = Blueprint::new();
        bp.register("a", &["a"], |_| Ok(()));

        assert_eq!(bp.finish().err(), Some(BlueprintError::Cycle("a".into())));
    }

    #[test]
    fn test_repeated_prerequisite_is_one_edge() {
        let mut bp: Blueprint = Blueprint::new();
        bp.register("a", &[], |_| Ok(()));
        bp.register("b", &["a", "a"], |_| Ok(()));

        let graph = bp.finish().unwrap();
        assert_eq!(graph.graph.edge_count(), 1);
    }

    #[test]
    fn test_listing() {
        console::set_colors_enabled(false);

        let mut bp: Blueprint = Blueprint::new();
        bp.task("clean").about("Remove build outputs").run(|_| Ok(()));
        bp.task("build")
            .about("Bundle and minify")
            .depends_on(["clean"])
            .run(|_| Ok(()));

        let listing = bp.finish().unwrap().to_string();
        let lines: Vec<_> = listing.lines().collect();
        assert_eq!(lines[0], "  clean  Remove build outputs");
        assert_eq!(lines[1], "  build  Bundle and minify [clean]");
    }
}
