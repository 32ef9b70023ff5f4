mod diagnostics;
#[cfg(feature = "live")]
pub(crate) mod watch;

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use petgraph::Direction;
use petgraph::graph::NodeIndex;
use tracing::Level;
use tracing_indicatif::span_ext::IndicatifSpanExt;

use crate::core::Environment;
use crate::engine::{TaskContext, TaskGraph};
use crate::error::{RunError, Termination};

pub use diagnostics::Diagnostics;

#[derive(Debug, Clone)]
pub struct TaskExecution {
    pub start: Instant,
    pub duration: Duration,
}

#[derive(Default)]
struct RunState {
    finished: HashSet<NodeIndex>,
    running: HashSet<NodeIndex>,
    executed: Vec<NodeIndex>,
    execution_times: HashMap<NodeIndex, TaskExecution>,
}

/// Bookkeeping for one invocation of the runner. Every task requested while
/// the run is alive, directly or chained from inside an action, goes through
/// the same state, which is what makes execution exactly-once.
pub(crate) struct Run<'a, G: Send + Sync> {
    pub(crate) graph: &'a TaskGraph<G>,
    env: &'a Environment<G>,
    state: RefCell<RunState>,
}

impl<G: Send + Sync> TaskGraph<G> {
    /// Runs a single task and, before it, all of its prerequisites.
    pub fn run(&self, env: &Environment<G>, name: &str) -> Result<Diagnostics, RunError> {
        self.run_many(env, [name])
    }

    /// Runs several tasks in order as one run. A task shared between the
    /// requested ones is executed only once.
    pub fn run_many<'n>(
        &self,
        env: &Environment<G>,
        names: impl IntoIterator<Item = &'n str>,
    ) -> Result<Diagnostics, RunError> {
        let run = Run {
            graph: self,
            env,
            state: RefCell::new(RunState::default()),
        };

        for name in names {
            run.request(name)?;
        }

        let state = run.state.into_inner();
        Ok(Diagnostics {
            executed: state
                .executed
                .iter()
                .map(|&index| self.graph[index].name.to_string())
                .collect(),
            execution_times: state
                .execution_times
                .into_iter()
                .map(|(index, time)| (self.graph[index].name.to_string(), time))
                .collect(),
        })
    }

    /// Prerequisites of a task in declared order.
    fn prerequisites_of(&self, index: NodeIndex) -> Vec<NodeIndex> {
        let task = &self.graph[index];
        let mut incoming: Vec<_> = self
            .graph
            .neighbors_directed(index, Direction::Incoming)
            .collect();

        incoming.sort_by_key(|&dep| {
            task.prerequisites
                .iter()
                .position(|name| *name == self.graph[dep].name)
        });

        incoming
    }
}

impl<G: Send + Sync> Run<'_, G> {
    pub(crate) fn request(&self, name: &str) -> Result<(), RunError> {
        let index = self
            .graph
            .index(name)
            .ok_or_else(|| RunError::NotFound(name.to_string()))?;

        self.visit(index)
    }

    /// Depth-first walk over prerequisites, executing each node after all of
    /// the nodes it depends on.
    fn visit(&self, index: NodeIndex) -> Result<(), RunError> {
        {
            let state = self.state.borrow();
            if state.finished.contains(&index) {
                return Ok(());
            }
            if state.running.contains(&index) {
                return Err(RunError::Reentrant(self.graph.graph[index].name.to_string()));
            }
        }

        for dependency in self.graph.prerequisites_of(index) {
            self.visit(dependency)?;
        }

        self.execute(index)
    }

    fn execute(&self, index: NodeIndex) -> Result<(), RunError> {
        let task = &self.graph.graph[index];
        let name = task.name.as_ref();

        self.state.borrow_mut().running.insert(index);

        let span = tracing::span!(Level::INFO, "task", name = name);
        span.pb_set_style(&crate::io::style_task());
        span.pb_set_message(&format!("Running {name}"));
        let _enter = span.enter();

        let context = TaskContext {
            env: self.env,
            span: span.clone(),
            run: self,
        };

        tracing::debug!("starting '{name}'");
        let start = Instant::now();
        let result = (task.action)(&context);
        let duration = start.elapsed();

        let mut state = self.state.borrow_mut();
        state.running.remove(&index);
        state
            .execution_times
            .insert(index, TaskExecution { start, duration });

        match result {
            Ok(()) => {
                state.finished.insert(index);
                state.executed.push(index);
                tracing::info!("finished '{name}' {}", crate::io::as_overhead(start));
                Ok(())
            }
            Err(err) => {
                if let Some(Termination(code)) = err.downcast_ref::<Termination>() {
                    return Err(RunError::Terminated(*code));
                }
                tracing::error!("'{name}' failed after {duration:.2?}");
                Err(RunError::Task(name.to_string(), err))
            }
        }
    }
}

/// Turns the outcome of a chained run back into something an action can
/// return with `?`, keeping a hard stop recognisable to the outer run.
pub(crate) fn into_task_error(err: RunError) -> anyhow::Error {
    match err {
        RunError::Terminated(code) => anyhow::Error::new(Termination(code)),
        other => anyhow::Error::new(other),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use crate::Blueprint;
    use crate::core::Environment;
    use crate::error::{RunError, Termination};

    type Log = Arc<Mutex<Vec<&'static str>>>;

    fn record(
        log: &Log,
        name: &'static str,
    ) -> impl Fn(&crate::TaskContext<'_>) -> anyhow::Result<()> + Send + Sync + use<> {
        let log = log.clone();
        move |_| {
            log.lock().unwrap().push(name);
            Ok(())
        }
    }

    fn chain() -> (crate::TaskGraph, Log) {
        let log = Log::default();
        let mut bp: Blueprint = Blueprint::new();
        bp.register("a", &[], record(&log, "a"));
        bp.register("b", &["a"], record(&log, "b"));
        bp.register("c", &["b"], record(&log, "c"));
        (bp.finish().unwrap(), log)
    }

    #[test]
    fn test_prerequisites_before_dependents() {
        let (graph, log) = chain();
        let diagnostics = graph.run(&Environment::new(()), "c").unwrap();

        assert_eq!(*log.lock().unwrap(), ["a", "b", "c"]);
        assert_eq!(diagnostics.executed, ["a", "b", "c"]);
    }

    #[test]
    fn test_exactly_once_per_run() {
        let (graph, log) = chain();
        graph
            .run_many(&Environment::new(()), ["c", "c", "b", "c"])
            .unwrap();

        assert_eq!(*log.lock().unwrap(), ["a", "b", "c"]);
    }

    #[test]
    fn test_no_prerequisites_runs_alone() {
        let (graph, log) = chain();
        graph.run(&Environment::new(()), "a").unwrap();

        assert_eq!(*log.lock().unwrap(), ["a"]);
    }

    #[test]
    fn test_declared_prerequisite_order() {
        let log = Log::default();
        let mut bp: Blueprint = Blueprint::new();
        bp.register("z", &[], record(&log, "z"));
        bp.register("y", &[], record(&log, "y"));
        bp.register("x", &[], record(&log, "x"));
        bp.register("all", &["y", "x", "z"], record(&log, "all"));
        let graph = bp.finish().unwrap();

        graph.run(&Environment::new(()), "all").unwrap();
        assert_eq!(*log.lock().unwrap(), ["y", "x", "z", "all"]);
    }

    #[test]
    fn test_diamond_shared_prerequisite() {
        let log = Log::default();
        let mut bp: Blueprint = Blueprint::new();
        bp.register("clean", &[], record(&log, "clean"));
        bp.register("build", &["clean"], record(&log, "build"));
        bp.register("docs", &["clean"], record(&log, "docs"));
        bp.register("all", &["build", "docs"], record(&log, "all"));
        let graph = bp.finish().unwrap();

        graph.run(&Environment::new(()), "all").unwrap();
        assert_eq!(*log.lock().unwrap(), ["clean", "build", "docs", "all"]);
    }

    #[test]
    fn test_failure_gates_dependents() {
        let log = Log::default();
        let mut bp: Blueprint = Blueprint::new();
        bp.register("lint", &[], |_| anyhow::bail!("2 lint errors"));
        bp.register("test:spec", &["lint"], record(&log, "test:spec"));
        let graph = bp.finish().unwrap();

        let err = graph.run(&Environment::new(()), "test:spec").unwrap_err();
        assert!(matches!(err, RunError::Task(ref name, _) if name == "lint"));
        assert!(log.lock().unwrap().is_empty());
    }

    #[test]
    fn test_chained_run_shares_state() {
        let log = Log::default();
        let mut bp: Blueprint = Blueprint::new();
        bp.register("lint", &[], record(&log, "lint"));
        bp.register("test:spec", &["lint"], record(&log, "test:spec"));
        bp.register("test:e2e", &[], record(&log, "test:e2e"));
        let inner = log.clone();
        bp.register("test", &["test:spec"], move |ctx| {
            inner.lock().unwrap().push("test");
            ctx.run("test:spec")?;
            ctx.run("test:e2e")
        });
        let graph = bp.finish().unwrap();

        graph.run(&Environment::new(()), "test").unwrap();
        assert_eq!(
            *log.lock().unwrap(),
            ["lint", "test:spec", "test", "test:e2e"]
        );
    }

    #[test]
    fn test_chained_failure_is_reported() {
        let mut bp: Blueprint = Blueprint::new();
        bp.register("test:e2e", &[], |_| anyhow::bail!("browser crashed"));
        bp.register("test", &[], |ctx| ctx.run("test:e2e"));
        let graph = bp.finish().unwrap();

        let err = graph.run(&Environment::new(()), "test").unwrap_err();
        assert!(matches!(err, RunError::Task(ref name, _) if name == "test"));
        assert!(format!("{err}").contains("browser crashed"));
    }

    #[test]
    fn test_termination_bypasses_failure_handling() {
        let log = Log::default();
        let mut bp: Blueprint = Blueprint::new();
        bp.register("test:e2e", &[], |_| Err(Termination(1).into()));
        let inner = log.clone();
        bp.register("test", &[], move |ctx| {
            ctx.run("test:e2e")?;
            inner.lock().unwrap().push("after");
            Ok(())
        });
        let graph = bp.finish().unwrap();

        let err = graph.run(&Environment::new(()), "test").unwrap_err();
        assert!(matches!(err, RunError::Terminated(1)));
        assert!(log.lock().unwrap().is_empty());
    }

    #[test]
    fn test_reentrant_chain() {
        let mut bp: Blueprint = Blueprint::new();
        bp.register("loop", &[], |ctx| ctx.run("loop"));
        let graph = bp.finish().unwrap();

        let err = graph.run(&Environment::new(()), "loop").unwrap_err();
        assert!(format!("{err}").contains("requested again"));
    }

    #[test]
    fn test_unknown_task() {
        let (graph, _) = chain();
        let err = graph.run(&Environment::new(()), "deploy").unwrap_err();
        assert!(matches!(err, RunError::NotFound(ref name) if name == "deploy"));
    }
}
