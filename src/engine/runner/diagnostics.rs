use std::collections::HashMap;
use std::fmt::{Display, Formatter};

use super::TaskExecution;

/// Run diagnostics and performance metrics.
///
/// Returned by [`TaskGraph::run`](crate::TaskGraph::run), it lists the tasks
/// that were executed, in execution order, together with their timings.
#[derive(Debug, Default)]
pub struct Diagnostics {
    /// Names of executed tasks, in the order they finished.
    pub executed: Vec<String>,
    /// A map of task names to their execution metrics.
    pub execution_times: HashMap<String, TaskExecution>,
}

impl Diagnostics {
    /// The task that took the longest, if anything ran.
    pub fn slowest(&self) -> Option<(&str, &TaskExecution)> {
        self.execution_times
            .iter()
            .max_by_key(|(_, exec)| exec.duration)
            .map(|(name, exec)| (name.as_str(), exec))
    }
}

impl Display for Diagnostics {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let width = self.executed.iter().map(String::len).max().unwrap_or(0);

        for name in &self.executed {
            match self.execution_times.get(name) {
                Some(exec) => writeln!(f, "{name:<width$}  {:.2?}", exec.duration)?,
                None => writeln!(f, "{name}")?,
            }
        }

        Ok(())
    }
}
