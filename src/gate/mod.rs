//! Quality gates. Each one delegates to an external tool and turns its
//! outcome into a pass or a failure of the task.

pub mod e2e;
pub mod lint;
pub mod spec;

use std::process::{Command, Stdio};

use camino::Utf8Path;

/// A command for a node tool, run from the project root with its output
/// passed through to the terminal.
pub(crate) fn command(binary: &Utf8Path, root: &Utf8Path) -> Command {
    let mut command = Command::new(binary);
    command
        .current_dir(root)
        .stdin(Stdio::null())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit());
    command
}
