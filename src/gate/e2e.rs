use std::thread;
use std::time::{Duration, Instant};

use camino::{Utf8Path, Utf8PathBuf};

use crate::error::{E2eError, Termination};
use crate::io::as_overhead;

/// Runs the browser automation suite to completion.
pub trait Runner {
    fn run(&self, config: &Utf8Path) -> Result<(), E2eError>;
}

/// `protractor <config>`.
#[derive(Debug, Clone)]
pub struct Protractor {
    pub binary: Utf8PathBuf,
    pub root: Utf8PathBuf,
}

impl Runner for Protractor {
    fn run(&self, config: &Utf8Path) -> Result<(), E2eError> {
        let status = super::command(&self.binary, &self.root)
            .arg(config.as_str())
            .spawn()
            .map_err(E2eError::Launch)?
            .wait()
            .map_err(E2eError::Wait)?;

        if !status.success() {
            return Err(E2eError::Failed(status.code()));
        }
        Ok(())
    }
}

/// Runs the suite. A failure is a hard stop: the error is logged and a
/// [`Termination`] with exit code 1 is raised, so nothing scheduled after
/// this runs. On success, and inside CI, waits `delay` before returning.
pub fn run(
    runner: &impl Runner,
    config: &Utf8Path,
    ci: bool,
    delay: Duration,
) -> anyhow::Result<()> {
    let s = Instant::now();

    if let Err(e) = runner.run(config) {
        tracing::error!("{e}");
        return Err(Termination(1).into());
    }

    tracing::info!("End-to-end suite passed {}", as_overhead(s));

    if ci && !delay.is_zero() {
        tracing::debug!("waiting {delay:?} before moving on");
        thread::sleep(delay);
    }

    Ok(())
}
