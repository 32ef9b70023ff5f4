//! Headless unit tests.
//!
//! The test runner is started as a server in single-run mode. Whatever
//! happens while it runs, the server is stopped before the task completes:
//! the handle lives in a [`ServerGuard`] which stops it on drop.

use std::process::Child;
use std::time::Instant;

use camino::{Utf8Path, Utf8PathBuf};

use crate::error::SpecError;
use crate::io::as_overhead;

/// A running test server.
pub trait Server {
    /// Blocks until the run is over. `Some(0)` means every spec passed,
    /// `None` that the process ended without an exit code.
    fn wait(&mut self) -> Result<Option<i32>, SpecError>;

    /// Shuts the server down if it is still up.
    fn stop(&mut self);
}

/// Starts a test server for a configuration file.
pub trait Launcher {
    type Server: Server;

    fn launch(&self, config: &Utf8Path) -> Result<Self::Server, SpecError>;
}

/// Owns a server handle and stops it when dropped.
pub struct ServerGuard<S: Server> {
    server: Option<S>,
}

impl<S: Server> ServerGuard<S> {
    pub fn new(server: S) -> Self {
        Self {
            server: Some(server),
        }
    }

    pub fn wait(&mut self) -> Result<Option<i32>, SpecError> {
        match self.server.as_mut() {
            Some(server) => server.wait(),
            None => Ok(Some(0)),
        }
    }
}

impl<S: Server> Drop for ServerGuard<S> {
    fn drop(&mut self) {
        if let Some(mut server) = self.server.take() {
            tracing::debug!("stopping test server");
            server.stop();
        }
    }
}

/// Runs the specs once.
pub fn run(launcher: &impl Launcher, config: &Utf8Path) -> Result<(), SpecError> {
    let s = Instant::now();
    let mut guard = ServerGuard::new(launcher.launch(config)?);
    let code = guard.wait()?;
    drop(guard);

    match code {
        Some(0) => {
            tracing::info!("Specs passed {}", as_overhead(s));
            Ok(())
        }
        code => Err(SpecError::Failed(code)),
    }
}

/// `karma start <config> --single-run`.
#[derive(Debug, Clone)]
pub struct Karma {
    pub binary: Utf8PathBuf,
    pub root: Utf8PathBuf,
}

impl Launcher for Karma {
    type Server = KarmaServer;

    fn launch(&self, config: &Utf8Path) -> Result<Self::Server, SpecError> {
        let child = super::command(&self.binary, &self.root)
            .arg("start")
            .arg(config.as_str())
            .arg("--single-run")
            .spawn()
            .map_err(SpecError::Launch)?;

        tracing::debug!(pid = child.id(), "test server started");
        Ok(KarmaServer { child })
    }
}

pub struct KarmaServer {
    child: Child,
}

impl Server for KarmaServer {
    fn wait(&mut self) -> Result<Option<i32>, SpecError> {
        let status = self.child.wait().map_err(SpecError::Wait)?;
        Ok(status.code())
    }

    fn stop(&mut self) {
        if let Ok(None) = self.child.try_wait() {
            if let Err(e) = self.child.kill() {
                tracing::warn!("couldn't stop test server: {e}");
            }
            let _ = self.child.wait();
        }
    }
}
