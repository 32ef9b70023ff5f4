#![forbid(unsafe_code)]
#![doc = include_str!("../README.md")]

mod blueprint;
pub mod bundle;
mod core;
pub mod coverage;
pub mod doc;
mod engine;
mod error;
pub mod gate;
pub mod io;
mod tasks;

pub use crate::blueprint::{Blueprint, TaskDef};
pub use crate::core::{
    ArtifactSet, CoverageConfig, DocConfig, E2eConfig, Environment, FetchErrorPolicy,
    LintConfig, Mode, Project, SpecConfig,
};
pub use crate::engine::{Diagnostics, Task, TaskContext, TaskExecution, TaskGraph, TaskResult};
pub use crate::error::*;
pub use crate::tasks::blueprint;
