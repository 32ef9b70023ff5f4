//! The bundle pipeline.
//!
//! Entry modules are resolved into a module graph, every module is
//! transformed, and the results are concatenated into one script which is
//! then minified and written out with its source map. Each step is a
//! [`Stage`], and [`Stage::policy`] decides what a failure of that step
//! means: the early stages recover by ending the stream where it broke, the
//! later ones abort the build.

pub mod concat;
pub mod graph;
pub mod helpers;
pub mod sourcemap;
pub mod tool;

use std::fmt::Display;
use std::fs;
use std::time::Instant;

use anyhow::anyhow;
use camino::{Utf8Component, Utf8Path, Utf8PathBuf};

use crate::core::Project;
use crate::error::StageError;
use crate::io::as_overhead;

use self::concat::{Concatenated, Unit};
use self::graph::ModuleGraph;
use self::sourcemap::SourceMap;
use self::tool::{Minify, Transform};

/// What a failed stage does to the rest of the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Policy {
    /// Log the failure and continue with whatever made it through.
    Recover,
    /// Stop the pipeline and fail the task.
    Fatal,
}

/// Steps of the pipeline, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Resolve,
    Transform,
    Concat,
    Materialize,
    Buffer,
    Rename,
    SourceMapInit,
    Minify,
    WriteMap,
    Persist,
}

impl Stage {
    pub const ALL: [Stage; 10] = [
        Stage::Resolve,
        Stage::Transform,
        Stage::Concat,
        Stage::Materialize,
        Stage::Buffer,
        Stage::Rename,
        Stage::SourceMapInit,
        Stage::Minify,
        Stage::WriteMap,
        Stage::Persist,
    ];

    pub fn policy(self) -> Policy {
        match self {
            Stage::Resolve | Stage::Transform | Stage::Concat => Policy::Recover,
            Stage::Materialize
            | Stage::Buffer
            | Stage::Rename
            | Stage::SourceMapInit
            | Stage::Minify
            | Stage::WriteMap
            | Stage::Persist => Policy::Fatal,
        }
    }

    /// Applies the policy to a stage result. A recovered failure is logged
    /// and comes back as `Ok(None)`.
    fn settle<T, E>(self, result: Result<T, E>) -> Result<Option<T>, StageError>
    where
        E: Into<anyhow::Error>,
    {
        match result {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                let err = StageError::new(self, e);
                match self.policy() {
                    Policy::Recover => {
                        tracing::error!("{err}");
                        Ok(None)
                    }
                    Policy::Fatal => Err(err),
                }
            }
        }
    }

    fn fatal<T, E>(self, result: Result<T, E>) -> Result<T, StageError>
    where
        E: Into<anyhow::Error>,
    {
        result.map_err(|e| StageError::new(self, e))
    }
}

impl Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Stage::Resolve => "resolve",
            Stage::Transform => "transform",
            Stage::Concat => "concat",
            Stage::Materialize => "materialize",
            Stage::Buffer => "buffer",
            Stage::Rename => "rename",
            Stage::SourceMapInit => "sourcemap-init",
            Stage::Minify => "minify",
            Stage::WriteMap => "write-map",
            Stage::Persist => "persist",
        };
        f.write_str(name)
    }
}

/// An in-memory file on its way through the later stages.
#[derive(Debug, Clone)]
struct Artifact {
    path: Utf8PathBuf,
    contents: Vec<u8>,
    map: Option<SourceMap>,
}

impl Artifact {
    fn file_name(&self) -> anyhow::Result<&str> {
        self.path
            .file_name()
            .ok_or_else(|| anyhow!("{} has no file name", self.path))
    }
}

/// What a bundle run produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundleReport {
    /// Modules found in the graph.
    pub found: usize,
    /// Modules that made it into the bundle.
    pub bundled: usize,
    /// Whether a recovered failure cut the stream short.
    pub truncated: bool,
    /// Files written, in order.
    pub written: Vec<Utf8PathBuf>,
}

/// The pipeline, with its two external tools.
pub struct Bundler<'a, T, M> {
    project: &'a Project,
    transform: T,
    minify: M,
}

impl<'a, T: Transform, M: Minify> Bundler<'a, T, M> {
    pub fn new(project: &'a Project, transform: T, minify: M) -> Self {
        Self {
            project,
            transform,
            minify,
        }
    }

    pub fn run(&self) -> Result<BundleReport, StageError> {
        let s = Instant::now();
        let project = self.project;
        let artifacts = project.artifacts();
        let mut truncated = false;

        // Resolve
        let graph = Stage::Resolve
            .settle(graph::resolve(&project.root, &project.entries))?
            .unwrap_or_else(|| {
                truncated = true;
                ModuleGraph::default()
            });

        // Transform, stopping at the first module that fails.
        let mut units = Vec::with_capacity(graph.modules.len());
        for module in &graph.modules {
            let result = self.transform.transform(&module.path, &module.source);
            match Stage::Transform.settle(result)? {
                Some(emitted) => units.push(Unit { module, emitted }),
                None => {
                    tracing::warn!(
                        "Bundle stream ends before {}, {} of {} module(s) kept",
                        module.path,
                        units.len(),
                        graph.modules.len()
                    );
                    truncated = true;
                    break;
                }
            }
        }

        for &id in &graph.entries {
            if !units.iter().any(|unit| unit.module.id == id)
                && let Some(entry) = graph.get(id)
            {
                tracing::warn!("Entry {} is not in the bundle", entry.path);
            }
        }

        // Concat
        let bundle_name = file_name(&artifacts.bundle)?;
        let concatenated = Stage::Concat
            .settle(concat::concat(&project.name, bundle_name, &units, &graph.entries))?
            .unwrap_or_else(|| {
                truncated = true;
                Concatenated::empty(bundle_name)
            });

        let source_root = source_root(&project.out_dir);

        // Materialize
        let mut artifact = Stage::Materialize.fatal(materialize(&artifacts.bundle, concatenated))?;

        // Buffer
        let code = Stage::Buffer.fatal(String::from_utf8(std::mem::take(&mut artifact.contents)))?;

        // Unminified copy, kept aside before the rename.
        let unminified = project.keep_unminified.then(|| Artifact {
            path: artifact.path.clone(),
            contents: code.clone().into_bytes(),
            map: artifact.map.clone(),
        });

        // Rename
        artifact.path = artifacts.minified.clone();
        let minified_name = Stage::Rename.fatal(artifact.file_name())?.to_string();

        // SourceMapInit
        let upstream = Stage::SourceMapInit.fatal(init_map(artifact.map.take()))?;

        // Minify
        let minified = Stage::Minify.fatal(self.minify.minify(&minified_name, &code))?;

        // WriteMap
        let map_path = artifacts.minified_map.clone();
        let map_json = Stage::WriteMap.fatal(write_map(
            minified.map.as_ref(),
            &upstream,
            &minified_name,
            source_root.as_deref(),
        ))?;

        let map_name = Stage::WriteMap.fatal(
            map_path
                .file_name()
                .ok_or_else(|| anyhow!("{map_path} has no file name")),
        )?;

        let mut code = minified.code;
        if !code.is_empty() && !code.ends_with('\n') {
            code.push('\n');
        }
        code.push_str(&format!("//# sourceMappingURL={map_name}\n"));

        // Persist
        let mut written = Vec::new();
        let persist = |path: &Utf8Path, contents: &[u8], written: &mut Vec<Utf8PathBuf>| {
            Stage::Persist.fatal(write(path, contents))?;
            written.push(path.to_path_buf());
            Ok::<_, StageError>(())
        };

        if let Some(bundle) = unminified {
            let mut map = Stage::Persist.fatal(init_map(bundle.map))?;
            map.source_root = source_root.clone();
            let json = Stage::Persist.fatal(map.to_json())?;
            let mut text = Stage::Persist.fatal(String::from_utf8(bundle.contents))?;
            let bundle_map = Stage::Persist.fatal(
                artifacts
                    .bundle_map
                    .file_name()
                    .ok_or_else(|| anyhow!("{} has no file name", artifacts.bundle_map)),
            )?;
            text.push_str(&format!("//# sourceMappingURL={bundle_map}\n"));

            persist(&bundle.path, text.as_bytes(), &mut written)?;
            persist(&artifacts.bundle_map, json.as_bytes(), &mut written)?;
        }

        persist(&artifact.path, code.as_bytes(), &mut written)?;
        persist(&map_path, map_json.as_bytes(), &mut written)?;

        tracing::info!(
            "Bundled {} of {} module(s) into {} {}",
            units.len(),
            graph.modules.len(),
            artifact.path,
            as_overhead(s)
        );

        Ok(BundleReport {
            found: graph.modules.len(),
            bundled: units.len(),
            truncated,
            written,
        })
    }
}

fn file_name(path: &Utf8Path) -> Result<&str, StageError> {
    path.file_name().ok_or_else(|| {
        StageError::new(Stage::Materialize, anyhow!("{path} has no file name"))
    })
}

fn materialize(path: &Utf8Path, concatenated: Concatenated) -> anyhow::Result<Artifact> {
    let artifact = Artifact {
        path: path.to_path_buf(),
        contents: concatenated.code.into_bytes(),
        map: Some(concatenated.map),
    };
    artifact.file_name()?;
    Ok(artifact)
}

/// Checks that the map carried by the stream decodes.
fn init_map(map: Option<SourceMap>) -> anyhow::Result<SourceMap> {
    let map = map.ok_or_else(|| anyhow!("the bundle carries no source map"))?;
    map.lines()?;
    Ok(map)
}

/// Composes the minifier's map with the bundle's map, so that the result
/// points at the original modules.
fn write_map(
    minified: Option<&SourceMap>,
    upstream: &SourceMap,
    file: &str,
    source_root: Option<&str>,
) -> anyhow::Result<String> {
    let minified = minified.ok_or_else(|| anyhow!("the minifier emitted no source map"))?;
    let mut map = minified.compose(upstream)?;
    map.file = Some(file.to_string());
    map.source_root = source_root.map(str::to_string);
    Ok(map.to_json()?)
}

fn write(path: &Utf8Path, contents: &[u8]) -> anyhow::Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_str().is_empty()
    {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, contents).map_err(|e| anyhow!("Couldn't write {path}.\n{e}"))
}

/// Path from the output directory back to the project root, where module
/// paths in the maps are rooted.
fn source_root(out_dir: &Utf8Path) -> Option<String> {
    let depth = out_dir
        .components()
        .filter(|c| matches!(c, Utf8Component::Normal(_)))
        .count();
    (depth > 0).then(|| vec![".."; depth].join("/"))
}
