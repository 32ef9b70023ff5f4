//! Watch mode.
//!
//! The watch globs are split into static roots, which are watched
//! recursively through a debounced `notify` watcher, and patterns, which
//! filter the events. Every matching file is fingerprinted, so an event for
//! a file whose contents did not change (editors love touching files) does
//! not trigger a rebuild.
//!
//! A rebuild runs the target task as a fresh run of the graph, prerequisites
//! included. A failed rebuild is logged and watching goes on.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use glob::Pattern;
use notify::RecursiveMode;
use notify_debouncer_full::{DebouncedEvent, new_debouncer};

use crate::core::{Environment, Hash32};
use crate::engine::{Diagnostics, TaskGraph};
use crate::error::{RunError, WatchError};

const DEBOUNCE: Duration = Duration::from_millis(250);

/// Watches the files matched by `patterns` under `root` and reruns `task`
/// whenever one of them changes. Only returns on a watcher error.
pub(crate) fn watch<G: Send + Sync>(
    graph: &TaskGraph<G>,
    env: &Environment<G>,
    root: &Utf8Path,
    patterns: &[String],
    task: &str,
) -> Result<(), WatchError> {
    let mut watched = HashSet::new();
    let mut filters = Vec::new();

    for pattern in patterns {
        match resolve_watch_path(root.join(pattern)) {
            Ok((path, filter)) => {
                watched.insert(path);
                filters.push(filter);
            }
            Err(e) => tracing::error!("failed to resolve watch path {pattern}: {e}"),
        }
    }

    let mut rebuild = Rebuild::new(graph, env, root, task, filters)?;

    let (tx, rx) = std::sync::mpsc::channel();
    let mut debouncer = new_debouncer(DEBOUNCE, None, tx)?;

    for path in collapse_watch_paths(watched) {
        tracing::info!("watching {}", path);
        debouncer.watch(path.as_std_path(), RecursiveMode::Recursive)?;
    }

    loop {
        match rx.recv()? {
            Ok(events) => match rebuild.on_events(&events) {
                Some(Ok(diagnostics)) => tracing::info!(
                    "rebuilt with {} task(s), watching for changes...",
                    diagnostics.executed.len()
                ),
                Some(Err(e)) => tracing::error!("rebuild failed: {e}"),
                None => {}
            },
            Err(errors) => {
                for e in errors {
                    tracing::error!("watch error: {e}");
                }
            }
        }
    }
}

/// Turns batches of debounced events into reruns of one task.
pub(crate) struct Rebuild<'a, G: Send + Sync> {
    graph: &'a TaskGraph<G>,
    env: &'a Environment<G>,
    root: &'a Utf8Path,
    task: &'a str,
    filters: Vec<Pattern>,
    fingerprints: Fingerprints,
}

impl<'a, G: Send + Sync> Rebuild<'a, G> {
    /// Fingerprints every file the filters match as it is now.
    pub(crate) fn new(
        graph: &'a TaskGraph<G>,
        env: &'a Environment<G>,
        root: &'a Utf8Path,
        task: &'a str,
        filters: Vec<Pattern>,
    ) -> Result<Self, WatchError> {
        let mut fingerprints = Fingerprints::default();
        for filter in &filters {
            for path in glob::glob(filter.as_str())?.flatten() {
                if let Ok(path) = Utf8PathBuf::try_from(path) {
                    fingerprints.update(&path);
                }
            }
        }
        tracing::debug!("fingerprinted {} file(s)", fingerprints.len());

        Ok(Self {
            graph,
            env,
            root,
            task,
            filters,
            fingerprints,
        })
    }

    /// Reruns the task when a watched file in the batch changed contents.
    /// Returns `None` when nothing relevant changed.
    pub(crate) fn on_events(
        &mut self,
        events: &[DebouncedEvent],
    ) -> Option<Result<Diagnostics, RunError>> {
        let mut changed = Vec::new();

        for event in events {
            for path in &event.event.paths {
                if !self.filters.iter().any(|filter| filter.matches_path(path)) {
                    continue;
                }
                let Some(path) = Utf8Path::from_path(path) else {
                    continue;
                };
                if self.fingerprints.update(path) && !changed.iter().any(|p| p == path) {
                    changed.push(path.to_path_buf());
                }
            }
        }

        if changed.is_empty() {
            return None;
        }

        for path in &changed {
            tracing::info!("changed {}", path.strip_prefix(self.root).unwrap_or(path));
        }

        Some(self.graph.run(self.env, self.task))
    }
}

/// Content hashes of the watched files.
#[derive(Debug, Default)]
pub(crate) struct Fingerprints {
    hashes: HashMap<Utf8PathBuf, Hash32>,
}

impl Fingerprints {
    /// Re-hashes a file and reports whether it changed since the last look.
    /// A file that disappeared counts as changed, once.
    pub(crate) fn update(&mut self, path: &Utf8Path) -> bool {
        match Hash32::hash_file(path) {
            Ok(hash) => self.hashes.insert(path.to_path_buf(), hash) != Some(hash),
            Err(_) => self.hashes.remove(path).is_some(),
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.hashes.len()
    }
}

/// Splits a glob string into a canonicalized static root path (for
/// watching) and a compiled absolute Pattern (for matching).
pub(crate) fn resolve_watch_path(
    glob_str: impl AsRef<str>,
) -> Result<(Utf8PathBuf, Pattern), WatchError> {
    let path = Utf8Path::new(glob_str.as_ref());

    let components: Vec<_> = path.components().collect();
    let split_idx = components
        .iter()
        .position(|c| c.as_str().contains(['*', '?', '[']))
        .unwrap_or(components.len());

    let root_part: Utf8PathBuf = components.iter().take(split_idx).collect();
    let suffix_part: Utf8PathBuf = components.iter().skip(split_idx).collect();

    // The static root must exist on disk.
    let absolute_root = root_part.canonicalize_utf8()?;

    // A concrete file is watched through its parent, so atomic writes by
    // replacement are seen.
    let (watch_root, pattern) = if suffix_part.as_str().is_empty() && absolute_root.is_file() {
        let parent = absolute_root
            .parent()
            .unwrap_or(&absolute_root)
            .to_path_buf();
        (parent, absolute_root)
    } else {
        let pattern = absolute_root.join(&suffix_part);
        (absolute_root, pattern)
    };

    let pattern = Pattern::new(pattern.as_str())?;

    Ok((watch_root, pattern))
}

/// Reduces a set of paths to the minimal set of watch roots.
///
/// If we watch `/a` and `/a/b`, we only need to watch `/a` because
/// the watcher is recursive.
fn collapse_watch_paths(paths: HashSet<Utf8PathBuf>) -> Vec<Utf8PathBuf> {
    let mut paths: Vec<_> = paths.into_iter().collect();
    paths.sort();

    let mut filtered = Vec::new();
    for path in paths {
        if let Some(last) = filtered.last()
            && path.starts_with(last)
        {
            continue;
        }
        filtered.push(path);
    }

    filtered
}
