//! Module graph resolution.
//!
//! Starting from the entry modules, every relative specifier found in an
//! `import`, `export … from` or `require(…)` is resolved to a file on disk.
//! Bare specifiers are left alone, the runtime prelude looks them up on the
//! global object.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::sync::LazyLock;

use camino::{Utf8Component, Utf8Path, Utf8PathBuf};
use regex::Regex;

use crate::error::ResolveError;

static SPECIFIER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?m)(?:^|[^.\w$])(?:import\s*(?:[\w$*{}\s,]+?\s*from\s*)?|export\s*(?:\*(?:\s+as\s+[\w$]+)?|\{[^}]*\})\s*from\s*|require\s*\(\s*)["']([^"'\n]+)["']"#,
    )
    .expect("Error compiling import pattern")
});

/// Extensions tried, in order, for a specifier without one.
const CANDIDATES: &[&str] = &["", ".js", ".mjs", "/index.js"];

/// A source module and the modules it imports.
#[derive(Debug, Clone)]
pub struct Module {
    pub id: usize,
    /// Path relative to the project root, used as the module's name in the
    /// bundle and in source maps.
    pub path: Utf8PathBuf,
    pub source: String,
    /// Specifier, as written, to module id.
    pub deps: BTreeMap<String, usize>,
}

/// Modules in dependency order: every module comes after the modules it
/// imports, unless they import each other.
#[derive(Debug, Clone, Default)]
pub struct ModuleGraph {
    pub modules: Vec<Module>,
    /// Ids of the entry modules, in the order given.
    pub entries: Vec<usize>,
}

impl ModuleGraph {
    pub fn get(&self, id: usize) -> Option<&Module> {
        self.modules.iter().find(|module| module.id == id)
    }
}

/// Relative specifiers imported by a piece of source, in order of
/// appearance, without duplicates.
pub fn scan(source: &str) -> Vec<&str> {
    let mut found = Vec::new();
    for capture in SPECIFIER.captures_iter(source) {
        let specifier = capture.get(1).map(|m| m.as_str()).unwrap_or_default();
        if (specifier.starts_with("./") || specifier.starts_with("../"))
            && !found.contains(&specifier)
        {
            found.push(specifier);
        }
    }
    found
}

struct Resolver<'a> {
    root: &'a Utf8Path,
    ids: HashMap<Utf8PathBuf, usize>,
    loaded: Vec<Option<Module>>,
    order: Vec<usize>,
}

impl Resolver<'_> {
    fn id(&mut self, path: &Utf8Path) -> (usize, bool) {
        if let Some(&id) = self.ids.get(path) {
            return (id, false);
        }
        let id = self.loaded.len();
        self.ids.insert(path.to_path_buf(), id);
        self.loaded.push(None);
        (id, true)
    }

    /// Loads a module's imports, then the module itself.
    fn load(&mut self, id: usize, path: Utf8PathBuf) -> Result<(), ResolveError> {
        let full = self.root.join(&path);
        let source = fs::read_to_string(&full).map_err(|e| ResolveError::Read(path.clone(), e))?;

        let dir = path.parent().unwrap_or(Utf8Path::new(""));
        let targets = scan(&source)
            .into_iter()
            .map(|specifier| match self.locate(dir, specifier) {
                Some(target) => Ok((specifier.to_string(), target)),
                None => Err(ResolveError::Unresolved {
                    specifier: specifier.to_string(),
                    from: path.clone(),
                }),
            })
            .collect::<Result<Vec<_>, _>>()?;

        // The id is taken before recursing, so cyclic imports terminate.
        let mut deps = BTreeMap::new();
        for (specifier, target) in targets {
            let (dep, fresh) = self.id(&target);
            deps.insert(specifier, dep);
            if fresh {
                self.load(dep, target)?;
            }
        }

        self.loaded[id] = Some(Module {
            id,
            path,
            source,
            deps,
        });
        self.order.push(id);
        Ok(())
    }

    fn locate(&self, dir: &Utf8Path, specifier: &str) -> Option<Utf8PathBuf> {
        let base = normalize_path(&dir.join(specifier));
        CANDIDATES.iter().find_map(|ext| {
            let candidate = Utf8PathBuf::from(format!("{base}{ext}"));
            self.root.join(&candidate).is_file().then_some(candidate)
        })
    }
}

/// Resolves the module graph reachable from `entries`. Entry paths are
/// relative to `root`.
pub fn resolve(root: &Utf8Path, entries: &[Utf8PathBuf]) -> Result<ModuleGraph, ResolveError> {
    let mut resolver = Resolver {
        root,
        ids: HashMap::new(),
        loaded: Vec::new(),
        order: Vec::new(),
    };

    let mut entry_ids = Vec::with_capacity(entries.len());

    for entry in entries {
        let path = normalize_path(entry);
        if !root.join(&path).is_file() {
            return Err(ResolveError::MissingEntry(entry.clone()));
        }

        let (id, fresh) = resolver.id(&path);
        if fresh {
            resolver.load(id, path)?;
        }
        entry_ids.push(id);
    }

    let Resolver {
        mut loaded, order, ..
    } = resolver;

    let modules = order
        .into_iter()
        .filter_map(|id| loaded[id].take())
        .collect();

    Ok(ModuleGraph {
        modules,
        entries: entry_ids,
    })
}

/// Normalize a path, removing things like `.` and `..`.
///
/// CAUTION: This does not resolve symlinks (unlike [`std::fs::canonicalize`]).
///
/// Adapted from
/// <https://github.com/rust-lang/cargo/blob/f7acf448fc127df9a77c52cc2bba027790ac4931/crates/cargo-util/src/paths.rs#L76-L116>
pub(crate) fn normalize_path(path: &Utf8Path) -> Utf8PathBuf {
    let mut components = path.components().peekable();
    let mut ret = if let Some(c @ Utf8Component::Prefix(..)) = components.peek().cloned() {
        components.next();
        Utf8PathBuf::from(c.as_str())
    } else {
        Utf8PathBuf::new()
    };

    for component in components {
        match component {
            Utf8Component::Prefix(..) => unreachable!(),
            Utf8Component::RootDir => {
                ret.push(Utf8Component::RootDir);
            }
            Utf8Component::CurDir => {}
            Utf8Component::ParentDir => {
                if ret.ends_with(Utf8Component::ParentDir) {
                    ret.push(Utf8Component::ParentDir);
                } else {
                    let popped = ret.pop();
                    if !popped && !ret.has_root() {
                        ret.push(Utf8Component::ParentDir);
                    }
                }
            }
            Utf8Component::Normal(c) => {
                ret.push(c);
            }
        }
    }
    ret
}

#[cfg(test)]
mod tests {
    use super::*;

    fn project(files: &[(&str, &str)]) -> (tempfile::TempDir, Utf8PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::try_from(dir.path().to_path_buf()).unwrap();
        for (path, text) in files {
            let path = root.join(path);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, text).unwrap();
        }
        (dir, root)
    }

    #[test]
    fn test_scan() {
        let source = r#"
import { Canvas } from "./canvas";
import "./polyfill.js";
import * as shapes from './shapes/index.js';
export { Circle } from "./shapes/circle";
export * from "../shared";
const util = require('./util');
const react = require("react");
const text = "import nothing from './string'".length;
"#;
        assert_eq!(
            scan(source),
            [
                "./canvas",
                "./polyfill.js",
                "./shapes/index.js",
                "./shapes/circle",
                "../shared",
                "./util",
                "./string",
            ]
        );
    }

    #[test]
    fn test_scan_ignores_member_require() {
        assert!(scan("loader.require('./plugin')").is_empty());
    }

    #[test]
    fn test_resolve_dependency_order() {
        let (_dir, root) = project(&[
            ("src/helpers.js", "export const extend = Object.assign;"),
            (
                "src/index.js",
                "import { Stage } from './stage';\nimport { draw } from './draw/index.js';",
            ),
            ("src/stage.js", "import { draw } from './draw';"),
            ("src/draw/index.js", "export function draw() {}"),
        ]);

        let graph = resolve(
            &root,
            &["src/helpers.js".into(), "src/./index.js".into()],
        )
        .unwrap();

        let order: Vec<_> = graph.modules.iter().map(|m| m.path.as_str()).collect();
        assert_eq!(
            order,
            ["src/helpers.js", "src/draw/index.js", "src/stage.js", "src/index.js"]
        );

        let index = graph.get(graph.entries[1]).unwrap();
        assert_eq!(index.path, "src/index.js");
        assert_eq!(index.deps.len(), 2);
        assert_eq!(index.deps["./stage"], graph.modules[2].id);
    }

    #[test]
    fn test_resolve_cycle() {
        let (_dir, root) = project(&[
            ("a.js", "require('./b')"),
            ("b.js", "require('./a')"),
        ]);

        let graph = resolve(&root, &["a.js".into()]).unwrap();
        let order: Vec<_> = graph.modules.iter().map(|m| m.path.as_str()).collect();
        assert_eq!(order, ["b.js", "a.js"]);
    }

    #[test]
    fn test_resolve_missing_entry() {
        let (_dir, root) = project(&[]);
        assert!(matches!(
            resolve(&root, &["src/index.js".into()]),
            Err(ResolveError::MissingEntry(_))
        ));
    }

    #[test]
    fn test_resolve_unresolved_import() {
        let (_dir, root) = project(&[("src/index.js", "import './gone';")]);
        let err = resolve(&root, &["src/index.js".into()]).unwrap_err();
        assert!(matches!(
            err,
            ResolveError::Unresolved { ref specifier, .. } if specifier == "./gone"
        ));
    }

    #[test]
    fn test_normalize_path() {
        assert_eq!(normalize_path(Utf8Path::new("src/./a/../b.js")), "src/b.js");
        assert_eq!(normalize_path(Utf8Path::new("../x/./y")), "../x/y");
    }
}
