//! Joins transformed modules into one script that loads without a module
//! system.
//!
//! Every module becomes a factory registered under its numeric id, together
//! with a table from the specifiers it imports to the ids they resolved to.
//! Specifiers missing from that table are looked up on the global object,
//! which is how bare imports of peer libraries work. Runtime helpers the
//! modules share are hoisted once, right after the registry.

use crate::bundle::graph::Module;
use crate::bundle::helpers::Helpers;
use crate::bundle::sourcemap::{Origin, Segment, SourceMap, SourceMapBuilder};
use crate::bundle::tool::Emitted;
use crate::error::SourceMapError;

const PRELUDE: &str = r#"(function (global) {
  "use strict";
  var defined = {};
  var cache = {};
  function __define(id, deps, factory) {
    defined[id] = { deps: deps, factory: factory };
  }
  function __load(id) {
    if (cache[id]) return cache[id].exports;
    var def = defined[id];
    var module = (cache[id] = { exports: {} });
    def.factory.call(module.exports, module, module.exports, function (specifier) {
      return Object.prototype.hasOwnProperty.call(def.deps, specifier)
        ? __load(def.deps[specifier])
        : global[specifier];
    });
    return module.exports;
  }"#;

const EPILOGUE: &str = r#"})(typeof globalThis !== "undefined" ? globalThis : this);"#;

/// A module after the transform stage.
#[derive(Debug, Clone)]
pub struct Unit<'a> {
    pub module: &'a Module,
    pub emitted: Emitted,
}

/// The single script and its map back to the original modules.
#[derive(Debug, Clone)]
pub struct Concatenated {
    pub code: String,
    pub map: SourceMap,
}

impl Concatenated {
    /// The stream a bundle with no modules turns into.
    pub fn empty(file: &str) -> Self {
        Self {
            code: String::new(),
            map: SourceMapBuilder::new().build(Some(file.to_string())),
        }
    }
}

struct Script {
    code: String,
    builder: SourceMapBuilder,
}

impl Script {
    fn blank(&mut self, line: &str) {
        self.code.push_str(line);
        self.code.push('\n');
        self.builder.push_blank(1);
    }

    fn mapped(&mut self, line: &str, segments: Vec<Segment>) {
        self.code.push_str(line);
        self.code.push('\n');
        self.builder.push_line(segments);
    }
}

/// Concatenates `units` in order. The exports of the last entry that made
/// it into the bundle are published as `global[name]`.
///
/// No units means an empty script with an empty map.
pub fn concat(
    name: &str,
    file: &str,
    units: &[Unit<'_>],
    entries: &[usize],
) -> Result<Concatenated, SourceMapError> {
    if units.is_empty() {
        return Ok(Concatenated::empty(file));
    }

    let mut script = Script {
        code: String::new(),
        builder: SourceMapBuilder::new(),
    };

    let mut helpers = Helpers::default();
    let bodies: Vec<_> = units
        .iter()
        .map(|unit| helpers.hoist(&unit.emitted.code))
        .collect();

    for line in PRELUDE.lines() {
        script.blank(line);
    }

    if !helpers.is_empty() {
        tracing::debug!("hoisted {} shared helper(s)", helpers.len());
        for line in helpers.lines() {
            script.blank(line);
        }
    }

    for (unit, body) in units.iter().zip(&bodies) {
        append(&mut script, unit, body)?;
    }

    let present: Vec<usize> = entries
        .iter()
        .copied()
        .filter(|id| units.iter().any(|unit| unit.module.id == *id))
        .collect();

    if let Some((last, rest)) = present.split_last() {
        for id in rest {
            script.blank(&format!("  __load({id});"));
        }
        let key = serde_json::to_string(name)?;
        script.blank(&format!("  global[{key}] = __load({last});"));
    }

    script.blank(EPILOGUE);

    Ok(Concatenated {
        code: script.code,
        map: script.builder.build(Some(file.to_string())),
    })
}

/// Appends one module factory. `body` holds the lines of the emitted code
/// left after hoisting, with their index in the emitted code.
fn append(
    script: &mut Script,
    unit: &Unit<'_>,
    body: &[(usize, &str)],
) -> Result<(), SourceMapError> {
    let module = unit.module;
    let deps = serde_json::to_string(&module.deps)?;
    script.blank(&format!(
        "__define({}, {deps}, function (module, exports, require) {{",
        module.id
    ));

    match &unit.emitted.map {
        Some(upstream) => {
            let lines = upstream.lines()?;

            let sources: Vec<u32> = (0..upstream.sources.len() as u32)
                .map(|i| {
                    let path = upstream.source(i).unwrap_or_default();
                    let content = upstream
                        .content(i)
                        .or((path == module.path.as_str()).then_some(module.source.as_str()));
                    script.builder.add_source(&path, content)
                })
                .collect();

            for &(index, line) in body {
                let mut segments = Vec::new();

                for segment in lines.get(index).into_iter().flatten() {
                    let origin = match segment.origin {
                        Some(origin) => Some(Origin {
                            source: sources
                                .get(origin.source as usize)
                                .copied()
                                .ok_or(SourceMapError::SourceIndex(origin.source))?,
                            name: origin
                                .name
                                .and_then(|n| upstream.names.get(n as usize))
                                .map(|n| script.builder.add_name(n)),
                            ..origin
                        }),
                        None => None,
                    };
                    segments.push(Segment {
                        column: segment.column,
                        origin,
                    });
                }

                script.mapped(line, segments);
            }
        }
        // Without a map each generated line is taken to be the same line of
        // the original.
        None => {
            let source = script
                .builder
                .add_source(module.path.as_str(), Some(&module.source));

            for &(index, line) in body {
                let segment = Segment {
                    column: 0,
                    origin: Some(Origin {
                        source,
                        line: index as u32,
                        column: 0,
                        name: None,
                    }),
                };
                script.mapped(line, vec![segment]);
            }
        }
    }

    script.blank("});");
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::bundle::sourcemap::lookup;

    fn module(id: usize, path: &str, source: &str, deps: &[(&str, usize)]) -> Module {
        Module {
            id,
            path: path.into(),
            source: source.to_string(),
            deps: deps
                .iter()
                .map(|(k, v)| (k.to_string(), *v))
                .collect::<BTreeMap<_, _>>(),
        }
    }

    fn unit(module: &Module) -> Unit<'_> {
        Unit {
            module,
            emitted: Emitted {
                code: module.source.clone(),
                map: None,
            },
        }
    }

    #[test]
    fn test_empty() {
        let out = concat("canvas", "canvas.js", &[], &[0]).unwrap();
        assert!(out.code.is_empty());
        assert!(out.map.sources.is_empty());
        assert_eq!(out.map.mappings, "");
    }

    #[test]
    fn test_layout() {
        let helpers = module(0, "src/helpers.js", "exports.a = 1;", &[]);
        let index = module(
            1,
            "src/index.js",
            "var h = require(\"./helpers\");\nexports.b = h.a;",
            &[("./helpers", 0)],
        );

        let out = concat("canvas", "canvas.js", &[unit(&helpers), unit(&index)], &[0, 1]).unwrap();

        assert!(out.code.starts_with("(function (global) {\n"));
        assert!(out.code.contains("__define(0, {}, function (module, exports, require) {\nexports.a = 1;\n});"));
        assert!(out.code.contains("__define(1, {\"./helpers\":0}, function"));
        assert!(out.code.contains("  __load(0);\n  global[\"canvas\"] = __load(1);\n"));
        assert!(out.code.ends_with("})(typeof globalThis !== \"undefined\" ? globalThis : this);\n"));

        assert_eq!(out.map.sources, ["src/helpers.js", "src/index.js"]);
        assert_eq!(out.map.file.as_deref(), Some("canvas.js"));
    }

    #[test]
    fn test_identity_mapping_lines() {
        let index = module(0, "src/index.js", "var a = 1;\nvar b = 2;", &[]);
        let out = concat("canvas", "canvas.js", &[unit(&index)], &[0]).unwrap();

        let lines = out.map.lines().unwrap();
        let generated: Vec<_> = out.code.lines().collect();
        let at = generated.iter().position(|l| *l == "var b = 2;").unwrap();

        let origin = lookup(&lines, at as u32, 4).unwrap();
        assert_eq!(origin.line, 1);
        assert_eq!(out.map.content(origin.source), Some("var a = 1;\nvar b = 2;"));
    }

    #[test]
    fn test_upstream_map_is_carried() {
        let index = module(0, "src/index.js", "const a = 1;", &[]);

        let mut upstream = SourceMapBuilder::new();
        let source = upstream.add_source("src/index.js", None);
        upstream.push_line(vec![Segment {
            column: 4,
            origin: Some(Origin {
                source,
                line: 0,
                column: 6,
                name: None,
            }),
        }]);

        let unit = Unit {
            module: &index,
            emitted: Emitted {
                code: "var a = 1;".into(),
                map: Some(upstream.build(None)),
            },
        };

        let out = concat("canvas", "canvas.js", &[unit], &[0]).unwrap();
        let lines = out.map.lines().unwrap();
        let at = out.code.lines().position(|l| l == "var a = 1;").unwrap();

        let origin = lookup(&lines, at as u32, 4).unwrap();
        assert_eq!(origin.column, 6);
        assert_eq!(out.map.content(origin.source), Some("const a = 1;"));
        assert_eq!(lookup(&lines, at as u32, 0), None);
    }

    #[test]
    fn test_shared_helpers_appear_once() {
        const HEADER: &str = "var __defProp = Object.defineProperty;\nvar __export = (target, all) => {\n  for (var name in all)\n    __defProp(target, name, { get: all[name], enumerable: true });\n};\n";

        let shape = module(0, "src/shape.js", "export const side = 2;", &[]);
        let index = module(1, "src/index.js", "export { side } from './shape';", &[("./shape", 0)]);
        fn emitted<'a>(module: &'a Module, body: &str) -> Unit<'a> {
            Unit {
                module,
                emitted: Emitted {
                    code: format!("{HEADER}{body}"),
                    map: None,
                },
            }
        }
        let units = [
            emitted(&shape, "var shape_exports = {};\nexports.side = 2;"),
            emitted(&index, "var index_exports = {};\nexports.side = require(\"./shape\").side;"),
        ];

        let out = concat("canvas", "canvas.js", &units, &[1]).unwrap();

        assert_eq!(out.code.matches("var __defProp = Object.defineProperty;").count(), 1);
        assert_eq!(out.code.matches("var __export = ").count(), 1);
        let hoisted = out.code.find("var __defProp").unwrap();
        assert!(hoisted < out.code.find("__define(0").unwrap());

        // the module keeps pointing at its own line of the emitted code
        let lines = out.map.lines().unwrap();
        let at = out.code.lines().position(|l| l == "exports.side = 2;").unwrap();
        let origin = lookup(&lines, at as u32, 0).unwrap();
        assert_eq!(origin.line, 6);
        assert_eq!(out.map.source(origin.source).as_deref(), Some("src/shape.js"));
    }

    #[test]
    fn test_upstream_missing_source() {
        let index = module(0, "src/index.js", "const a = 1;", &[]);
        let unit = Unit {
            module: &index,
            emitted: Emitted {
                code: "var a = 1;".into(),
                map: Some(SourceMap {
                    version: 3,
                    sources: vec!["src/index.js".into()],
                    mappings: "ACAA".into(),
                    ..SourceMap::default()
                }),
            },
        };

        assert!(matches!(
            concat("canvas", "canvas.js", &[unit], &[0]),
            Err(SourceMapError::SourceIndex(1))
        ));
    }

    #[test]
    fn test_truncated_entries_are_skipped() {
        let helpers = module(0, "src/helpers.js", "exports.a = 1;", &[]);
        let out = concat("canvas", "canvas.js", &[unit(&helpers)], &[0, 1]).unwrap();
        assert!(out.code.contains("global[\"canvas\"] = __load(0);"));
        assert!(!out.code.contains("__load(1)"));
    }
}
