//! Runtime helpers shared between modules.
//!
//! Converting a module to CommonJS, esbuild prefixes it with the runtime
//! helpers it needs (`__defProp`, `__export`, `__toCommonJS` and so on).
//! Modules are converted one at a time, so every module carries its own
//! copy. The leading helper declarations of each module are hoisted into a
//! single block that every module factory closes over.
//!
//! A helper stays in its module when its text differs from the one already
//! hoisted under the same name, or when it refers to the `require`,
//! `module` or `exports` bindings of the factory.

use std::sync::LazyLock;

use regex::Regex;

static DECLARATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^var (__[A-Za-z][\w$]*) = (\S)").expect("Error compiling helper pattern")
});

static FACTORY_BINDING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:^|[^.\w$])(?:require|module|exports)\b")
        .expect("Error compiling binding pattern")
});

/// Helpers hoisted so far, in the order they were first seen.
#[derive(Debug, Default)]
pub struct Helpers {
    hoisted: Vec<(String, String)>,
}

impl Helpers {
    /// Hoists the leading helper declarations of `code`. Returns the lines
    /// left for the module, each with its line index in `code`.
    pub fn hoist<'a>(&mut self, code: &'a str) -> Vec<(usize, &'a str)> {
        let lines: Vec<&str> = code.lines().collect();
        let mut kept = Vec::with_capacity(lines.len());
        let mut at = 0;

        while at < lines.len() {
            let line = lines[at];
            if is_directive(line) {
                kept.push((at, line));
                at += 1;
                continue;
            }

            let Some(name) = helper_name(line) else {
                break;
            };
            let Some(len) = statement_len(&lines[at..]) else {
                break;
            };

            let text = lines[at..at + len].join("\n");
            let shared = !FACTORY_BINDING.is_match(&text);

            match self.hoisted.iter().find(|(hoisted, _)| hoisted == name) {
                Some((_, existing)) if shared && *existing == text => {}
                None if shared => self.hoisted.push((name.to_string(), text)),
                _ => kept.extend((at..at + len).map(|i| (i, lines[i]))),
            }

            at += len;
        }

        kept.extend(lines.iter().copied().enumerate().skip(at));
        kept
    }

    pub fn len(&self) -> usize {
        self.hoisted.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hoisted.is_empty()
    }

    /// Lines of the hoisted block.
    pub fn lines(&self) -> impl Iterator<Item = &str> {
        self.hoisted.iter().flat_map(|(_, text)| text.lines())
    }
}

fn is_directive(line: &str) -> bool {
    matches!(line.trim(), "" | "\"use strict\";" | "'use strict';")
}

/// Name of the helper declared on `line`. Literal, object and array
/// initialisers hold state and are never helpers.
fn helper_name(line: &str) -> Option<&str> {
    let caps = DECLARATION.captures(line)?;
    let first = caps.get(2)?.as_str();
    if first.starts_with(|c: char| c.is_ascii_digit() || "\"'`{[-".contains(c)) {
        return None;
    }
    Some(caps.get(1)?.as_str())
}

/// Number of lines of the statement starting at `lines[0]`.
fn statement_len(lines: &[&str]) -> Option<usize> {
    let mut depth = 0i32;
    for (i, line) in lines.iter().enumerate() {
        for c in line.chars() {
            match c {
                '{' | '(' | '[' => depth += 1,
                '}' | ')' | ']' => depth -= 1,
                _ => {}
            }
        }
        if depth <= 0 && line.trim_end().ends_with(';') {
            return Some(i + 1);
        }
    }
    None
}
