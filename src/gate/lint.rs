use std::collections::BTreeSet;
use std::process::Stdio;
use std::time::Instant;

use camino::{Utf8Path, Utf8PathBuf};
use glob::Pattern;
use serde::Deserialize;

use crate::core::LintConfig;
use crate::error::{LintError, ToolError};
use crate::io::as_overhead;

/// One file of an ESLint JSON report.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileReport {
    pub file_path: String,
    #[serde(default)]
    pub messages: Vec<Finding>,
    #[serde(default)]
    pub error_count: usize,
    #[serde(default)]
    pub warning_count: usize,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Finding {
    #[serde(default)]
    pub rule_id: Option<String>,
    /// 1 is a warning, 2 an error.
    pub severity: u8,
    pub message: String,
    #[serde(default)]
    pub line: Option<u32>,
    #[serde(default)]
    pub column: Option<u32>,
}

/// Counts over all linted files.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LintSummary {
    pub files: usize,
    pub errors: usize,
    pub warnings: usize,
}

/// Runs the linter over a set of files and hands back its raw JSON report.
pub trait Linter {
    fn lint(&self, root: &Utf8Path, files: &[Utf8PathBuf]) -> Result<String, ToolError>;
}

#[derive(Debug, Clone)]
pub struct Eslint {
    pub binary: Utf8PathBuf,
}

impl Linter for Eslint {
    fn lint(&self, root: &Utf8Path, files: &[Utf8PathBuf]) -> Result<String, ToolError> {
        let output = super::command(&self.binary, root)
            .arg("--format")
            .arg("json")
            .args(files.iter().map(|file| file.as_str()))
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .map_err(|e| ToolError::Spawn(self.binary.to_string(), e))?;

        // Exit code 1 means findings, anything else other than success means
        // the linter itself broke.
        if !matches!(output.status.code(), Some(0 | 1)) {
            let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
            return Err(ToolError::Status(
                self.binary.to_string(),
                output.status,
                stderr,
            ));
        }

        Ok(String::from_utf8(output.stdout)?)
    }
}

/// Files under `root` matching any include pattern and no exclude pattern,
/// relative to `root` and sorted.
pub fn sources(
    root: &Utf8Path,
    include: &[String],
    exclude: &[String],
) -> Result<Vec<Utf8PathBuf>, LintError> {
    let exclude = exclude
        .iter()
        .map(|pattern| Pattern::new(pattern))
        .collect::<Result<Vec<_>, _>>()?;

    let mut found = BTreeSet::new();

    for pattern in include {
        let pattern = root.join(pattern);
        for path in glob::glob(pattern.as_str())? {
            let path = Utf8PathBuf::try_from(path?)?;
            if !path.is_file() {
                continue;
            }

            let relative = path.strip_prefix(root).unwrap_or(&path).to_path_buf();
            if exclude.iter().any(|p| p.matches_path(relative.as_std_path())) {
                continue;
            }

            found.insert(relative);
        }
    }

    Ok(found.into_iter().collect())
}

/// Parses a JSON report and logs every finding.
pub fn summarize(report: &str) -> Result<LintSummary, LintError> {
    let files: Vec<FileReport> = serde_json::from_str(report).map_err(LintError::Report)?;
    let mut summary = LintSummary {
        files: files.len(),
        ..LintSummary::default()
    };

    for file in &files {
        summary.errors += file.error_count;
        summary.warnings += file.warning_count;

        for finding in &file.messages {
            let at = format!(
                "{}:{}:{}",
                file.file_path,
                finding.line.unwrap_or(0),
                finding.column.unwrap_or(0)
            );
            let rule = finding.rule_id.as_deref().unwrap_or("fatal");

            match finding.severity {
                2.. => tracing::error!("{at} {} ({rule})", finding.message),
                _ => tracing::warn!("{at} {} ({rule})", finding.message),
            }
        }
    }

    Ok(summary)
}

/// Lints the project. Any error finding fails the gate.
pub fn run(
    root: &Utf8Path,
    config: &LintConfig,
    linter: &impl Linter,
) -> Result<LintSummary, LintError> {
    let s = Instant::now();
    let files = sources(root, &config.include, &config.exclude)?;

    if files.is_empty() {
        tracing::warn!("Nothing to lint");
        return Ok(LintSummary::default());
    }

    let report = linter.lint(root, &files)?;
    let summary = summarize(&report)?;

    if summary.errors > 0 {
        return Err(LintError::Findings {
            errors: summary.errors,
            warnings: summary.warnings,
        });
    }

    tracing::info!(
        "Linted {} file(s), {} warning(s) {}",
        summary.files,
        summary.warnings,
        as_overhead(s)
    );

    Ok(summary)
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::fs;

    use super::*;

    struct Canned {
        report: &'static str,
        seen: RefCell<Vec<Utf8PathBuf>>,
    }

    impl Canned {
        fn new(report: &'static str) -> Self {
            Self {
                report,
                seen: RefCell::new(Vec::new()),
            }
        }
    }

    impl Linter for Canned {
        fn lint(&self, _: &Utf8Path, files: &[Utf8PathBuf]) -> Result<String, ToolError> {
            self.seen.borrow_mut().extend_from_slice(files);
            Ok(self.report.to_string())
        }
    }

    const CLEAN: &str = r#"[{"filePath":"/p/src/index.js","messages":[],"errorCount":0,"warningCount":0}]"#;

    const DIRTY: &str = r#"[
        {"filePath":"/p/src/index.js","messages":[
            {"ruleId":"no-undef","severity":2,"message":"'x' is not defined.","line":3,"column":5},
            {"ruleId":"no-unused-vars","severity":1,"message":"'y' is unused.","line":4,"column":7}
        ],"errorCount":1,"warningCount":1},
        {"filePath":"/p/src/helpers.js","messages":[],"errorCount":0,"warningCount":0}
    ]"#;

    fn project() -> (tempfile::TempDir, Utf8PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::try_from(dir.path().to_path_buf()).unwrap();
        for path in [
            "src/index.js",
            "src/helpers.js",
            "test/index.spec.js",
            "node_modules/dep/index.js",
            "docs/scripts/prettify.js",
            "coverage/lcov-report/sorter.js",
            "library.min.js",
            "karma.conf.js",
        ] {
            let path = root.join(path);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, "var a = 1;").unwrap();
        }
        (dir, root)
    }

    #[test]
    fn test_sources_honour_exclusions() {
        let (_dir, root) = project();
        let config = LintConfig::default();

        let files = sources(&root, &config.include, &config.exclude).unwrap();
        assert_eq!(
            files,
            [
                "karma.conf.js",
                "src/helpers.js",
                "src/index.js",
                "test/index.spec.js"
            ]
            .map(Utf8PathBuf::from)
        );
    }

    #[test]
    fn test_clean_report_passes() {
        let (_dir, root) = project();
        let linter = Canned::new(CLEAN);

        let summary = run(&root, &LintConfig::default(), &linter).unwrap();
        assert_eq!(summary.errors, 0);
        assert_eq!(linter.seen.borrow().len(), 4);
    }

    #[test]
    fn test_errors_fail_the_gate() {
        let (_dir, root) = project();
        let err = run(&root, &LintConfig::default(), &Canned::new(DIRTY)).unwrap_err();
        assert!(matches!(err, LintError::Findings { errors: 1, warnings: 1 }));
    }

    #[test]
    fn test_warnings_only_pass() {
        let summary = summarize(
            r#"[{"filePath":"a.js","messages":[{"severity":1,"message":"m"}],"errorCount":0,"warningCount":1}]"#,
        )
        .unwrap();
        assert_eq!(
            summary,
            LintSummary {
                files: 1,
                errors: 0,
                warnings: 1
            }
        );
    }

    #[test]
    fn test_unreadable_report_fails() {
        let (_dir, root) = project();
        let err = run(&root, &LintConfig::default(), &Canned::new("Oops! Something went wrong")).unwrap_err();
        assert!(matches!(err, LintError::Report(_)));
    }

    #[test]
    fn test_nothing_to_lint() {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::try_from(dir.path().to_path_buf()).unwrap();
        let linter = Canned::new(DIRTY);

        assert_eq!(
            run(&root, &LintConfig::default(), &linter).unwrap(),
            LintSummary::default()
        );
        assert!(linter.seen.borrow().is_empty());
    }
}
