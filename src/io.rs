use std::fmt::Display;
use std::fs;
use std::io::{ErrorKind, Write};
use std::sync::LazyLock;
use std::time::Instant;

use camino::{Utf8Path, Utf8PathBuf};
use console::Style;
use flate2::Compression;
use flate2::write::GzEncoder;
use indicatif::ProgressStyle;

use crate::error::CompressError;

const ANSI_BLUE: Style = Style::new().blue();

static STYLE_TASK: LazyLock<ProgressStyle> = LazyLock::new(|| {
    ProgressStyle::default_spinner()
        .template("{spinner:.green} [{elapsed}] {msg}")
        .expect("Error setting progress bar template")
});

pub(crate) fn style_task() -> ProgressStyle {
    STYLE_TASK.clone()
}

pub fn as_overhead(s: Instant) -> impl Display {
    let e = Instant::now();
    let f = format!("(+{}ms)", e.duration_since(s).as_millis());
    ANSI_BLUE.apply_to(f)
}

/// Outcome of a clean. Nothing in here is ever escalated as an error.
#[derive(Debug, Default)]
pub struct CleanReport {
    pub removed: Vec<Utf8PathBuf>,
    pub absent: Vec<Utf8PathBuf>,
    pub failed: Vec<(Utf8PathBuf, std::io::Error)>,
}

/// Deletes each path in turn, every attempt finishing before the next one
/// starts. A missing file is fine, any other failure is logged and recorded.
pub fn clean<'a>(paths: impl IntoIterator<Item = &'a Utf8Path>) -> CleanReport {
    let s = Instant::now();
    let mut report = CleanReport::default();

    for path in paths {
        match fs::remove_file(path) {
            Ok(()) => {
                tracing::debug!(%path, "removed");
                report.removed.push(path.to_path_buf());
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                report.absent.push(path.to_path_buf());
            }
            Err(e) => {
                tracing::warn!(%path, "couldn't remove: {e}");
                report.failed.push((path.to_path_buf(), e));
            }
        }
    }

    tracing::info!(
        "Cleaned {} artifact(s) {}",
        report.removed.len(),
        as_overhead(s)
    );

    report
}

/// Gzips `source` at the best compression level into `<source>.gz`.
pub fn gzip(source: &Utf8Path) -> Result<Utf8PathBuf, CompressError> {
    let s = Instant::now();
    let target = Utf8PathBuf::from(format!("{source}.gz"));

    let data = fs::read(source).map_err(|source_err| CompressError {
        path: source.to_path_buf(),
        source: source_err,
    })?;

    let write = |target: &Utf8Path| -> std::io::Result<usize> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::best());
        encoder.write_all(&data)?;
        let compressed = encoder.finish()?;
        fs::write(target, &compressed)?;
        Ok(compressed.len())
    };

    let size = write(&target).map_err(|e| CompressError {
        path: target.clone(),
        source: e,
    })?;

    tracing::info!(
        "Compressed {} bytes into {} ({size} bytes) {}",
        data.len(),
        target,
        as_overhead(s)
    );

    Ok(target)
}

#[cfg(test)]
mod tests {
    use std::io::Read;

    use flate2::read::GzDecoder;

    use super::*;

    fn workspace() -> (tempfile::TempDir, Utf8PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::try_from(dir.path().to_path_buf()).unwrap();
        (dir, root)
    }

    #[test]
    fn test_clean_removes_and_tolerates_absence() {
        let (_dir, root) = workspace();
        let a = root.join("a.min.js");
        let b = root.join("a.min.js.map");
        fs::write(&a, "x").unwrap();

        let report = clean([a.as_path(), b.as_path()]);
        assert_eq!(report.removed, [a.clone()]);
        assert_eq!(report.absent, [b.clone()]);
        assert!(report.failed.is_empty());
        assert!(!a.exists());
    }

    #[test]
    fn test_clean_is_idempotent() {
        let (_dir, root) = workspace();
        let set = crate::core::ArtifactSet::new(&root, "lib");
        for path in set.paths() {
            fs::write(path, "x").unwrap();
        }

        let first = clean(set.paths());
        let second = clean(set.paths());

        assert_eq!(first.removed.len(), 5);
        assert!(second.removed.is_empty());
        assert_eq!(second.absent.len(), 5);
        assert!(set.paths().iter().all(|path| !path.exists()));
    }

    #[test]
    fn test_clean_records_failures() {
        let (_dir, root) = workspace();
        let dir = root.join("not-a-file");
        fs::create_dir(&dir).unwrap();

        let report = clean([dir.as_path()]);
        assert_eq!(report.failed.len(), 1);
        assert!(dir.exists());
    }

    #[test]
    fn test_gzip() {
        let (_dir, root) = workspace();
        let source = root.join("lib.min.js");
        let text = "function a(){return 1}".repeat(64);
        fs::write(&source, &text).unwrap();

        let target = gzip(&source).unwrap();
        assert_eq!(target, root.join("lib.min.js.gz"));

        let mut decoded = String::new();
        GzDecoder::new(fs::File::open(&target).unwrap())
            .read_to_string(&mut decoded)
            .unwrap();
        assert_eq!(decoded, text);
        assert!(fs::metadata(&target).unwrap().len() < text.len() as u64);
    }

    #[test]
    fn test_gzip_missing_source() {
        let (_dir, root) = workspace();
        let err = gzip(&root.join("missing.min.js")).unwrap_err();
        assert_eq!(err.path, root.join("missing.min.js"));
        assert!(!root.join("missing.min.js.gz").exists());
    }
}
