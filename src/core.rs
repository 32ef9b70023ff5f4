use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// A 32-byte BLAKE3 hash used for change detection.
///
/// The watcher fingerprints every source file it sees, so that a save which
/// leaves the contents untouched does not trigger a rebuild.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub(crate) struct Hash32([u8; 32]);

impl<T> From<T> for Hash32
where
    T: Into<[u8; 32]>,
{
    fn from(value: T) -> Self {
        Hash32(value.into())
    }
}

impl Hash32 {
    pub(crate) fn hash(buffer: impl AsRef<[u8]>) -> Self {
        blake3::Hasher::new()
            .update(buffer.as_ref())
            .finalize()
            .into()
    }

    pub(crate) fn hash_file(path: impl AsRef<std::path::Path>) -> std::io::Result<Self> {
        fs::read(path).map(Self::hash)
    }

    pub(crate) fn to_hex(self) -> String {
        const HEX: &[u8; 16] = b"0123456789abcdef";
        let mut acc = String::with_capacity(64);

        for &byte in self.0.iter() {
            acc.push(HEX[(byte >> 4) as usize] as char);
            acc.push(HEX[(byte & 0xF) as usize] as char);
        }

        acc
    }
}

impl std::fmt::Debug for Hash32 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Hash32({})", self.to_hex())
    }
}

/// The mode in which the runner was started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Run the requested tasks once and exit.
    Build,
    /// Keep running and rebuild on source changes.
    Watch,
}

/// Global configuration and state available to all tasks.
///
/// # Type Parameters
///
/// * `G`: The type of the user-defined global data. For the command line
///   runner this is the loaded [`Project`].
#[derive(Debug, Clone)]
pub struct Environment<G: Send + Sync = ()> {
    /// The current mode (Build or Watch).
    pub mode: Mode,
    /// Whether we run inside continuous integration.
    pub ci: bool,
    /// User-defined global data.
    pub data: G,
}

impl<G: Send + Sync> Environment<G> {
    pub fn new(data: G) -> Self {
        Self {
            mode: Mode::Build,
            ci: false,
            data,
        }
    }
}

/// The fixed set of files produced by one build, in production order:
/// bundle, minified bundle with its map, gzip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactSet {
    pub bundle: Utf8PathBuf,
    pub bundle_map: Utf8PathBuf,
    pub minified: Utf8PathBuf,
    pub minified_map: Utf8PathBuf,
    pub gzip: Utf8PathBuf,
}

impl ArtifactSet {
    pub fn new(dir: impl AsRef<Utf8Path>, name: &str) -> Self {
        let dir = dir.as_ref();
        Self {
            bundle: dir.join(format!("{name}.js")),
            bundle_map: dir.join(format!("{name}.js.map")),
            minified: dir.join(format!("{name}.min.js")),
            minified_map: dir.join(format!("{name}.min.js.map")),
            gzip: dir.join(format!("{name}.min.js.gz")),
        }
    }

    /// Every artifact path, in the order they are cleaned.
    pub fn paths(&self) -> [&Utf8Path; 5] {
        [
            &self.bundle,
            &self.bundle_map,
            &self.minified,
            &self.minified_map,
            &self.gzip,
        ]
    }
}

/// What to do when the badge service cannot be reached.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FetchErrorPolicy {
    /// Log the error and finish successfully.
    #[default]
    Ignore,
    /// Fail the task.
    Fail,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LintConfig {
    pub binary: String,
    pub include: Vec<String>,
    pub exclude: Vec<String>,
}

impl Default for LintConfig {
    fn default() -> Self {
        Self {
            binary: "eslint".into(),
            include: vec!["**/*.js".into()],
            exclude: vec![
                "node_modules/**".into(),
                "docs/**".into(),
                "coverage/**".into(),
                "**/*.min.js".into(),
            ],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SpecConfig {
    pub binary: String,
    pub config: Utf8PathBuf,
}

impl Default for SpecConfig {
    fn default() -> Self {
        Self {
            binary: "karma".into(),
            config: "karma.conf.js".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct E2eConfig {
    pub binary: String,
    pub config: Utf8PathBuf,
    /// Pause before moving on when running in CI, so browser sessions close.
    pub ci_exit_delay_ms: u64,
}

impl Default for E2eConfig {
    fn default() -> Self {
        Self {
            binary: "protractor".into(),
            config: "protractor.conf.js".into(),
            ci_exit_delay_ms: 1000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CoverageConfig {
    pub report: Utf8PathBuf,
    pub badge: Utf8PathBuf,
    pub service: String,
    pub threshold: f64,
    pub on_fetch_error: FetchErrorPolicy,
}

impl Default for CoverageConfig {
    fn default() -> Self {
        Self {
            report: "coverage/coverage.txt".into(),
            badge: "coverage.svg".into(),
            service: "https://img.shields.io".into(),
            threshold: 90.0,
            on_fetch_error: FetchErrorPolicy::Ignore,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DocConfig {
    pub binary: String,
    pub out: Utf8PathBuf,
}

impl Default for DocConfig {
    fn default() -> Self {
        Self {
            binary: "jsdoc".into(),
            out: "docs".into(),
        }
    }
}

/// Project layout and tool contract, read from `tasuki.json`.
///
/// Every field has a default, so a missing file or a partial one is fine.
/// Relative paths are resolved against `root`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Project {
    pub root: Utf8PathBuf,
    /// Base name of the produced artifacts, `<name>.min.js` and friends.
    pub name: String,
    /// Entry modules, the helpers module first.
    pub entries: Vec<Utf8PathBuf>,
    pub out_dir: Utf8PathBuf,
    pub esbuild: String,
    /// Language level passed to the transpiler.
    pub target: String,
    /// Also persist the unminified bundle and its map.
    pub keep_unminified: bool,
    pub watch: Vec<String>,
    pub lint: LintConfig,
    pub spec: SpecConfig,
    pub e2e: E2eConfig,
    pub coverage: CoverageConfig,
    pub doc: DocConfig,
}

impl Default for Project {
    fn default() -> Self {
        Self {
            root: ".".into(),
            name: "library".into(),
            entries: vec!["src/helpers.js".into(), "src/index.js".into()],
            out_dir: ".".into(),
            esbuild: "esbuild".into(),
            target: "es2015".into(),
            keep_unminified: false,
            watch: vec!["src/**/*.js".into()],
            lint: LintConfig::default(),
            spec: SpecConfig::default(),
            e2e: E2eConfig::default(),
            coverage: CoverageConfig::default(),
            doc: DocConfig::default(),
        }
    }
}

impl Project {
    /// Loads the project from a JSON file, falling back to the defaults
    /// when the file does not exist.
    pub fn load(path: impl AsRef<Utf8Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();

        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(%path, "no config file, using defaults");
                let root = path.parent().filter(|p| !p.as_str().is_empty());
                return Ok(Self {
                    root: root.map(Utf8Path::to_path_buf).unwrap_or_else(|| ".".into()),
                    ..Self::default()
                });
            }
            Err(e) => return Err(ConfigError::Read(path.to_path_buf(), e)),
        };

        let mut project: Project =
            serde_json::from_str(&text).map_err(|e| ConfigError::Parse(path.to_path_buf(), e))?;

        if project.root == "."
            && let Some(parent) = path.parent().filter(|p| !p.as_str().is_empty())
        {
            project.root = parent.to_path_buf();
        }

        Ok(project)
    }

    /// Resolves a project-relative path.
    pub fn path(&self, path: impl AsRef<Utf8Path>) -> Utf8PathBuf {
        self.root.join(path)
    }

    pub fn artifacts(&self) -> ArtifactSet {
        ArtifactSet::new(self.path(&self.out_dir), &self.name)
    }

    /// Locates a node tool, preferring the project's local install.
    pub fn binary(&self, name: &str) -> Utf8PathBuf {
        let local = self.root.join("node_modules/.bin").join(name);
        if local.is_file() {
            local
        } else {
            Utf8PathBuf::from(name)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_artifact_paths() {
        let set = ArtifactSet::new("out", "widgets");
        assert_eq!(set.minified, Utf8Path::new("out/widgets.min.js"));
        assert_eq!(set.minified_map, Utf8Path::new("out/widgets.min.js.map"));
        assert_eq!(set.gzip, Utf8Path::new("out/widgets.min.js.gz"));
        assert_eq!(set.paths().len(), 5);
    }

    #[test]
    fn test_partial_config() {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8Path::from_path(dir.path()).unwrap();
        let path = root.join("tasuki.json");
        fs::write(
            &path,
            r#"{ "name": "canvas", "coverage": { "threshold": 80.0, "on_fetch_error": "fail" } }"#,
        )
        .unwrap();

        let project = Project::load(&path).unwrap();
        assert_eq!(project.name, "canvas");
        assert_eq!(project.root, root);
        assert_eq!(project.coverage.threshold, 80.0);
        assert_eq!(project.coverage.on_fetch_error, FetchErrorPolicy::Fail);
        assert_eq!(project.coverage.service, "https://img.shields.io");
        assert_eq!(project.spec.config, Utf8Path::new("karma.conf.js"));
        assert_eq!(project.artifacts().minified, root.join("canvas.min.js"));
    }

    #[test]
    fn test_missing_config() {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8Path::from_path(dir.path()).unwrap();

        let project = Project::load(root.join("tasuki.json")).unwrap();
        assert_eq!(project.root, root);
        assert_eq!(project.name, "library");
    }

    #[test]
    fn test_unknown_field() {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8Path::from_path(dir.path()).unwrap();
        let path = root.join("tasuki.json");
        fs::write(&path, r#"{ "nmae": "typo" }"#).unwrap();

        assert!(matches!(Project::load(&path), Err(ConfigError::Parse(..))));
    }

    #[test]
    fn test_hash_hex() {
        let hash = Hash32::hash(b"abc");
        assert_eq!(hash.to_hex().len(), 64);
        assert_eq!(hash, Hash32::hash(b"abc"));
        assert_ne!(hash, Hash32::hash(b"abd"));
    }
}
