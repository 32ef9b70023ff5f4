use std::io::Write;
use std::process::{Command, Stdio};

use camino::{Utf8Path, Utf8PathBuf};

use crate::bundle::sourcemap::{SourceMap, split_inline};
use crate::error::ToolError;

/// Code emitted by a tool, with the map back to its input when the tool
/// produced one.
#[derive(Debug, Clone)]
pub struct Emitted {
    pub code: String,
    pub map: Option<SourceMap>,
}

/// Downlevels the syntax of a single module.
pub trait Transform {
    fn transform(&self, path: &Utf8Path, source: &str) -> Result<Emitted, ToolError>;
}

/// Minifies a whole script.
pub trait Minify {
    fn minify(&self, name: &str, code: &str) -> Result<Emitted, ToolError>;
}

/// Both operations backed by the `esbuild` binary, fed through stdin.
#[derive(Debug, Clone)]
pub struct Esbuild {
    pub binary: Utf8PathBuf,
    pub target: String,
}

impl Esbuild {
    pub fn new(binary: impl Into<Utf8PathBuf>, target: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            target: target.into(),
        }
    }

    fn exec(&self, args: &[String], input: &str) -> Result<Emitted, ToolError> {
        let mut child = Command::new(&self.binary)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| ToolError::Spawn(self.binary.to_string(), e))?;

        if let Some(stdin) = child.stdin.as_mut() {
            stdin
                .write_all(input.as_bytes())
                .and_then(|_| stdin.flush())
                .map_err(|e| ToolError::Spawn(self.binary.to_string(), e))?;
        }

        let output = child
            .wait_with_output()
            .map_err(|e| ToolError::Spawn(self.binary.to_string(), e))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
            return Err(ToolError::Status(
                self.binary.to_string(),
                output.status,
                stderr,
            ));
        }

        let stdout = String::from_utf8(output.stdout)?;
        let (code, map) = split_inline(&stdout)?;

        Ok(Emitted {
            code: code.to_string(),
            map,
        })
    }
}

/// The runtime helpers esbuild prepends to each module are hoisted into one
/// shared block when the modules are concatenated.
impl Transform for Esbuild {
    fn transform(&self, path: &Utf8Path, source: &str) -> Result<Emitted, ToolError> {
        let args = [
            "--loader=js".to_string(),
            "--format=cjs".to_string(),
            format!("--target={}", self.target),
            "--sourcemap=inline".to_string(),
            "--sources-content=false".to_string(),
            format!("--sourcefile={path}"),
        ];
        self.exec(&args, source)
    }
}

impl Minify for Esbuild {
    fn minify(&self, name: &str, code: &str) -> Result<Emitted, ToolError> {
        let args = [
            "--loader=js".to_string(),
            "--minify".to_string(),
            format!("--target={}", self.target),
            "--sourcemap=inline".to_string(),
            "--sources-content=false".to_string(),
            format!("--sourcefile={name}"),
        ];
        self.exec(&args, code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_binary() {
        let esbuild = Esbuild::new("./definitely-not-esbuild", "es2015");
        let err = esbuild
            .transform(Utf8Path::new("src/index.js"), "export {}")
            .unwrap_err();
        assert!(matches!(err, ToolError::Spawn(..)));
    }
}
