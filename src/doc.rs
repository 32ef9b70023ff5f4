use std::time::Instant;

use anyhow::Context;

use crate::core::Project;
use crate::error::ToolError;
use crate::io::as_overhead;

/// Generates API documentation for the entry modules with `jsdoc`.
pub fn generate(project: &Project) -> anyhow::Result<()> {
    let s = Instant::now();
    let binary = project.binary(&project.doc.binary);

    let status = crate::gate::command(&binary, &project.root)
        .args(project.entries.iter().map(|entry| entry.as_str()))
        .arg("--destination")
        .arg(project.doc.out.as_str())
        .status()
        .map_err(|e| ToolError::Spawn(binary.to_string(), e))?;

    if !status.success() {
        return Err(ToolError::Status(binary.to_string(), status, String::new()))
            .context("Documentation generation failed");
    }

    tracing::info!(
        "Generated documentation into {} {}",
        project.path(&project.doc.out),
        as_overhead(s)
    );

    Ok(())
}
