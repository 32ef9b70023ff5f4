//! The tasks of the command line runner.

use std::time::Duration;

use anyhow::Context;
use tracing_indicatif::indicatif_println;
use tracing_indicatif::span_ext::IndicatifSpanExt;

use crate::blueprint::Blueprint;
use crate::bundle::Bundler;
use crate::bundle::tool::Esbuild;
use crate::core::{Mode, Project};
use crate::coverage::badge::{self, BadgeOutcome};
use crate::gate::e2e::{self, Protractor};
use crate::gate::lint::{self, Eslint};
use crate::gate::spec::{self, Karma};

/// Declares every task of the runner.
pub fn blueprint() -> Blueprint<Project> {
    let mut bp: Blueprint<Project> = Blueprint::new();

    bp.task("default")
        .about("Same as help")
        .run(|ctx| ctx.run("help"));

    bp.task("help").about("List the available tasks").run(|ctx| {
        indicatif_println!("Tasks:\n{}", ctx.graph());
        Ok(())
    });

    bp.task("clean")
        .about("Remove build outputs")
        .run(|ctx| {
            crate::io::clean(ctx.env.data.artifacts().paths());
            Ok(())
        });

    bp.task("doc")
        .about("Generate API documentation")
        .run(|ctx| crate::doc::generate(&ctx.env.data));

    bp.task("build")
        .about("Bundle, minify and map the library")
        .depends_on(["clean"])
        .run(|ctx| match build(&ctx.env.data) {
            // A broken bundle must not keep the watcher from starting.
            Err(e) if ctx.env.mode == Mode::Watch => {
                tracing::error!("Build failed, waiting for changes:\n{e:#}");
                Ok(())
            }
            result => result,
        });

    bp.task("watch")
        .about("Rebuild on source changes")
        .depends_on(["build"])
        .run(|ctx| {
            ctx.span.pb_set_message("Watching");
            watch(ctx)
        });

    bp.task("gzip")
        .about("Compress the minified bundle")
        .depends_on(["build"])
        .run(|ctx| {
            crate::io::gzip(&ctx.env.data.artifacts().minified)?;
            Ok(())
        });

    bp.task("lint")
        .about("Run the linter over the sources")
        .run(|ctx| {
            let project = &ctx.env.data;
            let eslint = Eslint {
                binary: project.binary(&project.lint.binary),
            };
            lint::run(&project.root, &project.lint, &eslint)?;
            Ok(())
        });

    bp.task("test:spec")
        .about("Run the unit tests once in a headless browser")
        .depends_on(["lint"])
        .run(|ctx| {
            let project = &ctx.env.data;
            let karma = Karma {
                binary: project.binary(&project.spec.binary),
                root: project.root.clone(),
            };
            spec::run(&karma, &project.spec.config)?;
            Ok(())
        });

    bp.task("test:e2e")
        .about("Run the end-to-end suite, then publish the coverage badge")
        .run(|ctx| {
            let project = &ctx.env.data;
            let protractor = Protractor {
                binary: project.binary(&project.e2e.binary),
                root: project.root.clone(),
            };
            let delay = Duration::from_millis(project.e2e.ci_exit_delay_ms);

            e2e::run(&protractor, &project.e2e.config, ctx.env.ci, delay)?;

            let outcome = badge::generate(&project.root, &project.coverage)
                .context("Coverage badge generation failed")?;
            if let BadgeOutcome::Skipped(summary) = outcome {
                tracing::warn!("Badge not updated, coverage is {}", summary.percentage);
            }
            Ok(())
        });

    bp.task("test")
        .about("Lint, unit test, then run the end-to-end suite")
        .depends_on(["test:spec"])
        .run(|ctx| ctx.run("test:e2e"));

    bp
}

fn build(project: &Project) -> anyhow::Result<()> {
    let esbuild = Esbuild::new(project.binary(&project.esbuild), &project.target);

    let report = Bundler::new(project, esbuild.clone(), esbuild).run()?;
    if report.truncated {
        tracing::warn!(
            "Bundle is incomplete, {} of {} module(s) made it",
            report.bundled,
            report.found
        );
    }
    Ok(())
}

#[cfg(feature = "live")]
fn watch(ctx: &crate::TaskContext<'_, Project>) -> anyhow::Result<()> {
    let project = &ctx.env.data;
    crate::engine::watch(ctx.graph(), ctx.env, &project.root, &project.watch, "build")?;
    Ok(())
}

#[cfg(not(feature = "live"))]
fn watch(_: &crate::TaskContext<'_, Project>) -> anyhow::Result<()> {
    anyhow::bail!("Watching needs the `live` feature")
}
