use std::process::ExitCode;

use camino::Utf8PathBuf;
use clap::builder::FalseyValueParser;
use clap::{ArgAction, Parser};
use tracing_indicatif::IndicatifLayer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

use tasuki::{Environment, Mode, Project, RunError};

#[derive(Parser, Debug, Clone)]
#[command(version, about)]
struct Args {
    /// Tasks to run, in order.
    #[arg(default_value = "default")]
    tasks: Vec<String>,

    /// Path to the project file.
    #[arg(short, long, default_value = "tasuki.json")]
    config: Utf8PathBuf,

    /// Running inside continuous integration. Any value of `CI` other than
    /// empty, `0`, `false`, `no`, `off`, `n` or `f` counts.
    #[arg(
        long,
        env = "CI",
        action = ArgAction::Set,
        num_args = 0..=1,
        require_equals = true,
        default_value_t = false,
        default_missing_value = "true",
        value_parser = FalseyValueParser::new(),
    )]
    ci: bool,

    #[arg(short, long)]
    verbose: bool,
}

fn setup_logging(verbose: bool) {
    let filter = if verbose { "debug" } else { "info" };
    let indicatif_layer = IndicatifLayer::new();

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .without_time()
                .with_target(false)
                .with_writer(indicatif_layer.get_stderr_writer()),
        )
        .with(indicatif_layer)
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .init();
}

fn main() -> ExitCode {
    let args = Args::parse();
    setup_logging(args.verbose);

    let project = match Project::load(&args.config) {
        Ok(project) => project,
        Err(e) => {
            tracing::error!("{e}");
            return ExitCode::FAILURE;
        }
    };

    let graph = match tasuki::blueprint().finish() {
        Ok(graph) => graph,
        Err(e) => {
            tracing::error!("{e}");
            return ExitCode::FAILURE;
        }
    };

    let mode = if args.tasks.iter().any(|task| task == "watch") {
        Mode::Watch
    } else {
        Mode::Build
    };

    let env = Environment {
        mode,
        ci: args.ci,
        data: project,
    };

    match graph.run_many(&env, args.tasks.iter().map(String::as_str)) {
        Ok(diagnostics) => {
            tracing::debug!("task timings:\n{diagnostics}");
            if let Some((name, exec)) = diagnostics.slowest() {
                tracing::debug!("slowest task '{name}' took {:.2?}", exec.duration);
            }
            ExitCode::SUCCESS
        }
        Err(RunError::Terminated(code)) => ExitCode::from(code),
        Err(e) => {
            tracing::error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}
