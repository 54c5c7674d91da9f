use anyhow::{Context, Result};
use chrono::Local;
use clap::Parser;
use rutest::cli::Cli;
use rutest::config::ConfigLoader;
use rutest::logger::{self, Verbosity};
use rutest::runner::{RunReport, TestReporter, TestRunner, TestSummary};
use std::process::ExitCode;

fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(1),
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::from(2)
        }
    }
}

/// 运行测试，全部通过时返回 true
fn run(cli: Cli) -> Result<bool> {
    // 初始化日志系统
    let verbosity = cli.verbosity();
    let capture = logger::init_logger(verbosity);

    let config = ConfigLoader::find_and_load(&cli.path)?;

    let mut options = config.run_options(&cli.path);
    options.filter = cli.filter.clone();
    options.extra_args = cli.extra_args.clone();
    if !cli.tags.is_empty() {
        options.tags = cli.tags.clone();
    }
    if cli.no_estimates {
        options.show_estimates = false;
    }
    if cli.no_store {
        options.persist_durations = false;
    }

    let reporter = TestReporter::new(verbosity == Verbosity::Verbose);
    if verbosity != Verbosity::Quiet {
        reporter.print_header(&cli.path.display().to_string());
    }

    let started_at = Local::now();
    let results = TestRunner::empty()
        .with_loader(config.toml_loader())
        .with_capture(capture)
        .run(&options)
        .with_context(|| format!("Failed to run tests in {}", cli.path.display()))?;

    let summary = TestSummary::from_results(&results);
    match verbosity {
        Verbosity::Quiet => reporter.print_quiet(&summary),
        _ if cli.table => {
            reporter.print_table(&results);
            reporter.print_summary(&summary);
        }
        _ => reporter.print_report(&results),
    }

    if let Some(path) = &cli.report {
        RunReport::new(&cli.path, started_at, results)
            .write_to(path)
            .with_context(|| format!("Failed to write report to {}", path.display()))?;
    }

    Ok(summary.failed == 0)
}
