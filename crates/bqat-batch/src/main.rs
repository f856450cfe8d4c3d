//! BQAT Batch - biometric quality assessment runner

use anyhow::{Context, Result};
use bqat_batch::cli::{BenchmarkArgs, Commands, EngineArgs, RunArgs};
use bqat_batch::{
    filter_table, generate_report, BatchConfig, BatchRun, Cli, CommandScanner,
    HtmlReportRenderer,
};
use bqat_common::logging::{init_logging, LogConfig, LogLevel};
use clap::Parser;
use serde_json::json;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use tracing::{error, info};

fn main() {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let log_config = LogConfig::builder()
        .level(if cli.verbose {
            LogLevel::Debug
        } else {
            LogLevel::Info
        })
        .log_file_prefix("bqat-batch")
        .build();

    // Environment variables take precedence
    let log_config = log_config.clone().merge_env().unwrap_or(log_config);
    let _guard = match init_logging(&log_config) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Warning: logging disabled: {e:#}");
            None
        }
    };

    if let Err(e) = execute(cli.command) {
        error!(error = %e, "Command failed");
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}

fn execute(command: Commands) -> Result<()> {
    match command {
        Commands::Run(args) => run(&args),
        Commands::Filter { input, filter, cwd } => {
            let renderer = HtmlReportRenderer::new(link_root(cwd)?);
            let artifacts = filter_table(&input, &filter.to_request(), &renderer)
                .with_context(|| format!("Failed to filter {}", input.display()))?;
            match artifacts {
                Some(artifacts) => print_summary(&json!({ "Output Filter": artifacts }))?,
                None => info!("Filter produced no output"),
            }
            Ok(())
        }
        Commands::Report { input, cwd } => {
            let renderer = HtmlReportRenderer::new(link_root(cwd)?);
            let artifacts = generate_report(&input, &renderer)
                .with_context(|| format!("Failed to report on {}", input.display()))?;
            match artifacts {
                Some(artifacts) => print_summary(&json!({ "EDA Report": artifacts }))?,
                None => info!("Table is empty, no report generated"),
            }
            Ok(())
        }
        Commands::Benchmark(args) => benchmark(&args),
    }
}

fn run(args: &RunArgs) -> Result<()> {
    let mut config = batch_config(&args.engine)?;
    config.reporting = args.reporting;
    let scanner = scanner(&args.engine, &config);

    let batch = BatchRun::new(config, scanner)?;
    let summary = batch.execute(&args.to_request())?;
    print_summary(&serde_json::to_value(&summary)?)
}

fn benchmark(args: &BenchmarkArgs) -> Result<()> {
    let config = batch_config(&args.engine)?;
    let scanner = scanner(&args.engine, &config);

    let batch = BatchRun::new(config, scanner)?;
    let summary = batch.benchmark(&args.to_request())?;
    print_summary(&serde_json::to_value(&summary)?)
}

fn batch_config(engine: &EngineArgs) -> Result<BatchConfig> {
    let mut config = BatchConfig::from_env().context("Invalid batch configuration")?;
    config.single |= engine.single;
    config.show_progress = true;
    if let Some(workers) = engine.workers {
        config.workers = workers;
    }
    Ok(config)
}

fn scanner(engine: &EngineArgs, config: &BatchConfig) -> Arc<CommandScanner> {
    let mut scanner =
        CommandScanner::new(&engine.scanner).with_granularity(engine.granularity.into());
    if let Some(ref counter) = engine.counter_file {
        scanner = scanner.counter_file(counter, config.counter_lines_per_item);
    }
    Arc::new(scanner)
}

fn link_root(cwd: Option<PathBuf>) -> Result<PathBuf> {
    match cwd {
        Some(dir) => Ok(dir),
        None => std::env::current_dir().context("Failed to read current directory"),
    }
}

fn print_summary(summary: &serde_json::Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(summary)?);
    Ok(())
}
