//! Build automation tasks for BQAT
//!
//! Currently generates the CLI reference from the clap definitions.

use clap::Parser;
use std::fs;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "xtask")]
#[command(about = "Build automation tasks for BQAT", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Parser)]
enum Command {
    /// Generate the CLI reference in Markdown
    GenerateCliDocs {
        /// Output directory for generated documentation
        #[arg(short, long, default_value = "docs")]
        output_dir: String,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::GenerateCliDocs { output_dir } => generate_cli_docs(&output_dir)?,
    }

    Ok(())
}

fn generate_cli_docs(output_dir: &str) -> anyhow::Result<()> {
    println!("Generating CLI documentation...");

    let markdown = clap_markdown::help_markdown::<bqat_batch::Cli>();

    let content = format!(
        r#"---
title: CLI Reference
description: Command reference for bqat-batch
---

# bqat-batch CLI Reference

This documentation is auto-generated from the CLI source code. Last updated: {}.

## Overview

`bqat-batch` assesses every biometric sample under an input directory with an
external scanner, aggregates the results into a CSV table and a JSON run log,
and optionally renders a report and a filtered subset of the table.

## Quick Start

```bash
# Assess face images, 8 workers
bqat-batch run --mode face --input data/face --workers 8

# Only the first 100 PNG files, then keep the sharp ones
bqat-batch run -m face -i data/face -t png -l 100 -q "sharpness > 40"

# Speech is scanned per directory
bqat-batch run -m speech -i data/speech --granularity directory --counter-file data/engine.log

# Throughput on 100 copies of a sample set, nothing written
bqat-batch benchmark -m face -i tests/samples/face --replicas 100

# Post-process an existing table
bqat-batch filter -i data/output/output_face_18-01-2024_10-00-00.csv -a sharpness --sort sharpness
bqat-batch report -i data/output/output_face_18-01-2024_10-00-00.csv
```

## Commands

{}

## Environment Variables

- `BQAT_WORKERS` - Worker thread count (default: number of cores)
- `BQAT_SINGLE` - Run every task on the calling thread
- `BQAT_SCANNER` - Scanner program (default: `bqat-scan`)
- `BQAT_ETA_STEP` - Completions between progress refreshes (default: `10`)
- `BQAT_POLL_INTERVAL_SECS` - Directory mode progress poll interval (default: `3`)
- `BQAT_COUNTER_LINES_PER_ITEM` - Counter file lines per processed item (default: `34`)
- `BQAT_REPORTING` - Render a report after every run (default: `true`)
- `BQAT_LOG_LEVEL`, `BQAT_LOG_OUTPUT`, `BQAT_LOG_FORMAT`, `BQAT_LOG_DIR` - Logging
- `RUST_LOG` - Extra filter directives

## Artifacts

A run writes, under the output directory:

- `output_<modality>_<timestamp>.csv` - one row per successful scan
- `log_<modality>_<timestamp>.json` - `{{"metadata": ..., "log": [...]}}`
- `report_<modality>_<timestamp>.html` - unless `--reporting false`

---

*To update, run `cargo xtask generate-cli-docs`.*
"#,
        chrono::Utc::now().format("%Y-%m-%d"),
        markdown
    );

    let output_path = PathBuf::from(output_dir);
    fs::create_dir_all(&output_path)?;

    let file_path = output_path.join("cli-reference.md");
    fs::write(&file_path, content)?;

    println!("Generated CLI documentation at: {}", file_path.display());

    Ok(())
}
