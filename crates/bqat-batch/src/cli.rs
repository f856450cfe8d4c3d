//! Command line definitions for the `bqat-batch` binary

use bqat_common::Modality;
use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use crate::benchmark::{BenchmarkRequest, DEFAULT_REPLICAS};
use crate::config::{DEFAULT_OUTPUT_DIR, DEFAULT_PATTERN};
use crate::filter::FilterRequest;
use crate::run::RunRequest;
use crate::scan::{Conversion, ScanGranularity};

/// BQAT batch runner - biometric quality assessment over a folder of samples
#[derive(Parser, Debug)]
#[command(name = "bqat-batch")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Assess every matching sample under an input directory
    Run(RunArgs),

    /// Filter a finished output table
    Filter {
        /// Output table (CSV) to filter
        #[arg(short, long)]
        input: PathBuf,

        #[command(flatten)]
        filter: FilterArgs,

        /// Directory relative sample paths are linked against
        #[arg(long)]
        cwd: Option<PathBuf>,
    },

    /// Render a report and table view for a finished output table
    Report {
        /// Output table (CSV) to describe
        #[arg(short, long)]
        input: PathBuf,

        /// Directory relative sample paths are linked against
        #[arg(long)]
        cwd: Option<PathBuf>,
    },

    /// Measure throughput on a replicated sample set, writing nothing
    Benchmark(BenchmarkArgs),
}

/// How the scanner program is handed work
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScanMode {
    /// One invocation per sample file
    #[default]
    File,
    /// One invocation per directory of samples
    Directory,
    /// One invocation for the whole input
    Run,
}

impl From<ScanMode> for ScanGranularity {
    fn from(mode: ScanMode) -> Self {
        match mode {
            ScanMode::File => ScanGranularity::PerFile,
            ScanMode::Directory => ScanGranularity::PerDirectory,
            ScanMode::Run => ScanGranularity::WholeRun,
        }
    }
}

/// Execution and scanner settings shared by `run` and `benchmark`
#[derive(Args, Debug, Clone)]
pub struct EngineArgs {
    /// Run every task on the calling thread
    #[arg(short, long, env = "BQAT_SINGLE")]
    pub single: bool,

    /// Worker threads (defaults to the number of cores)
    #[arg(short, long, env = "BQAT_WORKERS")]
    pub workers: Option<usize>,

    /// Scanner program
    #[arg(long, env = "BQAT_SCANNER", default_value = "bqat-scan")]
    pub scanner: PathBuf,

    /// Unit of work handed to each scanner invocation
    #[arg(long, value_enum, default_value_t = ScanMode::File)]
    pub granularity: ScanMode,

    /// Log file the scanner appends to, used as a progress signal in
    /// directory and run granularity
    #[arg(long)]
    pub counter_file: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// Biometric modality (fingerprint, face, iris, speech)
    #[arg(short, long)]
    pub mode: Modality,

    /// Input directory
    #[arg(short, long)]
    pub input: PathBuf,

    /// Output directory
    #[arg(short, long, default_value = DEFAULT_OUTPUT_DIR)]
    pub output: PathBuf,

    /// Render a summary report after the run
    #[arg(
        short,
        long,
        env = "BQAT_REPORTING",
        action = ArgAction::Set,
        default_value_t = true
    )]
    pub reporting: bool,

    /// Maximum number of files to scan (0 for no limit)
    #[arg(short, long, default_value_t = 0)]
    pub limit: usize,

    /// Filename pattern to search for, without extension
    #[arg(short, long, default_value = DEFAULT_PATTERN)]
    pub pattern: String,

    /// File types to process ('[type_1],[type_2]')
    #[arg(short = 't', long = "type", value_delimiter = ',')]
    pub types: Vec<String>,

    /// Formats to convert before processing ('[type_1],[type_2]')
    #[arg(short, long, value_delimiter = ',')]
    pub convert: Vec<String>,

    /// Target format of the conversion
    #[arg(long)]
    pub target: Option<String>,

    #[command(flatten)]
    pub engine: EngineArgs,

    #[command(flatten)]
    pub filter: FilterArgs,
}

#[derive(Args, Debug, Clone)]
pub struct BenchmarkArgs {
    /// Biometric modality (fingerprint, face, iris, speech)
    #[arg(short, long)]
    pub mode: Modality,

    /// Directory holding the sample set
    #[arg(short, long)]
    pub input: PathBuf,

    /// Copies of the sample set dispatched in pool mode
    #[arg(long, default_value_t = DEFAULT_REPLICAS)]
    pub replicas: usize,

    /// Filename pattern to search for, without extension
    #[arg(short, long, default_value = DEFAULT_PATTERN)]
    pub pattern: String,

    /// File types to process ('[type_1],[type_2]')
    #[arg(short = 't', long = "type", value_delimiter = ',')]
    pub types: Vec<String>,

    #[command(flatten)]
    pub engine: EngineArgs,
}

impl BenchmarkArgs {
    pub fn to_request(&self) -> BenchmarkRequest {
        BenchmarkRequest::new(self.mode, &self.input)
            .pattern(self.pattern.clone())
            .extensions(self.types.clone())
            .replicas(self.replicas)
    }
}

#[derive(Args, Debug, Clone, Default)]
pub struct FilterArgs {
    /// Columns to keep ('[col_1],[col_2]')
    #[arg(short, long)]
    pub attributes: Option<String>,

    /// Row expression, e.g. "sharpness > 40 and face_detected == True"
    #[arg(short, long)]
    pub query: Option<String>,

    /// Columns to sort by ('[col_1],[col_2]')
    #[arg(long)]
    pub sort: Option<String>,
}

impl FilterArgs {
    pub fn to_request(&self) -> FilterRequest {
        FilterRequest::from_lists(
            self.attributes.as_deref(),
            self.query.as_deref(),
            self.sort.as_deref(),
        )
    }
}

impl RunArgs {
    pub fn to_request(&self) -> RunRequest {
        RunRequest::new(self.mode, &self.input)
            .output_dir(&self.output)
            .pattern(self.pattern.clone())
            .extensions(self.types.clone())
            .limit(Some(self.limit).filter(|l| *l > 0))
            .conversion(Conversion {
                source: self.convert.clone(),
                target: self.target.clone(),
            })
            .filter(self.filter.to_request())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_run_args_to_request() {
        let cli = Cli::try_parse_from([
            "bqat-batch",
            "run",
            "--mode",
            "fingerprint",
            "--input",
            "data/finger",
            "--type",
            "png,wsq",
            "--limit",
            "5",
            "--query",
            "nfiq2 > 40",
        ])
        .unwrap();

        let Commands::Run(args) = cli.command else {
            panic!("expected run");
        };
        let request = args.to_request();
        assert_eq!(request.modality, Modality::Finger);
        assert_eq!(request.extensions, vec!["png", "wsq"]);
        assert_eq!(request.limit, Some(5));
        assert_eq!(request.filter.query.as_deref(), Some("nfiq2 > 40"));
        assert_eq!(request.output_dir, PathBuf::from(DEFAULT_OUTPUT_DIR));
    }

    #[test]
    fn test_reporting_defaults_on() {
        let cli = Cli::try_parse_from(["bqat-batch", "run", "-m", "face", "-i", "in"]).unwrap();
        let Commands::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert!(args.reporting);

        let cli = Cli::try_parse_from([
            "bqat-batch",
            "run",
            "-m",
            "face",
            "-i",
            "in",
            "--reporting",
            "false",
        ])
        .unwrap();
        let Commands::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert!(!args.reporting);
    }

    #[test]
    fn test_granularity_flag() {
        let cli = Cli::try_parse_from([
            "bqat-batch",
            "run",
            "-m",
            "face",
            "-i",
            "in",
            "--granularity",
            "run",
            "--counter-file",
            "engine.log",
        ])
        .unwrap();
        let Commands::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(
            ScanGranularity::from(args.engine.granularity),
            ScanGranularity::WholeRun
        );
        assert_eq!(args.engine.counter_file, Some(PathBuf::from("engine.log")));
    }

    #[test]
    fn test_benchmark_args() {
        let cli = Cli::try_parse_from([
            "bqat-batch",
            "benchmark",
            "-m",
            "iris",
            "-i",
            "samples",
            "--replicas",
            "8",
        ])
        .unwrap();
        let Commands::Benchmark(args) = cli.command else {
            panic!("expected benchmark");
        };
        let request = args.to_request();
        assert_eq!(request.modality, Modality::Iris);
        assert_eq!(request.replicas, 8);
        assert_eq!(args.engine.granularity, ScanMode::File);
    }

    #[test]
    fn test_zero_limit_is_no_limit() {
        let cli = Cli::try_parse_from(["bqat-batch", "run", "-m", "face", "-i", "in"]).unwrap();
        let Commands::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.to_request().limit, None);
    }
}
