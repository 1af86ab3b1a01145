use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::Deserialize;
use std::path::PathBuf;

const HELP_TEMPLATE: &str = "\
{before-help}{name} {version}
{author-with-newline}{about-with-newline}
{usage-heading} {usage}

{all-args}{after-help}
";

#[derive(Parser, Debug)]
#[command(
    version,
    about = "propfleet - estimate physical properties across accelerator-bound queue workers and merge their results.",
    help_template = HELP_TEMPLATE,
)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Increase verbosity level (-v for INFO, -vv for DEBUG, -vvv for TRACE)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all log output except for errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Write logs to a specified file in addition to the console output
    #[arg(long, global = true, value_name = "PATH")]
    pub log_file: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Estimate this worker's share of a property data set.
    Run(RunArgs),
    /// Merge per-worker result files into a single mapping.
    Merge(MergeArgs),
}

#[derive(ValueEnum, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum BackendKind {
    /// Submit each task as a SLURM job.
    Slurm,
    /// Run tasks on this machine.
    Local,
}

/// Arguments for the `run` subcommand.
#[derive(Args, Debug)]
pub struct RunArgs {
    // --- Inputs ---
    /// Property data set to partition [default: training-properties-with-water.json]
    #[arg(short = 'i', long, value_name = "PATH")]
    pub input_path: Option<PathBuf>,

    /// Directory used by the server to store estimates.
    #[arg(short = 's', long, required = true, value_name = "PATH")]
    pub storage_directory: PathBuf,

    /// Main force-field parameter file (e.g., openff-2.2.1.offxml).
    #[arg(short = 'f', long, required = true, value_name = "PATH")]
    pub forcefield: PathBuf,

    /// Water model parameter file (e.g., tip3p.offxml).
    #[arg(short = 'w', long, required = true, value_name = "PATH")]
    pub water_forcefield: PathBuf,

    /// Estimation options passed to the engine [default: request-options.json]
    #[arg(long, value_name = "PATH")]
    pub options_file: Option<PathBuf>,

    // --- Output layout ---
    /// Output directory inside the force-field directory [default: output]
    #[arg(short = 'o', long, value_name = "PATH")]
    pub output_directory: Option<PathBuf>,

    /// Replicate number used in the output path [default: 1]
    #[arg(short = 'r', long, value_name = "INT")]
    pub replicate: Option<u32>,

    // --- Partitioning ---
    /// Zero-based index of this worker.
    #[arg(long, required = true, value_name = "INT")]
    pub worker_id: usize,

    /// Total number of workers the data set is split across [default: 3]
    #[arg(long, value_name = "INT")]
    pub num_workers: Option<usize>,

    // --- Orchestration ---
    /// Port the estimation server listens on [default: 8100]
    #[arg(short = 'p', long, value_name = "PORT")]
    pub port: Option<u16>,

    /// Calculation backend [default: slurm]
    #[arg(long, value_enum)]
    pub backend: Option<BackendKind>,

    /// Engine executable and leading arguments, split on whitespace.
    #[arg(long, value_name = "COMMAND")]
    pub engine_command: Option<String>,

    /// Seconds between status queries [default: 30]
    #[arg(long, value_name = "SECONDS")]
    pub polling_interval: Option<u64>,

    /// Queue (partition) name for SLURM jobs.
    #[arg(long, value_name = "NAME")]
    pub queue: Option<String>,

    /// Uncertainty applied before dispatch: 'fixed:<x>', 'fraction:<x>' or 'keep'.
    #[arg(long, value_name = "POLICY")]
    pub uncertainty: Option<String>,

    /// Reuse stored estimates for identical properties. Pass '=false' to
    /// turn off caching enabled in the config file.
    #[arg(
        long,
        value_name = "BOOL",
        num_args = 0..=1,
        require_equals = true,
        default_missing_value = "true"
    )]
    pub enable_data_caching: Option<bool>,

    /// Remove per-request working directories once a request finishes. Pass
    /// '=false' to keep them when the config file says otherwise.
    #[arg(
        long,
        value_name = "BOOL",
        num_args = 0..=1,
        require_equals = true,
        default_missing_value = "true"
    )]
    pub delete_working_files: Option<bool>,

    /// Configuration file in TOML format.
    #[arg(short = 'c', long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Set a specific configuration value, overriding the config file.
    /// Can be used multiple times. Example: -S resources.queue=gpu-long
    #[arg(short = 'S', long = "set", value_name = "KEY=VALUE", num_args(0..))]
    pub set_values: Vec<String>,
}

/// Arguments for the `merge` subcommand.
#[derive(Args, Debug)]
pub struct MergeArgs {
    /// Result files, merged in the given order; later files win on collisions.
    #[arg(value_name = "FILE", required_unless_present = "from_dir", conflicts_with = "from_dir")]
    pub files: Vec<PathBuf>,

    /// Merge every results-worker*.json file in a directory, in worker order.
    #[arg(long, value_name = "DIR")]
    pub from_dir: Option<PathBuf>,

    /// Merged output file.
    #[arg(short, long, default_value = "merged_results.json", value_name = "PATH")]
    pub output: PathBuf,

    /// Merge files in worker-index order regardless of argument order.
    #[arg(long)]
    pub canonical_order: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_requires_worker_and_force_fields() {
        let result = Cli::try_parse_from(["propfleet", "run", "-s", "store"]);
        assert!(result.is_err());
    }

    #[test]
    fn run_parses_short_flags() {
        let cli = Cli::try_parse_from([
            "propfleet", "-vv", "run", "-s", "store", "-f", "openff-2.2.1.offxml", "-w",
            "tip3p.offxml", "--worker-id", "2", "-r", "3", "--backend", "local",
        ])
        .unwrap();
        assert_eq!(cli.verbose, 2);
        let Commands::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.worker_id, 2);
        assert_eq!(args.replicate, Some(3));
        assert_eq!(args.backend, Some(BackendKind::Local));
        assert!(args.num_workers.is_none());
    }

    #[test]
    fn switch_flags_are_unset_bare_or_explicit() {
        let parse = |extra: &[&str]| {
            let mut argv = vec![
                "propfleet", "run", "-s", "store", "-f", "ff.offxml", "-w", "tip3p.offxml",
                "--worker-id", "0",
            ];
            argv.extend_from_slice(extra);
            match Cli::try_parse_from(argv).unwrap().command {
                Commands::Run(args) => (args.enable_data_caching, args.delete_working_files),
                Commands::Merge(_) => panic!("expected run"),
            }
        };

        assert_eq!(parse(&[]), (None, None));
        assert_eq!(
            parse(&["--enable-data-caching", "--delete-working-files"]),
            (Some(true), Some(true))
        );
        assert_eq!(
            parse(&["--enable-data-caching=false", "--delete-working-files=false"]),
            (Some(false), Some(false))
        );
    }

    #[test]
    fn merge_accepts_files_or_directory_but_not_both() {
        assert!(Cli::try_parse_from(["propfleet", "merge", "a.json", "b.json"]).is_ok());
        assert!(Cli::try_parse_from(["propfleet", "merge", "--from-dir", "rep-1"]).is_ok());
        assert!(Cli::try_parse_from(["propfleet", "merge"]).is_err());
        assert!(
            Cli::try_parse_from(["propfleet", "merge", "a.json", "--from-dir", "rep-1"]).is_err()
        );
    }
}
