use crate::cli::MergeArgs;
use crate::error::Result;
use crate::ui::{CliProgressHandler, UiEvent};
use propfleet::{
    engine::{
        config::{MergeConfig, MergeInputs},
        progress::ProgressReporter,
    },
    workflows,
};
use tokio::sync::mpsc;
use tracing::info;

fn merge_config(args: MergeArgs) -> MergeConfig {
    let inputs = match args.from_dir {
        Some(directory) => MergeInputs::Directory(directory),
        None => MergeInputs::Files(args.files),
    };
    MergeConfig {
        inputs,
        output_path: args.output,
        canonical_order: args.canonical_order,
    }
}

pub fn run(args: MergeArgs, ui_sender: mpsc::Sender<UiEvent>) -> Result<()> {
    let config = merge_config(args);
    info!(output = %config.output_path.display(), "Merging worker results.");

    let reporter =
        ProgressReporter::with_callback(CliProgressHandler::new(ui_sender).get_callback());
    let summary = workflows::merge::run(&config, &reporter)?;

    println!(
        "Merged {} entries from {} file(s) into {}",
        summary.entries,
        summary.files,
        summary.output_path.display()
    );
    if summary.overwritten > 0 {
        println!(
            "  {} entr{} overwritten by later files.",
            summary.overwritten,
            if summary.overwritten == 1 { "y was" } else { "ies were" }
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::{Cli, Commands};
    use clap::Parser;
    use std::fs;
    use std::path::PathBuf;

    fn merge_args(args: &[&str]) -> MergeArgs {
        let mut full = vec!["propfleet", "merge"];
        full.extend_from_slice(args);
        match Cli::parse_from(full).command {
            Commands::Merge(merge) => merge,
            _ => panic!("Expected 'merge' subcommand"),
        }
    }

    #[test]
    fn directory_argument_selects_directory_mode() {
        let config = merge_config(merge_args(&["--from-dir", "rep-1", "-o", "all.json"]));
        assert_eq!(config.inputs, MergeInputs::Directory(PathBuf::from("rep-1")));
        assert_eq!(config.output_path, PathBuf::from("all.json"));
    }

    #[test]
    fn merges_files_and_writes_output() {
        let dir = tempfile::tempdir().unwrap();
        let first = dir.path().join("results-worker0.json");
        let second = dir.path().join("results-worker1.json");
        fs::write(&first, r#"{"a": {"value": 1.0}}"#).unwrap();
        fs::write(&second, r#"{"b": {"value": 2.0}}"#).unwrap();
        let output = dir.path().join("merged.json");

        let args = merge_args(&[
            first.to_str().unwrap(),
            second.to_str().unwrap(),
            "-o",
            output.to_str().unwrap(),
        ]);
        let (sender, _receiver) = mpsc::channel(64);
        run(args, sender).unwrap();

        let merged = fs::read_to_string(&output).unwrap();
        assert!(merged.contains("\"a\""));
        assert!(merged.contains("\"b\""));
    }

    #[test]
    fn missing_input_fails_without_writing_output() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("merged.json");
        let missing = dir.path().join("results-worker0.json");

        let args = merge_args(&[missing.to_str().unwrap(), "-o", output.to_str().unwrap()]);
        let (sender, _receiver) = mpsc::channel(64);

        assert!(run(args, sender).is_err());
        assert!(!output.exists());
    }
}
