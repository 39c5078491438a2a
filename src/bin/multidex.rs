use clap::{Args, Parser, Subcommand};
use log::info;
use multidex::data::{BlankLinePolicy, DataSet, LineErrorPolicy, LoadConfig, ParseConfig};
use multidex::index::{build_feature_index, build_label_index};
use serde::Serialize;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build inverted label and feature indices from a data file
    Index(IndexArgs),
}

#[derive(Args)]
#[command(rename_all = "snake_case")]
struct IndexArgs {
    /// Path to the data file in sparse LibSVM-like format
    #[arg(required = true)]
    data_path: PathBuf,

    /// Label ids in the input are already 0-based
    #[arg(long)]
    labels_0_based: bool,

    /// Treat the input as a binary problem with one signed label per line
    #[arg(long)]
    binary_problem: bool,

    /// Skip malformed lines instead of aborting ingestion
    #[arg(long)]
    skip_parse_errors: bool,

    /// Abort on blank lines instead of skipping them
    #[arg(long)]
    reject_blank_lines: bool,

    /// Number of worker threads
    ///
    /// If 0, the number is selected automatically.
    #[arg(long, default_value_t = 0)]
    n_threads: usize,

    /// Path to which the label index is written as JSON lines, if provided
    #[arg(long)]
    label_index_out: Option<PathBuf>,

    /// Path to which the feature index is written as JSON lines, if provided
    #[arg(long)]
    feature_index_out: Option<PathBuf>,
}

impl From<&IndexArgs> for LoadConfig {
    fn from(args: &IndexArgs) -> Self {
        Self {
            parse: ParseConfig {
                labels_0_based: args.labels_0_based,
                binary_problem: args.binary_problem,
            },
            error_policy: if args.skip_parse_errors {
                LineErrorPolicy::SkipLine
            } else {
                LineErrorPolicy::FailFast
            },
            blank_lines: if args.reject_blank_lines {
                BlankLinePolicy::Reject
            } else {
                BlankLinePolicy::Skip
            },
        }
    }
}

fn set_num_threads(num_threads: usize) {
    rayon::ThreadPoolBuilder::new()
        .num_threads(num_threads)
        .build_global()
        .unwrap();
}

fn write_json_lines<T: Serialize>(path: &Path, entries: &[T]) {
    let mut writer = BufWriter::new(File::create(path).expect("Failed to create output file"));
    for entry in entries {
        serde_json::to_writer(&mut writer, entry).expect("Failed to serialize index entry");
        writeln!(&mut writer).unwrap();
    }
}

fn run_index(args: &IndexArgs) {
    set_num_threads(args.n_threads);

    let config = LoadConfig::from(args);
    let dataset =
        DataSet::load_libsvm_file(&args.data_path, &config).expect("Failed to load data");
    info!(
        "Dataset has {} points, {} features, {} labels",
        dataset.n_docs(),
        dataset.n_features,
        dataset.n_labels()
    );

    let label_index = build_label_index(&dataset.points);
    let feature_index = build_feature_index(&dataset.points);

    if let Some(path) = args.label_index_out.as_ref() {
        write_json_lines(path, &label_index);
        info!("Wrote label index to {}", path.display());
    }
    if let Some(path) = args.feature_index_out.as_ref() {
        write_json_lines(path, &feature_index);
        info!("Wrote feature index to {}", path.display());
    }
}

fn main() {
    simple_logger::init().unwrap();
    let cli = Cli::parse();
    match &cli.command {
        Commands::Index(args) => run_index(args),
    }
}

#[test]
fn verify_cli() {
    use clap::CommandFactory;
    Cli::command().debug_assert();
}
