use std::path::{Path, PathBuf};
use std::process::ExitCode;

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use msinfo_scanner::cache::ResultCache;
use msinfo_scanner::classify::Classifier;
use msinfo_scanner::config::{ConfigLoader, ResolvedConfig, ScanOverrides};
use msinfo_scanner::error::ScanError;
use msinfo_scanner::integrity::ZipIntegrityChecker;
use msinfo_scanner::output::{ClassifyResult, JsonOutput, OutputMode, TextOutput};
use msinfo_scanner::processor::ProcessorRegistry;
use msinfo_scanner::scanner::Scanner;
use msinfo_scanner::status::ProgressSink;

#[derive(Parser)]
#[command(name = "msinfo-scan")]
#[command(about = "Classify mass-spectrometry instrument output and cache per-dataset metadata")]
#[command(version, author)]
struct Cli {
    /// Print results as JSON on stdout.
    #[arg(long, global = true)]
    json: bool,

    /// Log at debug level unless RUST_LOG says otherwise.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file; defaults to ./msinfo-scan.json when present.
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Process a dataset, a directory, or a directory with a file pattern")]
    Scan(ScanArgs),
    #[command(about = "Show which processor would handle a path")]
    Classify(ClassifyArgs),
    #[command(about = "Inspect the result cache")]
    Cache(CacheArgs),
}

#[derive(Args)]
struct ScanArgs {
    /// File, directory, or directory/pattern such as `data/*.raw`.
    input: PathBuf,

    /// Where `_DatasetInfo` sidecar files are written.
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// Walk subdirectories, optionally limited to LEVELS (0 = unlimited).
    #[arg(long, value_name = "LEVELS", num_args = 0..=1, default_missing_value = "0")]
    recurse: Option<i32>,

    /// Process datasets even when they are already cached.
    #[arg(long)]
    reprocess: bool,

    /// Reprocess cached datasets whose recorded size is zero.
    #[arg(long)]
    reprocess_zero_size: bool,

    #[arg(long)]
    no_cache: bool,

    /// Treat files with unknown extensions as generic datasets.
    #[arg(long)]
    all_extensions: bool,

    /// Record per-directory integrity results.
    #[arg(long)]
    check_integrity: bool,

    #[arg(long)]
    no_output_files: bool,

    /// Stop the run when a directory cannot be listed.
    #[arg(long)]
    fatal_recursion_errors: bool,

    #[arg(long)]
    status_file: Option<Utf8PathBuf>,
}

#[derive(Args)]
struct ClassifyArgs {
    path: PathBuf,

    #[arg(long)]
    all_extensions: bool,
}

#[derive(Args)]
struct CacheArgs {
    #[command(subcommand)]
    command: CacheCommand,
}

#[derive(Subcommand)]
enum CacheCommand {
    #[command(about = "Row counts and file locations")]
    Stats,
    #[command(about = "Show the cached row for a dataset")]
    Show { name: String },
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(error) = report.downcast_ref::<ScanError>() {
            return ExitCode::from(map_exit_code(error));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &ScanError) -> u8 {
    match error {
        ScanError::InvalidPath(_)
        | ScanError::InvalidPattern(_)
        | ScanError::ConfigRead(_)
        | ScanError::ConfigParse(_) => 2,
        ScanError::NoMatchingFiles(_) | ScanError::UnsupportedType(_) => 3,
        ScanError::CacheWrite { .. } => 4,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let output_mode = if cli.json {
        OutputMode::Json
    } else {
        OutputMode::Text
    };
    let config = ConfigLoader::resolve(cli.config.as_deref())?;

    match cli.command {
        Commands::Scan(args) => run_scan(args, config, output_mode),
        Commands::Classify(args) => run_classify(args, output_mode),
        Commands::Cache(args) => run_cache(args, config, output_mode),
    }
}

fn run_scan(args: ScanArgs, mut config: ResolvedConfig, output_mode: OutputMode) -> miette::Result<()> {
    config.apply_overrides(&ScanOverrides {
        max_levels_to_recurse: args.recurse,
        reprocess: args.reprocess,
        reprocess_zero_size: args.reprocess_zero_size,
        no_cache: args.no_cache,
        all_extensions: args.all_extensions,
        check_integrity: args.check_integrity,
        no_output_files: args.no_output_files,
        fatal_recursion_errors: args.fatal_recursion_errors,
        status_file: args.status_file,
    });

    let output_dir = args.output_dir.as_deref().or_else(|| default_output_dir(&args.input));
    let mut scanner =
        Scanner::new(config, ProcessorRegistry::with_defaults()).with_integrity_checker(ZipIntegrityChecker);
    scanner.open();

    let sink: &dyn ProgressSink = match output_mode {
        OutputMode::Json => &JsonOutput,
        OutputMode::Text => &TextOutput,
    };
    let scanned = scanner.scan(&args.input, output_dir, args.recurse.is_some(), sink);
    let finished = scanner.finish();

    // The scan error wins; a flush error only surfaces on an otherwise clean run.
    scanned?;
    let summary = finished?;
    match output_mode {
        OutputMode::Json => JsonOutput::print_summary(&summary).into_diagnostic()?,
        OutputMode::Text => TextOutput::print_summary(&summary),
    }
    Ok(())
}

/// Sidecars go next to the input unless told otherwise.
fn default_output_dir(input: &Path) -> Option<&Path> {
    if input.is_dir() {
        Some(input)
    } else {
        input.parent().filter(|parent| parent.is_dir())
    }
}

fn run_classify(args: ClassifyArgs, output_mode: OutputMode) -> miette::Result<()> {
    if !args.path.exists() {
        return Err(ScanError::InvalidPath(args.path).into());
    }
    let classifier = Classifier::new().with_generic_fallback(args.all_extensions);
    let result = ClassifyResult {
        path: &args.path,
        classification: classifier.classify(&args.path),
        rule: classifier.explain(&args.path),
    };
    match output_mode {
        OutputMode::Json => JsonOutput::print_classification(&result).into_diagnostic()?,
        OutputMode::Text => TextOutput::print_classification(&result),
    }
    if result.classification.is_none() {
        return Err(ScanError::UnsupportedType(args.path.clone()).into());
    }
    Ok(())
}

fn run_cache(args: CacheArgs, config: ResolvedConfig, output_mode: OutputMode) -> miette::Result<()> {
    let mut cache = ResultCache::from_config(&config);
    cache.load_datasets(false)?;
    cache.load_directories(false)?;

    match args.command {
        CacheCommand::Stats => match output_mode {
            OutputMode::Json => JsonOutput::print_cache_stats(&cache.stats()).into_diagnostic()?,
            OutputMode::Text => TextOutput::print_cache_stats(&cache.stats()),
        },
        CacheCommand::Show { name } => {
            let info = cache
                .cached_dataset(&name)
                .ok_or_else(|| miette::Report::msg(format!("dataset {name} is not cached")))?;
            match output_mode {
                OutputMode::Json => JsonOutput::print_dataset(info).into_diagnostic()?,
                OutputMode::Text => TextOutput::print_dataset(info),
            }
        }
    }
    Ok(())
}
