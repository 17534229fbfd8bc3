use std::fs;
use std::io::{self, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use kerchunk_resolver::byte_range::ByteRange;
use kerchunk_resolver::catalog::LoadOptions;
use kerchunk_resolver::config::ConfigLoader;
use kerchunk_resolver::destination::Destination;
use kerchunk_resolver::domain::ChunkKey;
use kerchunk_resolver::error::ResolverError;
use kerchunk_resolver::materialize::{self, MaterializeOptions, MaterializeReport};
use kerchunk_resolver::output::{
    JsonOutput, KeysResult, LogSink, OutputMode, ResolveResult, ValidateResult,
    ValidationProblem,
};
use kerchunk_resolver::resolver;
use kerchunk_resolver::store::ReferenceStore;

const EXIT_STRUCTURAL: u8 = 2;
const EXIT_FETCH: u8 = 3;
const EXIT_INCOMPLETE: u8 = 4;

#[derive(Parser)]
#[command(name = "kcr")]
#[command(about = "Resolve Kerchunk reference catalogs and materialize them as Zarr stores")]
#[command(version, author)]
struct Cli {
    /// Config file (default: ./kcr.json, then the user config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Catalog to load from a multi-catalog JSON document
    #[arg(long, global = true)]
    select: Option<String>,

    /// URI used for references whose path is null
    #[arg(long, global = true)]
    target: Option<String>,

    /// Machine-readable JSON output
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "List the keys of a catalog")]
    Keys(CatalogArgs),
    #[command(about = "Show where the bytes of a key come from")]
    Resolve(KeyArgs),
    #[command(about = "Write the bytes of a key to stdout or a file")]
    Cat(CatArgs),
    #[command(about = "Check every templated reference")]
    Validate(CatalogArgs),
    #[command(about = "Write every key of a catalog into a local Zarr directory")]
    Materialize(MaterializeArgs),
}

#[derive(Args)]
struct CatalogArgs {
    catalog: String,
}

#[derive(Args)]
struct KeyArgs {
    catalog: String,
    key: String,
}

#[derive(Args)]
struct CatArgs {
    catalog: String,
    key: String,

    #[arg(long, short)]
    output: Option<PathBuf>,

    #[arg(long)]
    offset: Option<u64>,

    #[arg(long)]
    length: Option<u64>,
}

#[derive(Args)]
struct MaterializeArgs {
    catalog: String,
    dest: PathBuf,

    #[arg(long, short)]
    jobs: Option<usize>,

    #[arg(long)]
    skip_existing: bool,

    /// Also write the JSON report to this file
    #[arg(long)]
    report: Option<PathBuf>,
}

fn main() -> ExitCode {
    match run() {
        Ok(code) => code,
        Err(report) => {
            eprintln!("{report:?}");
            match report.downcast_ref::<ResolverError>() {
                Some(error) => ExitCode::from(map_exit_code(error)),
                None => ExitCode::from(1),
            }
        }
    }
}

fn map_exit_code(error: &ResolverError) -> u8 {
    match error {
        ResolverError::Parse(_)
        | ResolverError::AmbiguousCatalog { .. }
        | ResolverError::UnresolvedTemplate { .. }
        | ResolverError::UnknownKey(_)
        | ResolverError::InvalidKey(_) => EXIT_STRUCTURAL,
        ResolverError::InvalidUri { .. }
        | ResolverError::UnsupportedScheme(_)
        | ResolverError::NotFound(_)
        | ResolverError::RangeUnsupported { .. }
        | ResolverError::InvalidByteRange { .. }
        | ResolverError::TransientIo { .. }
        | ResolverError::Permission { .. }
        | ResolverError::HttpStatus { .. }
        | ResolverError::Http(_)
        | ResolverError::Decode { .. }
        | ResolverError::Io { .. } => EXIT_FETCH,
        _ => 1,
    }
}

fn run() -> miette::Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let output_mode = if cli.json {
        OutputMode::Json
    } else {
        OutputMode::Human
    };
    let config = ConfigLoader::resolve(cli.config.as_deref())?;
    let options = LoadOptions {
        select: cli.select,
        default_target: cli.target,
    };

    match cli.command {
        Commands::Keys(args) => {
            let store = ReferenceStore::open(&args.catalog, &options, &config)?;
            let result = KeysResult {
                version: store.catalog().version().to_string(),
                keys: store.keys().cloned().collect(),
            };
            match output_mode {
                OutputMode::Json => JsonOutput::print_keys(&result).into_diagnostic()?,
                OutputMode::Human => {
                    let mut stdout = io::stdout().lock();
                    for key in &result.keys {
                        writeln!(stdout, "{key}").into_diagnostic()?;
                    }
                }
            }
            Ok(ExitCode::SUCCESS)
        }
        Commands::Resolve(args) => {
            let store = ReferenceStore::open(&args.catalog, &options, &config)?;
            let key: ChunkKey = args.key.parse()?;
            let location = resolver::resolve(store.catalog(), &key)?;
            JsonOutput::print_resolve(&ResolveResult { key, location }).into_diagnostic()?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Cat(args) => {
            let store = ReferenceStore::open(&args.catalog, &options, &config)?;
            let key: ChunkKey = args.key.parse()?;
            let data = match (args.offset, args.length) {
                (None, None) => store.get(&key)?,
                (offset, length) => {
                    store.get_partial(&key, ByteRange::new(offset.unwrap_or(0), length))?
                }
            }
            .ok_or_else(|| ResolverError::UnknownKey(key.to_string()))?;
            match args.output {
                Some(path) => fs::write(&path, &data).into_diagnostic()?,
                None => io::stdout().lock().write_all(&data).into_diagnostic()?,
            }
            Ok(ExitCode::SUCCESS)
        }
        Commands::Validate(args) => {
            let store = ReferenceStore::open(&args.catalog, &options, &config)?;
            let problems: Vec<ValidationProblem> = store
                .catalog()
                .validate()
                .into_iter()
                .map(|(key, error)| ValidationProblem {
                    key,
                    error: error.to_string(),
                })
                .collect();
            let result = ValidateResult {
                references: store.catalog().len(),
                problems,
            };
            match output_mode {
                OutputMode::Json => JsonOutput::print_validate(&result).into_diagnostic()?,
                OutputMode::Human => {
                    for problem in &result.problems {
                        println!("{}: {}", problem.key, problem.error);
                    }
                    println!(
                        "{} references, {} problems",
                        result.references,
                        result.problems.len()
                    );
                }
            }
            Ok(if result.problems.is_empty() {
                ExitCode::SUCCESS
            } else {
                ExitCode::from(EXIT_STRUCTURAL)
            })
        }
        Commands::Materialize(args) => {
            let store = ReferenceStore::open(&args.catalog, &options, &config)?;
            let destination = Destination::from_path(&args.dest)?;
            let materialize_options = MaterializeOptions {
                workers: args.jobs.unwrap_or(config.workers).max(1),
                skip_existing: args.skip_existing,
                ..MaterializeOptions::default()
            };
            let report = materialize::materialize(
                store.catalog(),
                store.fetcher(),
                &destination,
                &materialize_options,
                &LogSink,
            )?;
            store.close();

            if let Some(path) = &args.report {
                let json = JsonOutput::to_pretty(&report).into_diagnostic()?;
                fs::write(path, json).into_diagnostic()?;
            }
            match output_mode {
                OutputMode::Json => JsonOutput::print_report(&report).into_diagnostic()?,
                OutputMode::Human => print_report_summary(&report),
            }
            Ok(if report.is_complete() {
                ExitCode::SUCCESS
            } else {
                ExitCode::from(EXIT_INCOMPLETE)
            })
        }
    }
}

fn print_report_summary(report: &MaterializeReport) {
    println!(
        "{}: {} succeeded, {} failed{}",
        report.destination,
        report.succeeded,
        report.failed,
        if report.cancelled { " (cancelled)" } else { "" }
    );
    for entry in report.failures() {
        println!("  {} {:?}", entry.key, entry.status);
    }
    if !report.not_attempted.is_empty() {
        println!("  {} keys not attempted", report.not_attempted.len());
    }
}
