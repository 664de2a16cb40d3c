use std::fs::File;
use std::io::{self, BufReader, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use massql_mgf_merge::annotate::MgfAnnotator;
use massql_mgf_merge::config::{ConfigLoader, ResolvedConfig};
use massql_mgf_merge::domain::JobLabel;
use massql_mgf_merge::error::MergeError;
use massql_mgf_merge::fetch::FetchOptions;
use massql_mgf_merge::gnps::Gnps2HttpClient;
use massql_mgf_merge::merge::MgfMerger;
use massql_mgf_merge::mgf;
use massql_mgf_merge::output::{JsonOutput, LogSink, OutputMode};
use massql_mgf_merge::pipeline::{JobReport, MergeOutcome, Pipeline, ProgressSink};
use massql_mgf_merge::renumber::{MgfRenumberer, ScanSequence};
use massql_mgf_merge::store::Store;
use massql_mgf_merge::table::CorrelationTable;

#[derive(Parser)]
#[command(name = "massql-merge")]
#[command(about = "Merge MassQL job MGF outputs into one provenance-annotated, renumbered MGF")]
#[command(version, author)]
struct Cli {
    #[arg(long, global = true)]
    non_interactive: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Fetch, annotate, merge and renumber every configured job")]
    Run(RunArgs),
    #[command(about = "Annotate one MGF file against a correlation table")]
    Annotate(AnnotateArgs),
    #[command(about = "Concatenate MGF files in order")]
    Merge(MergeArgs),
    #[command(about = "Renumber SCANS lines from 1")]
    Renumber(RenumberArgs),
    #[command(about = "Extract the values of one KEY=VALUE header from an MGF file")]
    Keyword(KeywordArgs),
}

#[derive(Args, Clone, Default)]
struct RunArgs {
    #[arg(long)]
    config: Option<String>,

    #[arg(long)]
    output: Option<PathBuf>,

    #[arg(long)]
    work_dir: Option<PathBuf>,

    #[arg(long)]
    force: bool,

    #[arg(long)]
    no_cache: bool,
}

#[derive(Args)]
struct AnnotateArgs {
    #[arg(long)]
    table: PathBuf,

    #[arg(long)]
    label: String,

    #[arg(long)]
    mgf: PathBuf,

    /// Correlation-table filename the MGF belongs to; defaults to the MGF file name
    #[arg(long)]
    filename: Option<String>,

    #[arg(long)]
    output: Option<PathBuf>,
}

#[derive(Args)]
struct MergeArgs {
    #[arg(required = true)]
    inputs: Vec<PathBuf>,

    #[arg(long, short)]
    output: PathBuf,
}

#[derive(Args)]
struct RenumberArgs {
    input: PathBuf,

    #[arg(long, short)]
    output: PathBuf,
}

#[derive(Args)]
struct KeywordArgs {
    input: PathBuf,

    keyword: String,

    #[arg(long, short)]
    output: Option<PathBuf>,

    #[arg(long)]
    case_sensitive: bool,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(err) = report.downcast_ref::<MergeError>() {
            return ExitCode::from(map_exit_code(err));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &MergeError) -> u8 {
    match error {
        MergeError::MissingConfig
        | MergeError::ConfigRead(_)
        | MergeError::ConfigParse(_)
        | MergeError::InvalidSpecifier(_)
        | MergeError::InvalidTaskId(_)
        | MergeError::InvalidJobLabel(_)
        | MergeError::DuplicateJob(_) => 2,
        err if err.is_fetch_error() => 3,
        MergeError::NoSurvivingJobs => 4,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let output_mode = if cli.non_interactive {
        OutputMode::NonInteractive
    } else {
        OutputMode::Interactive
    };

    match cli.command.unwrap_or(Commands::Run(RunArgs::default())) {
        Commands::Run(args) => run_pipeline(args, output_mode),
        Commands::Annotate(args) => run_annotate(args, output_mode),
        Commands::Merge(args) => run_merge(args, output_mode),
        Commands::Renumber(args) => run_renumber(args, output_mode),
        Commands::Keyword(args) => run_keyword(args),
    }
}

fn resolve_run_config(args: &RunArgs) -> Result<ResolvedConfig, MergeError> {
    let mut resolved = ConfigLoader::resolve(args.config.as_deref())?;
    if let Some(output) = &args.output {
        resolved.output = output.clone();
    }
    if let Some(work_dir) = &args.work_dir {
        resolved.work_dir = work_dir.clone();
    }
    Ok(resolved)
}

fn run_pipeline(args: RunArgs, output_mode: OutputMode) -> miette::Result<()> {
    let resolved = resolve_run_config(&args)?;
    let store = Store::new(&resolved.work_dir)?;
    let client = Gnps2HttpClient::new(Duration::from_secs(resolved.timeout_secs))?;
    let pipeline = Pipeline::new(store, client);
    let options = FetchOptions {
        force: args.force,
        no_cache: args.no_cache,
    };

    let sink: &dyn ProgressSink = match output_mode {
        OutputMode::Interactive => &LogSink,
        OutputMode::NonInteractive => &JsonOutput,
    };

    let jobs = pipeline.process_jobs(&resolved, options, sink);
    let merged = pipeline.merge_jobs(&jobs, &resolved.output, sink);

    match output_mode {
        OutputMode::NonInteractive => {
            let outcome = merged.as_ref().ok();
            JsonOutput::print_value(&serde_json::json!({
                "jobs": jobs,
                "outcome": outcome,
            }))
            .into_diagnostic()?;
        }
        OutputMode::Interactive => print_run_summary(&jobs, merged.as_ref().ok()),
    }

    merged.map(|_| ()).map_err(miette::Report::new)
}

fn run_annotate(args: AnnotateArgs, output_mode: OutputMode) -> miette::Result<()> {
    let label: JobLabel = args.label.parse()?;
    let table = CorrelationTable::from_tsv_file(&args.table, &label)?;
    let filename = match args.filename {
        Some(filename) => filename,
        None => file_name(&args.mgf)?,
    };
    let output = args.output.unwrap_or_else(|| {
        let stem = args
            .mgf
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_default();
        args.mgf.with_file_name(format!("processed_{stem}.mgf"))
    });

    let stats = MgfAnnotator::new(&table, &filename).annotate_file(&args.mgf, &output)?;
    match output_mode {
        OutputMode::NonInteractive => JsonOutput::print_value(&stats).into_diagnostic()?,
        OutputMode::Interactive => println!(
            "annotated {} of {} records ({} unmatched, {} already annotated) -> {}",
            stats.annotated,
            stats.records,
            stats.unmatched,
            stats.already_annotated,
            output.display()
        ),
    }
    Ok(())
}

fn run_merge(args: MergeArgs, output_mode: OutputMode) -> miette::Result<()> {
    let stats = Store::write_atomic(&args.output, |out| MgfMerger::merge(&args.inputs, out))?;
    match output_mode {
        OutputMode::NonInteractive => JsonOutput::print_value(&stats).into_diagnostic()?,
        OutputMode::Interactive => println!(
            "merged {} records from {} files -> {}",
            stats.records,
            stats.files,
            args.output.display()
        ),
    }
    Ok(())
}

fn run_renumber(args: RenumberArgs, output_mode: OutputMode) -> miette::Result<()> {
    let reader = BufReader::new(File::open(&args.input).into_diagnostic()?);
    let mut sequence = ScanSequence::new();
    let scans = Store::write_atomic(&args.output, |out| {
        MgfRenumberer::renumber(reader, out, &mut sequence, &args.input)
    })?;
    match output_mode {
        OutputMode::NonInteractive => {
            JsonOutput::print_value(&serde_json::json!({ "scans": scans })).into_diagnostic()?
        }
        OutputMode::Interactive => {
            println!("renumbered {scans} scans -> {}", args.output.display())
        }
    }
    Ok(())
}

fn run_keyword(args: KeywordArgs) -> miette::Result<()> {
    let reader = BufReader::new(File::open(&args.input).into_diagnostic()?);
    let values =
        mgf::extract_keyword_values(reader, &args.keyword, args.case_sensitive, &args.input)?;

    match &args.output {
        Some(path) => {
            Store::write_atomic(path, |out| {
                for value in &values {
                    writeln!(out, "{value}")
                        .map_err(|err| MergeError::Filesystem(err.to_string()))?;
                }
                Ok(())
            })?;
            eprintln!(
                "extracted {} values for '{}' -> {}",
                values.len(),
                args.keyword,
                path.display()
            );
        }
        None => {
            let mut stdout = io::stdout().lock();
            for value in &values {
                writeln!(stdout, "{value}").into_diagnostic()?;
            }
        }
    }
    Ok(())
}

fn file_name(path: &Path) -> Result<String, MergeError> {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .ok_or_else(|| MergeError::Filesystem(format!("not a file path: {}", path.display())))
}

fn print_run_summary(jobs: &[JobReport], outcome: Option<&MergeOutcome>) {
    let green = "\x1b[32m";
    let yellow = "\x1b[33m";
    let cyan = "\x1b[36m";
    let red = "\x1b[31m";
    let reset = "\x1b[0m";

    let succeeded = jobs.iter().filter(|job| job.succeeded()).count();
    println!("{cyan}massql-merge summary{reset}");
    println!("{green}completed jobs: {succeeded}{reset}");
    println!("{yellow}failed jobs: {}{reset}", jobs.len() - succeeded);

    for job in jobs {
        if job.succeeded() {
            println!(
                "{green}  ok   {} ({}) archive={} records={} annotated={} unmatched={}{reset}",
                job.label,
                job.task,
                job.archive_action.as_deref().unwrap_or("-"),
                job.stats.records,
                job.stats.annotated,
                job.stats.unmatched,
            );
        } else {
            println!(
                "{red}  fail {} ({}) during {}: {}{reset}",
                job.label,
                job.task,
                job.failed_in.map(|state| state.as_str()).unwrap_or("-"),
                job.error.as_deref().unwrap_or("unknown error"),
            );
        }
    }

    match outcome {
        Some(outcome) => println!(
            "{cyan}wrote {} spectra to {}{reset}",
            outcome.scans,
            outcome.output.display()
        ),
        None => println!("{red}no merged output written{reset}"),
    }
}
