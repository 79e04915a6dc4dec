use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing::warn;
use tracing_subscriber::EnvFilter;

use genoma::app::{App, ProgressSink};
use genoma::cancel::CancellationToken;
use genoma::catalog::Catalog;
use genoma::config::ConfigLoader;
use genoma::domain::{FieldValue, RecordField, TaxonomyId};
use genoma::error::GenomaError;
use genoma::output::{JsonOutput, LogSink, OutputMode, TextOutput};
use genoma::pipeline::{PrepareReport, SystemToolRunner};
use genoma::source::EnsemblSource;
use genoma::sra::EutilsHttpClient;
use genoma::taxonomy::TaxdumpHttpClient;

#[derive(Parser)]
#[command(name = "genoma")]
#[command(about = "Catalog, download and prepare reference genome assemblies")]
#[command(version, author)]
struct Cli {
    /// Config file (default: genoma.json in the working directory).
    #[arg(long, global = true)]
    config: Option<String>,

    /// Print results as JSON on stdout.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "List cataloged assemblies")]
    List(ListArgs),
    #[command(about = "Crawl remote sources and update the catalog")]
    Discover,
    #[command(about = "Download sequence and annotation archives")]
    Download(KeyArgs),
    #[command(about = "Decompress, index and convert downloaded assemblies")]
    Prepare(KeyArgs),
    #[command(about = "Resolve taxonomy ids for cataloged assemblies")]
    Taxonomy,
    #[command(about = "Catalog SRA run accessions per taxonomy id")]
    Sra(SraArgs),
}

#[derive(Args)]
struct ListArgs {
    /// Record field to match, e.g. genus or taxonomy_id.
    #[arg(long, requires = "value")]
    field: Option<String>,

    /// Value the field must equal; `null` matches unset fields.
    #[arg(long, requires = "field")]
    value: Option<String>,
}

#[derive(Args)]
struct KeyArgs {
    /// Assembly keys (genus_species[_qualifier]-assembly_id); all when omitted.
    keys: Vec<String>,
}

#[derive(Args)]
struct SraArgs {
    /// Taxonomy ids; every cataloged taxonomy id when omitted.
    taxonomy_ids: Vec<String>,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(error) = report.downcast_ref::<GenomaError>() {
            return ExitCode::from(map_exit_code(error));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &GenomaError) -> u8 {
    match error {
        GenomaError::AssemblyNotFound(_)
        | GenomaError::ConfigRead(_)
        | GenomaError::ConfigParse(_) => 2,
        GenomaError::RemoteListing { .. }
        | GenomaError::RemoteFetch { .. }
        | GenomaError::RemoteConnection(_)
        | GenomaError::TaxonomyHttp(_)
        | GenomaError::EutilsHttp(_)
        | GenomaError::EutilsStatus { .. }
        | GenomaError::MissingTool(_)
        | GenomaError::StepFailed { .. } => 3,
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
    let output_mode = if cli.json {
        OutputMode::Json
    } else {
        OutputMode::Text
    };
    let sink: &dyn ProgressSink = match output_mode {
        OutputMode::Json => &JsonOutput,
        OutputMode::Text => &LogSink,
    };

    let config = ConfigLoader::resolve(cli.config.as_deref())?;
    let catalog = Catalog::open(&config.catalog_path)?;
    let ensembl = EnsemblSource::from_config(&config.ensembl);
    let mut app = App::new(
        config,
        catalog,
        EutilsHttpClient::new()?,
        SystemToolRunner::new(),
        TaxdumpHttpClient::new()?,
    )
    .with_source(Box::new(ensembl));

    let cancel = CancellationToken::new();
    let handler_token = cancel.clone();
    if let Err(err) = ctrlc::set_handler(move || handler_token.cancel()) {
        warn!(error = %err, "could not install interrupt handler");
    }

    match cli.command {
        Commands::List(args) => {
            let filter = match (args.field, args.value) {
                (Some(field), Some(value)) => {
                    let field: RecordField = field.parse()?;
                    let value = if value == "null" {
                        FieldValue::Null
                    } else {
                        FieldValue::parse_for(field, &value)?
                    };
                    Some((field, value))
                }
                _ => None,
            };
            let result = app.list(filter, sink)?;
            match output_mode {
                OutputMode::Json => JsonOutput::print(&result),
                OutputMode::Text => TextOutput::print_list(&result),
            }
            .into_diagnostic()?;
        }
        Commands::Discover => {
            let result = app.discover(&cancel, sink)?;
            match output_mode {
                OutputMode::Json => JsonOutput::print(&result),
                OutputMode::Text => TextOutput::print_discover(&result),
            }
            .into_diagnostic()?;
        }
        Commands::Download(args) => {
            let result = app.download(&args.keys, &cancel, sink)?;
            match output_mode {
                OutputMode::Json => JsonOutput::print(&result),
                OutputMode::Text => TextOutput::print_download(&result),
            }
            .into_diagnostic()?;
        }
        Commands::Prepare(args) => {
            let result = app.prepare(&args.keys, &cancel, sink)?;
            match output_mode {
                OutputMode::Json => JsonOutput::print(&result),
                OutputMode::Text => TextOutput::print_prepare(&result),
            }
            .into_diagnostic()?;
            if let Some(failure) = result.reports.iter().find_map(PrepareReport::failure) {
                return Err(failure.into());
            }
        }
        Commands::Taxonomy => {
            let result = app.resolve_taxonomy(sink)?;
            match output_mode {
                OutputMode::Json => JsonOutput::print(&result),
                OutputMode::Text => TextOutput::print_taxonomy(&result),
            }
            .into_diagnostic()?;
        }
        Commands::Sra(args) => {
            let taxonomy_ids = args
                .taxonomy_ids
                .iter()
                .map(|raw| raw.parse::<TaxonomyId>())
                .collect::<Result<Vec<_>, _>>()?;
            let result = app.catalog_accessions(&taxonomy_ids, &cancel, sink)?;
            match output_mode {
                OutputMode::Json => JsonOutput::print(&result),
                OutputMode::Text => TextOutput::print_sra(&result),
            }
            .into_diagnostic()?;
        }
    }
    Ok(())
}
