use anyhow::{Context, Result};
use ariadne::config::{self, DumpLocation, IngestConfig, RetryPolicy};
use ariadne::models::TableKind;
use ariadne::neo4j::{BoltFlavor, Neo4jConfig, Neo4jSink};
use ariadne::progress::{DumpProgress, NoProgress, ProgressReporter};
use ariadne::resolve::{inspect_schema, run_ingest};
use ariadne::sink::CsvSink;
use ariadne::stats::IngestStats;
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Instant;
use tracing::level_filters::LevelFilter;
use tracing::{error, info, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[derive(Parser)]
#[command(name = "ariadne")]
#[command(about = "Stream Wikipedia SQL dumps into a resolved page link graph")]
struct Cli {
    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ingest pages, redirects and links into a graph sink
    Ingest(IngestArgs),
    /// Print the columns declared in one table's dump header
    Schema(SchemaArgs),
}

#[derive(Args)]
struct SourceArgs {
    /// Wiki language code (e.g. en, fr)
    #[arg(short, long, env = "WIKI_LANG", default_value = config::DEFAULT_LANG)]
    lang: String,

    /// Read pre-downloaded *.sql.gz files from this directory instead of the network
    #[arg(long, conflicts_with = "cache_dir")]
    dump_dir: Option<PathBuf>,

    /// Keep downloaded dumps under <CACHE_DIR>/<lang>/ and reuse them on later runs
    #[arg(long)]
    cache_dir: Option<PathBuf>,

    /// Dump mirror base URL
    #[arg(long, default_value = config::DEFAULT_DUMP_BASE_URL)]
    base_url: String,
}

impl SourceArgs {
    fn location(&self) -> DumpLocation {
        match (&self.dump_dir, &self.cache_dir) {
            (Some(dir), _) => DumpLocation::Local { dir: dir.clone() },
            (None, Some(dir)) => DumpLocation::Cached {
                base_url: self.base_url.clone(),
                dir: dir.clone(),
            },
            (None, None) => DumpLocation::Remote {
                base_url: self.base_url.clone(),
            },
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum SinkKind {
    /// neo4j-admin import CSV files
    Csv,
    /// Neo4j or Memgraph over Bolt
    Neo4j,
}

#[derive(Clone, Copy, ValueEnum)]
enum FlavorArg {
    Neo4j,
    Memgraph,
}

impl From<FlavorArg> for BoltFlavor {
    fn from(arg: FlavorArg) -> Self {
        match arg {
            FlavorArg::Neo4j => BoltFlavor::Neo4j,
            FlavorArg::Memgraph => BoltFlavor::Memgraph,
        }
    }
}

#[derive(Args)]
struct IngestArgs {
    #[command(flatten)]
    source: SourceArgs,

    /// Where resolved records go
    #[arg(long, value_enum, default_value_t = SinkKind::Csv)]
    sink: SinkKind,

    /// Output directory for the CSV sink
    #[arg(short, long, default_value = "output")]
    output: PathBuf,

    /// Bolt URI for the neo4j sink
    #[arg(long, default_value = config::DEFAULT_BOLT_URI)]
    bolt_uri: String,

    /// Bolt server dialect, selects the index statements
    #[arg(long, value_enum, default_value_t = FlavorArg::Neo4j)]
    bolt_flavor: FlavorArg,

    #[arg(long, env = "NEO4J_USER", default_value = "")]
    bolt_user: String,

    #[arg(long, env = "NEO4J_PASSWORD", default_value = "", hide_env_values = true)]
    bolt_password: String,

    /// Records per sink batch
    #[arg(long, env = "MAX_GROUP_PER_REQUEST", default_value_t = config::DEFAULT_BATCH_SIZE)]
    batch_size: usize,

    /// Namespace id to keep
    #[arg(long, default_value_t = config::MAIN_NAMESPACE)]
    namespace: i32,

    /// Read the pre-linktarget pagelinks layout with inline target titles
    #[arg(long)]
    legacy_pagelinks: bool,

    /// Maximum redirect hops followed before a chain is dropped
    #[arg(long, default_value_t = config::REDIRECT_MAX_DEPTH)]
    max_redirect_depth: u32,

    /// Report progress every N parsed records
    #[arg(long, default_value_t = config::PROGRESS_INTERVAL)]
    progress_interval: u64,

    /// Retries for a failed sink batch before it is dropped
    #[arg(long, default_value_t = config::SINK_MAX_RETRIES)]
    sink_retries: u32,

    /// Hide the progress bar and rate lines
    #[arg(short, long)]
    quiet: bool,
}

impl IngestArgs {
    fn config(&self) -> IngestConfig {
        IngestConfig {
            lang: self.source.lang.clone(),
            location: self.source.location(),
            batch_size: self.batch_size,
            namespace: self.namespace,
            link_targets: !self.legacy_pagelinks,
            max_redirect_depth: self.max_redirect_depth,
            progress_interval: self.progress_interval,
            transport_retry: RetryPolicy::transport(),
            sink_retry: RetryPolicy {
                max_retries: self.sink_retries,
                ..RetryPolicy::sink()
            },
        }
    }
}

#[derive(Args)]
struct SchemaArgs {
    /// Table to inspect: page, redirect, linktarget or pagelinks
    #[arg(value_parser = parse_table)]
    table: TableKind,

    #[command(flatten)]
    source: SourceArgs,
}

fn parse_table(name: &str) -> Result<TableKind, String> {
    TableKind::from_dump_name(name)
        .ok_or_else(|| format!("unknown table '{name}' (expected page, redirect, linktarget or pagelinks)"))
}

fn build_runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_current_thread()
        .enable_io()
        .enable_time()
        .build()
        .context("Failed to start async runtime")
}

fn print_summary(stats: &IngestStats, elapsed_secs: f64) {
    let get = IngestStats::get;
    println!();
    println!("Total time:          {elapsed_secs:.2}s");
    println!();
    println!("Pages:               {}", get(&stats.pages));
    println!("Redirect edges:      {}", get(&stats.redirect_edges));
    println!("  via chains:        {}", get(&stats.chained_redirect_edges));
    println!("Deferred redirects:  {}", get(&stats.pending_redirects));
    println!("Link targets:        {}", get(&stats.link_targets));
    println!("Link edges:          {}", get(&stats.link_edges));
    println!();
    println!("Other namespaces:    {}", get(&stats.namespace_filtered));
    println!("Malformed rows:      {}", get(&stats.malformed));
    println!("Interwiki redirects: {}", get(&stats.interwiki));
    println!("Unknown titles:      {}", get(&stats.unknown_title));
    println!("Unknown targets:     {}", get(&stats.unknown_link_target));
    println!("Dangling chains:     {}", get(&stats.dangling));
    println!("Chains too deep:     {}", get(&stats.too_deep));
    println!("Failed batches:      {}", get(&stats.batches_failed));
    println!("Records lost:        {}", get(&stats.records_lost));
}

async fn ingest(
    args: &IngestArgs,
    config: &IngestConfig,
    progress: &mut dyn ProgressReporter,
) -> Result<Arc<IngestStats>> {
    match args.sink {
        SinkKind::Csv => {
            let sink = CsvSink::create(&args.output).with_context(|| {
                format!("Failed to create output directory: {}", args.output.display())
            })?;
            run_ingest(config, Arc::new(sink), progress).await
        }
        SinkKind::Neo4j => {
            let neo4j = Neo4jConfig {
                bolt_uri: args.bolt_uri.clone(),
                user: args.bolt_user.clone(),
                password: args.bolt_password.clone(),
                flavor: args.bolt_flavor.into(),
            };
            let sink = Neo4jSink::connect(&neo4j).await?;
            run_ingest(config, Arc::new(sink), progress).await
        }
    }
}

fn run_ingest_command(args: IngestArgs) -> Result<()> {
    let config = args.config();
    let mut progress: Box<dyn ProgressReporter> = if args.quiet {
        Box::new(NoProgress)
    } else {
        Box::new(DumpProgress::new(true))
    };
    info!(
        lang = %config.lang,
        pages = %config.describe(TableKind::Page),
        "Starting ingestion"
    );

    let start = Instant::now();
    let rt = build_runtime()?;
    let stats = rt.block_on(ingest(&args, &config, progress.as_mut()))?;

    print_summary(&stats, start.elapsed().as_secs_f64());
    Ok(())
}

fn run_schema_command(args: SchemaArgs) -> Result<()> {
    let config = IngestConfig {
        lang: args.source.lang.clone(),
        location: args.source.location(),
        ..IngestConfig::default()
    };
    let rt = build_runtime()?;
    let schema = rt.block_on(inspect_schema(&config, args.table))?;

    println!("{} ({})", args.table, config.describe(args.table));
    for (position, column) in schema.columns().iter().enumerate() {
        println!("  {position:>3}  {column}");
    }
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };

    // RUST_LOG wins over -v when set
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::default().add_directive(LevelFilter::from_level(level).into()));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("Failed to set tracing subscriber");

    let result = match cli.command {
        Commands::Ingest(args) => run_ingest_command(args),
        Commands::Schema(args) => run_schema_command(args),
    };

    match result {
        Ok(()) => {
            info!("Completed successfully");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Error: {:#}", e);
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
