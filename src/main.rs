use anyhow::{bail, Context, Result};
use ariadne::annotate::{annotate, minimal};
use ariadne::config::{
    ConvertOptions, OutputConfig, PipelineConfig, PoolConfig, ShardBy, Table, DEFAULT_CSV_SHARDS,
    MAX_THREADS, MIN_THREADS,
};
use ariadne::feeder::{is_admitted, run_pipeline};
use ariadne::models::ArticleRecord;
use ariadne::render::WikitextRenderer;
use ariadne::source::XmlDumpSource;
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::fs;
use std::io::{self, Read};
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[derive(Parser)]
#[command(name = "ariadne")]
#[command(about = "Annotate encyclopedia dumps with link offsets and page metadata")]
struct Cli {
    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Render every article of a dump into sharded CSV tables
    Annotate(AnnotateArgs),
    /// Render a single article and print it as JSON
    Render(RenderArgs),
    /// Merge sharded CSV files into one file per table
    MergeCsvs(MergeCsvsArgs),
}

#[derive(Clone, Copy, ValueEnum)]
enum ShardKey {
    /// Submission order
    Ordinal,
    /// Hash of the article id
    Id,
}

#[derive(Clone, Copy, ValueEnum)]
enum TableArg {
    Pages,
    Links,
    Redirects,
}

impl From<TableArg> for Table {
    fn from(arg: TableArg) -> Self {
        match arg {
            TableArg::Pages => Table::Pages,
            TableArg::Links => Table::Links,
            TableArg::Redirects => Table::Redirects,
        }
    }
}

#[derive(Args)]
struct AnnotateArgs {
    /// Path to the dump file (.xml or .xml.bz2, "-" for stdin)
    #[arg(short, long)]
    input: String,

    /// Output directory for generated files
    #[arg(short, long)]
    output: String,

    /// Number of CSV output shards per table
    #[arg(long, default_value_t = DEFAULT_CSV_SHARDS)]
    csv_shards: u32,

    /// How records are assigned to shards
    #[arg(long, value_enum, default_value_t = ShardKey::Ordinal)]
    shard_by: ShardKey,

    /// Tables to write (default: all)
    #[arg(long, value_enum, value_delimiter = ',')]
    tables: Vec<TableArg>,

    /// Worker threads (default: half the cores; 0 runs everything on the feeder thread)
    #[arg(short, long)]
    threads: Option<usize>,

    /// Lower bound for the default thread count
    #[arg(long, default_value_t = MIN_THREADS)]
    min_threads: usize,

    /// Upper bound for the default thread count
    #[arg(long, default_value_t = MAX_THREADS)]
    max_threads: usize,

    /// Task queue capacity (default: thread count)
    #[arg(long)]
    queue_capacity: Option<usize>,

    /// Keep section titles in the rendered text
    #[arg(long)]
    keep_section_titles: bool,

    /// Also write page rows for pages outside the main and category namespaces
    #[arg(long)]
    include_other_namespaces: bool,

    /// Limit number of records to read (for testing)
    #[arg(long)]
    limit: Option<u64>,

    /// Dry run - don't write output files
    #[arg(long)]
    dry_run: bool,

    /// Clear the output directory before starting
    #[arg(long)]
    clean: bool,

    /// Hide the progress spinner
    #[arg(short, long)]
    quiet: bool,
}

#[derive(Args)]
struct RenderArgs {
    /// File holding raw markup ("-" for stdin)
    input: String,

    /// Article title
    #[arg(long, default_value = "Untitled")]
    title: String,

    /// Article id
    #[arg(long, default_value = "0")]
    id: String,

    /// Keep section titles in the rendered text
    #[arg(long)]
    keep_section_titles: bool,
}

#[derive(Args)]
struct MergeCsvsArgs {
    /// Output directory containing sharded CSVs (e.g., pages_000.csv, pages_001.csv)
    #[arg(short, long)]
    output: String,
}

fn run_annotate(args: AnnotateArgs) -> Result<()> {
    if args.clean {
        let output_path = Path::new(&args.output);
        if output_path.exists() {
            info!("Cleaning output directory: {}", args.output);
            fs::remove_dir_all(output_path)
                .with_context(|| format!("Failed to clean output directory: {}", args.output))?;
        }
    }

    let mut output = OutputConfig::new(&args.output);
    output.shard_count = args.csv_shards;
    output.shard_by = match args.shard_by {
        ShardKey::Ordinal => ShardBy::Ordinal,
        ShardKey::Id => ShardBy::ArticleId,
    };
    if !args.tables.is_empty() {
        output.tables = args.tables.iter().map(|&t| Table::from(t)).collect();
    }
    output.include_other_namespaces = args.include_other_namespaces;
    output.dry_run = args.dry_run;

    if args.min_threads > args.max_threads {
        bail!(
            "--min-threads ({}) exceeds --max-threads ({})",
            args.min_threads,
            args.max_threads
        );
    }

    let mut config = PipelineConfig::new(output);
    config.pool = PoolConfig {
        threads: args.threads,
        min_threads: args.min_threads,
        max_threads: args.max_threads,
        queue_capacity: args.queue_capacity,
    };
    config.convert.keep_section_titles = args.keep_section_titles;
    config.limit = args.limit;
    config.show_progress = !args.quiet;

    let mut source = XmlDumpSource::open(&args.input)?;

    info!("Starting annotation pass");
    let start = Instant::now();
    let stats = run_pipeline(&mut source, &config, Arc::new(WikitextRenderer::new()))?;
    let duration = start.elapsed();
    info!(duration_secs = duration.as_secs_f64(), "Annotation complete");

    println!();
    println!("=== Summary ===");
    println!("Total time:         {:.2}s", duration.as_secs_f64());
    println!();
    println!("Records seen:       {}", stats.seen());
    println!("Articles rendered:  {}", stats.rendered());
    println!("Minimal pages:      {}", stats.minimal());
    println!("Redirects:          {}", stats.redirects());
    println!("Disambiguations:    {}", stats.disambiguations());
    println!("Stubs:              {}", stats.stubs());
    println!("Links:              {}", stats.links());
    println!("Categories:         {}", stats.categories());
    println!("Render failures:    {}", stats.failures());
    println!("Caller-run tasks:   {}", stats.caller_runs());
    println!("Rows written:       {}", stats.rows());
    println!("Write errors:       {}", stats.write_errors());

    Ok(())
}

fn run_render(args: RenderArgs) -> Result<()> {
    let mut raw = String::new();
    if args.input == "-" {
        io::stdin()
            .read_to_string(&mut raw)
            .context("Failed to read markup from stdin")?;
    } else {
        raw = fs::read_to_string(&args.input)
            .with_context(|| format!("Failed to read markup file: {}", args.input))?;
    }

    let record = ArticleRecord::main(args.id, args.title, raw);
    let options = ConvertOptions {
        keep_section_titles: args.keep_section_titles,
        ..ConvertOptions::default()
    };
    let article = if is_admitted(&record) {
        annotate(&record, &WikitextRenderer::new(), options)?
    } else {
        minimal(&record)
    };

    println!("{}", serde_json::to_string_pretty(&article)?);
    Ok(())
}

fn run_merge(args: MergeCsvsArgs) -> Result<()> {
    let merged = ariadne::merge::merge_csv_shards(&args.output)?;
    for table in merged {
        println!(
            "{:<10} {} shards, {} rows",
            table.table.name(),
            table.shards,
            table.rows
        );
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

    let filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
        return ExitCode::FAILURE;
    }

    let result = match cli.command {
        Commands::Annotate(args) => run_annotate(args),
        Commands::Render(args) => run_render(args),
        Commands::MergeCsvs(args) => run_merge(args),
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
