use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;
use wikidb::config;
use wikidb::extract::Extractor;
use wikidb::filter::{parse_range, CharRange, FilterOptions, WikiTextFilter};
use wikidb::pipeline::{ingest, PipelineOptions, WorkerContext};
use wikidb::sqlite::SqliteConnector;
use wikidb::store::{ResilientStore, RetryPolicy};

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[derive(Parser)]
#[command(name = "wikidb")]
#[command(about = "Load Wikipedia dumps into a relational database")]
struct Cli {
    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Reset the schema and load a dump
    Load(LoadArgs),
    /// Reset the schema only
    Init(InitArgs),
}

#[derive(Args)]
struct DbArgs {
    /// SQLite database file
    #[arg(long)]
    db: PathBuf,

    /// SQL script that (re)creates the schema
    #[arg(long, default_value = config::DEFAULT_INIT_SCRIPT)]
    init_script: PathBuf,

    /// Do not ask before resetting the database
    #[arg(short = 'y', long)]
    silent: bool,
}

#[derive(Args)]
struct InitArgs {
    #[command(flatten)]
    db: DbArgs,
}

#[derive(Args)]
struct LoadArgs {
    /// Path or file:// URL of the dump (.xml.bz2)
    #[arg(long)]
    src: String,

    #[command(flatten)]
    db: DbArgs,

    /// Number of worker threads (1 = sequential)
    #[arg(long, default_value_t = 1)]
    workers: usize,

    /// Stop after roughly this many records (for testing)
    #[arg(long)]
    limit: Option<u64>,

    /// Decode HTML entities in bodies
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    remove_html: bool,

    /// Allowed character range, e.g. 0x20,0x7e (repeatable)
    #[arg(long = "valid-unichrs", value_parser = parse_range_arg)]
    valid_unichrs: Vec<CharRange>,

    /// Forbidden character range (repeatable)
    #[arg(long = "invalid-unichrs", value_parser = parse_range_arg)]
    invalid_unichrs: Vec<CharRange>,

    /// Collapse runs of whitespace
    #[arg(long)]
    remove_multiple_whitespaces: bool,

    /// Attempts per statement before a lost connection is fatal
    #[arg(long, default_value_t = config::DEFAULT_MAX_ATTEMPTS)]
    max_retries: u32,

    /// Delay between reconnect attempts
    #[arg(long, default_value_t = config::DEFAULT_RETRY_DELAY_MS)]
    retry_delay_ms: u64,

    /// Namespaces to load (repeatable, default 0)
    #[arg(long)]
    namespace: Vec<i32>,
}

fn parse_range_arg(text: &str) -> Result<CharRange, String> {
    parse_range(text).map_err(|e| e.to_string())
}

fn confirm_reset(db: &Path, input: &mut impl BufRead, output: &mut impl Write) -> Result<bool> {
    write!(
        output,
        "This will drop and recreate all tables in {}. Continue? [y/N] ",
        db.display()
    )?;
    output.flush()?;

    let mut answer = String::new();
    input.read_line(&mut answer)?;
    Ok(matches!(answer.trim().to_lowercase().as_str(), "y" | "yes"))
}

fn prompt_on_terminal(db: &Path) -> Result<bool> {
    confirm_reset(db, &mut io::stdin().lock(), &mut io::stdout())
}

/// Runs the init script. Returns `false` when the user declines the reset.
fn reset_database(
    args: &DbArgs,
    policy: RetryPolicy,
    confirm: impl FnOnce(&Path) -> Result<bool>,
) -> Result<bool> {
    if !args.init_script.exists() {
        warn!(
            script = %args.init_script.display(),
            "Init script not found, keeping existing schema"
        );
        return Ok(true);
    }

    if !args.silent && !confirm(&args.db)? {
        info!("Reset declined");
        println!("Aborted, database left untouched.");
        return Ok(false);
    }

    let mut store = ResilientStore::new(SqliteConnector::new(&args.db), policy);
    store
        .run_script(&args.init_script)
        .with_context(|| format!("Failed to run {}", args.init_script.display()))?;
    store.close()?;

    info!(db = %args.db.display(), "Database initialized");
    Ok(true)
}

fn run_load(args: LoadArgs) -> Result<()> {
    let policy = RetryPolicy {
        max_attempts: args.max_retries.max(1),
        delay: Duration::from_millis(args.retry_delay_ms),
    };
    if !reset_database(&args.db, policy, prompt_on_terminal)? {
        return Ok(());
    }

    let filter_options = FilterOptions {
        remove_html: args.remove_html,
        valid_ranges: args.valid_unichrs,
        invalid_ranges: args.invalid_unichrs,
        collapse_whitespace: args.remove_multiple_whitespaces,
    };
    let options = PipelineOptions {
        workers: args.workers,
        limit: args.limit,
        ..Default::default()
    };
    let connector = SqliteConnector::new(&args.db.db);
    let extractor = Extractor::new(args.namespace);

    let factory = || {
        WorkerContext::new(
            WikiTextFilter::new(filter_options.clone()),
            ResilientStore::new(connector.clone(), policy),
        )
    };

    info!(src = %args.src, workers = options.workers, "Starting load");
    let report = ingest(&args.src, &extractor, factory, &options)?;
    let stats = &report.stats;

    println!();
    println!("=== Summary ===");
    println!(
        "Load time:          {:.2}s",
        report.dispatch_time.as_secs_f64()
    );
    println!(
        "Redirect time:      {:.2}s",
        report.resolve_time.as_secs_f64()
    );
    println!(
        "Total time:         {:.2}s",
        (report.dispatch_time + report.resolve_time).as_secs_f64()
    );
    println!();
    println!("Records processed:  {}", stats.processed());
    println!("Articles stored:    {}", stats.articles());
    println!("Records skipped:    {}", stats.skipped());
    println!("Redirects found:    {}", stats.redirects());
    println!("Redirects stored:   {}", stats.resolved());
    println!("Redirects dropped:  {}", stats.dropped());

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

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("Failed to set tracing subscriber");

    let result = match cli.command {
        Commands::Load(args) => run_load(args),
        Commands::Init(args) => {
            reset_database(&args.db, RetryPolicy::default(), prompt_on_terminal).map(|_| ())
        }
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
