//! CLI for the strata embedded time-series database.
//!
//! Provides commands for creating streams, loading CSV data, running queries
//! and benchmarking a scratch database.

mod input;

use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use clap::{Parser, Subcommand, ValueEnum};
use strata::{Connection, Options, QueryOutput, Value, ValueKind};
use tracing_subscriber::EnvFilter;

/// strata: embedded time-series database CLI.
#[derive(Parser)]
#[command(name = "strata", version, about)]
struct Cli {
    /// JSON file with connection options.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Available CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// List streams with their kind, segments, points and disk usage.
    Info {
        /// Database root directory.
        root: PathBuf,
    },

    /// Create a stream.
    Create {
        /// Database root directory.
        root: PathBuf,

        /// Stream selector, e.g. `cpu{host="a"}`.
        selector: String,

        /// Value kind: u64, i64 or f64.
        #[arg(long)]
        kind: ValueKind,
    },

    /// Load `timestamp,value` rows from a CSV file into a stream.
    Insert {
        /// Database root directory.
        root: PathBuf,

        /// Stream selector.
        selector: String,

        /// CSV file; a header row is optional.
        #[arg(long)]
        file: PathBuf,

        /// Value kind of the stream, used when creating it.
        #[arg(long, default_value = "u64")]
        kind: ValueKind,

        /// Create the stream if it does not exist.
        #[arg(long)]
        create: bool,
    },

    /// Run a query and print its results.
    Query {
        /// Database root directory.
        root: PathBuf,

        /// Selector, optionally wrapped in an aggregate such as `sum(...)`.
        query: String,

        /// Inclusive range start (default 0).
        #[arg(long)]
        start: Option<u64>,

        /// Exclusive range end (default unbounded).
        #[arg(long)]
        end: Option<u64>,

        /// Output format.
        #[arg(long, default_value = "csv")]
        format: OutputFormat,
    },

    /// Time ingestion, a full scan and a sum over a scratch database.
    Bench {
        /// Number of points to write.
        #[arg(long, default_value = "1000000")]
        points: u64,
    },
}

/// Output format for query results.
#[derive(Clone, ValueEnum)]
enum OutputFormat {
    /// Comma-separated values.
    Csv,
    /// A JSON document.
    Json,
}

type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();

    let result = load_options(cli.config.as_deref()).and_then(|options| match cli.command {
        Commands::Info { root } => cmd_info(&root, options),
        Commands::Create { root, selector, kind } => cmd_create(&root, options, &selector, kind),
        Commands::Insert {
            root,
            selector,
            file,
            kind,
            create,
        } => cmd_insert(&root, options, &selector, &file, kind, create),
        Commands::Query {
            root,
            query,
            start,
            end,
            format,
        } => cmd_query(&root, options, &query, start, end, &format),
        Commands::Bench { points } => cmd_bench(options, points),
    });

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

fn load_options(path: Option<&Path>) -> CliResult<Options> {
    match path {
        Some(path) => Ok(Options::load(path)?),
        None => Ok(Options::default()),
    }
}

/// Implements `strata info <root>`.
fn cmd_info(root: &Path, options: Options) -> CliResult<()> {
    if !root.join("catalog.json").exists() {
        return Err(format!("No database found at '{}'", root.display()).into());
    }

    let connection = Connection::open_with_options(root, options)?;
    let stats = connection.stream_stats()?;

    println!("Database: {}", root.display());
    println!("Streams: {}", stats.len());
    println!();

    for (info, stats) in &stats {
        println!("  [{}] {} ({})", info.id, info.canonical, info.kind);
        println!(
            "    Segments: {}, points: {} durable + {} buffered, disk: {}",
            stats.segments,
            stats.durable_points,
            stats.buffered_points,
            format_bytes(stats.disk_bytes)
        );
    }

    let total_size = dir_size(root)?;
    println!();
    println!("Total disk usage: {} ({total_size} bytes)", format_bytes(total_size));

    connection.close()?;
    Ok(())
}

/// Implements `strata create <root> <selector> --kind <kind>`.
fn cmd_create(root: &Path, options: Options, selector: &str, kind: ValueKind) -> CliResult<()> {
    let connection = Connection::open_with_options(root, options)?;
    let (info, created) = connection.get_or_create_stream(selector, kind)?;
    if created {
        println!("Created stream [{}] {} ({})", info.id, info.canonical, info.kind);
    } else {
        println!("Stream [{}] {} already exists", info.id, info.canonical);
    }

    connection.close()?;
    Ok(())
}

/// Implements `strata insert <root> <selector> --file <csv>`.
fn cmd_insert(
    root: &Path,
    options: Options,
    selector: &str,
    file: &Path,
    kind: ValueKind,
    create: bool,
) -> CliResult<()> {
    let connection = Connection::open_with_options(root, options)?;

    let kind = if create {
        let (info, created) = connection.get_or_create_stream(selector, kind)?;
        if created {
            tracing::info!("created stream {} ({kind})", info.canonical);
        }
        info.kind
    } else {
        let inserter = connection.inserter(selector)?;
        inserter.kind()
    };

    let points = input::read_points(file, kind)?;

    let mut inserter = connection.inserter(selector)?;
    let start = Instant::now();
    for point in &points {
        inserter.insert(point.timestamp, point.value)?;
    }
    inserter.close()?;

    println!(
        "Inserted {} point(s) into {selector} in {:.3?}",
        points.len(),
        start.elapsed()
    );

    connection.close()?;
    Ok(())
}

/// Implements `strata query <root> <query>`.
fn cmd_query(
    root: &Path,
    options: Options,
    query: &str,
    start: Option<u64>,
    end: Option<u64>,
    format: &OutputFormat,
) -> CliResult<()> {
    let connection = Connection::open_with_options(root, options)?;
    let mut statement = connection.prepare(query, start, end)?;

    let mut outputs = Vec::new();
    loop {
        match statement.next_output()? {
            QueryOutput::Done => break,
            output => outputs.push(output),
        }
    }

    let stdout = io::stdout();
    match format {
        OutputFormat::Csv => {
            let mut writer = csv::Writer::from_writer(stdout.lock());
            match statement.return_type() {
                strata::ReturnType::Vector => writer.write_record(["timestamp", "value"])?,
                strata::ReturnType::Scalar => writer.write_record(["value"])?,
            }
            for output in &outputs {
                match output {
                    QueryOutput::Vector(point) => {
                        let record = [point.timestamp.to_string(), point.value.to_string()];
                        writer.write_record(record)?;
                    }
                    QueryOutput::Scalar(value) => writer.write_record([value.to_string()])?,
                    QueryOutput::Done => {}
                }
            }
            writer.flush()?;
        }
        OutputFormat::Json => {
            let data: Vec<serde_json::Value> = outputs
                .iter()
                .filter_map(|output| match output {
                    QueryOutput::Vector(point) => Some(serde_json::json!({
                        "timestamp": point.timestamp,
                        "value": json_value(point.value),
                    })),
                    QueryOutput::Scalar(value) => Some(json_value(*value)),
                    QueryOutput::Done => None,
                })
                .collect();

            let document = serde_json::json!({
                "query": query,
                "range": statement.plan().range.to_string(),
                "kind": statement.value_kind().to_string(),
                "return_type": statement.return_type().to_string(),
                "count": data.len(),
                "data": data,
            });

            let mut out = stdout.lock();
            serde_json::to_writer_pretty(&mut out, &document)?;
            writeln!(out)?;
        }
    }

    connection.close()?;
    Ok(())
}

fn json_value(value: Value) -> serde_json::Value {
    match value {
        Value::UnsignedInteger(v) => serde_json::json!(v),
        Value::SignedInteger(v) => serde_json::json!(v),
        Value::Float(v) => serde_json::json!(v),
    }
}

/// Implements `strata bench`.
#[allow(clippy::cast_precision_loss)] // Benchmark stats are fine with f64 precision
fn cmd_bench(options: Options, points: u64) -> CliResult<()> {
    const SELECTOR: &str = r#"bench{host="local"}"#;

    println!("strata benchmark");
    println!("  Points: {points}");
    println!();

    let temp_dir = tempfile::tempdir()?;
    let connection = Connection::open_with_options(temp_dir.path(), options)?;
    connection.create_stream(SELECTOR, ValueKind::UnsignedInteger)?;

    let start = Instant::now();
    let mut inserter = connection.inserter(SELECTOR)?;
    for i in 0..points {
        inserter.insert_unsigned(i, i)?;
    }
    inserter.close()?;
    let ingest = start.elapsed();

    let start = Instant::now();
    let mut scanned = 0u64;
    for point in connection.prepare(SELECTOR, None, None)? {
        point?;
        scanned += 1;
    }
    let scan = start.elapsed();

    let start = Instant::now();
    let mut statement = connection.prepare(&format!("sum({SELECTOR})"), None, None)?;
    let sum = statement.next_scalar()?;
    let aggregate = start.elapsed();

    let per_point = |elapsed: std::time::Duration| elapsed.as_nanos() as f64 / points.max(1) as f64;

    println!("Results:");
    println!("  Ingest: {ingest:.3?} ({:.1} ns/point)", per_point(ingest));
    println!("  Scan:   {scan:.3?} ({scanned} points, {:.1} ns/point)", per_point(scan));
    if let Some(sum) = sum {
        println!("  Sum:    {aggregate:.3?} (= {sum})");
    }
    println!("  Disk:   {}", format_bytes(dir_size(temp_dir.path())?));

    connection.close()?;
    Ok(())
}

/// Formats a byte count as a human-readable string.
#[allow(clippy::cast_precision_loss)] // Byte counts are display-only
fn format_bytes(bytes: u64) -> String {
    if bytes >= 1_048_576 {
        format!("{:.1} MB", bytes as f64 / 1_048_576.0)
    } else if bytes >= 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{bytes} B")
    }
}

/// Recursively calculates directory size.
fn dir_size(path: &Path) -> CliResult<u64> {
    let mut total = 0;
    if path.is_dir() {
        for entry in std::fs::read_dir(path)? {
            let entry = entry?;
            let path = entry.path();
            if path.is_dir() {
                total += dir_size(&path)?;
            } else {
                total += entry.metadata()?.len();
            }
        }
    }
    Ok(total)
}
