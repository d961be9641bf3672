//! Dimload CLI - Maintain and query slowly changing dimension tables
//!
//! # Main Commands
//!
//! ```bash
//! dimload run changes.csv -c customer_dim.json      # Maintain the dimension
//! dimload lookup facts.csv -c customer_dim.json     # Resolve surrogate keys
//! ```
//!
//! # Debug Commands (for development)
//!
//! ```bash
//! dimload check -c customer_dim.json                # Validate config + table
//! dimload example-config                            # Show an example config
//! ```
//!
//! The database path comes from `--database` or the `DIMLOAD_DB`
//! environment variable (a `.env` file is honored).

use clap::{Parser, Subcommand};
use std::fs;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

use dimload::{
    preflight, run_job, validate_config, ConfigError, CsvRowSource, DimensionConfig, RunOptions,
    RunReport, SqliteDatabase,
};

#[derive(Parser)]
#[command(name = "dimload")]
#[command(about = "Maintain and query slowly changing dimension tables", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Maintain the dimension from a CSV change stream
    Run {
        /// Input CSV file
        input: PathBuf,

        /// Dimension job config (JSON)
        #[arg(short, long)]
        config: PathBuf,

        /// SQLite database file (default: $DIMLOAD_DB)
        #[arg(short, long)]
        database: Option<String>,

        /// Number of parallel workers
        #[arg(short, long, default_value = "1")]
        workers: usize,

        /// Output file for the augmented rows (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Resolve surrogate keys without writing to the dimension
    Lookup {
        /// Input CSV file
        input: PathBuf,

        /// Dimension job config (JSON)
        #[arg(short, long)]
        config: PathBuf,

        /// SQLite database file (default: $DIMLOAD_DB)
        #[arg(short, long)]
        database: Option<String>,

        /// Output file for the augmented rows (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Validate a config against the dimension table
    Check {
        /// Dimension job config (JSON)
        #[arg(short, long)]
        config: PathBuf,

        /// SQLite database file (default: $DIMLOAD_DB)
        #[arg(short, long)]
        database: Option<String>,
    },

    /// Show an example job config
    ExampleConfig,
}

fn main() {
    // Load .env file (if present)
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Run {
            input,
            config,
            database,
            workers,
            output,
        } => cmd_run(&input, &config, database, workers, output.as_deref()),

        Commands::Lookup {
            input,
            config,
            database,
            output,
        } => cmd_lookup(&input, &config, database, output.as_deref()),

        Commands::Check { config, database } => cmd_check(&config, database),

        Commands::ExampleConfig => cmd_example_config(),
    };

    if let Err(e) = result {
        eprintln!("❌ Error: {}", e);
        std::process::exit(1);
    }
}

fn database_path(flag: Option<String>) -> Result<String, Box<dyn std::error::Error>> {
    match flag.or_else(|| std::env::var("DIMLOAD_DB").ok()) {
        Some(path) => Ok(path),
        None => Err("no database given: use --database or set DIMLOAD_DB".into()),
    }
}

fn cmd_run(
    input: &Path,
    config_path: &Path,
    database: Option<String>,
    workers: usize,
    output: Option<&Path>,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = DimensionConfig::from_file(config_path)?;
    if !config.is_maintenance() {
        return Err(ConfigError::WrongMode {
            actual: "lookup",
            required: "maintenance",
        }
        .into());
    }
    let db_path = database_path(database)?;

    eprintln!("📄 Processing: {}", input.display());
    let mut source = CsvRowSource::open(input, &|field| config.field_type(field))?;

    let options = RunOptions {
        workers,
        stop: None,
    };
    let report = run_job(
        &config,
        &mut source,
        |_| SqliteDatabase::open(&db_path),
        &options,
    )?;

    print_report(&report);
    write_rows(&report, output)?;

    eprintln!("\n✨ Done!");
    Ok(())
}

fn cmd_lookup(
    input: &Path,
    config_path: &Path,
    database: Option<String>,
    output: Option<&Path>,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = DimensionConfig::from_file(config_path)?;
    if config.is_maintenance() {
        return Err(ConfigError::WrongMode {
            actual: "maintenance",
            required: "lookup",
        }
        .into());
    }
    let db_path = database_path(database)?;

    eprintln!("🔎 Looking up: {}", input.display());
    let mut source = CsvRowSource::open(input, &|field| config.field_type(field))?;

    let report = run_job(
        &config,
        &mut source,
        |_| SqliteDatabase::open(&db_path),
        &RunOptions::default(),
    )?;

    eprintln!("   Rows: {}", report.stats.rows_read);
    if report.stats.not_found > 0 {
        eprintln!("   ⚠️  Unmatched keys: {}", report.stats.not_found);
    }
    write_rows(&report, output)?;

    eprintln!("\n✨ Done!");
    Ok(())
}

fn cmd_check(
    config_path: &Path,
    database: Option<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = DimensionConfig::from_file(config_path)?;
    validate_config(&config)?;
    eprintln!("✅ Config is valid");

    let db_path = database_path(database)?;
    let mut db = SqliteDatabase::open(&db_path)?;
    preflight(&config, &mut db)?;
    eprintln!("✅ Table '{}' has all configured columns", config.table);

    Ok(())
}

fn cmd_example_config() -> Result<(), Box<dyn std::error::Error>> {
    let config = dimload::example_config();
    println!("{}", config.to_json()?);
    Ok(())
}

fn print_report(report: &RunReport) {
    eprintln!("   Run: {}", report.run_id);
    eprintln!("   Rows: {}", report.stats.rows_read);
    eprintln!("   Inserts: {}", report.stats.inserts);
    eprintln!("   In-place updates: {}", report.stats.updates_in_place);
    eprintln!("   Punch-throughs: {}", report.stats.punch_throughs);
    eprintln!("   Unchanged: {}", report.stats.no_changes);
    if let (Some(min), Some(max)) = (report.bounds.min, report.bounds.max) {
        eprintln!("   Event dates: {} .. {}", min, max);
    }
    if report.stopped {
        eprintln!("   ⚠️  Run was stopped before the end of the input");
    }
}

/// Render one CSV cell, quoting only when the content requires it.
fn csv_cell(text: &str) -> String {
    if text.contains(',') || text.contains('"') || text.contains('\n') {
        format!("\"{}\"", text.replace('"', "\"\""))
    } else {
        text.to_string()
    }
}

fn write_rows(report: &RunReport, path: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    let mut out = String::new();
    let header: Vec<String> = report.schema.names().iter().map(|n| csv_cell(n)).collect();
    out.push_str(&header.join(","));
    out.push('\n');
    for row in &report.rows {
        let cells: Vec<String> = row.iter().map(|v| csv_cell(&v.to_string())).collect();
        out.push_str(&cells.join(","));
        out.push('\n');
    }
    write_output(&out, path)
}

fn write_output(content: &str, path: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    match path {
        Some(p) => {
            fs::write(p, content)?;
            eprintln!("💾 Output written to: {}", p.display());
        }
        None => {
            print!("{}", content);
        }
    }
    Ok(())
}
