//! runalyzer: query simulation run databases
//!
//! # Usage
//!
//! ```bash
//! # Execute a shorthand query
//! runalyzer runs.db 'select $walltime.max where runs.id = 3'
//!
//! # Dry run (show rewritten SQL only)
//! runalyzer runs.db 'select $dt, $walltime' --dry-run
//!
//! # Interactive console
//! runalyzer runs.db repl
//! ```

use clap::{Parser, Subcommand};
use colored::*;
use runalyzer::config::Config;
use runalyzer::prelude::*;
use runalyzer::repl;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "runalyzer")]
#[command(version)]
#[command(about = "Shorthand SQL for simulation run databases", long_about = None)]
#[command(after_help = "EXAMPLES:
    runalyzer runs.db 'select $walltime'
    runalyzer runs.db 'select $dt.max, $walltime.avg where runs.id = ?1' --bind 3
    runalyzer runs.db mangle 'select $dt $$ order by dt'
    runalyzer runs.db repl")]
struct Cli {
    /// Run database file
    #[arg(env = "RUNALYZER_DB")]
    database: String,

    /// Query to execute
    query: Option<String>,

    /// Don't execute, just show the rewritten SQL
    #[arg(short, long)]
    dry_run: bool,

    /// Run queries exactly as written
    #[arg(long)]
    no_mangle: bool,

    /// Positional parameter bindings (?1, ?2, etc.)
    #[arg(short, long, value_delimiter = ',')]
    bind: Vec<String>,

    /// Output format
    #[arg(short, long, value_enum)]
    format: Option<OutputFormat>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Interactive console
    Repl,
    /// Show the rewritten form of a query
    Mangle {
        /// The query to rewrite
        query: String,
    },
    /// List run properties
    Runprops,
    /// List time-dependent quantities
    Quantities,
}

fn main() {
    let cli = Cli::parse();

    if let Err(e) = try_main(&cli) {
        eprintln!("{} {:#}", "Error:".red().bold(), e);
        std::process::exit(1);
    }
}

fn try_main(cli: &Cli) -> anyhow::Result<()> {
    let config = Config::load_default()
        .map_err(|e| anyhow::anyhow!("Failed to load configuration: {}", e))?;

    init_tracing(&config, cli.verbose);
    run(cli, &config)?;
    Ok(())
}

fn init_tracing(config: &Config, verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("runalyzer=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_filter))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run(cli: &Cli, config: &Config) -> Result<(), RunalyzerError> {
    let mode = if cli.no_mangle { Mode::Literal } else { config.mode() };
    let format = cli.format.unwrap_or(config.format);

    let storage = SqliteStorage::open(&cli.database)?;
    let mut session = Session::new(storage, mode);

    match &cli.command {
        Some(Commands::Repl) => {
            let history = config.history_path();
            repl::run_repl(&mut session, history.as_deref(), format);
        }
        Some(Commands::Mangle { query }) => show_rewrite(&mut session, query)?,
        Some(Commands::Runprops) => {
            for prop in session.run_properties()? {
                println!("{}", prop);
            }
        }
        Some(Commands::Quantities) => {
            let result = session.quantities()?;
            format_output(&result, format);
        }
        None => match &cli.query {
            Some(query) => execute_query(&mut session, query, cli, format)?,
            None => {
                println!("{}", "runalyzer — shorthand SQL for run databases".cyan().bold());
                println!();
                println!("Usage: runalyzer <DATABASE> <QUERY> [OPTIONS]");
                println!();
                println!("Try: runalyzer --help");
            }
        },
    }

    Ok(())
}

fn show_rewrite(session: &mut Session<SqliteStorage>, query: &str) -> Result<(), RunalyzerError> {
    let rewrite = session.mangle_sql(query)?;
    println!("{}", "Rewritten SQL:".green().bold());
    println!("{}", rewrite.sql.white());

    if !rewrite.columns.is_empty() {
        println!();
        println!("{}", "Columns:".cyan());
        for column in rewrite.columns.iter() {
            println!("  {} → {}", column.to_string().yellow(), column.select_expr());
        }
    }
    Ok(())
}

fn execute_query(
    session: &mut Session<SqliteStorage>,
    query: &str,
    cli: &Cli,
    format: OutputFormat,
) -> Result<(), RunalyzerError> {
    if cli.verbose {
        println!("{} {}", "Input:".dimmed(), query.yellow());
    }

    if cli.dry_run {
        show_rewrite(session, query)?;
        if !cli.bind.is_empty() {
            println!();
            println!("{}", "Bindings:".cyan());
            for (i, b) in cli.bind.iter().enumerate() {
                println!("  ?{} = {}", i + 1, b.yellow());
            }
        }
        return Ok(());
    }

    let params: Vec<Value> = cli.bind.iter().map(|b| parse_binding(b)).collect();
    let result = session.q(query, &params)?;
    format_output(&result, format);
    Ok(())
}

/// Try to parse as number, otherwise use as string.
fn parse_binding(binding: &str) -> Value {
    if let Ok(n) = binding.parse::<i64>() {
        Value::Int(n)
    } else if let Ok(f) = binding.parse::<f64>() {
        Value::Float(f)
    } else if binding == "null" {
        Value::Null
    } else {
        Value::from(binding)
    }
}

fn format_output(result: &QueryResult, format: OutputFormat) {
    if result.columns.is_empty() {
        println!("{}", "(no results)".dimmed());
        return;
    }

    match format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::to_string_pretty(&to_json(result)).unwrap_or_default()
            );
        }
        OutputFormat::Table => {
            let table = render_table(result);
            let mut lines = table.lines();
            if let Some(header) = lines.next() {
                println!("{}", header.white().bold());
            }
            if let Some(sep) = lines.next() {
                println!("{}", sep.dimmed());
            }
            for line in lines {
                println!("{}", line);
            }

            println!();
            println!("{} row(s) returned", result.rows.len().to_string().cyan());
        }
    }
}
