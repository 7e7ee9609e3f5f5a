//! Kuba Expr command line
//!
//! Evaluates query requests against a dataset held in a JSON file, which is
//! handy for checking expressions without a historian.
//!
//! # CLI Commands
//!
//! - `run` - Evaluate a request JSON against a dataset JSON and print the responses
//! - `parse` - Print the function tree of an expression
//! - `check-config` - Validate configuration file
//!
//! # Dataset format
//!
//! ```json
//! {
//!   "catalog": { "ActiveMeasurements": [ { "ID": "PPA:1", "PointTag": "SHELBY:FREQ" } ] },
//!   "samples": [ { "key": "PPA:1", "value": 59.98, "time": 1000 } ]
//! }
//! ```
//!
//! # Configuration
//!
//! Read from `--config`, else `./kuba-expr.toml` when present, else defaults.
//! `KUBA_EXPR_*` environment variables override file values.

use clap::{Parser, Subcommand};
use kuba_expr::query::parser::{parse_expression, QueryModifiers};
use kuba_expr::query::{InMemoryCatalog, InMemoryDataSource, QueryEngine, QueryRequest};
use kuba_expr::{EngineConfig, Error, Result, SeriesSample};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

const DEFAULT_CONFIG_FILE: &str = "kuba-expr.toml";

// =============================================================================
// CLI Definition
// =============================================================================

/// Kuba Expr - time-series query expression engine
#[derive(Parser)]
#[command(name = "kuba-expr")]
#[command(author = "Victor Oseghale")]
#[command(version)]
#[command(about = "Evaluate time-series target expressions", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Evaluate a query request against a dataset
    Run {
        /// Dataset JSON: metadata catalog and raw samples
        #[arg(short, long)]
        dataset: PathBuf,

        /// Query request JSON
        #[arg(short, long)]
        request: PathBuf,

        /// Pretty-print the response
        #[arg(long)]
        pretty: bool,
    },

    /// Print the function tree of a target expression
    Parse {
        /// Target expression
        expression: String,
    },

    /// Validate configuration file
    CheckConfig,
}

/// Catalog and samples loaded from disk
#[derive(Debug, Default, Deserialize)]
struct Dataset {
    #[serde(default)]
    catalog: InMemoryCatalog,
    #[serde(default)]
    samples: Vec<SeriesSample>,
}

// =============================================================================
// CLI Command Handlers
// =============================================================================

fn load_config(cli: &Cli) -> Result<EngineConfig> {
    let config = match &cli.config {
        Some(path) => EngineConfig::from_file_with_env(path)?,
        None if Path::new(DEFAULT_CONFIG_FILE).exists() => {
            EngineConfig::from_file_with_env(DEFAULT_CONFIG_FILE)?
        }
        None => EngineConfig::from_env(),
    };
    config.validate()?;
    Ok(config)
}

async fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let contents = tokio::fs::read_to_string(path).await.map_err(|e| {
        Error::General(format!("Failed to read {}: {}", path.display(), e))
    })?;
    Ok(serde_json::from_str(&contents)?)
}

/// Evaluate a request and print the responses as JSON
async fn cmd_run(config: EngineConfig, dataset: &Path, request: &Path, pretty: bool) -> Result<()> {
    let dataset: Dataset = read_json(dataset).await?;
    let request: QueryRequest = read_json(request).await?;
    debug!(
        samples = dataset.samples.len(),
        targets = request.targets.len(),
        "loaded dataset and request"
    );

    let source: InMemoryDataSource = dataset.samples.into_iter().collect();
    let engine = QueryEngine::new(config, Arc::new(dataset.catalog), Arc::new(source));
    let responses = engine.query(&request).await?;

    let output = if pretty {
        serde_json::to_string_pretty(&responses)?
    } else {
        serde_json::to_string(&responses)?
    };
    println!("{}", output);
    Ok(())
}

/// Print modifiers and the nested call tree of an expression
fn cmd_parse(expression: &str) -> Result<()> {
    let (modifiers, expression) = QueryModifiers::extract(expression);
    if !modifiers.is_empty() {
        println!("Modifiers: {:?}", modifiers);
    }
    print_tree(&expression, 0)
}

fn print_tree(expression: &str, depth: usize) -> Result<()> {
    let parsed = parse_expression(expression)?;
    let indent = "  ".repeat(depth);

    for function in &parsed.functions {
        let operation = function.group_operation.prefix();
        if function.parameters.is_empty() {
            println!("{}{}{}", indent, operation, function.kind);
        } else {
            println!(
                "{}{}{} [{}]",
                indent,
                operation,
                function.kind,
                function.parameters.join(", ")
            );
        }
        print_tree(&function.inner_expression, depth + 1)?;
    }

    let literals = parsed.reduced_text.trim().trim_matches(';').trim();
    if !literals.is_empty() {
        println!("{}{}", indent, literals);
    }
    Ok(())
}

/// Validate configuration and print summary
fn cmd_check_config(config: &EngineConfig) {
    println!("Configuration is valid!");
    println!();
    println!("Cache:");
    println!("  Expiration: {}s", config.cache.expiration_secs);
    println!();
    println!("Query:");
    println!("  Max parallel targets: {}", config.query.max_parallel_targets);
    println!("  Metadata table: {}", config.query.default_metadata_table);
    println!(
        "  Fields: key={}, tag={}, signal id={}",
        config.query.key_field, config.query.tag_field, config.query.signal_id_field
    );
    println!();
    println!("Logging:");
    println!("  Log level: {}", config.logging.log_level);
}

// =============================================================================
// Main Entry Point
// =============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli)?;

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.logging.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    info!("Kuba Expr v{}", env!("CARGO_PKG_VERSION"));

    match &cli.command {
        Commands::Run {
            dataset,
            request,
            pretty,
        } => cmd_run(config, dataset, request, *pretty).await,
        Commands::Parse { expression } => cmd_parse(expression),
        Commands::CheckConfig => {
            cmd_check_config(&config);
            Ok(())
        }
    }
}
