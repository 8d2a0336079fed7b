use clap::{Parser, Subcommand, ValueEnum};
use docschema::reference::object_id_candidates;
use docschema::{DiscoveryConfig, MemoryClient, MetaCatalog, ScanStrategy, SessionState};
use serde_json::json;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;

/// docschema CLI: infer collection schemas from a document dataset
#[derive(Parser)]
#[command(name = "docschema", version, about)]
struct Cli {
    /// Dataset directory: one subdirectory per database (default: current directory)
    #[arg(long, default_value = ".")]
    data_dir: PathBuf,

    /// Output format
    #[arg(long, default_value = "yaml")]
    format: OutputFormat,

    /// Discovery config file (YAML)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override the configured scan strategy
    #[arg(long)]
    strategy: Option<Strategy>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    Yaml,
    Json,
}

#[derive(Clone, Copy, ValueEnum)]
enum Strategy {
    Fast,
    Medium,
    Full,
}

impl From<Strategy> for ScanStrategy {
    fn from(strategy: Strategy) -> Self {
        match strategy {
            Strategy::Fast => ScanStrategy::Fast,
            Strategy::Medium => ScanStrategy::Medium,
            Strategy::Full => ScanStrategy::Full,
        }
    }
}

#[derive(Subcommand)]
enum Command {
    /// List databases
    Databases,

    /// List collections in a database
    Collections {
        /// Database name
        database: String,
    },

    /// Show the discovered field tree of a collection
    Describe {
        /// Database name
        database: String,
        /// Collection name
        collection: String,
    },

    /// Show the collection flattened into columns
    Columns {
        /// Database name
        database: String,
        /// Collection name
        collection: String,
    },

    /// Show indexes mapped onto discovered fields
    Indexes {
        /// Database name
        database: String,
        /// Collection name
        collection: String,
    },

    /// Resolve typed references to other collections
    References {
        /// Database name
        database: String,
        /// Collection name
        collection: String,
    },

    /// Show fields holding object identifiers (observed, not resolved)
    Candidates {
        /// Database name
        database: String,
        /// Collection name
        collection: String,
    },
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("ERROR:{e}");
        process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = match &cli.config {
        Some(path) => DiscoveryConfig::from_file(path)?,
        None => DiscoveryConfig::default(),
    };
    if let Some(strategy) = cli.strategy {
        config = config.with_strategy(strategy.into());
    }
    log::debug!("Using {} strategy", config.strategy.as_str());

    let client = MemoryClient::load_dir(&cli.data_dir)?;
    let catalog = MetaCatalog::new(Arc::new(client), config, Arc::new(SessionState::new()));

    let output = match cli.command {
        Command::Databases => serde_json::to_value(catalog.databases()?)?,

        Command::Collections { database } => serde_json::to_value(catalog.collections(&database)?)?,

        Command::Describe {
            database,
            collection,
        } => serde_json::to_value(catalog.collection(&database, &collection)?.describe())?,

        Command::Columns {
            database,
            collection,
        } => serde_json::to_value(catalog.columns(&database, &collection)?)?,

        Command::Indexes {
            database,
            collection,
        } => serde_json::to_value(catalog.indexes(&database, &collection)?)?,

        Command::References {
            database,
            collection,
        } => serde_json::to_value(catalog.references(&database, &collection)?)?,

        Command::Candidates {
            database,
            collection,
        } => {
            let schema = catalog.collection(&database, &collection)?;
            let candidates = object_id_candidates(&schema.tree);
            json!({
                "collection": collection,
                "note": "Object identifier samples are observations only and are not matched to collections.",
                "candidates": serde_json::to_value(candidates)?,
            })
        }
    };

    print_output(&output, &cli.format)?;
    Ok(())
}

fn print_output(value: &serde_json::Value, format: &OutputFormat) -> Result<(), Box<dyn std::error::Error>> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(value)?),
        OutputFormat::Yaml => print!("{}", serde_yaml::to_string(value)?),
    }
    Ok(())
}
