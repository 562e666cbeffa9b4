//! schema-sync: command-line tools for graph schema documents.
//!
//! Validates, compares and normalizes schema files, exports property-update
//! Cypher, reconciles schemas with live data snapshots and samples their data.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use schema_cli::commands;
use schema_cli::{render, Config, Format, SampleQuery};
use schema_core::DEFAULT_SAMPLE_LIMIT;

#[derive(Parser, Debug)]
#[command(name = "schema-sync")]
#[command(about = "Graph schema document tools")]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Output format
    #[arg(long, value_enum, default_value_t = Format::Text, global = true)]
    format: Format,

    /// Enable verbose logging
    #[arg(long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Check that a schema file is well formed
    Validate {
        schema: PathBuf,
    },

    /// Structural diff of two schema files
    Diff {
        left: PathBuf,
        right: PathBuf,

        /// Exit with status 1 when the schemas differ
        #[arg(long)]
        exit_code: bool,
    },

    /// Compare a schema file against a live data snapshot
    LiveDiff {
        schema: PathBuf,

        /// Live data snapshot (JSON)
        #[arg(short, long)]
        snapshot: PathBuf,

        /// Merge missing elements and write the next file version into this directory
        #[arg(long)]
        apply: Option<PathBuf>,
    },

    /// Generate a schema from a live data snapshot
    Generate {
        /// Live data snapshot (JSON)
        #[arg(short, long)]
        snapshot: PathBuf,

        /// Output directory
        #[arg(short, long, default_value = ".")]
        out: PathBuf,
    },

    /// Export a property-update Cypher script
    Cypher {
        schema: PathBuf,

        /// Output file or directory (prints to stdout if omitted)
        #[arg(short, long)]
        out: Option<PathBuf>,
    },

    /// Show example nodes, attribute values or relationships from live data
    Sample {
        /// Node label to sample
        label: String,

        /// Live data snapshot (JSON)
        #[arg(short, long)]
        snapshot: PathBuf,

        /// Sample values of this attribute
        #[arg(long, conflicts_with = "relationship")]
        attribute: Option<String>,

        /// Sample relationships of this type leaving the label
        #[arg(long)]
        relationship: Option<String>,

        /// Only relationships ending at this label
        #[arg(long, requires = "relationship")]
        target: Option<String>,

        /// Maximum number of examples
        #[arg(long, default_value_t = DEFAULT_SAMPLE_LIMIT)]
        limit: usize,
    },

    /// Check that the store answers and report its stored schema
    Check {
        /// Live data snapshot (JSON)
        #[arg(short, long)]
        snapshot: PathBuf,
    },

    /// Re-export a schema file as its next version
    Normalize {
        schema: PathBuf,

        /// Output directory (defaults to the schema's directory)
        #[arg(short, long)]
        out: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Set up logging - respects RUST_LOG env var, defaults to info (or debug with --verbose).
    // Logs go to stderr so reports on stdout stay machine-readable.
    let default_filter = if args.verbose {
        "debug,schema_cli=debug,schema_core=debug"
    } else {
        "info,schema_cli=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let config = Config::from_env().context("Invalid configuration")?;
    debug!("Configuration: {:?}", config);

    let output = match args.command {
        Command::Validate { schema } => render(&commands::validate(&schema)?, args.format)?,
        Command::Diff {
            left,
            right,
            exit_code,
        } => {
            let report = commands::diff(&left, &right)?;
            print!("{}", render(&report, args.format)?);
            if exit_code && !report.identical {
                std::process::exit(1);
            }
            return Ok(());
        }
        Command::LiveDiff {
            schema,
            snapshot,
            apply,
        } => {
            let report =
                commands::live_diff(&schema, &snapshot, apply.as_deref(), &config.sync).await?;
            render(&report, args.format)?
        }
        Command::Generate { snapshot, out } => {
            info!("Generating schema from {}", snapshot.display());
            render(&commands::generate(&snapshot, &out, &config.sync).await?, args.format)?
        }
        Command::Cypher { schema, out } => {
            render(&commands::cypher(&schema, out.as_deref(), &config.sync)?, args.format)?
        }
        Command::Sample {
            label,
            snapshot,
            attribute,
            relationship,
            target,
            limit,
        } => {
            let query = match (attribute, relationship) {
                (Some(attribute), _) => SampleQuery::Attribute(attribute),
                (None, Some(name)) => SampleQuery::Relationship { name, target },
                (None, None) => SampleQuery::Nodes,
            };
            let report = commands::sample(&snapshot, &label, &query, limit, &config.sync).await?;
            render(&report, args.format)?
        }
        Command::Check { snapshot } => {
            render(&commands::check(&snapshot, &config.sync).await?, args.format)?
        }
        Command::Normalize { schema, out } => {
            render(&commands::normalize(&schema, out.as_deref(), &config.sync)?, args.format)?
        }
    };

    print!("{}", output);
    Ok(())
}
