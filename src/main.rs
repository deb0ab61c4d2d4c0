//! # Knowledge RAG CLI (`kb`)
//!
//! Maintains the knowledge partitions and the vector index built from them.
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `kb validate <file> --type <t>` | Check a partition file against its schema |
//! | `kb validate --all` | Check every partition in the raw directory |
//! | `kb add '<json>' --type <t>` | Validate and append a record to `raw/<t>.jsonl` |
//! | `kb build` | Index `approved/` into the vector store |
//! | `kb search "<query>"` | Semantic search over the index |
//! | `kb reset` | Drop the index (required after changing embedding model) |
//! | `kb status` | Show index dimensions and size |
//! | `kb serve mcp` | Serve `search_knowledge` to MCP clients over stdio |
//!
//! ## Examples
//!
//! ```bash
//! kb add '{"term":"SLA","definition":"Service Level Agreement"}' --type glossary
//! kb validate ai_knowledge/raw/glossary.jsonl --type glossary
//! kb build
//! kb search "service agreement" --top-k 3
//! ```

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

use knowledge_rag::config::{self, Config};
use knowledge_rag::knowledge::{self, ValidationReport};
use knowledge_rag::models::KnowledgeType;
use knowledge_rag::{ingest, lifecycle, mcp, search};

const DEFAULT_CONFIG: &str = "./config/kb.toml";

/// Knowledge RAG: structured knowledge records, indexed for semantic recall.
#[derive(Parser)]
#[command(
    name = "kb",
    about = "Semantic index and retrieval over glossary, dataset, rule and analysis records",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/kb.toml`; built-in defaults apply when that
    /// file does not exist.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Debug logging (overridden by RUST_LOG).
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate partition files against their schema.
    Validate {
        /// JSONL file to validate.
        #[arg(required_unless_present = "all", conflicts_with = "all")]
        file: Option<PathBuf>,

        /// Knowledge type of FILE.
        #[arg(long = "type", required_unless_present = "all")]
        kind: Option<KnowledgeType>,

        /// Validate every `<type>.jsonl` in the raw directory.
        #[arg(long)]
        all: bool,

        /// Directory for --all (default: `<root>/raw`).
        #[arg(long, requires = "all")]
        dir: Option<PathBuf>,
    },

    /// Append a record to the raw partition of its type.
    Add {
        /// The record as a JSON object.
        data: String,

        #[arg(long = "type")]
        kind: KnowledgeType,
    },

    /// Build the vector index from approved knowledge.
    Build {
        /// Source directory (default: `<root>/approved`).
        #[arg(long)]
        source: Option<PathBuf>,
    },

    /// Search the knowledge index.
    Search {
        query: String,

        /// Number of results (default: `retrieval.top_k`).
        #[arg(long)]
        top_k: Option<usize>,
    },

    /// Delete the index collection.
    ///
    /// Use this when changing embedding models, then run `kb build`.
    Reset,

    /// Show the state of the index collection.
    Status,

    /// Start a server.
    Serve {
        #[command(subcommand)]
        service: ServeService,
    },
}

#[derive(Subcommand)]
enum ServeService {
    /// MCP server on stdin/stdout.
    Mcp,
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn load(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(p) => config::load_config(p),
        None => config::load_or_default(Path::new(DEFAULT_CONFIG)),
    }
}

fn print_report(report: &ValidationReport) -> bool {
    for err in &report.errors {
        println!("Line {} is invalid in {}: {}", err.line, report.path.display(), err.message);
    }
    if report.is_valid() {
        println!("Validation successful: {} ({} records)", report.path.display(), report.checked);
    } else {
        println!("Validation failed: {}", report.path.display());
    }
    report.is_valid()
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let cfg = load(cli.config.as_deref())?;

    match cli.command {
        Commands::Validate {
            file,
            kind,
            all,
            dir,
        } => {
            let reports = match (all, file, kind) {
                (true, _, _) => {
                    let dir = dir.unwrap_or_else(|| cfg.knowledge.raw_dir());
                    let reports = knowledge::validate_all(&dir)?;
                    if reports.is_empty() {
                        println!("No partition files found in {}", dir.display());
                    }
                    reports
                }
                (false, Some(file), Some(kind)) => vec![knowledge::validate_file(&file, kind)?],
                _ => anyhow::bail!("validate requires FILE and --type, or --all"),
            };
            let mut ok = true;
            for report in &reports {
                ok &= print_report(report);
            }
            if !ok {
                std::process::exit(1);
            }
        }
        Commands::Add { data, kind } => {
            let (path, record) = knowledge::append_record(&cfg.knowledge.raw_dir(), kind, &data)?;
            println!("Added item {} to {}", record.meta().id, path.display());
        }
        Commands::Build { source } => {
            ingest::run_build(&cfg, source).await?;
        }
        Commands::Search { query, top_k } => {
            search::run_search(&cfg, &query, top_k).await?;
        }
        Commands::Reset => {
            lifecycle::run_reset(&cfg).await?;
        }
        Commands::Status => {
            lifecycle::run_status(&cfg).await?;
        }
        Commands::Serve { service } => match service {
            ServeService::Mcp => {
                mcp::run_server(&cfg).await?;
            }
        },
    }

    Ok(())
}
