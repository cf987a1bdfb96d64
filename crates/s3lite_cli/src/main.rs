//! s3lite CLI
//!
//! Command-line access to SQLite databases shared through Amazon S3.
//!
//! # Commands
//!
//! - `query` - Run a read-only query and print the rows
//! - `exec` - Run a SQL script as a write (lock, pull, execute, push)
//! - `lock` - Show the state of the database's lock object

mod commands;

use clap::{Parser, Subcommand};
use s3lite_core::{Config, Database};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Shared SQLite databases on S3.
#[derive(Parser)]
#[command(name = "s3lite")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Database address (s3://bucket/key or an https S3 URL)
    #[arg(global = true, short, long)]
    database: Option<String>,

    /// Region used when the address does not name one
    #[arg(global = true, short, long)]
    region: Option<String>,

    /// Directory for the local copy of the database
    #[arg(global = true, long)]
    cache_dir: Option<PathBuf>,

    /// Treat a missing remote database as empty
    #[arg(global = true, long)]
    allow_missing: bool,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a query and print the rows
    Query {
        /// SQL text
        sql: String,

        /// Positional parameter (repeatable)
        #[arg(short, long = "param")]
        params: Vec<String>,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Run a SQL script as a write
    Exec {
        /// SQL text, one or more statements
        sql: String,
    },

    /// Show the lock object
    Lock {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },
}

impl Cli {
    fn config(&self) -> Config {
        let mut config = Config::new().allow_missing(self.allow_missing);
        if let Some(dir) = &self.cache_dir {
            config = config.local_file_path(dir);
        }
        if let Some(region) = &self.region {
            config = config.region(region);
        }
        config
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let address = cli.database.as_deref().ok_or("Database address required")?;
    let db = Database::open(address, cli.config())?;

    match &cli.command {
        Commands::Query {
            sql,
            params,
            format,
        } => commands::query::run(&db, sql, params, format).await?,
        Commands::Exec { sql } => commands::exec::run(&db, sql).await?,
        Commands::Lock { format } => commands::lock::run(&db, format).await?,
    }

    db.close().await?;
    Ok(())
}
