//! # Bookshelf CLI (`bookshelf`)
//!
//! Loads directories of book-catalog spreadsheets into SQLite and searches
//! them by field.
//!
//! ## Usage
//!
//! ```bash
//! bookshelf --config ./config/bookshelf.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `bookshelf init` | Create the SQLite database and schema |
//! | `bookshelf load <dir>` | Ingest every spreadsheet under a directory |
//! | `bookshelf search --author ..` | Field search with pagination |
//! | `bookshelf stats` | Row and file counts |
//! | `bookshelf serve` | Start the HTTP server |
//!
//! ## Examples
//!
//! ```bash
//! bookshelf init
//! bookshelf load ./catalog --progress human
//! bookshelf load ./catalog --force
//! bookshelf search --author kennedy --year 2015
//! bookshelf search --language en --page 2 --per-page 50 --json
//! ```

use bookshelf::{config, load, migrate, progress::ProgressMode, search, server, stats};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Bookshelf: load book-catalog spreadsheets and search them by field.
#[derive(Parser)]
#[command(
    name = "bookshelf",
    about = "Bookshelf: load book-catalog spreadsheets into SQLite and search them by field",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/bookshelf.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and the `books` and
    /// `processed_files` tables. Safe to run repeatedly.
    Init,

    /// Load every spreadsheet (xlsx, xls, csv, tsv) under a directory.
    ///
    /// Files already recorded in the ledger with the same content are
    /// skipped, so re-running over an unchanged directory writes nothing.
    Load {
        directory: PathBuf,

        /// Clear the catalog and ledger first, then load everything.
        #[arg(long)]
        force: bool,

        /// Progress output on stderr. Defaults to `human` on a TTY, otherwise `off`.
        #[arg(long, value_enum)]
        progress: Option<ProgressMode>,
    },

    /// Search the catalog. At least one field is required.
    ///
    /// Title, author and publisher match case-insensitive substrings; the
    /// other fields match exactly.
    Search {
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        author: Option<String>,
        #[arg(long)]
        publisher: Option<String>,
        #[arg(long)]
        language: Option<String>,
        /// Publication year.
        #[arg(long)]
        year: Option<String>,
        #[arg(long)]
        format: Option<String>,
        #[arg(long)]
        file_id: Option<String>,

        #[arg(long)]
        page: Option<i64>,
        #[arg(long)]
        per_page: Option<i64>,

        /// Print the result page as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Show catalog statistics.
    Stats,

    /// Start the HTTP server on `[server].bind`.
    Serve,
}

fn init_tracing() {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing();

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Load {
            directory,
            force,
            progress,
        } => {
            let mode = progress.unwrap_or_else(ProgressMode::default_for_tty);
            load::run_load(&cfg, &directory, force, mode).await?;
        }
        Commands::Search {
            title,
            author,
            publisher,
            language,
            year,
            format,
            file_id,
            page,
            per_page,
            json,
        } => {
            let mut request = search::SearchRequest {
                page,
                per_page,
                ..Default::default()
            };
            for (name, value) in [
                ("title", title),
                ("author", author),
                ("publisher", publisher),
                ("language", language),
                ("publish_year", year),
                ("format", format),
                ("file_id", file_id),
            ] {
                if let Some(value) = value {
                    request = request.field(name, value);
                }
            }
            search::run_search(&cfg, &request, json).await?;
        }
        Commands::Stats => {
            stats::run_stats(&cfg).await?;
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
    }

    Ok(())
}
