//! # Waterline CLI
//!
//! The `waterline` binary harvests waterfront property listings into a
//! local SQLite database.
//!
//! ## Usage
//!
//! ```bash
//! waterline --config ./waterline.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `waterline init` | Create the SQLite database and run schema migrations |
//! | `waterline discover <search-url>` | Paginate search results and save a listing URL file |
//! | `waterline process <url-file>` | Fetch, extract, analyze, and upsert every URL in the file |
//! | `waterline reprocess-cache` | Re-run extraction over cached pages, zero network |
//! | `waterline stats` | Print row and coverage counts |
//!
//! ## Examples
//!
//! ```bash
//! # Initialize the database
//! waterline init --config ./waterline.toml
//!
//! # Collect listing URLs from a search
//! waterline discover "https://example.com/homes/?searchQueryState=..." --max-pages 10
//!
//! # Process the collected URLs
//! waterline process data/urls_list_20250101_120000.txt
//!
//! # Re-extract everything from cache after an extractor change
//! waterline reprocess-cache
//! ```

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use waterline::{config, run, stats};

/// Waterline — harvest waterfront property listings into SQLite.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `waterline.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "waterline",
    about = "Waterline — a best-effort extraction pipeline for waterfront property listings",
    version,
    long_about = "Waterline fetches real-estate listing pages (optionally through an extraction \
    proxy), caches the raw pages, extracts property fields with a multi-strategy cascade, scans \
    descriptions for waterfront features, and upserts everything into SQLite without ever \
    overwriting a stored value with a null."
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./waterline.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and both tables (properties,
    /// waterfront_features). Idempotent, so running it again is safe.
    Init,

    /// Paginate a search URL and save the listing URLs it yields.
    ///
    /// Walks result pages until the page limit is reached or the
    /// configured number of consecutive pages contribute no new URLs,
    /// then writes a newline-delimited URL file under the data directory.
    Discover {
        /// Search results URL to paginate.
        search_url: String,

        /// Override the configured page limit.
        #[arg(long)]
        max_pages: Option<u32>,

        /// Write the URL list to this path instead of the data directory.
        #[arg(long)]
        out: Option<PathBuf>,
    },

    /// Run the full pipeline over a URL list file.
    ///
    /// Each URL is fetched (or served from cache, per the refetch policy),
    /// extracted, analyzed for waterfront features, and upserted.
    Process {
        /// Newline-delimited URL file; `#` lines are comments.
        url_file: PathBuf,

        /// Extract and count without writing to the database.
        #[arg(long)]
        dry_run: bool,

        /// Maximum number of URLs to process.
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Re-run extraction over every cached page without any network use.
    ///
    /// Useful after improving the extractor or analyzer: the raw pages
    /// are already on disk, so the whole corpus can be re-harvested
    /// offline.
    ReprocessCache {
        /// Extract and count without writing to the database.
        #[arg(long)]
        dry_run: bool,

        /// Maximum number of cache entries to process.
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Print row and field-coverage counts from the database.
    Stats,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => run::init(&config).await,
        Commands::Discover {
            search_url,
            max_pages,
            out,
        } => run::discover(&config, &search_url, max_pages, out.as_deref()).await,
        Commands::Process {
            url_file,
            dry_run,
            limit,
        } => run::process(&config, &url_file, dry_run, limit).await,
        Commands::ReprocessCache { dry_run, limit } => {
            run::reprocess_cache(&config, dry_run, limit).await
        }
        Commands::Stats => stats::run_stats(&config).await,
    }
}
