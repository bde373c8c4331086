//! # Ferretero CLI (`ferretero`)
//!
//! ## Usage
//!
//! ```bash
//! ferretero --config ./config/ferretero.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `ferretero init` | Create the SQLite database and schema |
//! | `ferretero serve` | Start the catalog HTTP server |
//! | `ferretero ingest <terms…>` | Fetch terms from the provider into the local catalog |
//! | `ferretero ingest --xml <file>` | Load a provider XML dump |
//! | `ferretero search "<query>"` | Search the local catalog |
//! | `ferretero get <id>` | Show one product |
//! | `ferretero stats` | Catalog and ingestion overview |
//! | `ferretero repair-text` | Clean entities and mojibake in stored products |
//! | `ferretero seed` | Seed a remote service batch by batch, resumably |
//! | `ferretero monitor` | Poll a remote service's ingestion status |
//! | `ferretero backfill-ean` | Trigger a remote EAN backfill |
//!
//! `seed`, `monitor`, and `backfill-ean` talk to `[client].base_url` with the
//! admin token and run without a config file when `MIGRATION_TOKEN` is set.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use ferretero::config::{self, Config};
use ferretero::models::BackfillParams;
use ferretero::progress::ProgressMode;
use ferretero::{backfill, get, ingest, logging, migrate, monitor, search, seeder, server, stats, text};

/// Ferretero: hardware catalog ingestion, search API, and seeding tools.
#[derive(Parser)]
#[command(name = "ferretero", version, about)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/ferretero.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Idempotent.
    Init,

    /// Start the catalog HTTP server on `[server].bind`.
    Serve,

    /// Ingest products into the local catalog.
    ///
    /// With terms, each is searched at the provider. Without terms, the
    /// configured default queries are used.
    Ingest {
        /// Search terms.
        terms: Vec<String>,

        /// Load a provider XML dump instead of calling the provider.
        #[arg(long, conflicts_with = "terms")]
        xml: Option<PathBuf>,
    },

    /// Search the local catalog.
    Search {
        query: String,

        /// Maximum number of results (capped by `[search].max_limit`).
        #[arg(long)]
        limit: Option<i64>,
    },

    /// Show one product by its catalog id.
    Get { id: i64 },

    /// Show catalog statistics.
    Stats,

    /// Repair HTML entities, `\u` escapes, and mojibake in stored names and
    /// descriptions.
    RepairText {
        /// Maximum number of damaged products to scan.
        #[arg(long, default_value = "5000")]
        limit: i64,

        /// Count the rows that would change without writing.
        #[arg(long)]
        dry: bool,
    },

    /// Seed a remote catalog service batch by batch.
    ///
    /// Progress is kept in `[seed].cursor_path`; re-running resumes at the
    /// first batch that has not succeeded.
    Seed {
        /// File with one comma-separated batch per line.
        #[arg(long, conflicts_with = "strategy")]
        batches_file: Option<PathBuf>,

        /// Generate batches from a term strategy: tools, brands, ngrams.
        #[arg(long)]
        strategy: Option<String>,

        /// Terms per batch when using --strategy.
        #[arg(long, default_value = "5")]
        batch_size: usize,

        /// Start from the first batch, discarding the stored cursor.
        #[arg(long)]
        reset: bool,

        /// Progress output on stderr. Defaults to human on a TTY, off otherwise.
        #[arg(long, value_enum)]
        progress: Option<ProgressMode>,
    },

    /// Poll a remote catalog service and print its ingestion status.
    Monitor {
        /// Print one frame and exit.
        #[arg(long)]
        once: bool,

        /// Seconds between frames (default `[monitor].interval_secs`).
        #[arg(long)]
        interval: Option<u64>,
    },

    /// Trigger an EAN backfill on a remote catalog service.
    BackfillEan {
        #[arg(long, default_value = "200")]
        batch: u32,

        #[arg(long, default_value = "1")]
        loops: u32,

        #[arg(long, default_value = "150")]
        pause_ms: u64,

        /// Look up codes without writing them.
        #[arg(long)]
        dry: bool,
    },
}

impl Commands {
    /// Operator commands only need `[client]`, `[seed]`, `[monitor]`, and the
    /// token, all of which have defaults.
    fn is_remote(&self) -> bool {
        matches!(
            self,
            Commands::Seed { .. } | Commands::Monitor { .. } | Commands::BackfillEan { .. }
        )
    }
}

fn load(cli: &Cli) -> anyhow::Result<Config> {
    if cli.command.is_remote() && !cli.config.exists() {
        let mut cfg = Config::minimal();
        cfg.apply_env_overrides();
        return Ok(cfg);
    }
    config::load_config(&cli.config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init_tracing(logging::DEFAULT_FILTER)?;

    let cli = Cli::parse();
    let cfg = load(&cli)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
        Commands::Ingest { terms, xml } => {
            ingest::run_ingest(&cfg, terms, xml.as_deref()).await?;
        }
        Commands::Search { query, limit } => {
            search::run_search(&cfg, &query, limit).await?;
        }
        Commands::Get { id } => {
            get::run_get(&cfg, id).await?;
        }
        Commands::Stats => {
            stats::run_stats(&cfg).await?;
        }
        Commands::RepairText { limit, dry } => {
            text::run_repair_text(&cfg, limit, dry).await?;
        }
        Commands::Seed {
            batches_file,
            strategy,
            batch_size,
            reset,
            progress,
        } => {
            let batches = seeder::resolve_batches(
                &cfg,
                batches_file.as_deref(),
                strategy.as_deref(),
                batch_size,
            )?;
            let mode = progress.unwrap_or_else(ProgressMode::default_for_tty);
            seeder::run_seed(&cfg, batches, reset, mode).await?;
        }
        Commands::Monitor { once, interval } => {
            monitor::run_monitor(&cfg, once, interval).await?;
        }
        Commands::BackfillEan {
            batch,
            loops,
            pause_ms,
            dry,
        } => {
            let params = BackfillParams {
                batch,
                loops,
                pause_ms,
                dry,
            };
            backfill::run_backfill_ean(&cfg, params).await?;
        }
    }

    Ok(())
}
