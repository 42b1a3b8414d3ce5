//! # deskflow CLI (`desk`)
//!
//! The `desk` binary drives the support pipeline: database setup, company
//! document ingestion, ticket import, batch clustering, article
//! generation, and the human review loop.
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `desk init` | Create the SQLite database and run schema migrations |
//! | `desk docs sync` | Ingest company documents from the configured directory |
//! | `desk docs search "<query>"` | Semantic search over ingested documents |
//! | `desk embed pending` | Backfill missing or stale embeddings |
//! | `desk embed rebuild` | Delete and regenerate all embeddings |
//! | `desk tickets import <file>` | Import support tickets from a JSON file |
//! | `desk tickets list` | List tickets |
//! | `desk cluster` | Cluster unclustered tickets and enqueue generation jobs |
//! | `desk intents` | List intents with their category paths |
//! | `desk jobs list` / `desk jobs run` | Inspect / drain generation jobs |
//! | `desk articles list/show` | Inspect generated articles |
//! | `desk articles approve <id>` | Accept the latest article version |
//! | `desk articles iterate <id> -f "..."` | Regenerate with reviewer feedback |
//! | `desk stats` | Row counts per pipeline stage |

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use deskflow::{
    cluster, config, coordinator, db, embed_cmd, ingest, llm, migrate, retrieve, stats, taxonomy,
    tickets, workflow,
};

/// deskflow — support ticket clustering and help-article generation.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/desk.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "desk",
    about = "deskflow — LLM-assisted ticket clustering and help-article generation",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/desk.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Idempotent.
    Init,

    /// Company document commands.
    Docs {
        #[command(subcommand)]
        command: DocsCommands,
    },

    /// Embedding maintenance.
    Embed {
        #[command(subcommand)]
        command: EmbedCommands,
    },

    /// Ticket commands.
    Tickets {
        #[command(subcommand)]
        command: TicketCommands,
    },

    /// Cluster unclustered tickets in batches, then enqueue article
    /// generation for intents without an accepted article.
    Cluster {
        /// Tickets per batch (defaults to clustering.batch_size).
        #[arg(long)]
        batch_size: Option<usize>,
        /// Stop after this many batches.
        #[arg(long)]
        max_batches: Option<usize>,
    },

    /// List intents with their category paths and ticket counts.
    Intents,

    /// Generation job commands.
    Jobs {
        #[command(subcommand)]
        command: JobCommands,
    },

    /// Article inspection and review.
    Articles {
        #[command(subcommand)]
        command: ArticleCommands,
    },

    /// Row counts per pipeline stage.
    Stats,
}

#[derive(Subcommand)]
enum DocsCommands {
    /// Scan the configured docs directory and (re)index changed documents.
    Sync {
        #[arg(long)]
        dry_run: bool,
    },
    /// Semantic search over ingested documents.
    Search {
        query: String,
        #[arg(long)]
        limit: Option<i64>,
    },
}

#[derive(Subcommand)]
enum EmbedCommands {
    /// Embed chunks with missing or stale vectors.
    Pending {
        #[arg(long)]
        limit: Option<usize>,
        #[arg(long)]
        batch_size: Option<usize>,
        #[arg(long)]
        dry_run: bool,
    },
    /// Drop all vectors and re-embed everything.
    Rebuild {
        #[arg(long)]
        batch_size: Option<usize>,
    },
}

#[derive(Subcommand)]
enum TicketCommands {
    /// Import tickets from a JSON array file.
    Import { file: PathBuf },
    /// List tickets.
    List {
        /// Only tickets not yet linked to an intent.
        #[arg(long)]
        unclustered: bool,
    },
}

#[derive(Subcommand)]
enum JobCommands {
    /// List generation jobs.
    List,
    /// Drain queued generation jobs.
    Run {
        /// Maximum jobs to process.
        #[arg(long, default_value_t = 50)]
        limit: i64,
    },
}

#[derive(Subcommand)]
enum ArticleCommands {
    /// List articles (optionally for one intent).
    List {
        #[arg(long)]
        intent: Option<String>,
    },
    /// Print one article in full.
    Show { id: String },
    /// Accept the latest pending article version. Terminal.
    Approve { id: String },
    /// Submit reviewer feedback and regenerate as a new version.
    Iterate {
        id: String,
        #[arg(short, long)]
        feedback: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("deskflow=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&config).await?;
            println!("initialized {}", config.db.path.display());
            Ok(())
        }
        Commands::Docs { command } => {
            let pool = db::connect(&config).await?;
            let result = match command {
                DocsCommands::Sync { dry_run } => {
                    ingest::run_docs_sync(&pool, &config, dry_run).await
                }
                DocsCommands::Search { query, limit } => {
                    retrieve::run_docs_search(&pool, &config, &query, limit).await
                }
            };
            pool.close().await;
            result
        }
        Commands::Embed { command } => {
            let pool = db::connect(&config).await?;
            let result = match command {
                EmbedCommands::Pending {
                    limit,
                    batch_size,
                    dry_run,
                } => embed_cmd::run_embed_pending(&pool, &config, limit, batch_size, dry_run).await,
                EmbedCommands::Rebuild { batch_size } => {
                    embed_cmd::run_embed_rebuild(&pool, &config, batch_size).await
                }
            };
            pool.close().await;
            result
        }
        Commands::Tickets { command } => {
            let pool = db::connect(&config).await?;
            let result = match command {
                TicketCommands::Import { file } => {
                    match tickets::import_tickets(&pool, &file).await {
                        Ok(n) => {
                            println!("imported {} tickets", n);
                            Ok(())
                        }
                        Err(e) => Err(e),
                    }
                }
                TicketCommands::List { unclustered } => {
                    tickets::run_list_tickets(&pool, unclustered).await
                }
            };
            pool.close().await;
            result
        }
        Commands::Cluster {
            batch_size,
            max_batches,
        } => {
            let pool = db::connect(&config).await?;
            let chat = llm::create_chat_model(&config.llm)?;
            let batch_size = batch_size.unwrap_or(config.clustering.batch_size);
            let result = cluster::run_cluster(&pool, chat.as_ref(), batch_size, max_batches).await;
            pool.close().await;
            result
        }
        Commands::Intents => {
            let pool = db::connect(&config).await?;
            let result = taxonomy::run_list_intents(&pool).await;
            pool.close().await;
            result
        }
        Commands::Jobs { command } => {
            let pool = db::connect(&config).await?;
            let result = match command {
                JobCommands::List => coordinator::run_list_jobs(&pool).await,
                JobCommands::Run { limit } => {
                    let chat = llm::create_chat_model(&config.llm)?;
                    coordinator::run_jobs(&pool, chat.as_ref(), &config, limit).await
                }
            };
            pool.close().await;
            result
        }
        Commands::Articles { command } => {
            let pool = db::connect(&config).await?;
            let result = match command {
                ArticleCommands::List { intent } => {
                    workflow::run_list_articles(&pool, intent.as_deref()).await
                }
                ArticleCommands::Show { id } => workflow::run_show_article(&pool, &id).await,
                ArticleCommands::Approve { id } => workflow::run_approve(&pool, &id).await,
                ArticleCommands::Iterate { id, feedback } => {
                    let chat = llm::create_chat_model(&config.llm)?;
                    workflow::run_iterate(&pool, chat.as_ref(), &config, &id, &feedback).await
                }
            };
            pool.close().await;
            result
        }
        Commands::Stats => {
            let pool = db::connect(&config).await?;
            let result = stats::run_stats(&pool).await;
            pool.close().await;
            result
        }
    }
}
