//! # deskflow
//!
//! An LLM-assisted support pipeline: tickets are clustered into intents
//! against an evolving 3-level category taxonomy, and each intent that
//! lacks an approved help article gets a retrieval-augmented generation
//! pass with a human-driven feedback loop.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────┐   ┌──────────────┐   ┌──────────────┐   ┌───────────────┐
//! │ Tickets │──▶│  Clustering  │──▶│    Stage     │──▶│  Generation   │
//! │ (JSON)  │   │ Orchestrator │   │ Coordinator  │   │   Workflow    │
//! └─────────┘   └──────┬───────┘   └──────────────┘   └──────┬────────┘
//!                      │ one LLM call per batch              │ retrieve
//!               ┌──────▼───────┐                      ┌──────▼────────┐
//!               │ Content-hash │                      │   Company     │
//!               │    cache     │                      │  docs index   │
//!               └──────────────┘                      └───────────────┘
//! ```
//!
//! Stage 1 hashes each ticket batch (order-independent), consults the
//! cache, and otherwise makes exactly one structured LLM call that decides
//! per ticket: match an existing intent, or create a new intent with an
//! L1→L2→L3 category path. Persistence is atomic per batch.
//!
//! Stage 2 generates one article per intent needing one: top-k semantic
//! retrieval over ingested company documents grounds a structured
//! generation call. Reviewers approve the result or iterate with
//! feedback, which produces the next immutable version.
//!
//! ## Quick Start
//!
//! ```bash
//! desk init                          # create database
//! desk docs sync                     # ingest company documents
//! desk embed pending                 # generate embeddings
//! desk tickets import tickets.json   # load support tickets
//! desk cluster                       # stage 1 + enqueue stage-2 jobs
//! desk jobs run                      # stage 2: generate articles
//! desk articles approve <id>         # or: desk articles iterate <id> -f "..."
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`cache`] | Order-independent batch digests + result cache |
//! | [`taxonomy`] | Intent/category store and reconciliation |
//! | [`matcher`] | Batch intent matching prompt + validation |
//! | [`cluster`] | Stage-1 orchestrator |
//! | [`coordinator`] | Stage coordinator + job table |
//! | [`retrieve`] | Semantic retrieval over document chunks |
//! | [`workflow`] | RAG article generation + review state machine |
//! | [`llm`] | Chat-completion gateway |
//! | [`embedding`] | Embedding gateway + vector utilities |
//! | [`connector_fs`] | Company-docs filesystem connector |
//! | [`chunk`] | Text chunking |
//! | [`ingest`] | Docs sync pipeline |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod cache;
pub mod chunk;
pub mod cluster;
pub mod config;
pub mod connector_fs;
pub mod coordinator;
pub mod db;
pub mod embed_cmd;
pub mod embedding;
pub mod error;
pub mod ingest;
pub mod llm;
pub mod matcher;
pub mod migrate;
pub mod models;
pub mod retrieve;
pub mod stats;
pub mod taxonomy;
pub mod tickets;
pub mod workflow;
