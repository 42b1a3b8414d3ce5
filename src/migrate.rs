use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    apply_schema(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Create all tables and indexes. Idempotent.
pub async fn apply_schema(pool: &SqlitePool) -> Result<()> {
    // Support tickets. intent_id stays NULL until the clustering stage
    // links the ticket.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS tickets (
            id TEXT PRIMARY KEY,
            subject TEXT NOT NULL,
            body TEXT NOT NULL,
            received_at INTEGER NOT NULL,
            intent_id TEXT REFERENCES intents(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // 3-level category taxonomy. Level 1 has no parent; level 2/3 parents
    // are exactly one level above (enforced in taxonomy::upsert_category).
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS categories (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            level INTEGER NOT NULL CHECK (level BETWEEN 1 AND 3),
            parent_id TEXT REFERENCES categories(id),
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // One node per case-insensitive name under a given parent and level.
    // COALESCE folds the NULL parents of level-1 nodes into a single key so
    // root names are unique too (SQLite treats NULLs as distinct in unique
    // indexes).
    sqlx::query(
        r#"
        CREATE UNIQUE INDEX IF NOT EXISTS idx_categories_identity
        ON categories(level, COALESCE(parent_id, ''), lower(name))
        "#,
    )
    .execute(pool)
    .await?;

    // Intent clusters. The impression/resolution counters are owned by the
    // external A/B telemetry widget and never mutated here.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS intents (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            area TEXT NOT NULL,
            l1_category_id TEXT REFERENCES categories(id),
            l2_category_id TEXT REFERENCES categories(id),
            l3_category_id TEXT REFERENCES categories(id),
            impressions_a INTEGER NOT NULL DEFAULT 0,
            impressions_b INTEGER NOT NULL DEFAULT 0,
            resolutions_a INTEGER NOT NULL DEFAULT 0,
            resolutions_b INTEGER NOT NULL DEFAULT 0,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Clustering result cache keyed by the order-independent batch digest.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS clustering_cache (
            batch_digest TEXT PRIMARY KEY,
            assignments_json TEXT NOT NULL,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Generated help articles, one row per version. The UNIQUE constraint
    // doubles as the per-intent generation lock: a version is claimed by
    // insert before any LLM call is made.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS articles (
            id TEXT PRIMARY KEY,
            intent_id TEXT NOT NULL REFERENCES intents(id),
            version INTEGER NOT NULL,
            status TEXT NOT NULL,
            title TEXT NOT NULL DEFAULT '',
            summary TEXT NOT NULL DEFAULT '',
            body TEXT NOT NULL DEFAULT '',
            feedback TEXT,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            UNIQUE (intent_id, version)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Stage-2 work queue filled by the coordinator and drained by
    // `desk jobs run`.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS generation_jobs (
            id TEXT PRIMARY KEY,
            intent_id TEXT NOT NULL REFERENCES intents(id),
            status TEXT NOT NULL,
            error TEXT,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // At most one live job per intent, across batches.
    sqlx::query(
        r#"
        CREATE UNIQUE INDEX IF NOT EXISTS idx_jobs_active
        ON generation_jobs(intent_id)
        WHERE status IN ('queued', 'running')
        "#,
    )
    .execute(pool)
    .await?;

    // Company documents backing retrieval.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS documents (
            id TEXT PRIMARY KEY,
            source TEXT NOT NULL,
            source_id TEXT NOT NULL,
            title TEXT,
            updated_at INTEGER NOT NULL,
            body TEXT NOT NULL,
            dedup_hash TEXT NOT NULL,
            UNIQUE (source, source_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chunks (
            id TEXT PRIMARY KEY,
            document_id TEXT NOT NULL REFERENCES documents(id),
            chunk_index INTEGER NOT NULL,
            text TEXT NOT NULL,
            hash TEXT NOT NULL,
            UNIQUE (document_id, chunk_index)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chunk_vectors (
            chunk_id TEXT PRIMARY KEY REFERENCES chunks(id),
            document_id TEXT NOT NULL,
            model TEXT NOT NULL,
            dims INTEGER NOT NULL,
            text_hash TEXT NOT NULL,
            embedding BLOB NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_tickets_intent ON tickets(intent_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_articles_intent ON articles(intent_id, version DESC)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunks_document ON chunks(document_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_jobs_status ON generation_jobs(status)")
        .execute(pool)
        .await?;

    Ok(())
}
