//! Pipeline statistics for operability.

use anyhow::Result;
use sqlx::SqlitePool;

pub async fn run_stats(pool: &SqlitePool) -> Result<()> {
    let tickets: i64 = count(pool, "tickets").await?;
    let unclustered: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM tickets WHERE intent_id IS NULL")
            .fetch_one(pool)
            .await?;
    let intents: i64 = count(pool, "intents").await?;
    let categories: i64 = count(pool, "categories").await?;
    let articles: i64 = count(pool, "articles").await?;
    let accepted: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM articles WHERE status = 'accepted'")
            .fetch_one(pool)
            .await?;
    let jobs_queued: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM generation_jobs WHERE status = 'queued'")
            .fetch_one(pool)
            .await?;
    let documents: i64 = count(pool, "documents").await?;
    let chunks: i64 = count(pool, "chunks").await?;
    let vectors: i64 = count(pool, "chunk_vectors").await?;
    let cache_entries: i64 = count(pool, "clustering_cache").await?;

    println!("stats");
    println!("  tickets: {} ({} unclustered)", tickets, unclustered);
    println!("  intents: {}", intents);
    println!("  categories: {}", categories);
    println!("  articles: {} ({} accepted)", articles, accepted);
    println!("  jobs queued: {}", jobs_queued);
    println!("  documents: {} ({} chunks, {} embedded)", documents, chunks, vectors);
    println!("  cache entries: {}", cache_entries);

    Ok(())
}

async fn count(pool: &SqlitePool, table: &str) -> Result<i64> {
    let n = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", table))
        .fetch_one(pool)
        .await?;
    Ok(n)
}
