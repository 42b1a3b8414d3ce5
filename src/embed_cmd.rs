//! Embedding backfill commands.
//!
//! `embed pending` finds chunks whose vectors are missing or stale (text
//! hash or model changed) and embeds them in batches; `embed rebuild`
//! drops every vector first. Also hosts the inline-embedding helper the
//! docs sync pipeline calls (non-fatal on failure).

use anyhow::{bail, Result};
use sqlx::{Row, SqlitePool};

use crate::config::Config;
use crate::embedding::{vec_to_blob, EmbeddingClient};
use crate::models::Chunk;

struct PendingChunk {
    chunk_id: String,
    document_id: String,
    text: String,
    text_hash: String,
}

pub async fn run_embed_pending(
    pool: &SqlitePool,
    config: &Config,
    limit: Option<usize>,
    batch_size_override: Option<usize>,
    dry_run: bool,
) -> Result<()> {
    if !config.embedding.is_enabled() {
        bail!("Embedding provider is disabled. Set [embedding] provider in config.");
    }

    let client = EmbeddingClient::from_config(&config.embedding)?;
    let batch_size = batch_size_override.unwrap_or(config.embedding.batch_size);

    let pending = find_pending_chunks(pool, client.model_name(), limit).await?;

    if dry_run {
        println!("embed pending (dry-run)");
        println!("  chunks needing embeddings: {}", pending.len());
        return Ok(());
    }

    if pending.is_empty() {
        println!("embed pending");
        println!("  all chunks up to date");
        return Ok(());
    }

    let total = pending.len();
    let mut embedded = 0u64;
    let mut failed = 0u64;

    for batch in pending.chunks(batch_size) {
        let texts: Vec<String> = batch.iter().map(|p| p.text.clone()).collect();

        match client.embed(&texts).await {
            Ok(vectors) => {
                for (item, vec) in batch.iter().zip(vectors.iter()) {
                    upsert_vector(
                        pool,
                        &item.chunk_id,
                        &item.document_id,
                        client.model_name(),
                        client.dims(),
                        &item.text_hash,
                        &vec_to_blob(vec),
                    )
                    .await?;
                    embedded += 1;
                }
            }
            Err(e) => {
                eprintln!("Warning: embedding batch failed: {}", e);
                failed += batch.len() as u64;
            }
        }
    }

    println!("embed pending");
    println!("  total pending: {}", total);
    println!("  embedded: {}", embedded);
    println!("  failed: {}", failed);

    Ok(())
}

pub async fn run_embed_rebuild(
    pool: &SqlitePool,
    config: &Config,
    batch_size_override: Option<usize>,
) -> Result<()> {
    if !config.embedding.is_enabled() {
        bail!("Embedding provider is disabled. Set [embedding] provider in config.");
    }

    sqlx::query("DELETE FROM chunk_vectors").execute(pool).await?;
    println!("embed rebuild: cleared existing vectors");

    run_embed_pending(pool, config, None, batch_size_override, false).await
}

/// Embed freshly written chunks during docs sync. Failures (or a disabled
/// provider) leave the chunks pending instead of failing the sync.
/// Returns (embedded, pending).
pub async fn embed_chunks_inline(pool: &SqlitePool, config: &Config, chunks: &[Chunk]) -> (u64, u64) {
    if !config.embedding.is_enabled() || chunks.is_empty() {
        return (0, chunks.len() as u64);
    }

    let client = match EmbeddingClient::from_config(&config.embedding) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Warning: embedding client unavailable: {}", e);
            return (0, chunks.len() as u64);
        }
    };

    let mut embedded = 0u64;
    let mut pending = 0u64;

    for batch in chunks.chunks(config.embedding.batch_size) {
        let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();

        match client.embed(&texts).await {
            Ok(vectors) => {
                for (chunk, vec) in batch.iter().zip(vectors.iter()) {
                    let result = upsert_vector(
                        pool,
                        &chunk.id,
                        &chunk.document_id,
                        client.model_name(),
                        client.dims(),
                        &chunk.hash,
                        &vec_to_blob(vec),
                    )
                    .await;
                    match result {
                        Ok(()) => embedded += 1,
                        Err(e) => {
                            eprintln!("Warning: failed to store embedding: {}", e);
                            pending += 1;
                        }
                    }
                }
            }
            Err(e) => {
                eprintln!("Warning: embedding batch failed: {}", e);
                pending += batch.len() as u64;
            }
        }
    }

    (embedded, pending)
}

async fn find_pending_chunks(
    pool: &SqlitePool,
    model: &str,
    limit: Option<usize>,
) -> Result<Vec<PendingChunk>> {
    let sql = r#"
        SELECT c.id AS chunk_id, c.document_id, c.text, c.hash
        FROM chunks c
        LEFT JOIN chunk_vectors cv ON cv.chunk_id = c.id
        WHERE cv.chunk_id IS NULL OR cv.text_hash != c.hash OR cv.model != ?
        ORDER BY c.document_id, c.chunk_index
    "#;

    let rows = match limit {
        Some(n) => {
            sqlx::query(&format!("{} LIMIT ?", sql))
                .bind(model)
                .bind(n as i64)
                .fetch_all(pool)
                .await?
        }
        None => sqlx::query(sql).bind(model).fetch_all(pool).await?,
    };

    Ok(rows
        .iter()
        .map(|row| PendingChunk {
            chunk_id: row.get("chunk_id"),
            document_id: row.get("document_id"),
            text: row.get("text"),
            text_hash: row.get("hash"),
        })
        .collect())
}

async fn upsert_vector(
    pool: &SqlitePool,
    chunk_id: &str,
    document_id: &str,
    model: &str,
    dims: usize,
    text_hash: &str,
    blob: &[u8],
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO chunk_vectors (chunk_id, document_id, model, dims, text_hash, embedding, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(chunk_id) DO UPDATE SET
            model = excluded.model,
            dims = excluded.dims,
            text_hash = excluded.text_hash,
            embedding = excluded.embedding,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(chunk_id)
    .bind(document_id)
    .bind(model)
    .bind(dims as i64)
    .bind(text_hash)
    .bind(blob)
    .bind(chrono::Utc::now().timestamp())
    .execute(pool)
    .await?;

    Ok(())
}
