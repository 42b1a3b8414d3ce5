//! Company-document ingestion pipeline.
//!
//! Coordinates the docs sync flow: connector scan → normalization →
//! chunking → inline embedding → storage. A document whose content hash is
//! unchanged since the last sync is skipped entirely; embedding failures
//! are non-fatal (chunks stay pending for `desk embed pending`).

use anyhow::Result;
use sha2::{Digest, Sha256};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::chunk::chunk_text;
use crate::config::Config;
use crate::connector_fs;
use crate::embed_cmd;
use crate::models::{Chunk, SourceItem};

pub async fn run_docs_sync(pool: &SqlitePool, config: &Config, dry_run: bool) -> Result<()> {
    let items = connector_fs::scan_documents(config)?;

    if dry_run {
        let total_chunks: usize = items
            .iter()
            .map(|item| chunk_text("tmp", &item.body, config.chunking.max_tokens).len())
            .sum();
        println!("docs sync (dry-run)");
        println!("  documents found: {}", items.len());
        println!("  estimated chunks: {}", total_chunks);
        return Ok(());
    }

    let mut upserted = 0u64;
    let mut unchanged = 0u64;
    let mut chunks_written = 0u64;
    let mut embeddings_written = 0u64;
    let mut embeddings_pending = 0u64;

    for item in &items {
        let dedup_hash = content_hash(item);

        let existing: Option<String> = sqlx::query_scalar(
            "SELECT dedup_hash FROM documents WHERE source = ? AND source_id = ?",
        )
        .bind(&item.source)
        .bind(&item.source_id)
        .fetch_optional(pool)
        .await?;

        if existing.as_deref() == Some(dedup_hash.as_str()) {
            unchanged += 1;
            continue;
        }

        let doc_id = upsert_document(pool, item, &dedup_hash).await?;
        let chunks = chunk_text(&doc_id, &item.body, config.chunking.max_tokens);
        replace_chunks(pool, &doc_id, &chunks).await?;
        chunks_written += chunks.len() as u64;
        upserted += 1;

        let (emb_ok, emb_pending) = embed_cmd::embed_chunks_inline(pool, config, &chunks).await;
        embeddings_written += emb_ok;
        embeddings_pending += emb_pending;
    }

    println!("docs sync");
    println!("  scanned: {} documents", items.len());
    println!("  upserted: {}", upserted);
    println!("  unchanged: {}", unchanged);
    println!("  chunks written: {}", chunks_written);
    if config.embedding.is_enabled() {
        println!("  embeddings written: {}", embeddings_written);
        println!("  embeddings pending: {}", embeddings_pending);
    }
    println!("ok");

    Ok(())
}

fn content_hash(item: &SourceItem) -> String {
    let mut hasher = Sha256::new();
    hasher.update(item.source.as_bytes());
    hasher.update(item.source_id.as_bytes());
    hasher.update(item.body.as_bytes());
    format!("{:x}", hasher.finalize())
}

async fn upsert_document(pool: &SqlitePool, item: &SourceItem, dedup_hash: &str) -> Result<String> {
    let existing_id: Option<String> =
        sqlx::query_scalar("SELECT id FROM documents WHERE source = ? AND source_id = ?")
            .bind(&item.source)
            .bind(&item.source_id)
            .fetch_optional(pool)
            .await?;

    let doc_id = existing_id.unwrap_or_else(|| Uuid::new_v4().to_string());

    sqlx::query(
        r#"
        INSERT INTO documents (id, source, source_id, title, updated_at, body, dedup_hash)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(source, source_id) DO UPDATE SET
            title = excluded.title,
            updated_at = excluded.updated_at,
            body = excluded.body,
            dedup_hash = excluded.dedup_hash
        "#,
    )
    .bind(&doc_id)
    .bind(&item.source)
    .bind(&item.source_id)
    .bind(&item.title)
    .bind(item.updated_at)
    .bind(&item.body)
    .bind(dedup_hash)
    .execute(pool)
    .await?;

    Ok(doc_id)
}

async fn replace_chunks(pool: &SqlitePool, document_id: &str, chunks: &[Chunk]) -> Result<()> {
    let mut tx = pool.begin().await?;

    sqlx::query("DELETE FROM chunk_vectors WHERE document_id = ?")
        .bind(document_id)
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM chunks WHERE document_id = ?")
        .bind(document_id)
        .execute(&mut *tx)
        .await?;

    for chunk in chunks {
        sqlx::query(
            "INSERT INTO chunks (id, document_id, chunk_index, text, hash) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&chunk.id)
        .bind(&chunk.document_id)
        .bind(chunk.chunk_index)
        .bind(&chunk.text)
        .bind(&chunk.hash)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    Ok(())
}
