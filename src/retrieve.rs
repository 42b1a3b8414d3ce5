//! Semantic retrieval over the company-document corpus.
//!
//! Embeds a query (for article generation: the intent's name and area plus
//! its member ticket texts), scans the stored chunk vectors, and returns
//! the top-k chunks by cosine similarity. An empty corpus — or a disabled
//! embedding provider — yields an empty context rather than an error; the
//! generation step degrades gracefully.

use anyhow::Result;
use sqlx::{Row, SqlitePool};
use tracing::warn;

use crate::config::Config;
use crate::embedding::{self, EmbeddingClient};
use crate::models::RetrievedChunk;

/// Retrieve the top-k most similar chunks for a free-text query.
pub async fn retrieve_context(
    pool: &SqlitePool,
    config: &Config,
    query: &str,
    top_k: i64,
) -> Result<Vec<RetrievedChunk>> {
    if !config.embedding.is_enabled() {
        warn!("embedding provider disabled; retrieval returns empty context");
        return Ok(Vec::new());
    }

    let client = EmbeddingClient::from_config(&config.embedding)?;
    let query_vec = client.embed_one(query).await?;

    rank_chunks(pool, &query_vec, top_k).await
}

/// Rank all stored chunk vectors against a query vector and return the
/// top-k. Split out from [`retrieve_context`] so ranking is testable
/// without an embedding provider.
pub async fn rank_chunks(
    pool: &SqlitePool,
    query_vec: &[f32],
    top_k: i64,
) -> Result<Vec<RetrievedChunk>> {
    let rows = sqlx::query(
        r#"
        SELECT cv.chunk_id, cv.document_id, cv.embedding, c.text, d.title
        FROM chunk_vectors cv
        JOIN chunks c ON c.id = cv.chunk_id
        JOIN documents d ON d.id = cv.document_id
        "#,
    )
    .fetch_all(pool)
    .await?;

    let mut candidates: Vec<RetrievedChunk> = rows
        .iter()
        .map(|row| {
            let blob: Vec<u8> = row.get("embedding");
            let vec = embedding::blob_to_vec(&blob);
            let score = embedding::cosine_similarity(query_vec, &vec) as f64;
            RetrievedChunk {
                chunk_id: row.get("chunk_id"),
                document_id: row.get("document_id"),
                document_title: row.get("title"),
                text: row.get("text"),
                score,
            }
        })
        .collect();

    candidates.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.chunk_id.cmp(&b.chunk_id))
    });
    candidates.truncate(top_k as usize);

    Ok(candidates)
}

/// CLI entry point for `desk docs search`.
pub async fn run_docs_search(
    pool: &SqlitePool,
    config: &Config,
    query: &str,
    limit: Option<i64>,
) -> Result<()> {
    if query.trim().is_empty() {
        println!("No results.");
        return Ok(());
    }

    let top_k = limit.unwrap_or(config.retrieval.top_k);
    let results = retrieve_context(pool, config, query, top_k).await?;

    if results.is_empty() {
        println!("No results.");
        return Ok(());
    }

    for (i, result) in results.iter().enumerate() {
        let title = result.document_title.as_deref().unwrap_or("(untitled)");
        println!("{}. [{:.3}] {}", i + 1, result.score, title);
        println!(
            "    excerpt: \"{}\"",
            truncate(&result.text.replace('\n', " "), 160)
        );
        println!("    chunk: {}", result.chunk_id);
        println!();
    }

    Ok(())
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.trim().to_string()
    } else {
        let cut: String = text.chars().take(max_chars).collect();
        format!("{}...", cut.trim())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_short() {
        assert_eq!(truncate("hello", 10), "hello");
    }

    #[test]
    fn test_truncate_long() {
        assert_eq!(truncate("hello world", 5), "hello...");
    }
}
