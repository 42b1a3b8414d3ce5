//! Stage coordinator: decides which intents touched by a clustering batch
//! need article-generation work, and owns the job table the worker drains.
//!
//! Per batch the coordinator deduplicates intents (many tickets may map to
//! one intent) and skips any intent that already carries an `accepted`
//! article, so at most one generation job exists per intent needing one.
//! The external queue is out of scope; the job table here is the minimal
//! stand-in that `desk jobs run` consumes.

use anyhow::Result;
use sqlx::{Row, SqlitePool};
use std::collections::BTreeSet;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::llm::ChatModel;
use crate::workflow;

/// Enqueue generation work for the given intents. Returns the intent ids
/// actually enqueued: duplicates within the batch, intents with an
/// accepted article, and intents that already have a live job are all
/// skipped.
pub async fn plan_generation(pool: &SqlitePool, intent_ids: &[String]) -> Result<Vec<String>> {
    // BTreeSet for deterministic enqueue order.
    let distinct: BTreeSet<&String> = intent_ids.iter().collect();
    let mut enqueued = Vec::new();

    for intent_id in distinct {
        let has_accepted: bool = sqlx::query_scalar(
            "SELECT COUNT(*) > 0 FROM articles WHERE intent_id = ? AND status = 'accepted'",
        )
        .bind(intent_id)
        .fetch_one(pool)
        .await?;

        if has_accepted {
            info!(intent_id = %intent_id, "intent already has an accepted article; skipping");
            continue;
        }

        // The partial unique index on live jobs makes this race-safe across
        // batches: a second enqueue for the same intent is a no-op.
        let now = chrono::Utc::now().timestamp();
        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO generation_jobs (id, intent_id, status, created_at, updated_at)
            VALUES (?, ?, 'queued', ?, ?)
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(intent_id)
        .bind(now)
        .bind(now)
        .execute(pool)
        .await?;

        if result.rows_affected() > 0 {
            enqueued.push(intent_id.clone());
        }
    }

    Ok(enqueued)
}

struct QueuedJob {
    id: String,
    intent_id: String,
}

async fn fetch_queued(pool: &SqlitePool, limit: i64) -> Result<Vec<QueuedJob>> {
    let rows = sqlx::query(
        "SELECT id, intent_id FROM generation_jobs WHERE status = 'queued' ORDER BY created_at ASC, id ASC LIMIT ?",
    )
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .iter()
        .map(|row| QueuedJob {
            id: row.get("id"),
            intent_id: row.get("intent_id"),
        })
        .collect())
}

async fn set_job_status(
    pool: &SqlitePool,
    job_id: &str,
    status: &str,
    error: Option<&str>,
) -> Result<()> {
    sqlx::query("UPDATE generation_jobs SET status = ?, error = ?, updated_at = ? WHERE id = ?")
        .bind(status)
        .bind(error)
        .bind(chrono::Utc::now().timestamp())
        .bind(job_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Drain queued generation jobs. One job produces at most one initial
/// article; an intent that gained articles since enqueueing is left to the
/// human feedback loop and its job is closed without regenerating. A
/// failed job records its error and does not block the rest of the queue.
pub async fn run_jobs(
    pool: &SqlitePool,
    chat: &dyn ChatModel,
    config: &Config,
    limit: i64,
) -> Result<()> {
    let jobs = fetch_queued(pool, limit).await?;

    if jobs.is_empty() {
        println!("jobs run");
        println!("  queue empty");
        return Ok(());
    }

    let mut generated = 0u64;
    let mut skipped = 0u64;
    let mut failed = 0u64;

    for job in &jobs {
        set_job_status(pool, &job.id, "running", None).await?;

        let has_article: bool =
            sqlx::query_scalar("SELECT COUNT(*) > 0 FROM articles WHERE intent_id = ?")
                .bind(&job.intent_id)
                .fetch_one(pool)
                .await?;

        if has_article {
            info!(intent_id = %job.intent_id, "article already exists; closing job");
            set_job_status(pool, &job.id, "done", None).await?;
            skipped += 1;
            continue;
        }

        match workflow::generate_initial(pool, chat, config, &job.intent_id).await {
            Ok(article) => {
                info!(
                    intent_id = %job.intent_id,
                    article_id = %article.id,
                    "generated article v1"
                );
                set_job_status(pool, &job.id, "done", None).await?;
                generated += 1;
            }
            Err(e) => {
                warn!(intent_id = %job.intent_id, error = %e, "generation job failed");
                set_job_status(pool, &job.id, "failed", Some(&e.to_string())).await?;
                failed += 1;
            }
        }
    }

    println!("jobs run");
    println!("  processed: {}", jobs.len());
    println!("  generated: {}", generated);
    println!("  skipped: {}", skipped);
    println!("  failed: {}", failed);
    println!("ok");

    Ok(())
}

/// CLI listing.
pub async fn run_list_jobs(pool: &SqlitePool) -> Result<()> {
    let rows = sqlx::query(
        r#"
        SELECT j.id, j.status, j.error, i.name AS intent_name
        FROM generation_jobs j
        JOIN intents i ON i.id = j.intent_id
        ORDER BY j.created_at ASC
        "#,
    )
    .fetch_all(pool)
    .await?;

    if rows.is_empty() {
        println!("No jobs.");
        return Ok(());
    }

    for row in &rows {
        let id: String = row.get("id");
        let status: String = row.get("status");
        let intent_name: String = row.get("intent_name");
        let error: Option<String> = row.get("error");

        println!("{:<10} {} ({})", status, intent_name, id);
        if let Some(err) = error {
            println!("    error: {}", err);
        }
    }

    Ok(())
}
