//! Ticket import and access.
//!
//! The external CSV/API layer owns parsing and validation; this boundary
//! accepts already-structured records from a JSON file and persists them.
//! Tickets are immutable after import except for the intent link set by
//! the clustering orchestrator.

use anyhow::{Context, Result};
use serde::Deserialize;
use sqlx::{Row, SqlitePool};
use std::path::Path;
use uuid::Uuid;

use crate::models::Ticket;

#[derive(Debug, Deserialize)]
struct TicketRecord {
    subject: String,
    body: String,
    /// RFC 3339; defaults to the import time when absent.
    received_at: Option<chrono::DateTime<chrono::Utc>>,
}

/// Import tickets from a JSON array file. Records with an empty subject
/// and body are skipped with a warning. Returns the number imported.
pub async fn import_tickets(pool: &SqlitePool, path: &Path) -> Result<u64> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read ticket file: {}", path.display()))?;

    let records: Vec<TicketRecord> = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse ticket file: {}", path.display()))?;

    let mut imported = 0u64;

    for record in records {
        if record.subject.trim().is_empty() && record.body.trim().is_empty() {
            tracing::warn!("skipping ticket with empty subject and body");
            continue;
        }

        let received_at = record
            .received_at
            .map(|dt| dt.timestamp())
            .unwrap_or_else(|| chrono::Utc::now().timestamp());

        sqlx::query(
            "INSERT INTO tickets (id, subject, body, received_at, intent_id) VALUES (?, ?, ?, ?, NULL)",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(record.subject.trim())
        .bind(record.body.trim())
        .bind(received_at)
        .execute(pool)
        .await?;

        imported += 1;
    }

    Ok(imported)
}

/// Fetch up to `limit` tickets that have not been clustered yet, oldest
/// first.
pub async fn fetch_unclustered(pool: &SqlitePool, limit: i64) -> Result<Vec<Ticket>> {
    let rows = sqlx::query(
        r#"
        SELECT id, subject, body, received_at, intent_id
        FROM tickets
        WHERE intent_id IS NULL
        ORDER BY received_at ASC, id ASC
        LIMIT ?
        "#,
    )
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(rows.iter().map(row_to_ticket).collect())
}

/// All tickets belonging to an intent, oldest first. Their texts feed both
/// retrieval and generation prompts.
pub async fn fetch_by_intent(pool: &SqlitePool, intent_id: &str) -> Result<Vec<Ticket>> {
    let rows = sqlx::query(
        r#"
        SELECT id, subject, body, received_at, intent_id
        FROM tickets
        WHERE intent_id = ?
        ORDER BY received_at ASC, id ASC
        "#,
    )
    .bind(intent_id)
    .fetch_all(pool)
    .await?;

    Ok(rows.iter().map(row_to_ticket).collect())
}

fn row_to_ticket(row: &sqlx::sqlite::SqliteRow) -> Ticket {
    Ticket {
        id: row.get("id"),
        subject: row.get("subject"),
        body: row.get("body"),
        received_at: row.get("received_at"),
        intent_id: row.get("intent_id"),
    }
}

/// CLI listing.
pub async fn run_list_tickets(pool: &SqlitePool, unclustered_only: bool) -> Result<()> {
    let sql = if unclustered_only {
        "SELECT id, subject, received_at, intent_id FROM tickets WHERE intent_id IS NULL ORDER BY received_at ASC"
    } else {
        "SELECT id, subject, received_at, intent_id FROM tickets ORDER BY received_at ASC"
    };

    let rows = sqlx::query(sql).fetch_all(pool).await?;

    if rows.is_empty() {
        println!("No tickets.");
        return Ok(());
    }

    for row in &rows {
        let id: String = row.get("id");
        let subject: String = row.get("subject");
        let received_at: i64 = row.get("received_at");
        let intent_id: Option<String> = row.get("intent_id");

        let date = chrono::DateTime::from_timestamp(received_at, 0)
            .map(|dt| dt.format("%Y-%m-%d").to_string())
            .unwrap_or_default();

        println!(
            "{} [{}] {}",
            date,
            intent_id.as_deref().unwrap_or("unclustered"),
            subject
        );
        println!("    id: {}", id);
    }

    Ok(())
}
