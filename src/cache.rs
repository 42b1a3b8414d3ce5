//! Content-hash cache for clustering results.
//!
//! A batch's cache key is a SHA-256 digest over the normalized ticket
//! texts, sorted lexicographically before hashing so the key is independent
//! of submission order. Cached entries map each ticket's own text digest to
//! the intent it was assigned, which lets a hit be re-applied to a
//! resubmitted batch even when the ticket rows (and ids) are new.
//!
//! LLM calls dominate pipeline cost; a hit skips the matcher entirely.

use anyhow::Result;
use sha2::{Digest, Sha256};
use sqlx::SqlitePool;

use crate::models::{CachedAssignment, Ticket};

const RECORD_SEPARATOR: &str = "\u{1e}";

/// Normalize one ticket's text for hashing: trimmed, lowercased,
/// subject and body joined with a newline.
pub fn normalize_ticket_text(ticket: &Ticket) -> String {
    format!(
        "{}\n{}",
        ticket.subject.trim().to_lowercase(),
        ticket.body.trim().to_lowercase()
    )
}

/// Digest of a single ticket's normalized text.
pub fn ticket_digest(ticket: &Ticket) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalize_ticket_text(ticket).as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Order-independent digest of a whole batch. Two batches containing the
/// same set of (subject, body) pairs hash identically regardless of order.
pub fn batch_digest(tickets: &[Ticket]) -> String {
    let mut texts: Vec<String> = tickets.iter().map(normalize_ticket_text).collect();
    texts.sort();

    let mut hasher = Sha256::new();
    hasher.update(texts.join(RECORD_SEPARATOR).as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Look up a cached result. Returns `None` on a miss, and also when the
/// entry references an intent that no longer exists — a stale hit simply
/// degrades to a miss and the batch is recomputed.
pub async fn get(pool: &SqlitePool, digest: &str) -> Result<Option<Vec<CachedAssignment>>> {
    let row: Option<String> = sqlx::query_scalar(
        "SELECT assignments_json FROM clustering_cache WHERE batch_digest = ?",
    )
    .bind(digest)
    .fetch_optional(pool)
    .await?;

    let json = match row {
        Some(json) => json,
        None => return Ok(None),
    };

    let assignments: Vec<CachedAssignment> = match serde_json::from_str(&json) {
        Ok(a) => a,
        Err(e) => {
            tracing::warn!(digest, error = %e, "dropping undecodable cache entry");
            return Ok(None);
        }
    };

    for assignment in &assignments {
        let exists: bool = sqlx::query_scalar("SELECT COUNT(*) > 0 FROM intents WHERE id = ?")
            .bind(&assignment.intent_id)
            .fetch_one(pool)
            .await?;
        if !exists {
            tracing::info!(
                digest,
                intent_id = %assignment.intent_id,
                "cache entry references deleted intent; treating as miss"
            );
            return Ok(None);
        }
    }

    Ok(Some(assignments))
}

/// Store a batch result. Only called after the batch committed successfully.
pub async fn put(
    pool: &SqlitePool,
    digest: &str,
    assignments: &[CachedAssignment],
) -> Result<()> {
    let json = serde_json::to_string(assignments)?;
    let now = chrono::Utc::now().timestamp();

    sqlx::query(
        r#"
        INSERT INTO clustering_cache (batch_digest, assignments_json, created_at)
        VALUES (?, ?, ?)
        ON CONFLICT(batch_digest) DO UPDATE SET
            assignments_json = excluded.assignments_json,
            created_at = excluded.created_at
        "#,
    )
    .bind(digest)
    .bind(json)
    .bind(now)
    .execute(pool)
    .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ticket(id: &str, subject: &str, body: &str) -> Ticket {
        Ticket {
            id: id.to_string(),
            subject: subject.to_string(),
            body: body.to_string(),
            received_at: 0,
            intent_id: None,
        }
    }

    #[test]
    fn test_digest_order_independent() {
        let a = vec![
            ticket("t1", "Reset password", "I forgot my password"),
            ticket("t2", "Billing", "Double charge on invoice"),
        ];
        let b = vec![
            ticket("t9", "Billing", "Double charge on invoice"),
            ticket("t8", "Reset password", "I forgot my password"),
        ];
        assert_eq!(batch_digest(&a), batch_digest(&b));
    }

    #[test]
    fn test_digest_ignores_case_and_whitespace() {
        let a = vec![ticket("t1", "  Reset Password ", " help ")];
        let b = vec![ticket("t2", "reset password", "help")];
        assert_eq!(batch_digest(&a), batch_digest(&b));
    }

    #[test]
    fn test_digest_sensitive_to_content() {
        let a = vec![ticket("t1", "Reset password", "help")];
        let b = vec![ticket("t1", "Reset password", "different")];
        assert_ne!(batch_digest(&a), batch_digest(&b));
    }

    #[test]
    fn test_digest_sensitive_to_multiplicity() {
        let once = vec![ticket("t1", "a", "b")];
        let twice = vec![ticket("t1", "a", "b"), ticket("t2", "a", "b")];
        assert_ne!(batch_digest(&once), batch_digest(&twice));
    }

    #[test]
    fn test_ticket_digest_matches_content_not_id() {
        let a = ticket("t1", "Reset password", "help");
        let b = ticket("t2", "reset password", "help");
        assert_eq!(ticket_digest(&a), ticket_digest(&b));
    }
}
