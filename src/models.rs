//! Core data models for the clustering and article-generation pipeline.
//!
//! These types represent the tickets, taxonomy nodes, articles, and
//! intermediate results that flow between the orchestrator, the matcher,
//! and the generation workflow.

use anyhow::bail;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// An ingested support ticket. Immutable once imported, except for the
/// intent link set by the clustering orchestrator.
#[derive(Debug, Clone)]
pub struct Ticket {
    pub id: String,
    pub subject: String,
    pub body: String,
    pub received_at: i64,
    pub intent_id: Option<String>,
}

/// A taxonomy node at level 1, 2, or 3. Level 1 has no parent; level 2/3
/// parents sit exactly one level above.
#[derive(Debug, Clone)]
pub struct Category {
    pub id: String,
    pub name: String,
    pub level: i64,
    pub parent_id: Option<String>,
}

/// A semantic cluster of tickets, linked to at most one category per level.
///
/// The impression/resolution counters belong to the external A/B telemetry
/// widget; this pipeline reads and writes the rows but never touches them.
#[derive(Debug, Clone)]
pub struct Intent {
    pub id: String,
    pub name: String,
    pub area: String,
    pub l1_category_id: Option<String>,
    pub l2_category_id: Option<String>,
    pub l3_category_id: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// One intent flattened with its category names, as shown to the matcher.
#[derive(Debug, Clone)]
pub struct TaxonomyEntry {
    pub intent_id: String,
    pub name: String,
    pub area: String,
    pub l1_name: Option<String>,
    pub l2_name: Option<String>,
    pub l3_name: Option<String>,
}

/// Outcome of clustering one ticket.
#[derive(Debug, Clone)]
pub struct ClusterAssignment {
    pub ticket_id: String,
    pub intent_id: String,
    pub intent_name: String,
    /// True when this batch created the intent (rather than matching one).
    pub created_intent: bool,
}

/// A cached clustering decision, keyed by the digest of one ticket's
/// normalized text so it can be re-applied to any ticket with identical
/// content.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedAssignment {
    pub text_digest: String,
    pub intent_id: String,
}

/// Article review lifecycle. `Draft` and `Iteration` are in-flight claim
/// states owned by a running generation; `Accepted` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArticleStatus {
    Draft,
    PendingReview,
    Iteration,
    Accepted,
}

impl ArticleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArticleStatus::Draft => "draft",
            ArticleStatus::PendingReview => "pending_review",
            ArticleStatus::Iteration => "iteration",
            ArticleStatus::Accepted => "accepted",
        }
    }
}

impl fmt::Display for ArticleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ArticleStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(ArticleStatus::Draft),
            "pending_review" => Ok(ArticleStatus::PendingReview),
            "iteration" => Ok(ArticleStatus::Iteration),
            "accepted" => Ok(ArticleStatus::Accepted),
            other => bail!("unknown article status: {}", other),
        }
    }
}

/// One immutable snapshot of generated help content for an intent.
/// The row with the highest version is the current "latest".
#[derive(Debug, Clone)]
pub struct Article {
    pub id: String,
    pub intent_id: String,
    pub version: i64,
    pub status: ArticleStatus,
    pub title: String,
    pub summary: String,
    pub body: String,
    /// Full feedback history across iterations, `---`-separated.
    pub feedback: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Structured output of one article-generation call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArticleDraft {
    pub title: String,
    pub summary: String,
    pub body: String,
}

/// A document chunk returned by semantic retrieval, ready to be cited as
/// grounding context.
#[derive(Debug, Clone)]
pub struct RetrievedChunk {
    pub chunk_id: String,
    pub document_id: String,
    pub document_title: Option<String>,
    pub text: String,
    pub score: f64,
}

/// Raw item produced by the docs connector before normalization.
#[derive(Debug, Clone)]
pub struct SourceItem {
    pub source: String,
    pub source_id: String,
    pub title: Option<String>,
    pub updated_at: i64,
    pub body: String,
}

/// A chunk of a document's body text.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub id: String,
    pub document_id: String,
    pub chunk_index: i64,
    pub text: String,
    pub hash: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_roundtrip() {
        for status in [
            ArticleStatus::Draft,
            ArticleStatus::PendingReview,
            ArticleStatus::Iteration,
            ArticleStatus::Accepted,
        ] {
            let parsed: ArticleStatus = status.as_str().parse().unwrap();
            assert_eq!(parsed, status);
        }
    }

    #[test]
    fn test_status_unknown() {
        assert!("approved".parse::<ArticleStatus>().is_err());
    }
}
