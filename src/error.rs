//! Typed pipeline failures.
//!
//! Most code propagates `anyhow::Result` like the rest of the crate, but a
//! few failures must be distinguishable by callers (the CLI maps them to
//! user-visible errors, a future API layer would map them to HTTP codes).
//! Those are modeled here and attached to the `anyhow` chain, so callers can
//! `downcast_ref::<PipelineError>()` when they need to branch.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// The batch handed to the clustering orchestrator contained no tickets.
    #[error("ticket batch is empty")]
    EmptyBatch,

    /// The model's structured output failed schema or cardinality validation.
    /// The raw output is logged at the call site for diagnosis.
    #[error("model returned malformed output: {0}")]
    MalformedModelOutput(String),

    /// More than one existing category matched case-insensitively under the
    /// same parent, so reconciliation cannot pick a node without guessing.
    #[error("ambiguous category name '{name}' at level {level}")]
    AmbiguousCategory { name: String, level: i64 },

    /// The article is `accepted`; no further state transition is allowed.
    #[error("article {0} is accepted and can no longer be changed")]
    ArticleTerminal(String),

    /// The action targeted an article that is not the latest version for its
    /// intent. Callers should re-read the current latest and retry.
    #[error("article {article_id} is not the latest version for intent {intent_id}")]
    StaleVersion {
        article_id: String,
        intent_id: String,
    },

    /// The article's current status does not permit the requested action.
    #[error("article {article_id} is '{status}'; cannot {action}")]
    InvalidTransition {
        article_id: String,
        status: String,
        action: &'static str,
    },

    /// Another worker claimed this version first. The caller may retry after
    /// re-reading the current latest version.
    #[error("version {version} already exists for intent {intent_id}")]
    VersionConflict { intent_id: String, version: i64 },
}
