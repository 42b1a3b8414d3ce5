//! Article generation workflow (pipeline stage 2).
//!
//! A linear two-node RAG state machine: `retrieve` gathers grounding
//! chunks for the intent, `generate` makes one structured LLM call that
//! produces the article fields. The same machine serves initial generation
//! (version 1) and feedback-driven iteration (version n+1 with the full
//! feedback history in the prompt).
//!
//! Version claims: before any LLM spend, a placeholder row is inserted to
//! claim `(intent_id, version)` — status `draft` for initial work,
//! `iteration` for feedback work. The articles table's unique constraint
//! rejects a concurrent claimer with a version conflict. On LLM failure
//! the claim row is deleted, so a failed invocation leaves no new version
//! and the previous latest stays current.

use anyhow::{bail, Context, Result};
use sqlx::{Row, SqlitePool};
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::error::PipelineError;
use crate::llm::{extract_json, ChatModel};
use crate::models::{Article, ArticleDraft, ArticleStatus, Intent, RetrievedChunk};
use crate::retrieve;
use crate::taxonomy;
use crate::tickets;

/// Working state threaded through one generation or iteration call.
/// Exists only for the duration of the call; never persisted.
pub struct RagState {
    pub intent: Intent,
    pub ticket_texts: Vec<String>,
    pub feedback: Option<String>,
    pub context: Vec<RetrievedChunk>,
    pub draft: Option<ArticleDraft>,
}

const SYSTEM_PROMPT: &str = "\
You are a technical writer producing a customer-facing help article.\n\
\n\
Rules:\n\
- The provided company document excerpts are ground truth. Prefer them \
over general knowledge, and do not state claims about the product that \
the excerpts do not support.\n\
- Address the problems the example tickets describe.\n\
- If reviewer feedback is provided, address every point of it directly.\n\
- Write the body in markdown.\n\
\n\
Respond with a single JSON object: \
{\"title\": \"...\", \"summary\": \"...\", \"body\": \"...\"}";

/// Render the generation prompt from the workflow state.
pub fn build_user_prompt(state: &RagState) -> String {
    let mut prompt = String::new();

    prompt.push_str(&format!(
        "Intent: {}\nArea: {}\n",
        state.intent.name, state.intent.area
    ));

    prompt.push_str("\nExample tickets:\n");
    for text in &state.ticket_texts {
        prompt.push_str(&format!("- {}\n", text.replace('\n', " ")));
    }

    if state.context.is_empty() {
        prompt.push_str("\nCompany documents: none matched this topic.\n");
    } else {
        prompt.push_str("\nCompany document excerpts (ground truth):\n");
        for chunk in &state.context {
            let title = chunk.document_title.as_deref().unwrap_or("untitled");
            prompt.push_str(&format!("--- {} ---\n{}\n", title, chunk.text));
        }
    }

    if let Some(feedback) = &state.feedback {
        prompt.push_str(&format!(
            "\nReviewer feedback on previous versions (address all of it):\n{}\n",
            feedback
        ));
    }

    prompt
}

/// Append new feedback to the accumulated history.
pub fn accumulate_feedback(previous: Option<&str>, new_feedback: &str) -> String {
    match previous {
        Some(prev) if !prev.trim().is_empty() => {
            format!("{}\n---\n{}", prev.trim_end(), new_feedback.trim())
        }
        _ => new_feedback.trim().to_string(),
    }
}

/// Node 1: fill the state's retrieval context.
async fn retrieve_node(pool: &SqlitePool, config: &Config, state: &mut RagState) -> Result<()> {
    let mut query = format!("{} {}", state.intent.name, state.intent.area);
    for text in state.ticket_texts.iter().take(10) {
        query.push(' ');
        query.push_str(text);
    }

    state.context = retrieve::retrieve_context(pool, config, &query, config.retrieval.top_k).await?;
    Ok(())
}

/// Node 2: one structured LLM call producing the article fields.
async fn generate_node(chat: &dyn ChatModel, state: &mut RagState) -> Result<()> {
    let user_prompt = build_user_prompt(state);

    let raw = chat
        .complete(SYSTEM_PROMPT, &user_prompt)
        .await
        .context("article generation call failed")?;

    let draft: ArticleDraft = match serde_json::from_str(extract_json(&raw)) {
        Ok(d) => d,
        Err(e) => {
            warn!(error = %e, raw, "article output failed to decode");
            return Err(PipelineError::MalformedModelOutput(format!(
                "undecodable article: {}",
                e
            ))
            .into());
        }
    };

    if draft.title.trim().is_empty() || draft.body.trim().is_empty() {
        return Err(PipelineError::MalformedModelOutput(
            "article with empty title or body".to_string(),
        )
        .into());
    }

    state.draft = Some(draft);
    Ok(())
}

/// Generate the first article for an intent: version 1, `pending_review`.
pub async fn generate_initial(
    pool: &SqlitePool,
    chat: &dyn ChatModel,
    config: &Config,
    intent_id: &str,
) -> Result<Article> {
    let intent = taxonomy::fetch_intent(pool, intent_id).await?;

    if fetch_latest(pool, intent_id).await?.is_some() {
        bail!(
            "intent {} already has articles; use iterate for new versions",
            intent_id
        );
    }

    let member_tickets = tickets::fetch_by_intent(pool, intent_id).await?;
    let ticket_texts = member_tickets
        .iter()
        .map(|t| format!("{}: {}", t.subject, t.body))
        .collect();

    let mut state = RagState {
        intent,
        ticket_texts,
        feedback: None,
        context: Vec::new(),
        draft: None,
    };

    let claim_id = claim_version(pool, intent_id, 1, ArticleStatus::Draft, None).await?;

    match run_rag(pool, chat, config, &mut state).await {
        Ok(draft) => finalize_claim(pool, &claim_id, &draft).await,
        Err(e) => {
            release_claim(pool, &claim_id).await?;
            Err(e)
        }
    }
}

/// Accept reviewer feedback on the latest article and regenerate: a new
/// row with version n+1 and the full feedback history, `pending_review`
/// once regeneration completes.
pub async fn iterate(
    pool: &SqlitePool,
    chat: &dyn ChatModel,
    config: &Config,
    article_id: &str,
    feedback: &str,
) -> Result<Article> {
    if feedback.trim().is_empty() {
        bail!("feedback must not be empty");
    }

    let article = fetch_article(pool, article_id).await?;
    ensure_latest(pool, &article).await?;

    match article.status {
        ArticleStatus::Accepted => {
            return Err(PipelineError::ArticleTerminal(article.id).into());
        }
        ArticleStatus::Draft => {
            return Err(PipelineError::InvalidTransition {
                article_id: article.id,
                status: article.status.to_string(),
                action: "iterate",
            }
            .into());
        }
        // `iteration` as the latest status means a previous regeneration
        // never completed; iterating again is the recovery path.
        ArticleStatus::PendingReview | ArticleStatus::Iteration => {}
    }

    let history = accumulate_feedback(article.feedback.as_deref(), feedback);

    let intent = taxonomy::fetch_intent(pool, &article.intent_id).await?;
    let member_tickets = tickets::fetch_by_intent(pool, &article.intent_id).await?;
    let ticket_texts = member_tickets
        .iter()
        .map(|t| format!("{}: {}", t.subject, t.body))
        .collect();

    let mut state = RagState {
        intent,
        ticket_texts,
        feedback: Some(history.clone()),
        context: Vec::new(),
        draft: None,
    };

    let claim_id = claim_version(
        pool,
        &article.intent_id,
        article.version + 1,
        ArticleStatus::Iteration,
        Some(&history),
    )
    .await?;

    match run_rag(pool, chat, config, &mut state).await {
        Ok(draft) => {
            let new_article = finalize_claim(pool, &claim_id, &draft).await?;
            info!(
                intent_id = %new_article.intent_id,
                version = new_article.version,
                "article iterated"
            );
            Ok(new_article)
        }
        Err(e) => {
            release_claim(pool, &claim_id).await?;
            Err(e)
        }
    }
}

/// Approve the latest `pending_review` article. Terminal: the row never
/// changes again, and the intent is excluded from future generation work.
pub async fn approve(pool: &SqlitePool, article_id: &str) -> Result<Article> {
    let article = fetch_article(pool, article_id).await?;
    ensure_latest(pool, &article).await?;

    match article.status {
        ArticleStatus::Accepted => {
            return Err(PipelineError::ArticleTerminal(article.id).into());
        }
        ArticleStatus::PendingReview => {}
        ArticleStatus::Draft | ArticleStatus::Iteration => {
            return Err(PipelineError::InvalidTransition {
                article_id: article.id,
                status: article.status.to_string(),
                action: "approve",
            }
            .into());
        }
    }

    sqlx::query("UPDATE articles SET status = 'accepted', updated_at = ? WHERE id = ?")
        .bind(chrono::Utc::now().timestamp())
        .bind(article_id)
        .execute(pool)
        .await?;

    info!(article_id = %article_id, "article accepted");
    fetch_article(pool, article_id).await
}

async fn run_rag(
    pool: &SqlitePool,
    chat: &dyn ChatModel,
    config: &Config,
    state: &mut RagState,
) -> Result<ArticleDraft> {
    retrieve_node(pool, config, state).await?;
    generate_node(chat, state).await?;
    state
        .draft
        .clone()
        .ok_or_else(|| anyhow::anyhow!("generation produced no draft"))
}

/// Insert the placeholder row that claims `(intent_id, version)`. A unique
/// violation means another worker got there first.
async fn claim_version(
    pool: &SqlitePool,
    intent_id: &str,
    version: i64,
    status: ArticleStatus,
    feedback: Option<&str>,
) -> Result<String> {
    let id = Uuid::new_v4().to_string();
    let now = chrono::Utc::now().timestamp();

    let result = sqlx::query(
        r#"
        INSERT INTO articles (id, intent_id, version, status, feedback, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&id)
    .bind(intent_id)
    .bind(version)
    .bind(status.as_str())
    .bind(feedback)
    .bind(now)
    .bind(now)
    .execute(pool)
    .await;

    match result {
        Ok(_) => Ok(id),
        Err(sqlx::Error::Database(db_err))
            if matches!(db_err.kind(), sqlx::error::ErrorKind::UniqueViolation) =>
        {
            Err(PipelineError::VersionConflict {
                intent_id: intent_id.to_string(),
                version,
            }
            .into())
        }
        Err(e) => Err(e.into()),
    }
}

async fn release_claim(pool: &SqlitePool, claim_id: &str) -> Result<()> {
    sqlx::query("DELETE FROM articles WHERE id = ?")
        .bind(claim_id)
        .execute(pool)
        .await?;
    Ok(())
}

async fn finalize_claim(pool: &SqlitePool, claim_id: &str, draft: &ArticleDraft) -> Result<Article> {
    sqlx::query(
        r#"
        UPDATE articles
        SET title = ?, summary = ?, body = ?, status = 'pending_review', updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(draft.title.trim())
    .bind(draft.summary.trim())
    .bind(draft.body.trim())
    .bind(chrono::Utc::now().timestamp())
    .bind(claim_id)
    .execute(pool)
    .await?;

    fetch_article(pool, claim_id).await
}

pub async fn fetch_article(pool: &SqlitePool, article_id: &str) -> Result<Article> {
    let row = sqlx::query(
        r#"
        SELECT id, intent_id, version, status, title, summary, body, feedback, created_at, updated_at
        FROM articles WHERE id = ?
        "#,
    )
    .bind(article_id)
    .fetch_optional(pool)
    .await?;

    let row = row.ok_or_else(|| anyhow::anyhow!("article {} does not exist", article_id))?;
    row_to_article(&row)
}

/// The highest-version article for an intent, if any.
pub async fn fetch_latest(pool: &SqlitePool, intent_id: &str) -> Result<Option<Article>> {
    let row = sqlx::query(
        r#"
        SELECT id, intent_id, version, status, title, summary, body, feedback, created_at, updated_at
        FROM articles WHERE intent_id = ?
        ORDER BY version DESC LIMIT 1
        "#,
    )
    .bind(intent_id)
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(row_to_article).transpose()
}

async fn ensure_latest(pool: &SqlitePool, article: &Article) -> Result<()> {
    let latest = fetch_latest(pool, &article.intent_id)
        .await?
        .ok_or_else(|| anyhow::anyhow!("intent {} has no articles", article.intent_id))?;

    if latest.id != article.id {
        return Err(PipelineError::StaleVersion {
            article_id: article.id.clone(),
            intent_id: article.intent_id.clone(),
        }
        .into());
    }
    Ok(())
}

fn row_to_article(row: &sqlx::sqlite::SqliteRow) -> Result<Article> {
    let status: String = row.get("status");
    Ok(Article {
        id: row.get("id"),
        intent_id: row.get("intent_id"),
        version: row.get("version"),
        status: status.parse()?,
        title: row.get("title"),
        summary: row.get("summary"),
        body: row.get("body"),
        feedback: row.get("feedback"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

// ─── CLI entry points ───────────────────────────────────────────────

pub async fn run_list_articles(pool: &SqlitePool, intent_id: Option<&str>) -> Result<()> {
    let rows = match intent_id {
        Some(id) => {
            sqlx::query(
                r#"
                SELECT a.id, a.version, a.status, a.title, i.name AS intent_name
                FROM articles a JOIN intents i ON i.id = a.intent_id
                WHERE a.intent_id = ?
                ORDER BY a.intent_id, a.version
                "#,
            )
            .bind(id)
            .fetch_all(pool)
            .await?
        }
        None => {
            sqlx::query(
                r#"
                SELECT a.id, a.version, a.status, a.title, i.name AS intent_name
                FROM articles a JOIN intents i ON i.id = a.intent_id
                ORDER BY a.intent_id, a.version
                "#,
            )
            .fetch_all(pool)
            .await?
        }
    };

    if rows.is_empty() {
        println!("No articles.");
        return Ok(());
    }

    for row in &rows {
        let id: String = row.get("id");
        let version: i64 = row.get("version");
        let status: String = row.get("status");
        let title: String = row.get("title");
        let intent_name: String = row.get("intent_name");

        let display_title = if title.is_empty() {
            "(generating)"
        } else {
            title.as_str()
        };
        println!("{} v{} [{}] {}", intent_name, version, status, display_title);
        println!("    id: {}", id);
    }

    Ok(())
}

pub async fn run_show_article(pool: &SqlitePool, article_id: &str) -> Result<()> {
    let article = fetch_article(pool, article_id).await?;

    println!("# {}", article.title);
    println!();
    println!("intent: {}", article.intent_id);
    println!("version: {}", article.version);
    println!("status: {}", article.status);
    println!();
    println!("## Summary");
    println!("{}", article.summary);
    println!();
    println!("{}", article.body);

    if let Some(feedback) = &article.feedback {
        println!();
        println!("## Feedback history");
        println!("{}", feedback);
    }

    Ok(())
}

pub async fn run_approve(pool: &SqlitePool, article_id: &str) -> Result<()> {
    let article = approve(pool, article_id).await?;
    println!("approved {} v{} ({})", article.intent_id, article.version, article.id);
    Ok(())
}

pub async fn run_iterate(
    pool: &SqlitePool,
    chat: &dyn ChatModel,
    config: &Config,
    article_id: &str,
    feedback: &str,
) -> Result<()> {
    let article = iterate(pool, chat, config, article_id, feedback).await?;
    println!(
        "iterated to v{} [{}] ({})",
        article.version, article.status, article.id
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state_with(context: Vec<RetrievedChunk>, feedback: Option<String>) -> RagState {
        RagState {
            intent: Intent {
                id: "int-1".to_string(),
                name: "Password reset".to_string(),
                area: "login problems".to_string(),
                l1_category_id: None,
                l2_category_id: None,
                l3_category_id: None,
                created_at: 0,
                updated_at: 0,
            },
            ticket_texts: vec!["Cannot log in: I forgot my password".to_string()],
            feedback,
            context,
            draft: None,
        }
    }

    fn chunk(text: &str) -> RetrievedChunk {
        RetrievedChunk {
            chunk_id: "c1".to_string(),
            document_id: "d1".to_string(),
            document_title: Some("security-faq.md".to_string()),
            text: text.to_string(),
            score: 0.9,
        }
    }

    #[test]
    fn test_prompt_includes_context_and_tickets() {
        let state = state_with(vec![chunk("Passwords reset from the login page.")], None);
        let prompt = build_user_prompt(&state);

        assert!(prompt.contains("Intent: Password reset"));
        assert!(prompt.contains("Cannot log in"));
        assert!(prompt.contains("ground truth"));
        assert!(prompt.contains("Passwords reset from the login page."));
        assert!(prompt.contains("security-faq.md"));
        assert!(!prompt.contains("Reviewer feedback"));
    }

    #[test]
    fn test_prompt_flags_empty_context() {
        let prompt = build_user_prompt(&state_with(vec![], None));
        assert!(prompt.contains("none matched"));
    }

    #[test]
    fn test_prompt_includes_feedback_history() {
        let state = state_with(vec![], Some("add a security section\n---\nshorter title".to_string()));
        let prompt = build_user_prompt(&state);
        assert!(prompt.contains("add a security section"));
        assert!(prompt.contains("shorter title"));
    }

    #[test]
    fn test_accumulate_feedback_first() {
        assert_eq!(accumulate_feedback(None, "  be concise "), "be concise");
    }

    #[test]
    fn test_accumulate_feedback_appends_history() {
        let history = accumulate_feedback(Some("first pass"), "second pass");
        assert_eq!(history, "first pass\n---\nsecond pass");
    }
}
