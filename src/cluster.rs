//! Clustering orchestrator (pipeline stage 1).
//!
//! Coordinates the full batch flow: content hash → cache lookup →
//! taxonomy fetch → one matcher call → transactional persistence → cache
//! write. Persistence is atomic per batch: a matcher failure, a malformed
//! response, or any persistence error rolls the whole batch back and
//! leaves the cache untouched, so callers can safely retry the batch.

use anyhow::{Context, Result};
use sqlx::SqlitePool;
use std::collections::HashMap;
use tracing::{debug, info};

use crate::cache;
use crate::coordinator;
use crate::error::PipelineError;
use crate::llm::ChatModel;
use crate::matcher::{self, Decision};
use crate::models::{CachedAssignment, ClusterAssignment, Ticket};
use crate::taxonomy;
use crate::tickets;

/// Cluster one batch of tickets: link each to an existing intent or create
/// a new intent (with its category path) for it.
pub async fn cluster(
    pool: &SqlitePool,
    chat: &dyn ChatModel,
    batch: &[Ticket],
) -> Result<Vec<ClusterAssignment>> {
    if batch.is_empty() {
        return Err(PipelineError::EmptyBatch.into());
    }

    let digest = cache::batch_digest(batch);

    if let Some(cached) = cache::get(pool, &digest).await? {
        if let Some(assignments) = apply_cached(pool, batch, &cached).await? {
            info!(digest = %digest, tickets = batch.len(), "clustering cache hit");
            return Ok(assignments);
        }
        debug!(digest = %digest, "cache entry incomplete for batch; recomputing");
    }

    info!(digest = %digest, tickets = batch.len(), "clustering cache miss; invoking matcher");

    let taxonomy_snapshot = taxonomy::fetch_taxonomy(pool).await?;
    let decisions = matcher::match_batch(chat, batch, &taxonomy_snapshot).await?;

    let intent_names: HashMap<String, String> = taxonomy_snapshot
        .iter()
        .map(|e| (e.intent_id.clone(), e.name.clone()))
        .collect();

    let mut tx = pool.begin().await.context("failed to open batch transaction")?;
    let mut assignments = Vec::with_capacity(batch.len());
    // Intents created earlier in this same batch, keyed by lowercased name,
    // so the model proposing the same new intent for several tickets yields
    // one node.
    let mut created_this_batch: HashMap<String, (String, String)> = HashMap::new();

    for (ticket, decision) in batch.iter().zip(decisions.iter()) {
        let assignment = match decision {
            Decision::MatchExisting { intent_id } => {
                taxonomy::link_ticket_to_intent(&mut tx, &ticket.id, intent_id).await?;
                ClusterAssignment {
                    ticket_id: ticket.id.clone(),
                    intent_id: intent_id.clone(),
                    intent_name: intent_names.get(intent_id).cloned().unwrap_or_default(),
                    created_intent: false,
                }
            }
            Decision::CreateNew { name, area, l1, l2, l3 } => {
                let key = name.trim().to_lowercase();
                let (intent_id, intent_name, created) = match created_this_batch.get(&key) {
                    Some((id, name)) => (id.clone(), name.clone(), false),
                    None => {
                        let (c1, c2, c3) =
                            taxonomy::resolve_category_path(&mut tx, l1, l2, l3).await?;
                        let intent =
                            taxonomy::create_intent(&mut tx, name, area, &c1.id, &c2.id, &c3.id)
                                .await?;
                        created_this_batch
                            .insert(key, (intent.id.clone(), intent.name.clone()));
                        (intent.id, intent.name, true)
                    }
                };
                taxonomy::link_ticket_to_intent(&mut tx, &ticket.id, &intent_id).await?;
                ClusterAssignment {
                    ticket_id: ticket.id.clone(),
                    intent_id,
                    intent_name,
                    created_intent: created,
                }
            }
        };
        assignments.push(assignment);
    }

    tx.commit().await.context("failed to commit batch")?;

    // Cache only after the batch is durable.
    let cached: Vec<CachedAssignment> = batch
        .iter()
        .zip(assignments.iter())
        .map(|(ticket, assignment)| CachedAssignment {
            text_digest: cache::ticket_digest(ticket),
            intent_id: assignment.intent_id.clone(),
        })
        .collect();
    cache::put(pool, &digest, &cached).await?;

    info!(
        digest = %digest,
        new_intents = assignments.iter().filter(|a| a.created_intent).count(),
        "batch clustered"
    );

    Ok(assignments)
}

/// Re-apply a cached decision set to the batch. Returns `None` when some
/// ticket's text digest has no cached assignment (the entry predates a
/// content change), in which case the caller recomputes.
async fn apply_cached(
    pool: &SqlitePool,
    batch: &[Ticket],
    cached: &[CachedAssignment],
) -> Result<Option<Vec<ClusterAssignment>>> {
    let by_digest: HashMap<&str, &str> = cached
        .iter()
        .map(|c| (c.text_digest.as_str(), c.intent_id.as_str()))
        .collect();

    let mut resolved = Vec::with_capacity(batch.len());
    for ticket in batch {
        let digest = cache::ticket_digest(ticket);
        match by_digest.get(digest.as_str()) {
            Some(intent_id) => resolved.push((ticket, intent_id.to_string())),
            None => return Ok(None),
        }
    }

    let mut tx = pool.begin().await?;
    let mut assignments = Vec::with_capacity(batch.len());

    for (ticket, intent_id) in resolved {
        taxonomy::link_ticket_to_intent(&mut tx, &ticket.id, &intent_id).await?;
        let intent = sqlx::query_scalar::<_, String>("SELECT name FROM intents WHERE id = ?")
            .bind(&intent_id)
            .fetch_one(&mut *tx)
            .await?;
        assignments.push(ClusterAssignment {
            ticket_id: ticket.id.clone(),
            intent_id,
            intent_name: intent,
            created_intent: false,
        });
    }

    tx.commit().await?;
    Ok(Some(assignments))
}

/// Drain unclustered tickets in batches, then hand the touched intents to
/// the stage coordinator. CLI entry point for `desk cluster`.
pub async fn run_cluster(
    pool: &SqlitePool,
    chat: &dyn ChatModel,
    batch_size: usize,
    max_batches: Option<usize>,
) -> Result<()> {
    let mut batches_done = 0usize;
    let mut total_tickets = 0usize;
    let mut total_new_intents = 0usize;
    let mut total_jobs = 0usize;

    loop {
        if let Some(max) = max_batches {
            if batches_done >= max {
                break;
            }
        }

        let batch = tickets::fetch_unclustered(pool, batch_size as i64).await?;
        if batch.is_empty() {
            break;
        }

        let assignments = cluster(pool, chat, &batch).await?;

        let touched: Vec<String> = assignments.iter().map(|a| a.intent_id.clone()).collect();
        let enqueued = coordinator::plan_generation(pool, &touched).await?;

        total_tickets += assignments.len();
        total_new_intents += assignments.iter().filter(|a| a.created_intent).count();
        total_jobs += enqueued.len();
        batches_done += 1;
    }

    println!("cluster");
    println!("  batches: {}", batches_done);
    println!("  tickets clustered: {}", total_tickets);
    println!("  new intents: {}", total_new_intents);
    println!("  generation jobs enqueued: {}", total_jobs);
    println!("ok");

    Ok(())
}
