//! Batch intent matcher.
//!
//! Builds the single structured prompt for a clustering batch — every
//! ticket plus the current taxonomy (names only, to bound prompt size) —
//! and validates the model's decisions before anything is persisted.
//!
//! Validation is strict: exactly one decision per ticket, no extras, no
//! omissions, every matched intent id present in the taxonomy, every
//! proposed category path complete. A violation fails the whole call; the
//! orchestrator commits nothing and the raw output is logged for diagnosis.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::{BTreeMap, HashSet};

use crate::error::PipelineError;
use crate::llm::{extract_json, ChatModel};
use crate::models::{TaxonomyEntry, Ticket};

/// One per-ticket decision from the model.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum Decision {
    /// Link the ticket to an existing intent.
    MatchExisting { intent_id: String },
    /// Create a new intent with a full L1→L2→L3 category path.
    CreateNew {
        name: String,
        area: String,
        l1: String,
        l2: String,
        l3: String,
    },
}

#[derive(Debug, Deserialize)]
struct RawAssignment {
    ticket: usize,
    #[serde(flatten)]
    decision: Decision,
}

#[derive(Debug, Deserialize)]
struct MatcherResponse {
    assignments: Vec<RawAssignment>,
}

const SYSTEM_PROMPT: &str = "\
You are a support-ticket triage engine. You receive a numbered list of \
customer support tickets and the current intent taxonomy. For every ticket \
decide whether it expresses an existing intent or a new one.\n\
\n\
Rules:\n\
- Prefer matching an existing intent whenever the ticket describes the same \
underlying customer issue, even if the wording differs.\n\
- Only create a new intent for a genuinely distinct issue type.\n\
- A new intent needs a short name, a one-sentence area description, and a \
three-level category path (l1 broadest, l3 most specific).\n\
- Reuse existing category names verbatim whenever they fit.\n\
\n\
Respond with a single JSON object:\n\
{\"assignments\": [\n\
  {\"ticket\": <number>, \"decision\": \"match_existing\", \"intent_id\": \"<id>\"},\n\
  {\"ticket\": <number>, \"decision\": \"create_new\", \"name\": \"...\", \
\"area\": \"...\", \"l1\": \"...\", \"l2\": \"...\", \"l3\": \"...\"}\n\
]}\n\
Every ticket number must appear exactly once.";

/// Render the user prompt: taxonomy first, then the numbered tickets.
pub fn build_user_prompt(tickets: &[Ticket], taxonomy: &[TaxonomyEntry]) -> String {
    let mut prompt = String::new();

    if taxonomy.is_empty() {
        prompt.push_str("Existing intents: none yet.\n");
    } else {
        prompt.push_str("Existing intents:\n");
        for entry in taxonomy {
            let path = [&entry.l1_name, &entry.l2_name, &entry.l3_name]
                .iter()
                .filter_map(|n| n.as_deref())
                .collect::<Vec<_>>()
                .join(" / ");
            prompt.push_str(&format!(
                "- id: {} | name: {} | area: {} | categories: {}\n",
                entry.intent_id, entry.name, entry.area, path
            ));
        }
    }

    prompt.push_str("\nTickets:\n");
    for (i, ticket) in tickets.iter().enumerate() {
        prompt.push_str(&format!(
            "[{}] subject: {}\n    body: {}\n",
            i,
            ticket.subject.trim(),
            ticket.body.trim()
        ));
    }

    prompt
}

/// Run one structured matcher call for the batch and return decisions in
/// ticket order.
pub async fn match_batch(
    chat: &dyn ChatModel,
    tickets: &[Ticket],
    taxonomy: &[TaxonomyEntry],
) -> Result<Vec<Decision>> {
    let user_prompt = build_user_prompt(tickets, taxonomy);

    let raw = chat
        .complete(SYSTEM_PROMPT, &user_prompt)
        .await
        .context("matcher call failed")?;

    parse_decisions(&raw, tickets.len(), taxonomy)
}

/// Parse and validate the model output against the batch.
pub fn parse_decisions(
    raw: &str,
    ticket_count: usize,
    taxonomy: &[TaxonomyEntry],
) -> Result<Vec<Decision>> {
    let response: MatcherResponse = match serde_json::from_str(extract_json(raw)) {
        Ok(r) => r,
        Err(e) => {
            tracing::warn!(error = %e, raw, "matcher output failed to decode");
            return Err(PipelineError::MalformedModelOutput(format!(
                "undecodable assignment list: {}",
                e
            ))
            .into());
        }
    };

    if response.assignments.len() != ticket_count {
        return Err(malformed(format!(
            "expected {} assignments, got {}",
            ticket_count,
            response.assignments.len()
        ), raw));
    }

    let known_intents: HashSet<&str> = taxonomy.iter().map(|e| e.intent_id.as_str()).collect();
    let mut by_index: BTreeMap<usize, Decision> = BTreeMap::new();

    for assignment in response.assignments {
        if assignment.ticket >= ticket_count {
            return Err(malformed(
                format!("assignment for unknown ticket index {}", assignment.ticket),
                raw,
            ));
        }
        if by_index.contains_key(&assignment.ticket) {
            return Err(malformed(
                format!("duplicate assignment for ticket index {}", assignment.ticket),
                raw,
            ));
        }

        match &assignment.decision {
            Decision::MatchExisting { intent_id } => {
                if !known_intents.contains(intent_id.as_str()) {
                    return Err(malformed(
                        format!("matched unknown intent id {}", intent_id),
                        raw,
                    ));
                }
            }
            Decision::CreateNew { name, area, l1, l2, l3 } => {
                for (field, value) in [
                    ("name", name),
                    ("area", area),
                    ("l1", l1),
                    ("l2", l2),
                    ("l3", l3),
                ] {
                    if value.trim().is_empty() {
                        return Err(malformed(
                            format!("create_new with empty {}", field),
                            raw,
                        ));
                    }
                }
            }
        }

        by_index.insert(assignment.ticket, assignment.decision);
    }

    Ok(by_index.into_values().collect())
}

fn malformed(reason: String, raw: &str) -> anyhow::Error {
    tracing::warn!(raw, "matcher output rejected: {}", reason);
    PipelineError::MalformedModelOutput(reason).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ticket(id: &str, subject: &str) -> Ticket {
        Ticket {
            id: id.to_string(),
            subject: subject.to_string(),
            body: format!("{} body", subject),
            received_at: 0,
            intent_id: None,
        }
    }

    fn taxonomy_with(intent_id: &str) -> Vec<TaxonomyEntry> {
        vec![TaxonomyEntry {
            intent_id: intent_id.to_string(),
            name: "Password reset".to_string(),
            area: "login problems".to_string(),
            l1_name: Some("Account".to_string()),
            l2_name: Some("Login".to_string()),
            l3_name: Some("Password".to_string()),
        }]
    }

    #[test]
    fn test_prompt_includes_tickets_and_taxonomy() {
        let tickets = vec![ticket("t1", "Cannot log in"), ticket("t2", "Refund request")];
        let prompt = build_user_prompt(&tickets, &taxonomy_with("int-1"));

        assert!(prompt.contains("[0] subject: Cannot log in"));
        assert!(prompt.contains("[1] subject: Refund request"));
        assert!(prompt.contains("id: int-1"));
        assert!(prompt.contains("Account / Login / Password"));
    }

    #[test]
    fn test_prompt_with_empty_taxonomy() {
        let prompt = build_user_prompt(&[ticket("t1", "Hi")], &[]);
        assert!(prompt.contains("none yet"));
    }

    #[test]
    fn test_parse_valid_mixed_decisions() {
        let raw = r#"{"assignments": [
            {"ticket": 1, "decision": "match_existing", "intent_id": "int-1"},
            {"ticket": 0, "decision": "create_new", "name": "Refunds", "area": "billing disputes",
             "l1": "Billing", "l2": "Payments", "l3": "Refunds"}
        ]}"#;

        let decisions = parse_decisions(raw, 2, &taxonomy_with("int-1")).unwrap();
        assert_eq!(decisions.len(), 2);
        // Returned in ticket order.
        assert!(matches!(decisions[0], Decision::CreateNew { .. }));
        assert!(matches!(decisions[1], Decision::MatchExisting { .. }));
    }

    #[test]
    fn test_parse_accepts_fenced_json() {
        let raw = "```json\n{\"assignments\": [{\"ticket\": 0, \"decision\": \"match_existing\", \"intent_id\": \"int-1\"}]}\n```";
        assert!(parse_decisions(raw, 1, &taxonomy_with("int-1")).is_ok());
    }

    #[test]
    fn test_parse_rejects_missing_assignment() {
        let raw = r#"{"assignments": [{"ticket": 0, "decision": "match_existing", "intent_id": "int-1"}]}"#;
        let err = parse_decisions(raw, 2, &taxonomy_with("int-1")).unwrap_err();
        assert!(err.downcast_ref::<PipelineError>().is_some());
    }

    #[test]
    fn test_parse_rejects_duplicate_index() {
        let raw = r#"{"assignments": [
            {"ticket": 0, "decision": "match_existing", "intent_id": "int-1"},
            {"ticket": 0, "decision": "match_existing", "intent_id": "int-1"}
        ]}"#;
        assert!(parse_decisions(raw, 2, &taxonomy_with("int-1")).is_err());
    }

    #[test]
    fn test_parse_rejects_out_of_range_index() {
        let raw = r#"{"assignments": [{"ticket": 5, "decision": "match_existing", "intent_id": "int-1"}]}"#;
        assert!(parse_decisions(raw, 1, &taxonomy_with("int-1")).is_err());
    }

    #[test]
    fn test_parse_rejects_unknown_intent() {
        let raw = r#"{"assignments": [{"ticket": 0, "decision": "match_existing", "intent_id": "ghost"}]}"#;
        assert!(parse_decisions(raw, 1, &taxonomy_with("int-1")).is_err());
    }

    #[test]
    fn test_parse_rejects_incomplete_category_path() {
        let raw = r#"{"assignments": [
            {"ticket": 0, "decision": "create_new", "name": "X", "area": "y",
             "l1": "A", "l2": "", "l3": "C"}
        ]}"#;
        assert!(parse_decisions(raw, 1, &[]).is_err());
    }

    #[test]
    fn test_parse_rejects_non_json() {
        assert!(parse_decisions("I could not decide.", 1, &[]).is_err());
    }
}
