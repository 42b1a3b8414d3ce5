//! Intent and category taxonomy store.
//!
//! The taxonomy is the pipeline's primary shared mutable resource. All
//! mutation helpers take a `SqliteConnection` so the clustering
//! orchestrator can run them inside one batch transaction; SQLite's writer
//! lock serializes concurrent batches, and the unique index on
//! `(level, COALESCE(parent_id,''), lower(name))` turns a lost race into a
//! constraint failure instead of a duplicate node.
//!
//! Category names proposed by the matcher are reconciled against existing
//! nodes by exact case-insensitive match under the same parent. Nothing
//! fuzzier: naming variance that survives that test creates a new node.

use anyhow::{bail, Context, Result};
use sqlx::{Row, SqliteConnection, SqlitePool};
use uuid::Uuid;

use crate::error::PipelineError;
use crate::models::{Category, Intent, TaxonomyEntry};

/// Fetch every intent with its category names, as handed to the matcher.
pub async fn fetch_taxonomy(pool: &SqlitePool) -> Result<Vec<TaxonomyEntry>> {
    let rows = sqlx::query(
        r#"
        SELECT i.id, i.name, i.area,
               c1.name AS l1_name, c2.name AS l2_name, c3.name AS l3_name
        FROM intents i
        LEFT JOIN categories c1 ON c1.id = i.l1_category_id
        LEFT JOIN categories c2 ON c2.id = i.l2_category_id
        LEFT JOIN categories c3 ON c3.id = i.l3_category_id
        ORDER BY i.created_at ASC, i.id ASC
        "#,
    )
    .fetch_all(pool)
    .await?;

    Ok(rows
        .iter()
        .map(|row| TaxonomyEntry {
            intent_id: row.get("id"),
            name: row.get("name"),
            area: row.get("area"),
            l1_name: row.get("l1_name"),
            l2_name: row.get("l2_name"),
            l3_name: row.get("l3_name"),
        })
        .collect())
}

/// Case-insensitive lookup of a category under a given parent. Errors with
/// [`PipelineError::AmbiguousCategory`] if more than one row matches
/// (possible only in data predating the unique index).
pub async fn find_category(
    conn: &mut SqliteConnection,
    level: i64,
    parent_id: Option<&str>,
    name: &str,
) -> Result<Option<Category>> {
    let rows = sqlx::query(
        r#"
        SELECT id, name, level, parent_id FROM categories
        WHERE level = ? AND COALESCE(parent_id, '') = ? AND lower(name) = lower(?)
        "#,
    )
    .bind(level)
    .bind(parent_id.unwrap_or(""))
    .bind(name.trim())
    .fetch_all(&mut *conn)
    .await?;

    if rows.len() > 1 {
        return Err(PipelineError::AmbiguousCategory {
            name: name.to_string(),
            level,
        }
        .into());
    }

    Ok(rows.first().map(|row| Category {
        id: row.get("id"),
        name: row.get("name"),
        level: row.get("level"),
        parent_id: row.get("parent_id"),
    }))
}

/// Return the existing category for (level, parent, name) or create it.
///
/// Hierarchy invariants are enforced here: level 1 takes no parent, and a
/// level-2/3 parent must sit exactly one level above.
pub async fn upsert_category(
    conn: &mut SqliteConnection,
    level: i64,
    name: &str,
    parent_id: Option<&str>,
) -> Result<Category> {
    let name = name.trim();
    if name.is_empty() {
        bail!("category name must not be empty");
    }
    if !(1..=3).contains(&level) {
        bail!("category level must be 1, 2, or 3; got {}", level);
    }

    match (level, parent_id) {
        (1, Some(_)) => bail!("level-1 category '{}' must not have a parent", name),
        (1, None) => {}
        (_, None) => bail!("level-{} category '{}' requires a parent", level, name),
        (_, Some(pid)) => {
            let parent_level: Option<i64> =
                sqlx::query_scalar("SELECT level FROM categories WHERE id = ?")
                    .bind(pid)
                    .fetch_optional(&mut *conn)
                    .await?;
            match parent_level {
                None => bail!("parent category {} does not exist", pid),
                Some(pl) if pl != level - 1 => bail!(
                    "level-{} category '{}' must have a level-{} parent, got level-{}",
                    level,
                    name,
                    level - 1,
                    pl
                ),
                Some(_) => {}
            }
        }
    }

    if let Some(existing) = find_category(conn, level, parent_id, name).await? {
        return Ok(existing);
    }

    let category = Category {
        id: Uuid::new_v4().to_string(),
        name: name.to_string(),
        level,
        parent_id: parent_id.map(|p| p.to_string()),
    };

    sqlx::query(
        "INSERT INTO categories (id, name, level, parent_id, created_at) VALUES (?, ?, ?, ?, ?)",
    )
    .bind(&category.id)
    .bind(&category.name)
    .bind(category.level)
    .bind(&category.parent_id)
    .bind(chrono::Utc::now().timestamp())
    .execute(&mut *conn)
    .await
    .with_context(|| format!("failed to create level-{} category '{}'", level, name))?;

    Ok(category)
}

/// Resolve an L1→L2→L3 name path to concrete category rows, creating any
/// missing nodes.
pub async fn resolve_category_path(
    conn: &mut SqliteConnection,
    l1: &str,
    l2: &str,
    l3: &str,
) -> Result<(Category, Category, Category)> {
    let c1 = upsert_category(conn, 1, l1, None).await?;
    let c2 = upsert_category(conn, 2, l2, Some(&c1.id)).await?;
    let c3 = upsert_category(conn, 3, l3, Some(&c2.id)).await?;
    Ok((c1, c2, c3))
}

pub async fn create_intent(
    conn: &mut SqliteConnection,
    name: &str,
    area: &str,
    l1_category_id: &str,
    l2_category_id: &str,
    l3_category_id: &str,
) -> Result<Intent> {
    let name = name.trim();
    if name.is_empty() {
        bail!("intent name must not be empty");
    }

    let now = chrono::Utc::now().timestamp();
    let intent = Intent {
        id: Uuid::new_v4().to_string(),
        name: name.to_string(),
        area: area.trim().to_string(),
        l1_category_id: Some(l1_category_id.to_string()),
        l2_category_id: Some(l2_category_id.to_string()),
        l3_category_id: Some(l3_category_id.to_string()),
        created_at: now,
        updated_at: now,
    };

    sqlx::query(
        r#"
        INSERT INTO intents (id, name, area, l1_category_id, l2_category_id, l3_category_id, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&intent.id)
    .bind(&intent.name)
    .bind(&intent.area)
    .bind(&intent.l1_category_id)
    .bind(&intent.l2_category_id)
    .bind(&intent.l3_category_id)
    .bind(intent.created_at)
    .bind(intent.updated_at)
    .execute(&mut *conn)
    .await?;

    Ok(intent)
}

/// Link a ticket to its assigned intent and touch the intent's timestamp.
pub async fn link_ticket_to_intent(
    conn: &mut SqliteConnection,
    ticket_id: &str,
    intent_id: &str,
) -> Result<()> {
    let result = sqlx::query("UPDATE tickets SET intent_id = ? WHERE id = ?")
        .bind(intent_id)
        .bind(ticket_id)
        .execute(&mut *conn)
        .await?;

    if result.rows_affected() == 0 {
        bail!("ticket {} does not exist", ticket_id);
    }

    sqlx::query("UPDATE intents SET updated_at = ? WHERE id = ?")
        .bind(chrono::Utc::now().timestamp())
        .bind(intent_id)
        .execute(&mut *conn)
        .await?;

    Ok(())
}

pub async fn fetch_intent(pool: &SqlitePool, intent_id: &str) -> Result<Intent> {
    let row = sqlx::query(
        r#"
        SELECT id, name, area, l1_category_id, l2_category_id, l3_category_id, created_at, updated_at
        FROM intents WHERE id = ?
        "#,
    )
    .bind(intent_id)
    .fetch_optional(pool)
    .await?;

    let row = row.ok_or_else(|| anyhow::anyhow!("intent {} does not exist", intent_id))?;

    Ok(Intent {
        id: row.get("id"),
        name: row.get("name"),
        area: row.get("area"),
        l1_category_id: row.get("l1_category_id"),
        l2_category_id: row.get("l2_category_id"),
        l3_category_id: row.get("l3_category_id"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

/// List intents with ticket counts for the CLI.
pub async fn run_list_intents(pool: &SqlitePool) -> Result<()> {
    let rows = sqlx::query(
        r#"
        SELECT i.id, i.name, i.area,
               c1.name AS l1_name, c2.name AS l2_name, c3.name AS l3_name,
               (SELECT COUNT(*) FROM tickets t WHERE t.intent_id = i.id) AS ticket_count
        FROM intents i
        LEFT JOIN categories c1 ON c1.id = i.l1_category_id
        LEFT JOIN categories c2 ON c2.id = i.l2_category_id
        LEFT JOIN categories c3 ON c3.id = i.l3_category_id
        ORDER BY i.created_at ASC
        "#,
    )
    .fetch_all(pool)
    .await?;

    if rows.is_empty() {
        println!("No intents.");
        return Ok(());
    }

    for row in &rows {
        let id: String = row.get("id");
        let name: String = row.get("name");
        let area: String = row.get("area");
        let ticket_count: i64 = row.get("ticket_count");
        let path: Vec<String> = ["l1_name", "l2_name", "l3_name"]
            .iter()
            .filter_map(|col| row.get::<Option<String>, _>(*col))
            .collect();

        println!("{} ({} tickets)", name, ticket_count);
        println!("    path: {}", path.join(" / "));
        println!("    area: {}", area);
        println!("    id: {}", id);
        println!();
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrate;
    use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
    use std::str::FromStr;

    async fn test_pool() -> SqlitePool {
        let options = SqliteConnectOptions::from_str("sqlite::memory:").unwrap();
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .unwrap();
        migrate::apply_schema(&pool).await.unwrap();
        pool
    }

    #[tokio::test]
    async fn test_upsert_reconciles_case_insensitively() {
        let pool = test_pool().await;
        let mut conn = pool.acquire().await.unwrap();

        let a = upsert_category(&mut conn, 1, "Account", None).await.unwrap();
        let b = upsert_category(&mut conn, 1, "account", None).await.unwrap();
        let c = upsert_category(&mut conn, 1, "  ACCOUNT  ", None).await.unwrap();

        assert_eq!(a.id, b.id);
        assert_eq!(a.id, c.id);
        // Original spelling is preserved.
        assert_eq!(b.name, "Account");
    }

    #[tokio::test]
    async fn test_same_name_under_different_parents_is_distinct() {
        let pool = test_pool().await;
        let mut conn = pool.acquire().await.unwrap();

        let billing = upsert_category(&mut conn, 1, "Billing", None).await.unwrap();
        let account = upsert_category(&mut conn, 1, "Account", None).await.unwrap();

        let a = upsert_category(&mut conn, 2, "Errors", Some(&billing.id))
            .await
            .unwrap();
        let b = upsert_category(&mut conn, 2, "Errors", Some(&account.id))
            .await
            .unwrap();

        assert_ne!(a.id, b.id);
    }

    #[tokio::test]
    async fn test_hierarchy_invariants() {
        let pool = test_pool().await;
        let mut conn = pool.acquire().await.unwrap();

        let l1 = upsert_category(&mut conn, 1, "Billing", None).await.unwrap();
        let l2 = upsert_category(&mut conn, 2, "Invoices", Some(&l1.id))
            .await
            .unwrap();

        // L1 must not have a parent.
        assert!(upsert_category(&mut conn, 1, "Bad", Some(&l1.id)).await.is_err());
        // L2/L3 require a parent.
        assert!(upsert_category(&mut conn, 2, "Orphan", None).await.is_err());
        // Parent must be exactly one level above.
        assert!(upsert_category(&mut conn, 3, "TooDeep", Some(&l1.id)).await.is_err());
        assert!(upsert_category(&mut conn, 2, "Sideways", Some(&l2.id)).await.is_err());
        // Nonexistent parent.
        assert!(upsert_category(&mut conn, 2, "Lost", Some("nope")).await.is_err());
    }

    #[tokio::test]
    async fn test_resolve_path_creates_and_reuses() {
        let pool = test_pool().await;
        let mut conn = pool.acquire().await.unwrap();

        let (a1, a2, a3) = resolve_category_path(&mut conn, "Account", "Login", "Password reset")
            .await
            .unwrap();
        let (b1, b2, b3) = resolve_category_path(&mut conn, "account", "LOGIN", "password reset")
            .await
            .unwrap();

        assert_eq!(a1.id, b1.id);
        assert_eq!(a2.id, b2.id);
        assert_eq!(a3.id, b3.id);

        drop(conn);
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM categories")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 3);
    }

    #[tokio::test]
    async fn test_link_ticket_requires_existing_ticket() {
        let pool = test_pool().await;
        let mut conn = pool.acquire().await.unwrap();

        let (c1, c2, c3) = resolve_category_path(&mut conn, "A", "B", "C").await.unwrap();
        let intent = create_intent(&mut conn, "Password reset", "login issues", &c1.id, &c2.id, &c3.id)
            .await
            .unwrap();

        let err = link_ticket_to_intent(&mut conn, "missing", &intent.id)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("does not exist"));
    }
}
