//! Filesystem connector for company documents.
//!
//! Scans the configured docs directory and returns one [`SourceItem`] per
//! matching file. These documents are the grounding corpus the article
//! generation workflow retrieves from.

use anyhow::{bail, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::Path;
use walkdir::WalkDir;

use crate::config::Config;
use crate::models::SourceItem;

pub fn scan_documents(config: &Config) -> Result<Vec<SourceItem>> {
    let fs_config = config
        .connectors
        .filesystem
        .as_ref()
        .ok_or_else(|| anyhow::anyhow!("Filesystem connector not configured"))?;

    let root = &fs_config.root;
    if !root.exists() {
        bail!("Document root does not exist: {}", root.display());
    }

    let include_set = build_globset(&fs_config.include_globs)?;

    let mut default_excludes = vec![
        "**/.git/**".to_string(),
        "**/node_modules/**".to_string(),
    ];
    default_excludes.extend(fs_config.exclude_globs.clone());
    let exclude_set = build_globset(&default_excludes)?;

    let mut items = Vec::new();

    let walker = WalkDir::new(root).follow_links(fs_config.follow_symlinks);
    for entry in walker {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        let rel_str = relative.to_string_lossy().to_string();

        if exclude_set.is_match(&rel_str) || !include_set.is_match(&rel_str) {
            continue;
        }

        items.push(file_to_source_item(path, &rel_str)?);
    }

    // Sort for deterministic ordering
    items.sort_by(|a, b| a.source_id.cmp(&b.source_id));

    Ok(items)
}

fn file_to_source_item(path: &Path, relative_path: &str) -> Result<SourceItem> {
    let metadata = std::fs::metadata(path)?;
    let modified_secs = metadata
        .modified()
        .unwrap_or(std::time::SystemTime::UNIX_EPOCH)
        .duration_since(std::time::SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64;

    let body = std::fs::read_to_string(path).unwrap_or_default();

    let title = path.file_name().map(|n| n.to_string_lossy().to_string());

    Ok(SourceItem {
        source: "filesystem".to_string(),
        source_id: relative_path.to_string(),
        title,
        updated_at: modified_secs,
        body,
    })
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConnectorsConfig, DbConfig, FilesystemConnectorConfig};
    use std::fs;
    use tempfile::TempDir;

    fn config_for(root: &Path) -> Config {
        Config {
            db: DbConfig {
                path: root.join("db.sqlite"),
            },
            chunking: Default::default(),
            retrieval: Default::default(),
            embedding: Default::default(),
            llm: Default::default(),
            clustering: Default::default(),
            connectors: ConnectorsConfig {
                filesystem: Some(FilesystemConnectorConfig {
                    root: root.join("docs"),
                    include_globs: vec!["**/*.md".to_string()],
                    exclude_globs: vec!["**/internal/**".to_string()],
                    follow_symlinks: false,
                }),
            },
        }
    }

    #[test]
    fn test_scan_respects_globs() {
        let tmp = TempDir::new().unwrap();
        let docs = tmp.path().join("docs");
        fs::create_dir_all(docs.join("internal")).unwrap();
        fs::write(docs.join("faq.md"), "# FAQ\n\nHow to reset a password.").unwrap();
        fs::write(docs.join("notes.txt"), "not included").unwrap();
        fs::write(docs.join("internal/secret.md"), "excluded").unwrap();

        let items = scan_documents(&config_for(tmp.path())).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].source_id, "faq.md");
        assert_eq!(items[0].title.as_deref(), Some("faq.md"));
        assert!(items[0].body.contains("reset a password"));
    }

    #[test]
    fn test_scan_missing_root_fails() {
        let tmp = TempDir::new().unwrap();
        let err = scan_documents(&config_for(tmp.path())).unwrap_err();
        assert!(err.to_string().contains("does not exist"));
    }
}
