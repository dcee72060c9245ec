use std::path::Path;

use anyhow::{Context, Result};
use chrono::Utc;
use serde::Serialize;
use uuid::Uuid;

#[derive(Serialize)]
struct NoteFrontMatter<'a> {
    id: &'a str,
    #[serde(rename = "type")]
    kind: &'a str,
    tags: &'a [String],
    created: String,
    relevance: &'a str,
}

/// Write a memory note under the configured directory, keyed by a generated
/// id. Front matter first, freeform content after.
pub fn write_note(dir: &Path, kind: &str, tags: &[String], content: &str) -> Result<String> {
    let id = format!("mem-{}", Uuid::new_v4().simple());

    let front = NoteFrontMatter {
        id: &id,
        kind,
        tags,
        created: Utc::now().to_rfc3339(),
        relevance: "normal",
    };
    let front_yaml = serde_yaml::to_string(&front).context("failed to serialize note front matter")?;

    std::fs::create_dir_all(dir)
        .with_context(|| format!("failed to create memory dir {}", dir.display()))?;
    let path = dir.join(format!("{id}.md"));
    std::fs::write(&path, format!("---\n{front_yaml}---\n\n{content}\n"))
        .with_context(|| format!("failed to write memory note {}", path.display()))?;

    tracing::info!(note_id = %id, path = %path.display(), "wrote memory note");
    Ok(id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_note_written_under_id() {
        let dir = tempfile::tempdir().unwrap();
        let tags = vec!["trade-review".to_string(), "btc".to_string()];
        let id = write_note(dir.path(), "trade-lesson", &tags, "Size down into earnings.").unwrap();

        let body = std::fs::read_to_string(dir.path().join(format!("{id}.md"))).unwrap();
        assert!(body.starts_with("---\n"));
        assert!(body.contains(&format!("id: {id}")));
        assert!(body.contains("type: trade-lesson"));
        assert!(body.contains("- trade-review"));
        assert!(body.contains("- btc"));
        assert!(body.ends_with("Size down into earnings.\n"));
    }

    #[test]
    fn test_note_ids_are_unique() {
        let dir = tempfile::tempdir().unwrap();
        let a = write_note(dir.path(), "trade-lesson", &[], "a").unwrap();
        let b = write_note(dir.path(), "trade-lesson", &[], "b").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_missing_directory_is_created() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("deep").join("memory");
        let id = write_note(&nested, "trade-lesson", &[], "content").unwrap();
        assert!(nested.join(format!("{id}.md")).exists());
    }
}
