use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::fs;

pub const DEFAULT_LABEL: &str = "INBOX";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelEntry {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub important: bool,
}

/// Parses the `id: name` listing produced by the `list_gmail_labels` tool.
/// Lines without a colon are skipped.
pub fn parse_label_listing(text: &str) -> Vec<(String, String)> {
    text.lines()
        .filter_map(|line| {
            let (id, name) = line.split_once(':')?;
            Some((id.trim().to_string(), name.trim().to_string()))
        })
        .collect()
}

/// Persisted label catalogue with a per-label importance flag. The flagged
/// ids feed the summarizer's label filter.
#[derive(Debug, Clone)]
pub struct LabelStore {
    path: PathBuf,
    labels: Vec<LabelEntry>,
}

impl LabelStore {
    pub async fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let labels = if path.exists() {
            let raw = fs::read_to_string(&path).await?;
            serde_json::from_str::<Vec<LabelEntry>>(&raw)?
        } else {
            Vec::new()
        };
        Ok(Self { path, labels })
    }

    pub async fn save(&self) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let raw = serde_json::to_string_pretty(&self.labels)?;
        fs::write(&self.path, raw).await?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn labels(&self) -> &[LabelEntry] {
        &self.labels
    }

    pub fn important_ids(&self) -> Vec<String> {
        self.labels
            .iter()
            .filter(|label| label.important)
            .map(|label| label.id.clone())
            .collect()
    }

    /// Replaces the catalogue with `fetched`, carrying importance over for
    /// ids that were already known.
    pub fn sync(&mut self, fetched: Vec<(String, String)>) {
        let previous = std::mem::take(&mut self.labels);
        self.labels = fetched
            .into_iter()
            .map(|(id, name)| {
                let important = previous
                    .iter()
                    .any(|old| old.id == id && old.important);
                LabelEntry {
                    id,
                    name,
                    important,
                }
            })
            .collect();
    }

    /// Flags a label by id or case-insensitive name. Returns false when no
    /// label matches.
    pub fn set_important(&mut self, id_or_name: &str, important: bool) -> bool {
        let Some(id) = self.resolve(id_or_name) else {
            return false;
        };
        for label in self.labels.iter_mut().filter(|label| label.id == id) {
            label.important = important;
        }
        true
    }

    /// Maps a user answer to a label id. An empty answer selects `INBOX`.
    pub fn resolve(&self, answer: &str) -> Option<String> {
        let answer = answer.trim();
        let answer = if answer.is_empty() {
            DEFAULT_LABEL
        } else {
            answer
        };
        self.labels
            .iter()
            .find(|label| label.id == answer || label.name.eq_ignore_ascii_case(answer))
            .map(|label| label.id.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fetched() -> Vec<(String, String)> {
        vec![
            ("INBOX".to_string(), "INBOX".to_string()),
            ("Label_1".to_string(), "Receipts".to_string()),
        ]
    }

    #[test]
    fn parses_listing_lines() {
        let parsed = parse_label_listing("INBOX: INBOX\nLabel_1: Work: Projects\nnoise");
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[1], ("Label_1".to_string(), "Work: Projects".to_string()));
    }

    #[tokio::test]
    async fn sync_preserves_importance_and_round_trips_through_disk() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("labels.json");
        let mut store = LabelStore::load(&path).await.expect("load");
        assert!(store.labels().is_empty());

        store.sync(fetched());
        assert!(store.set_important("receipts", true));
        store.sync(fetched());
        assert_eq!(store.important_ids(), vec!["Label_1".to_string()]);
        store.save().await.expect("save");

        let reloaded = LabelStore::load(&path).await.expect("reload");
        assert_eq!(reloaded.important_ids(), vec!["Label_1".to_string()]);
    }

    #[tokio::test]
    async fn resolve_defaults_to_inbox_and_rejects_unknown() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut store = LabelStore::load(dir.path().join("labels.json"))
            .await
            .expect("load");
        store.sync(fetched());
        assert_eq!(store.resolve("  ").as_deref(), Some("INBOX"));
        assert_eq!(store.resolve("RECEIPTS").as_deref(), Some("Label_1"));
        assert_eq!(store.resolve("missing"), None);
        assert!(!store.set_important("missing", true));
    }
}
