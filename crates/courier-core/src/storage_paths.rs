use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SharedPaths {
    pub root: PathBuf,
    pub config_path: PathBuf,
    pub logs_dir: PathBuf,
    pub labels_path: PathBuf,
}

impl SharedPaths {
    pub fn under(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref().to_path_buf();
        Self {
            config_path: root.join("config.json"),
            logs_dir: root.join("logs"),
            labels_path: root.join("labels.json"),
            root,
        }
    }

    pub fn ensure_dirs(&self) -> anyhow::Result<()> {
        std::fs::create_dir_all(&self.root)?;
        std::fs::create_dir_all(&self.logs_dir)?;
        Ok(())
    }
}

/// Resolves the state directory: `COURIER_STATE_DIR` when set, otherwise
/// `<data_dir>/courier`.
pub fn resolve_shared_paths() -> anyhow::Result<SharedPaths> {
    if let Ok(dir) = std::env::var("COURIER_STATE_DIR") {
        let trimmed = dir.trim();
        if !trimmed.is_empty() {
            return Ok(SharedPaths::under(trimmed));
        }
    }
    let base = dirs::data_dir().ok_or_else(|| anyhow::anyhow!("Failed to resolve data dir"))?;
    Ok(SharedPaths::under(base.join("courier")))
}
