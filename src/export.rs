use crate::model::RunView;
use anyhow::{Context, Result};
use std::path::Path;

/// Write the full reconciled view as pretty JSON, creating parent directories.
pub fn export_json(path: &Path, view: &RunView) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create directory {}", parent.display()))?;
    }
    let out = serde_json::to_string_pretty(view).context("serialize run view")?;
    std::fs::write(path, out).with_context(|| format!("write {}", path.display()))?;
    Ok(())
}
