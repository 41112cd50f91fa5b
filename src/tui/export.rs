use crate::model::CycleResult;
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use time::macros::format_description;

/// Export the cycle as pretty JSON into the current directory.
/// Returns the absolute path of the exported file.
pub fn export_cycle_json(r: &CycleResult) -> Result<PathBuf> {
    let current_dir = std::env::current_dir().context("get current directory")?;
    export_cycle_json_to(&current_dir, r)
}

pub fn export_cycle_json_to(dir: &Path, r: &CycleResult) -> Result<PathBuf> {
    let stamp = r
        .started_at
        .format(format_description!(
            "[year][month][day]-[hour][minute][second]"
        ))
        .context("format cycle timestamp")?;
    let mode = if r.dry_run { "-dry-run" } else { "" };
    let path = dir.join(format!("docker-janitor-cycle-{stamp}{mode}.json"));
    let json = serde_json::to_string_pretty(r).context("serialize cycle result")?;
    std::fs::write(&path, json).with_context(|| format!("write {}", path.display()))?;
    Ok(path)
}
