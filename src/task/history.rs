#![forbid(unsafe_code)]

use std::io::Write as _;
use std::path::Path;

use anyhow::Context as _;

use crate::core::fs::write_atomic;
use crate::task::model::HistoryEntry;

/// Appends `entry` as one JSON line, creating the file if needed.
pub fn append_history(path: &Path, entry: &HistoryEntry) -> anyhow::Result<()> {
    let mut line = serde_json::to_string(entry)?;
    line.push('\n');
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("failed to open {}", path.display()))?;
    file.write_all(line.as_bytes())
        .with_context(|| format!("failed to append to {}", path.display()))?;
    Ok(())
}

/// Reads all entries, oldest first. Lines that do not decode as an entry are skipped.
pub fn read_history(path: &Path) -> anyhow::Result<Vec<HistoryEntry>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;

    let mut entries = Vec::new();
    for (idx, line) in raw.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<HistoryEntry>(line) {
            Ok(entry) => entries.push(entry),
            Err(e) => tracing::debug!(line = idx + 1, "skipping malformed history line: {e}"),
        }
    }
    Ok(entries)
}

/// Keeps only the newest `max` JSON lines in file order. Returns how many were dropped.
///
/// Kept lines are written back as they were read. Lines that are not valid JSON
/// do not count towards `max` and are dropped by the rewrite.
pub fn prune_history(path: &Path, max: usize) -> anyhow::Result<usize> {
    if !path.exists() {
        return Ok(0);
    }
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;

    let valid: Vec<&str> = raw
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter(|line| serde_json::from_str::<serde_json::Value>(line).is_ok())
        .collect();
    if valid.len() <= max {
        return Ok(0);
    }

    let keep = &valid[valid.len().saturating_sub(max)..];
    let mut content = String::new();
    for line in keep {
        content.push_str(line);
        content.push('\n');
    }
    write_atomic(path, content.as_bytes())?;

    let dropped = valid.len() - keep.len();
    tracing::info!(dropped, kept = keep.len(), "pruned history");
    Ok(dropped)
}
