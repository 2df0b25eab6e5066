#![forbid(unsafe_code)]

use std::path::Path;

use anyhow::Context as _;

use crate::core::fs::write_atomic;
use crate::task::model::{State, StateKey, TaskState};

/// Reads the state file. A missing file is an empty state; malformed JSON is an error.
pub fn read_state(path: &Path) -> anyhow::Result<State> {
    if !path.exists() {
        return Ok(State::default());
    }
    let data =
        std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    let state: State = serde_json::from_slice(&data)
        .with_context(|| format!("failed to parse {}", path.display()))?;
    Ok(state)
}

/// Writes the state as 2-space indented JSON with a trailing newline, atomically.
pub fn write_state(path: &Path, state: &State) -> anyhow::Result<()> {
    let mut data = serde_json::to_vec_pretty(state)?;
    data.push(b'\n');
    write_atomic(path, &data)
}

/// Read-modify-write of one task entry.
///
/// A corrupt state file is replaced rather than blocking the write.
pub fn modify_task<F>(path: &Path, task_id: &str, f: F) -> anyhow::Result<()>
where
    F: FnOnce(&mut TaskState),
{
    let mut state = match read_state(path) {
        Ok(s) => s,
        Err(e) => {
            tracing::warn!("state file unreadable, starting from empty state: {e:#}");
            State::default()
        }
    };
    f(state.tasks.entry(task_id.to_owned()).or_default());
    write_state(path, &state)
}

pub fn update_task_state(
    path: &Path,
    task_id: &str,
    key: StateKey,
    value: &str,
) -> anyhow::Result<()> {
    modify_task(path, task_id, |t| t.set(key, value))
}

pub fn update_task_fields(
    path: &Path,
    task_id: &str,
    fields: &[(StateKey, &str)],
) -> anyhow::Result<()> {
    modify_task(path, task_id, |t| {
        for (key, value) in fields {
            t.set(*key, *value);
        }
    })
}

/// Removes the given task entries, returning how many existed.
pub fn remove_tasks(path: &Path, task_ids: &[String]) -> anyhow::Result<usize> {
    let mut state = read_state(path)?;
    let removed = task_ids
        .iter()
        .filter(|id| state.tasks.remove(id.as_str()).is_some())
        .count();
    if removed > 0 {
        write_state(path, &state)?;
    }
    Ok(removed)
}

pub fn clear_tasks(path: &Path) -> anyhow::Result<usize> {
    let mut state = read_state(path)?;
    let removed = state.tasks.len();
    state.tasks.clear();
    write_state(path, &state)?;
    Ok(removed)
}
