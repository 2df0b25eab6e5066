#![forbid(unsafe_code)]

use crate::error::NightshiftError;

/// Returns the names in `names` that cannot be resolved on PATH.
#[must_use]
pub fn missing_binaries(names: &[&str]) -> Vec<String> {
    names
        .iter()
        .filter(|name| which::which(name).is_err())
        .map(|name| (*name).to_owned())
        .collect()
}

pub fn require_binaries(names: &[&str]) -> Result<(), NightshiftError> {
    let missing = missing_binaries(names);
    if missing.is_empty() {
        Ok(())
    } else if missing.len() == 1 && missing[0] == "git" {
        Err(NightshiftError::GitNotFound)
    } else {
        Err(NightshiftError::MissingBinaries(missing))
    }
}
