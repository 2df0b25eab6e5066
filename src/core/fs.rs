#![forbid(unsafe_code)]

use std::io::Write as _;
use std::path::Path;

use anyhow::Context as _;
use uuid::Uuid;

/// Writes `data` to a uniquely named sibling temp file, then renames it over `path`.
///
/// Readers observe either the previous content or the new content, never a mix.
pub fn write_atomic(path: &Path, data: &[u8]) -> anyhow::Result<()> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir).with_context(|| format!("failed to create {}", dir.display()))?;

    let stem = path
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("nightshift");
    let tmp = dir.join(format!(".{stem}-{}.tmp", Uuid::new_v4().simple()));

    let result = (|| -> anyhow::Result<()> {
        let mut file = std::fs::File::create(&tmp)
            .with_context(|| format!("failed to create {}", tmp.display()))?;
        file.write_all(data)
            .with_context(|| format!("failed to write {}", tmp.display()))?;
        file.sync_all()
            .with_context(|| format!("failed to sync {}", tmp.display()))?;
        std::fs::rename(&tmp, path)
            .with_context(|| format!("failed to rename {} -> {}", tmp.display(), path.display()))
    })();

    if result.is_err() {
        let _ = std::fs::remove_file(&tmp);
    }
    result
}
