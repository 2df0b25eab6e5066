#![forbid(unsafe_code)]

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context as _;
use directories::BaseDirs;
use serde::{Deserialize, Serialize};

use crate::error::NightshiftError;

pub const SETTINGS_FILE: &str = "config.toml";

/// Filesystem locations for one invocation. Resolved once, never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Config {
    pub home: PathBuf,
    pub project_root: PathBuf,
    pub worktree_root: PathBuf,
    pub state_dir: PathBuf,
    pub tasks_file: PathBuf,
    pub state_file: PathBuf,
    pub history_file: PathBuf,
    pub log_dir: PathBuf,
    pub last_report_file: PathBuf,
    pub last_report_json_file: PathBuf,
}

impl Config {
    /// Resolves every path from `lookup` (an environment accessor). Performs no I/O.
    pub fn resolve<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.is_empty()).map(PathBuf::from);

        let home = var("HOME").unwrap_or_else(|| PathBuf::from("/tmp"));
        let project_root = var("PI_PROJECT_ROOT").unwrap_or_else(|| home.join("projects"));
        let worktree_root =
            var("PI_WORKTREE_ROOT").unwrap_or_else(|| project_root.join("worktrees"));
        let state_dir = var("NIGHTSHIFT_STATE_DIR").unwrap_or_else(|| {
            home.join(".local").join("state").join("nightshift")
        });

        Self {
            tasks_file: state_dir.join("tasks.md"),
            state_file: state_dir.join("state.json"),
            history_file: state_dir.join("history.jsonl"),
            log_dir: state_dir.join("logs"),
            last_report_file: state_dir.join("last-run-report.md"),
            last_report_json_file: state_dir.join("last-run-report.json"),
            home,
            project_root,
            worktree_root,
            state_dir,
        }
    }

    #[must_use]
    pub fn from_env() -> Self {
        Self::resolve(|key| {
            let value = std::env::var(key).ok().filter(|v| !v.is_empty());
            if key == "HOME" && value.is_none() {
                return BaseDirs::new().map(|d| d.home_dir().to_string_lossy().into_owned());
            }
            value
        })
    }

    #[must_use]
    pub fn settings_file(&self) -> PathBuf {
        self.state_dir.join(SETTINGS_FILE)
    }

    #[must_use]
    pub fn lock_file(&self) -> PathBuf {
        self.state_dir.join("run.lock")
    }

    /// Expands a leading `~` against the resolved home directory.
    #[must_use]
    pub fn expand_tilde(&self, input: &str) -> PathBuf {
        if input == "~" {
            return self.home.clone();
        }
        if let Some(rest) = input.strip_prefix("~/") {
            return self.home.join(rest);
        }
        PathBuf::from(input)
    }
}

/// Tunables read from `{state_dir}/config.toml`. Every field is optional.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Settings {
    pub engine: EngineSettings,
    pub verify: VerifySettings,
    pub history: HistorySettings,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineSettings {
    pub codex_executable: String,
    pub timeout: String,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            codex_executable: "codex".to_owned(),
            timeout: "2h".to_owned(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct VerifySettings {
    pub shell: String,
    pub timeout: String,
}

impl Default for VerifySettings {
    fn default() -> Self {
        Self {
            shell: "/bin/sh".to_owned(),
            timeout: "30m".to_owned(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct HistorySettings {
    pub max_entries: usize,
}

impl Default for HistorySettings {
    fn default() -> Self {
        Self { max_entries: 1000 }
    }
}

impl Settings {
    /// Loads settings from `path`; a missing file yields the defaults.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let settings: Self = toml::from_str(&raw)
            .with_context(|| format!("failed to deserialize TOML in {}", path.display()))?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), NightshiftError> {
        if self.engine.codex_executable.trim().is_empty() {
            return Err(NightshiftError::Config(
                "engine.codex_executable must not be empty".to_owned(),
            ));
        }
        if self.verify.shell.trim().is_empty() {
            return Err(NightshiftError::Config(
                "verify.shell must not be empty".to_owned(),
            ));
        }
        for (key, value) in [
            ("engine.timeout", &self.engine.timeout),
            ("verify.timeout", &self.verify.timeout),
        ] {
            match parse_duration(value) {
                Ok(d) if d.is_zero() => {
                    return Err(NightshiftError::Config(format!("{key} must be > 0")));
                }
                Ok(_) => {}
                Err(e) => return Err(NightshiftError::Config(format!("{key}: {e}"))),
            }
        }
        Ok(())
    }

    pub fn engine_timeout(&self) -> anyhow::Result<Duration> {
        parse_duration(&self.engine.timeout)
    }

    pub fn verify_timeout(&self) -> anyhow::Result<Duration> {
        parse_duration(&self.verify.timeout)
    }
}

pub fn parse_duration(s: &str) -> anyhow::Result<Duration> {
    let s = s.trim();
    if s.is_empty() {
        anyhow::bail!("empty duration");
    }

    let (num, unit) = s
        .chars()
        .position(|c| !c.is_ascii_digit())
        .map_or((s, ""), |i| s.split_at(i));
    let n: u64 = num
        .parse()
        .with_context(|| format!("invalid duration: {s}"))?;

    let secs_per_unit: u64 = match unit {
        "ms" => return Ok(Duration::from_millis(n)),
        "s" | "" => 1,
        "m" => 60,
        "h" => 60 * 60,
        "d" => 24 * 60 * 60,
        "w" => 7 * 24 * 60 * 60,
        _ => anyhow::bail!("unsupported duration unit in '{s}' (use ms|s|m|h|d|w)"),
    };
    let secs = n
        .checked_mul(secs_per_unit)
        .with_context(|| format!("duration too large: {s}"))?;
    Ok(Duration::from_secs(secs))
}

/// Renders the resolved paths and settings for `nightshift config`.
pub fn render_resolved(cfg: &Config, settings: &Settings) -> anyhow::Result<String> {
    #[derive(Serialize)]
    struct Resolved<'a> {
        paths: &'a Config,
        settings: &'a Settings,
    }
    Ok(toml::to_string_pretty(&Resolved {
        paths: cfg,
        settings,
    })?)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn resolve(pairs: &[(&str, &str)]) -> Config {
        let env: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect();
        Config::resolve(|key| env.get(key).cloned())
    }

    #[test]
    fn default_paths_derive_from_home() {
        let cfg = resolve(&[("HOME", "/Users/test")]);
        assert_eq!(cfg.project_root, PathBuf::from("/Users/test/projects"));
        assert_eq!(
            cfg.worktree_root,
            PathBuf::from("/Users/test/projects/worktrees")
        );
        assert_eq!(
            cfg.state_dir,
            PathBuf::from("/Users/test/.local/state/nightshift")
        );
        assert_eq!(
            cfg.tasks_file,
            PathBuf::from("/Users/test/.local/state/nightshift/tasks.md")
        );
        assert_eq!(
            cfg.history_file,
            PathBuf::from("/Users/test/.local/state/nightshift/history.jsonl")
        );
        assert_eq!(
            cfg.log_dir,
            PathBuf::from("/Users/test/.local/state/nightshift/logs")
        );
        assert_eq!(
            cfg.last_report_json_file,
            PathBuf::from("/Users/test/.local/state/nightshift/last-run-report.json")
        );
    }

    #[test]
    fn project_root_override_moves_worktree_root() {
        let cfg = resolve(&[("HOME", "/Users/test"), ("PI_PROJECT_ROOT", "/custom")]);
        assert_eq!(cfg.project_root, PathBuf::from("/custom"));
        assert_eq!(cfg.worktree_root, PathBuf::from("/custom/worktrees"));
    }

    #[test]
    fn all_overrides_apply_independently() {
        let cfg = resolve(&[
            ("HOME", "/Users/test"),
            ("PI_PROJECT_ROOT", "/a"),
            ("PI_WORKTREE_ROOT", "/b"),
            ("NIGHTSHIFT_STATE_DIR", "/c"),
        ]);
        assert_eq!(cfg.project_root, PathBuf::from("/a"));
        assert_eq!(cfg.worktree_root, PathBuf::from("/b"));
        assert_eq!(cfg.state_dir, PathBuf::from("/c"));
        assert_eq!(cfg.tasks_file, PathBuf::from("/c/tasks.md"));
        assert_eq!(cfg.last_report_file, PathBuf::from("/c/last-run-report.md"));
    }

    #[test]
    fn missing_home_falls_back_to_tmp() {
        let cfg = resolve(&[]);
        assert_eq!(cfg.project_root, PathBuf::from("/tmp/projects"));
    }

    #[test]
    fn tilde_expands_against_home() {
        let cfg = resolve(&[("HOME", "/h")]);
        assert_eq!(cfg.expand_tilde("~/src/app"), PathBuf::from("/h/src/app"));
        assert_eq!(cfg.expand_tilde("/abs"), PathBuf::from("/abs"));
    }

    #[test]
    fn default_settings_are_valid() {
        Settings::default().validate().unwrap();
    }

    #[test]
    fn settings_load_partial_toml() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join(SETTINGS_FILE);
        std::fs::write(&path, "[engine]\ntimeout = \"45m\"\n\n[history]\nmax_entries = 5\n")
            .unwrap();

        let settings = Settings::load(&path).unwrap();
        assert_eq!(settings.engine.codex_executable, "codex");
        assert_eq!(
            settings.engine_timeout().unwrap(),
            Duration::from_secs(45 * 60)
        );
        assert_eq!(settings.history.max_entries, 5);
        assert_eq!(settings.verify.shell, "/bin/sh");
    }

    #[test]
    fn settings_reject_bad_timeout() {
        let mut settings = Settings::default();
        settings.verify.timeout = "soon".to_owned();
        assert!(settings.validate().is_err());
        settings.verify.timeout = "0s".to_owned();
        assert!(settings.validate().is_err());
    }

    #[test]
    fn parses_duration_units() {
        assert_eq!(parse_duration("90").unwrap(), Duration::from_secs(90));
        assert_eq!(parse_duration("250ms").unwrap(), Duration::from_millis(250));
        assert_eq!(parse_duration("2h").unwrap(), Duration::from_secs(7200));
        assert!(parse_duration("3y").is_err());
        assert!(parse_duration("").is_err());
    }

    #[test]
    fn oversized_duration_is_an_error() {
        let err = parse_duration("99999999999999999w").unwrap_err();
        assert!(err.to_string().contains("duration too large"));
        assert!(parse_duration("18446744073709551615s").is_ok());
        assert!(parse_duration("18446744073709551615m").is_err());
    }
}
