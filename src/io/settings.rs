//! Per-user settings stored under `~/.wright/settings.toml`.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Persistent user settings. Missing fields default so older files keep
/// loading after upgrades.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct UserSettings {
    /// Default output directory for new projects; empty means the
    /// current working directory.
    pub output_dir: String,
    /// Run model-emitted commands without asking.
    pub autonomous_access: bool,
    /// Allow the research provider to reach the network.
    pub internet_access: bool,
}

impl Default for UserSettings {
    fn default() -> Self {
        Self {
            output_dir: String::new(),
            autonomous_access: false,
            internet_access: false,
        }
    }
}

/// `~/.wright/settings.toml`, honoring `$HOME`.
pub fn settings_path() -> PathBuf {
    let home = std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."));
    home.join(".wright").join("settings.toml")
}

/// Load settings, defaulting when the file is missing.
pub fn load_settings(path: &Path) -> Result<UserSettings> {
    if !path.exists() {
        return Ok(UserSettings::default());
    }
    let contents =
        std::fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))
}

/// Atomically write settings (temp file + rename).
pub fn save_settings(path: &Path, settings: &UserSettings) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("settings path missing parent {}", path.display()))?;
    std::fs::create_dir_all(parent)
        .with_context(|| format!("create directory {}", parent.display()))?;
    let mut buf = toml::to_string_pretty(settings).context("serialize settings")?;
    buf.push('\n');
    let tmp = path.with_extension("toml.tmp");
    std::fs::write(&tmp, &buf).with_context(|| format!("write temp {}", tmp.display()))?;
    std::fs::rename(&tmp, path).with_context(|| format!("replace {}", path.display()))?;
    Ok(())
}
