//! Engine configuration stored in `<workspace>/.wright.toml`.
//!
//! Edited by humans; missing fields default to working values.

use std::path::Path;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct EngineConfig {
    /// Parallel tasks per wave.
    pub fan_out: usize,

    /// Wall-clock budget for foreground run commands, in seconds.
    pub run_timeout_secs: u64,

    /// Stored bytes per subprocess output stream.
    pub command_output_limit_bytes: usize,

    /// Messages retained per role history; trimmed oldest-first.
    pub history_limit: usize,

    /// Failure records retained per task.
    pub failure_log_limit: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            fan_out: 2,
            run_timeout_secs: 120,
            command_output_limit_bytes: 100_000,
            history_limit: 20,
            failure_log_limit: 5,
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.fan_out == 0 {
            return Err(anyhow!("fan_out must be > 0"));
        }
        if self.run_timeout_secs == 0 {
            return Err(anyhow!("run_timeout_secs must be > 0"));
        }
        if self.command_output_limit_bytes == 0 {
            return Err(anyhow!("command_output_limit_bytes must be > 0"));
        }
        if self.history_limit == 0 {
            return Err(anyhow!("history_limit must be > 0"));
        }
        Ok(())
    }

    pub fn run_timeout(&self) -> Duration {
        Duration::from_secs(self.run_timeout_secs)
    }
}

/// Load config, defaulting when the file is missing.
pub fn load_config(path: &Path) -> Result<EngineConfig> {
    if !path.exists() {
        let config = EngineConfig::default();
        config.validate()?;
        return Ok(config);
    }
    let contents =
        std::fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let config: EngineConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_gives_defaults() {
        let temp = tempfile::tempdir().expect("tempdir");
        let config = load_config(&temp.path().join("missing.toml")).expect("load");
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.fan_out, 2);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join(".wright.toml");
        std::fs::write(&path, "fan_out = 4\n").expect("write");
        let config = load_config(&path).expect("load");
        assert_eq!(config.fan_out, 4);
        assert_eq!(config.run_timeout_secs, 120);
    }

    #[test]
    fn zero_fan_out_is_rejected() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join(".wright.toml");
        std::fs::write(&path, "fan_out = 0\n").expect("write");
        assert!(load_config(&path).is_err());
    }
}
