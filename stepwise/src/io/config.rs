//! Stepwise configuration stored under `.stepwise/config.toml`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

/// Configuration (TOML).
///
/// Meant to be edited by humans. Missing fields take the defaults below.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct StepwiseConfig {
    pub generator: GeneratorConfig,
    pub planner: PlannerConfig,
    pub executor: ExecutorConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct GeneratorConfig {
    /// Argv of the text generator. The prompt is written to stdin and the
    /// response read from stdout.
    pub command: Vec<String>,

    pub timeout_secs: u64,

    /// Generator stdout beyond this many bytes is discarded.
    pub output_limit_bytes: usize,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            command: vec!["claude".to_string(), "-p".to_string()],
            timeout_secs: 180,
            output_limit_bytes: 1_000_000,
        }
    }
}

impl GeneratorConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PlannerConfig {
    /// Smallest step count requested from the generator.
    pub min_steps: usize,

    /// Plans with more steps are truncated.
    pub max_steps: usize,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            min_steps: 3,
            max_steps: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Additional attempts per step after the first failure.
    pub max_retries: u32,

    pub command_timeout_secs: u64,

    /// Bound for captured command output and read file content.
    pub output_limit_bytes: usize,

    /// Depth of directory listings produced by `read` on a directory.
    pub tree_depth: usize,

    /// Byte budget for generator prompts (planning and write steps) before
    /// droppable context sections are removed.
    pub prompt_budget_bytes: usize,

    /// Shell argv used to run `run` step commands (the command is appended).
    pub shell: Vec<String>,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            command_timeout_secs: 300,
            output_limit_bytes: 100_000,
            tree_depth: 3,
            prompt_budget_bytes: 40_000,
            shell: vec!["sh".to_string(), "-c".to_string()],
        }
    }
}

impl ExecutorConfig {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }
}

impl StepwiseConfig {
    pub fn validate(&self) -> Result<()> {
        if self.generator.command.is_empty() || self.generator.command[0].trim().is_empty() {
            return Err(anyhow!("generator.command must be a non-empty array"));
        }
        if self.generator.timeout_secs == 0 {
            return Err(anyhow!("generator.timeout_secs must be > 0"));
        }
        if self.generator.output_limit_bytes == 0 {
            return Err(anyhow!("generator.output_limit_bytes must be > 0"));
        }
        if self.planner.max_steps == 0 {
            return Err(anyhow!("planner.max_steps must be > 0"));
        }
        if self.planner.min_steps > self.planner.max_steps {
            return Err(anyhow!(
                "planner.min_steps ({}) must not exceed planner.max_steps ({})",
                self.planner.min_steps,
                self.planner.max_steps
            ));
        }
        if self.executor.command_timeout_secs == 0 {
            return Err(anyhow!("executor.command_timeout_secs must be > 0"));
        }
        if self.executor.output_limit_bytes == 0 {
            return Err(anyhow!("executor.output_limit_bytes must be > 0"));
        }
        if self.executor.prompt_budget_bytes == 0 {
            return Err(anyhow!("executor.prompt_budget_bytes must be > 0"));
        }
        if self.executor.shell.is_empty() || self.executor.shell[0].trim().is_empty() {
            return Err(anyhow!("executor.shell must be a non-empty array"));
        }
        Ok(())
    }
}

/// Default config location for a workspace root.
pub fn default_config_path(root: &Path) -> PathBuf {
    root.join(".stepwise").join("config.toml")
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `StepwiseConfig::default()`.
pub fn load_config(path: &Path) -> Result<StepwiseConfig> {
    if !path.exists() {
        let cfg = StepwiseConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: StepwiseConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("invalid config {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &StepwiseConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_missing_returns_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = load_config(&temp.path().join("missing.toml")).expect("load");
        assert_eq!(cfg, StepwiseConfig::default());
        assert_eq!(cfg.executor.max_retries, 2);
        assert_eq!(cfg.generator.command, vec!["claude", "-p"]);
    }

    #[test]
    fn write_then_load_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = default_config_path(temp.path());
        let mut cfg = StepwiseConfig::default();
        cfg.executor.max_retries = 4;
        write_config(&path, &cfg).expect("write");
        assert!(!path.with_extension("toml.tmp").exists());
        let loaded = load_config(&path).expect("load");
        assert_eq!(loaded, cfg);
    }

    #[test]
    fn partial_files_fill_in_defaults() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("config.toml");
        fs::write(&path, "[executor]\nmax_retries = 5\n").expect("write");
        let cfg = load_config(&path).expect("load");
        assert_eq!(cfg.executor.max_retries, 5);
        assert_eq!(cfg.executor.tree_depth, 3);
        assert_eq!(cfg.planner, PlannerConfig::default());
    }

    #[test]
    fn validate_rejects_unusable_values() {
        let mut cfg = StepwiseConfig::default();
        cfg.generator.command = Vec::new();
        assert!(cfg.validate().is_err());

        let mut cfg = StepwiseConfig::default();
        cfg.planner.min_steps = 11;
        let err = cfg.validate().expect_err("min > max");
        assert!(err.to_string().contains("min_steps"));

        let mut cfg = StepwiseConfig::default();
        cfg.executor.command_timeout_secs = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn load_reports_invalid_files() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("config.toml");
        fs::write(&path, "[generator]\ntimeout_secs = 0\n").expect("write");
        let err = load_config(&path).expect_err("invalid");
        assert!(format!("{err:#}").contains("timeout_secs must be > 0"));
    }
}
