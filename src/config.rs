use anyhow::{Context, Result};
use log::LevelFilter;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Embedded default configuration.
const DEFAULT_CONFIG: &str = include_str!("../config.default.toml");

// ── Final (merged) config types ──

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ShellConfig {
    /// Printed before every interactive line.
    pub prompt: String,
    /// Extra key bound to completion. Tab always completes.
    pub completion_key: char,
    #[serde(default)]
    pub hints: bool,
    #[serde(default)]
    pub history: HistoryConfig,
    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct HistoryConfig {
    /// Empty means history is not persisted.
    #[serde(default)]
    pub file: PathBuf,
    pub max_size: usize,
    #[serde(default)]
    pub ignore_dups: bool,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            file: PathBuf::new(),
            max_size: 1000,
            ignore_dups: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct LogConfig {
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
        }
    }
}

// ── Overlay types (user config that merges with defaults) ──

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct ConfigOverlay {
    prompt: Option<String>,
    completion_key: Option<char>,
    hints: Option<bool>,
    #[serde(default)]
    history: HistoryOverlay,
    #[serde(default)]
    log: LogOverlay,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct HistoryOverlay {
    file: Option<PathBuf>,
    max_size: Option<usize>,
    ignore_dups: Option<bool>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct LogOverlay {
    level: Option<String>,
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self::default_config()
    }
}

impl ShellConfig {
    /// Load the default embedded configuration.
    pub fn default_config() -> Self {
        toml::from_str(DEFAULT_CONFIG).expect("embedded default config must parse")
    }

    /// Embedded defaults, with the file at `path` merged on top when given.
    ///
    /// Scalars set in the file override the defaults; anything it leaves out
    /// keeps its default value. A file that doesn't exist is skipped.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = Self::default_config();
        if let Some(path) = path {
            if !path.exists() {
                log::info!("config {} not found, using defaults", path.display());
                return Ok(config);
            }
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("can't read config {}", path.display()))?;
            config
                .apply_overlay_str(&content)
                .with_context(|| format!("invalid config {}", path.display()))?;
            log::debug!("config loaded from {}", path.display());
        }
        Ok(config)
    }

    fn apply_overlay_str(&mut self, toml_str: &str) -> Result<()> {
        let overlay: ConfigOverlay = toml::from_str(toml_str)?;
        self.apply_overlay(overlay);
        self.log_level()?;
        Ok(())
    }

    /// Apply an overlay on top of this config (merge semantics).
    fn apply_overlay(&mut self, overlay: ConfigOverlay) {
        if let Some(v) = overlay.prompt {
            self.prompt = v;
        }
        if let Some(v) = overlay.completion_key {
            self.completion_key = v;
        }
        if let Some(v) = overlay.hints {
            self.hints = v;
        }

        let h = overlay.history;
        if let Some(v) = h.file {
            self.history.file = v;
        }
        if let Some(v) = h.max_size {
            self.history.max_size = v;
        }
        if let Some(v) = h.ignore_dups {
            self.history.ignore_dups = v;
        }

        if let Some(v) = overlay.log.level {
            self.log.level = v;
        }
    }

    /// History file, if history should be persisted.
    pub fn history_file(&self) -> Option<&Path> {
        let file = self.history.file.as_path();
        (!file.as_os_str().is_empty()).then_some(file)
    }

    pub fn log_level(&self) -> Result<LevelFilter> {
        self.log
            .level
            .parse()
            .map_err(|_| anyhow::anyhow!("unknown log level {:?}", self.log.level))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_parses() {
        let config = ShellConfig::default_config();
        assert_eq!(config.prompt, "> ");
        assert_eq!(config.completion_key, '\t');
        assert!(config.hints);
        assert_eq!(config.history.max_size, 1000);
        assert!(config.history.ignore_dups);
        assert_eq!(config.history_file(), None);
        assert_eq!(config.log_level().unwrap(), LevelFilter::Warn);
    }

    #[test]
    fn test_overlay_overrides_only_given_keys() {
        let mut config = ShellConfig::default_config();
        config
            .apply_overlay_str(
                r#"
                prompt = "$ "
                [history]
                file = "/tmp/cli_shell_history"
                "#,
            )
            .unwrap();

        assert_eq!(config.prompt, "$ ");
        assert_eq!(config.completion_key, '\t');
        assert_eq!(
            config.history_file(),
            Some(Path::new("/tmp/cli_shell_history"))
        );
        assert_eq!(config.history.max_size, 1000);
    }

    #[test]
    fn test_empty_overlay_keeps_defaults() {
        let mut config = ShellConfig::default_config();
        config.apply_overlay_str("").unwrap();
        assert_eq!(config, ShellConfig::default());
    }

    #[test]
    fn test_unknown_key_rejected() {
        let mut config = ShellConfig::default_config();
        assert!(config.apply_overlay_str("promtp = \"x\"").is_err());
    }

    #[test]
    fn test_bad_log_level_rejected() {
        let mut config = ShellConfig::default_config();
        assert!(config.apply_overlay_str("[log]\nlevel = \"loud\"").is_err());
    }

    #[test]
    fn test_load_without_path_is_default() {
        assert_eq!(ShellConfig::load(None).unwrap(), ShellConfig::default());
    }

    #[test]
    fn test_load_missing_file_is_default() {
        let config = ShellConfig::load(Some(Path::new("/nonexistent/cli_shell.toml"))).unwrap();
        assert_eq!(config, ShellConfig::default());
    }

    #[test]
    fn test_load_merges_file() {
        let path =
            std::env::temp_dir().join(format!("cli_shell_config_{}.toml", std::process::id()));
        std::fs::write(&path, "hints = false\n[log]\nlevel = \"debug\"\n").unwrap();

        let config = ShellConfig::load(Some(path.as_path())).unwrap();
        assert!(!config.hints);
        assert_eq!(config.log_level().unwrap(), LevelFilter::Debug);
        assert_eq!(config.prompt, "> ");

        std::fs::write(&path, "hints = [").unwrap();
        assert!(ShellConfig::load(Some(path.as_path())).is_err());
        let _ = std::fs::remove_file(&path);
    }
}
