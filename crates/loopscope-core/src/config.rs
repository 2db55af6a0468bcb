//! Configuration for profiling windows and model hooks.
//!
//! Loaded with the `config` crate from TOML files and `LOOPSCOPE__*`
//! environment variables, or built programmatically with [`ConfigBuilder`].
//!
//! ```toml
//! [window]
//! start = 10
//! end = 20
//! sync_before_capture = true
//! layerwise_events = false
//!
//! [hooks]
//! enabled = true
//! granularity = "leaves_only"
//!
//! [logging]
//! level = "info"
//! ```
//!
//! `LOOPSCOPE__WINDOW__START=50` overrides `window.start`.

use std::path::Path;

use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};

use crate::error::{ProfilerError, Result};
use crate::hooks::Granularity;
use crate::window::{Window, WindowOptions};

const ENV_PREFIX: &str = "LOOPSCOPE";

/// Top-level profiling configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProfilingConfig {
    /// Profiling window.
    #[serde(default)]
    pub window: WindowConfig,

    /// Model hook registration.
    #[serde(default)]
    pub hooks: HooksConfig,

    /// Logging.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Window bounds and capture options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowConfig {
    /// First profiled iteration.
    #[serde(default = "default_window_start")]
    pub start: u64,

    /// Iteration at which the capture closes.
    #[serde(default = "default_window_end")]
    pub end: u64,

    /// Fixed name for the top-level event.
    #[serde(default)]
    pub label: Option<String>,

    /// Drain device work before starting the capture.
    #[serde(default = "default_sync_before_capture")]
    pub sync_before_capture: bool,

    /// Ask the backend for per-operation events inside the window.
    #[serde(default)]
    pub layerwise_events: bool,
}

fn default_window_start() -> u64 {
    10
}

fn default_window_end() -> u64 {
    20
}

fn default_sync_before_capture() -> bool {
    true
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            start: default_window_start(),
            end: default_window_end(),
            label: None,
            sync_before_capture: default_sync_before_capture(),
            layerwise_events: false,
        }
    }
}

/// Hook registration options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HooksConfig {
    /// Register per-node hooks at all.
    #[serde(default = "default_hooks_enabled")]
    pub enabled: bool,

    /// Which nodes get hooks.
    #[serde(default)]
    pub granularity: Granularity,
}

fn default_hooks_enabled() -> bool {
    true
}

impl Default for HooksConfig {
    fn default() -> Self {
        Self {
            enabled: default_hooks_enabled(),
            granularity: Granularity::default(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl ProfilingConfig {
    /// Load configuration from a file, with environment overrides.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let builder = Config::builder()
            .add_source(File::from(path.as_ref()))
            .add_source(Environment::with_prefix(ENV_PREFIX).separator("__"));
        let config: Self = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration with fallback to defaults.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Self {
        match Self::load(path.as_ref()) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!(
                    path = %path.as_ref().display(),
                    error = %e,
                    "Using default profiling config"
                );
                Self::default()
            }
        }
    }

    /// Create from environment variables only.
    pub fn from_env() -> Result<Self> {
        let builder =
            Config::builder().add_source(Environment::with_prefix(ENV_PREFIX).separator("__"));
        let config: Self = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.window.start >= self.window.end {
            return Err(ProfilerError::InvalidWindow {
                start: self.window.start,
                end: self.window.end,
            });
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.to_ascii_lowercase().as_str()) {
            return Err(ProfilerError::config(format!(
                "Invalid log level '{}'. Valid options: {:?}",
                self.logging.level, valid_levels
            )));
        }
        Ok(())
    }

    /// Window bounds as a runtime value.
    pub fn to_window(&self) -> Result<Window> {
        let window = Window::new(self.window.start, self.window.end)?;
        Ok(match &self.window.label {
            Some(label) => window.with_label(label.clone()),
            None => window,
        })
    }

    /// Controller options.
    pub fn window_options(&self) -> WindowOptions {
        WindowOptions::default()
            .with_sync_before_capture(self.window.sync_before_capture)
            .with_layerwise_events(self.window.layerwise_events)
    }
}

/// Load configuration from a TOML file.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<ProfilingConfig> {
    ProfilingConfig::load(path)
}

/// Load configuration from a TOML string.
pub fn load_config_from_str(content: &str) -> Result<ProfilingConfig> {
    let builder = Config::builder()
        .add_source(File::from_str(content, FileFormat::Toml))
        .add_source(Environment::with_prefix(ENV_PREFIX).separator("__"));
    let config: ProfilingConfig = builder.build()?.try_deserialize()?;
    config.validate()?;
    Ok(config)
}

/// Configuration builder for programmatic configuration.
#[derive(Debug, Default)]
pub struct ConfigBuilder {
    config: ProfilingConfig,
}

impl ConfigBuilder {
    /// Create a new builder with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the window bounds.
    pub fn window(mut self, start: u64, end: u64) -> Self {
        self.config.window.start = start;
        self.config.window.end = end;
        self
    }

    /// Set a fixed top-level event label.
    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.config.window.label = Some(label.into());
        self
    }

    /// Enable or disable the pre-capture synchronization barrier.
    pub fn sync_before_capture(mut self, enabled: bool) -> Self {
        self.config.window.sync_before_capture = enabled;
        self
    }

    /// Enable or disable per-operation recording.
    pub fn layerwise_events(mut self, enabled: bool) -> Self {
        self.config.window.layerwise_events = enabled;
        self
    }

    /// Enable or disable hook registration.
    pub fn hooks(mut self, enabled: bool) -> Self {
        self.config.hooks.enabled = enabled;
        self
    }

    /// Set hook granularity.
    pub fn granularity(mut self, granularity: Granularity) -> Self {
        self.config.hooks.granularity = granularity;
        self
    }

    /// Set log level.
    pub fn log_level(mut self, level: impl Into<String>) -> Self {
        self.config.logging.level = level.into();
        self
    }

    /// Build and validate the configuration.
    pub fn build(self) -> Result<ProfilingConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ProfilingConfig::default();
        assert_eq!(config.window.start, 10);
        assert_eq!(config.window.end, 20);
        assert!(config.window.sync_before_capture);
        assert!(!config.window.layerwise_events);
        assert!(config.hooks.enabled);
        assert_eq!(config.hooks.granularity, Granularity::LeavesOnly);
        assert_eq!(config.logging.level, "info");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_from_str() {
        let toml = r#"
            [window]
            start = 100
            end = 110
            label = "train_step"
            layerwise_events = true

            [hooks]
            granularity = "all_nodes"
        "#;

        let config = load_config_from_str(toml).unwrap();
        assert_eq!(config.window.start, 100);
        assert_eq!(config.window.end, 110);
        assert!(config.window.layerwise_events);
        assert!(config.window.sync_before_capture);
        assert_eq!(config.hooks.granularity, Granularity::AllNodes);
        assert!(config.hooks.enabled);

        let window = config.to_window().unwrap();
        assert_eq!(window.label.as_deref(), Some("train_step"));
        assert_eq!(window.len(), 10);

        let options = config.window_options();
        assert!(options.layerwise_events);
        assert!(options.sync_before_capture);
    }

    #[test]
    fn test_load_rejects_degenerate_window() {
        let toml = r#"
            [window]
            start = 5
            end = 5
        "#;
        assert_eq!(
            load_config_from_str(toml),
            Err(ProfilerError::InvalidWindow { start: 5, end: 5 })
        );
    }

    #[test]
    fn test_load_rejects_bad_granularity() {
        let toml = r#"
            [hooks]
            granularity = "every_other"
        "#;
        assert!(matches!(
            load_config_from_str(toml),
            Err(ProfilerError::Config(_))
        ));
    }

    #[test]
    fn test_builder() {
        let config = ConfigBuilder::new()
            .window(3, 8)
            .label("iter")
            .sync_before_capture(false)
            .granularity(Granularity::AllNodes)
            .log_level("debug")
            .build()
            .unwrap();

        assert_eq!(config.window.start, 3);
        assert_eq!(config.window.end, 8);
        assert!(!config.window_options().sync_before_capture);
        assert_eq!(config.hooks.granularity, Granularity::AllNodes);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_builder_validation() {
        assert!(ConfigBuilder::new().window(9, 2).build().is_err());
        assert!(ConfigBuilder::new().log_level("loud").build().is_err());
    }

    #[test]
    fn test_load_or_default_missing_file() {
        let config = ProfilingConfig::load_or_default("/nonexistent/loopscope.toml");
        assert_eq!(config, ProfilingConfig::default());
    }
}
