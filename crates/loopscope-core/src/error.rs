//! Error types for profiling control.

use thiserror::Error;

/// Result type for profiling operations.
pub type Result<T> = std::result::Result<T, ProfilerError>;

/// Errors surfaced by event sinks, the window controller and configuration.
///
/// Backend failures are passed through unchanged; the instrumentation layer
/// never retries or suppresses them.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProfilerError {
    /// Profiler backend is not loaded or not initialized.
    #[error("Profiler backend not available")]
    NotAvailable,

    /// Capture already in progress.
    #[error("Capture already in progress")]
    CaptureInProgress,

    /// No capture in progress.
    #[error("No capture in progress")]
    NoCaptureInProgress,

    /// Backend-specific error.
    #[error("Profiler backend error: {0}")]
    Backend(String),

    /// Window bounds that can never open a capture.
    #[error("Invalid profiling window: start {start} must be below end {end}")]
    InvalidWindow {
        /// First profiled iteration.
        start: u64,
        /// Iteration at which the window closes.
        end: u64,
    },

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl ProfilerError {
    /// Create a backend error.
    pub fn backend(msg: impl Into<String>) -> Self {
        Self::Backend(msg.into())
    }

    /// Create a config error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}

impl From<config::ConfigError> for ProfilerError {
    fn from(err: config::ConfigError) -> Self {
        Self::Config(err.to_string())
    }
}
