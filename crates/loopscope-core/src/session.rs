//! Profiling session: the gate for all event emission.
//!
//! A [`ProfilingSession`] pairs an [`EventSink`] with an `enabled` flag. It is
//! owned by whatever drives the training loop and handed out as an
//! `Arc<ProfilingSession>` to scoped events and model hooks, so several
//! independent sessions can coexist in one process.
//!
//! The flag has a single writer (the
//! [`ProfilingWindowController`](crate::window::ProfilingWindowController)).
//! Reads and writes use relaxed atomics; no cross-thread ordering is implied.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{ProfilerError, Result};
use crate::scope::ScopedEvent;
use crate::sink::EventSink;

/// The enabled gate plus the sink it guards.
pub struct ProfilingSession {
    sink: Arc<dyn EventSink>,
    enabled: AtomicBool,
}

impl ProfilingSession {
    /// Create a disabled session emitting into `sink`.
    pub fn new(sink: Arc<dyn EventSink>) -> Self {
        Self {
            sink,
            enabled: AtomicBool::new(false),
        }
    }

    /// Create a disabled session already wrapped for sharing.
    pub fn shared(sink: Arc<dyn EventSink>) -> Arc<Self> {
        Arc::new(Self::new(sink))
    }

    /// Check if event emission is enabled.
    #[inline]
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    /// Enable event emission.
    pub fn enable(&self) {
        self.enabled.store(true, Ordering::Relaxed);
    }

    /// Disable event emission.
    pub fn disable(&self) {
        self.enabled.store(false, Ordering::Relaxed);
    }

    /// Get access to the underlying sink.
    pub fn sink(&self) -> &dyn EventSink {
        &*self.sink
    }

    /// Push a named event if the session is enabled.
    ///
    /// The caller owns the pairing: every successful push made while enabled
    /// must be matched by exactly one [`pop_event`](Self::pop_event). An
    /// unmatched call leaves the backend stack skewed for the rest of the
    /// window.
    #[inline]
    pub fn push_event(&self, name: &str) -> Result<()> {
        if self.is_enabled() {
            self.sink.push_event(name)
        } else {
            Ok(())
        }
    }

    /// Pop the innermost event if the session is enabled.
    #[inline]
    pub fn pop_event(&self) -> Result<()> {
        if self.is_enabled() {
            self.sink.pop_event()
        } else {
            Ok(())
        }
    }

    /// Open a bracket that pops when dropped.
    pub fn scope(&self, name: &str) -> Result<ScopedEvent<'_>> {
        ScopedEvent::new(self, name)
    }

    /// Run `body` inside a named bracket.
    ///
    /// The body's error is returned unchanged; the bracket is closed on every
    /// exit path, including unwinding.
    pub fn in_event<T, E, F>(&self, name: &str, body: F) -> std::result::Result<T, E>
    where
        F: FnOnce() -> std::result::Result<T, E>,
        E: From<ProfilerError>,
    {
        let scope = self.scope(name)?;
        // On error the guard pops in Drop; the body's error wins over a pop failure.
        let value = body()?;
        scope.finish()?;
        Ok(value)
    }
}

impl fmt::Debug for ProfilingSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProfilingSession")
            .field("sink", &self.sink.name())
            .field("enabled", &self.is_enabled())
            .finish()
    }
}
