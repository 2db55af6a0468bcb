//! Event sinks: the adapter between instrumentation and a profiling backend.
//!
//! A sink exposes the four primitives every timeline profiler offers (push a
//! named range, pop the innermost range, start and stop a capture) plus two
//! optional capabilities: a device synchronization barrier and a toggle for
//! fine-grained per-operation recording.
//!
//! Sinks do not enforce nesting. Balanced push/pop is the obligation of the
//! callers: [`ScopedEvent`](crate::scope::ScopedEvent), model hooks and the
//! [`ProfilingWindowController`](crate::window::ProfilingWindowController).

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use parking_lot::Mutex;

use crate::error::{ProfilerError, Result};

/// Trait for profiling backend integration.
///
/// Implement this trait to route trace events to a specific tool. All methods
/// take `&self`; implementations use interior mutability where they keep state.
pub trait EventSink: Send + Sync {
    /// Short backend name, used in log output.
    fn name(&self) -> &str;

    /// Push a named range onto the backend's range stack.
    fn push_event(&self, name: &str) -> Result<()>;

    /// Pop the innermost range from the backend's range stack.
    fn pop_event(&self) -> Result<()>;

    /// Begin the backend capture session.
    fn start_capture(&self) -> Result<()>;

    /// End the backend capture session.
    fn stop_capture(&self) -> Result<()>;

    /// Block until all previously issued device work has drained.
    fn synchronize(&self) -> Result<()> {
        Ok(())
    }

    /// Ask the backend to additionally record per-operation events.
    fn set_operator_recording(&self, _enabled: bool) -> Result<()> {
        Ok(())
    }
}

/// Null sink implementation (no-op).
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl EventSink for NullSink {
    fn name(&self) -> &str {
        "null"
    }

    fn push_event(&self, _name: &str) -> Result<()> {
        Ok(())
    }

    fn pop_event(&self) -> Result<()> {
        Ok(())
    }

    fn start_capture(&self) -> Result<()> {
        Ok(())
    }

    fn stop_capture(&self) -> Result<()> {
        Ok(())
    }
}

/// A single call observed by a [`MemorySink`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkCall {
    /// `push_event(name)`.
    Push(String),
    /// `pop_event()`.
    Pop,
    /// `start_capture()`.
    StartCapture,
    /// `stop_capture()`.
    StopCapture,
    /// `synchronize()`.
    Synchronize,
    /// `set_operator_recording(enabled)`.
    OperatorRecording(bool),
}

/// In-memory sink that records every call in order.
///
/// Used as the call-counting stub in tests and for dry runs of an
/// instrumented loop without a GPU. It tracks the current stack depth but does
/// not refuse an unbalanced pop; such pops are counted in
/// [`MemorySink::unbalanced_pops`].
#[derive(Debug, Default)]
pub struct MemorySink {
    calls: Mutex<Vec<SinkCall>>,
    depth: AtomicUsize,
    max_depth: AtomicUsize,
    unbalanced_pops: AtomicUsize,
    capturing: AtomicBool,
}

impl MemorySink {
    /// Create a new memory sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get all recorded calls.
    pub fn calls(&self) -> Vec<SinkCall> {
        self.calls.lock().clone()
    }

    /// Names of all pushed events, in push order.
    pub fn pushed_names(&self) -> Vec<String> {
        self.calls
            .lock()
            .iter()
            .filter_map(|call| match call {
                SinkCall::Push(name) => Some(name.clone()),
                _ => None,
            })
            .collect()
    }

    /// Number of recorded calls equal to `call`.
    pub fn count(&self, call: &SinkCall) -> usize {
        self.calls.lock().iter().filter(|c| *c == call).count()
    }

    /// Number of `push_event` calls.
    pub fn push_count(&self) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|c| matches!(c, SinkCall::Push(_)))
            .count()
    }

    /// Number of `pop_event` calls.
    pub fn pop_count(&self) -> usize {
        self.count(&SinkCall::Pop)
    }

    /// Current range stack depth.
    pub fn depth(&self) -> usize {
        self.depth.load(Ordering::Relaxed)
    }

    /// Deepest nesting observed.
    pub fn max_depth(&self) -> usize {
        self.max_depth.load(Ordering::Relaxed)
    }

    /// Pops issued while the stack was empty.
    pub fn unbalanced_pops(&self) -> usize {
        self.unbalanced_pops.load(Ordering::Relaxed)
    }

    /// Whether a capture is currently running.
    pub fn is_capturing(&self) -> bool {
        self.capturing.load(Ordering::Relaxed)
    }

    /// Get the count of recorded calls.
    pub fn len(&self) -> usize {
        self.calls.lock().len()
    }

    /// Check if empty.
    pub fn is_empty(&self) -> bool {
        self.calls.lock().is_empty()
    }

    /// Clear all recorded calls and counters.
    pub fn clear(&self) {
        self.calls.lock().clear();
        self.depth.store(0, Ordering::Relaxed);
        self.max_depth.store(0, Ordering::Relaxed);
        self.unbalanced_pops.store(0, Ordering::Relaxed);
        self.capturing.store(false, Ordering::Relaxed);
    }

    fn record(&self, call: SinkCall) {
        self.calls.lock().push(call);
    }
}

impl EventSink for MemorySink {
    fn name(&self) -> &str {
        "memory"
    }

    fn push_event(&self, name: &str) -> Result<()> {
        self.record(SinkCall::Push(name.to_string()));
        let depth = self.depth.fetch_add(1, Ordering::Relaxed) + 1;
        self.max_depth.fetch_max(depth, Ordering::Relaxed);
        Ok(())
    }

    fn pop_event(&self) -> Result<()> {
        self.record(SinkCall::Pop);
        let popped = self
            .depth
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |d| d.checked_sub(1));
        if popped.is_err() {
            self.unbalanced_pops.fetch_add(1, Ordering::Relaxed);
        }
        Ok(())
    }

    fn start_capture(&self) -> Result<()> {
        if self.capturing.swap(true, Ordering::Relaxed) {
            return Err(ProfilerError::CaptureInProgress);
        }
        self.record(SinkCall::StartCapture);
        Ok(())
    }

    fn stop_capture(&self) -> Result<()> {
        if !self.capturing.swap(false, Ordering::Relaxed) {
            return Err(ProfilerError::NoCaptureInProgress);
        }
        self.record(SinkCall::StopCapture);
        Ok(())
    }

    fn synchronize(&self) -> Result<()> {
        self.record(SinkCall::Synchronize);
        Ok(())
    }

    fn set_operator_recording(&self, enabled: bool) -> Result<()> {
        self.record(SinkCall::OperatorRecording(enabled));
        Ok(())
    }
}

/// Sink that forwards every call to `tracing` at trace level.
///
/// Useful to check the shape of an instrumented loop from logs alone.
#[derive(Debug, Default)]
pub struct TracingSink {
    depth: AtomicUsize,
}

impl TracingSink {
    /// Create a new tracing sink.
    pub fn new() -> Self {
        Self::default()
    }
}

impl EventSink for TracingSink {
    fn name(&self) -> &str {
        "tracing"
    }

    fn push_event(&self, name: &str) -> Result<()> {
        let depth = self.depth.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(event = name, depth, "push");
        Ok(())
    }

    fn pop_event(&self) -> Result<()> {
        let depth = self
            .depth
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |d| d.checked_sub(1))
            .map(|d| d - 1)
            .unwrap_or(0);
        tracing::trace!(depth, "pop");
        Ok(())
    }

    fn start_capture(&self) -> Result<()> {
        tracing::trace!("capture start");
        Ok(())
    }

    fn stop_capture(&self) -> Result<()> {
        tracing::trace!("capture stop");
        Ok(())
    }

    fn set_operator_recording(&self, enabled: bool) -> Result<()> {
        tracing::trace!(enabled, "operator recording");
        Ok(())
    }
}
