//! Profiling window: restrict capture to a contiguous range of iterations.
//!
//! The controller is called once per loop iteration with the current
//! iteration id and the window bounds. It opens a capture at `start`, keeps
//! exactly one top-level event open for the current iteration (popping the
//! previous one and pushing a new one at every boundary) and closes everything
//! at `end`.
//!
//! ```text
//!   iteration:   0 .. start-1 | start | start+1 .. end-1 | end | end+1 ..
//!   state:       Idle         | Active                    | Idle
//!   session:     disabled     | enabled                   | disabled
//!   sink calls:  -            | sync, start, push         | pop, stop
//!                               pop+push per iteration
//! ```
//!
//! # Example
//!
//! ```ignore
//! use loopscope_core::prelude::*;
//!
//! let session = ProfilingSession::shared(Arc::new(MemorySink::new()));
//! let mut controller = ProfilingWindowController::new(session.clone());
//!
//! for iteration in 0..20 {
//!     controller.switch_profile(iteration, 10, 20, None)?;
//!     let _forward = session.scope("forward")?;
//!     // ...
//! }
//! ```

use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use crate::error::{ProfilerError, Result};
use crate::session::ProfilingSession;

/// Controller state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowState {
    /// No capture running.
    Idle,
    /// Capture running with one open top-level event.
    Active,
}

/// What a call to [`ProfilingWindowController::switch_profile`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowTransition {
    /// Capture started and the first iteration event was pushed.
    Opened,
    /// Previous iteration event popped and the next one pushed.
    Advanced,
    /// Last event popped and capture stopped.
    Closed,
    /// Nothing happened.
    Unchanged,
}

/// A contiguous range of profiled iterations.
///
/// Iterations `start..end` are profiled; the call with `end` closes the
/// capture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Window {
    /// First profiled iteration.
    pub start: u64,
    /// Iteration at which the capture closes.
    pub end: u64,
    /// Name used for every top-level event instead of `iter_{n}`.
    pub label: Option<String>,
}

impl Window {
    /// Create a window, rejecting bounds that could never open.
    pub fn new(start: u64, end: u64) -> Result<Self> {
        if start >= end {
            return Err(ProfilerError::InvalidWindow { start, end });
        }
        Ok(Self {
            start,
            end,
            label: None,
        })
    }

    /// Set a fixed label for the top-level events.
    #[must_use]
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Whether `iteration` runs with profiling enabled.
    pub fn contains(&self, iteration: u64) -> bool {
        iteration >= self.start && iteration < self.end
    }

    /// Number of profiled iterations.
    pub fn len(&self) -> u64 {
        self.end.saturating_sub(self.start)
    }

    /// Check if the window profiles nothing.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Options for the window controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowOptions {
    /// Drain device work before starting the capture.
    pub sync_before_capture: bool,
    /// Ask the backend for per-operation events while the window is open.
    pub layerwise_events: bool,
}

impl Default for WindowOptions {
    fn default() -> Self {
        Self {
            sync_before_capture: true,
            layerwise_events: false,
        }
    }
}

impl WindowOptions {
    /// Enables or disables the pre-capture synchronization barrier.
    #[must_use]
    pub fn with_sync_before_capture(mut self, enabled: bool) -> Self {
        self.sync_before_capture = enabled;
        self
    }

    /// Enables or disables per-operation recording inside the window.
    #[must_use]
    pub fn with_layerwise_events(mut self, enabled: bool) -> Self {
        self.layerwise_events = enabled;
        self
    }
}

/// State machine that opens, advances and closes a profiling window.
///
/// Only this type writes the session's enabled flag.
#[derive(Debug)]
pub struct ProfilingWindowController {
    session: Arc<ProfilingSession>,
    options: WindowOptions,
    state: WindowState,
    windows_opened: u64,
    warned_degenerate: bool,
}

impl ProfilingWindowController {
    /// Create an idle controller with default options.
    pub fn new(session: Arc<ProfilingSession>) -> Self {
        Self::with_options(session, WindowOptions::default())
    }

    /// Create an idle controller.
    pub fn with_options(session: Arc<ProfilingSession>, options: WindowOptions) -> Self {
        Self {
            session,
            options,
            state: WindowState::Idle,
            windows_opened: 0,
            warned_degenerate: false,
        }
    }

    /// Current state.
    pub fn state(&self) -> WindowState {
        self.state
    }

    /// Check if a window is open.
    pub fn is_active(&self) -> bool {
        self.state == WindowState::Active
    }

    /// Controller options.
    pub fn options(&self) -> WindowOptions {
        self.options
    }

    /// The session this controller gates.
    pub fn session(&self) -> &Arc<ProfilingSession> {
        &self.session
    }

    /// Number of windows opened over the controller's lifetime.
    pub fn windows_opened(&self) -> u64 {
        self.windows_opened
    }

    /// Drive the window for `iteration`.
    ///
    /// `label` replaces the default `iter_{iteration}` event name. A window
    /// with `start >= end` never opens. Transitions that do not match the
    /// current state (advancing or closing while idle, reopening while active)
    /// are ignored so the backend stack stays balanced. If pushing the next
    /// iteration event fails, the window is closed and the error returned.
    pub fn switch_profile(
        &mut self,
        iteration: u64,
        start: u64,
        end: u64,
        label: Option<&str>,
    ) -> Result<WindowTransition> {
        if start >= end {
            if !self.warned_degenerate {
                tracing::warn!(start, end, "Degenerate profiling window ignored");
                self.warned_degenerate = true;
            }
            return Ok(WindowTransition::Unchanged);
        }

        if iteration == start {
            self.open(iteration, label)
        } else if iteration == end {
            self.finish(iteration)
        } else if iteration > start && iteration < end {
            self.advance_to(iteration, label)
        } else {
            Ok(WindowTransition::Unchanged)
        }
    }

    /// Drive the window for `iteration` using a [`Window`] value.
    pub fn advance(&mut self, iteration: u64, window: &Window) -> Result<WindowTransition> {
        self.switch_profile(iteration, window.start, window.end, window.label.as_deref())
    }

    /// Close the window now, whatever the iteration counter says.
    ///
    /// Does nothing when idle.
    pub fn close(&mut self) -> Result<WindowTransition> {
        if self.state == WindowState::Idle {
            return Ok(WindowTransition::Unchanged);
        }
        tracing::info!("Closing profiling window early");
        self.shut_down()
    }

    /// Borrow the controller behind a guard that closes the window on drop.
    pub fn guard(&mut self) -> WindowGuard<'_> {
        WindowGuard { controller: self }
    }

    fn open(&mut self, iteration: u64, label: Option<&str>) -> Result<WindowTransition> {
        if self.state == WindowState::Active {
            tracing::warn!(iteration, "Profiling window already open, ignoring start");
            return Ok(WindowTransition::Unchanged);
        }

        let sink = self.session.sink();
        if self.options.sync_before_capture {
            sink.synchronize()?;
        }
        sink.start_capture()?;
        self.session.enable();
        if self.options.layerwise_events {
            if let Err(e) = sink.set_operator_recording(true) {
                self.session.disable();
                sink.stop_capture()?;
                return Err(e);
            }
        }
        let name = event_name(iteration, label);
        if let Err(e) = sink.push_event(&name) {
            self.session.disable();
            if self.options.layerwise_events {
                sink.set_operator_recording(false)?;
            }
            sink.stop_capture()?;
            return Err(e);
        }

        self.state = WindowState::Active;
        self.windows_opened += 1;
        tracing::info!(iteration, backend = sink.name(), event = %name, "Profiling window opened");
        Ok(WindowTransition::Opened)
    }

    fn advance_to(&mut self, iteration: u64, label: Option<&str>) -> Result<WindowTransition> {
        if self.state == WindowState::Idle {
            tracing::warn!(iteration, "Profiling window not open, ignoring advance");
            return Ok(WindowTransition::Unchanged);
        }

        let sink = self.session.sink();
        sink.pop_event()?;
        let name = event_name(iteration, label);
        if let Err(e) = sink.push_event(&name) {
            // No top-level event is open any more; end the window.
            tracing::warn!(
                iteration,
                error = %e,
                "Failed to push iteration event, closing profiling window"
            );
            self.state = WindowState::Idle;
            self.session.disable();
            sink.stop_capture()?;
            if self.options.layerwise_events {
                sink.set_operator_recording(false)?;
            }
            return Err(e);
        }
        tracing::debug!(iteration, event = %name, "Profiling window advanced");
        Ok(WindowTransition::Advanced)
    }

    fn finish(&mut self, iteration: u64) -> Result<WindowTransition> {
        if self.state == WindowState::Idle {
            tracing::warn!(iteration, "Profiling window not open, ignoring end");
            return Ok(WindowTransition::Unchanged);
        }
        tracing::info!(iteration, "Profiling window closed");
        self.shut_down()
    }

    fn shut_down(&mut self) -> Result<WindowTransition> {
        // Idle first so a failing backend call cannot trigger a second close.
        self.state = WindowState::Idle;
        let sink = self.session.sink();
        let popped = sink.pop_event();
        self.session.disable();
        sink.stop_capture()?;
        if self.options.layerwise_events {
            sink.set_operator_recording(false)?;
        }
        popped?;
        Ok(WindowTransition::Closed)
    }
}

fn event_name(iteration: u64, label: Option<&str>) -> String {
    match label {
        Some(label) => label.to_string(),
        None => format!("iter_{}", iteration),
    }
}

/// Guard that closes an open window when dropped.
///
/// Wrap the training loop with it so an early return or a panic still ends
/// the capture and balances the event stack.
pub struct WindowGuard<'a> {
    controller: &'a mut ProfilingWindowController,
}

impl Deref for WindowGuard<'_> {
    type Target = ProfilingWindowController;

    fn deref(&self) -> &Self::Target {
        self.controller
    }
}

impl DerefMut for WindowGuard<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.controller
    }
}

impl Drop for WindowGuard<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.controller.close() {
            tracing::warn!(error = %e, "Failed to close profiling window");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::sink::{EventSink, MemorySink, SinkCall};

    fn controller(options: WindowOptions) -> (Arc<MemorySink>, ProfilingWindowController) {
        let sink = Arc::new(MemorySink::new());
        let session = ProfilingSession::shared(sink.clone());
        (sink, ProfilingWindowController::with_options(session, options))
    }

    #[test]
    fn test_window_new_rejects_degenerate() {
        assert_eq!(
            Window::new(5, 5),
            Err(ProfilerError::InvalidWindow { start: 5, end: 5 })
        );
        assert!(Window::new(6, 5).is_err());

        let window = Window::new(10, 20).unwrap().with_label("train");
        assert_eq!(window.len(), 10);
        assert!(!window.is_empty());
        assert!(window.contains(10));
        assert!(window.contains(19));
        assert!(!window.contains(20));
        assert_eq!(window.label.as_deref(), Some("train"));
    }

    #[test]
    fn test_open_advance_close_sequence() {
        let (sink, mut ctl) = controller(WindowOptions::default());

        assert_eq!(
            ctl.switch_profile(10, 10, 20, None).unwrap(),
            WindowTransition::Opened
        );
        assert!(ctl.session().is_enabled());
        assert_eq!(
            sink.calls(),
            vec![
                SinkCall::Synchronize,
                SinkCall::StartCapture,
                SinkCall::Push("iter_10".into()),
            ]
        );

        assert_eq!(
            ctl.switch_profile(15, 10, 20, None).unwrap(),
            WindowTransition::Advanced
        );
        assert_eq!(
            sink.calls()[3..],
            [SinkCall::Pop, SinkCall::Push("iter_15".into())]
        );

        assert_eq!(
            ctl.switch_profile(20, 10, 20, None).unwrap(),
            WindowTransition::Closed
        );
        assert!(!ctl.session().is_enabled());
        assert_eq!(sink.calls()[5..], [SinkCall::Pop, SinkCall::StopCapture]);
        assert_eq!(ctl.state(), WindowState::Idle);
        assert_eq!(sink.depth(), 0);
    }

    #[test]
    fn test_outside_window_is_noop() {
        let (sink, mut ctl) = controller(WindowOptions::default());

        for iteration in [0, 5, 9, 21, 100] {
            assert_eq!(
                ctl.switch_profile(iteration, 10, 20, None).unwrap(),
                WindowTransition::Unchanged
            );
        }
        assert!(sink.is_empty());
        assert!(!ctl.session().is_enabled());
    }

    #[test]
    fn test_degenerate_window_never_opens() {
        let (sink, mut ctl) = controller(WindowOptions::default());

        assert_eq!(
            ctl.switch_profile(7, 7, 7, None).unwrap(),
            WindowTransition::Unchanged
        );
        assert_eq!(
            ctl.switch_profile(7, 9, 3, None).unwrap(),
            WindowTransition::Unchanged
        );
        assert!(sink.is_empty());
        assert_eq!(ctl.state(), WindowState::Idle);
    }

    #[test]
    fn test_label_overrides_iteration_name() {
        let (sink, mut ctl) = controller(WindowOptions::default());

        ctl.switch_profile(2, 2, 4, Some("step")).unwrap();
        ctl.switch_profile(3, 2, 4, Some("step")).unwrap();
        ctl.switch_profile(4, 2, 4, Some("step")).unwrap();

        assert_eq!(sink.pushed_names(), vec!["step", "step"]);
        assert_eq!(sink.depth(), 0);
    }

    #[test]
    fn test_advance_while_idle_is_ignored() {
        let (sink, mut ctl) = controller(WindowOptions::default());

        // Loop resumed mid-window: no pop of an event that was never pushed.
        assert_eq!(
            ctl.switch_profile(15, 10, 20, None).unwrap(),
            WindowTransition::Unchanged
        );
        assert_eq!(
            ctl.switch_profile(20, 10, 20, None).unwrap(),
            WindowTransition::Unchanged
        );
        assert!(sink.is_empty());
        assert_eq!(sink.unbalanced_pops(), 0);
    }

    #[test]
    fn test_repeated_start_is_ignored() {
        let (sink, mut ctl) = controller(WindowOptions::default());

        ctl.switch_profile(10, 10, 20, None).unwrap();
        assert_eq!(
            ctl.switch_profile(10, 10, 20, None).unwrap(),
            WindowTransition::Unchanged
        );
        assert_eq!(sink.count(&SinkCall::StartCapture), 1);
        assert_eq!(sink.depth(), 1);
    }

    #[test]
    fn test_without_sync() {
        let (sink, mut ctl) =
            controller(WindowOptions::default().with_sync_before_capture(false));

        ctl.switch_profile(0, 0, 1, None).unwrap();
        assert_eq!(sink.count(&SinkCall::Synchronize), 0);
    }

    #[test]
    fn test_layerwise_events_toggle() {
        let (sink, mut ctl) = controller(
            WindowOptions::default()
                .with_sync_before_capture(false)
                .with_layerwise_events(true),
        );

        ctl.switch_profile(1, 1, 2, None).unwrap();
        ctl.switch_profile(2, 1, 2, None).unwrap();

        assert_eq!(
            sink.calls(),
            vec![
                SinkCall::StartCapture,
                SinkCall::OperatorRecording(true),
                SinkCall::Push("iter_1".into()),
                SinkCall::Pop,
                SinkCall::StopCapture,
                SinkCall::OperatorRecording(false),
            ]
        );
    }

    #[test]
    fn test_close_and_guard() {
        let (sink, mut ctl) = controller(WindowOptions::default());

        assert_eq!(ctl.close().unwrap(), WindowTransition::Unchanged);

        {
            let mut guard = ctl.guard();
            guard.switch_profile(3, 3, 10, None).unwrap();
            guard.switch_profile(4, 3, 10, None).unwrap();
            // Loop bails out before iteration 10.
        }

        assert_eq!(ctl.state(), WindowState::Idle);
        assert!(!ctl.session().is_enabled());
        assert!(!sink.is_capturing());
        assert_eq!(sink.depth(), 0);
        assert_eq!(sink.count(&SinkCall::StopCapture), 1);
        assert_eq!(ctl.windows_opened(), 1);
    }

    #[test]
    fn test_window_value_drives_controller() {
        let (sink, mut ctl) = controller(WindowOptions::default());
        let window = Window::new(1, 3).unwrap();

        for iteration in 0..5 {
            ctl.advance(iteration, &window).unwrap();
            assert_eq!(ctl.session().is_enabled(), window.contains(iteration));
        }
        assert_eq!(sink.pushed_names(), vec!["iter_1", "iter_2"]);
    }

    #[test]
    fn test_start_failure_leaves_idle() {
        let (sink, mut ctl) = controller(WindowOptions::default());
        sink.start_capture().unwrap();

        // Backend already capturing: start_capture fails and propagates.
        assert_eq!(
            ctl.switch_profile(0, 0, 2, None),
            Err(ProfilerError::CaptureInProgress)
        );
        assert_eq!(ctl.state(), WindowState::Idle);
        assert!(!ctl.session().is_enabled());
    }

    /// Fails the push with the given 1-based index, delegating everything else.
    struct FailNthPush {
        inner: MemorySink,
        fail_at: usize,
        pushes: AtomicUsize,
    }

    impl EventSink for FailNthPush {
        fn name(&self) -> &str {
            "fail-nth-push"
        }
        fn push_event(&self, name: &str) -> Result<()> {
            if self.pushes.fetch_add(1, Ordering::Relaxed) + 1 == self.fail_at {
                return Err(ProfilerError::backend("range stack full"));
            }
            self.inner.push_event(name)
        }
        fn pop_event(&self) -> Result<()> {
            self.inner.pop_event()
        }
        fn start_capture(&self) -> Result<()> {
            self.inner.start_capture()
        }
        fn stop_capture(&self) -> Result<()> {
            self.inner.stop_capture()
        }
        fn set_operator_recording(&self, enabled: bool) -> Result<()> {
            self.inner.set_operator_recording(enabled)
        }
    }

    #[test]
    fn test_failed_rename_closes_window() {
        let sink = Arc::new(FailNthPush {
            inner: MemorySink::new(),
            fail_at: 2,
            pushes: AtomicUsize::new(0),
        });
        let session = ProfilingSession::shared(sink.clone());
        let mut ctl = ProfilingWindowController::with_options(
            session,
            WindowOptions::default()
                .with_sync_before_capture(false)
                .with_layerwise_events(true),
        );

        ctl.switch_profile(10, 10, 20, None).unwrap();
        assert_eq!(
            ctl.switch_profile(11, 10, 20, None),
            Err(ProfilerError::backend("range stack full"))
        );
        assert_eq!(ctl.state(), WindowState::Idle);
        assert!(!ctl.session().is_enabled());
        assert!(!sink.inner.is_capturing());
        assert_eq!(sink.inner.depth(), 0);

        // Later iterations must not pop an event that is no longer open.
        assert_eq!(
            ctl.switch_profile(12, 10, 20, None).unwrap(),
            WindowTransition::Unchanged
        );
        assert_eq!(
            ctl.switch_profile(20, 10, 20, None).unwrap(),
            WindowTransition::Unchanged
        );
        assert_eq!(
            sink.inner.calls(),
            vec![
                SinkCall::StartCapture,
                SinkCall::OperatorRecording(true),
                SinkCall::Push("iter_10".into()),
                SinkCall::Pop,
                SinkCall::StopCapture,
                SinkCall::OperatorRecording(false),
            ]
        );
        assert_eq!(sink.inner.unbalanced_pops(), 0);
    }
}
