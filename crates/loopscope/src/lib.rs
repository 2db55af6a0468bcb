//! # Loopscope
//!
//! Windowed trace-event instrumentation for iterative training loops.
//!
//! Loopscope marks phases of each iteration, and optionally every node of a
//! model hierarchy, as named nested events for an external GPU profiler. A
//! profiling window turns capture on for a bounded span of iterations so the
//! trace skips warm-up and stays small.
//!
//! ## Quick Start
//!
//! ```ignore
//! use loopscope::prelude::*;
//!
//! let config = ConfigBuilder::new().window(10, 20).build()?;
//! let mut profiler = Profiler::new(&config, loopscope::default_sink())?;
//! profiler.instrument(&mut model);
//!
//! for iteration in 0..30 {
//!     profiler.step(iteration)?;
//!     let session = profiler.session();
//!     session.in_event("forward", || model.forward(&mut run_layer))?;
//!     session.in_event("backward", || backward())?;
//! }
//! profiler.finish()?;
//! ```
//!
//! ## Backends
//!
//! - **Tracing** - events as `tracing` records (always available)
//! - **Memory** - call recording for tests
//! - **NVTX** - Nsight Systems ranges and capture control (requires `cuda` feature)
//!
//! ```toml
//! [dependencies]
//! loopscope = { version = "0.1", features = ["cuda"] }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

use std::sync::Arc;

pub use loopscope_core::{config, error, hooks, model, scope, session, sink, trace_scope, window};
pub use loopscope_core::{
    EventSink, Granularity, HookRegistrar, HookRegistration, MemorySink, ModelNode, Module,
    NullSink, ProfilerError, ProfilingSession, ProfilingWindowController, Result, ScopedEvent,
    TracingSink, Window, WindowOptions, WindowState,
};

/// CUDA backend.
pub mod cuda {
    pub use loopscope_cuda::{is_cuda_available, NvtxSink};
}

use crate::config::ProfilingConfig;
use crate::window::WindowTransition;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::cuda::{is_cuda_available, NvtxSink};
    pub use crate::Profiler;
    pub use loopscope_core::prelude::*;
}

/// Pick the best available sink.
///
/// NVTX on device 0 when CUDA is available, otherwise [`TracingSink`].
pub fn default_sink() -> Arc<dyn EventSink> {
    if loopscope_cuda::is_cuda_available() {
        match loopscope_cuda::NvtxSink::new(0) {
            Ok(sink) => return Arc::new(sink),
            Err(e) => tracing::warn!(error = %e, "NVTX sink unavailable, falling back to tracing"),
        }
    }
    Arc::new(TracingSink::new())
}

/// Session, window controller and hook registrar assembled from a
/// [`ProfilingConfig`].
pub struct Profiler {
    session: Arc<ProfilingSession>,
    controller: ProfilingWindowController,
    window: Window,
    registrar: Option<HookRegistrar>,
}

impl Profiler {
    /// Build a profiler writing to `sink`.
    pub fn new(config: &ProfilingConfig, sink: Arc<dyn EventSink>) -> Result<Self> {
        config.validate()?;
        let session = ProfilingSession::shared(sink);
        let controller =
            ProfilingWindowController::with_options(Arc::clone(&session), config.window_options());
        let registrar = config
            .hooks
            .enabled
            .then(|| HookRegistrar::new(Arc::clone(&session), config.hooks.granularity));

        tracing::debug!(
            sink = session.sink().name(),
            start = config.window.start,
            end = config.window.end,
            "Profiler created"
        );

        Ok(Self {
            session,
            controller,
            window: config.to_window()?,
            registrar,
        })
    }

    /// Shared session.
    pub fn session(&self) -> &Arc<ProfilingSession> {
        &self.session
    }

    /// Configured window.
    pub fn window(&self) -> &Window {
        &self.window
    }

    /// Window controller.
    pub fn controller(&self) -> &ProfilingWindowController {
        &self.controller
    }

    /// Attach per-node events to `model`. Returns `None` when hooks are disabled.
    pub fn instrument(&self, model: &mut dyn ModelNode) -> Option<HookRegistration> {
        self.registrar.as_ref().map(|r| r.register(model))
    }

    /// Drive the window for `iteration`. Call once at the top of each iteration.
    pub fn step(&mut self, iteration: u64) -> Result<WindowTransition> {
        self.controller.advance(iteration, &self.window)
    }

    /// Close the window if the loop ended inside it.
    pub fn finish(&mut self) -> Result<WindowTransition> {
        self.controller.close()
    }
}

impl std::fmt::Debug for Profiler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Profiler")
            .field("session", &self.session)
            .field("window", &self.window)
            .field("state", &self.controller.state())
            .field("hooks", &self.registrar.is_some())
            .finish()
    }
}
