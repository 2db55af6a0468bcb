//! # Loopscope Core
//!
//! Scoped trace-event instrumentation for iterative training loops.
//!
//! An iterative workload is marked with named, nested events that an external
//! GPU profiler displays as a timeline. A bounded window of iterations turns
//! capture on and off so the trace stays small and excludes warm-up.
//!
//! ## Core Abstractions
//!
//! - [`EventSink`] - Backend receiving push/pop/start/stop calls
//! - [`ProfilingSession`] - Shared enable flag gating every sink call
//! - [`ScopedEvent`] - RAII bracket around a phase of an iteration
//! - [`ProfilingWindowController`] - Opens and closes the capture window
//! - [`HookRegistrar`] - Attaches per-node events to a model hierarchy
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use loopscope_core::prelude::*;
//!
//! let session = ProfilingSession::shared(Arc::new(TracingSink::new()));
//! let mut controller = ProfilingWindowController::new(session.clone());
//!
//! for iteration in 0..30 {
//!     controller.switch_profile(iteration, 10, 20, None)?;
//!     session.in_event("forward", || forward())?;
//!     session.in_event("backward", || backward())?;
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod hooks;
pub mod model;
pub mod scope;
pub mod session;
pub mod sink;
pub mod window;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::config::{ConfigBuilder, ProfilingConfig};
    pub use crate::error::{ProfilerError, Result};
    pub use crate::hooks::{Granularity, HookBinding, HookRegistrar, HookRegistration};
    pub use crate::model::{ForwardHook, HookId, HookSet, ModelNode, Module};
    pub use crate::scope::ScopedEvent;
    pub use crate::session::ProfilingSession;
    pub use crate::sink::{EventSink, MemorySink, NullSink, SinkCall, TracingSink};
    pub use crate::trace_scope;
    pub use crate::window::{
        ProfilingWindowController, Window, WindowGuard, WindowOptions, WindowState,
        WindowTransition,
    };
}

pub use error::{ProfilerError, Result};
pub use hooks::{Granularity, HookRegistrar, HookRegistration};
pub use model::{ModelNode, Module};
pub use scope::ScopedEvent;
pub use session::ProfilingSession;
pub use sink::{EventSink, MemorySink, NullSink, TracingSink};
pub use window::{ProfilingWindowController, Window, WindowOptions, WindowState};
