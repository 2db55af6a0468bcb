//! RAII brackets for named trace events.

use crate::error::Result;
use crate::session::ProfilingSession;

/// A named event that is popped when the guard goes out of scope.
///
/// Construction pushes only if the session is enabled at that moment. A
/// disabled session yields an inert guard: no sink call and no allocation.
/// An active guard pops exactly once, on normal return, on `?` propagation,
/// or while unwinding.
#[must_use = "the event is popped as soon as the guard is dropped"]
pub struct ScopedEvent<'a> {
    session: Option<&'a ProfilingSession>,
}

impl<'a> ScopedEvent<'a> {
    /// Open a bracket named `name` on `session`.
    ///
    /// A failing push is returned to the caller and leaves no pop owed.
    pub fn new(session: &'a ProfilingSession, name: &str) -> Result<Self> {
        if !session.is_enabled() {
            return Ok(Self::disabled());
        }
        session.sink().push_event(name)?;
        Ok(Self {
            session: Some(session),
        })
    }

    /// Create an inert guard.
    pub fn disabled() -> Self {
        Self { session: None }
    }

    /// Whether a pop is owed.
    pub fn is_active(&self) -> bool {
        self.session.is_some()
    }

    /// Close the bracket now and report the pop result.
    pub fn finish(mut self) -> Result<()> {
        match self.session.take() {
            Some(session) => session.sink().pop_event(),
            None => Ok(()),
        }
    }
}

impl Drop for ScopedEvent<'_> {
    fn drop(&mut self) {
        if let Some(session) = self.session.take() {
            if let Err(e) = session.sink().pop_event() {
                tracing::warn!(error = %e, "Failed to pop scoped event");
            }
        }
    }
}

/// Open a [`ScopedEvent`] bound to the rest of the enclosing block.
///
/// # Example
///
/// ```ignore
/// use loopscope_core::trace_scope;
///
/// fn train_step(session: &ProfilingSession) -> Result<()> {
///     trace_scope!(session, "forward");
///     // forward pass
///     Ok(())
/// }
/// ```
#[macro_export]
macro_rules! trace_scope {
    ($session:expr, $name:expr) => {
        let _trace_scope = $crate::scope::ScopedEvent::new(&$session, $name)?;
    };
}
