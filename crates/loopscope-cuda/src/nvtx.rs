//! NVTX event sink for Nsight Systems.
//!
//! Events become NVTX ranges via cudarc's nvtx bindings. Capture is bracketed
//! with `cuProfilerStart`/`cuProfilerStop`, so running under
//! `nsys profile --capture-range=cudaProfilerApi` records only the window.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use cudarc::driver::sys as cuda_sys;
use cudarc::driver::CudaContext;
use cudarc::nvtx;
use loopscope_core::error::{ProfilerError, Result};
use loopscope_core::sink::EventSink;
use parking_lot::Mutex;

/// Timeline marker emitted when per-operation recording starts.
pub const OPERATOR_RECORDING_ON: &str = "operator_recording:on";

/// Timeline marker emitted when per-operation recording stops.
pub const OPERATOR_RECORDING_OFF: &str = "operator_recording:off";

/// Event sink backed by NVTX ranges and the CUDA profiler API.
///
/// Open ranges are kept on an internal stack; `pop_event` ends the most
/// recently opened one.
pub struct NvtxSink {
    context: Arc<CudaContext>,
    ordinal: usize,
    ranges: Mutex<Vec<nvtx::Range>>,
    capture_in_progress: AtomicBool,
    operator_recording: AtomicBool,
}

impl NvtxSink {
    /// Create a sink bound to CUDA device `ordinal`.
    pub fn new(ordinal: usize) -> Result<Self> {
        let context = CudaContext::new(ordinal).map_err(|e| {
            ProfilerError::backend(format!("Failed to create CUDA device {}: {}", ordinal, e))
        })?;
        Ok(Self::with_context(context, ordinal))
    }

    /// Create a sink from an existing context.
    pub fn with_context(context: Arc<CudaContext>, ordinal: usize) -> Self {
        Self {
            context,
            ordinal,
            ranges: Mutex::new(Vec::new()),
            capture_in_progress: AtomicBool::new(false),
            operator_recording: AtomicBool::new(false),
        }
    }

    /// Device ordinal.
    pub fn ordinal(&self) -> usize {
        self.ordinal
    }

    /// Number of ranges currently open.
    pub fn open_ranges(&self) -> usize {
        self.ranges.lock().len()
    }

    /// Whether a capture is in progress.
    pub fn is_capturing(&self) -> bool {
        self.capture_in_progress.load(Ordering::Relaxed)
    }

    /// Whether per-operation recording was requested.
    ///
    /// NVTX has no switch for this itself. Host frameworks that emit their own
    /// per-operation ranges poll this flag; the toggle is also marked on the
    /// timeline.
    pub fn operator_recording(&self) -> bool {
        self.operator_recording.load(Ordering::Relaxed)
    }

    fn bind(&self) -> Result<()> {
        self.context
            .bind_to_thread()
            .map_err(|e| ProfilerError::backend(format!("Failed to bind CUDA context: {}", e)))
    }
}

impl EventSink for NvtxSink {
    fn name(&self) -> &str {
        "nvtx"
    }

    fn push_event(&self, name: &str) -> Result<()> {
        let range = nvtx::Event::message(name).range();
        self.ranges.lock().push(range);
        Ok(())
    }

    fn pop_event(&self) -> Result<()> {
        match self.ranges.lock().pop() {
            // Dropping the range ends it.
            Some(_range) => Ok(()),
            None => Err(ProfilerError::backend("NVTX range stack is empty")),
        }
    }

    fn start_capture(&self) -> Result<()> {
        if self
            .capture_in_progress
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::Relaxed)
            .is_err()
        {
            return Err(ProfilerError::CaptureInProgress);
        }

        let started = self.bind().and_then(|()| {
            let result = unsafe { cuda_sys::cuProfilerStart() };
            if result != cuda_sys::CUresult::CUDA_SUCCESS {
                return Err(ProfilerError::backend(format!(
                    "cuProfilerStart failed: {:?}",
                    result
                )));
            }
            Ok(())
        });
        if started.is_err() {
            self.capture_in_progress.store(false, Ordering::SeqCst);
        }
        started
    }

    fn stop_capture(&self) -> Result<()> {
        if self
            .capture_in_progress
            .compare_exchange(true, false, Ordering::SeqCst, Ordering::Relaxed)
            .is_err()
        {
            return Err(ProfilerError::NoCaptureInProgress);
        }

        self.bind()?;
        let result = unsafe { cuda_sys::cuProfilerStop() };
        if result != cuda_sys::CUresult::CUDA_SUCCESS {
            return Err(ProfilerError::backend(format!(
                "cuProfilerStop failed: {:?}",
                result
            )));
        }
        Ok(())
    }

    fn synchronize(&self) -> Result<()> {
        self.context
            .synchronize()
            .map_err(|e| ProfilerError::backend(format!("Synchronize failed: {}", e)))
    }

    fn set_operator_recording(&self, enabled: bool) -> Result<()> {
        self.operator_recording.store(enabled, Ordering::Relaxed);
        nvtx::mark(if enabled {
            OPERATOR_RECORDING_ON
        } else {
            OPERATOR_RECORDING_OFF
        });
        tracing::debug!(device = self.ordinal, enabled, "NVTX operator recording");
        Ok(())
    }
}

impl std::fmt::Debug for NvtxSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NvtxSink")
            .field("ordinal", &self.ordinal)
            .field("open_ranges", &self.open_ranges())
            .field("capture_in_progress", &self.is_capturing())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[ignore = "requires nvToolsExt library"]
    fn test_nvtx_push_pop() {
        let sink = NvtxSink::new(0).unwrap();
        sink.push_event("iter_10").unwrap();
        sink.push_event("forward").unwrap();
        assert_eq!(sink.open_ranges(), 2);

        sink.pop_event().unwrap();
        sink.pop_event().unwrap();
        assert_eq!(sink.open_ranges(), 0);
        assert!(sink.pop_event().is_err());
    }

    #[test]
    #[ignore = "requires nvToolsExt library"]
    fn test_nvtx_capture_state() {
        let sink = NvtxSink::new(0).unwrap();

        assert!(sink.start_capture().is_ok());
        assert!(matches!(
            sink.start_capture(),
            Err(ProfilerError::CaptureInProgress)
        ));

        assert!(sink.stop_capture().is_ok());
        assert!(matches!(
            sink.stop_capture(),
            Err(ProfilerError::NoCaptureInProgress)
        ));
    }

    #[test]
    #[ignore = "requires nvToolsExt library"]
    fn test_nvtx_operator_recording() {
        let sink = NvtxSink::new(0).unwrap();
        assert!(!sink.operator_recording());
        sink.set_operator_recording(true).unwrap();
        assert!(sink.operator_recording());
        sink.set_operator_recording(false).unwrap();
        assert!(!sink.operator_recording());
        sink.synchronize().unwrap();
    }
}
