//! CUDA backend for loopscope
//!
//! Provides [`NvtxSink`], an [`EventSink`](loopscope_core::EventSink) that
//! emits NVTX ranges and brackets capture with the CUDA profiler API.
//!
//! # Requirements
//!
//! - `cuda` feature enabled
//! - CUDA Toolkit with nvToolsExt
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use loopscope_core::ProfilingSession;
//! use loopscope_cuda::NvtxSink;
//!
//! let session = ProfilingSession::shared(Arc::new(NvtxSink::new(0)?));
//! ```

#![warn(missing_docs)]

#[cfg(feature = "cuda")]
pub mod nvtx;

#[cfg(feature = "cuda")]
pub use nvtx::NvtxSink;

// Placeholder implementation when CUDA is not available
#[cfg(not(feature = "cuda"))]
mod stub {
    use loopscope_core::error::{ProfilerError, Result};
    use loopscope_core::sink::EventSink;

    /// Stub NVTX sink when the CUDA feature is disabled.
    #[derive(Debug)]
    pub struct NvtxSink {
        _private: (),
    }

    impl NvtxSink {
        /// Create fails when CUDA is not available.
        pub fn new(_ordinal: usize) -> Result<Self> {
            Err(ProfilerError::NotAvailable)
        }
    }

    impl EventSink for NvtxSink {
        fn name(&self) -> &str {
            "nvtx"
        }

        fn push_event(&self, _name: &str) -> Result<()> {
            Err(ProfilerError::NotAvailable)
        }

        fn pop_event(&self) -> Result<()> {
            Err(ProfilerError::NotAvailable)
        }

        fn start_capture(&self) -> Result<()> {
            Err(ProfilerError::NotAvailable)
        }

        fn stop_capture(&self) -> Result<()> {
            Err(ProfilerError::NotAvailable)
        }
    }
}

#[cfg(not(feature = "cuda"))]
pub use stub::NvtxSink;

/// Check if CUDA is available at runtime.
///
/// Returns false if the `cuda` feature is off, the CUDA libraries are not
/// installed, or no device is present.
pub fn is_cuda_available() -> bool {
    #[cfg(feature = "cuda")]
    {
        // cudarc panics if CUDA libraries are not found
        std::panic::catch_unwind(|| {
            cudarc::driver::CudaContext::device_count()
                .map(|c| c > 0)
                .unwrap_or(false)
        })
        .unwrap_or(false)
    }
    #[cfg(not(feature = "cuda"))]
    {
        false
    }
}
