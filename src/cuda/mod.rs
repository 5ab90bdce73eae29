//! Device layer for the DTW engine, behind the `cuda` feature.
//!
//! Hosts the runtime probes the engine dispatcher relies on and, when the
//! feature is on, the `cust` wrappers driving the cost-swath and
//! centroid-update kernels for the all-pairs and DBA-update drivers.

#[cfg(feature = "cuda")]
pub mod dtw_wrapper;

#[cfg(feature = "cuda")]
pub use dtw_wrapper::{all_pairs_cuda, dba_update_cuda, CudaDtw, CudaDtwError};

/// True when the driver comes up and reports at least one device.
#[inline]
pub fn cuda_available() -> bool {
    cuda_device_count() > 0
}

/// Number of usable CUDA devices. Zero covers every degraded case — the
/// feature is off, the driver is absent, or the probe itself errors — so
/// callers on GPU-less hosts fall through to the CPU engine without a
/// panic.
#[inline]
pub fn cuda_device_count() -> usize {
    #[cfg(feature = "cuda")]
    {
        use cust::device::Device;
        use cust::prelude::CudaFlags;

        if cust::init(CudaFlags::empty()).is_err() {
            return 0;
        }
        Device::num_devices().map(|n| n as usize).unwrap_or(0)
    }

    #[cfg(not(feature = "cuda"))]
    {
        0
    }
}

/// Per-device max-threads-per-block capabilities, probed once at first use
/// and cached for the life of the process.
#[cfg(feature = "cuda")]
pub fn max_threads_per_device() -> &'static [u32] {
    use cust::device::{Device, DeviceAttribute};
    use std::sync::OnceLock;

    static MAX_THREADS: OnceLock<Vec<u32>> = OnceLock::new();
    MAX_THREADS.get_or_init(|| {
        (0..cuda_device_count() as u32)
            .map(|id| {
                Device::get_device(id)
                    .and_then(|d| d.get_attribute(DeviceAttribute::MaxThreadsPerBlock))
                    .unwrap_or(1024)
                    .max(1) as u32
            })
            .collect()
    })
}
