//! Device discovery over a compute backend.

use std::sync::Arc;

use clrun_device::{ComputeBackend, DeviceHandle, DeviceInfoKey, HostBackend};
use snafu::ResultExt;
use tracing::{debug, warn};

use crate::error::{DeviceResultExt, NoDeviceFoundSnafu, RegistryQueryFailedSnafu, Result};

/// Environment variable that selects the compute backend (`host` or `opencl`).
pub const BACKEND_ENV: &str = "CLRUN_BACKEND";

/// Enumerates platforms and picks the device the pipeline runs on.
pub struct DeviceRegistry {
    backend: Arc<dyn ComputeBackend>,
}

impl DeviceRegistry {
    pub fn new(backend: Arc<dyn ComputeBackend>) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> &Arc<dyn ComputeBackend> {
        &self.backend
    }

    /// First device of the first platform that has one.
    ///
    /// Platforms are visited in backend enumeration order; empty platforms
    /// are skipped. Fails with `NoDeviceFound` when every platform is empty
    /// and `RegistryQueryFailed` when enumeration itself errors.
    pub fn select_first_device(&self) -> Result<DeviceHandle> {
        let platforms = self.backend.platforms().context(RegistryQueryFailedSnafu)?;
        for platform in platforms {
            let count = self.backend.device_count(platform).context(RegistryQueryFailedSnafu)?;
            if count == 0 {
                continue;
            }
            let device = self.backend.first_device(platform).context(RegistryQueryFailedSnafu)?;
            debug!(platform = platform.raw(), devices = count, "selected first device");
            return Ok(device);
        }
        NoDeviceFoundSnafu.fail()
    }

    /// Human-readable device property, for diagnostics output only.
    pub fn device_info(&self, device: DeviceHandle, key: DeviceInfoKey) -> Result<String> {
        self.backend.device_info(device, key).at("clGetDeviceInfo")
    }
}

/// Pick the backend named by [`BACKEND_ENV`], defaulting to the host
/// emulation. Unknown values fall back to the host backend with a warning.
pub fn backend_from_env() -> Arc<dyn ComputeBackend> {
    match std::env::var(BACKEND_ENV).as_deref() {
        #[cfg(feature = "opencl")]
        Ok("opencl") => Arc::new(clrun_device::OpenClBackend::new()),
        #[cfg(not(feature = "opencl"))]
        Ok("opencl") => {
            warn!("built without OpenCL support, using host backend");
            Arc::new(HostBackend::new())
        }
        Ok("host") | Err(std::env::VarError::NotPresent) => Arc::new(HostBackend::new()),
        Ok(other) => {
            warn!(requested = other, "unknown backend requested, using host backend");
            Arc::new(HostBackend::new())
        }
        Err(std::env::VarError::NotUnicode(_)) => {
            warn!("backend selector is not valid unicode, using host backend");
            Arc::new(HostBackend::new())
        }
    }
}
