//! Error types for the dispatch pipeline.

use clrun_device::Status;
use snafu::Snafu;

use crate::dispatch::Extent;

/// Result type for pipeline operations.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors that can occur while driving a compute backend.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    /// No platform exposes any usable device.
    #[snafu(display("no compute device found on any platform"))]
    NoDeviceFound,

    /// Platform or device enumeration itself failed.
    #[snafu(display("device enumeration failed: {source}"))]
    RegistryQueryFailed { source: Status },

    /// A raw backend call returned a non-success status.
    #[snafu(display("{site} failed: {code}"))]
    DeviceOperationFailed {
        #[snafu(source)]
        code: Status,
        site: &'static str,
    },

    /// Program build failed; `log` carries the backend's diagnostics verbatim.
    #[snafu(display("program build failed:\n{log}"))]
    CompileError { log: String },

    /// The requested entry point does not exist in the built program.
    #[snafu(display("entry point '{name}' not found in program"))]
    EntryNotFound { name: String },

    /// Local work size does not tile the global extent.
    #[snafu(display("local extent {local} does not evenly tile global extent {global}"))]
    InvalidDispatchShape { global: Extent, local: Extent },

    /// A transfer direction disagrees with the memory object's access mode.
    #[snafu(display("{op} rejected: memory object is {mode:?}"))]
    AccessModeViolation { op: &'static str, mode: clrun_device::AccessMode },

    /// Releasing an already-dead handle, or teardown of a live one failed.
    #[snafu(display("failed to release {what}: {source}"))]
    ResourceLifecycleViolation { what: &'static str, source: Status },
}

/// Adapter from raw backend results to pipeline errors.
///
/// `site` names the underlying call (`"clCreateContext"`, ...) so failures
/// point at the exact step that produced the status.
pub trait DeviceResultExt<T> {
    fn at(self, site: &'static str) -> Result<T>;
}

impl<T> DeviceResultExt<T> for std::result::Result<T, Status> {
    fn at(self, site: &'static str) -> Result<T> {
        self.map_err(|code| Error::DeviceOperationFailed { code, site })
    }
}

/// Turn a bare status into a pipeline result.
pub fn check(status: Status, site: &'static str) -> Result<()> {
    if status.is_success() { Ok(()) } else { Err(Error::DeviceOperationFailed { code: status, site }) }
}
