//! Low-level compute backend seam for the clrun dispatch pipeline.
//!
//! This crate defines the raw [`Status`] code space, the blocking
//! [`ComputeBackend`] trait that mirrors the OpenCL host API, and two
//! implementations:
//!
//! - [`HostBackend`] — an in-process emulation, always available, used by
//!   tests and as the fallback when no driver is present;
//! - `OpenClBackend` — the real driver, behind the `opencl` feature.
//!
//! Ownership of device-resident objects lives one layer up, in
//! `clrun-runtime`'s scoped wrappers; this crate only hands out ids.

pub mod backend;
pub mod host;
#[cfg(feature = "opencl")]
pub mod opencl;
pub mod status;


pub use backend::{
    AccessMode, BackendResult, ComputeBackend, ContextHandle, DeviceHandle, DeviceInfoKey, ImageDesc, KernelHandle,
    MemHandle, PixelFormat, PlatformHandle, ProgramHandle, QueueHandle,
};
pub use host::{HostArgs, HostBackend, HostKernelFn, WorkItem};
#[cfg(feature = "opencl")]
pub use opencl::OpenClBackend;
pub use status::Status;
