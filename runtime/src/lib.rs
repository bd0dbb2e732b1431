//! Dispatch pipeline over a [`ComputeBackend`](clrun_device::ComputeBackend).
//!
//! Drives the full host-side flow: pick a device, compile kernel source with
//! build diagnostics captured on failure, create device resources under
//! scoped ownership, move data, and launch ND-range dispatches. Everything
//! is blocking and single-threaded by contract; one queue per device.
//!
//! The backend is abstract: the host emulation in `clrun-device` backs tests
//! and driverless machines, the real OpenCL driver sits behind the `opencl`
//! feature.

pub mod context;
pub mod dispatch;
pub mod error;
pub mod program;
pub mod registry;
pub mod resource;


pub use context::{CommandQueue, Context};
pub use dispatch::{Binding, Extent, fence, read_buffer, read_image, run_kernel, write_buffer};
pub use error::{Error, Result};
pub use program::Program;
pub use registry::{BACKEND_ENV, DeviceRegistry, backend_from_env};
pub use resource::{Buffer, Image, Kernel};
