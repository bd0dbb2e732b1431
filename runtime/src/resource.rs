//! Device-resident resources: kernels, buffers, images.
//!
//! All three follow the same ownership scheme as [`Context`](crate::Context):
//! move-only, released exactly once, with an explicit `release` for callers
//! that want teardown failures surfaced instead of logged.

use std::sync::Arc;

use clrun_device::{AccessMode, ComputeBackend, ImageDesc, KernelHandle, MemHandle};
use snafu::ResultExt;
use tracing::warn;

use crate::context::Context;
use crate::error::{DeviceResultExt, ResourceLifecycleViolationSnafu, Result};

/// An instantiated kernel entry point.
#[derive(Debug)]
pub struct Kernel {
    backend: Arc<dyn ComputeBackend>,
    handle: KernelHandle,
    released: bool,
}

impl Kernel {
    pub(crate) fn new(backend: Arc<dyn ComputeBackend>, handle: KernelHandle) -> Self {
        Self { backend, handle, released: false }
    }

    pub(crate) fn handle(&self) -> KernelHandle {
        self.handle
    }

    pub fn release(mut self) -> Result<()> {
        self.released = true;
        self.backend.release_kernel(self.handle).context(ResourceLifecycleViolationSnafu { what: "kernel" })
    }
}

impl Drop for Kernel {
    fn drop(&mut self) {
        if !self.released
            && let Err(status) = self.backend.release_kernel(self.handle)
        {
            warn!(%status, "kernel release failed during drop");
        }
    }
}

/// A fixed-size device buffer.
///
/// The access mode is the device-side view: `ReadOnly` buffers are kernel
/// inputs the host writes, `WriteOnly` buffers are kernel outputs the host
/// reads back.
pub struct Buffer {
    backend: Arc<dyn ComputeBackend>,
    handle: MemHandle,
    size: usize,
    mode: AccessMode,
    released: bool,
}

impl Buffer {
    pub fn create(context: &Context, size: usize, mode: AccessMode) -> Result<Self> {
        let backend = Arc::clone(context.backend());
        let handle = backend.create_buffer(context.handle(), size, mode).at("clCreateBuffer")?;
        Ok(Self { backend, handle, size, mode, released: false })
    }

    pub(crate) fn handle(&self) -> MemHandle {
        self.handle
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn mode(&self) -> AccessMode {
        self.mode
    }

    pub fn release(mut self) -> Result<()> {
        self.released = true;
        self.backend.release_mem(self.handle).context(ResourceLifecycleViolationSnafu { what: "buffer" })
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        if !self.released
            && let Err(status) = self.backend.release_mem(self.handle)
        {
            warn!(%status, "buffer release failed during drop");
        }
    }
}

/// A 2-D RGBA device image.
#[derive(Debug)]
pub struct Image {
    backend: Arc<dyn ComputeBackend>,
    handle: MemHandle,
    desc: ImageDesc,
    mode: AccessMode,
    released: bool,
}

impl Image {
    pub fn create(context: &Context, desc: ImageDesc, mode: AccessMode) -> Result<Self> {
        let backend = Arc::clone(context.backend());
        let handle = backend.create_image(context.handle(), desc, mode).at("clCreateImage")?;
        Ok(Self { backend, handle, desc, mode, released: false })
    }

    pub(crate) fn handle(&self) -> MemHandle {
        self.handle
    }

    pub fn desc(&self) -> ImageDesc {
        self.desc
    }

    pub fn mode(&self) -> AccessMode {
        self.mode
    }

    pub fn release(mut self) -> Result<()> {
        self.released = true;
        self.backend.release_mem(self.handle).context(ResourceLifecycleViolationSnafu { what: "image" })
    }
}

impl Drop for Image {
    fn drop(&mut self) {
        if !self.released
            && let Err(status) = self.backend.release_mem(self.handle)
        {
            warn!(%status, "image release failed during drop");
        }
    }
}
