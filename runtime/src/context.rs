//! Scoped ownership of contexts and command queues.
//!
//! Wrappers are move-only: dropping one issues the matching release exactly
//! once, and `release(self)` surfaces teardown failures for callers that
//! care. Raw handles stay private so a handle cannot outlive its wrapper.

use std::sync::Arc;

use clrun_device::{ComputeBackend, ContextHandle, DeviceHandle, QueueHandle};
use snafu::ResultExt;
use tracing::warn;

use crate::error::{DeviceResultExt, ResourceLifecycleViolationSnafu, Result};

/// An owned device context.
pub struct Context {
    backend: Arc<dyn ComputeBackend>,
    handle: ContextHandle,
    device: DeviceHandle,
    released: bool,
}

impl Context {
    pub fn create(backend: Arc<dyn ComputeBackend>, device: DeviceHandle) -> Result<Self> {
        let handle = backend.create_context(device).at("clCreateContext")?;
        Ok(Self { backend, handle, device, released: false })
    }

    pub(crate) fn backend(&self) -> &Arc<dyn ComputeBackend> {
        &self.backend
    }

    pub(crate) fn handle(&self) -> ContextHandle {
        self.handle
    }

    pub fn device(&self) -> DeviceHandle {
        self.device
    }

    /// Tear down now, surfacing any release failure.
    pub fn release(mut self) -> Result<()> {
        self.released = true;
        self.backend.release_context(self.handle).context(ResourceLifecycleViolationSnafu { what: "context" })
    }
}

impl Drop for Context {
    fn drop(&mut self) {
        if !self.released
            && let Err(status) = self.backend.release_context(self.handle)
        {
            warn!(%status, "context release failed during drop");
        }
    }
}

/// An owned in-order command queue bound to one device.
pub struct CommandQueue {
    backend: Arc<dyn ComputeBackend>,
    handle: QueueHandle,
    released: bool,
}

impl CommandQueue {
    pub fn create(context: &Context) -> Result<Self> {
        let backend = Arc::clone(context.backend());
        let handle = backend.create_queue(context.handle(), context.device()).at("clCreateCommandQueue")?;
        Ok(Self { backend, handle, released: false })
    }

    pub(crate) fn backend(&self) -> &Arc<dyn ComputeBackend> {
        &self.backend
    }

    pub(crate) fn handle(&self) -> QueueHandle {
        self.handle
    }

    pub fn release(mut self) -> Result<()> {
        self.released = true;
        self.backend.release_queue(self.handle).context(ResourceLifecycleViolationSnafu { what: "queue" })
    }
}

impl Drop for CommandQueue {
    fn drop(&mut self) {
        if !self.released
            && let Err(status) = self.backend.release_queue(self.handle)
        {
            warn!(%status, "queue release failed during drop");
        }
    }
}
