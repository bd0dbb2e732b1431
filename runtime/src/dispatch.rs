//! Kernel launch and blocking data movement.
//!
//! All operations here are synchronous: a call returning `Ok` means the
//! transfer or dispatch has fully completed on the device. One host thread
//! drives one queue; nothing overlaps.

use std::fmt;

use clrun_device::AccessMode;
use tracing::debug;

use crate::context::CommandQueue;
use crate::error::{AccessModeViolationSnafu, DeviceResultExt, InvalidDispatchShapeSnafu, Result};
use crate::resource::{Buffer, Image, Kernel};

/// A 1-D or 2-D index space.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Extent {
    One(usize),
    Two(usize, usize),
}

impl Extent {
    pub fn work_dim(self) -> u32 {
        match self {
            Extent::One(_) => 1,
            Extent::Two(_, _) => 2,
        }
    }

    /// Fixed-width form; unused dimensions are padded with 1.
    pub fn padded(self) -> [usize; 2] {
        match self {
            Extent::One(n) => [n, 1],
            Extent::Two(w, h) => [w, h],
        }
    }

    /// Whether `local` has the same dimensionality and evenly tiles `self`.
    pub fn divisible_by(self, local: Extent) -> bool {
        if self.work_dim() != local.work_dim() {
            return false;
        }
        let global = self.padded();
        let local = local.padded();
        global.iter().zip(local).all(|(&g, l)| l != 0 && g.is_multiple_of(l))
    }
}

impl fmt::Display for Extent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Extent::One(n) => write!(f, "{n}"),
            Extent::Two(w, h) => write!(f, "{w}x{h}"),
        }
    }
}

/// One positional kernel argument.
#[derive(Clone, Copy)]
pub enum Binding<'a> {
    Buffer(&'a Buffer),
    Image(&'a Image),
}

impl Binding<'_> {
    fn mem(&self) -> clrun_device::MemHandle {
        match self {
            Binding::Buffer(buffer) => buffer.handle(),
            Binding::Image(image) => image.handle(),
        }
    }
}

/// Blocking host-to-device copy of `data` into a kernel-input buffer.
pub fn write_buffer(queue: &CommandQueue, buffer: &Buffer, data: &[u8]) -> Result<()> {
    if buffer.mode() != AccessMode::ReadOnly {
        return AccessModeViolationSnafu { op: "write_buffer", mode: buffer.mode() }.fail();
    }
    queue.backend().enqueue_write_buffer(queue.handle(), buffer.handle(), data).at("clEnqueueWriteBuffer")
}

/// Blocking device-to-host copy of a kernel-output buffer's full extent.
pub fn read_buffer(queue: &CommandQueue, buffer: &Buffer) -> Result<Vec<u8>> {
    if buffer.mode() != AccessMode::WriteOnly {
        return AccessModeViolationSnafu { op: "read_buffer", mode: buffer.mode() }.fail();
    }
    let mut out = vec![0u8; buffer.size()];
    queue.backend().enqueue_read_buffer(queue.handle(), buffer.handle(), &mut out).at("clEnqueueReadBuffer")?;
    Ok(out)
}

/// Blocking device-to-host copy of a kernel-output image, row-major RGBA.
pub fn read_image(queue: &CommandQueue, image: &Image) -> Result<Vec<u8>> {
    if image.mode() != AccessMode::WriteOnly {
        return AccessModeViolationSnafu { op: "read_image", mode: image.mode() }.fail();
    }
    let mut out = vec![0u8; image.desc().byte_len()];
    queue.backend().enqueue_read_image(queue.handle(), image.handle(), &mut out).at("clEnqueueReadImage")?;
    Ok(out)
}

/// Bind arguments positionally and enqueue an ND-range dispatch.
///
/// `bindings[i]` becomes kernel argument slot `i`; supplying them in kernel
/// parameter order is the caller's contract. When `local` is given it must
/// match `global`'s dimensionality and divide it evenly in every dimension;
/// this is validated before anything is submitted to the device.
pub fn run_kernel(
    queue: &CommandQueue,
    kernel: &Kernel,
    bindings: &[Binding<'_>],
    global: Extent,
    local: Option<Extent>,
) -> Result<()> {
    if let Some(local) = local
        && !global.divisible_by(local)
    {
        return InvalidDispatchShapeSnafu { global, local }.fail();
    }

    for (slot, binding) in bindings.iter().enumerate() {
        queue.backend().set_kernel_arg(kernel.handle(), slot as u32, binding.mem()).at("clSetKernelArg")?;
    }

    debug!(%global, args = bindings.len(), "dispatching kernel");
    queue
        .backend()
        .enqueue_kernel(queue.handle(), kernel.handle(), global.work_dim(), global.padded(), local.map(Extent::padded))
        .at("clEnqueueNDRangeKernel")
}

/// Flush then drain the queue; the pipeline's final blocking point.
pub fn fence(queue: &CommandQueue) -> Result<()> {
    queue.backend().flush(queue.handle()).at("clFlush")?;
    queue.backend().finish(queue.handle()).at("clFinish")
}
