//! Backend seam between the dispatch pipeline and a concrete compute runtime.
//!
//! The `ComputeBackend` trait mirrors the blocking OpenCL host API surface:
//! enumeration, object creation, transfers, ND-range enqueue, and explicit
//! releases. Handles are plain ids; ownership and release-exactly-once live
//! in the typed wrappers of the `clrun-runtime` crate.

use std::fmt;

use crate::status::Status;

/// Result alias for raw backend calls.
pub type BackendResult<T> = Result<T, Status>;

macro_rules! raw_handle {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
        pub struct $name(u64);

        impl $name {
            /// Wrap a backend-private id. Only backend implementations
            /// should mint handles.
            pub fn from_raw(raw: u64) -> Self {
                Self(raw)
            }

            pub fn raw(self) -> u64 {
                self.0
            }
        }
    };
}

raw_handle!(
    /// Identifies one enumerated platform.
    PlatformHandle
);
raw_handle!(
    /// Identifies one compute device. Borrowed from the backend's registry,
    /// never released by the caller.
    DeviceHandle
);
raw_handle!(
    /// Identifies an execution scope bound to one device.
    ContextHandle
);
raw_handle!(
    /// Identifies an ordered submission channel.
    QueueHandle
);
raw_handle!(
    /// Identifies a program object (source, possibly built).
    ProgramHandle
);
raw_handle!(
    /// Identifies a named entry point extracted from a built program.
    KernelHandle
);
raw_handle!(
    /// Identifies a device-resident memory object (buffer or image).
    MemHandle
);

/// Access mode of a memory object, from the device's point of view:
/// `ReadOnly` memory is kernel input (the host writes it), `WriteOnly`
/// memory is kernel output (the host reads it back).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AccessMode {
    ReadOnly,
    WriteOnly,
}

/// Pixel layout of a 2-D image.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PixelFormat {
    /// Four channels, one byte each, row-major.
    Rgba8,
}

impl PixelFormat {
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Rgba8 => 4,
        }
    }
}

/// Shape of a 2-D image, fixed at creation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ImageDesc {
    pub width: usize,
    pub height: usize,
    pub format: PixelFormat,
}

impl ImageDesc {
    pub fn rgba8(width: usize, height: usize) -> Self {
        Self { width, height, format: PixelFormat::Rgba8 }
    }

    /// Total byte size of the flat row-major pixel buffer.
    pub fn byte_len(&self) -> usize {
        self.width * self.height * self.format.bytes_per_pixel()
    }
}

/// Descriptive device queries. Used for diagnostics and logging only,
/// never for control decisions.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeviceInfoKey {
    /// Human-readable device name.
    Name,
    /// Supported kernel source-language version.
    SourceVersion,
    /// Parallelism width (compute units).
    ComputeUnits,
}

/// A concrete compute runtime.
///
/// Every method is blocking: transfers and kernel execution have completed
/// by the time the call returns. Operations issued on the same queue handle
/// execute in submission order. All methods return a raw [`Status`] on
/// failure; the pipeline layer decides how to report it.
///
/// Access modes are a caller contract at this level: the backend stages
/// kernel arguments by their declared mode, but host-side transfers against
/// the "wrong" mode are not rejected here (the orchestrator does that).
pub trait ComputeBackend: Send + Sync + fmt::Debug {
    /// Short backend identifier for logs.
    fn name(&self) -> &'static str;

    /// Enumerate platforms in the runtime's own order, unsorted and
    /// unfiltered by capability.
    fn platforms(&self) -> BackendResult<Vec<PlatformHandle>>;

    /// Number of devices on a platform. Zero is not an error.
    fn device_count(&self, platform: PlatformHandle) -> BackendResult<u32>;

    /// First enumerated device of a platform.
    fn first_device(&self, platform: PlatformHandle) -> BackendResult<DeviceHandle>;

    /// Read-only descriptive query.
    fn device_info(&self, device: DeviceHandle, key: DeviceInfoKey) -> BackendResult<String>;

    fn create_context(&self, device: DeviceHandle) -> BackendResult<ContextHandle>;

    fn create_queue(&self, context: ContextHandle, device: DeviceHandle) -> BackendResult<QueueHandle>;

    /// Create a program object from raw source text. The text is not
    /// validated here; `build_program` reports any problem.
    fn create_program(&self, context: ContextHandle, source: &str) -> BackendResult<ProgramHandle>;

    /// Build the program for exactly one device. A compilation failure
    /// yields `Status::BUILD_PROGRAM_FAILURE` and leaves the build log
    /// retrievable via `build_log`.
    fn build_program(&self, program: ProgramHandle, device: DeviceHandle, options: &str) -> BackendResult<()>;

    /// Full diagnostic text of the last build for `device`.
    fn build_log(&self, program: ProgramHandle, device: DeviceHandle) -> BackendResult<String>;

    /// Extract a named entry point. `Status::INVALID_KERNEL_NAME` when the
    /// entry does not exist in the built program.
    fn create_kernel(&self, program: ProgramHandle, entry: &str) -> BackendResult<KernelHandle>;

    fn create_buffer(&self, context: ContextHandle, size: usize, mode: AccessMode) -> BackendResult<MemHandle>;

    fn create_image(&self, context: ContextHandle, desc: ImageDesc, mode: AccessMode) -> BackendResult<MemHandle>;

    /// Bind a memory object to a positional kernel argument.
    fn set_kernel_arg(&self, kernel: KernelHandle, index: u32, mem: MemHandle) -> BackendResult<()>;

    /// Blocking host-to-device copy of the full extent.
    fn enqueue_write_buffer(&self, queue: QueueHandle, mem: MemHandle, data: &[u8]) -> BackendResult<()>;

    /// Blocking device-to-host copy of the full extent.
    fn enqueue_read_buffer(&self, queue: QueueHandle, mem: MemHandle, out: &mut [u8]) -> BackendResult<()>;

    /// Blocking device-to-host copy of a whole 2-D image.
    fn enqueue_read_image(&self, queue: QueueHandle, mem: MemHandle, out: &mut [u8]) -> BackendResult<()>;

    /// Launch a kernel over `global` work items, optionally grouped by
    /// `local`. Extents are padded to two dimensions; `work_dim` says how
    /// many are meaningful.
    fn enqueue_kernel(
        &self,
        queue: QueueHandle,
        kernel: KernelHandle,
        work_dim: u32,
        global: [usize; 2],
        local: Option<[usize; 2]>,
    ) -> BackendResult<()>;

    fn flush(&self, queue: QueueHandle) -> BackendResult<()>;

    /// Block until every previously enqueued operation has completed.
    fn finish(&self, queue: QueueHandle) -> BackendResult<()>;

    fn release_context(&self, context: ContextHandle) -> BackendResult<()>;
    fn release_queue(&self, queue: QueueHandle) -> BackendResult<()>;
    fn release_program(&self, program: ProgramHandle) -> BackendResult<()>;
    fn release_kernel(&self, kernel: KernelHandle) -> BackendResult<()>;
    fn release_mem(&self, mem: MemHandle) -> BackendResult<()>;
}
