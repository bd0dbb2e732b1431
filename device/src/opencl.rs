//! Real OpenCL driver backend, behind the `opencl` feature.
//!
//! Thin translation of the [`ComputeBackend`](crate::backend::ComputeBackend)
//! surface onto `opencl3`. Every transfer is issued blocking and the native
//! status codes pass through unchanged, so the pipeline layer reports the
//! same symbolic names a raw OpenCL host program would.

use std::collections::HashMap;
use std::fmt;
use std::ptr;

use opencl3::command_queue::CommandQueue;
use opencl3::context::Context;
use opencl3::device::{CL_DEVICE_TYPE_ALL, Device};
use opencl3::error_codes::ClError;
use opencl3::kernel::Kernel;
use opencl3::memory::{
    Buffer, CL_MEM_OBJECT_IMAGE2D, CL_MEM_READ_ONLY, CL_MEM_WRITE_ONLY, CL_RGBA, CL_UNORM_INT8, Image,
    cl_image_desc, cl_image_format,
};
use opencl3::platform::{Platform, get_platforms};
use opencl3::program::Program;
use opencl3::types::{CL_BLOCKING, cl_mem};
use parking_lot::Mutex;
use tracing::debug;

use crate::backend::{
    AccessMode, BackendResult, ComputeBackend, ContextHandle, DeviceHandle, DeviceInfoKey, ImageDesc, KernelHandle,
    MemHandle, PlatformHandle, ProgramHandle, QueueHandle,
};
use crate::status::Status;

fn status(err: ClError) -> Status {
    Status(err.0)
}

/// Blocking read of a full 2-D image into a flat row-major host buffer.
fn read_whole_image(queue: &CommandQueue, image: &mut Image, desc: ImageDesc, out: &mut [u8]) -> BackendResult<()> {
    if out.len() != desc.byte_len() {
        return Err(Status::INVALID_VALUE);
    }
    let origin = [0usize, 0, 0];
    let region = [desc.width, desc.height, 1];
    unsafe {
        queue.enqueue_read_image(image, CL_BLOCKING, origin.as_ptr(), region.as_ptr(), 0, 0, out.as_mut_ptr().cast(), &[])
    }
    .map_err(status)
    .map(|_| ())
}

enum ClObject {
    Context(Context),
    Queue(CommandQueue),
    Program(Program),
    Kernel(Kernel),
    Buffer(Buffer<u8>),
    Image(Image, ImageDesc),
}

#[derive(Default)]
struct OpenClState {
    platforms: Option<Vec<Platform>>,
    devices: Vec<Device>,
    objects: HashMap<u64, ClObject>,
    next_id: u64,
}

impl OpenClState {
    fn platform(&mut self, handle: PlatformHandle) -> BackendResult<Platform> {
        let platforms = match &self.platforms {
            Some(platforms) => platforms,
            None => {
                self.platforms = Some(get_platforms().map_err(status)?);
                self.platforms.as_ref().ok_or(Status::OUT_OF_HOST_MEMORY)?
            }
        };
        platforms.get(handle.raw() as usize).copied().ok_or(Status::INVALID_PLATFORM)
    }

    fn device(&self, handle: DeviceHandle) -> BackendResult<Device> {
        self.devices.get(handle.raw() as usize).copied().ok_or(Status::INVALID_DEVICE)
    }

    fn insert(&mut self, object: ClObject) -> u64 {
        self.next_id += 1;
        let id = self.next_id;
        self.objects.insert(id, object);
        id
    }
}

/// OpenCL backend driving the installed ICD.
pub struct OpenClBackend {
    state: Mutex<OpenClState>,
}

impl fmt::Debug for OpenClBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenClBackend").field("objects", &self.state.lock().objects.len()).finish()
    }
}

impl Default for OpenClBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl OpenClBackend {
    pub fn new() -> Self {
        Self { state: Mutex::new(OpenClState::default()) }
    }
}

impl ComputeBackend for OpenClBackend {
    fn name(&self) -> &'static str {
        "opencl"
    }

    fn platforms(&self) -> BackendResult<Vec<PlatformHandle>> {
        let mut state = self.state.lock();
        if state.platforms.is_none() {
            state.platforms = Some(get_platforms().map_err(status)?);
        }
        let count = state.platforms.as_ref().map_or(0, Vec::len);
        Ok((0..count as u64).map(PlatformHandle::from_raw).collect())
    }

    fn device_count(&self, platform: PlatformHandle) -> BackendResult<u32> {
        let mut state = self.state.lock();
        let platform = state.platform(platform)?;
        match platform.get_devices(CL_DEVICE_TYPE_ALL) {
            Ok(ids) => Ok(ids.len() as u32),
            // Zero devices of the requested type is reported as an error by
            // the driver; the registry treats it as an empty platform.
            Err(err) if status(err) == Status::DEVICE_NOT_FOUND => Ok(0),
            Err(err) => Err(status(err)),
        }
    }

    fn first_device(&self, platform: PlatformHandle) -> BackendResult<DeviceHandle> {
        let mut state = self.state.lock();
        let platform = state.platform(platform)?;
        let ids = platform.get_devices(CL_DEVICE_TYPE_ALL).map_err(status)?;
        let first = ids.first().copied().ok_or(Status::DEVICE_NOT_FOUND)?;
        state.devices.push(Device::new(first));
        Ok(DeviceHandle::from_raw(state.devices.len() as u64 - 1))
    }

    fn device_info(&self, device: DeviceHandle, key: DeviceInfoKey) -> BackendResult<String> {
        let state = self.state.lock();
        let device = state.device(device)?;
        match key {
            DeviceInfoKey::Name => device.name().map_err(status),
            DeviceInfoKey::SourceVersion => device.opencl_c_version().map_err(status),
            DeviceInfoKey::ComputeUnits => device.max_compute_units().map(|n| n.to_string()).map_err(status),
        }
    }

    fn create_context(&self, device: DeviceHandle) -> BackendResult<ContextHandle> {
        let mut state = self.state.lock();
        let device = state.device(device)?;
        let context = Context::from_device(&device).map_err(status)?;
        Ok(ContextHandle::from_raw(state.insert(ClObject::Context(context))))
    }

    fn create_queue(&self, context: ContextHandle, device: DeviceHandle) -> BackendResult<QueueHandle> {
        let mut state = self.state.lock();
        let device_id = state.device(device)?.id();
        let queue = {
            let Some(ClObject::Context(context)) = state.objects.get(&context.raw()) else {
                return Err(Status::INVALID_CONTEXT);
            };
            #[allow(deprecated)]
            CommandQueue::create(context, device_id, 0).map_err(status)?
        };
        Ok(QueueHandle::from_raw(state.insert(ClObject::Queue(queue))))
    }

    fn create_program(&self, context: ContextHandle, source: &str) -> BackendResult<ProgramHandle> {
        let mut state = self.state.lock();
        let program = {
            let Some(ClObject::Context(context)) = state.objects.get(&context.raw()) else {
                return Err(Status::INVALID_CONTEXT);
            };
            Program::create_from_source(context, source).map_err(status)?
        };
        Ok(ProgramHandle::from_raw(state.insert(ClObject::Program(program))))
    }

    fn build_program(&self, program: ProgramHandle, device: DeviceHandle, options: &str) -> BackendResult<()> {
        let mut state = self.state.lock();
        let device_id = state.device(device)?.id();
        let Some(ClObject::Program(program)) = state.objects.get_mut(&program.raw()) else {
            return Err(Status::INVALID_PROGRAM);
        };
        program.build(&[device_id], options).map_err(status)
    }

    fn build_log(&self, program: ProgramHandle, device: DeviceHandle) -> BackendResult<String> {
        let state = self.state.lock();
        let device_id = state.device(device)?.id();
        let Some(ClObject::Program(program)) = state.objects.get(&program.raw()) else {
            return Err(Status::INVALID_PROGRAM);
        };
        program.get_build_log(device_id).map_err(status)
    }

    fn create_kernel(&self, program: ProgramHandle, entry: &str) -> BackendResult<KernelHandle> {
        let mut state = self.state.lock();
        let kernel = {
            let Some(ClObject::Program(program)) = state.objects.get(&program.raw()) else {
                return Err(Status::INVALID_PROGRAM);
            };
            Kernel::create(program, entry).map_err(status)?
        };
        Ok(KernelHandle::from_raw(state.insert(ClObject::Kernel(kernel))))
    }

    fn create_buffer(&self, context: ContextHandle, size: usize, mode: AccessMode) -> BackendResult<MemHandle> {
        let mut state = self.state.lock();
        let flags = match mode {
            AccessMode::ReadOnly => CL_MEM_READ_ONLY,
            AccessMode::WriteOnly => CL_MEM_WRITE_ONLY,
        };
        let buffer = {
            let Some(ClObject::Context(context)) = state.objects.get(&context.raw()) else {
                return Err(Status::INVALID_CONTEXT);
            };
            unsafe { Buffer::<u8>::create(context, flags, size, ptr::null_mut()) }.map_err(status)?
        };
        Ok(MemHandle::from_raw(state.insert(ClObject::Buffer(buffer))))
    }

    fn create_image(&self, context: ContextHandle, desc: ImageDesc, mode: AccessMode) -> BackendResult<MemHandle> {
        let mut state = self.state.lock();
        let flags = match mode {
            AccessMode::ReadOnly => CL_MEM_READ_ONLY,
            AccessMode::WriteOnly => CL_MEM_WRITE_ONLY,
        };
        let format = cl_image_format { image_channel_order: CL_RGBA, image_channel_data_type: CL_UNORM_INT8 };
        let image_desc = cl_image_desc {
            image_type: CL_MEM_OBJECT_IMAGE2D,
            image_width: desc.width,
            image_height: desc.height,
            image_depth: 1,
            image_array_size: 1,
            image_row_pitch: 0,
            image_slice_pitch: 0,
            num_mip_levels: 0,
            num_samples: 0,
            buffer: ptr::null_mut(),
        };
        let image = {
            let Some(ClObject::Context(context)) = state.objects.get(&context.raw()) else {
                return Err(Status::INVALID_CONTEXT);
            };
            unsafe { Image::create(context, flags, &format, &image_desc, ptr::null_mut()) }.map_err(status)?
        };
        Ok(MemHandle::from_raw(state.insert(ClObject::Image(image, desc))))
    }

    fn set_kernel_arg(&self, kernel: KernelHandle, index: u32, mem: MemHandle) -> BackendResult<()> {
        let state = self.state.lock();
        let raw: cl_mem = match state.objects.get(&mem.raw()) {
            Some(ClObject::Buffer(buffer)) => buffer.get(),
            Some(ClObject::Image(image, _)) => image.get(),
            _ => return Err(Status::INVALID_MEM_OBJECT),
        };
        let Some(ClObject::Kernel(kernel)) = state.objects.get(&kernel.raw()) else {
            return Err(Status::INVALID_KERNEL);
        };
        unsafe { kernel.set_arg(index, &raw) }.map_err(status).map(|_| ())
    }

    fn enqueue_write_buffer(&self, queue: QueueHandle, mem: MemHandle, data: &[u8]) -> BackendResult<()> {
        let mut state = self.state.lock();
        // Take the buffer out of the table so queue and buffer can be
        // borrowed at the same time; reinserted below on every path.
        let mut object = state.objects.remove(&mem.raw()).ok_or(Status::INVALID_MEM_OBJECT)?;
        let result = match (&mut object, state.objects.get(&queue.raw())) {
            (ClObject::Buffer(buffer), Some(ClObject::Queue(queue))) => {
                unsafe { queue.enqueue_write_buffer(buffer, CL_BLOCKING, 0, data, &[]) }
                    .map_err(status)
                    .map(|_| ())
            }
            (ClObject::Buffer(_), _) => Err(Status::INVALID_COMMAND_QUEUE),
            _ => Err(Status::INVALID_MEM_OBJECT),
        };
        state.objects.insert(mem.raw(), object);
        result
    }

    fn enqueue_read_buffer(&self, queue: QueueHandle, mem: MemHandle, out: &mut [u8]) -> BackendResult<()> {
        let mut state = self.state.lock();
        let mut object = state.objects.remove(&mem.raw()).ok_or(Status::INVALID_MEM_OBJECT)?;
        let result = match (&mut object, state.objects.get(&queue.raw())) {
            (ClObject::Buffer(buffer), Some(ClObject::Queue(queue))) => {
                unsafe { queue.enqueue_read_buffer(buffer, CL_BLOCKING, 0, out, &[]) }
                    .map_err(status)
                    .map(|_| ())
            }
            (ClObject::Buffer(_), _) => Err(Status::INVALID_COMMAND_QUEUE),
            _ => Err(Status::INVALID_MEM_OBJECT),
        };
        state.objects.insert(mem.raw(), object);
        result
    }

    fn enqueue_read_image(&self, queue: QueueHandle, mem: MemHandle, out: &mut [u8]) -> BackendResult<()> {
        let mut state = self.state.lock();
        let mut object = state.objects.remove(&mem.raw()).ok_or(Status::INVALID_MEM_OBJECT)?;
        let result = match (&mut object, state.objects.get(&queue.raw())) {
            (ClObject::Image(image, desc), Some(ClObject::Queue(queue))) => {
                let desc = *desc;
                read_whole_image(queue, image, desc, out)
            }
            (ClObject::Image(..), _) => Err(Status::INVALID_COMMAND_QUEUE),
            _ => Err(Status::INVALID_MEM_OBJECT),
        };
        state.objects.insert(mem.raw(), object);
        result
    }

    fn enqueue_kernel(
        &self,
        queue: QueueHandle,
        kernel: KernelHandle,
        work_dim: u32,
        global: [usize; 2],
        local: Option<[usize; 2]>,
    ) -> BackendResult<()> {
        let state = self.state.lock();
        let kernel_raw = match state.objects.get(&kernel.raw()) {
            Some(ClObject::Kernel(kernel)) => kernel.get(),
            _ => return Err(Status::INVALID_KERNEL),
        };
        let Some(ClObject::Queue(queue)) = state.objects.get(&queue.raw()) else {
            return Err(Status::INVALID_COMMAND_QUEUE);
        };
        debug!(work_dim, ?global, ?local, "enqueue ND-range kernel");
        let local_ptr = local.as_ref().map_or(ptr::null(), |l| l.as_ptr());
        let result = unsafe {
            queue.enqueue_nd_range_kernel(kernel_raw, work_dim, ptr::null(), global.as_ptr(), local_ptr, &[])
        };
        result.map_err(status).map(|_| ())
    }

    fn flush(&self, queue: QueueHandle) -> BackendResult<()> {
        let state = self.state.lock();
        let Some(ClObject::Queue(queue)) = state.objects.get(&queue.raw()) else {
            return Err(Status::INVALID_COMMAND_QUEUE);
        };
        queue.flush().map_err(status)
    }

    fn finish(&self, queue: QueueHandle) -> BackendResult<()> {
        let state = self.state.lock();
        let Some(ClObject::Queue(queue)) = state.objects.get(&queue.raw()) else {
            return Err(Status::INVALID_COMMAND_QUEUE);
        };
        queue.finish().map_err(status)
    }

    fn release_context(&self, context: ContextHandle) -> BackendResult<()> {
        let mut state = self.state.lock();
        match state.objects.get(&context.raw()) {
            Some(ClObject::Context(_)) => {
                state.objects.remove(&context.raw());
                Ok(())
            }
            _ => Err(Status::INVALID_CONTEXT),
        }
    }

    fn release_queue(&self, queue: QueueHandle) -> BackendResult<()> {
        let mut state = self.state.lock();
        match state.objects.get(&queue.raw()) {
            Some(ClObject::Queue(_)) => {
                state.objects.remove(&queue.raw());
                Ok(())
            }
            _ => Err(Status::INVALID_COMMAND_QUEUE),
        }
    }

    fn release_program(&self, program: ProgramHandle) -> BackendResult<()> {
        let mut state = self.state.lock();
        match state.objects.get(&program.raw()) {
            Some(ClObject::Program(_)) => {
                state.objects.remove(&program.raw());
                Ok(())
            }
            _ => Err(Status::INVALID_PROGRAM),
        }
    }

    fn release_kernel(&self, kernel: KernelHandle) -> BackendResult<()> {
        let mut state = self.state.lock();
        match state.objects.get(&kernel.raw()) {
            Some(ClObject::Kernel(_)) => {
                state.objects.remove(&kernel.raw());
                Ok(())
            }
            _ => Err(Status::INVALID_KERNEL),
        }
    }

    fn release_mem(&self, mem: MemHandle) -> BackendResult<()> {
        let mut state = self.state.lock();
        match state.objects.get(&mem.raw()) {
            Some(ClObject::Buffer(_) | ClObject::Image(..)) => {
                state.objects.remove(&mem.raw());
                Ok(())
            }
            _ => Err(Status::INVALID_MEM_OBJECT),
        }
    }
}
