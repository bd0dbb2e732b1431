//! In-process host backend.
//!
//! Emulates the compute runtime on the host so the whole dispatch pipeline
//! can run (and be tested) without a real driver. Kernel source is treated
//! as opaque text except for entry-point discovery: building a program scans
//! for `__kernel void <name>(` declarations and records them. Executable
//! entries are backed by registered host closures, invoked once per work
//! item with positional argument slots staged by access mode.
//!
//! All operations complete before returning, matching the blocking contract
//! of [`ComputeBackend`](crate::backend::ComputeBackend).

use std::collections::HashMap;
use std::fmt;
use std::fmt::Write as _;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use tracing::debug;

use crate::backend::{
    AccessMode, BackendResult, ComputeBackend, ContextHandle, DeviceHandle, DeviceInfoKey, ImageDesc, KernelHandle,
    MemHandle, PlatformHandle, ProgramHandle, QueueHandle,
};
use crate::status::Status;

/// One work item of a host dispatch.
#[derive(Clone, Copy, Debug)]
pub struct WorkItem {
    /// Global id per dimension (second component is 0 for 1-D dispatches).
    pub id: [usize; 2],
    /// Total global extent of the dispatch.
    pub global: [usize; 2],
}

/// A host kernel body, invoked once per work item.
pub type HostKernelFn = Arc<dyn Fn(&mut HostArgs<'_>, WorkItem) -> Result<(), Status> + Send + Sync>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum MemKind {
    Buffer,
    Image { width: usize },
}

/// One positional kernel argument staged for a dispatch.
struct ArgSlot {
    bytes: Vec<u8>,
    mode: AccessMode,
    kind: MemKind,
}

/// Positional argument view handed to host kernel bodies.
///
/// Slots enforce the declared access mode from the device side: a kernel may
/// only read `ReadOnly` slots and only write `WriteOnly` slots; anything
/// else yields `CL_INVALID_OPERATION`.
pub struct HostArgs<'a> {
    slots: &'a mut [ArgSlot],
}

impl HostArgs<'_> {
    fn slot(&self, index: usize) -> Result<&ArgSlot, Status> {
        self.slots.get(index).ok_or(Status::INVALID_ARG_INDEX)
    }

    /// Raw bytes of a kernel-input slot.
    pub fn read(&self, index: usize) -> Result<&[u8], Status> {
        let slot = self.slot(index)?;
        if slot.mode != AccessMode::ReadOnly {
            return Err(Status::INVALID_OPERATION);
        }
        Ok(&slot.bytes)
    }

    /// Raw bytes of a kernel-output slot.
    pub fn write(&mut self, index: usize) -> Result<&mut [u8], Status> {
        let slot = self.slots.get_mut(index).ok_or(Status::INVALID_ARG_INDEX)?;
        if slot.mode != AccessMode::WriteOnly {
            return Err(Status::INVALID_OPERATION);
        }
        Ok(&mut slot.bytes)
    }

    /// Read element `element` of an i32 input buffer (little-endian).
    pub fn read_i32(&self, index: usize, element: usize) -> Result<i32, Status> {
        let bytes = self.read(index)?;
        let offset = element * 4;
        let raw = bytes.get(offset..offset + 4).ok_or(Status::INVALID_VALUE)?;
        Ok(i32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]))
    }

    /// Write element `element` of an i32 output buffer.
    pub fn write_i32(&mut self, index: usize, element: usize, value: i32) -> Result<(), Status> {
        let bytes = self.write(index)?;
        let offset = element * 4;
        let raw = bytes.get_mut(offset..offset + 4).ok_or(Status::INVALID_VALUE)?;
        raw.copy_from_slice(&value.to_le_bytes());
        Ok(())
    }

    /// Write one RGBA pixel of an output image.
    pub fn write_rgba(&mut self, index: usize, x: usize, y: usize, pixel: [u8; 4]) -> Result<(), Status> {
        let width = match self.slot(index)?.kind {
            MemKind::Image { width } => width,
            MemKind::Buffer => return Err(Status::INVALID_MEM_OBJECT),
        };
        let bytes = self.write(index)?;
        let offset = (y * width + x) * 4;
        let raw = bytes.get_mut(offset..offset + 4).ok_or(Status::INVALID_VALUE)?;
        raw.copy_from_slice(&pixel);
        Ok(())
    }
}

enum HostObject {
    Context {
        device: DeviceHandle,
    },
    Queue {
        context: ContextHandle,
    },
    Program {
        source: String,
        entries: Vec<String>,
        built: bool,
        log: String,
    },
    Kernel {
        body: HostKernelFn,
        entry: String,
        args: Vec<Option<MemHandle>>,
    },
    Mem {
        mode: AccessMode,
        kind: MemKind,
        bytes: Vec<u8>,
    },
}

/// Built-in kernel bodies available in every host backend instance.
///
/// `vector_add` and `copy_i32` operate on i32 buffers; `fill_gradient`
/// writes an RGBA gradient into a 2-D image, keyed off the work item's
/// position in the global extent.
static BUILTINS: Lazy<HashMap<&'static str, HostKernelFn>> = Lazy::new(|| {
    let mut map: HashMap<&'static str, HostKernelFn> = HashMap::new();

    map.insert(
        "vector_add",
        Arc::new(|args: &mut HostArgs<'_>, item: WorkItem| {
            let i = item.id[0];
            let a = args.read_i32(0, i)?;
            let b = args.read_i32(1, i)?;
            args.write_i32(2, i, a.wrapping_add(b))
        }),
    );

    map.insert(
        "copy_i32",
        Arc::new(|args: &mut HostArgs<'_>, item: WorkItem| {
            let i = item.id[0];
            let value = args.read_i32(0, i)?;
            args.write_i32(1, i, value)
        }),
    );

    map.insert(
        "fill_gradient",
        Arc::new(|args: &mut HostArgs<'_>, item: WorkItem| {
            let [x, y] = item.id;
            let [w, h] = item.global;
            let r = (x * 255 / w.max(1)) as u8;
            let g = (y * 255 / h.max(1)) as u8;
            args.write_rgba(0, x, y, [r, g, 128, 255])
        }),
    );

    map
});

/// Host emulation of a compute runtime.
///
/// The default topology is one platform with one device; tests can shape
/// arbitrary topologies (including empty platforms) via `with_topology`.
pub struct HostBackend {
    /// Device count per platform, indexed by platform id.
    topology: Vec<u32>,
    objects: Mutex<HashMap<u64, HostObject>>,
    kernels: Mutex<HashMap<String, HostKernelFn>>,
    next_id: AtomicU64,
}

impl fmt::Debug for HostBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostBackend")
            .field("topology", &self.topology)
            .field("objects", &self.objects.lock().len())
            .finish()
    }
}

impl Default for HostBackend {
    fn default() -> Self {
        Self::new()
    }
}

const PLATFORM_SHIFT: u64 = 32;

fn pack_device(platform: u64, index: u64) -> DeviceHandle {
    DeviceHandle::from_raw((platform << PLATFORM_SHIFT) | index)
}

fn unpack_device(device: DeviceHandle) -> (u64, u64) {
    let raw = device.raw();
    (raw >> PLATFORM_SHIFT, raw & ((1 << PLATFORM_SHIFT) - 1))
}

impl HostBackend {
    pub fn new() -> Self {
        Self::with_topology(&[1])
    }

    /// Build a backend with the given per-platform device counts.
    pub fn with_topology(device_counts: &[u32]) -> Self {
        let kernels = BUILTINS.iter().map(|(name, body)| (name.to_string(), Arc::clone(body))).collect();
        Self {
            topology: device_counts.to_vec(),
            objects: Mutex::new(HashMap::new()),
            kernels: Mutex::new(kernels),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register (or replace) an executable kernel body.
    pub fn register_kernel(&self, name: &str, body: HostKernelFn) {
        self.kernels.lock().insert(name.to_string(), body);
    }

    fn insert(&self, object: HostObject) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.objects.lock().insert(id, object);
        id
    }

    fn device_valid(&self, device: DeviceHandle) -> bool {
        let (platform, index) = unpack_device(device);
        self.topology.get(platform as usize).is_some_and(|&count| index < u64::from(count))
    }
}

/// Scan kernel source for `__kernel void <name>(` entry declarations.
///
/// Returns the entry names in source order, or a non-empty build log when
/// no well-formed entry exists.
fn scan_entries(source: &str) -> Result<Vec<String>, String> {
    if source.trim().is_empty() {
        return Err("build error: source text is empty\n".to_string());
    }

    let mut entries = Vec::new();
    let mut log = String::new();
    for (offset, _) in source.match_indices("__kernel") {
        let rest = source[offset + "__kernel".len()..].trim_start();
        let Some(rest) = rest.strip_prefix("void") else {
            let _ = writeln!(log, "{offset}: error: expected 'void' after '__kernel'");
            continue;
        };
        let rest = rest.trim_start();
        let name: String = rest.chars().take_while(|c| c.is_ascii_alphanumeric() || *c == '_').collect();
        if name.is_empty() || !rest[name.len()..].trim_start().starts_with('(') {
            let _ = writeln!(log, "{offset}: error: expected entry point name and parameter list");
            continue;
        }
        entries.push(name);
    }

    if entries.is_empty() {
        if log.is_empty() {
            log.push_str("build error: no __kernel entry points in source\n");
        }
        Err(log)
    } else {
        Ok(entries)
    }
}

impl ComputeBackend for HostBackend {
    fn name(&self) -> &'static str {
        "host"
    }

    fn platforms(&self) -> BackendResult<Vec<PlatformHandle>> {
        Ok((0..self.topology.len() as u64).map(PlatformHandle::from_raw).collect())
    }

    fn device_count(&self, platform: PlatformHandle) -> BackendResult<u32> {
        self.topology.get(platform.raw() as usize).copied().ok_or(Status::INVALID_PLATFORM)
    }

    fn first_device(&self, platform: PlatformHandle) -> BackendResult<DeviceHandle> {
        let count = self.device_count(platform)?;
        if count == 0 {
            return Err(Status::DEVICE_NOT_FOUND);
        }
        Ok(pack_device(platform.raw(), 0))
    }

    fn device_info(&self, device: DeviceHandle, key: DeviceInfoKey) -> BackendResult<String> {
        if !self.device_valid(device) {
            return Err(Status::INVALID_DEVICE);
        }
        Ok(match key {
            DeviceInfoKey::Name => "clrun host device".to_string(),
            DeviceInfoKey::SourceVersion => "OpenCL C 1.2 (host emulation)".to_string(),
            DeviceInfoKey::ComputeUnits => {
                std::thread::available_parallelism().map_or(1, usize::from).to_string()
            }
        })
    }

    fn create_context(&self, device: DeviceHandle) -> BackendResult<ContextHandle> {
        if !self.device_valid(device) {
            return Err(Status::INVALID_DEVICE);
        }
        Ok(ContextHandle::from_raw(self.insert(HostObject::Context { device })))
    }

    fn create_queue(&self, context: ContextHandle, device: DeviceHandle) -> BackendResult<QueueHandle> {
        if !self.device_valid(device) {
            return Err(Status::INVALID_DEVICE);
        }
        {
            let objects = self.objects.lock();
            match objects.get(&context.raw()) {
                Some(HostObject::Context { .. }) => {}
                _ => return Err(Status::INVALID_CONTEXT),
            }
        }
        Ok(QueueHandle::from_raw(self.insert(HostObject::Queue { context })))
    }

    fn create_program(&self, context: ContextHandle, source: &str) -> BackendResult<ProgramHandle> {
        {
            let objects = self.objects.lock();
            match objects.get(&context.raw()) {
                Some(HostObject::Context { .. }) => {}
                _ => return Err(Status::INVALID_CONTEXT),
            }
        }
        let program = HostObject::Program {
            source: source.to_string(),
            entries: Vec::new(),
            built: false,
            log: String::new(),
        };
        Ok(ProgramHandle::from_raw(self.insert(program)))
    }

    fn build_program(&self, program: ProgramHandle, device: DeviceHandle, _options: &str) -> BackendResult<()> {
        if !self.device_valid(device) {
            return Err(Status::INVALID_DEVICE);
        }
        let mut objects = self.objects.lock();
        let Some(HostObject::Program { source, entries, built, log }) = objects.get_mut(&program.raw()) else {
            return Err(Status::INVALID_PROGRAM);
        };
        match scan_entries(source) {
            Ok(found) => {
                debug!(entries = ?found, "host program built");
                *entries = found;
                *built = true;
                log.clear();
                Ok(())
            }
            Err(diagnostics) => {
                *built = false;
                *log = diagnostics;
                Err(Status::BUILD_PROGRAM_FAILURE)
            }
        }
    }

    fn build_log(&self, program: ProgramHandle, device: DeviceHandle) -> BackendResult<String> {
        if !self.device_valid(device) {
            return Err(Status::INVALID_DEVICE);
        }
        let objects = self.objects.lock();
        match objects.get(&program.raw()) {
            Some(HostObject::Program { log, .. }) => Ok(log.clone()),
            _ => Err(Status::INVALID_PROGRAM),
        }
    }

    fn create_kernel(&self, program: ProgramHandle, entry: &str) -> BackendResult<KernelHandle> {
        let body = {
            let objects = self.objects.lock();
            let Some(HostObject::Program { entries, built, .. }) = objects.get(&program.raw()) else {
                return Err(Status::INVALID_PROGRAM);
            };
            if !built {
                return Err(Status::INVALID_PROGRAM_EXECUTABLE);
            }
            if !entries.iter().any(|e| e == entry) {
                return Err(Status::INVALID_KERNEL_NAME);
            }
            // An entry without a registered body exists in the source but
            // cannot be executed by the emulation; report it as missing.
            self.kernels.lock().get(entry).cloned().ok_or(Status::INVALID_KERNEL_NAME)?
        };
        let kernel = HostObject::Kernel { body, entry: entry.to_string(), args: Vec::new() };
        Ok(KernelHandle::from_raw(self.insert(kernel)))
    }

    fn create_buffer(&self, context: ContextHandle, size: usize, mode: AccessMode) -> BackendResult<MemHandle> {
        {
            let objects = self.objects.lock();
            match objects.get(&context.raw()) {
                Some(HostObject::Context { .. }) => {}
                _ => return Err(Status::INVALID_CONTEXT),
            }
        }
        if size == 0 {
            return Err(Status::INVALID_VALUE);
        }
        let mem = HostObject::Mem { mode, kind: MemKind::Buffer, bytes: vec![0; size] };
        Ok(MemHandle::from_raw(self.insert(mem)))
    }

    fn create_image(&self, context: ContextHandle, desc: ImageDesc, mode: AccessMode) -> BackendResult<MemHandle> {
        {
            let objects = self.objects.lock();
            match objects.get(&context.raw()) {
                Some(HostObject::Context { .. }) => {}
                _ => return Err(Status::INVALID_CONTEXT),
            }
        }
        if desc.width == 0 || desc.height == 0 {
            return Err(Status::INVALID_IMAGE_SIZE);
        }
        let mem = HostObject::Mem {
            mode,
            kind: MemKind::Image { width: desc.width },
            bytes: vec![0; desc.byte_len()],
        };
        Ok(MemHandle::from_raw(self.insert(mem)))
    }

    fn set_kernel_arg(&self, kernel: KernelHandle, index: u32, mem: MemHandle) -> BackendResult<()> {
        let mut objects = self.objects.lock();
        match objects.get(&mem.raw()) {
            Some(HostObject::Mem { .. }) => {}
            _ => return Err(Status::INVALID_MEM_OBJECT),
        }
        let Some(HostObject::Kernel { args, .. }) = objects.get_mut(&kernel.raw()) else {
            return Err(Status::INVALID_KERNEL);
        };
        let slot = index as usize;
        if slot >= args.len() {
            args.resize(slot + 1, None);
        }
        args[slot] = Some(mem);
        Ok(())
    }

    fn enqueue_write_buffer(&self, queue: QueueHandle, mem: MemHandle, data: &[u8]) -> BackendResult<()> {
        let mut objects = self.objects.lock();
        match objects.get(&queue.raw()) {
            Some(HostObject::Queue { .. }) => {}
            _ => return Err(Status::INVALID_COMMAND_QUEUE),
        }
        let Some(HostObject::Mem { kind: MemKind::Buffer, bytes, .. }) = objects.get_mut(&mem.raw()) else {
            return Err(Status::INVALID_MEM_OBJECT);
        };
        if data.len() != bytes.len() {
            return Err(Status::INVALID_VALUE);
        }
        bytes.copy_from_slice(data);
        Ok(())
    }

    fn enqueue_read_buffer(&self, queue: QueueHandle, mem: MemHandle, out: &mut [u8]) -> BackendResult<()> {
        let objects = self.objects.lock();
        match objects.get(&queue.raw()) {
            Some(HostObject::Queue { .. }) => {}
            _ => return Err(Status::INVALID_COMMAND_QUEUE),
        }
        let Some(HostObject::Mem { kind: MemKind::Buffer, bytes, .. }) = objects.get(&mem.raw()) else {
            return Err(Status::INVALID_MEM_OBJECT);
        };
        if out.len() != bytes.len() {
            return Err(Status::INVALID_VALUE);
        }
        out.copy_from_slice(bytes);
        Ok(())
    }

    fn enqueue_read_image(&self, queue: QueueHandle, mem: MemHandle, out: &mut [u8]) -> BackendResult<()> {
        let objects = self.objects.lock();
        match objects.get(&queue.raw()) {
            Some(HostObject::Queue { .. }) => {}
            _ => return Err(Status::INVALID_COMMAND_QUEUE),
        }
        let Some(HostObject::Mem { kind: MemKind::Image { .. }, bytes, .. }) = objects.get(&mem.raw()) else {
            return Err(Status::INVALID_MEM_OBJECT);
        };
        if out.len() != bytes.len() {
            return Err(Status::INVALID_VALUE);
        }
        out.copy_from_slice(bytes);
        Ok(())
    }

    fn enqueue_kernel(
        &self,
        queue: QueueHandle,
        kernel: KernelHandle,
        work_dim: u32,
        global: [usize; 2],
        local: Option<[usize; 2]>,
    ) -> BackendResult<()> {
        if !(1..=2).contains(&work_dim) {
            return Err(Status::INVALID_WORK_DIMENSION);
        }
        if global[..work_dim as usize].iter().any(|&g| g == 0) {
            return Err(Status::INVALID_GLOBAL_WORK_SIZE);
        }
        if let Some(local) = local {
            for dim in 0..work_dim as usize {
                if local[dim] == 0 || !global[dim].is_multiple_of(local[dim]) {
                    return Err(Status::INVALID_WORK_GROUP_SIZE);
                }
            }
        }

        // Stage argument slots under the lock, then run without it.
        let (body, mut slots, arg_mems) = {
            let objects = self.objects.lock();
            match objects.get(&queue.raw()) {
                Some(HostObject::Queue { .. }) => {}
                _ => return Err(Status::INVALID_COMMAND_QUEUE),
            }
            let Some(HostObject::Kernel { body, args, entry }) = objects.get(&kernel.raw()) else {
                return Err(Status::INVALID_KERNEL);
            };
            let mut arg_mems = Vec::with_capacity(args.len());
            for &arg in args {
                arg_mems.push(arg.ok_or(Status::INVALID_KERNEL_ARGS)?);
            }
            let mut slots = Vec::with_capacity(arg_mems.len());
            for mem in &arg_mems {
                let Some(HostObject::Mem { mode, kind, bytes }) = objects.get(&mem.raw()) else {
                    return Err(Status::INVALID_MEM_OBJECT);
                };
                slots.push(ArgSlot { bytes: bytes.clone(), mode: *mode, kind: *kind });
            }
            debug!(entry = %entry, ?global, ?local, "host dispatch");
            (Arc::clone(body), slots, arg_mems)
        };

        let rows = if work_dim == 2 { global[1] } else { 1 };
        for y in 0..rows {
            for x in 0..global[0] {
                let item = WorkItem { id: [x, y], global };
                body(&mut HostArgs { slots: &mut slots }, item)?;
            }
        }

        // Copy output slots back into their memory objects.
        let mut objects = self.objects.lock();
        for (mem, slot) in arg_mems.iter().zip(slots) {
            if slot.mode != AccessMode::WriteOnly {
                continue;
            }
            let Some(HostObject::Mem { bytes, .. }) = objects.get_mut(&mem.raw()) else {
                return Err(Status::INVALID_MEM_OBJECT);
            };
            *bytes = slot.bytes;
        }
        Ok(())
    }

    fn flush(&self, queue: QueueHandle) -> BackendResult<()> {
        let objects = self.objects.lock();
        match objects.get(&queue.raw()) {
            Some(HostObject::Queue { .. }) => Ok(()),
            _ => Err(Status::INVALID_COMMAND_QUEUE),
        }
    }

    fn finish(&self, queue: QueueHandle) -> BackendResult<()> {
        // Everything executes eagerly; an existing queue is always drained.
        self.flush(queue)
    }

    fn release_context(&self, context: ContextHandle) -> BackendResult<()> {
        let mut objects = self.objects.lock();
        match objects.get(&context.raw()) {
            Some(HostObject::Context { .. }) => {
                objects.remove(&context.raw());
                Ok(())
            }
            _ => Err(Status::INVALID_CONTEXT),
        }
    }

    fn release_queue(&self, queue: QueueHandle) -> BackendResult<()> {
        let mut objects = self.objects.lock();
        match objects.get(&queue.raw()) {
            Some(HostObject::Queue { .. }) => {
                objects.remove(&queue.raw());
                Ok(())
            }
            _ => Err(Status::INVALID_COMMAND_QUEUE),
        }
    }

    fn release_program(&self, program: ProgramHandle) -> BackendResult<()> {
        let mut objects = self.objects.lock();
        match objects.get(&program.raw()) {
            Some(HostObject::Program { .. }) => {
                objects.remove(&program.raw());
                Ok(())
            }
            _ => Err(Status::INVALID_PROGRAM),
        }
    }

    fn release_kernel(&self, kernel: KernelHandle) -> BackendResult<()> {
        let mut objects = self.objects.lock();
        match objects.get(&kernel.raw()) {
            Some(HostObject::Kernel { .. }) => {
                objects.remove(&kernel.raw());
                Ok(())
            }
            _ => Err(Status::INVALID_KERNEL),
        }
    }

    fn release_mem(&self, mem: MemHandle) -> BackendResult<()> {
        let mut objects = self.objects.lock();
        match objects.get(&mem.raw()) {
            Some(HostObject::Mem { .. }) => {
                objects.remove(&mem.raw());
                Ok(())
            }
            _ => Err(Status::INVALID_MEM_OBJECT),
        }
    }
}
