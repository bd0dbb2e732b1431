use std::sync::Arc;

use crate::backend::{AccessMode, ComputeBackend, ContextHandle, DeviceHandle, DeviceInfoKey, ImageDesc, QueueHandle};
use crate::host::HostBackend;
use crate::status::Status;

const VECTOR_ADD_SRC: &str = r#"
__kernel void vector_add(__global const int* a, __global const int* b, __global int* out) {
    int i = get_global_id(0);
    out[i] = a[i] + b[i];
}
"#;

fn setup() -> (HostBackend, DeviceHandle, ContextHandle, QueueHandle) {
    let backend = HostBackend::new();
    let platform = backend.platforms().unwrap()[0];
    let device = backend.first_device(platform).unwrap();
    let context = backend.create_context(device).unwrap();
    let queue = backend.create_queue(context, device).unwrap();
    (backend, device, context, queue)
}

fn i32s_to_bytes(values: &[i32]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
}

fn bytes_to_i32s(bytes: &[u8]) -> Vec<i32> {
    bytes.chunks_exact(4).map(|c| i32::from_le_bytes([c[0], c[1], c[2], c[3]])).collect()
}

#[test]
fn topology_enumeration() {
    let backend = HostBackend::with_topology(&[0, 2, 1]);
    let platforms = backend.platforms().unwrap();
    assert_eq!(platforms.len(), 3);
    assert_eq!(backend.device_count(platforms[0]).unwrap(), 0);
    assert_eq!(backend.device_count(platforms[1]).unwrap(), 2);
    assert_eq!(backend.first_device(platforms[0]).unwrap_err(), Status::DEVICE_NOT_FOUND);
    backend.first_device(platforms[1]).unwrap();
}

#[test]
fn invalid_platform_is_distinct_from_empty() {
    let backend = HostBackend::with_topology(&[1]);
    let bogus = crate::backend::PlatformHandle::from_raw(42);
    assert_eq!(backend.device_count(bogus).unwrap_err(), Status::INVALID_PLATFORM);
}

#[test]
fn device_info_queries() {
    let (backend, device, _, _) = setup();
    assert!(!backend.device_info(device, DeviceInfoKey::Name).unwrap().is_empty());
    assert!(backend.device_info(device, DeviceInfoKey::SourceVersion).unwrap().contains("OpenCL C"));
    let units: usize = backend.device_info(device, DeviceInfoKey::ComputeUnits).unwrap().parse().unwrap();
    assert!(units >= 1);

    let bogus = DeviceHandle::from_raw(u64::MAX);
    assert_eq!(backend.device_info(bogus, DeviceInfoKey::Name).unwrap_err(), Status::INVALID_DEVICE);
}

#[test]
fn build_records_entries() {
    let (backend, device, context, _) = setup();
    let program = backend.create_program(context, VECTOR_ADD_SRC).unwrap();
    backend.build_program(program, device, "").unwrap();
    assert!(backend.build_log(program, device).unwrap().is_empty());
    backend.create_kernel(program, "vector_add").unwrap();
}

#[test]
fn build_failure_keeps_full_log() {
    let (backend, device, context, _) = setup();
    let program = backend.create_program(context, "this is not kernel source").unwrap();
    assert_eq!(backend.build_program(program, device, "").unwrap_err(), Status::BUILD_PROGRAM_FAILURE);
    assert!(!backend.build_log(program, device).unwrap().is_empty());
}

#[test]
fn empty_source_fails_to_build() {
    let (backend, device, context, _) = setup();
    let program = backend.create_program(context, "   \n").unwrap();
    assert_eq!(backend.build_program(program, device, "").unwrap_err(), Status::BUILD_PROGRAM_FAILURE);
    assert!(backend.build_log(program, device).unwrap().contains("empty"));
}

#[test]
fn malformed_entry_declaration_is_diagnosed() {
    let (backend, device, context, _) = setup();
    let program = backend.create_program(context, "__kernel int broken() {}").unwrap();
    assert_eq!(backend.build_program(program, device, "").unwrap_err(), Status::BUILD_PROGRAM_FAILURE);
    assert!(backend.build_log(program, device).unwrap().contains("expected 'void'"));
}

#[test]
fn unknown_entry_name() {
    let (backend, device, context, _) = setup();
    let program = backend.create_program(context, VECTOR_ADD_SRC).unwrap();
    backend.build_program(program, device, "").unwrap();
    assert_eq!(backend.create_kernel(program, "missing").unwrap_err(), Status::INVALID_KERNEL_NAME);
}

#[test]
fn kernel_from_unbuilt_program() {
    let (backend, _, context, _) = setup();
    let program = backend.create_program(context, VECTOR_ADD_SRC).unwrap();
    assert_eq!(backend.create_kernel(program, "vector_add").unwrap_err(), Status::INVALID_PROGRAM_EXECUTABLE);
}

#[test]
fn buffer_write_read_roundtrip() {
    let (backend, _, context, queue) = setup();
    let data = i32s_to_bytes(&[5, -3, 7, 42]);
    let buffer = backend.create_buffer(context, data.len(), AccessMode::ReadOnly).unwrap();
    backend.enqueue_write_buffer(queue, buffer, &data).unwrap();
    let mut out = vec![0u8; data.len()];
    backend.enqueue_read_buffer(queue, buffer, &mut out).unwrap();
    assert_eq!(out, data);
}

#[test]
fn transfer_size_must_match_extent() {
    let (backend, _, context, queue) = setup();
    let buffer = backend.create_buffer(context, 16, AccessMode::ReadOnly).unwrap();
    assert_eq!(backend.enqueue_write_buffer(queue, buffer, &[0u8; 8]).unwrap_err(), Status::INVALID_VALUE);
}

#[test]
fn vector_add_dispatch() {
    let (backend, device, context, queue) = setup();
    let program = backend.create_program(context, VECTOR_ADD_SRC).unwrap();
    backend.build_program(program, device, "").unwrap();
    let kernel = backend.create_kernel(program, "vector_add").unwrap();

    let n = 16usize;
    let a: Vec<i32> = (0..n as i32).collect();
    let b = vec![10i32; n];
    let buf_a = backend.create_buffer(context, n * 4, AccessMode::ReadOnly).unwrap();
    let buf_b = backend.create_buffer(context, n * 4, AccessMode::ReadOnly).unwrap();
    let buf_out = backend.create_buffer(context, n * 4, AccessMode::WriteOnly).unwrap();

    backend.enqueue_write_buffer(queue, buf_a, &i32s_to_bytes(&a)).unwrap();
    backend.enqueue_write_buffer(queue, buf_b, &i32s_to_bytes(&b)).unwrap();
    backend.set_kernel_arg(kernel, 0, buf_a).unwrap();
    backend.set_kernel_arg(kernel, 1, buf_b).unwrap();
    backend.set_kernel_arg(kernel, 2, buf_out).unwrap();
    backend.enqueue_kernel(queue, kernel, 1, [n, 1], Some([4, 1])).unwrap();

    let mut out = vec![0u8; n * 4];
    backend.enqueue_read_buffer(queue, buf_out, &mut out).unwrap();
    backend.flush(queue).unwrap();
    backend.finish(queue).unwrap();

    let out = bytes_to_i32s(&out);
    for (i, value) in out.iter().enumerate() {
        assert_eq!(*value, i as i32 + 10);
    }
}

#[test]
fn unset_kernel_argument_is_rejected() {
    let (backend, device, context, queue) = setup();
    let program = backend.create_program(context, VECTOR_ADD_SRC).unwrap();
    backend.build_program(program, device, "").unwrap();
    let kernel = backend.create_kernel(program, "vector_add").unwrap();

    let buffer = backend.create_buffer(context, 16, AccessMode::WriteOnly).unwrap();
    // Slot 2 set, slots 0 and 1 left unbound.
    backend.set_kernel_arg(kernel, 2, buffer).unwrap();
    assert_eq!(backend.enqueue_kernel(queue, kernel, 1, [4, 1], None).unwrap_err(), Status::INVALID_KERNEL_ARGS);
}

#[test]
fn local_extent_must_divide_global() {
    let (backend, device, context, queue) = setup();
    let program = backend.create_program(context, VECTOR_ADD_SRC).unwrap();
    backend.build_program(program, device, "").unwrap();
    let kernel = backend.create_kernel(program, "vector_add").unwrap();
    for slot in 0..3 {
        let buffer = backend.create_buffer(context, 28, AccessMode::ReadOnly).unwrap();
        backend.set_kernel_arg(kernel, slot, buffer).unwrap();
    }
    assert_eq!(
        backend.enqueue_kernel(queue, kernel, 1, [7, 1], Some([2, 1])).unwrap_err(),
        Status::INVALID_WORK_GROUP_SIZE
    );
}

#[test]
fn kernel_access_mode_is_enforced_during_execution() {
    let (backend, device, context, queue) = setup();
    backend.register_kernel(
        "write_to_input",
        Arc::new(|args: &mut crate::host::HostArgs<'_>, item: crate::host::WorkItem| args.write_i32(0, item.id[0], 1)),
    );
    let program = backend.create_program(context, "__kernel void write_to_input(__global int* a) {}").unwrap();
    backend.build_program(program, device, "").unwrap();
    let kernel = backend.create_kernel(program, "write_to_input").unwrap();

    let buffer = backend.create_buffer(context, 16, AccessMode::ReadOnly).unwrap();
    backend.set_kernel_arg(kernel, 0, buffer).unwrap();
    assert_eq!(backend.enqueue_kernel(queue, kernel, 1, [4, 1], None).unwrap_err(), Status::INVALID_OPERATION);
}

#[test]
fn kernel_cannot_read_output_slot() {
    let (backend, device, context, queue) = setup();
    backend.register_kernel(
        "read_from_output",
        Arc::new(|args: &mut crate::host::HostArgs<'_>, item: crate::host::WorkItem| {
            args.read_i32(0, item.id[0]).map(|_| ())
        }),
    );
    let program = backend.create_program(context, "__kernel void read_from_output(__global int* a) {}").unwrap();
    backend.build_program(program, device, "").unwrap();
    let kernel = backend.create_kernel(program, "read_from_output").unwrap();

    let buffer = backend.create_buffer(context, 16, AccessMode::WriteOnly).unwrap();
    backend.set_kernel_arg(kernel, 0, buffer).unwrap();
    assert_eq!(backend.enqueue_kernel(queue, kernel, 1, [4, 1], None).unwrap_err(), Status::INVALID_OPERATION);
}

#[test]
fn gradient_image_dispatch() {
    let (backend, device, context, queue) = setup();
    let program = backend.create_program(context, "__kernel void fill_gradient(__write_only image2d_t img) {}").unwrap();
    backend.build_program(program, device, "").unwrap();
    let kernel = backend.create_kernel(program, "fill_gradient").unwrap();

    let desc = ImageDesc::rgba8(32, 16);
    let image = backend.create_image(context, desc, AccessMode::WriteOnly).unwrap();
    backend.set_kernel_arg(kernel, 0, image).unwrap();
    backend.enqueue_kernel(queue, kernel, 2, [32, 16], Some([8, 8])).unwrap();

    let mut pixels = vec![0u8; desc.byte_len()];
    backend.enqueue_read_image(queue, image, &mut pixels).unwrap();
    // Alpha is opaque everywhere; red grows along x.
    assert_eq!(pixels[3], 255);
    let last = (15 * 32 + 31) * 4;
    assert!(pixels[last] > pixels[0]);
}

#[test]
fn reading_image_as_buffer_is_rejected() {
    let (backend, _, context, queue) = setup();
    let image = backend.create_image(context, ImageDesc::rgba8(4, 4), AccessMode::WriteOnly).unwrap();
    let mut out = vec![0u8; 64];
    assert_eq!(backend.enqueue_read_buffer(queue, image, &mut out).unwrap_err(), Status::INVALID_MEM_OBJECT);
}

#[test]
fn double_release_is_detected() {
    let (backend, _, context, _) = setup();
    let buffer = backend.create_buffer(context, 16, AccessMode::ReadOnly).unwrap();
    backend.release_mem(buffer).unwrap();
    assert_eq!(backend.release_mem(buffer).unwrap_err(), Status::INVALID_MEM_OBJECT);
}

#[test]
fn use_after_release_is_detected() {
    let (backend, device, context, queue) = setup();
    let program = backend.create_program(context, VECTOR_ADD_SRC).unwrap();
    backend.build_program(program, device, "").unwrap();
    let kernel = backend.create_kernel(program, "vector_add").unwrap();

    let buffer = backend.create_buffer(context, 16, AccessMode::ReadOnly).unwrap();
    backend.set_kernel_arg(kernel, 0, buffer).unwrap();
    backend.set_kernel_arg(kernel, 1, buffer).unwrap();
    backend.set_kernel_arg(kernel, 2, buffer).unwrap();
    backend.release_mem(buffer).unwrap();
    assert_eq!(backend.enqueue_kernel(queue, kernel, 1, [4, 1], None).unwrap_err(), Status::INVALID_MEM_OBJECT);
}

#[test]
fn released_queue_rejects_work() {
    let (backend, _, context, queue) = setup();
    let buffer = backend.create_buffer(context, 4, AccessMode::ReadOnly).unwrap();
    backend.release_queue(queue).unwrap();
    assert_eq!(backend.enqueue_write_buffer(queue, buffer, &[0u8; 4]).unwrap_err(), Status::INVALID_COMMAND_QUEUE);
}
