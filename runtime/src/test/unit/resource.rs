use std::sync::Arc;

use clrun_device::{AccessMode, HostBackend, ImageDesc};

use crate::context::{CommandQueue, Context};
use crate::error::Error;
use crate::registry::DeviceRegistry;
use crate::resource::{Buffer, Image};
use crate::test::stub::StubBackend;

fn host_context() -> Context {
    let registry = DeviceRegistry::new(Arc::new(HostBackend::new()));
    let device = registry.select_first_device().unwrap();
    Context::create(Arc::clone(registry.backend()), device).unwrap()
}

#[test]
fn explicit_release_succeeds_once() {
    let context = host_context();
    let buffer = Buffer::create(&context, 64, AccessMode::ReadOnly).unwrap();
    let image = Image::create(&context, ImageDesc::rgba8(8, 8), AccessMode::WriteOnly).unwrap();
    buffer.release().unwrap();
    image.release().unwrap();
    context.release().unwrap();
}

#[test]
fn drop_releases_without_panicking() {
    let context = host_context();
    let queue = CommandQueue::create(&context).unwrap();
    let _buffer = Buffer::create(&context, 64, AccessMode::ReadOnly).unwrap();
    drop(queue);
    // Context dropped last; every wrapper tears itself down.
}

#[test]
fn release_failure_is_surfaced() {
    let registry = DeviceRegistry::new(Arc::new(StubBackend { fail_release: true, ..Default::default() }));
    let device = registry.select_first_device().unwrap();
    let context = Context::create(Arc::clone(registry.backend()), device).unwrap();
    let buffer = Buffer::create(&context, 64, AccessMode::ReadOnly).unwrap();
    match buffer.release().unwrap_err() {
        Error::ResourceLifecycleViolation { what, .. } => assert_eq!(what, "buffer"),
        other => panic!("expected ResourceLifecycleViolation, got {other}"),
    }
    // Context drop also hits the failing release; it must only warn.
}

#[test]
fn zero_sized_image_is_a_device_error() {
    let context = host_context();
    let err = Image::create(&context, ImageDesc::rgba8(0, 8), AccessMode::WriteOnly).unwrap_err();
    match err {
        Error::DeviceOperationFailed { code, site } => {
            assert_eq!(code, clrun_device::Status::INVALID_IMAGE_SIZE);
            assert_eq!(site, "clCreateImage");
        }
        other => panic!("expected DeviceOperationFailed, got {other}"),
    }
}

#[test]
fn buffer_reports_its_shape() {
    let context = host_context();
    let buffer = Buffer::create(&context, 512, AccessMode::WriteOnly).unwrap();
    assert_eq!(buffer.size(), 512);
    assert_eq!(buffer.mode(), AccessMode::WriteOnly);
    let image = Image::create(&context, ImageDesc::rgba8(32, 16), AccessMode::WriteOnly).unwrap();
    assert_eq!(image.desc().byte_len(), 32 * 16 * 4);
}
