use std::sync::Arc;

use clrun_device::HostBackend;

use crate::context::Context;
use crate::error::Error;
use crate::program::Program;
use crate::registry::DeviceRegistry;

const COPY_SRC: &str = r#"
__kernel void copy_i32(__global const int* in, __global int* out) {
    int i = get_global_id(0);
    out[i] = in[i];
}
"#;

fn context() -> Context {
    let registry = DeviceRegistry::new(Arc::new(HostBackend::new()));
    let device = registry.select_first_device().unwrap();
    Context::create(Arc::clone(registry.backend()), device).unwrap()
}

#[test]
fn compile_and_instantiate() {
    let context = context();
    let program = Program::compile(&context, COPY_SRC).unwrap();
    let kernel = program.create_kernel("copy_i32").unwrap();
    kernel.release().unwrap();
    program.release().unwrap();
    context.release().unwrap();
}

#[test]
fn invalid_source_surfaces_build_log() {
    let context = context();
    let err = Program::compile(&context, "int main() { return 0; }").unwrap_err();
    match err {
        Error::CompileError { log } => assert!(!log.is_empty()),
        other => panic!("expected CompileError, got {other}"),
    }
}

#[test]
fn missing_entry_point() {
    let context = context();
    let program = Program::compile(&context, COPY_SRC).unwrap();
    match program.create_kernel("transpose").unwrap_err() {
        Error::EntryNotFound { name } => assert_eq!(name, "transpose"),
        other => panic!("expected EntryNotFound, got {other}"),
    }
}
