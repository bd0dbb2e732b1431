//! Program compilation with build diagnostics capture.

use std::sync::Arc;

use clrun_device::{ComputeBackend, DeviceHandle, ProgramHandle, Status};
use snafu::ResultExt;
use tracing::{debug, warn};

use crate::error::{
    CompileSnafu, DeviceResultExt, EntryNotFoundSnafu, ResourceLifecycleViolationSnafu, Result,
};
use crate::resource::Kernel;

/// A program compiled for one context's device.
#[derive(Debug)]
pub struct Program {
    backend: Arc<dyn ComputeBackend>,
    handle: ProgramHandle,
    device: DeviceHandle,
    released: bool,
}

impl Program {
    /// Create from source and build with empty options.
    ///
    /// On a build failure the full build log is fetched and returned
    /// verbatim in the error; the log is never empty for a failed build.
    /// Source text is not pre-validated and programs are never rebuilt.
    pub fn compile(context: &crate::context::Context, source: &str) -> Result<Self> {
        let backend = Arc::clone(context.backend());
        let handle = backend.create_program(context.handle(), source).at("clCreateProgramWithSource")?;
        let program = Self { backend, handle, device: context.device(), released: false };
        match program.backend.build_program(handle, program.device, "") {
            Ok(()) => {
                debug!(bytes = source.len(), "program built");
                Ok(program)
            }
            Err(Status::BUILD_PROGRAM_FAILURE) => {
                let log = program.backend.build_log(handle, program.device).at("clGetProgramBuildInfo")?;
                CompileSnafu { log }.fail()
            }
            Err(code) => Err(code).at("clBuildProgram"),
        }
    }

    /// Instantiate an entry point of the built program.
    pub fn create_kernel(&self, entry: &str) -> Result<Kernel> {
        match self.backend.create_kernel(self.handle, entry) {
            Ok(handle) => Ok(Kernel::new(Arc::clone(&self.backend), handle)),
            Err(Status::INVALID_KERNEL_NAME) => EntryNotFoundSnafu { name: entry }.fail(),
            Err(code) => Err(code).at("clCreateKernel"),
        }
    }

    pub fn release(mut self) -> Result<()> {
        self.released = true;
        self.backend.release_program(self.handle).context(ResourceLifecycleViolationSnafu { what: "program" })
    }
}

impl Drop for Program {
    fn drop(&mut self) {
        if !self.released
            && let Err(status) = self.backend.release_program(self.handle)
        {
            warn!(%status, "program release failed during drop");
        }
    }
}
