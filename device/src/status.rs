//! Raw status codes returned by compute backends.
//!
//! The code space mirrors the OpenCL error codes so the real driver backend
//! can pass its statuses through unchanged; the host backend reports the
//! same codes for equivalent conditions.

use std::fmt;

/// A raw status code from the underlying compute runtime.
///
/// `Status::SUCCESS` is the designated success value; every other value is a
/// failure. The pipeline layer attaches a call-site tag and converts
/// non-success statuses into typed errors.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Status(pub i32);

impl Status {
    pub const SUCCESS: Status = Status(0);
    pub const DEVICE_NOT_FOUND: Status = Status(-1);
    pub const OUT_OF_RESOURCES: Status = Status(-5);
    pub const OUT_OF_HOST_MEMORY: Status = Status(-6);
    pub const BUILD_PROGRAM_FAILURE: Status = Status(-11);
    pub const INVALID_VALUE: Status = Status(-30);
    pub const INVALID_PLATFORM: Status = Status(-32);
    pub const INVALID_DEVICE: Status = Status(-33);
    pub const INVALID_CONTEXT: Status = Status(-34);
    pub const INVALID_COMMAND_QUEUE: Status = Status(-36);
    pub const INVALID_MEM_OBJECT: Status = Status(-38);
    pub const INVALID_IMAGE_SIZE: Status = Status(-40);
    pub const INVALID_PROGRAM: Status = Status(-44);
    pub const INVALID_PROGRAM_EXECUTABLE: Status = Status(-45);
    pub const INVALID_KERNEL_NAME: Status = Status(-46);
    pub const INVALID_KERNEL: Status = Status(-48);
    pub const INVALID_ARG_INDEX: Status = Status(-49);
    pub const INVALID_KERNEL_ARGS: Status = Status(-52);
    pub const INVALID_WORK_DIMENSION: Status = Status(-53);
    pub const INVALID_WORK_GROUP_SIZE: Status = Status(-54);
    pub const INVALID_OPERATION: Status = Status(-59);
    pub const INVALID_GLOBAL_WORK_SIZE: Status = Status(-63);

    pub fn is_success(self) -> bool {
        self == Self::SUCCESS
    }

    /// Symbolic name of this code, `CL_*` style.
    pub fn symbol(self) -> &'static str {
        match self.0 {
            0 => "CL_SUCCESS",
            -1 => "CL_DEVICE_NOT_FOUND",
            -5 => "CL_OUT_OF_RESOURCES",
            -6 => "CL_OUT_OF_HOST_MEMORY",
            -11 => "CL_BUILD_PROGRAM_FAILURE",
            -30 => "CL_INVALID_VALUE",
            -32 => "CL_INVALID_PLATFORM",
            -33 => "CL_INVALID_DEVICE",
            -34 => "CL_INVALID_CONTEXT",
            -36 => "CL_INVALID_COMMAND_QUEUE",
            -38 => "CL_INVALID_MEM_OBJECT",
            -40 => "CL_INVALID_IMAGE_SIZE",
            -44 => "CL_INVALID_PROGRAM",
            -45 => "CL_INVALID_PROGRAM_EXECUTABLE",
            -46 => "CL_INVALID_KERNEL_NAME",
            -48 => "CL_INVALID_KERNEL",
            -49 => "CL_INVALID_ARG_INDEX",
            -52 => "CL_INVALID_KERNEL_ARGS",
            -53 => "CL_INVALID_WORK_DIMENSION",
            -54 => "CL_INVALID_WORK_GROUP_SIZE",
            -59 => "CL_INVALID_OPERATION",
            -63 => "CL_INVALID_GLOBAL_WORK_SIZE",
            _ => "CL_UNKNOWN_ERROR",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (code {})", self.symbol(), self.0)
    }
}

impl std::error::Error for Status {}
