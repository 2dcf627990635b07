//! Accelerator runtimes whose allocation APIs are interposed.
//!
//! Each runtime reports outcomes through its own integer status space. The
//! quota protocol is vendor-agnostic and only needs three codes per vendor:
//! success, out-of-memory and invalid-argument.

/// Interposed accelerator runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Vendor {
    /// NVIDIA CUDA runtime (`libcudart`).
    Cuda,
    /// Huawei Ascend ACL runtime (`libascendcl`).
    Acl,
    /// AMD/Hygon HIP runtime (`libamdhip64`).
    Hip,
}

/// The status codes the protocol returns on a vendor's behalf.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusCodes {
    pub success: i32,
    pub out_of_memory: i32,
    pub invalid_value: i32,
}

// cudaSuccess / cudaErrorMemoryAllocation / cudaErrorInvalidValue
const CUDA_CODES: StatusCodes = StatusCodes {
    success: 0,
    out_of_memory: 2,
    invalid_value: 1,
};

// ACL_SUCCESS / ACL_ERROR_RT_MEMORY_ALLOCATION / ACL_ERROR_INVALID_PARAM
const ACL_CODES: StatusCodes = StatusCodes {
    success: 0,
    out_of_memory: 107_000,
    invalid_value: 107_001,
};

// hipSuccess / hipErrorOutOfMemory / hipErrorInvalidValue
const HIP_CODES: StatusCodes = StatusCodes {
    success: 0,
    out_of_memory: 2,
    invalid_value: 1,
};

impl Vendor {
    pub const ALL: [Self; 3] = [Self::Cuda, Self::Acl, Self::Hip];

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Cuda => "cuda",
            Self::Acl => "acl",
            Self::Hip => "hip",
        }
    }

    #[must_use]
    pub const fn codes(self) -> StatusCodes {
        match self {
            Self::Cuda => CUDA_CODES,
            Self::Acl => ACL_CODES,
            Self::Hip => HIP_CODES,
        }
    }

    #[must_use]
    pub const fn is_success(self, status: i32) -> bool {
        status == self.codes().success
    }
}

/// An interposed entry point: which vendor, which function.
///
/// Carried through the protocol so log lines and status codes name the
/// function the application actually called.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallSite {
    pub vendor: Vendor,
    pub function: &'static str,
}

impl CallSite {
    #[must_use]
    pub const fn new(vendor: Vendor, function: &'static str) -> Self {
        Self { vendor, function }
    }

    #[must_use]
    pub const fn codes(self) -> StatusCodes {
        self.vendor.codes()
    }
}
