//! Real entry points of every supported runtime, one binding set per vendor.

use vramgate_core::{SymbolResolver, Vendor, VendorBindings, VendorPresence};

pub static CUDA: VendorBindings = VendorBindings::new(
    Vendor::Cuda,
    c"cudaMalloc",
    c"cudaFree",
    c"cudaMemGetInfo",
    Some(c"cudaMallocManaged"),
);

pub static ACL: VendorBindings = VendorBindings::new(
    Vendor::Acl,
    c"aclrtMalloc",
    c"aclrtFree",
    c"aclrtGetMemInfo",
    None,
);

pub static HIP: VendorBindings = VendorBindings::new(
    Vendor::Hip,
    c"hipMalloc",
    c"hipFree",
    c"hipMemGetInfo",
    None,
);

pub static ALL: [&VendorBindings; 3] = [&CUDA, &ACL, &HIP];

/// Probe every vendor without logging failures.
pub fn probe_all<R: SymbolResolver + ?Sized>(resolver: &R) -> [VendorPresence; 3] {
    ALL.map(|bindings| bindings.probe(resolver))
}
