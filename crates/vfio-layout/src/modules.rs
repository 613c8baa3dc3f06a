//! Driver and kernel module names.

use std::time::Duration;

/// The pass-through driver devices are handed to.
pub const TARGET_DRIVER: &str = "vfio-pci";

/// Kernel modules that must be active before binding, in load order.
///
/// `vfio_pci` depends on the other two.
pub const REQUIRED_MODULES: [&str; 3] = ["vfio", "vfio_iommu_type1", "vfio_pci"];

/// Time the kernel is given to apply a control-file write before the
/// result is read back.
pub const SETTLE_DELAY: Duration = Duration::from_secs(1);

/// Normalise a module name the way the kernel does (`-` and `_` are
/// interchangeable in module names).
pub fn normalize_module_name(name: &str) -> String {
    name.trim().replace('-', "_")
}
