//! Sysfs and devfs control-surface paths.
//!
//! ```text
//! {sysfs}/kernel/iommu_groups/<group>/
//! {sysfs}/bus/pci/devices/<addr>/{vendor,device,driver@,iommu_group@}
//! {sysfs}/bus/pci/drivers/<driver>/{bind,unbind,new_id}
//! {sysfs}/module/<module>/
//! {dev}/vfio/<group>        per-group user-space node
//! {dev}/vfio/vfio           shared container node
//! ```
//!
//! The roots default to `/sys` and `/dev` but are configurable so the whole
//! surface can be relocated (tests build it under a temporary directory).

use crate::address::DeviceAddress;
use std::path::{Path, PathBuf};

/// Default sysfs mount point.
pub const SYSFS_ROOT: &str = "/sys";

/// Default devfs mount point.
pub const DEV_ROOT: &str = "/dev";

/// Name of the shared VFIO container node under `{dev}/vfio`.
pub const CONTAINER_NODE: &str = "vfio";

/// Root directories of the kernel control surface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SysfsLayout {
    sysfs_root: PathBuf,
    dev_root: PathBuf,
}

impl SysfsLayout {
    /// Layout rooted at arbitrary sysfs and devfs directories.
    pub fn new(sysfs_root: impl Into<PathBuf>, dev_root: impl Into<PathBuf>) -> Self {
        Self {
            sysfs_root: sysfs_root.into(),
            dev_root: dev_root.into(),
        }
    }

    /// The live system layout (`/sys`, `/dev`).
    pub fn system() -> Self {
        Self::new(SYSFS_ROOT, DEV_ROOT)
    }

    /// Sysfs root.
    pub fn sysfs_root(&self) -> &Path {
        &self.sysfs_root
    }

    /// Devfs root.
    pub fn dev_root(&self) -> &Path {
        &self.dev_root
    }

    /// `{sysfs}/kernel/iommu_groups`
    pub fn iommu_groups_dir(&self) -> PathBuf {
        self.sysfs_root.join("kernel").join("iommu_groups")
    }

    /// `{sysfs}/bus/pci/devices`
    pub fn pci_devices_dir(&self) -> PathBuf {
        self.sysfs_root.join("bus").join("pci").join("devices")
    }

    /// `{sysfs}/bus/pci/drivers`
    pub fn pci_drivers_dir(&self) -> PathBuf {
        self.sysfs_root.join("bus").join("pci").join("drivers")
    }

    /// `{sysfs}/bus/pci/devices/<addr>`
    pub fn device_dir(&self, address: &DeviceAddress) -> PathBuf {
        self.pci_devices_dir().join(address.canonical())
    }

    /// `{sysfs}/bus/pci/drivers/<driver>`
    pub fn driver_dir(&self, driver: &str) -> PathBuf {
        self.pci_drivers_dir().join(driver)
    }

    /// `{sysfs}/module`
    pub fn modules_dir(&self) -> PathBuf {
        self.sysfs_root.join("module")
    }

    /// `{sysfs}/module/<module>`
    pub fn module_dir(&self, module: &str) -> PathBuf {
        self.modules_dir().join(module)
    }

    /// `{dev}/vfio`
    pub fn vfio_dev_dir(&self) -> PathBuf {
        self.dev_root.join("vfio")
    }

    /// `{dev}/vfio/<group>`
    pub fn group_node(&self, group: &str) -> PathBuf {
        self.vfio_dev_dir().join(group)
    }

    /// `{dev}/vfio/vfio`
    pub fn container_node(&self) -> PathBuf {
        self.vfio_dev_dir().join(CONTAINER_NODE)
    }
}

impl Default for SysfsLayout {
    fn default() -> Self {
        Self::system()
    }
}

/// Every path the pipeline touches for one device and one target driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DevicePaths {
    /// `{sysfs}/bus/pci/devices/<addr>`
    pub device_dir: PathBuf,
    /// `{sysfs}/bus/pci/drivers/<target>`
    pub target_driver_dir: PathBuf,
}

impl DevicePaths {
    /// Derive the device and target-driver directories.
    pub fn resolve(layout: &SysfsLayout, address: &DeviceAddress, target_driver: &str) -> Self {
        Self {
            device_dir: layout.device_dir(address),
            target_driver_dir: layout.driver_dir(target_driver),
        }
    }

    /// `<device>/vendor`
    pub fn vendor_file(&self) -> PathBuf {
        self.device_dir.join("vendor")
    }

    /// `<device>/device`
    pub fn device_file(&self) -> PathBuf {
        self.device_dir.join("device")
    }

    /// `<device>/driver` (symlink, absent when unbound)
    pub fn driver_link(&self) -> PathBuf {
        self.device_dir.join("driver")
    }

    /// `<device>/iommu_group` (symlink)
    pub fn iommu_group_link(&self) -> PathBuf {
        self.device_dir.join("iommu_group")
    }

    /// `<target>/new_id`
    pub fn new_id_file(&self) -> PathBuf {
        self.target_driver_dir.join("new_id")
    }

    /// `<target>/bind`
    pub fn bind_file(&self) -> PathBuf {
        self.target_driver_dir.join("bind")
    }
}

/// `<driver dir>/unbind` for any driver.
pub fn unbind_file(layout: &SysfsLayout, driver: &str) -> PathBuf {
    layout.driver_dir(driver).join("unbind")
}
