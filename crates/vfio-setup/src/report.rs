//! Status snapshots and the final run report

use crate::identity::DeviceIdentity;
use crate::modules::ModuleOutcome;
use crate::rebind::current_driver;
use crate::sysfs::link_name;
use std::fmt;
use std::path::PathBuf;
use vfio_layout::{DeviceAddress, DevicePaths, SysfsLayout};

/// Read-only snapshot of a device's pass-through state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceStatus {
    /// Device address
    pub address: DeviceAddress,
    /// Sysfs directory
    pub device_dir: PathBuf,
    /// Present in sysfs at all
    pub present: bool,
    /// Bound driver
    pub driver: Option<String>,
    /// IOMMU group id
    pub group: Option<String>,
    /// Vendor/device id
    pub identity: Option<DeviceIdentity>,
    /// `/dev/vfio/<group>`, when the device has a group
    pub group_node: Option<PathBuf>,
}

impl DeviceStatus {
    /// Read the current state. Never fails; missing facts are `None`.
    pub fn read(layout: &SysfsLayout, address: &DeviceAddress, paths: &DevicePaths) -> Self {
        let group = link_name(&paths.iommu_group_link());
        Self {
            address: *address,
            device_dir: paths.device_dir.clone(),
            present: paths.device_dir.exists(),
            driver: current_driver(paths),
            identity: DeviceIdentity::read(paths).ok(),
            group_node: group.as_deref().map(|g| layout.group_node(g)),
            group,
        }
    }
}

impl fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn or_none<T: fmt::Display>(value: Option<T>) -> String {
            value.map_or_else(|| "None".to_string(), |v| v.to_string())
        }

        writeln!(f, "Device Path: {}", self.device_dir.display())?;
        if !self.present {
            writeln!(f, "Present: no")?;
        }
        writeln!(f, "Driver: {}", or_none(self.driver.as_deref()))?;
        writeln!(f, "IOMMU Group: {}", or_none(self.group.as_deref()))?;
        writeln!(f, "Vendor:Device ID: {}", or_none(self.identity))?;
        write!(
            f,
            "VFIO Group Node: {}",
            or_none(self.group_node.as_ref().map(|p| p.display()))
        )
    }
}

/// Result of a successful run.
#[derive(Debug, Clone)]
pub struct SetupReport {
    /// Final state, re-read after verification
    pub status: DeviceStatus,
    /// Bound driver, as verified
    pub driver: String,
    /// IOMMU group, as verified
    pub group: String,
    /// Identity used for registration
    pub identity: DeviceIdentity,
    /// Group node
    pub group_node: PathBuf,
    /// Container node
    pub container_node: PathBuf,
    /// Group node permission bits
    pub group_mode: Option<u32>,
    /// Number of IOMMU groups seen in preflight
    pub iommu_groups: usize,
    /// Per-module activation results
    pub modules: Vec<ModuleOutcome>,
    /// Device was already on the target driver when the run started
    pub already_bound: bool,
    /// Driver the device was taken from
    pub previous_driver: Option<String>,
    /// Non-fatal findings
    pub warnings: Vec<String>,
}

impl fmt::Display for SetupReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Device: {}", self.status.address)?;
        writeln!(f, "Driver: {}", self.driver)?;
        if let Some(previous) = &self.previous_driver {
            writeln!(f, "Previous driver: {previous}")?;
        }
        writeln!(f, "IOMMU Group: {}", self.group)?;
        writeln!(f, "Vendor:Device ID: {}", self.identity)?;
        match self.group_mode {
            Some(mode) => writeln!(f, "VFIO Group Node: {} ({mode:o})", self.group_node.display())?,
            None => writeln!(f, "VFIO Group Node: {}", self.group_node.display())?,
        }
        write!(f, "VFIO Container: {}", self.container_node.display())
    }
}
