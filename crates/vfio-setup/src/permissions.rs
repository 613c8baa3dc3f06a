//! IOMMU group node permissions
//!
//! Only runs once the device is confirmed on the target driver: the group
//! node is what hands the device to unprivileged user space, so it must never
//! be opened up for a device some other driver still owns.

use crate::error::{Result, SetupError};
use crate::sysfs::{link_name, mode_bits};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use vfio_layout::{DeviceAddress, DevicePaths, SysfsLayout};

/// Nodes opened up for user space.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermissionGrant {
    /// IOMMU group id
    pub group: String,
    /// `/dev/vfio/<group>`
    pub group_node: PathBuf,
    /// `/dev/vfio/vfio`
    pub container_node: PathBuf,
}

/// IOMMU group id of a device, from its `iommu_group` link.
///
/// # Errors
///
/// Returns `SetupError::GroupUnavailable` if the link is missing.
pub fn iommu_group(address: &DeviceAddress, paths: &DevicePaths) -> Result<String> {
    let link = paths.iommu_group_link();
    link_name(&link).ok_or_else(|| SetupError::GroupUnavailable {
        address: address.canonical(),
        path: link,
    })
}

/// Open the group node and the container node to `mode`.
///
/// # Errors
///
/// `GroupUnavailable`, `PermissionTargetMissing` or `PermissionChangeFailed`.
pub fn apply(
    layout: &SysfsLayout,
    address: &DeviceAddress,
    paths: &DevicePaths,
    mode: u32,
) -> Result<PermissionGrant> {
    info!("Setting up VFIO permissions...");

    let group = iommu_group(address, paths)?;
    info!("Device is in IOMMU group: {group}");

    let group_node = layout.group_node(&group);
    let container_node = layout.container_node();

    relax(&group_node, mode)?;
    relax(&container_node, mode)?;

    Ok(PermissionGrant {
        group,
        group_node,
        container_node,
    })
}

fn relax(node: &Path, mode: u32) -> Result<()> {
    if !node.exists() {
        return Err(SetupError::PermissionTargetMissing {
            path: node.to_path_buf(),
        });
    }

    if let Ok(current) = mode_bits(node) {
        if current & mode == mode {
            debug!("{} already has mode {current:o}", node.display());
            return Ok(());
        }
    }

    std::fs::set_permissions(node, std::fs::Permissions::from_mode(mode)).map_err(|source| {
        SetupError::PermissionChangeFailed {
            path: node.to_path_buf(),
            source,
        }
    })?;

    info!("Set permissions {mode:o} on {}", node.display());
    Ok(())
}
