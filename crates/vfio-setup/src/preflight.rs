//! Preflight gates
//!
//! Three checks, in order, each fatal on failure:
//!
//! 1. privilege (can we write control files at all?)
//! 2. IOMMU groups directory present (platform/firmware support)
//! 3. device directory present
//!
//! Nothing is mutated here. The IOMMU gate runs before anything
//! device-specific, so a machine without IOMMU support fails the same way
//! regardless of which address was asked for.

use crate::error::{Result, SetupError};
use crate::platform::Platform;
use tracing::{debug, error, info, warn};
use vfio_layout::{DeviceAddress, DevicePaths, SysfsLayout};

/// Lines of `lspci` output shown when the device is missing.
const LISTING_LINES: usize = 10;

/// Lines of `lspci -v` output shown for the found device.
const DESCRIPTION_LINES: usize = 3;

/// What preflight learned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreflightReport {
    /// Number of IOMMU groups the kernel exposes
    pub iommu_groups: usize,
}

/// Run all preflight gates.
///
/// # Errors
///
/// `InsufficientPrivilege`, `IommuUnavailable` or `DeviceNotFound`, whichever
/// gate fails first.
pub fn run<P: Platform>(
    platform: &P,
    layout: &SysfsLayout,
    address: &DeviceAddress,
    paths: &DevicePaths,
) -> Result<PreflightReport> {
    check_privilege(platform)?;
    let iommu_groups = check_iommu(layout)?;
    check_device(platform, address, paths)?;

    Ok(PreflightReport { iommu_groups })
}

/// Fail unless the effective user may write control files.
///
/// # Errors
///
/// Returns `SetupError::InsufficientPrivilege`.
pub fn check_privilege<P: Platform>(platform: &P) -> Result<()> {
    if platform.is_privileged() {
        Ok(())
    } else {
        error!("This tool must be run as root (use sudo)");
        Err(SetupError::InsufficientPrivilege)
    }
}

/// Count IOMMU groups; fail if the groups directory does not exist.
///
/// An existing but empty directory is only a warning.
///
/// # Errors
///
/// Returns `SetupError::IommuUnavailable`.
pub fn check_iommu(layout: &SysfsLayout) -> Result<usize> {
    info!("Checking IOMMU support...");

    let groups_dir = layout.iommu_groups_dir();
    let unavailable = || SetupError::IommuUnavailable {
        path: groups_dir.clone(),
    };

    if !groups_dir.is_dir() {
        let err = unavailable();
        error!("IOMMU is not enabled!");
        for line in err.remediation() {
            error!("{line}");
        }
        return Err(err);
    }

    let entries = std::fs::read_dir(&groups_dir).map_err(|e| {
        error!("Failed to read {}: {e}", groups_dir.display());
        unavailable()
    })?;
    let count = entries
        .flatten()
        .filter(|entry| entry.path().is_dir())
        .count();

    if count > 0 {
        info!("IOMMU is enabled with {count} groups");
    } else {
        warn!("IOMMU directory exists but no groups found");
    }
    Ok(count)
}

/// Fail if the device's sysfs directory is absent.
///
/// On failure a best-effort PCI listing is logged; on success a short device
/// description is. Neither listing can change the outcome.
///
/// # Errors
///
/// Returns `SetupError::DeviceNotFound`.
pub fn check_device<P: Platform>(
    platform: &P,
    address: &DeviceAddress,
    paths: &DevicePaths,
) -> Result<()> {
    info!("Checking if PCI device {address} exists...");

    if !paths.device_dir.exists() {
        error!("PCI device {address} not found!");
        match platform.list_pci_devices() {
            Ok(listing) => {
                error!("Available devices:");
                for line in listing.lines().take(LISTING_LINES) {
                    error!("  {line}");
                }
            }
            Err(e) => debug!("PCI device listing unavailable: {e:#}"),
        }
        return Err(SetupError::DeviceNotFound {
            address: address.canonical(),
            path: paths.device_dir.clone(),
        });
    }

    match platform.describe_device(address) {
        Ok(description) => {
            info!("Device found:");
            for line in description.lines().take(DESCRIPTION_LINES) {
                info!("  {line}");
            }
        }
        Err(e) => debug!("Could not get device info: {e:#}"),
    }
    Ok(())
}
