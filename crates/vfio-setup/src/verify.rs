//! End-to-end verification
//!
//! Re-reads the driver link, the IOMMU group link and the group node from
//! scratch. Nothing from earlier stages is reused, so a run that took a
//! shortcut (already bound, id already registered) is checked exactly like a
//! full one.

use crate::error::{Result, SetupError};
use crate::rebind::current_driver;
use crate::sysfs::{is_world_rw, link_name, mode_bits};
use std::path::PathBuf;
use tracing::{info, warn};
use vfio_layout::{DevicePaths, SysfsLayout};

/// Verified end state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verification {
    /// Bound driver (always the target driver)
    pub driver: String,
    /// IOMMU group id
    pub group: String,
    /// Group node path
    pub group_node: PathBuf,
    /// Group node permission bits, if they could be read
    pub group_mode: Option<u32>,
    /// Non-fatal findings
    pub warnings: Vec<String>,
}

/// Check that the device is on `target` with a usable group node.
///
/// # Errors
///
/// Returns `SetupError::VerificationFailed` if the driver is wrong or absent,
/// the device has no IOMMU group, or the group node is missing. A group node
/// that is present but not world read/write is only a warning.
pub fn verify(layout: &SysfsLayout, paths: &DevicePaths, target: &str) -> Result<Verification> {
    info!("Verifying VFIO setup...");

    let driver = match current_driver(paths) {
        Some(driver) if driver == target => driver,
        Some(other) => {
            return Err(SetupError::verification_failed(format!(
                "device bound to wrong driver: {other} (expected {target})"
            )))
        }
        None => return Err(SetupError::verification_failed("no driver bound")),
    };
    info!("✓ Device bound to {driver} driver");

    let group = link_name(&paths.iommu_group_link())
        .ok_or_else(|| SetupError::verification_failed("device not in any IOMMU group"))?;
    info!("✓ Device in IOMMU group: {group}");

    let group_node = layout.group_node(&group);
    if !group_node.exists() {
        return Err(SetupError::verification_failed(format!(
            "VFIO group device missing: {}",
            group_node.display()
        )));
    }
    info!("✓ VFIO group device exists: {}", group_node.display());

    let mut warnings = Vec::new();
    let group_mode = match mode_bits(&group_node) {
        Ok(mode) if is_world_rw(mode) => {
            info!("✓ VFIO group permissions: {mode:o}");
            Some(mode)
        }
        Ok(mode) => {
            let msg = format!(
                "VFIO group permissions: {mode:o} (expected: 666) on {}",
                group_node.display()
            );
            warn!("! {msg}");
            warnings.push(msg);
            Some(mode)
        }
        Err(e) => {
            let msg = format!("Could not check permissions on {}: {e}", group_node.display());
            warn!("{msg}");
            warnings.push(msg);
            None
        }
    };

    info!("VFIO setup verification completed successfully!");
    Ok(Verification {
        driver,
        group,
        group_node,
        group_mode,
        warnings,
    })
}
