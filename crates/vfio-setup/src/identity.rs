//! Device identity (vendor/device id pair)

use crate::error::{Result, SetupError};
use std::fmt;
use std::path::Path;
use vfio_layout::DevicePaths;

/// Vendor and device id of a PCI function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceIdentity {
    /// PCI vendor id
    pub vendor: u16,
    /// PCI device id
    pub device: u16,
}

impl DeviceIdentity {
    /// Identity from raw ids
    pub const fn new(vendor: u16, device: u16) -> Self {
        Self { vendor, device }
    }

    /// Payload for a driver's `new_id` file: `"vvvv dddd"`, lowercase, no `0x`.
    pub fn new_id_payload(&self) -> String {
        self.to_string()
    }

    /// Read the identity from the device's `vendor` and `device` files.
    ///
    /// # Errors
    ///
    /// Returns `SetupError::IdentityUnavailable` if either file is missing or
    /// does not hold a 16-bit hex value.
    pub fn read(paths: &DevicePaths) -> Result<Self> {
        let vendor = read_id_file(&paths.vendor_file())?;
        let device = read_id_file(&paths.device_file())?;

        tracing::info!("Vendor:Device ID: {vendor:04x} {device:04x}");
        Ok(Self { vendor, device })
    }
}

impl fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04x} {:04x}", self.vendor, self.device)
    }
}

/// Parse a sysfs id value such as `0x10de\n`.
pub fn parse_hex_id(text: &str) -> Option<u16> {
    let trimmed = text.trim();
    let digits = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);

    if digits.is_empty() {
        return None;
    }
    u16::from_str_radix(digits, 16).ok()
}

fn read_id_file(path: &Path) -> Result<u16> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| SetupError::identity_unavailable(path, e.to_string()))?;

    parse_hex_id(&content).ok_or_else(|| {
        SetupError::identity_unavailable(path, format!("invalid hex id {:?}", content.trim()))
    })
}
