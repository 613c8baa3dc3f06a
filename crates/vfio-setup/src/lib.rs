//! Hand a PCI device to `vfio-pci` and open its IOMMU group to user space.
//!
//! Everything happens through the kernel's sysfs/devfs control surface:
//!
//! ```text
//! preflight     root? /sys/kernel/iommu_groups? /sys/bus/pci/devices/<addr>?
//! identity      <addr>/vendor, <addr>/device
//! modules       vfio → vfio_iommu_type1 → vfio_pci
//! rebind        <old>/unbind, vfio-pci/new_id, vfio-pci/bind
//! permissions   chmod /dev/vfio/<group>, /dev/vfio/vfio
//! verify        re-read driver, group, node, mode
//! ```
//!
//! There is no transaction to lean on, so every write is followed by a
//! read-back, and every stage starts from what the kernel reports now. A run
//! that stopped halfway can simply be repeated; a device that is already set
//! up passes straight through.
//!
//! # Quick start
//!
//! ```no_run
//! use std::sync::atomic::AtomicBool;
//! use vfio_setup::{SetupConfig, SystemPlatform, VfioSetup};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = SetupConfig::from_env();
//! let platform = SystemPlatform::new(&config.layout);
//! let setup = VfioSetup::new(config, platform);
//!
//! let address = "01:00.0".parse()?;
//! let report = setup.run(&address, &AtomicBool::new(false))?;
//! println!("{report}");
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::doc_markdown)]

mod config;
mod error;
mod identity;
pub mod modules;
pub mod permissions;
pub mod platform;
pub mod preflight;
pub mod rebind;
mod report;
mod session;
mod setup;
pub mod sysfs;
pub mod verify;

pub use config::{SetupConfig, DEFAULT_NODE_MODE, ENV_DEV_ROOT, ENV_SETTLE_MS, ENV_SYSFS_ROOT};
pub use error::{Result, RunError, SetupError, StageFailure};
pub use identity::{parse_hex_id, DeviceIdentity};
pub use modules::ModuleOutcome;
pub use permissions::PermissionGrant;
pub use platform::{Platform, SystemPlatform};
pub use rebind::{BindingState, DriverRebinder, RebindOutcome};
pub use report::{DeviceStatus, SetupReport};
pub use session::{SetupSession, Stage};
pub use setup::VfioSetup;
pub use verify::Verification;

pub use vfio_layout::{DeviceAddress, DevicePaths, SysfsLayout};

/// Commonly used types.
pub mod prelude {
    pub use crate::{
        DeviceAddress, DeviceIdentity, DeviceStatus, Platform, RunError, SetupConfig, SetupError,
        SetupReport, Stage, SystemPlatform, VfioSetup,
    };
}
