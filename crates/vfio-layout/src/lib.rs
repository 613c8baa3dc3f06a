//! Control-surface model for PCI pass-through binding.
//!
//! This crate depends only on `thiserror` and performs **no I/O**. It is a pure
//! model of the kernel interfaces the setup pipeline drives: PCI device
//! addresses, the sysfs and devfs paths derived from them, and the names of
//! the driver and modules involved.
//!
//! # Crate organisation
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`address`] | `DDDD:BB:SS.F` parsing, validation, canonical form |
//! | [`layout`] | Sysfs/devfs roots, per-device and per-driver control paths |
//! | [`modules`] | Target driver name, required kernel modules, settle delay |

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod address;
pub mod layout;
pub mod modules;

pub use address::{AddressError, DeviceAddress};
pub use layout::{unbind_file, DevicePaths, SysfsLayout, CONTAINER_NODE, DEV_ROOT, SYSFS_ROOT};
pub use modules::{normalize_module_name, REQUIRED_MODULES, SETTLE_DELAY, TARGET_DRIVER};
