//! Driver rebind state machine
//!
//! ```text
//!   BoundToOther(d) ──unbind──▶ Unbound ──new_id──▶ registered ──bind──▶ BoundToTarget
//!                                                        │
//!                                (kernel claimed it)     └──────────────▶ BoundToTarget
//!   BoundToTarget ── nothing to do
//! ```
//!
//! Every mutating write is followed by the settle delay and a fresh read of
//! the `driver` link. The return status of a sysfs write is not trusted: the
//! kernel often accepts a write whose effect lands later, and sometimes
//! rejects one whose effect already holds.

use crate::error::{Result, SetupError};
use crate::identity::DeviceIdentity;
use crate::platform::Platform;
use crate::sysfs::{link_name, write_control};
use std::fmt;
use std::io;
use std::time::Duration;
use tracing::{debug, info, warn};
use vfio_layout::{unbind_file, DeviceAddress, DevicePaths, SysfsLayout};

/// Driver binding of a device, as read from its `driver` link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BindingState {
    /// No driver
    Unbound,
    /// Bound to the pass-through driver
    BoundToTarget,
    /// Bound to some other driver
    BoundToOther(String),
}

impl BindingState {
    /// Classify a driver name against the target driver.
    pub fn classify(driver: Option<&str>, target: &str) -> Self {
        match driver {
            None => Self::Unbound,
            Some(name) if name == target => Self::BoundToTarget,
            Some(name) => Self::BoundToOther(name.to_string()),
        }
    }

    /// Read the current binding.
    pub fn observe(paths: &DevicePaths, target: &str) -> Self {
        let driver = current_driver(paths);
        debug!(driver = ?driver, "Observed driver binding");
        Self::classify(driver.as_deref(), target)
    }
}

impl fmt::Display for BindingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unbound => f.write_str("unbound"),
            Self::BoundToTarget => f.write_str("bound to target"),
            Self::BoundToOther(name) => write!(f, "bound to {name}"),
        }
    }
}

/// Name of the driver the device is bound to, if any.
pub fn current_driver(paths: &DevicePaths) -> Option<String> {
    link_name(&paths.driver_link())
}

/// How the rebind stage ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RebindOutcome {
    /// Device was already on the target driver; nothing was written
    AlreadyBound,
    /// Device was moved to the target driver
    Rebound {
        /// Driver it was taken from, if it had one
        previous: Option<String>,
    },
}

/// Drives one device from its current binding to the target driver.
pub struct DriverRebinder<'a, P: Platform> {
    platform: &'a P,
    layout: &'a SysfsLayout,
    address: &'a DeviceAddress,
    paths: &'a DevicePaths,
    target: &'a str,
    settle_delay: Duration,
}

impl<'a, P: Platform> DriverRebinder<'a, P> {
    /// Rebinder for one device.
    pub fn new(
        platform: &'a P,
        layout: &'a SysfsLayout,
        address: &'a DeviceAddress,
        paths: &'a DevicePaths,
        target: &'a str,
        settle_delay: Duration,
    ) -> Self {
        Self {
            platform,
            layout,
            address,
            paths,
            target,
            settle_delay,
        }
    }

    /// Move the device onto the target driver.
    ///
    /// # Errors
    ///
    /// - `UnbindFailed` if the old driver keeps the device
    /// - `DriverInterfaceUnavailable` if the target driver's `new_id` or
    ///   `bind` file is missing
    /// - `BindFailed` if the device has no driver after binding
    /// - `WrongDriverBound` if another driver claimed it
    pub fn run(&self, identity: &DeviceIdentity) -> Result<RebindOutcome> {
        info!("Checking current driver binding...");

        let previous = match BindingState::observe(self.paths, self.target) {
            BindingState::BoundToTarget => {
                info!("Device already bound to {}", self.target);
                return Ok(RebindOutcome::AlreadyBound);
            }
            BindingState::BoundToOther(driver) => {
                info!("Device currently bound to driver: {driver}");
                self.unbind(&driver)?;
                Some(driver)
            }
            BindingState::Unbound => {
                info!("Device not bound to any driver");
                None
            }
        };

        self.register(identity)?;

        // after new_id the driver tries every matching unbound device, so it may
        // already have claimed ours
        if BindingState::observe(self.paths, self.target) == BindingState::BoundToTarget {
            info!("Device claimed by {} on id registration", self.target);
        } else {
            self.bind()?;
        }

        Ok(RebindOutcome::Rebound { previous })
    }

    /// `BoundToOther(driver) -> Unbound`
    fn unbind(&self, driver: &str) -> Result<()> {
        info!("Unbinding from {driver}...");

        let path = unbind_file(self.layout, driver);
        let detail = match write_control(&path, &self.address.canonical()) {
            Ok(()) => None,
            Err(e) => {
                warn!("Write to {} failed: {e}", path.display());
                Some(e.to_string())
            }
        };
        self.platform.settle(self.settle_delay);

        if let Some(still) = current_driver(self.paths) {
            debug!(driver = %still, "Driver link still present after unbind");
            return Err(SetupError::UnbindFailed {
                address: self.address.canonical(),
                driver: driver.to_string(),
                detail,
            });
        }

        info!("Successfully unbound from {driver}");
        Ok(())
    }

    /// `Unbound -> registered`
    ///
    /// A rejected write is tolerated: the kernel rejects re-registering an id
    /// it already knows. This also lets a wrong id through; the bind
    /// read-back is what catches that.
    fn register(&self, identity: &DeviceIdentity) -> Result<()> {
        let path = self.paths.new_id_file();
        if !path.exists() {
            return Err(SetupError::DriverInterfaceUnavailable { path });
        }

        match write_control(&path, &identity.new_id_payload()) {
            Ok(()) => info!("Added device ID {identity} to {}", self.target),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(SetupError::DriverInterfaceUnavailable { path });
            }
            Err(e) => info!("Device ID may already be registered with {} ({e})", self.target),
        }
        self.platform.settle(self.settle_delay);
        Ok(())
    }

    /// `registered -> BoundToTarget`
    fn bind(&self) -> Result<()> {
        info!("Binding device to {}...", self.target);

        let path = self.paths.bind_file();
        let detail = match write_control(&path, &self.address.canonical()) {
            Ok(()) => None,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(SetupError::DriverInterfaceUnavailable { path });
            }
            Err(e) => {
                warn!("Write to {} failed: {e}", path.display());
                Some(e.to_string())
            }
        };
        self.platform.settle(self.settle_delay);

        self.confirm_bound(detail)
    }

    fn confirm_bound(&self, detail: Option<String>) -> Result<()> {
        match BindingState::observe(self.paths, self.target) {
            BindingState::BoundToTarget => {
                info!("Device successfully bound to {}", self.target);
                Ok(())
            }
            BindingState::Unbound => Err(SetupError::BindFailed {
                address: self.address.canonical(),
                driver: self.target.to_string(),
                detail,
            }),
            BindingState::BoundToOther(actual) => Err(SetupError::WrongDriverBound {
                address: self.address.canonical(),
                actual,
                expected: self.target.to_string(),
            }),
        }
    }
}
