//! Per-run session state
//!
//! The session is the only mutable state the pipeline owns. It is created at
//! the start of a run and dropped at the end; nothing in it survives into the
//! next invocation. Everything else is re-read from the kernel.

use crate::error::{Result, SetupError};
use crate::identity::DeviceIdentity;
use std::fmt;
use vfio_layout::{DeviceAddress, DevicePaths};

/// Pipeline stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Stage {
    /// Privilege, IOMMU and device presence checks
    Preflight,
    /// Vendor/device id lookup
    Identity,
    /// Kernel module activation
    Modules,
    /// Unbind / register / bind
    Rebind,
    /// IOMMU group node permissions
    Permissions,
    /// End-to-end state check
    Verify,
}

impl Stage {
    /// All stages in order.
    pub const ALL: [Self; 6] = [
        Self::Preflight,
        Self::Identity,
        Self::Modules,
        Self::Rebind,
        Self::Permissions,
        Self::Verify,
    ];

    /// Short lowercase name used in diagnostics and log spans.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Preflight => "preflight",
            Self::Identity => "identity",
            Self::Modules => "modules",
            Self::Rebind => "rebind",
            Self::Permissions => "permissions",
            Self::Verify => "verify",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// State carried between stages of a single run.
#[derive(Debug, Clone)]
pub struct SetupSession {
    address: DeviceAddress,
    paths: DevicePaths,
    identity: Option<DeviceIdentity>,
    completed: Vec<Stage>,
}

impl SetupSession {
    /// Start a session for a resolved device.
    pub fn new(address: DeviceAddress, paths: DevicePaths) -> Self {
        Self {
            address,
            paths,
            identity: None,
            completed: Vec::with_capacity(Stage::ALL.len()),
        }
    }

    /// Device being set up
    pub const fn address(&self) -> &DeviceAddress {
        &self.address
    }

    /// Paths derived from the address
    pub const fn paths(&self) -> &DevicePaths {
        &self.paths
    }

    /// Identity, once the identity stage has run
    pub const fn identity(&self) -> Option<DeviceIdentity> {
        self.identity
    }

    /// Identity cached by the identity stage, for the stages that need it.
    ///
    /// # Errors
    ///
    /// Returns `SetupError::IdentityUnavailable` if the identity stage has
    /// not completed in this session.
    pub fn resolved_identity(&self) -> Result<DeviceIdentity> {
        self.identity.ok_or_else(|| {
            SetupError::identity_unavailable(
                self.paths.vendor_file(),
                "identity stage has not run in this session",
            )
        })
    }

    /// Record the identity read by the identity stage
    pub fn set_identity(&mut self, identity: DeviceIdentity) {
        self.identity = Some(identity);
    }

    /// Record a successful stage
    pub fn complete(&mut self, stage: Stage) {
        tracing::debug!(stage = %stage, "Stage complete");
        self.completed.push(stage);
    }

    /// Last stage that succeeded
    pub fn last_completed(&self) -> Option<Stage> {
        self.completed.last().copied()
    }

    /// Every stage that succeeded, in order
    pub fn completed(&self) -> &[Stage] {
        &self.completed
    }
}
