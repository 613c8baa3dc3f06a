//! The setup pipeline
//!
//! ```text
//! resolve → preflight → identity → modules → rebind → permissions → verify
//! ```
//!
//! Each stage either completes or aborts the run with a [`StageFailure`]. No
//! stage recovers from another's failure, and nothing is carried over from a
//! previous run: every stage reads the state it needs from the kernel, so
//! running again after a partial failure picks up wherever the system is.
//!
//! Concurrent runs against the same device are the caller's problem; the
//! control files offer no locking.

use crate::config::SetupConfig;
use crate::error::{Result, RunError, StageFailure};
use crate::identity::DeviceIdentity;
use crate::modules;
use crate::permissions;
use crate::platform::Platform;
use crate::preflight;
use crate::rebind::{DriverRebinder, RebindOutcome};
use crate::report::{DeviceStatus, SetupReport};
use crate::session::{SetupSession, Stage};
use crate::verify;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, info_span};
use vfio_layout::{DeviceAddress, DevicePaths};

/// Moves one PCI device onto the pass-through driver.
#[derive(Debug)]
pub struct VfioSetup<P: Platform> {
    config: SetupConfig,
    platform: P,
}

impl<P: Platform> VfioSetup<P> {
    /// Pipeline over `platform` with `config`.
    pub fn new(config: SetupConfig, platform: P) -> Self {
        Self { config, platform }
    }

    /// Configuration in use
    pub const fn config(&self) -> &SetupConfig {
        &self.config
    }

    /// Platform in use
    pub const fn platform(&self) -> &P {
        &self.platform
    }

    /// Canonical address and derived paths.
    pub fn resolve(&self, address: &DeviceAddress) -> DevicePaths {
        DevicePaths::resolve(&self.config.layout, address, &self.config.target_driver)
    }

    /// Run the full pipeline.
    ///
    /// `interrupt` is polled between stages. A stage that has started always
    /// runs to completion so a mutating write is never left unobserved.
    ///
    /// # Errors
    ///
    /// `RunError::Failed` with the stage and classified error, or
    /// `RunError::Interrupted` if `interrupt` was raised.
    pub fn run(
        &self,
        address: &DeviceAddress,
        interrupt: &AtomicBool,
    ) -> std::result::Result<SetupReport, RunError> {
        let paths = self.resolve(address);
        let mut session = SetupSession::new(*address, paths);

        info!(address = %address, "VFIO setup for PCI device {address}");

        let preflight = in_stage(&session, Stage::Preflight, interrupt, |s| {
            preflight::run(&self.platform, &self.config.layout, s.address(), s.paths())
        })?;
        session.complete(Stage::Preflight);

        let read = in_stage(&session, Stage::Identity, interrupt, |s| {
            DeviceIdentity::read(s.paths())
        })?;
        session.set_identity(read);
        session.complete(Stage::Identity);

        let modules = in_stage(&session, Stage::Modules, interrupt, |_| {
            modules::activate(&self.platform, &self.config.modules)
        })?;
        session.complete(Stage::Modules);

        let (identity, rebind) = in_stage(&session, Stage::Rebind, interrupt, |s| {
            let identity = s.resolved_identity()?;
            let outcome = DriverRebinder::new(
                &self.platform,
                &self.config.layout,
                s.address(),
                s.paths(),
                &self.config.target_driver,
                self.config.settle_delay,
            )
            .run(&identity)?;
            Ok((identity, outcome))
        })?;
        session.complete(Stage::Rebind);

        let grant = in_stage(&session, Stage::Permissions, interrupt, |s| {
            permissions::apply(&self.config.layout, s.address(), s.paths(), self.config.node_mode)
        })?;
        session.complete(Stage::Permissions);

        let verified = in_stage(&session, Stage::Verify, interrupt, |s| {
            verify::verify(&self.config.layout, s.paths(), &self.config.target_driver)
        })?;
        session.complete(Stage::Verify);

        info!("VFIO setup completed successfully!");

        let (already_bound, previous_driver) = match rebind {
            RebindOutcome::AlreadyBound => (true, None),
            RebindOutcome::Rebound { previous } => (false, previous),
        };

        Ok(SetupReport {
            status: DeviceStatus::read(&self.config.layout, session.address(), session.paths()),
            driver: verified.driver,
            group: verified.group,
            identity,
            group_node: verified.group_node,
            container_node: grant.container_node,
            group_mode: verified.group_mode,
            iommu_groups: preflight.iommu_groups,
            modules,
            already_bound,
            previous_driver,
            warnings: verified.warnings,
        })
    }

    /// Read-only snapshot of a device; mutates nothing and needs no privilege.
    pub fn status(&self, address: &DeviceAddress) -> DeviceStatus {
        DeviceStatus::read(&self.config.layout, address, &self.resolve(address))
    }

    /// Best-effort long device description for the final summary.
    pub fn describe(&self, address: &DeviceAddress) -> Option<String> {
        self.platform
            .describe_device(address)
            .map_err(|e| debug!("Could not get device info: {e:#}"))
            .ok()
    }
}

/// Run one stage body inside its span and tag any failure with the stage.
///
/// A pending interrupt stops the run before the body starts. A failure
/// seen while an interrupt is pending is reported as the interrupt: a
/// child process killed by the same signal fails for that reason, not a
/// classified one.
fn in_stage<T>(
    session: &SetupSession,
    stage: Stage,
    interrupt: &AtomicBool,
    body: impl FnOnce(&SetupSession) -> Result<T>,
) -> std::result::Result<T, RunError> {
    let interrupted = || RunError::Interrupted {
        completed: session.last_completed(),
    };
    if interrupt.load(Ordering::SeqCst) {
        return Err(interrupted());
    }

    let span = info_span!("stage", name = stage.name());
    let _guard = span.enter();
    debug!("Stage start");

    body(session).map_err(|error| {
        if interrupt.load(Ordering::SeqCst) {
            interrupted()
        } else {
            RunError::Failed(StageFailure { stage, error })
        }
    })
}
