//! Kernel module activation
//!
//! Each module is checked, activated if needed, and checked again. The second
//! check is what catches an activation request that "succeeded" without the
//! module actually appearing.

use crate::error::{Result, SetupError};
use crate::platform::{module_listed, Platform};
use tracing::info;

/// What happened to one module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModuleOutcome {
    /// Already active; nothing was requested
    AlreadyActive(String),
    /// Activated by this run
    Activated(String),
}

impl ModuleOutcome {
    /// Module name
    pub fn name(&self) -> &str {
        match self {
            Self::AlreadyActive(name) | Self::Activated(name) => name,
        }
    }
}

/// Ensure every module in `modules` is active, in order.
///
/// # Errors
///
/// Returns `SetupError::ModuleLoadFailed` for the first module that cannot be
/// listed, whose activation is rejected, or that is still not active after
/// activation.
pub fn activate<P: Platform>(platform: &P, modules: &[String]) -> Result<Vec<ModuleOutcome>> {
    info!("Loading VFIO kernel modules...");
    modules
        .iter()
        .map(|module| activate_one(platform, module))
        .collect()
}

fn activate_one<P: Platform>(platform: &P, module: &str) -> Result<ModuleOutcome> {
    if is_active(platform, module)? {
        info!("Module {module} already loaded");
        return Ok(ModuleOutcome::AlreadyActive(module.to_string()));
    }

    info!("Loading module {module}...");
    platform
        .load_module(module)
        .map_err(|e| SetupError::module_load_failed(module, format!("{e:#}")))?;

    if !is_active(platform, module)? {
        return Err(SetupError::module_load_failed(
            module,
            "not active after activation request",
        ));
    }

    info!("Module {module} loaded successfully");
    Ok(ModuleOutcome::Activated(module.to_string()))
}

fn is_active<P: Platform>(platform: &P, module: &str) -> Result<bool> {
    let active = platform
        .active_modules()
        .map_err(|e| SetupError::module_load_failed(module, format!("cannot list modules: {e:#}")))?;
    Ok(module_listed(&active, module))
}
