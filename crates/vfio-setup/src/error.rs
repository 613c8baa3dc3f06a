//! Error types for pass-through setup

use crate::session::Stage;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for setup operations
pub type Result<T> = std::result::Result<T, SetupError>;

/// Classified setup failures.
///
/// None of these are retried inside a run: every variant describes kernel or
/// platform state that another attempt in the same run would observe again.
#[derive(Debug, Error)]
pub enum SetupError {
    /// Not allowed to write kernel control files
    #[error("insufficient privilege: writing driver control files requires root")]
    InsufficientPrivilege,

    /// Kernel exposes no IOMMU group directory at all
    #[error("IOMMU is not enabled ({} does not exist)", .path.display())]
    IommuUnavailable {
        /// Directory that was checked
        path: PathBuf,
    },

    /// No sysfs directory for the device
    #[error("PCI device {address} not found at {}", .path.display())]
    DeviceNotFound {
        /// Canonical device address
        address: String,
        /// Directory that was checked
        path: PathBuf,
    },

    /// Vendor or device id missing or unparsable
    #[error("cannot read device identity from {}: {reason}", .path.display())]
    IdentityUnavailable {
        /// Identity file
        path: PathBuf,
        /// What went wrong
        reason: String,
    },

    /// Module not observed active after activation was requested
    #[error("kernel module {module} failed to load: {reason}")]
    ModuleLoadFailed {
        /// Module name
        module: String,
        /// What went wrong
        reason: String,
    },

    /// Driver link still present after writing to `unbind`
    #[error("failed to unbind {address} from {driver}{}", detail_suffix(.detail.as_deref()))]
    UnbindFailed {
        /// Canonical device address
        address: String,
        /// Driver that kept the device
        driver: String,
        /// Write error, if the write itself was rejected
        detail: Option<String>,
    },

    /// No driver link after writing to `bind`
    #[error("failed to bind {address} to {driver}: device has no driver after bind{}", detail_suffix(.detail.as_deref()))]
    BindFailed {
        /// Canonical device address
        address: String,
        /// Target driver
        driver: String,
        /// Write error, if the write itself was rejected
        detail: Option<String>,
    },

    /// Driver link resolves to something other than the target driver
    #[error("{address} bound to wrong driver {actual} (expected {expected})")]
    WrongDriverBound {
        /// Canonical device address
        address: String,
        /// Driver found on the link
        actual: String,
        /// Target driver
        expected: String,
    },

    /// Target driver control file missing, so the driver is not in the kernel
    #[error("driver control file {} is missing; is the driver loaded?", .path.display())]
    DriverInterfaceUnavailable {
        /// Missing control file
        path: PathBuf,
    },

    /// Device has no `iommu_group` link
    #[error("cannot determine IOMMU group for {address} ({} missing)", .path.display())]
    GroupUnavailable {
        /// Canonical device address
        address: String,
        /// Link that was checked
        path: PathBuf,
    },

    /// User-space node the kernel should have created is missing
    #[error("VFIO node {} not found", .path.display())]
    PermissionTargetMissing {
        /// Missing node
        path: PathBuf,
    },

    /// `chmod` on a node failed
    #[error("failed to set permissions on {}: {source}", .path.display())]
    PermissionChangeFailed {
        /// Node whose mode could not be changed
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// End-to-end check disagrees with the desired state
    #[error("verification failed: {reason}")]
    VerificationFailed {
        /// What did not match
        reason: String,
    },
}

fn detail_suffix(detail: Option<&str>) -> String {
    detail.map(|d| format!(" ({d})")).unwrap_or_default()
}

impl SetupError {
    /// Create an identity unavailable error
    pub fn identity_unavailable(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::IdentityUnavailable {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create a module load failed error
    pub fn module_load_failed(module: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ModuleLoadFailed {
            module: module.into(),
            reason: reason.into(),
        }
    }

    /// Create a verification failed error
    pub fn verification_failed(reason: impl Into<String>) -> Self {
        Self::VerificationFailed {
            reason: reason.into(),
        }
    }

    /// Whether a later attempt within the same run could succeed.
    ///
    /// Always `false`; kept as an explicit query so callers do not guess.
    pub const fn is_retryable(&self) -> bool {
        false
    }

    /// Operator-facing remediation lines, if there is something to suggest.
    pub fn remediation(&self) -> &'static [&'static str] {
        match self {
            Self::InsufficientPrivilege => &["Run as root (e.g. with sudo)."],
            Self::IommuUnavailable { .. } => &[
                "Enable IOMMU (VT-d / AMD-Vi) in BIOS/UEFI.",
                "Add kernel parameters:",
                "  Intel: intel_iommu=on iommu=pt",
                "  AMD:   amd_iommu=on iommu=pt",
            ],
            Self::ModuleLoadFailed { .. } | Self::DriverInterfaceUnavailable { .. } => &[
                "Check that the vfio, vfio_iommu_type1 and vfio_pci modules are installed \
                 for the running kernel (modinfo vfio_pci).",
            ],
            Self::PermissionTargetMissing { .. } => &[
                "The device is bound but the kernel did not create its VFIO node; check dmesg.",
            ],
            _ => &[],
        }
    }
}

/// A classified error tagged with the stage it aborted.
#[derive(Debug, Error)]
#[error("{stage}: {error}")]
pub struct StageFailure {
    /// Stage that failed
    pub stage: Stage,
    /// Why it failed
    #[source]
    pub error: SetupError,
}

/// Why a run stopped early.
#[derive(Debug, Error)]
pub enum RunError {
    /// A stage failed with a classified error
    #[error(transparent)]
    Failed(#[from] StageFailure),

    /// The operator interrupted the run
    #[error("interrupted by user{}", .completed.as_ref().map(|s| format!(" after {s}")).unwrap_or_default())]
    Interrupted {
        /// Last stage that completed before the interrupt was seen
        completed: Option<Stage>,
    },
}

impl RunError {
    /// Stage the run stopped in, if it was a classified failure
    pub fn stage(&self) -> Option<Stage> {
        match self {
            Self::Failed(failure) => Some(failure.stage),
            Self::Interrupted { .. } => None,
        }
    }

    /// Underlying classified error, if any
    pub fn setup_error(&self) -> Option<&SetupError> {
        match self {
            Self::Failed(failure) => Some(&failure.error),
            Self::Interrupted { .. } => None,
        }
    }
}
