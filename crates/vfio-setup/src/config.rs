//! Setup configuration
//!
//! Defaults target the live system. Environment variables relocate the
//! control surface or shorten the settle delay:
//!
//! | Variable | Effect |
//! |----------|--------|
//! | `VFIO_SETUP_SYSFS_ROOT` | sysfs mount point (default `/sys`) |
//! | `VFIO_SETUP_DEV_ROOT` | devfs mount point (default `/dev`) |
//! | `VFIO_SETUP_SETTLE_MS` | delay after each control write (default 1000) |

use std::path::PathBuf;
use std::time::Duration;
use vfio_layout::{SysfsLayout, DEV_ROOT, REQUIRED_MODULES, SETTLE_DELAY, SYSFS_ROOT, TARGET_DRIVER};

/// Environment variable overriding the sysfs root
pub const ENV_SYSFS_ROOT: &str = "VFIO_SETUP_SYSFS_ROOT";

/// Environment variable overriding the devfs root
pub const ENV_DEV_ROOT: &str = "VFIO_SETUP_DEV_ROOT";

/// Environment variable overriding the settle delay (milliseconds)
pub const ENV_SETTLE_MS: &str = "VFIO_SETUP_SETTLE_MS";

/// Mode applied to the group and container nodes.
pub const DEFAULT_NODE_MODE: u32 = 0o666;

/// Everything a run needs besides the device address.
#[derive(Debug, Clone)]
pub struct SetupConfig {
    /// Where sysfs and devfs live
    pub layout: SysfsLayout,
    /// Driver the device is handed to
    pub target_driver: String,
    /// Modules to activate, in order
    pub modules: Vec<String>,
    /// Wait after each mutating write before reading back
    pub settle_delay: Duration,
    /// Mode for the group and container nodes
    pub node_mode: u32,
}

impl Default for SetupConfig {
    fn default() -> Self {
        Self {
            layout: SysfsLayout::system(),
            target_driver: TARGET_DRIVER.to_string(),
            modules: REQUIRED_MODULES.iter().map(ToString::to_string).collect(),
            settle_delay: SETTLE_DELAY,
            node_mode: DEFAULT_NODE_MODE,
        }
    }
}

impl SetupConfig {
    /// Defaults with environment overrides applied.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults with overrides taken from `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        let sysfs_root = lookup(ENV_SYSFS_ROOT).map_or_else(|| PathBuf::from(SYSFS_ROOT), PathBuf::from);
        let dev_root = lookup(ENV_DEV_ROOT).map_or_else(|| PathBuf::from(DEV_ROOT), PathBuf::from);
        config.layout = SysfsLayout::new(sysfs_root, dev_root);

        if let Some(raw) = lookup(ENV_SETTLE_MS) {
            match raw.trim().parse::<u64>() {
                Ok(ms) => config.settle_delay = Duration::from_millis(ms),
                Err(e) => tracing::warn!("Ignoring {ENV_SETTLE_MS}={raw:?}: {e}"),
            }
        }

        config
    }

    /// Replace the layout
    #[must_use]
    pub fn with_layout(mut self, layout: SysfsLayout) -> Self {
        self.layout = layout;
        self
    }

    /// Replace the settle delay
    #[must_use]
    pub fn with_settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }
}
